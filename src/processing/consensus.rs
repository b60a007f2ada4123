use std::collections::HashMap;

use log::{debug, info, warn};

use crate::models::{CaptchaCandidateSet, OcrVote};
use crate::processing::ocr::{OcrConfig, OcrEngine};

/// Shorter answers are never accepted.
pub const MIN_ANSWER_LEN: usize = 3;
/// Floor for trusting a lone high-confidence answer.
pub const MIN_CONFIDENCE: f32 = 50.0;

/// Runs OCR over every (bitmap, configuration) pair and settles on one
/// answer. Frequency across pipelines outranks any single confidence score.
pub struct OcrConsensusSolver<E: OcrEngine> {
    engine: E,
    configs: Vec<OcrConfig>,
}

impl<E: OcrEngine> OcrConsensusSolver<E> {
    pub fn new(engine: E) -> Self {
        Self::with_configs(engine, OcrConfig::captcha_defaults())
    }

    pub fn with_configs(engine: E, configs: Vec<OcrConfig>) -> Self {
        OcrConsensusSolver { engine, configs }
    }

    pub fn solve(&self, candidates: &CaptchaCandidateSet) -> Option<String> {
        let votes = self.collect_votes(candidates);
        let decision = Self::decide(&votes);
        match &decision {
            Some(text) => info!("Captcha consensus: '{}' from {} votes", text, votes.len()),
            None => warn!("No reliable OCR result among {} votes", votes.len()),
        }
        decision
    }

    /// One vote per successful (bitmap, configuration) pair. Engine failures
    /// and empty readings are left out of the vote set.
    pub fn collect_votes(&self, candidates: &CaptchaCandidateSet) -> Vec<OcrVote> {
        let mut votes = Vec::with_capacity(candidates.len() * self.configs.len());

        for (index, bitmap) in candidates.iter().enumerate() {
            for config in &self.configs {
                let raw = match self.engine.recognize(bitmap, config) {
                    Ok(raw) => raw,
                    Err(e) => {
                        debug!("OCR config {:?} failed on candidate {}: {}", config, index + 1, e);
                        continue;
                    }
                };

                let text = clean_text(&raw.text);
                if text.is_empty() {
                    continue;
                }
                let confidence = raw.confidence.unwrap_or(0.0);
                debug!(
                    "OCR result: '{}' (confidence: {:.1}%) candidate {} {:?}",
                    text, confidence, index + 1, config
                );
                votes.push(OcrVote { text, confidence });
            }
        }

        votes
    }

    /// Deterministic decision over a vote batch, in priority order:
    /// repeated answer, confident answer, most common answer, best answer.
    pub fn decide(votes: &[OcrVote]) -> Option<String> {
        // Tally in first-seen order so ties resolve deterministically
        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for vote in votes.iter().filter(|v| v.text.len() >= MIN_ANSWER_LEN) {
            let count = counts.entry(vote.text.as_str()).or_insert(0);
            if *count == 0 {
                order.push(vote.text.as_str());
            }
            *count += 1;
        }

        let most_common = order
            .iter()
            .fold(None::<(&str, usize)>, |best, text| {
                let count = counts[text];
                match best {
                    Some((_, best_count)) if best_count >= count => best,
                    _ => Some((*text, count)),
                }
            });

        // 1. Seen in at least two trials
        if let Some((text, count)) = most_common {
            if count >= 2 {
                return Some(text.to_string());
            }
        }

        let most_confident = votes.iter().fold(None::<&OcrVote>, |best, vote| match best {
            Some(b) if b.confidence >= vote.confidence => Some(b),
            _ => Some(vote),
        });

        // 2. Single confident reading
        if let Some(vote) = most_confident {
            if vote.text.len() >= MIN_ANSWER_LEN && vote.confidence > MIN_CONFIDENCE {
                return Some(vote.text.clone());
            }
        }

        // 3. Most common reading, even if seen once
        if let Some((text, _)) = most_common {
            return Some(text.to_string());
        }

        // 4. Best reading regardless of confidence
        most_confident
            .filter(|vote| vote.text.len() >= MIN_ANSWER_LEN)
            .map(|vote| vote.text.clone())
    }
}

/// Uppercase and keep ASCII letters and digits only.
pub fn clean_text(raw: &str) -> String {
    raw.chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ocr::{RawRecognition, Segmentation};
    use crate::utils::ScraperError;
    use image::{GrayImage, Luma};
    use std::collections::HashMap as Map;

    type Solver = OcrConsensusSolver<ScriptedEngine>;

    /// Answers keyed by the first pixel value of the bitmap and whitelist flag.
    struct ScriptedEngine {
        answers: Map<(u8, bool), Result<RawRecognition, ScraperError>>,
    }

    impl OcrEngine for ScriptedEngine {
        fn recognize(&self, bitmap: &GrayImage, config: &OcrConfig) -> Result<RawRecognition, ScraperError> {
            let key = (bitmap.get_pixel(0, 0)[0], config.whitelist);
            self.answers
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Err(ScraperError::Ocr("no answer".to_string())))
        }
    }

    fn reading(text: &str, confidence: Option<f32>) -> Result<RawRecognition, ScraperError> {
        Ok(RawRecognition {
            text: text.to_string(),
            confidence,
        })
    }

    #[test]
    fn test_frequency_beats_confidence() {
        let votes = vec![
            OcrVote::new("AB3X", 80.0),
            OcrVote::new("AB3X", 40.0),
            OcrVote::new("ZZ11", 90.0),
        ];
        assert_eq!(Solver::decide(&votes), Some("AB3X".to_string()));
    }

    #[test]
    fn test_single_vote() {
        let votes = vec![OcrVote::new("Q7K2", 95.0)];
        assert_eq!(Solver::decide(&votes), Some("Q7K2".to_string()));
    }

    #[test]
    fn test_confident_single_reading_wins_without_repeats() {
        let votes = vec![
            OcrVote::new("AAA1", 20.0),
            OcrVote::new("BBB2", 75.0),
            OcrVote::new("CCC3", 30.0),
        ];
        assert_eq!(Solver::decide(&votes), Some("BBB2".to_string()));
    }

    #[test]
    fn test_low_confidence_falls_back_to_first_seen() {
        let votes = vec![
            OcrVote::new("AAA1", 20.0),
            OcrVote::new("BBB2", 45.0),
        ];
        assert_eq!(Solver::decide(&votes), Some("AAA1".to_string()));
    }

    #[test]
    fn test_repeat_tie_broken_by_first_seen() {
        let votes = vec![
            OcrVote::new("XY12", 10.0),
            OcrVote::new("PQ34", 99.0),
            OcrVote::new("PQ34", 99.0),
            OcrVote::new("XY12", 10.0),
        ];
        assert_eq!(Solver::decide(&votes), Some("XY12".to_string()));
    }

    #[test]
    fn test_short_readings_never_win() {
        let votes = vec![
            OcrVote::new("AB", 99.0),
            OcrVote::new("AB", 99.0),
            OcrVote::new("Z", 80.0),
        ];
        assert_eq!(Solver::decide(&votes), None);
        assert_eq!(Solver::decide(&[]), None);
    }

    #[test]
    fn test_repeated_answer_wins_in_any_order() {
        let votes = [
            OcrVote::new("K9P4", 61.0),
            OcrVote::new("K9P4", 12.0),
            OcrVote::new("M2M2", 88.0),
        ];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in orders {
            let permuted: Vec<OcrVote> = order.iter().map(|&i| votes[i].clone()).collect();
            assert_eq!(Solver::decide(&permuted), Some("K9P4".to_string()), "order {:?}", order);
        }
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text(" ab-3x\n"), "AB3X");
        assert_eq!(clean_text("ñ7 k.2"), "7K2");
    }

    #[test]
    fn test_solve_over_candidates_skips_failures() {
        let mut answers = Map::new();
        answers.insert((0, true), reading("ab 3x", Some(70.0)));
        answers.insert((0, false), Err(ScraperError::Ocr("engine crashed".to_string())));
        answers.insert((255, true), reading("AB3X\n", Some(55.0)));
        answers.insert((255, false), reading("  ", None));

        let solver = OcrConsensusSolver::with_configs(
            ScriptedEngine { answers },
            vec![
                OcrConfig::new(Segmentation::SingleWord, true),
                OcrConfig::new(Segmentation::SingleWord, false),
            ],
        );
        let candidates = vec![
            GrayImage::from_pixel(4, 4, Luma([0])),
            GrayImage::from_pixel(4, 4, Luma([255])),
        ];

        let votes = solver.collect_votes(&candidates);
        assert_eq!(votes.len(), 2);
        assert!(votes.iter().all(|v| v.text == "AB3X"));
        assert_eq!(solver.solve(&candidates), Some("AB3X".to_string()));
    }
}
