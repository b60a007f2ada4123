use log::{error, info, warn};
use url::Url;

use crate::config::ScraperConfig;
use crate::models::{FieldRules, FormState, VehicleQuery, VehicleResult};
use crate::network::{HttpSession, Session};
use crate::processing::{
    FormExtractor, ImageProcessor, OcrConsensusSolver, OcrEngine, ResultParser, TesseractEngine,
};
use crate::utils::{Deadline, ScraperError};

/// How the portal answered one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted(String),
    CaptchaRejected(String),
}

/// TaxScraper drives one query end to end: fetch the form, solve its
/// captcha, fill in the vehicle identifiers, submit, and retry while the
/// portal rejects the captcha.
pub struct TaxScraper<E: OcrEngine = TesseractEngine> {
    config: ScraperConfig,
    rules: FieldRules,
    solver: OcrConsensusSolver<E>,
}

impl TaxScraper<TesseractEngine> {
    pub fn new(config: ScraperConfig) -> Self {
        Self::with_engine(config, TesseractEngine::new())
    }
}

impl<E: OcrEngine> TaxScraper<E> {
    pub fn with_engine(config: ScraperConfig, engine: E) -> Self {
        TaxScraper {
            config,
            rules: FieldRules::new(),
            solver: OcrConsensusSolver::new(engine),
        }
    }

    pub fn with_rules(mut self, rules: FieldRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// Look up a vehicle with no time bound.
    pub fn solve(&self, plate: &str, vin: &str) -> VehicleResult {
        self.solve_with_deadline(plate, vin, Deadline::none())
    }

    /// Look up a vehicle on a fresh session. Never returns a raw error.
    pub fn solve_with_deadline(&self, plate: &str, vin: &str, deadline: Deadline) -> VehicleResult {
        let query = VehicleQuery::new(plate, vin);
        let mut session = match HttpSession::new(&self.config) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to create session: {}", e);
                return VehicleResult::failure(format!("Error processing request: {}", e));
            }
        };
        self.solve_with_session(&mut session, &query, &deadline)
    }

    pub fn solve_with_session<S: Session + ?Sized>(
        &self,
        session: &mut S,
        query: &VehicleQuery,
        deadline: &Deadline,
    ) -> VehicleResult {
        info!("Getting vehicle info for plate: {}, VIN: {}", query.plate(), query.vin());

        match self.submit_query(session, query, deadline) {
            Ok(html) => ResultParser::parse(&html, &self.rules),
            Err(e) => {
                error!("Error getting vehicle info: {}", e);
                VehicleResult::failure(format!("Error processing request: {}", e))
            }
        }
    }

    /// Outer attempt loop. Returns the page to parse; when every attempt had
    /// its captcha rejected the last rejected page is returned as well.
    pub fn submit_query<S: Session + ?Sized>(
        &self,
        session: &mut S,
        query: &VehicleQuery,
        deadline: &Deadline,
    ) -> Result<String, ScraperError> {
        let form_url = self.config.form_url()?.to_string();
        let policy = self.config.outer_retry;

        for attempt in policy.attempts() {
            deadline.check()?;
            info!(
                "Attempt {}/{} to submit query for plate: {}, VIN: {}",
                attempt,
                policy.max_attempts,
                query.plate(),
                query.vin()
            );

            match self.run_attempt(session, &form_url, query, deadline) {
                Ok(SubmitOutcome::Accepted(body)) => {
                    info!("Successfully submitted form on attempt {}", attempt);
                    return Ok(body);
                }
                Ok(SubmitOutcome::CaptchaRejected(body)) => {
                    warn!("Captcha validation failed on attempt {}", attempt);
                    if policy.is_last(attempt) {
                        error!("All captcha attempts failed");
                        return Ok(body);
                    }
                }
                Err(e) => {
                    error!("Error on attempt {}: {}", attempt, e);
                    if policy.is_last(attempt) || !e.is_retryable() {
                        return Err(e);
                    }
                }
            }

            policy.pause(deadline);
        }

        // RetryPolicy always yields at least one attempt
        Err(ScraperError::CaptchaRejected)
    }

    /// One FETCH_FORM -> SOLVE_CAPTCHA -> FILL_FORM -> SUBMIT cycle.
    pub fn run_attempt<S: Session + ?Sized>(
        &self,
        session: &mut S,
        form_url: &str,
        query: &VehicleQuery,
        deadline: &Deadline,
    ) -> Result<SubmitOutcome, ScraperError> {
        let extraction = FormExtractor::fetch_form(session, form_url, &self.rules, deadline)?;
        let mut form = extraction.form;

        match &extraction.captcha {
            Some(captcha) => {
                info!("Captcha detected, attempting to solve...");
                let captcha_url = self.resolve_captcha_url(&captcha.src)?;
                let answer = self.solve_captcha(session, &captcha_url, deadline)?;
                info!("Using captcha solution: {}", answer);
                form.insert(&self.rules.captcha_answer_field, &answer);
            }
            None => info!("No captcha detected"),
        }

        self.fill_form(&mut form, query);

        let body = session.post_form(form_url, &form, deadline)?;
        if self.rules.is_captcha_rejection(&body) {
            Ok(SubmitOutcome::CaptchaRejected(body))
        } else {
            Ok(SubmitOutcome::Accepted(body))
        }
    }

    /// Concrete download URL for a captcha `src`. The known captcha builder
    /// always maps to its absolute endpoint; anything else resolves against
    /// the base page.
    pub fn resolve_captcha_url(&self, src: &str) -> Result<String, ScraperError> {
        if src.to_lowercase().contains("captcha/imagebuilder.php") {
            return Ok(self.config.captcha_endpoint.clone());
        }

        let base = Url::parse(&self.config.base_url)
            .map_err(|e| ScraperError::Config(format!("BASE_URL: {}", e)))?;
        base.join(src).map(String::from).map_err(|e| {
            warn!("Unusable captcha reference '{}': {}", src, e);
            ScraperError::CaptchaUnresolved
        })
    }

    /// Inner OCR loop: download, preprocess, vote. Each try fetches a new image.
    pub fn solve_captcha<S: Session + ?Sized>(
        &self,
        session: &mut S,
        captcha_url: &str,
        deadline: &Deadline,
    ) -> Result<String, ScraperError> {
        let policy = self.config.inner_retry;

        for attempt in policy.attempts() {
            deadline.check()?;
            info!("Captcha solving attempt {}/{}", attempt, policy.max_attempts);

            let download_deadline = deadline.tightened(self.config.captcha_timeout);
            match session.get(captcha_url, &download_deadline) {
                Ok(bytes) => {
                    if let Some(answer) = self.read_captcha(&bytes) {
                        return Ok(answer);
                    }
                }
                Err(e) => warn!("Error downloading captcha: {}", e),
            }

            if !policy.is_last(attempt) {
                policy.pause(deadline);
            }
        }

        warn!("Failed to solve captcha after {} attempts", policy.max_attempts);
        Err(ScraperError::CaptchaUnresolved)
    }

    fn read_captcha(&self, bytes: &[u8]) -> Option<String> {
        let candidates = ImageProcessor::preprocess(bytes);

        if let Some(dir) = &self.config.debug_dir {
            if let Err(e) = ImageProcessor::save_debug_images(dir, bytes, &candidates) {
                warn!("Error saving debug images: {}", e);
            }
        }
        if candidates.is_empty() {
            return None;
        }

        let answer = self.solver.solve(&candidates)?;
        if answer.len() < self.config.min_captcha_len {
            warn!("Discarding short captcha reading '{}'", answer);
            return None;
        }
        Some(answer)
    }

    /// Inject plate and VIN into the first known field names present.
    pub fn fill_form(&self, form: &mut FormState, query: &VehicleQuery) {
        let plate_field = self
            .rules
            .plate_fields
            .iter()
            .find(|name| form.contains(name))
            .unwrap_or(&self.rules.plate_fallback)
            .clone();
        form.insert(&plate_field, query.plate());

        let vin_field = self
            .rules
            .vin_fields
            .iter()
            .find(|name| form.contains(name))
            .cloned();
        match vin_field {
            Some(name) => form.insert(&name, query.vin()),
            None => {
                for name in &self.rules.vin_fallbacks {
                    form.insert(name, query.vin());
                }
            }
        }
    }
}
