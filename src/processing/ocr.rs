use std::io::Write;

use image::GrayImage;
use tesseract::{PageSegMode, Tesseract};

use crate::processing::ImageProcessor;
use crate::utils::ScraperError;

pub const ALPHANUMERIC_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Page segmentation strategies used for short captcha strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segmentation {
    SingleWord,
    SingleLine,
    SingleBlock,
    SparseText,
}

impl Segmentation {
    fn page_seg_mode(self) -> PageSegMode {
        match self {
            Segmentation::SingleWord => PageSegMode::PsmSingleWord,
            Segmentation::SingleLine => PageSegMode::PsmSingleLine,
            Segmentation::SingleBlock => PageSegMode::PsmSingleBlock,
            Segmentation::SparseText => PageSegMode::PsmSparseText,
        }
    }
}

/// One OCR engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrConfig {
    pub segmentation: Segmentation,
    pub whitelist: bool,
}

impl OcrConfig {
    pub const fn new(segmentation: Segmentation, whitelist: bool) -> Self {
        OcrConfig {
            segmentation,
            whitelist,
        }
    }

    /// Word, line, block and sparse modes, with and without the whitelist.
    pub fn captcha_defaults() -> Vec<OcrConfig> {
        vec![
            OcrConfig::new(Segmentation::SingleWord, true),
            OcrConfig::new(Segmentation::SingleLine, true),
            OcrConfig::new(Segmentation::SingleBlock, true),
            OcrConfig::new(Segmentation::SparseText, true),
            OcrConfig::new(Segmentation::SingleWord, false),
            OcrConfig::new(Segmentation::SingleLine, false),
            OcrConfig::new(Segmentation::SparseText, false),
        ]
    }
}

/// Raw engine output before cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecognition {
    pub text: String,
    /// Mean confidence over recognized characters when the engine reports it.
    pub confidence: Option<f32>,
}

pub trait OcrEngine {
    fn recognize(&self, bitmap: &GrayImage, config: &OcrConfig) -> Result<RawRecognition, ScraperError>;
}

/// Tesseract backed engine. A fresh handle is created per recognition so
/// variables set for one configuration never leak into the next.
pub struct TesseractEngine {
    datapath: Option<String>,
    language: String,
}

impl TesseractEngine {
    pub fn new() -> Self {
        TesseractEngine {
            datapath: None,
            language: "eng".to_string(),
        }
    }

    pub fn with_datapath(mut self, datapath: &str) -> Self {
        self.datapath = Some(datapath.to_string());
        self
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, bitmap: &GrayImage, config: &OcrConfig) -> Result<RawRecognition, ScraperError> {
        // Tesseract reads from disk, so stage the bitmap in a temp PNG
        let png = ImageProcessor::encode_png(bitmap)?;
        let mut temp_file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .map_err(|e| ScraperError::Ocr(format!("Failed to create temp file: {}", e)))?;
        temp_file
            .write_all(&png)
            .map_err(|e| ScraperError::Ocr(format!("Failed to write to temp file: {}", e)))?;
        let path_str = temp_file
            .path()
            .to_str()
            .ok_or_else(|| ScraperError::Ocr("Could not convert path to string".to_string()))?;

        let mut tess = Tesseract::new(self.datapath.as_deref(), Some(self.language.as_str()))
            .map_err(|e| ScraperError::Ocr(format!("Failed to initialize Tesseract: {}", e)))?;
        if config.whitelist {
            tess = tess
                .set_variable("tessedit_char_whitelist", ALPHANUMERIC_WHITELIST)
                .map_err(|e| ScraperError::Ocr(format!("Failed to set Tesseract variable: {}", e)))?;
        }

        // Page seg mode modifies in place
        tess.set_page_seg_mode(config.segmentation.page_seg_mode());

        let mut tess = tess
            .set_image(path_str)
            .map_err(|e| ScraperError::Ocr(format!("Failed to set image: {}", e)))?;
        let text = tess
            .get_text()
            .map_err(|e| ScraperError::Ocr(format!("Failed to extract text: {}", e)))?;

        // Negative or zero means nothing was scored
        let mean = tess.mean_text_conf();
        let confidence = if mean > 0 { Some(mean as f32) } else { None };

        Ok(RawRecognition { text, confidence })
    }
}
