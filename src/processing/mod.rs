pub mod consensus;
pub mod extractors;
pub mod form;
pub mod image_processor;
pub mod ocr;

pub use consensus::OcrConsensusSolver;
pub use extractors::ResultParser;
pub use form::FormExtractor;
pub use image_processor::ImageProcessor;
pub use ocr::{OcrConfig, OcrEngine, TesseractEngine};
