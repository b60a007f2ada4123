use thiserror::Error;

/// Message shown to callers when the portal has no record for the vehicle.
pub const NOT_FOUND_MESSAGE: &str =
    "Verifique los datos que ingreso, no se encontró registro de este vehículo.";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScraperError {
    #[error("Could not find vehicle form on page")]
    FormNotFound,
    #[error("Unable to solve captcha after multiple attempts")]
    CaptchaUnresolved,
    #[error("Captcha rejected by the portal")]
    CaptchaRejected,
    #[error("Network error: {0}")]
    NetworkFailure(String),
    #[error("{}", NOT_FOUND_MESSAGE)]
    NoRecordFound,
    #[error("Image processing error: {0}")]
    ImageProcessing(String),
    #[error("OCR error: {0}")]
    Ocr(String),
    #[error("Deadline exceeded before the query completed")]
    DeadlineExceeded,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScraperError {
    /// Whether the outer attempt loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ScraperError::NoRecordFound
                | ScraperError::DeadlineExceeded
                | ScraperError::InvalidInput(_)
                | ScraperError::Config(_)
        )
    }
}

impl From<reqwest::Error> for ScraperError {
    fn from(err: reqwest::Error) -> Self {
        ScraperError::NetworkFailure(err.to_string())
    }
}

impl From<image::ImageError> for ScraperError {
    fn from(err: image::ImageError) -> Self {
        ScraperError::ImageProcessing(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ScraperError::FormNotFound.is_retryable());
        assert!(ScraperError::CaptchaUnresolved.is_retryable());
        assert!(ScraperError::CaptchaRejected.is_retryable());
        assert!(ScraperError::NetworkFailure("timeout".to_string()).is_retryable());
        assert!(!ScraperError::NoRecordFound.is_retryable());
        assert!(!ScraperError::DeadlineExceeded.is_retryable());
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(ScraperError::NoRecordFound.to_string(), NOT_FOUND_MESSAGE);
    }
}
