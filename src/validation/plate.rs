use lazy_static::lazy_static;
use regex::Regex;

use crate::models::normalize_identifier;
use crate::utils::ScraperError;

lazy_static! {
    static ref PLATE: Regex = Regex::new(r"^[A-Z0-9]+$").unwrap();
}

const MIN_LEN: usize = 6;
const MAX_LEN: usize = 8;

/// Syntax checks for Mexican license plates.
pub struct PlateValidator;

impl PlateValidator {
    /// Returns the normalized plate when it is acceptable.
    pub fn validate(raw: &str) -> Result<String, ScraperError> {
        let plate = normalize_identifier(raw);

        if plate.is_empty() {
            return Err(ScraperError::InvalidInput("Plate cannot be empty".to_string()));
        }
        if plate.len() < MIN_LEN || plate.len() > MAX_LEN {
            return Err(ScraperError::InvalidInput(format!(
                "Plate must be {}-{} characters long",
                MIN_LEN, MAX_LEN
            )));
        }
        if !PLATE.is_match(&plate) {
            return Err(ScraperError::InvalidInput(
                "Plate can only contain letters and numbers".to_string(),
            ));
        }

        Ok(plate)
    }
}
