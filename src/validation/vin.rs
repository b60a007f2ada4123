use lazy_static::lazy_static;
use regex::Regex;

use crate::models::normalize_identifier;
use crate::utils::ScraperError;

lazy_static! {
    // I, O and Q never appear in a VIN
    static ref VIN: Regex = Regex::new(r"^[A-HJ-NPR-Z0-9]+$").unwrap();
}

// Older vehicles carry serials shorter than the 17 character standard
const MIN_LEN: usize = 11;
const MAX_LEN: usize = 17;

pub struct VinValidator;

impl VinValidator {
    pub fn validate(raw: &str) -> Result<String, ScraperError> {
        let vin = normalize_identifier(raw);

        if vin.is_empty() {
            return Err(ScraperError::InvalidInput("VIN cannot be empty".to_string()));
        }
        if vin.len() < MIN_LEN || vin.len() > MAX_LEN {
            return Err(ScraperError::InvalidInput(format!(
                "VIN must be {}-{} characters long",
                MIN_LEN, MAX_LEN
            )));
        }
        if !VIN.is_match(&vin) {
            return Err(ScraperError::InvalidInput(
                "VIN contains invalid characters (no I, O, Q allowed)".to_string(),
            ));
        }

        Ok(vin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_vins() {
        assert_eq!(
            VinValidator::validate("3g1ta5af1dl163526").unwrap(),
            "3G1TA5AF1DL163526"
        );
        assert_eq!(VinValidator::validate("AB123456789").unwrap(), "AB123456789");
    }

    #[test]
    fn test_invalid_vins() {
        assert!(VinValidator::validate("   ").is_err());
        assert!(VinValidator::validate("3G1TA5AF1").is_err());
        assert!(VinValidator::validate("3G1TA5AF1DL1635261").is_err());
        let err = VinValidator::validate("3G1TA5AF1DL16352O").unwrap_err();
        assert!(err.to_string().contains("no I, O, Q"));
    }
}
