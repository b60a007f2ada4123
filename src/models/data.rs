use std::collections::BTreeMap;

use image::GrayImage;
use serde::ser::Serializer;
use serde::Serialize;

/// Field name to value mapping for one submission attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FormState {
    fields: BTreeMap<String, String>,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), value.to_string());
    }

    /// Insert only when the field is not present yet.
    pub fn insert_if_absent(&mut self, name: &str, value: &str) {
        self.fields
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Captcha image found on the query page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaReference {
    /// `src` attribute as written in the page, relative or absolute.
    pub src: String,
    /// Companion captcha-session token, also copied into the form.
    pub token: Option<String>,
}

/// Candidate bitmaps derived from one raw captcha image.
pub type CaptchaCandidateSet = Vec<GrayImage>;

/// One OCR observation for a (bitmap, configuration) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrVote {
    /// Uppercase alphanumeric text.
    pub text: String,
    /// Mean confidence in 0..=100, 0 when the engine reported none.
    pub confidence: f32,
}

impl OcrVote {
    pub fn new(text: &str, confidence: f32) -> Self {
        OcrVote {
            text: text.to_string(),
            confidence,
        }
    }
}

/// Normalized plate and VIN pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VehicleQuery {
    plate: String,
    vin: String,
}

impl VehicleQuery {
    pub fn new(plate: &str, vin: &str) -> Self {
        VehicleQuery {
            plate: normalize_identifier(plate),
            vin: normalize_identifier(vin),
        }
    }

    pub fn plate(&self) -> &str {
        &self.plate
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }
}

/// Trim, uppercase and drop any internal whitespace.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VehicleInfo {
    pub vin: String,
    pub make: String,
    pub model: String,
    pub description: String,
    pub year: String,
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaxRecord {
    pub period: i32,
    pub tenencia: f64,
    pub refrendo: f64,
    pub total: f64,
}

impl TaxRecord {
    /// Build a record, deriving the total when the page did not print one.
    pub fn new(period: i32, tenencia: f64, refrendo: f64, total: f64) -> Self {
        let total = if total == 0.0 && (tenencia > 0.0 || refrendo > 0.0) {
            tenencia + refrendo
        } else {
            total
        };
        TaxRecord {
            period,
            tenencia,
            refrendo,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VehicleResult {
    Found {
        vehicle: VehicleInfo,
        taxes: Vec<TaxRecord>,
    },
    Failure {
        message: String,
    },
}

impl VehicleResult {
    pub fn failure(message: impl Into<String>) -> Self {
        VehicleResult::Failure {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, VehicleResult::Found { .. })
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            VehicleResult::Failure { message } => Some(message),
            VehicleResult::Found { .. } => None,
        }
    }
}

#[derive(Serialize)]
struct ResultEnvelope<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    vehicle: Option<&'a VehicleInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    taxes: Option<&'a [TaxRecord]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl Serialize for VehicleResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            VehicleResult::Found { vehicle, taxes } => ResultEnvelope {
                ok: true,
                vehicle: Some(vehicle),
                taxes: Some(taxes),
                message: None,
            },
            VehicleResult::Failure { message } => ResultEnvelope {
                ok: false,
                vehicle: None,
                taxes: None,
                message: Some(message),
            },
        };
        envelope.serialize(serializer)
    }
}
