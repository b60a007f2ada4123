/// Portal-specific field names and phrases. The markup is not contractually
/// stable, so every lookup is a prioritized list rather than a single name.
#[derive(Debug, Clone)]
pub struct FieldRules {
    pub form_id: String,
    pub form_class: String,
    /// Regex applied to input names when neither id nor class matched.
    pub fallback_input_pattern: String,
    /// Case-insensitive substrings marking a captcha `img` source.
    pub captcha_src_markers: Vec<String>,
    pub captcha_form_id: String,
    pub captcha_token_field: String,
    pub captcha_answer_field: String,
    pub plate_fields: Vec<String>,
    pub plate_fallback: String,
    pub vin_fields: Vec<String>,
    /// Written together when no VIN candidate exists in the form.
    pub vin_fallbacks: Vec<String>,
    pub rejection_phrases: Vec<String>,
    pub not_found_phrases: Vec<String>,
}

impl FieldRules {
    pub fn new() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        FieldRules {
            form_id: "pide_placa".to_string(),
            form_class: "codigo".to_string(),
            fallback_input_pattern: r"placa|vin|niv|numserie".to_string(),
            captcha_src_markers: strings(&["captcha", "imagebuilder"]),
            captcha_form_id: "captcha_gen".to_string(),
            captcha_token_field: "codigo_gen".to_string(),
            captcha_answer_field: "codigo_usr".to_string(),
            plate_fields: strings(&["placa", "placas", "plate", "license_plate", "matricula"]),
            plate_fallback: "placa".to_string(),
            vin_fields: strings(&["numserie", "vin", "niv", "numero_identificacion", "serie"]),
            vin_fallbacks: strings(&["numserie", "niv"]),
            rejection_phrases: strings(&[
                "codigo de seguridad incorrecto",
                "captcha incorrecto",
                "codigo incorrecto",
                "verifique el codigo",
            ]),
            not_found_phrases: strings(&[
                "no se encontró registro",
                "verifique los datos",
                "error",
                "no existe",
                "datos incorrectos",
            ]),
        }
    }

    /// True when the page text carries one of the captcha rejection phrases.
    pub fn is_captcha_rejection(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        self.rejection_phrases
            .iter()
            .any(|phrase| lowered.contains(phrase.as_str()))
    }
}

impl Default for FieldRules {
    fn default() -> Self {
        Self::new()
    }
}
