use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::{CaptchaReference, FieldRules, FormState};
use crate::network::{decode_body, Session};
use crate::utils::{Deadline, ScraperError};

lazy_static! {
    static ref FORM: Selector = Selector::parse("form").unwrap();
    static ref INPUT: Selector = Selector::parse("input").unwrap();
    static ref SELECT: Selector = Selector::parse("select").unwrap();
    static ref OPTION: Selector = Selector::parse("option").unwrap();
    static ref IMG: Selector = Selector::parse("img[src]").unwrap();
}

const SKIPPED_INPUT_TYPES: [&str; 3] = ["submit", "button", "reset"];

/// Which step of the fallback chain located the vehicle form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMatch {
    ById,
    ByClass,
    ByInputName,
}

pub enum FormLookup<'a> {
    Found(ElementRef<'a>, FormMatch),
    NotFound,
}

/// Initial field values plus the captcha image, if the page carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct FormExtraction {
    pub form: FormState,
    pub captcha: Option<CaptchaReference>,
    pub matched_by: FormMatch,
}

pub struct FormExtractor;

impl FormExtractor {
    /// GET the query page through `session` and extract its form.
    pub fn fetch_form<S: Session + ?Sized>(
        session: &mut S,
        url: &str,
        rules: &FieldRules,
        deadline: &Deadline,
    ) -> Result<FormExtraction, ScraperError> {
        info!("Fetching form data from: {}", url);
        let body = session.get(url, deadline)?;
        let html = decode_body(&body);
        debug!("Page size: {} characters", html.len());
        Self::extract(&html, rules)
    }

    pub fn extract(html: &str, rules: &FieldRules) -> Result<FormExtraction, ScraperError> {
        let document = Html::parse_document(html);

        let (form, matched_by) = match Self::locate_form(&document, rules)? {
            FormLookup::Found(form, matched_by) => (form, matched_by),
            FormLookup::NotFound => {
                for (i, f) in document.select(&FORM).enumerate() {
                    debug!(
                        "Form {}: id={:?}, class={:?}",
                        i + 1,
                        f.value().id(),
                        f.value().attr("class")
                    );
                }
                return Err(ScraperError::FormNotFound);
            }
        };
        if matched_by == FormMatch::ByInputName {
            info!("Found form using fallback method");
        }

        let mut state = Self::collect_fields(form);

        let captcha = Self::find_captcha(&document, rules);
        if let Some(reference) = &captcha {
            info!("Found captcha image: {}", reference.src);
            if let Some(token) = &reference.token {
                state.insert(&rules.captcha_token_field, token);
            }
        }

        debug!("Form data extracted: {:?}", state.names());
        Ok(FormExtraction {
            form: state,
            captcha,
            matched_by,
        })
    }

    /// Known id, then known class, then any form with a plate/VIN-like input.
    pub fn locate_form<'a>(document: &'a Html, rules: &FieldRules) -> Result<FormLookup<'a>, ScraperError> {
        let forms: Vec<ElementRef<'a>> = document.select(&FORM).collect();
        debug!("Total forms found: {}", forms.len());

        if let Some(form) = forms.iter().find(|f| f.value().id() == Some(rules.form_id.as_str())) {
            return Ok(FormLookup::Found(*form, FormMatch::ById));
        }

        if let Some(form) = forms
            .iter()
            .find(|f| f.value().classes().any(|c| c == rules.form_class))
        {
            return Ok(FormLookup::Found(*form, FormMatch::ByClass));
        }

        let pattern = Regex::new(&rules.fallback_input_pattern)
            .map_err(|e| ScraperError::Config(format!("Invalid form input pattern: {}", e)))?;
        let by_input = forms.iter().find(|f| {
            f.select(&INPUT)
                .filter_map(|input| input.value().attr("name"))
                .any(|name| pattern.is_match(name))
        });

        Ok(match by_input {
            Some(form) => FormLookup::Found(*form, FormMatch::ByInputName),
            None => FormLookup::NotFound,
        })
    }

    /// Hidden inputs first, then other inputs without overriding, then selects.
    fn collect_fields(form: ElementRef<'_>) -> FormState {
        let mut state = FormState::new();

        for input in form.select(&INPUT) {
            let element = input.value();
            if Self::input_type(element) != "hidden" {
                continue;
            }
            if let Some(name) = element.attr("name") {
                state.insert(name, element.attr("value").unwrap_or(""));
            }
        }

        for input in form.select(&INPUT) {
            let element = input.value();
            let input_type = Self::input_type(element);
            if SKIPPED_INPUT_TYPES.contains(&input_type.as_str()) {
                continue;
            }
            if let Some(name) = element.attr("name") {
                state.insert_if_absent(name, element.attr("value").unwrap_or(""));
            }
        }

        for select in form.select(&SELECT) {
            let Some(name) = select.value().attr("name") else {
                continue;
            };
            let options: Vec<ElementRef<'_>> = select.select(&OPTION).collect();
            let chosen = options
                .iter()
                .find(|o| o.value().attr("selected").is_some())
                .or_else(|| options.first());
            if let Some(option) = chosen {
                state.insert(name, option.value().attr("value").unwrap_or(""));
            }
        }

        state
    }

    /// Lowercased `type` attribute, `text` when absent.
    fn input_type(element: &scraper::node::Element) -> String {
        element
            .attr("type")
            .map(|t| t.trim().to_ascii_lowercase())
            .unwrap_or_else(|| "text".to_string())
    }

    fn find_captcha(document: &Html, rules: &FieldRules) -> Option<CaptchaReference> {
        let src = document.select(&IMG).find_map(|img| {
            let src = img.value().attr("src")?;
            let lowered = src.to_lowercase();
            rules
                .captcha_src_markers
                .iter()
                .any(|marker| lowered.contains(marker.as_str()))
                .then(|| src.to_string())
        })?;

        let token = document
            .select(&FORM)
            .find(|f| f.value().id() == Some(rules.captcha_form_id.as_str()))
            .and_then(|captcha_form| {
                captcha_form
                    .select(&INPUT)
                    .find(|i| i.value().attr("name") == Some(rules.captcha_token_field.as_str()))
            })
            .map(|input| input.value().attr("value").unwrap_or("").to_string());
        if token.is_none() {
            warn!("Captcha image present but no captcha token form found");
        }

        Some(CaptchaReference { src, token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTAL_PAGE: &str = r#"
        <html><body>
          <form id="buscador" action="/search"><input name="q"></form>
          <form id="pide_placa" class="codigo" method="post">
            <input type="hidden" name="accion" value="consulta">
            <input type="text" name="accion" value="visible">
            <input type="text" name="placa">
            <input type="text" name="numserie" value="">
            <input type="text" name="codigo_usr">
            <input type="submit" name="enviar" value="Consultar">
            <select name="estado">
              <option value="01">Uno</option>
              <option value="02" selected>Dos</option>
            </select>
            <select name="tipo">
              <option value="P">Particular</option>
              <option value="C">Carga</option>
            </select>
          </form>
          <form id="captcha_gen"><input type="hidden" name="codigo_gen" value="tok-123"></form>
          <img src="/img/logo.png">
          <img src="../../captcha/ImageBuilder.php?r=9">
        </body></html>
    "#;

    #[test]
    fn test_extracts_fields_and_captcha() {
        let extraction = FormExtractor::extract(PORTAL_PAGE, &FieldRules::new()).unwrap();
        let form = &extraction.form;

        assert_eq!(extraction.matched_by, FormMatch::ById);
        assert_eq!(form.get("accion"), Some("consulta"));
        assert_eq!(form.get("placa"), Some(""));
        assert_eq!(form.get("estado"), Some("02"));
        assert_eq!(form.get("tipo"), Some("P"));
        assert!(!form.contains("enviar"));
        assert!(!form.contains("q"));
        assert_eq!(form.get("codigo_gen"), Some("tok-123"));

        let captcha = extraction.captcha.unwrap();
        assert_eq!(captcha.src, "../../captcha/ImageBuilder.php?r=9");
        assert_eq!(captcha.token.as_deref(), Some("tok-123"));
    }

    #[test]
    fn test_class_fallback() {
        let html = r#"<form class="panel codigo"><input name="placas"></form>"#;
        let extraction = FormExtractor::extract(html, &FieldRules::new()).unwrap();
        assert_eq!(extraction.matched_by, FormMatch::ByClass);
        assert!(extraction.form.contains("placas"));
        assert!(extraction.captcha.is_none());
    }

    #[test]
    fn test_input_name_fallback_selects_niv_form() {
        let html = r#"
            <form id="login"><input name="usuario"></form>
            <form id="otro"><input type="hidden" name="t" value="1"><input name="niv"></form>
        "#;
        let extraction = FormExtractor::extract(html, &FieldRules::new()).unwrap();
        assert_eq!(extraction.matched_by, FormMatch::ByInputName);
        assert!(extraction.form.contains("niv"));
        assert_eq!(extraction.form.get("t"), Some("1"));
        assert!(!extraction.form.contains("usuario"));
    }

    #[test]
    fn test_form_not_found() {
        let html = r#"<form id="login"><input name="usuario"></form>"#;
        assert_eq!(
            FormExtractor::extract(html, &FieldRules::new()),
            Err(ScraperError::FormNotFound)
        );
    }

    #[test]
    fn test_captcha_without_token_form() {
        let html = r#"<form id="pide_placa"><input name="placa"></form><img src="captcha.php">"#;
        let extraction = FormExtractor::extract(html, &FieldRules::new()).unwrap();
        let captcha = extraction.captcha.unwrap();
        assert_eq!(captcha.src, "captcha.php");
        assert!(captcha.token.is_none());
        assert!(!extraction.form.contains("codigo_gen"));
    }

    #[test]
    fn test_input_types_are_case_insensitive() {
        let html = r#"
            <form id="pide_placa">
              <input type="text" name="token" value="visible">
              <input type="HIDDEN" name="token" value="oculto">
              <input type="Submit" name="enviar" value="Consultar">
              <input name="placa">
            </form>
        "#;
        let extraction = FormExtractor::extract(html, &FieldRules::new()).unwrap();
        assert_eq!(extraction.form.get("token"), Some("oculto"));
        assert!(!extraction.form.contains("enviar"));
        assert_eq!(extraction.form.get("placa"), Some(""));
    }
}
