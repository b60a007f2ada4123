// Field extraction from the portal's result page
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::{FieldRules, TaxRecord, VehicleInfo, VehicleResult};
use crate::utils::ScraperError;

lazy_static! {
    static ref TABLE: Selector = Selector::parse("table").unwrap();
    static ref ROW: Selector = Selector::parse("tr").unwrap();
    static ref CELL: Selector = Selector::parse("th, td").unwrap();

    // VIN labels used by the portal, most specific first
    static ref VIN_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)VIN[:\s]*([A-Z0-9]{17})").unwrap(),
        Regex::new(r"(?i)NIV[:\s]*([A-Z0-9]{17})").unwrap(),
        Regex::new(r"(?i)SERIE[:\s]*([A-Z0-9]{17})").unwrap(),
    ];

    static ref YEAR: Regex = Regex::new(r"\b(?:19|20)\d{2}\b").unwrap();
    static ref AMOUNT: Regex = Regex::new(r"\d+(?:\.\d*)?").unwrap();
}

// Text under these elements is never rendered
const HIDDEN_TEXT_TAGS: [&str; 5] = ["head", "script", "style", "noscript", "template"];

const TAX_TABLE_KEYWORDS: [&str; 6] = ["período", "periodo", "tenencia", "refrendo", "total", "ejercicio"];

/// Amount columns of a tax table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AmountColumn {
    Tenencia,
    Refrendo,
    Total,
}

impl AmountColumn {
    fn from_header(header: &str) -> Option<Self> {
        if header.contains("tenencia") {
            Some(AmountColumn::Tenencia)
        } else if header.contains("refrendo") {
            Some(AmountColumn::Refrendo)
        } else if header.contains("total") {
            Some(AmountColumn::Total)
        } else {
            None
        }
    }

    /// 1st amount column is tenencia, 2nd refrendo, 3rd total.
    fn from_position(index: usize) -> Option<Self> {
        match index {
            1 => Some(AmountColumn::Tenencia),
            2 => Some(AmountColumn::Refrendo),
            3 => Some(AmountColumn::Total),
            _ => None,
        }
    }
}

/// ResultParser turns the post-submission page into a `VehicleResult`.
pub struct ResultParser;

impl ResultParser {
    pub fn parse(html: &str, rules: &FieldRules) -> VehicleResult {
        match Self::try_parse(html, rules) {
            Ok((vehicle, taxes)) => {
                info!("Parsed vehicle result with {} tax records", taxes.len());
                VehicleResult::Found { vehicle, taxes }
            }
            Err(e) => {
                info!("Result page classified as failure: {}", e);
                VehicleResult::failure(e.to_string())
            }
        }
    }

    /// `NoRecordFound` when the page carries a known error phrase.
    pub fn try_parse(html: &str, rules: &FieldRules) -> Result<(VehicleInfo, Vec<TaxRecord>), ScraperError> {
        let document = Html::parse_document(html);
        let page_text = Self::visible_text(document.root_element());

        let lowered = page_text.to_lowercase();
        if let Some(phrase) = rules
            .not_found_phrases
            .iter()
            .find(|phrase| lowered.contains(phrase.as_str()))
        {
            debug!("Result page matched error phrase '{}'", phrase);
            return Err(ScraperError::NoRecordFound);
        }

        let vehicle = Self::extract_vehicle(&document, &page_text);
        let taxes = Self::extract_taxes(&document);
        Ok((vehicle, taxes))
    }

    /// Best-effort vehicle metadata.
    pub fn extract_vehicle(document: &Html, page_text: &str) -> VehicleInfo {
        let mut vehicle = VehicleInfo::default();

        if let Some(vin) = VIN_PATTERNS
            .iter()
            .find_map(|pattern| pattern.captures(page_text))
            .and_then(|captures| captures.get(1))
        {
            vehicle.vin = vin.as_str().trim().to_string();
        }

        if let Some(year) = YEAR.find(page_text) {
            vehicle.year = year.as_str().to_string();
            vehicle.model = year.as_str().to_string();
        }

        // Label/value rows anywhere on the page
        for row in document.select(&ROW) {
            let cells: Vec<ElementRef<'_>> = row.select(&CELL).collect();
            if cells.len() < 2 {
                continue;
            }
            let header = Self::element_text(cells[0]).trim().to_lowercase();
            let value = Self::element_text(cells[1]).trim().to_string();

            if header.contains("descripción") || header.contains("vehiculo") || header.contains("tipo") {
                vehicle.description = value;
            } else if header.contains("marca") {
                vehicle.make = value;
            } else if header.contains("color") {
                vehicle.color = value;
            } else if header.contains("modelo") && vehicle.model.is_empty() {
                vehicle.model = value;
            }
        }

        vehicle
    }

    /// Tax records from every table whose header looks like a tax table,
    /// most recent period first.
    pub fn extract_taxes(document: &Html) -> Vec<TaxRecord> {
        let mut records = Vec::new();

        for table in document.select(&TABLE) {
            let rows = Self::own_rows(table);
            let Some((header_row, data_rows)) = rows.split_first() else {
                continue;
            };
            let headers: Vec<String> = Self::row_cells(*header_row)
                .into_iter()
                .map(|cell| Self::element_text(cell).trim().to_lowercase())
                .collect();

            let joined = headers.join(" ");
            if !TAX_TABLE_KEYWORDS.iter().any(|keyword| joined.contains(keyword)) {
                continue;
            }

            for row in data_rows {
                let cells = Self::row_cells(*row);
                match Self::parse_tax_row(&cells, &headers) {
                    Some(record) => records.push(record),
                    None => debug!("Skipping tax row with {} cells", cells.len()),
                }
            }
        }

        records.sort_by(|a, b| b.period.cmp(&a.period));
        records
    }

    fn parse_tax_row(cells: &[ElementRef<'_>], headers: &[String]) -> Option<TaxRecord> {
        if cells.len() < 3 {
            return None;
        }

        let period_text = Self::element_text(cells[0]);
        let period = match YEAR.find(period_text.trim()) {
            Some(year) => year.as_str().parse::<i32>().ok()?,
            None => return None,
        };

        let mut tenencia = 0.0;
        let mut refrendo = 0.0;
        let mut total = 0.0;

        for (index, cell) in cells.iter().enumerate().skip(1) {
            let Some(amount) = parse_amount(&Self::element_text(*cell)) else {
                continue;
            };

            // A present header decides the column; only missing headers fall back to position
            let column = match headers.get(index) {
                Some(header) => AmountColumn::from_header(header),
                None => AmountColumn::from_position(index),
            };
            match column {
                Some(AmountColumn::Tenencia) => tenencia = amount,
                Some(AmountColumn::Refrendo) => refrendo = amount,
                Some(AmountColumn::Total) => total = amount,
                None => {}
            }
        }

        Some(TaxRecord::new(period, tenencia, refrendo, total))
    }

    /// Rows belonging to `table` itself, not to a table nested inside it.
    fn own_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
        table
            .select(&ROW)
            .filter(|row| {
                row.ancestors()
                    .filter_map(ElementRef::wrap)
                    .find(|ancestor| ancestor.value().name() == "table")
                    .map_or(false, |owner| owner.id() == table.id())
            })
            .collect()
    }

    /// Direct `th`/`td` children of a row.
    fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
        row.children()
            .filter_map(ElementRef::wrap)
            .filter(|cell| matches!(cell.value().name(), "th" | "td"))
            .collect()
    }

    /// Text a browser would render: skips head, scripts and styles.
    fn visible_text(element: ElementRef<'_>) -> String {
        let mut text = String::new();
        for node in element.descendants() {
            let Some(chunk) = node.value().as_text() else {
                continue;
            };
            let hidden = node
                .ancestors()
                .filter_map(ElementRef::wrap)
                .any(|ancestor| HIDDEN_TEXT_TAGS.contains(&ancestor.value().name()));
            if !hidden {
                text.push_str(chunk);
            }
        }
        text
    }

    fn element_text(element: ElementRef<'_>) -> String {
        element.text().collect::<String>()
    }
}

/// Parse a printed amount such as `$1,200.00`.
pub fn parse_amount(text: &str) -> Option<f64> {
    let stripped = text.replace(',', "");
    let matched = AMOUNT.find(&stripped)?;
    match matched.as_str().parse::<f64>() {
        Ok(amount) => Some(amount),
        Err(e) => {
            warn!("Error parsing amount '{}': {}", text.trim(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::NOT_FOUND_MESSAGE;

    fn parse(html: &str) -> VehicleResult {
        ResultParser::parse(html, &FieldRules::new())
    }

    #[test]
    fn test_not_found_phrase_short_circuits() {
        let html = r#"
            <div class="alerta">No se encontró registro del vehículo</div>
            <table>
              <tr><th>Período</th><th>Tenencia</th><th>Refrendo</th></tr>
              <tr><td>2022</td><td>$1,200.00</td><td>$300.00</td></tr>
            </table>
        "#;
        assert_eq!(parse(html), VehicleResult::failure(NOT_FOUND_MESSAGE));
    }

    #[test]
    fn test_computed_total() {
        let html = r#"
            <table>
              <tr><th>Período</th><th>Tenencia</th><th>Refrendo</th></tr>
              <tr><td>2022</td><td>$1,200.00</td><td>$300.00</td></tr>
            </table>
        "#;
        match parse(html) {
            VehicleResult::Found { taxes, .. } => {
                assert_eq!(taxes, vec![TaxRecord {
                    period: 2022,
                    tenencia: 1200.0,
                    refrendo: 300.0,
                    total: 1500.0,
                }]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_tables_merged_and_sorted() {
        let html = r#"
            <table>
              <thead><tr><th>Ejercicio</th><th>Tenencia</th><th>Refrendo</th><th>Total</th></tr></thead>
              <tr><td>2019</td><td>100.00</td><td>50.00</td><td>160.00</td></tr>
              <tr><td>Subtotal</td><td>100.00</td><td>50.00</td><td>160.00</td></tr>
              <tr><td>2021</td><td>0.00</td><td>0.00</td><td>0.00</td></tr>
            </table>
            <table><tr><td>Aviso</td><td>Pague antes del vencimiento</td></tr></table>
            <table>
              <tr><th>Periodo</th><th>Importe</th></tr>
              <tr><td>2023</td><td>10.00</td><td>20.00</td><td>35.00</td></tr>
              <tr><td>2020</td></tr>
            </table>
        "#;
        let taxes = ResultParser::extract_taxes(&Html::parse_document(html));
        let periods: Vec<i32> = taxes.iter().map(|t| t.period).collect();
        assert_eq!(periods, vec![2023, 2021, 2019]);

        // printed total is kept as-is
        assert_eq!(taxes[2].total, 160.0);
        // zero rows are kept
        assert_eq!(taxes[1].total, 0.0);
        // header "importe" is not a known column, remaining columns go by position
        assert_eq!(taxes[0].tenencia, 0.0);
        assert_eq!(taxes[0].refrendo, 20.0);
        assert_eq!(taxes[0].total, 35.0);
    }

    #[test]
    fn test_vehicle_details() {
        let html = r#"
            <table>
              <tr><td>NIV:</td><td>3G1TA5AF1DL163526</td></tr>
              <tr><td>Marca</td><td>CHEVROLET</td></tr>
              <tr><td>Descripción</td><td>SONIC LT</td></tr>
              <tr><td>Color</td><td>ROJO</td></tr>
              <tr><td>Modelo</td><td> 2013 </td></tr>
            </table>
        "#;
        match parse(html) {
            VehicleResult::Found { vehicle, taxes } => {
                assert_eq!(vehicle.vin, "3G1TA5AF1DL163526");
                assert_eq!(vehicle.make, "CHEVROLET");
                assert_eq!(vehicle.description, "SONIC LT");
                assert_eq!(vehicle.color, "ROJO");
                assert_eq!(vehicle.year, "2013");
                assert_eq!(vehicle.model, "2013");
                assert!(taxes.is_empty());
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$1,200.00"), Some(1200.0));
        assert_eq!(parse_amount(" 300 "), Some(300.0));
        assert_eq!(parse_amount("—"), None);
    }

    #[test]
    fn test_script_text_is_not_scanned() {
        let html = r#"
            <html>
              <head><title>Error de consulta</title><style>.error { color: red; }</style></head>
              <body>
                <script>function avisa() { console.error('sin red'); }</script>
                <table>
                  <tr><th>Período</th><th>Tenencia</th><th>Refrendo</th></tr>
                  <tr><td>2022</td><td>$1,200.00</td><td>$300.00</td></tr>
                </table>
                <noscript>Datos incorrectos</noscript>
              </body>
            </html>
        "#;
        match parse(html) {
            VehicleResult::Found { taxes, .. } => assert_eq!(taxes.len(), 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_nested_table_rows_counted_once() {
        let html = r#"
            <table class="layout">
              <tr><td>
                <table>
                  <tr><th>Período</th><th>Tenencia</th><th>Refrendo</th></tr>
                  <tr><td>2022</td><td>$1,200.00</td><td>$300.00</td></tr>
                </table>
              </td></tr>
              <tr><td>Pie de página</td></tr>
            </table>
        "#;
        let taxes = ResultParser::extract_taxes(&Html::parse_document(html));
        assert_eq!(taxes, vec![TaxRecord::new(2022, 1200.0, 300.0, 0.0)]);
    }
}
