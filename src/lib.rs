pub mod config;
pub mod models;
pub mod network;
pub mod processing;
pub mod retry;
pub mod tax_scraper;
pub mod utils;
pub mod validation;

pub use config::ScraperConfig;
pub use models::VehicleResult;
pub use tax_scraper::TaxScraper;
pub use utils::ScraperError;
