pub mod deadline;
pub mod error;

pub use deadline::Deadline;
pub use error::ScraperError;
