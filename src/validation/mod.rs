pub mod plate;
pub mod vin;

pub use plate::PlateValidator;
pub use vin::VinValidator;
