pub mod types;
pub mod classification;

pub use types::ConductorError;
pub use classification::ErrorClassification;
