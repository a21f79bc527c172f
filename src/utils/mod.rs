pub mod error;
pub mod geo;
pub mod logger;
#[cfg(feature = "cli")]
pub mod monitor;
pub mod validation;
