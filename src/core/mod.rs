pub mod config;
pub mod error;
pub mod types;

pub use config::CourierConfig;
pub use error::{AutomationError, DomError, ErrorClass};
