pub mod core;
pub mod features;
pub mod scraping;
pub mod tools;

// --- Primary core exports ---
pub use core::types;
pub use core::types::*;
pub use core::{AutomationError, CourierConfig, DomError, ErrorClass};

// --- Short module paths ---
pub use features::{checkpoint_store, control, events, humanize};
pub use scraping::{browser_manager, dom, locator};
pub use tools::{engine, navigator, orchestrator};
