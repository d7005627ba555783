pub mod artifacts;
pub mod engine;
pub mod matching;
pub mod navigator;
pub mod orchestrator;
