//! Application layer: the orchestrator facade over the core services.

pub mod orchestrator;

pub use orchestrator::Orchestrator;
