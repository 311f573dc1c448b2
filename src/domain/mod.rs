//! Domain layer: pure models and the error taxonomy.

pub mod errors;
pub mod models;

pub use errors::{TriageError, TriageResult};
