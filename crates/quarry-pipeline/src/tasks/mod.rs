//! Built-in task types.

pub mod validation;

pub use validation::{ValidationReport, ValidationTask, ValidationTaskConfig};
