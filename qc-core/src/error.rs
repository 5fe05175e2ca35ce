//! Error types, shared with the rest of the workspace

pub use qc_error::{ControlError, Result};
