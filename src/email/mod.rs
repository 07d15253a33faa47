pub mod common;
pub mod options;

// Re-export commonly used items
pub use common::{Email, EmailMetadata, EmailStatus, ProcessingResult};
pub use options::{Action, ProcessOption, ProcessSettings};
