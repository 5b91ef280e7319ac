// Public modules
pub mod describe;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod revision;
pub mod runner;
pub mod settings;
pub mod ssh;
pub mod tasks;

// Public modules for CLI access
pub mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
