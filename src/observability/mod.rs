// Structured logging and per-call timing
pub mod logging;

// Re-export commonly used items for convenience
pub use logging::{init_logging, CallTimer};
