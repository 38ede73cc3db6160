/// Logging utilities
pub mod logging;

/// Global error handling
pub mod error;

/// Display formatting for amounts and scores
pub mod format;

// Re-export commonly used types
pub use error::{AppError, AppResult, ErrorCode, ErrorContext};
pub use format::{format_amount, format_minor_units, format_percentage};
