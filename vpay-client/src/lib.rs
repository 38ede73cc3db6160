/// Audio capture, conditioning and payload encoding
pub mod audio;

/// Command-line surface and terminal driver
pub mod cli;

/// Interpretation service client
pub mod network;

/// Workflow state machine primitives and configuration
pub mod state;

/// Utility modules
pub mod utils;

/// Two-phase voice payment workflow
pub mod workflow;

pub use cli::{run, Cli};
