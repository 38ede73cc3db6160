/// Communication with the voice interpretation service
///
/// This module provides the request/response contract, the result types the
/// workflow consumes, and the HTTP client that ties them together.

/// Interpretation client trait and HTTP implementation
pub mod client;

/// Network error types
pub mod error;

/// Interpretation results
pub mod interpretation;

/// Wire message definitions
pub mod messages;

// Re-export commonly used types
pub use client::{HttpInterpretationClient, InterpretationClient};
pub use error::{NetworkError, NetworkResult};
pub use interpretation::{
    AuthenticationOutcome, Failure, FailureKind, InterpretationResult, PaymentAnalysis,
};
pub use messages::{
    parse_response, AuthResponse, HealthResponse, InterpretationRequest, NextStep,
    PaymentAnalysisWire, PaymentResponse, VoiceAuthenticationWire,
};
