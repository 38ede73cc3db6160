//! Results of an interpretation round trip
//!
//! Every submission resolves to exactly one [`InterpretationResult`]; there
//! is no partial-success value.

use serde::Serialize;

use crate::network::error::NetworkError;
use crate::state::app_state::WorkflowPhase;

/// Payment intent extracted from a command recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentAnalysis {
    pub transcript: String,
    pub has_payment_command: bool,
    pub action: Option<String>,
    /// Integer minor units; only formatted for display
    pub amount_minor_units: Option<i64>,
    pub currency: Option<String>,
    pub recipient: Option<String>,
    pub confidence: Option<f64>,
    pub status_message: String,
    /// Phase the service asked for next
    pub next_phase: WorkflowPhase,
}

/// Voice authentication verdict for a PIN recording
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticationOutcome {
    pub authenticated: bool,
    pub user_id: Option<String>,
    /// Similarity in 0.0..=1.0
    pub similarity_score: Option<f64>,
    pub status_message: String,
}

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error or non-success status
    Transport,
    /// Response missing required fields for the phase
    ProtocolViolation,
}

/// Why a submission did not produce a result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    /// Display-ready detail, including the HTTP status when there was one
    pub reason: String,
    pub status: Option<u16>,
}

impl Failure {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transport,
            reason: reason.into(),
            status: None,
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ProtocolViolation,
            reason: reason.into(),
            status: None,
        }
    }
}

impl From<NetworkError> for Failure {
    fn from(err: NetworkError) -> Self {
        let status = err.status();
        let kind = match err {
            NetworkError::Protocol(_) | NetworkError::Serialization(_) => {
                FailureKind::ProtocolViolation
            }
            _ => FailureKind::Transport,
        };
        Self {
            kind,
            reason: err.to_string(),
            status,
        }
    }
}

/// Outcome of one submission
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterpretationResult {
    PaymentAnalysis(PaymentAnalysis),
    AuthenticationOutcome(AuthenticationOutcome),
    Failure(Failure),
}

impl InterpretationResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Message to show the user
    pub fn status_message(&self) -> &str {
        match self {
            Self::PaymentAnalysis(analysis) => &analysis.status_message,
            Self::AuthenticationOutcome(outcome) => &outcome.status_message,
            Self::Failure(failure) => &failure.reason,
        }
    }
}

impl From<Failure> for InterpretationResult {
    fn from(failure: Failure) -> Self {
        Self::Failure(failure)
    }
}
