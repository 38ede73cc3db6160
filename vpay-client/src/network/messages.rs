/// Wire types for the voice interpretation service
///
/// Requests and responses are JSON with camelCase keys. Parsed responses are
/// validated against the phase they answer and converted into
/// [`InterpretationResult`] values; anything missing a required field is a
/// protocol violation.

use serde::{Deserialize, Serialize};

use crate::audio::encoder::EncodedPayload;
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::interpretation::{AuthenticationOutcome, InterpretationResult, PaymentAnalysis};
use crate::state::app_state::WorkflowPhase;

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// Submission of one recording
///
/// # Example
/// ```
/// use vpay_lib::audio::{AudioFormat, EncodedPayload};
/// use vpay_lib::network::messages::InterpretationRequest;
/// use vpay_lib::state::WorkflowPhase;
///
/// let payload = EncodedPayload {
///     data: "UklGRg==".to_string(),
///     format: AudioFormat::Wav,
///     sample_rate: 16000,
/// };
/// let request = InterpretationRequest::new(&payload, WorkflowPhase::PaymentCapture);
///
/// let json = serde_json::to_value(&request).unwrap();
/// assert_eq!(json["phase"], "payment");
/// assert_eq!(json["audioFormat"], "wav");
/// ```
#[derive(Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterpretationRequest {
    /// Base64 recording
    pub audio_data: String,
    pub audio_format: String,
    pub sample_rate: u32,
    pub phase: WorkflowPhase,
}

impl InterpretationRequest {
    pub fn new(payload: &EncodedPayload, phase: WorkflowPhase) -> Self {
        Self {
            audio_data: payload.data.clone(),
            audio_format: payload.format.as_str().to_string(),
            sample_rate: payload.sample_rate,
            phase,
        }
    }
}

impl std::fmt::Debug for InterpretationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpretationRequest")
            .field("audio_data_len", &self.audio_data.len())
            .field("audio_format", &self.audio_format)
            .field("sample_rate", &self.sample_rate)
            .field("phase", &self.phase)
            .finish()
    }
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// What the service wants the client to do after the payment phase
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NextStep {
    /// Capture the spoken PIN for voice authentication
    Auth,
    /// Transaction finished without authentication
    Complete,
}

/// Response to a payment-phase submission
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    #[serde(default)]
    pub transcript: Option<String>,

    #[serde(default)]
    pub payment_analysis: Option<PaymentAnalysisWire>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub next_step: Option<NextStep>,
}

/// Payment-intent analysis as sent by the service
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAnalysisWire {
    pub has_payment_command: bool,

    #[serde(default)]
    pub action: Option<String>,

    /// Integer minor units (cents)
    #[serde(default)]
    pub amount_minor_units: Option<i64>,

    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default)]
    pub recipient: Option<String>,

    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Response to an auth-phase submission
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(default)]
    pub voice_authentication: Option<VoiceAuthenticationWire>,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VoiceAuthenticationWire {
    pub authenticated: bool,

    #[serde(default)]
    pub user_id: Option<String>,

    /// Similarity in 0.0..=1.0
    #[serde(default)]
    pub similarity_score: Option<f64>,
}

/// Body of the health endpoint
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

// ============================================================================
// Validation
// ============================================================================

impl PaymentResponse {
    /// Validate the response and convert it into a payment analysis
    ///
    /// # Errors
    /// `NetworkError::Protocol` when `message` or `nextStep` is missing, or
    /// when `nextStep` is `auth` without a payment command.
    pub fn into_result(self) -> NetworkResult<InterpretationResult> {
        let message = self
            .message
            .ok_or_else(|| NetworkError::Protocol("payment response has no message".into()))?;
        let next_step = self
            .next_step
            .ok_or_else(|| NetworkError::Protocol("payment response has no nextStep".into()))?;

        let analysis = self.payment_analysis.unwrap_or_default();

        if next_step == NextStep::Auth && !analysis.has_payment_command {
            return Err(NetworkError::Protocol(
                "nextStep is auth but no payment command was recognized".into(),
            ));
        }

        let next_phase = match next_step {
            NextStep::Auth => WorkflowPhase::AuthCapture,
            NextStep::Complete => WorkflowPhase::PaymentCapture,
        };

        Ok(InterpretationResult::PaymentAnalysis(PaymentAnalysis {
            transcript: self.transcript.unwrap_or_default(),
            has_payment_command: analysis.has_payment_command,
            action: analysis.action,
            amount_minor_units: analysis.amount_minor_units,
            currency: analysis.currency,
            recipient: analysis.recipient,
            confidence: analysis.confidence,
            status_message: message,
            next_phase,
        }))
    }
}

impl AuthResponse {
    /// Validate the response and convert it into an authentication outcome
    ///
    /// # Errors
    /// `NetworkError::Protocol` when `message` or `voiceAuthentication` is missing.
    pub fn into_result(self) -> NetworkResult<InterpretationResult> {
        let message = self
            .message
            .ok_or_else(|| NetworkError::Protocol("auth response has no message".into()))?;
        let verdict = self.voice_authentication.ok_or_else(|| {
            NetworkError::Protocol("auth response has no voiceAuthentication".into())
        })?;

        Ok(InterpretationResult::AuthenticationOutcome(AuthenticationOutcome {
            authenticated: verdict.authenticated,
            user_id: verdict.user_id,
            similarity_score: verdict.similarity_score,
            status_message: message,
        }))
    }
}

/// Parse a response body for the given phase
pub fn parse_response(body: &str, phase: WorkflowPhase) -> NetworkResult<InterpretationResult> {
    match phase {
        WorkflowPhase::PaymentCapture => serde_json::from_str::<PaymentResponse>(body)
            .map_err(|e| NetworkError::Protocol(e.to_string()))?
            .into_result(),
        WorkflowPhase::AuthCapture => serde_json::from_str::<AuthResponse>(body)
            .map_err(|e| NetworkError::Protocol(e.to_string()))?
            .into_result(),
    }
}
