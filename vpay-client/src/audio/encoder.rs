use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::error::{AudioError, AudioResult};
use crate::audio::payload::{AudioFormat, RawPayload};

/// A recording in transport-safe form
///
/// `data` is the Base64 (standard alphabet, padded) encoding of the
/// recording's container bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    pub data: String,
    pub format: AudioFormat,
    pub sample_rate: u32,
}

impl std::fmt::Debug for EncodedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedPayload")
            .field("format", &self.format)
            .field("sample_rate", &self.sample_rate)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Converts finalized recordings to and from their wire form
///
/// # Example
/// ```
/// use vpay_lib::audio::{AudioFragment, PayloadEncoder, RawPayload};
///
/// let raw = RawPayload::from_fragments(
///     &[AudioFragment { sequence: 0, samples: vec![1, 2, 3] }],
///     16000,
/// ).unwrap();
///
/// let encoder = PayloadEncoder::new();
/// let encoded = encoder.encode(&raw).unwrap();
/// assert_eq!(encoder.decode(&encoded).unwrap(), raw);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadEncoder;

impl PayloadEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a recording for transport
    ///
    /// # Errors
    /// `AudioError::EncodingFailed` if the payload carries no bytes, which a
    /// capture session never produces.
    pub fn encode(&self, raw: &RawPayload) -> AudioResult<EncodedPayload> {
        if raw.bytes().is_empty() {
            return Err(AudioError::EncodingFailed(
                "recording has no content".to_string(),
            ));
        }

        let data = STANDARD.encode(raw.bytes());
        debug!(raw_bytes = raw.bytes().len(), encoded_len = data.len(), "Encoded recording");

        Ok(EncodedPayload {
            data,
            format: raw.format(),
            sample_rate: raw.sample_rate(),
        })
    }

    /// Recover the recording from its wire form
    pub fn decode(&self, encoded: &EncodedPayload) -> AudioResult<RawPayload> {
        let bytes = STANDARD
            .decode(&encoded.data)
            .map_err(|e| AudioError::EncodingFailed(format!("invalid Base64: {}", e)))?;

        match encoded.format {
            AudioFormat::Wav => RawPayload::from_wav_bytes(bytes),
        }
    }
}
