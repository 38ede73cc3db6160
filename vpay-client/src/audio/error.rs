use thiserror::Error;

/// Audio-related errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// No input device exists, or access to it was denied
    #[error("Microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// The input device is already held by another recording
    #[error("Input device is already in use")]
    DeviceBusy,

    /// `start()` was called while a recording is in progress
    #[error("A recording is already in progress")]
    AlreadyRecording,

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildFailed(String),

    /// Audio stream error reported while recording
    #[error("Audio stream error: {0}")]
    StreamError(String),

    /// Resampling failed
    #[error("Resampling failed: {0}")]
    ResampleFailed(String),

    /// Device name is invalid
    #[error("Device name is invalid UTF-8")]
    InvalidDeviceName,

    /// Failed to get device configuration
    #[error("Failed to get device configuration: {0}")]
    ConfigError(String),

    /// The recording finished without a single captured sample
    #[error("No audio was captured")]
    EmptyRecording,

    /// Payload could not be wrapped or encoded for transport
    #[error("Failed to encode recording: {0}")]
    EncodingFailed(String),

    /// WAV container error
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// cpal error
    #[error("cpal error: {0}")]
    CpalError(#[from] cpal::DevicesError),

    /// Default config error
    #[error("Default config error: {0}")]
    DefaultConfigError(#[from] cpal::DefaultStreamConfigError),

    /// Supported config error
    #[error("Supported config error: {0}")]
    SupportedConfigError(#[from] cpal::SupportedStreamConfigsError),
}

impl AudioError {
    /// Whether the error means the capture feature itself is unavailable
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_))
    }
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
