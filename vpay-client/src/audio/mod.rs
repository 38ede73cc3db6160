/// Recording lifecycle and fragment collection
pub mod capture;

/// Per-fragment noise gate and gain control
pub mod conditioning;

/// cpal-backed microphone input
pub mod cpal_input;

/// Audio device enumeration and management
pub mod device;

/// Base64 wire encoding of finalized recordings
pub mod encoder;

/// Audio-related error types
pub mod error;

/// Fragments and finalized recordings
pub mod payload;

/// Audio resampling
pub mod resampler;

/// Input source abstraction
pub mod source;

// Re-export commonly used types
pub use capture::{AudioCaptureSession, CaptureState};
pub use cpal_input::CpalInput;
pub use device::{get_default_input_device, list_input_devices, AudioDevice};
pub use encoder::{EncodedPayload, PayloadEncoder};
pub use error::{AudioError, AudioResult};
pub use payload::{AudioFormat, AudioFragment, RawPayload};
pub use resampler::AudioResampler;
pub use source::{
    CaptureConstraints, CaptureEvent, CaptureSender, InputSource, InputStreamHandle, StreamFormat,
};
