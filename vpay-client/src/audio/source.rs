//! Input source abstraction
//!
//! The capture session talks to the microphone only through [`InputSource`].
//! The production implementation is [`crate::audio::cpal_input::CpalInput`];
//! tests substitute scripted sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::audio::error::AudioResult;

/// Capacity of the channel between the device callback and the collector
pub const CAPTURE_CHANNEL_CAPACITY: usize = 512;

/// Capture parameters requested from the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConstraints {
    /// Preferred input device (None for the host default)
    pub device_id: Option<String>,
    /// Target sample rate of the finalized recording
    pub sample_rate: u32,
    /// Target channel count of the finalized recording
    pub channel_count: u16,
    /// Duration of one accumulated fragment
    pub fragment_interval_ms: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// RMS level below which a fragment is treated as silence
    pub silence_threshold: f32,
    /// Upper bound for automatic gain
    pub max_gain: f32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: 16000,
            channel_count: 1,
            fragment_interval_ms: 100,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            silence_threshold: 0.01,
            max_gain: 4.0,
        }
    }
}

impl CaptureConstraints {
    /// Number of output samples in one fragment
    pub fn fragment_len(&self) -> usize {
        let samples = u64::from(self.sample_rate) * u64::from(self.fragment_interval_ms) / 1000;
        samples.max(1) as usize
    }
}

/// Format of the buffers a source delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Device sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

/// Events delivered from the device callback to the collector
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Interleaved f32 samples in device format
    Samples(Vec<f32>),
    /// The stream failed; no further samples follow
    Error(String),
}

/// Sender half handed to a source when it is opened
pub type CaptureSender = mpsc::Sender<CaptureEvent>;

/// A source of microphone audio
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Acquire the device and start delivering [`CaptureEvent`]s to `sink`
    ///
    /// This is where the platform may prompt for permission, so it is async.
    /// The returned handle owns the device; dropping it releases the device
    /// and closes `sink`.
    async fn open(
        &self,
        constraints: &CaptureConstraints,
        sink: CaptureSender,
    ) -> AudioResult<Box<dyn InputStreamHandle>>;
}

/// Exclusive handle on an open input stream
pub trait InputStreamHandle: Send {
    /// Format of the delivered samples
    fn format(&self) -> StreamFormat;

    /// Stop the stream and release the device. Idempotent.
    fn close(&mut self);

    /// Whether the device is still held
    fn is_open(&self) -> bool;
}
