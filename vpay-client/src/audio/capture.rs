use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::conditioning::{f32_to_i16_pcm, SignalConditioner};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::payload::{AudioFragment, RawPayload};
use crate::audio::resampler::{downmix_to_mono, AudioResampler};
use crate::audio::source::{
    CaptureConstraints, CaptureEvent, InputSource, InputStreamHandle, StreamFormat,
    CAPTURE_CHANNEL_CAPACITY,
};

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureState {
    Idle,
    Recording,
    Finalizing,
}

/// Owns one recording at a time
///
/// `start()` acquires the device and spawns a collector task that turns
/// device buffers into fixed-interval 16 kHz mono fragments. `stop()`
/// releases the device, waits for the collector to drain, and returns the
/// fragments concatenated into one [`RawPayload`]. A device failure while
/// recording is published on [`failure_signal`](Self::failure_signal).
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use vpay_lib::audio::{AudioCaptureSession, CaptureConstraints, CpalInput};
///
/// #[tokio::main]
/// async fn main() {
///     let mut session = AudioCaptureSession::new(
///         Arc::new(CpalInput::new()),
///         CaptureConstraints::default(),
///     );
///
///     session.start().await.unwrap();
///     tokio::time::sleep(std::time::Duration::from_secs(2)).await;
///
///     if let Some(payload) = session.stop().await.unwrap() {
///         println!("Captured {:?}", payload.duration());
///     }
/// }
/// ```
pub struct AudioCaptureSession {
    source: Arc<dyn InputSource>,
    constraints: CaptureConstraints,
    state: CaptureState,
    active: Option<ActiveRecording>,
}

struct ActiveRecording {
    handle: Box<dyn InputStreamHandle>,
    collector: JoinHandle<AudioResult<Vec<AudioFragment>>>,
    failure: watch::Receiver<Option<String>>,
    started_at: Instant,
}

impl AudioCaptureSession {
    pub fn new(source: Arc<dyn InputSource>, constraints: CaptureConstraints) -> Self {
        Self {
            source,
            constraints,
            state: CaptureState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }

    /// Acquire the device and begin accumulating fragments
    ///
    /// # Errors
    /// - `AudioError::AlreadyRecording` if a recording is in progress; the
    ///   running recording is left untouched.
    /// - `AudioError::DeviceUnavailable` if there is no device or access was denied.
    pub async fn start(&mut self) -> AudioResult<()> {
        if self.state != CaptureState::Idle {
            warn!(state = ?self.state, "Rejected start: recording already in progress");
            return Err(AudioError::AlreadyRecording);
        }

        let (tx, rx) = mpsc::channel(CAPTURE_CHANNEL_CAPACITY);
        let handle = self.source.open(&self.constraints, tx).await?;
        let format = handle.format();

        let (failure_tx, failure) = watch::channel(None);
        let collector = tokio::spawn(collect_fragments(
            rx,
            format,
            self.constraints.clone(),
            failure_tx,
        ));

        self.active = Some(ActiveRecording {
            handle,
            collector,
            failure,
            started_at: Instant::now(),
        });
        self.state = CaptureState::Recording;

        info!(
            device_rate = format.sample_rate,
            device_channels = format.channels,
            "Recording started"
        );
        Ok(())
    }

    /// Release the device and finalize the recording
    ///
    /// Returns `Ok(None)` without side effects when no recording is active.
    ///
    /// # Errors
    /// - `AudioError::StreamError` if the device failed mid-recording.
    /// - `AudioError::EmptyRecording` if nothing was captured.
    ///
    /// The device is released on every path.
    pub async fn stop(&mut self) -> AudioResult<Option<RawPayload>> {
        let Some(ActiveRecording {
            mut handle,
            collector,
            started_at,
            ..
        }) = self.active.take()
        else {
            debug!("Stop requested while idle, ignoring");
            return Ok(None);
        };

        self.state = CaptureState::Finalizing;

        // Closing the stream drops the sender, which ends the collector
        handle.close();
        drop(handle);

        let collected = collector.await;
        self.state = CaptureState::Idle;

        let fragments = collected
            .map_err(|e| AudioError::StreamError(format!("collector task failed: {}", e)))??;

        let payload = RawPayload::from_fragments(&fragments, self.constraints.sample_rate)?;

        info!(
            fragments = fragments.len(),
            samples = payload.sample_count(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Recording finalized"
        );

        Ok(Some(payload))
    }

    /// Device failure of the current recording
    ///
    /// The value turns to `Some(message)` when the stream fails. The channel
    /// closes without a value once the recording ends normally.
    pub fn failure_signal(&self) -> Option<watch::Receiver<Option<String>>> {
        self.active.as_ref().map(|active| active.failure.clone())
    }

    /// Discard the in-flight recording and release the device
    pub fn abort(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.handle.close();
            active.collector.abort();
            info!("Recording aborted");
        }
        self.state = CaptureState::Idle;
    }
}

impl Drop for AudioCaptureSession {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Turn device buffers into conditioned fixed-length fragments
///
/// Runs until the sender side closes, then flushes the partial tail.
/// A stream error is published on `failure` before the task exits.
async fn collect_fragments(
    mut rx: mpsc::Receiver<CaptureEvent>,
    format: StreamFormat,
    constraints: CaptureConstraints,
    failure: watch::Sender<Option<String>>,
) -> AudioResult<Vec<AudioFragment>> {
    let mut resampler = AudioResampler::new(format.sample_rate, constraints.sample_rate)?;
    let mut conditioner = SignalConditioner::new(&constraints);
    let fragment_len = constraints.fragment_len();

    let mut pending: Vec<f32> = Vec::with_capacity(fragment_len * 2);
    let mut fragments = Vec::new();

    while let Some(event) = rx.recv().await {
        match event {
            CaptureEvent::Samples(samples) => {
                let mono = downmix_to_mono(&samples, format.channels);
                pending.extend(resampler.process(&mono)?);

                while pending.len() >= fragment_len {
                    let block: Vec<f32> = pending.drain(..fragment_len).collect();
                    push_fragment(&mut fragments, &mut conditioner, block);
                }
            }
            CaptureEvent::Error(message) => {
                warn!(error = %message, "Input stream failed");
                failure.send_replace(Some(message.clone()));
                return Err(AudioError::StreamError(message));
            }
        }
    }

    pending.extend(resampler.flush()?);
    if !pending.is_empty() {
        push_fragment(&mut fragments, &mut conditioner, pending);
    }

    debug!(fragments = fragments.len(), "Collector drained");
    Ok(fragments)
}

fn push_fragment(
    fragments: &mut Vec<AudioFragment>,
    conditioner: &mut SignalConditioner,
    mut block: Vec<f32>,
) {
    conditioner.apply(&mut block);
    fragments.push(AudioFragment {
        sequence: fragments.len() as u32,
        samples: f32_to_i16_pcm(&block),
    });
}
