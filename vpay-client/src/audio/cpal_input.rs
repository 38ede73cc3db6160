use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BuildStreamError, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::audio::device::{resolve_device, select_stream_config};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::source::{
    CaptureConstraints, CaptureEvent, CaptureSender, InputSource, InputStreamHandle, StreamFormat,
};

/// Microphone input backed by the host's default cpal backend
///
/// `cpal::Stream` is not `Send`, so every opened stream lives on its own
/// thread and is torn down by a stop signal from the returned handle.
/// The device is leased exclusively: a second `open` while a handle is
/// alive fails with `AudioError::DeviceBusy`.
#[derive(Debug, Default)]
pub struct CpalInput {
    in_use: Arc<AtomicBool>,
}

impl CpalInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a stream currently holds the device
    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }
}

#[async_trait]
impl InputSource for CpalInput {
    async fn open(
        &self,
        constraints: &CaptureConstraints,
        sink: CaptureSender,
    ) -> AudioResult<Box<dyn InputStreamHandle>> {
        if self.in_use.swap(true, Ordering::AcqRel) {
            return Err(AudioError::DeviceBusy);
        }
        let lease = DeviceLease(Arc::clone(&self.in_use));

        if constraints.echo_cancellation {
            // cpal exposes raw device audio only
            debug!("Echo cancellation requested but not provided by this host backend");
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let error_stop = stop_tx.clone();
        let constraints = constraints.clone();

        let thread = std::thread::Builder::new()
            .name("vpay-capture".to_string())
            .spawn(move || run_stream(&constraints, sink, ready_tx, error_stop, &stop_rx))
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;

        let format = ready_rx
            .await
            .map_err(|_| AudioError::StreamBuildFailed("capture thread exited".to_string()))??;

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Microphone opened"
        );

        Ok(Box::new(CpalStreamHandle {
            format,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            _lease: lease,
        }))
    }
}

/// Releases the device lease when dropped
#[derive(Debug)]
struct DeviceLease(Arc<AtomicBool>);

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct CpalStreamHandle {
    format: StreamFormat,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    _lease: DeviceLease,
}

impl InputStreamHandle for CpalStreamHandle {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    warn!("Capture thread panicked during shutdown");
                }
            }
            debug!("Microphone released");
        }
    }

    fn is_open(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for CpalStreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Body of the capture thread: build, play, park until told to stop
fn run_stream(
    constraints: &CaptureConstraints,
    sink: CaptureSender,
    ready_tx: oneshot::Sender<AudioResult<StreamFormat>>,
    error_stop: std_mpsc::Sender<()>,
    stop_rx: &std_mpsc::Receiver<()>,
) {
    let (stream, format) = match build_stream(constraints, sink, error_stop) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(AudioError::DeviceUnavailable(e.to_string())));
        return;
    }

    if ready_tx.send(Ok(format)).is_err() {
        // Opener went away before the stream was ready
        return;
    }

    // Returns on explicit stop or on a stream error
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_stream(
    constraints: &CaptureConstraints,
    sink: CaptureSender,
    error_stop: std_mpsc::Sender<()>,
) -> AudioResult<(Stream, StreamFormat)> {
    let host = cpal::default_host();
    let device = resolve_device(&host, constraints.device_id.as_deref())?;

    let supported = select_stream_config(&device, constraints)?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();
    let format = StreamFormat {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };

    let stream = match sample_format {
        SampleFormat::F32 => build_typed::<f32>(&device, &config, sink, error_stop),
        SampleFormat::I16 => build_typed::<i16>(&device, &config, sink, error_stop),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, sink, error_stop),
        SampleFormat::I32 => build_typed::<i32>(&device, &config, sink, error_stop),
        other => Err(AudioError::ConfigError(format!(
            "unsupported sample format {other:?}"
        ))),
    }?;

    Ok((stream, format))
}

fn build_typed<T>(
    device: &Device,
    config: &StreamConfig,
    sink: CaptureSender,
    error_stop: std_mpsc::Sender<()>,
) -> AudioResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let error_sink = sink.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let samples: Vec<f32> = data.iter().map(|&s| s.to_sample::<f32>()).collect();
                // Never block the audio thread; a full channel drops this batch
                let _ = sink.try_send(CaptureEvent::Samples(samples));
            },
            move |err| {
                error!("Audio stream error: {}", err);
                let _ = error_sink.try_send(CaptureEvent::Error(err.to_string()));
                let _ = error_stop.send(());
            },
            None,
        )
        .map_err(|e| match e {
            BuildStreamError::DeviceNotAvailable | BuildStreamError::BackendSpecific { .. } => {
                AudioError::DeviceUnavailable(e.to_string())
            }
            other => AudioError::StreamBuildFailed(other.to_string()),
        })
}
