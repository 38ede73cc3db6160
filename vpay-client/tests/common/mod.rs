//! Shared test doubles for the microphone and the interpretation service
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use vpay_lib::audio::{
    AudioError, AudioResult, CaptureConstraints, CaptureEvent, EncodedPayload, InputSource,
    InputStreamHandle, StreamFormat,
};
use vpay_lib::network::{
    AuthenticationOutcome, Failure, InterpretationClient, InterpretationResult, PaymentAnalysis,
};
use vpay_lib::state::WorkflowPhase;

/// Replays a fixed script of sample buffers every time it is opened
pub struct ScriptedSource {
    format: StreamFormat,
    script: Vec<CaptureEvent>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: Vec<CaptureEvent>) -> Arc<Self> {
        Arc::new(Self {
            format: StreamFormat {
                sample_rate: 16000,
                channels: 1,
            },
            script,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// A third of a second of a steady tone
    pub fn speech() -> Arc<Self> {
        let tone: Vec<f32> = (0..5333)
            .map(|i| ((i as f32) * 0.05).sin() * 0.3)
            .collect();
        Self::new(vec![CaptureEvent::Samples(tone)])
    }

    /// Opens the device but never delivers a sample
    pub fn silent() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Devices currently held
    pub fn open_handles(&self) -> usize {
        self.opened() - self.closed()
    }
}

struct ScriptedHandle {
    format: StreamFormat,
    sink: Option<mpsc::Sender<CaptureEvent>>,
    closed: Arc<AtomicUsize>,
}

impl InputStreamHandle for ScriptedHandle {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn close(&mut self) {
        if self.sink.take().is_some() {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.sink.is_some()
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl InputSource for ScriptedSource {
    async fn open(
        &self,
        _constraints: &CaptureConstraints,
        sink: mpsc::Sender<CaptureEvent>,
    ) -> AudioResult<Box<dyn InputStreamHandle>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        for event in &self.script {
            sink.send(event.clone())
                .await
                .map_err(|e| AudioError::StreamError(e.to_string()))?;
        }
        Ok(Box::new(ScriptedHandle {
            format: self.format,
            sink: Some(sink),
            closed: Arc::clone(&self.closed),
        }))
    }
}

/// A microphone the user refused access to
#[derive(Default)]
pub struct DeniedSource {
    attempts: AtomicUsize,
}

impl DeniedSource {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputSource for DeniedSource {
    async fn open(
        &self,
        _constraints: &CaptureConstraints,
        _sink: mpsc::Sender<CaptureEvent>,
    ) -> AudioResult<Box<dyn InputStreamHandle>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AudioError::DeviceUnavailable(
            "permission denied".to_string(),
        ))
    }
}

struct Queued {
    gate: Option<oneshot::Receiver<()>>,
    result: InterpretationResult,
}

/// Returns queued results in order, optionally holding each one until released
#[derive(Default)]
pub struct QueuedClient {
    queue: Mutex<VecDeque<Queued>>,
    submissions: Mutex<Vec<(WorkflowPhase, usize)>>,
}

impl QueuedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: InterpretationResult) {
        self.queue.lock().unwrap().push_back(Queued { gate: None, result });
    }

    /// Queue a result that is only returned once the sender fires
    pub fn push_gated(&self, result: InterpretationResult) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.queue.lock().unwrap().push_back(Queued {
            gate: Some(rx),
            result,
        });
        tx
    }

    /// Phases of every submission, with the encoded payload size
    pub fn submissions(&self) -> Vec<(WorkflowPhase, usize)> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterpretationClient for QueuedClient {
    async fn submit(&self, payload: &EncodedPayload, phase: WorkflowPhase) -> InterpretationResult {
        self.submissions
            .lock()
            .unwrap()
            .push((phase, payload.data.len()));

        let next = self.queue.lock().unwrap().pop_front();
        let Some(Queued { gate, result }) = next else {
            return InterpretationResult::Failure(Failure::transport("no scripted result"));
        };

        if let Some(gate) = gate {
            let _ = gate.await;
        }
        result
    }
}

pub fn starbucks_payment() -> InterpretationResult {
    InterpretationResult::PaymentAnalysis(PaymentAnalysis {
        transcript: "Pay 20 dollars to Starbucks".to_string(),
        has_payment_command: true,
        action: Some("pay".to_string()),
        amount_minor_units: Some(2000),
        currency: Some("USD".to_string()),
        recipient: Some("Starbucks".to_string()),
        confidence: Some(0.9),
        status_message: "Payment command detected. Please say your PIN.".to_string(),
        next_phase: WorkflowPhase::AuthCapture,
    })
}

pub fn no_command() -> InterpretationResult {
    InterpretationResult::PaymentAnalysis(PaymentAnalysis {
        transcript: "What's the weather like".to_string(),
        has_payment_command: false,
        action: None,
        amount_minor_units: None,
        currency: None,
        recipient: None,
        confidence: None,
        status_message: "No payment command detected".to_string(),
        next_phase: WorkflowPhase::PaymentCapture,
    })
}

pub fn authenticated(score: f64) -> InterpretationResult {
    InterpretationResult::AuthenticationOutcome(AuthenticationOutcome {
        authenticated: true,
        user_id: Some("user-1".to_string()),
        similarity_score: Some(score),
        status_message: "Voice authenticated. Payment approved.".to_string(),
    })
}

pub fn http_failure(status: u16) -> InterpretationResult {
    InterpretationResult::Failure(Failure {
        status: Some(status),
        ..Failure::transport(format!("Service returned HTTP {}", status))
    })
}
