//! 支付工作流集成测试
//!
//! 用脚本化的麦克风和解析服务驱动完整的两阶段流程

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use common::{
    authenticated, http_failure, no_command, starbucks_payment, DeniedSource, QueuedClient,
    ScriptedSource,
};
use vpay_lib::audio::{AudioError, CaptureConstraints, CaptureEvent, InputSource};
use vpay_lib::network::{FailureKind, InterpretationResult};
use vpay_lib::state::{CaptureStep, WorkflowPhase, WorkflowState};
use vpay_lib::workflow::{PaymentWorkflow, WorkflowError, WorkflowOptions};

const RESET_DELAY: Duration = Duration::from_millis(150);

fn workflow(source: Arc<dyn InputSource>, client: Arc<QueuedClient>) -> Arc<PaymentWorkflow> {
    Arc::new(PaymentWorkflow::new(
        source,
        CaptureConstraints::default(),
        client,
        WorkflowOptions {
            auto_reset_delay: RESET_DELAY,
            recordings_dir: None,
        },
    ))
}

/// 录一段并提交
async fn record_and_submit(workflow: &PaymentWorkflow) -> WorkflowState {
    let recording = workflow.toggle_recording().await.unwrap();
    assert!(recording.is_recording());
    workflow.toggle_recording().await.unwrap()
}

async fn wait_for(workflow: &PaymentWorkflow, state: WorkflowState) {
    for _ in 0..100 {
        if workflow.state() == state {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("workflow never reached {}, stuck in {}", state, workflow.state());
}

// ==================== 支付阶段 ====================

#[tokio::test]
async fn test_payment_command_moves_to_awaiting_pin() {
    let source = ScriptedSource::speech();
    let client = QueuedClient::new();
    client.push(starbucks_payment());
    let workflow = workflow(source.clone(), client.clone());

    let state = record_and_submit(&workflow).await;

    assert_eq!(state, WorkflowState::AwaitingPin);
    assert_eq!(workflow.state(), WorkflowState::AwaitingPin);

    let snapshot = workflow.snapshot();
    assert_eq!(snapshot.phase, WorkflowPhase::AuthCapture);
    assert_eq!(snapshot.amount_display().as_deref(), Some("$20.00"));
    assert_eq!(snapshot.recipient(), Some("Starbucks"));
    assert_eq!(
        snapshot.transcript.as_deref(),
        Some("Pay 20 dollars to Starbucks")
    );
    assert!(snapshot.shows_auth_prompt());
    assert!(snapshot.status_message.is_some());

    let submissions = client.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, WorkflowPhase::PaymentCapture);
    assert!(submissions[0].1 > 0);

    assert_eq!(source.open_handles(), 0, "microphone must be released");
}

#[tokio::test]
async fn test_no_payment_command_returns_to_awaiting_command() {
    let client = QueuedClient::new();
    client.push(no_command());
    let workflow = workflow(ScriptedSource::speech(), client);

    let state = record_and_submit(&workflow).await;

    assert_eq!(state, WorkflowState::AwaitingCommand);
    let snapshot = workflow.snapshot();
    assert!(!snapshot.shows_auth_prompt());
    assert!(snapshot.authentication.is_none());
    assert!(snapshot.amount_display().is_none());
    assert_eq!(
        snapshot.status_message.as_deref(),
        Some("No payment command detected")
    );
}

#[tokio::test]
async fn test_transport_failure_returns_to_awaiting_command() {
    let client = QueuedClient::new();
    client.push(http_failure(500));
    let workflow = workflow(ScriptedSource::speech(), client);

    let state = record_and_submit(&workflow).await;

    assert_eq!(state, WorkflowState::AwaitingCommand);
    let snapshot = workflow.snapshot();
    assert!(snapshot.analysis.is_none());
    assert!(snapshot.transcript.is_none());

    let failure = snapshot.failure.expect("failure should be surfaced");
    assert_eq!(failure.kind, FailureKind::Transport);
    assert_eq!(failure.status, Some(500));

    let status = snapshot.status_message.unwrap();
    assert!(status.contains("failed"), "status was: {}", status);
    assert!(status.contains("500"), "status was: {}", status);
}

// ==================== 认证阶段 ====================

#[tokio::test]
async fn test_pin_authentication_resolves_then_auto_resets() {
    let source = ScriptedSource::speech();
    let client = QueuedClient::new();
    client.push(starbucks_payment());
    client.push(authenticated(0.93));
    let workflow = workflow(source.clone(), client.clone());

    assert_eq!(record_and_submit(&workflow).await, WorkflowState::AwaitingPin);

    let recording = workflow.toggle_recording().await.unwrap();
    assert_eq!(recording, WorkflowState::Recording(vpay_lib::state::CaptureStep::Pin));
    let state = workflow.toggle_recording().await.unwrap();

    assert_eq!(state, WorkflowState::AuthResolved);
    let snapshot = workflow.snapshot();
    assert_eq!(snapshot.similarity_display().as_deref(), Some("93.0%"));
    assert!(snapshot.auto_reset_pending);
    // 金额在认证结果旁边仍然可见
    assert_eq!(snapshot.amount_display().as_deref(), Some("$20.00"));

    let phases: Vec<_> = client.submissions().into_iter().map(|(p, _)| p).collect();
    assert_eq!(
        phases,
        vec![WorkflowPhase::PaymentCapture, WorkflowPhase::AuthCapture]
    );

    sleep(RESET_DELAY * 2).await;

    assert_eq!(workflow.state(), WorkflowState::AwaitingCommand);
    let snapshot = workflow.snapshot();
    assert!(!snapshot.has_transaction_data());
    assert!(snapshot.status_message.is_none());
    assert!(workflow.last_recording().is_none());
    assert_eq!(source.open_handles(), 0);
}

#[tokio::test]
async fn test_pin_failure_still_resolves_authentication() {
    let client = QueuedClient::new();
    client.push(starbucks_payment());
    client.push(http_failure(503));
    let workflow = workflow(ScriptedSource::speech(), client);

    record_and_submit(&workflow).await;
    let state = record_and_submit(&workflow).await;

    assert_eq!(state, WorkflowState::AuthResolved);
    let snapshot = workflow.snapshot();
    assert!(snapshot.authentication.is_none());
    assert_eq!(snapshot.failure.map(|f| f.status), Some(Some(503)));
    assert!(snapshot.auto_reset_pending);

    sleep(RESET_DELAY * 2).await;
    assert_eq!(workflow.state(), WorkflowState::AwaitingCommand);
}

#[tokio::test]
async fn test_result_for_wrong_phase_is_protocol_failure() {
    let client = QueuedClient::new();
    client.push(starbucks_payment());
    client.push(starbucks_payment());
    let workflow = workflow(ScriptedSource::speech(), client);

    record_and_submit(&workflow).await;
    let state = record_and_submit(&workflow).await;

    assert_eq!(state, WorkflowState::AuthResolved);
    let failure = workflow.snapshot().failure.unwrap();
    assert_eq!(failure.kind, FailureKind::ProtocolViolation);
}

// ==================== 重置与定时器 ====================

#[tokio::test]
async fn test_reset_cancels_pending_auto_reset() {
    let client = QueuedClient::new();
    client.push(starbucks_payment());
    client.push(authenticated(0.88));
    let workflow = workflow(ScriptedSource::speech(), client);

    record_and_submit(&workflow).await;
    record_and_submit(&workflow).await;
    assert_eq!(workflow.state(), WorkflowState::AuthResolved);

    let mut rx = workflow.subscribe();

    let state = workflow.reset().await.unwrap();
    assert_eq!(state, WorkflowState::AwaitingCommand);
    assert_eq!(workflow.state(), WorkflowState::AwaitingCommand);
    assert!(!workflow.snapshot().has_transaction_data());
    assert!(!workflow.snapshot().auto_reset_pending);

    assert_eq!(rx.recv().await, Some(WorkflowState::AwaitingCommand));

    // 定时器不应在之后再次触发
    sleep(RESET_DELAY * 2).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(workflow.state(), WorkflowState::AwaitingCommand);
}

#[tokio::test]
async fn test_new_transaction_from_auth_resolved_cancels_timer() {
    let client = QueuedClient::new();
    client.push(starbucks_payment());
    client.push(authenticated(0.91));
    let workflow = workflow(ScriptedSource::speech(), client);

    record_and_submit(&workflow).await;
    record_and_submit(&workflow).await;
    assert_eq!(workflow.state(), WorkflowState::AuthResolved);

    let state = workflow.toggle_recording().await.unwrap();
    assert_eq!(
        state,
        WorkflowState::Recording(vpay_lib::state::CaptureStep::Command)
    );
    assert!(!workflow.snapshot().has_transaction_data());

    sleep(RESET_DELAY * 2).await;
    assert_eq!(
        workflow.state(),
        WorkflowState::Recording(vpay_lib::state::CaptureStep::Command)
    );

    workflow.cancel_recording().await.unwrap();
}

#[tokio::test]
async fn test_reset_rejected_while_recording() {
    let workflow = workflow(ScriptedSource::speech(), QueuedClient::new());

    workflow.toggle_recording().await.unwrap();

    let result = workflow.reset().await;
    assert!(matches!(
        result,
        Err(WorkflowError::InvalidAction { action: "reset", .. })
    ));
    assert!(workflow.state().is_recording());

    workflow.cancel_recording().await.unwrap();
}

#[tokio::test]
async fn test_reset_from_awaiting_pin() {
    let client = QueuedClient::new();
    client.push(starbucks_payment());
    let workflow = workflow(ScriptedSource::speech(), client);

    record_and_submit(&workflow).await;
    assert!(workflow.last_recording().is_some());

    workflow.reset().await.unwrap();
    assert_eq!(workflow.state(), WorkflowState::AwaitingCommand);
    assert!(workflow.last_recording().is_none());
    assert!(!workflow.snapshot().has_transaction_data());
}

// ==================== 并发门控 ====================

#[tokio::test]
async fn test_toggle_rejected_while_processing() {
    let source = ScriptedSource::speech();
    let client = QueuedClient::new();
    let release = client.push_gated(starbucks_payment());
    let workflow = workflow(source.clone(), client.clone());

    workflow.toggle_recording().await.unwrap();

    let pending = {
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move { workflow.toggle_recording().await })
    };

    let processing = WorkflowState::Processing(vpay_lib::state::CaptureStep::Command);
    wait_for(&workflow, processing).await;
    assert!(!workflow.snapshot().controls_enabled);

    let rejected = workflow.toggle_recording().await;
    assert!(matches!(rejected, Err(WorkflowError::Busy)));
    assert!(workflow.reset().await.is_err());
    assert_eq!(source.opened(), 1, "no second capture may start");

    release.send(()).unwrap();
    let state = pending.await.unwrap().unwrap();

    assert_eq!(state, WorkflowState::AwaitingPin);
    assert_eq!(client.submissions().len(), 1);
}

#[tokio::test]
async fn test_stale_result_is_ignored() {
    let client = QueuedClient::new();
    let release = client.push_gated(starbucks_payment());
    let workflow = workflow(ScriptedSource::speech(), client);

    workflow.toggle_recording().await.unwrap();
    let pending = {
        let workflow = Arc::clone(&workflow);
        tokio::spawn(async move { workflow.toggle_recording().await })
    };

    wait_for(
        &workflow,
        WorkflowState::Processing(vpay_lib::state::CaptureStep::Command),
    )
    .await;

    // 带外修改状态
    workflow
        .state_manager()
        .force_set(WorkflowState::AwaitingCommand);

    release.send(()).unwrap();
    let state = pending.await.unwrap().unwrap();

    assert_eq!(state, WorkflowState::AwaitingCommand);
    let snapshot = workflow.snapshot();
    assert!(snapshot.analysis.is_none());
    assert_ne!(snapshot.status_message.as_deref(), Some("Processing..."));
}

// ==================== 录音边界情况 ====================

#[tokio::test]
async fn test_device_unavailable_is_sticky() {
    let source = Arc::new(DeniedSource::default());
    let client = QueuedClient::new();
    let workflow = workflow(source.clone(), client.clone());

    let first = workflow.toggle_recording().await;
    assert!(matches!(first, Err(WorkflowError::DeviceUnavailable(_))));
    assert_eq!(workflow.state(), WorkflowState::AwaitingCommand);

    let snapshot = workflow.snapshot();
    assert!(!snapshot.device_available);
    assert!(!snapshot.controls_enabled);
    assert!(snapshot.status_message.is_some());

    let second = workflow.toggle_recording().await;
    assert!(matches!(second, Err(WorkflowError::DeviceUnavailable(_))));
    assert_eq!(source.attempts(), 1, "device must not be re-opened");
    assert!(client.submissions().is_empty());
}

#[tokio::test]
async fn test_empty_recording_is_discarded() {
    let source = ScriptedSource::silent();
    let client = QueuedClient::new();
    let workflow = workflow(source.clone(), client.clone());

    workflow.toggle_recording().await.unwrap();
    let result = workflow.toggle_recording().await;

    assert!(matches!(
        result,
        Err(WorkflowError::Audio(AudioError::EmptyRecording))
    ));
    assert_eq!(workflow.state(), WorkflowState::AwaitingCommand);
    assert!(workflow.snapshot().status_message.is_some());
    assert!(client.submissions().is_empty());
    assert_eq!(source.open_handles(), 0);
}

fn unplugged_mid_recording() -> Arc<ScriptedSource> {
    ScriptedSource::new(vec![
        CaptureEvent::Samples(vec![0.2; 1600]),
        CaptureEvent::Error("device unplugged".to_string()),
    ])
}

#[tokio::test]
async fn test_device_failure_while_recording_returns_to_awaiting_command() {
    let source = unplugged_mid_recording();
    let client = QueuedClient::new();
    let workflow = workflow(source.clone(), client.clone());

    let state = workflow.toggle_recording().await.unwrap();
    assert_eq!(state, WorkflowState::Recording(CaptureStep::Command));

    // 不再切换录音，工作流自行恢复
    wait_for(&workflow, WorkflowState::AwaitingCommand).await;

    assert_eq!(source.open_handles(), 0);
    let status = workflow.snapshot().status_message.unwrap();
    assert!(status.contains("device unplugged"), "status: {}", status);
    assert!(client.submissions().is_empty());
    // 麦克风仍可用，可以重新录音
    assert!(workflow.is_device_available());
}

#[tokio::test]
async fn test_device_failure_while_recording_pin_returns_to_awaiting_pin() {
    let source = unplugged_mid_recording();
    let workflow = workflow(source.clone(), QueuedClient::new());
    workflow
        .state_manager()
        .force_set(WorkflowState::AwaitingPin);

    let state = workflow.toggle_recording().await.unwrap();
    assert_eq!(state, WorkflowState::Recording(CaptureStep::Pin));

    wait_for(&workflow, WorkflowState::AwaitingPin).await;
    assert_eq!(source.open_handles(), 0);
}

#[tokio::test]
async fn test_cancel_recording_releases_device() {
    let source = ScriptedSource::speech();
    let client = QueuedClient::new();
    let workflow = workflow(source.clone(), client.clone());

    workflow.toggle_recording().await.unwrap();
    assert_eq!(source.open_handles(), 1);

    let state = workflow.cancel_recording().await.unwrap();
    assert_eq!(state, WorkflowState::AwaitingCommand);
    assert_eq!(source.open_handles(), 0);
    assert!(client.submissions().is_empty());
    assert_eq!(
        workflow.snapshot().status_message.as_deref(),
        Some("Recording cancelled")
    );

    let again = workflow.cancel_recording().await;
    assert!(matches!(again, Err(WorkflowError::InvalidAction { .. })));
}

#[tokio::test]
async fn test_cancel_pin_recording_returns_to_awaiting_pin() {
    let client = QueuedClient::new();
    client.push(starbucks_payment());
    let workflow = workflow(ScriptedSource::speech(), client);

    record_and_submit(&workflow).await;
    workflow.toggle_recording().await.unwrap();
    assert!(workflow.last_recording().is_none(), "previous recording released");

    let state = workflow.cancel_recording().await.unwrap();
    assert_eq!(state, WorkflowState::AwaitingPin);
    // 支付分析保留，用户可以重新录制 PIN
    assert!(workflow.snapshot().analysis.is_some());
}

#[tokio::test]
async fn test_recordings_are_saved_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let client = QueuedClient::new();
    client.push(InterpretationResult::from(
        vpay_lib::network::Failure::protocol("missing message"),
    ));

    let workflow = PaymentWorkflow::new(
        ScriptedSource::speech(),
        CaptureConstraints::default(),
        client,
        WorkflowOptions {
            auto_reset_delay: RESET_DELAY,
            recordings_dir: Some(dir.path().join("recordings")),
        },
    );

    record_and_submit(&workflow).await;

    let snapshot = workflow.snapshot();
    let path = snapshot.recording_path.expect("recording should be saved");
    assert!(path.exists());
    assert!(path.starts_with(dir.path()));
    assert!(snapshot.recording_duration_ms.unwrap() > 0);

    let saved = std::fs::read(&path).unwrap();
    assert_eq!(saved, workflow.last_recording().unwrap().bytes());
}
