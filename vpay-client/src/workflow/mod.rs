//! 语音支付工作流模块
//!
//! 整合音频采集、编码、解析服务和状态机，提供两阶段的语音支付流程
//!
//! # 功能
//!
//! - 录音开关（开始 / 停止并提交）
//! - 根据服务端返回的 `nextStep` 进入 PIN 验证阶段
//! - 认证结束后定时自动重置，用户可提前重置
//! - 处理中拒绝新的录音请求
//!
//! # 使用示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use vpay_lib::audio::{CaptureConstraints, CpalInput};
//! use vpay_lib::network::HttpInterpretationClient;
//! use vpay_lib::state::config::ServiceConfig;
//! use vpay_lib::workflow::{PaymentWorkflow, WorkflowOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpInterpretationClient::new(&ServiceConfig::default())?;
//! let workflow = PaymentWorkflow::new(
//!     Arc::new(CpalInput::new()),
//!     CaptureConstraints::default(),
//!     Arc::new(client),
//!     WorkflowOptions::default(),
//! );
//!
//! // 开始录音
//! workflow.toggle_recording().await?;
//! // ...用户说出 "Pay 20 dollars to Starbucks"
//! // 停止录音并提交
//! workflow.toggle_recording().await?;
//!
//! println!("{:?}", workflow.snapshot().amount_display());
//! # Ok(())
//! # }
//! ```
//!
//! # 工作流程
//!
//! ```text
//! 1. 用户开始录音
//!    └── State: AwaitingCommand -> Recording(Command)
//!
//! 2. 用户停止录音，提交 phase=payment
//!    └── State: Recording(Command) -> Processing(Command)
//!
//! 3. 服务端返回支付分析
//!    ├── nextStep == "auth"     -> AwaitingPin
//!    └── 其他 / 失败            -> AwaitingCommand
//!
//!    录音中麦克风出错 -> 释放设备，回到录音前的状态
//!
//! 4. 用户录制 PIN，提交 phase=auth
//!    └── State: AwaitingPin -> Recording(Pin) -> Processing(Pin)
//!
//! 5. 认证结果（或失败）
//!    └── State: Processing(Pin) -> AuthResolved，启动自动重置定时器
//!
//! 6. 定时器触发或用户重置
//!    └── State: AuthResolved -> AwaitingCommand，清空交易数据
//! ```

mod error;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, MutexGuard};

use crate::audio::{
    AudioCaptureSession, AudioError, CaptureConstraints, InputSource, PayloadEncoder, RawPayload,
};
use crate::network::{
    AuthenticationOutcome, Failure, InterpretationClient, InterpretationResult, PaymentAnalysis,
};
use crate::state::config::WorkflowConfig;
use crate::state::{
    AutoResetTimer, CaptureStep, StateManager, WorkflowPhase, WorkflowState,
    DEFAULT_AUTO_RESET_SECS,
};
use crate::utils::error::ErrorContext;
use crate::utils::format::{format_amount, format_percentage};

pub use error::{WorkflowError, WorkflowResult};

const PROCESSING_STATUS: &str = "Processing...";

/// 单笔交易的数据
///
/// 交易结束（重置或自动重置）时整体清空
#[derive(Debug, Clone, Default)]
pub struct TransactionData {
    /// 支付指令转写文本
    pub transcript: Option<String>,
    /// 支付意图分析
    pub analysis: Option<PaymentAnalysis>,
    /// 声纹认证结果
    pub authentication: Option<AuthenticationOutcome>,
    /// 最近一次失败
    pub failure: Option<Failure>,
    /// 展示给用户的状态消息
    pub status_message: Option<String>,
    /// 最近一次录音（用于回放）
    pub last_recording: Option<Arc<RawPayload>>,
    /// 录音保存路径
    pub recording_path: Option<PathBuf>,
}

/// 工作流快照
///
/// 终端界面据此渲染
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSnapshot {
    pub state: WorkflowState,
    pub phase: WorkflowPhase,
    /// 录音控件是否可用
    pub controls_enabled: bool,
    /// 麦克风是否可用
    pub device_available: bool,
    /// 自动重置是否待触发
    pub auto_reset_pending: bool,
    pub transcript: Option<String>,
    pub analysis: Option<PaymentAnalysis>,
    pub authentication: Option<AuthenticationOutcome>,
    pub failure: Option<Failure>,
    pub status_message: Option<String>,
    pub recording_path: Option<PathBuf>,
    pub recording_duration_ms: Option<u64>,
}

impl WorkflowSnapshot {
    /// 金额展示，例如 "$20.00"
    pub fn amount_display(&self) -> Option<String> {
        let analysis = self.analysis.as_ref()?;
        let amount = analysis.amount_minor_units?;
        Some(format_amount(amount, analysis.currency.as_deref()))
    }

    pub fn recipient(&self) -> Option<&str> {
        self.analysis.as_ref()?.recipient.as_deref()
    }

    /// 意图识别置信度，例如 "90.0%"
    pub fn confidence_display(&self) -> Option<String> {
        self.analysis
            .as_ref()?
            .confidence
            .map(format_percentage)
    }

    /// 声纹相似度，例如 "93.0%"
    pub fn similarity_display(&self) -> Option<String> {
        self.authentication
            .as_ref()?
            .similarity_score
            .map(format_percentage)
    }

    /// 是否需要提示用户说出 PIN
    pub fn shows_auth_prompt(&self) -> bool {
        matches!(
            self.state,
            WorkflowState::AwaitingPin | WorkflowState::Recording(CaptureStep::Pin)
        )
    }

    /// 是否有任何交易数据
    pub fn has_transaction_data(&self) -> bool {
        self.transcript.is_some()
            || self.analysis.is_some()
            || self.authentication.is_some()
            || self.failure.is_some()
    }
}

/// 工作流选项
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOptions {
    /// 认证结束后自动重置的延迟
    pub auto_reset_delay: Duration,
    /// 录音保存目录
    pub recordings_dir: Option<PathBuf>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            auto_reset_delay: Duration::from_secs(DEFAULT_AUTO_RESET_SECS),
            recordings_dir: None,
        }
    }
}

impl From<&WorkflowConfig> for WorkflowOptions {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            auto_reset_delay: config.auto_reset_delay(),
            recordings_dir: config.recordings_dir.clone(),
        }
    }
}

/// 定时器和工作流共享的部分
struct WorkflowCore {
    state: StateManager,
    /// 录音会话；开始 / 停止 / 取消 / 重置期间持有
    capture: Mutex<AudioCaptureSession>,
    /// 每次开始录音时递增，用于识别过期的设备错误
    recordings: AtomicU64,
    data: StdMutex<TransactionData>,
    /// 每次清空交易数据时递增，用于识别过期的结果和定时器
    generation: AtomicU64,
    timer: StdMutex<Option<AutoResetTimer>>,
    /// 麦克风不可用的原因（一经设置不再清除）
    unavailable: StdMutex<Option<String>>,
}

impl WorkflowCore {
    fn data(&self) -> StdMutexGuard<'_, TransactionData> {
        lock(&self.data)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn set_status(&self, message: impl Into<String>) {
        self.data().status_message = Some(message.into());
    }

    fn clear_transaction(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.data() = TransactionData::default();
    }

    fn replace_timer(&self, timer: AutoResetTimer) {
        if let Some(previous) = lock(&self.timer).replace(timer) {
            previous.cancel();
        }
    }

    fn cancel_timer(&self) {
        if let Some(timer) = lock(&self.timer).take() {
            timer.cancel();
        }
    }

    fn timer_pending(&self) -> bool {
        lock(&self.timer)
            .as_ref()
            .map(AutoResetTimer::is_pending)
            .unwrap_or(false)
    }

    fn unavailable_reason(&self) -> Option<String> {
        lock(&self.unavailable).clone()
    }

    fn mark_unavailable(&self, reason: String) {
        *lock(&self.unavailable) = Some(reason);
    }

    /// 定时器触发：仅在仍处于同一笔交易的 AuthResolved 时重置
    fn auto_reset(&self, generation: u64) {
        if self.generation() != generation {
            tracing::debug!("Auto-reset skipped: transaction already reset");
            return;
        }
        if !self.state.current().is_auth_resolved() {
            tracing::debug!(state = %self.state.current(), "Auto-reset skipped");
            return;
        }

        self.clear_transaction();
        match self
            .state
            .transition_from(WorkflowState::AuthResolved, WorkflowState::AwaitingCommand)
        {
            Ok(_) => tracing::info!("Auto-reset to AwaitingCommand"),
            Err(e) => tracing::warn!(error = %e, "Auto-reset failed"),
        }
    }
}

impl WorkflowCore {
    /// 录音中设备出错：释放麦克风并回到录音前的状态
    async fn capture_failed(&self, recording: u64, step: CaptureStep, message: String) {
        let mut capture = self.capture.lock().await;

        let recording_state = WorkflowState::Recording(step);
        if self.recordings.load(Ordering::Acquire) != recording
            || self.state.current() != recording_state
        {
            tracing::debug!("Capture failure already handled");
            return;
        }

        capture.abort();

        let err = WorkflowError::Audio(AudioError::StreamError(message));
        tracing::warn!(error = %err, step = ?step, "Recording failed");
        self.set_status(ErrorContext::from(&err).status_line());

        if let Err(e) = self.state.transition_from(recording_state, step.resting_state()) {
            tracing::warn!(error = %e, "Failed to leave recording state");
        }
    }
}

/// 等待录音的设备错误
///
/// 录音正常结束时信号关闭，任务随之退出
async fn watch_capture(
    core: Weak<WorkflowCore>,
    mut failure: watch::Receiver<Option<String>>,
    recording: u64,
    step: CaptureStep,
) {
    let message = match failure.wait_for(Option::is_some).await {
        Ok(message) => message.clone().unwrap_or_default(),
        Err(_) => return,
    };

    if let Some(core) = core.upgrade() {
        core.capture_failed(recording, step, message).await;
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 语音支付工作流
///
/// 所有操作都通过 `&self` 调用；同一时刻最多一个录音、最多一个待处理的提交，
/// 由状态门控保证
pub struct PaymentWorkflow {
    core: Arc<WorkflowCore>,
    client: Arc<dyn InterpretationClient>,
    encoder: PayloadEncoder,
    options: WorkflowOptions,
}

impl PaymentWorkflow {
    /// 创建工作流
    ///
    /// # Arguments
    ///
    /// * `source` - 麦克风输入源
    /// * `constraints` - 采集参数
    /// * `client` - 解析服务客户端
    /// * `options` - 自动重置延迟和录音保存目录
    pub fn new(
        source: Arc<dyn InputSource>,
        constraints: CaptureConstraints,
        client: Arc<dyn InterpretationClient>,
        options: WorkflowOptions,
    ) -> Self {
        Self {
            core: Arc::new(WorkflowCore {
                state: StateManager::new(),
                capture: Mutex::new(AudioCaptureSession::new(source, constraints)),
                recordings: AtomicU64::new(0),
                data: StdMutex::new(TransactionData::default()),
                generation: AtomicU64::new(0),
                timer: StdMutex::new(None),
                unavailable: StdMutex::new(None),
            }),
            client,
            encoder: PayloadEncoder::new(),
            options,
        }
    }

    /// 获取当前状态
    pub fn state(&self) -> WorkflowState {
        self.core.state.current()
    }

    /// 状态管理器（用于挂接事件发射器）
    pub fn state_manager(&self) -> &StateManager {
        &self.core.state
    }

    /// 订阅状态变更
    pub fn subscribe(&self) -> mpsc::Receiver<WorkflowState> {
        self.core.state.subscribe()
    }

    /// 麦克风是否可用
    pub fn is_device_available(&self) -> bool {
        self.core.unavailable_reason().is_none()
    }

    /// 最近一次完成的录音
    pub fn last_recording(&self) -> Option<Arc<RawPayload>> {
        self.core.data().last_recording.clone()
    }

    /// 获取工作流快照
    pub fn snapshot(&self) -> WorkflowSnapshot {
        let state = self.state();
        let device_available = self.is_device_available();
        let auto_reset_pending = self.core.timer_pending();
        let data = self.core.data().clone();

        WorkflowSnapshot {
            state,
            phase: state.phase(),
            controls_enabled: state.controls_enabled() && device_available,
            device_available,
            auto_reset_pending,
            transcript: data.transcript,
            analysis: data.analysis,
            authentication: data.authentication,
            failure: data.failure,
            status_message: data.status_message,
            recording_path: data.recording_path,
            recording_duration_ms: data
                .last_recording
                .map(|raw| raw.duration().as_millis() as u64),
        }
    }

    /// 切换录音
    ///
    /// 空闲时开始录音；录音中时停止、编码并提交，返回处理后的状态
    ///
    /// # Errors
    ///
    /// - `WorkflowError::Busy` - 上一次提交仍在处理中
    /// - `WorkflowError::DeviceUnavailable` - 麦克风不可用
    /// - `WorkflowError::Audio` - 采集或编码失败；录音已丢弃，状态已回到录音前
    pub async fn toggle_recording(&self) -> WorkflowResult<WorkflowState> {
        if let Some(reason) = self.core.unavailable_reason() {
            tracing::warn!("Toggle rejected: microphone unavailable");
            return Err(WorkflowError::DeviceUnavailable(reason));
        }

        // 处理中直接拒绝，不排队等待
        if self.state().is_processing() {
            tracing::warn!(state = %self.state(), "Toggle rejected while processing");
            return Err(WorkflowError::Busy);
        }

        let mut capture = self.core.capture.lock().await;

        match self.state() {
            WorkflowState::Processing(_) => {
                tracing::warn!("Toggle rejected while processing");
                Err(WorkflowError::Busy)
            }
            WorkflowState::AwaitingCommand | WorkflowState::AuthResolved => {
                self.begin_capture(&mut capture, CaptureStep::Command).await
            }
            WorkflowState::AwaitingPin => self.begin_capture(&mut capture, CaptureStep::Pin).await,
            WorkflowState::Recording(step) => self.finish_capture(capture, step).await,
        }
    }

    /// 重置到 AwaitingCommand
    ///
    /// 清空交易数据并取消待触发的自动重置；录音中或处理中不允许
    pub async fn reset(&self) -> WorkflowResult<WorkflowState> {
        let _capture = self.core.capture.lock().await;

        let state = self.state();
        if !state.can_reset() {
            tracing::warn!(state = %state, "Reset rejected");
            return Err(WorkflowError::InvalidAction {
                action: "reset",
                state,
            });
        }

        self.core.cancel_timer();
        self.core.clear_transaction();
        self.core.state.transition(WorkflowState::AwaitingCommand)?;

        tracing::info!(from = %state, "Workflow reset");
        Ok(WorkflowState::AwaitingCommand)
    }

    /// 取消录音
    ///
    /// 释放麦克风并丢弃已采集的数据，回到录音前的状态
    pub async fn cancel_recording(&self) -> WorkflowResult<WorkflowState> {
        let mut capture = self.core.capture.lock().await;

        let state = self.state();
        let WorkflowState::Recording(step) = state else {
            return Err(WorkflowError::InvalidAction {
                action: "cancel recording",
                state,
            });
        };

        capture.abort();

        let resting = step.resting_state();
        self.core.set_status("Recording cancelled");
        self.core.state.transition(resting)?;

        tracing::info!(step = ?step, "Recording cancelled");
        Ok(resting)
    }

    async fn begin_capture(
        &self,
        capture: &mut AudioCaptureSession,
        step: CaptureStep,
    ) -> WorkflowResult<WorkflowState> {
        let from = self.state();

        match step {
            CaptureStep::Command => {
                // 新交易开始：取消定时器并清空上一笔交易
                self.core.cancel_timer();
                self.core.clear_transaction();
            }
            CaptureStep::Pin => {
                // 释放上一段录音
                let mut data = self.core.data();
                data.last_recording = None;
                data.recording_path = None;
            }
        }

        if let Err(err) = capture.start().await {
            let err = if err.is_device_unavailable() {
                tracing::error!(error = %err, "Microphone unavailable");
                let reason = err.to_string();
                self.core.mark_unavailable(reason.clone());
                WorkflowError::DeviceUnavailable(reason)
            } else {
                tracing::warn!(error = %err, "Failed to start recording");
                WorkflowError::Audio(err)
            };

            self.core.set_status(ErrorContext::from(&err).status_line());

            // 定时器已取消，不能停留在 AuthResolved
            if from.is_auth_resolved() {
                self.core.state.transition(WorkflowState::AwaitingCommand)?;
            }
            return Err(err);
        }

        self.core.set_status(match step {
            CaptureStep::Command => "Recording... say your payment command",
            CaptureStep::Pin => "Recording... say your PIN",
        });

        let recording = WorkflowState::Recording(step);
        if let Err(e) = self.core.state.transition(recording) {
            capture.abort();
            return Err(e.into());
        }

        if let Some(failure) = capture.failure_signal() {
            let id = self.core.recordings.fetch_add(1, Ordering::AcqRel) + 1;
            tokio::spawn(watch_capture(Arc::downgrade(&self.core), failure, id, step));
        }

        Ok(recording)
    }

    async fn finish_capture(
        &self,
        mut capture: MutexGuard<'_, AudioCaptureSession>,
        step: CaptureStep,
    ) -> WorkflowResult<WorkflowState> {
        let resting = step.resting_state();

        let raw = match capture.stop().await {
            Ok(Some(raw)) => Arc::new(raw),
            Ok(None) => {
                tracing::warn!("Recording state without an active capture");
                self.core.set_status("No recording in progress");
                self.core.state.transition(resting)?;
                return Ok(resting);
            }
            Err(err) => {
                tracing::warn!(error = %err, "Recording failed");
                let err = WorkflowError::Audio(err);
                self.core.set_status(ErrorContext::from(&err).status_line());
                self.core.state.transition(resting)?;
                return Err(err);
            }
        };

        self.keep_recording(step, &raw);

        let processing = WorkflowState::Processing(step);
        self.core.set_status(PROCESSING_STATUS);
        self.core.state.transition(processing)?;

        // 提交期间不持有录音锁；新的开关请求由 Processing 状态拒绝
        drop(capture);

        let generation = self.core.generation();

        let encoded = match self.encoder.encode(&raw) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::error!(error = %err, "Failed to encode recording");
                let err = WorkflowError::Audio(err);
                self.core.set_status(ErrorContext::from(&err).status_line());
                self.core.state.transition_from(processing, resting)?;
                return Err(err);
            }
        };

        let phase = step.phase();
        let result = self.client.submit(&encoded, phase).await;

        Ok(self.apply_result(step, generation, result))
    }

    /// 把解析结果应用到发出请求时的阶段
    fn apply_result(
        &self,
        step: CaptureStep,
        generation: u64,
        result: InterpretationResult,
    ) -> WorkflowState {
        let expected = WorkflowState::Processing(step);
        if self.core.generation() != generation || self.state() != expected {
            tracing::warn!(
                expected = %expected,
                actual = %self.state(),
                "Ignoring stale interpretation result"
            );
            let current = self.state();
            let mut data = self.core.data();
            if !current.is_processing()
                && data.status_message.as_deref() == Some(PROCESSING_STATUS)
            {
                data.status_message = None;
            }
            return current;
        }

        let result = match (step, result) {
            (CaptureStep::Command, result @ InterpretationResult::PaymentAnalysis(_))
            | (CaptureStep::Pin, result @ InterpretationResult::AuthenticationOutcome(_))
            | (_, result @ InterpretationResult::Failure(_)) => result,
            (CaptureStep::Command, InterpretationResult::AuthenticationOutcome(_)) => {
                InterpretationResult::Failure(Failure::protocol(
                    "authentication outcome received during the payment phase",
                ))
            }
            (CaptureStep::Pin, InterpretationResult::PaymentAnalysis(_)) => {
                InterpretationResult::Failure(Failure::protocol(
                    "payment analysis received during the auth phase",
                ))
            }
        };

        let next = {
            let mut data = self.core.data();
            match result {
                InterpretationResult::PaymentAnalysis(analysis) => {
                    tracing::info!(
                        has_payment_command = analysis.has_payment_command,
                        next_phase = %analysis.next_phase,
                        "Payment analysis received"
                    );
                    let next = match analysis.next_phase {
                        WorkflowPhase::AuthCapture => WorkflowState::AwaitingPin,
                        WorkflowPhase::PaymentCapture => WorkflowState::AwaitingCommand,
                    };
                    data.transcript = Some(analysis.transcript.clone()).filter(|t| !t.is_empty());
                    data.status_message = Some(analysis.status_message.clone());
                    data.analysis = Some(analysis);
                    next
                }
                InterpretationResult::AuthenticationOutcome(outcome) => {
                    tracing::info!(authenticated = outcome.authenticated, "Authentication resolved");
                    data.status_message = Some(outcome.status_message.clone());
                    data.authentication = Some(outcome);
                    WorkflowState::AuthResolved
                }
                InterpretationResult::Failure(failure) => {
                    tracing::warn!(kind = ?failure.kind, reason = %failure.reason, "Submission failed");
                    data.status_message = Some(ErrorContext::from(&failure).status_line());
                    data.failure = Some(failure);
                    match step {
                        CaptureStep::Command => WorkflowState::AwaitingCommand,
                        CaptureStep::Pin => WorkflowState::AuthResolved,
                    }
                }
            }
        };

        match self.core.state.transition_from(expected, next) {
            Ok(_) => {
                if next.is_auth_resolved() {
                    self.arm_auto_reset();
                }
                next
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to apply interpretation result");
                self.state()
            }
        }
    }

    fn arm_auto_reset(&self) {
        let core = Arc::downgrade(&self.core);
        let generation = self.core.generation();

        let timer = AutoResetTimer::schedule(self.options.auto_reset_delay, async move {
            if let Some(core) = core.upgrade() {
                core.auto_reset(generation);
            }
        });
        self.core.replace_timer(timer);
    }

    /// 保存最近一次录音，配置了目录时同时写入 WAV 文件
    fn keep_recording(&self, step: CaptureStep, raw: &Arc<RawPayload>) {
        let path = self.options.recordings_dir.as_ref().and_then(|dir| {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            let name = match step {
                CaptureStep::Command => format!("vpay-command-{}.wav", millis),
                CaptureStep::Pin => format!("vpay-pin-{}.wav", millis),
            };
            let path = dir.join(name);

            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Cannot create recordings directory");
                return None;
            }
            match raw.write_to(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "Recording saved");
                    Some(path)
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to save recording");
                    None
                }
            }
        });

        let mut data = self.core.data();
        data.last_recording = Some(Arc::clone(raw));
        data.recording_path = path;
    }
}

impl Drop for PaymentWorkflow {
    fn drop(&mut self) {
        self.core.cancel_timer();
    }
}
