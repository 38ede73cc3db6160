use std::fmt;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::{StateError, StateResult};

/// 录音所属步骤
///
/// 区分正在录制的是支付指令还是 PIN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureStep {
    /// 支付指令
    Command,
    /// 语音 PIN
    Pin,
}

/// 工作流阶段
///
/// 随请求一起发送给解析服务，决定服务端执行意图提取还是声纹验证
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowPhase {
    /// 支付意图采集
    #[serde(rename = "payment")]
    PaymentCapture,
    /// PIN 声纹验证
    #[serde(rename = "auth")]
    AuthCapture,
}

impl WorkflowPhase {
    /// 线上传输使用的阶段标记
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentCapture => "payment",
            Self::AuthCapture => "auth",
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for WorkflowPhase {
    fn default() -> Self {
        Self::PaymentCapture
    }
}

impl CaptureStep {
    /// 该步骤对应的阶段
    pub fn phase(&self) -> WorkflowPhase {
        match self {
            Self::Command => WorkflowPhase::PaymentCapture,
            Self::Pin => WorkflowPhase::AuthCapture,
        }
    }

    /// 录音开始前（以及取消录音后）所在的状态
    pub fn resting_state(&self) -> WorkflowState {
        match self {
            Self::Command => WorkflowState::AwaitingCommand,
            Self::Pin => WorkflowState::AwaitingPin,
        }
    }
}

/// 支付工作流状态
///
/// 一个显式的有限状态机取代了零散的 recording / processing / phase 标志位，
/// 不存在"处理中同时录音中"之类的非法组合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkflowState {
    /// 等待支付指令（初始状态）
    AwaitingCommand,

    /// 正在录音
    Recording(CaptureStep),

    /// 录音已提交，等待解析结果
    Processing(CaptureStep),

    /// 已识别支付指令，等待 PIN
    AwaitingPin,

    /// 认证已结束（每笔交易的终态，定时自动回到 AwaitingCommand）
    AuthResolved,
}

impl WorkflowState {
    /// 检查是否为初始状态
    pub fn is_awaiting_command(&self) -> bool {
        matches!(self, Self::AwaitingCommand)
    }

    /// 检查是否在录音中
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording(_))
    }

    /// 检查是否在处理中
    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing(_))
    }

    /// 检查是否在等待 PIN
    pub fn is_awaiting_pin(&self) -> bool {
        matches!(self, Self::AwaitingPin)
    }

    /// 检查认证是否已结束
    pub fn is_auth_resolved(&self) -> bool {
        matches!(self, Self::AuthResolved)
    }

    /// 录音控件是否可用（处理中禁用）
    pub fn controls_enabled(&self) -> bool {
        !self.is_processing()
    }

    /// 是否允许显式重置
    pub fn can_reset(&self) -> bool {
        !self.is_recording() && !self.is_processing()
    }

    /// 当前所属阶段
    pub fn phase(&self) -> WorkflowPhase {
        match self {
            Self::AwaitingCommand => WorkflowPhase::PaymentCapture,
            Self::Recording(step) | Self::Processing(step) => step.phase(),
            Self::AwaitingPin | Self::AuthResolved => WorkflowPhase::AuthCapture,
        }
    }

    /// 获取状态名称（用于日志和调试）
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingCommand => "AwaitingCommand",
            Self::Recording(CaptureStep::Command) => "Recording(Command)",
            Self::Recording(CaptureStep::Pin) => "Recording(Pin)",
            Self::Processing(CaptureStep::Command) => "Processing(Command)",
            Self::Processing(CaptureStep::Pin) => "Processing(Pin)",
            Self::AwaitingPin => "AwaitingPin",
            Self::AuthResolved => "AuthResolved",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::AwaitingCommand
    }
}

/// 状态管理器
///
/// 负责管理工作流状态的转换和通知监听者
pub struct StateManager {
    /// 当前状态（使用 ArcSwap 实现无锁读取）
    state: ArcSwap<WorkflowState>,

    /// 状态变更监听器列表
    listeners: Mutex<Vec<mpsc::Sender<WorkflowState>>>,
}

impl StateManager {
    /// 创建新的状态管理器
    ///
    /// # Examples
    ///
    /// ```
    /// use vpay_lib::state::StateManager;
    ///
    /// let manager = StateManager::new();
    /// assert!(manager.current().is_awaiting_command());
    /// ```
    pub fn new() -> Self {
        Self {
            state: ArcSwap::new(Arc::new(WorkflowState::AwaitingCommand)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// 获取当前状态
    ///
    /// 此方法是无锁的
    pub fn current(&self) -> WorkflowState {
        **self.state.load()
    }

    /// 转换到新状态
    ///
    /// 验证状态转换的合法性，如果合法则更新状态并通知所有监听者
    ///
    /// # Errors
    ///
    /// - [`StateError::InvalidTransition`] 转换不合法
    /// - [`StateError::ConcurrentModification`] 校验期间状态被其他调用者修改
    ///
    /// # Examples
    ///
    /// ```
    /// use vpay_lib::state::{CaptureStep, StateManager, WorkflowState};
    ///
    /// let manager = StateManager::new();
    ///
    /// // 合法转换
    /// assert!(manager.transition(WorkflowState::Recording(CaptureStep::Command)).is_ok());
    ///
    /// // 非法转换
    /// assert!(manager.transition(WorkflowState::AuthResolved).is_err());
    /// ```
    pub fn transition(&self, new_state: WorkflowState) -> StateResult<WorkflowState> {
        let current = self.state.load_full();
        self.swap_from(current, new_state)
    }

    /// 仅当当前状态等于 `expected` 时转换
    ///
    /// 用于丢弃过期的异步结果
    pub fn transition_from(
        &self,
        expected: WorkflowState,
        new_state: WorkflowState,
    ) -> StateResult<WorkflowState> {
        let current = self.state.load_full();
        if *current != expected {
            return Err(StateError::UnexpectedState {
                expected,
                actual: *current,
            });
        }
        self.swap_from(current, new_state)
    }

    fn swap_from(
        &self,
        current: Arc<WorkflowState>,
        new_state: WorkflowState,
    ) -> StateResult<WorkflowState> {
        let from = *current;

        // 验证状态转换是否合法
        if !is_valid_transition(&from, &new_state) {
            return Err(StateError::InvalidTransition {
                from,
                to: new_state,
            });
        }

        let previous = self.state.compare_and_swap(&current, Arc::new(new_state));
        if !Arc::ptr_eq(&previous, &current) {
            return Err(StateError::ConcurrentModification);
        }

        tracing::info!(from = %from, to = %new_state, "Workflow state changed");
        self.notify_listeners(new_state);

        Ok(from)
    }

    /// 添加状态变更监听器
    ///
    /// 返回的接收器将按顺序接收所有状态变更通知
    pub fn subscribe(&self) -> mpsc::Receiver<WorkflowState> {
        let (tx, rx) = mpsc::channel(32);
        self.lock_listeners().push(tx);
        rx
    }

    /// 获取当前监听器数量
    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// 强制设置状态（跳过验证）
    ///
    /// **警告**: 此方法跳过状态转换验证，仅用于错误恢复
    pub fn force_set(&self, new_state: WorkflowState) {
        let previous = self.state.swap(Arc::new(new_state));
        tracing::warn!(from = %previous, to = %new_state, "Workflow state forced");
        self.notify_listeners(new_state);
    }

    /// 通知所有监听者状态变更
    ///
    /// 使用 try_send，慢速监听者会丢失通知而不会阻塞状态机
    fn notify_listeners(&self, new_state: WorkflowState) {
        let mut listeners = self.lock_listeners();
        listeners.retain(|tx| match tx.try_send(new_state) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(state = %new_state, "State listener queue full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<WorkflowState>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 验证状态转换是否合法
///
/// 根据状态机图定义的转换规则进行验证
pub fn is_valid_transition(from: &WorkflowState, to: &WorkflowState) -> bool {
    use CaptureStep::*;
    use WorkflowState::*;

    match (from, to) {
        // 开始录音
        (AwaitingCommand, Recording(Command)) => true,
        (AwaitingPin, Recording(Pin)) => true,
        // 认证结束后直接开始新交易
        (AuthResolved, Recording(Command)) => true,

        // 停止录音并提交
        (Recording(a), Processing(b)) => a == b,

        // 取消录音或采集失败，回到录音前的状态
        (Recording(Command), AwaitingCommand) => true,
        (Recording(Pin), AwaitingPin) => true,

        // 支付阶段结果
        (Processing(Command), AwaitingPin) => true,
        (Processing(Command), AwaitingCommand) => true,

        // 认证阶段结果（成功、失败或出错都进入 AuthResolved）
        (Processing(Pin), AuthResolved) => true,
        // 编码失败时未发出请求，回到等待 PIN
        (Processing(Pin), AwaitingPin) => true,

        // 重置（定时或用户触发）
        (AwaitingCommand, AwaitingCommand) => true,
        (AwaitingPin, AwaitingCommand) => true,
        (AuthResolved, AwaitingCommand) => true,

        // 其他转换不合法
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_helpers() {
        let state = WorkflowState::Processing(CaptureStep::Pin);
        assert!(state.is_processing());
        assert!(!state.controls_enabled());
        assert!(!state.can_reset());
        assert_eq!(state.phase(), WorkflowPhase::AuthCapture);
        assert_eq!(state.name(), "Processing(Pin)");

        assert!(WorkflowState::AwaitingPin.can_reset());
        assert!(!WorkflowState::Recording(CaptureStep::Command).can_reset());
        assert_eq!(WorkflowState::default(), WorkflowState::AwaitingCommand);
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(
            serde_json::to_string(&WorkflowPhase::PaymentCapture).unwrap(),
            "\"payment\""
        );
        assert_eq!(serde_json::to_string(&WorkflowPhase::AuthCapture).unwrap(), "\"auth\"");
        assert_eq!(WorkflowPhase::AuthCapture.to_string(), "auth");
    }

    #[test]
    fn test_full_transaction_transitions() {
        let manager = StateManager::new();

        manager.transition(WorkflowState::Recording(CaptureStep::Command)).unwrap();
        manager.transition(WorkflowState::Processing(CaptureStep::Command)).unwrap();
        manager.transition(WorkflowState::AwaitingPin).unwrap();
        manager.transition(WorkflowState::Recording(CaptureStep::Pin)).unwrap();
        manager.transition(WorkflowState::Processing(CaptureStep::Pin)).unwrap();
        manager.transition(WorkflowState::AuthResolved).unwrap();
        manager.transition(WorkflowState::AwaitingCommand).unwrap();

        assert!(manager.current().is_awaiting_command());
    }

    #[test]
    fn test_invalid_transitions() {
        let manager = StateManager::new();

        // AwaitingCommand -> Processing (invalid)
        let result = manager.transition(WorkflowState::Processing(CaptureStep::Command));
        assert!(matches!(result, Err(StateError::InvalidTransition { .. })));

        // PIN 录音不能从 AwaitingCommand 开始
        assert!(manager.transition(WorkflowState::Recording(CaptureStep::Pin)).is_err());

        manager.transition(WorkflowState::Recording(CaptureStep::Command)).unwrap();

        // 录音中不能重置
        assert!(manager.transition(WorkflowState::AwaitingPin).is_err());
        // 步骤必须一致
        assert!(manager.transition(WorkflowState::Processing(CaptureStep::Pin)).is_err());

        manager.transition(WorkflowState::Processing(CaptureStep::Command)).unwrap();

        // 处理中不能开始录音或重置
        assert!(manager.transition(WorkflowState::Recording(CaptureStep::Command)).is_err());
        assert!(manager.transition(WorkflowState::AuthResolved).is_err());
    }

    #[test]
    fn test_transition_from_guards_stale_state() {
        let manager = StateManager::new();
        manager.transition(WorkflowState::Recording(CaptureStep::Command)).unwrap();

        let result = manager.transition_from(
            WorkflowState::Processing(CaptureStep::Command),
            WorkflowState::AwaitingPin,
        );
        assert!(matches!(result, Err(StateError::UnexpectedState { .. })));
        assert_eq!(manager.current(), WorkflowState::Recording(CaptureStep::Command));
    }

    #[test]
    fn test_force_set() {
        let manager = StateManager::new();
        manager.force_set(WorkflowState::AuthResolved);
        assert!(manager.current().is_auth_resolved());
    }

    #[tokio::test]
    async fn test_state_listener_receives_in_order() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        manager.transition(WorkflowState::Recording(CaptureStep::Command)).unwrap();
        manager.transition(WorkflowState::AwaitingCommand).unwrap();

        assert_eq!(rx.recv().await, Some(WorkflowState::Recording(CaptureStep::Command)));
        assert_eq!(rx.recv().await, Some(WorkflowState::AwaitingCommand));
    }

    #[tokio::test]
    async fn test_listener_count() {
        let manager = StateManager::new();
        assert_eq!(manager.listener_count(), 0);

        let rx1 = manager.subscribe();
        let _rx2 = manager.subscribe();
        assert_eq!(manager.listener_count(), 2);

        // 已关闭的监听器在下一次通知时移除
        drop(rx1);
        manager
            .transition(WorkflowState::Recording(CaptureStep::Command))
            .unwrap();
        assert_eq!(manager.listener_count(), 1);
    }
}
