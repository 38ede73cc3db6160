//! 状态转换事件与自动重置定时器
//!
//! 提供：
//! - 状态变更事件转发到终端界面
//! - 认证结束后的可取消自动重置定时器

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{StateManager, WorkflowState};

/// 默认自动重置延迟（秒）
pub const DEFAULT_AUTO_RESET_SECS: u64 = 5;

/// 状态变更事件载荷
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChangeEvent {
    /// 状态名称
    pub state: String,
    /// 当前阶段标记
    pub phase: String,
    /// 是否录音中
    pub is_recording: bool,
    /// 是否处理中
    pub is_processing: bool,
    /// 是否在等待 PIN
    pub is_awaiting_pin: bool,
    /// 录音控件是否可用
    pub controls_enabled: bool,
}

impl From<&WorkflowState> for StateChangeEvent {
    fn from(state: &WorkflowState) -> Self {
        Self {
            state: state.name().to_string(),
            phase: state.phase().as_str().to_string(),
            is_recording: state.is_recording(),
            is_processing: state.is_processing(),
            is_awaiting_pin: state.is_awaiting_pin(),
            controls_enabled: state.controls_enabled(),
        }
    }
}

/// 状态事件发射器
///
/// 监听 StateManager 的状态变更，并把事件交给回调（通常是终端渲染）
pub struct StateEventEmitter {
    /// 停止信号发送器
    stop_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StateEventEmitter {
    /// 创建并启动状态事件发射器
    ///
    /// # Arguments
    ///
    /// * `state_manager` - 状态管理器引用
    /// * `sink` - 每次状态变更时调用
    pub fn start<F>(state_manager: &StateManager, sink: F) -> Self
    where
        F: Fn(StateChangeEvent) + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let mut state_rx = state_manager.subscribe();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // 接收状态变更
                    received = state_rx.recv() => {
                        match received {
                            Some(new_state) => {
                                tracing::debug!(state = %new_state, "Emitting state change event");
                                sink(StateChangeEvent::from(&new_state));
                            }
                            None => break,
                        }
                    }
                    // 接收停止信号
                    _ = stop_rx.recv() => {
                        tracing::debug!("StateEventEmitter stopped");
                        break;
                    }
                }
            }
        });

        tracing::debug!("StateEventEmitter started");
        Self {
            stop_tx: Some(stop_tx),
            task: Some(task),
        }
    }

    /// 停止事件发射器并等待任务结束
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StateEventEmitter {
    fn drop(&mut self) {
        // 同步关闭，尽量发送停止信号
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// 可取消的延迟任务
///
/// 认证结束后由工作流持有；用户重置或开始新交易时取消。
/// 句柄被丢弃时任务同样被取消，不会在之后触发。
#[derive(Debug)]
pub struct AutoResetTimer {
    handle: JoinHandle<()>,
}

impl AutoResetTimer {
    /// 在 `delay` 之后执行 `on_fire`
    pub fn schedule<F>(delay: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        });

        tracing::debug!(delay_ms = delay.as_millis() as u64, "Auto-reset timer armed");
        Self { handle }
    }

    /// 取消定时器
    pub fn cancel(self) {
        if !self.handle.is_finished() {
            tracing::debug!("Auto-reset timer cancelled");
        }
        self.handle.abort();
    }

    /// 定时器是否尚未触发
    pub fn is_pending(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for AutoResetTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
