use thiserror::Error;

use crate::audio::error::AudioError;
use crate::state::{StateError, WorkflowState};

/// 工作流错误
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// 处理中，录音控件被禁用
    #[error("A submission is still being processed")]
    Busy,

    /// 当前状态不允许该操作
    #[error("Cannot {action} while in state {state}")]
    InvalidAction {
        action: &'static str,
        state: WorkflowState,
    },

    /// 麦克风不可用（本次运行内不再重试）
    #[error("Microphone unavailable: {0}")]
    DeviceUnavailable(String),

    /// 采集或编码失败，录音已丢弃
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// 状态转换失败
    #[error(transparent)]
    State(#[from] StateError),
}

/// 工作流结果类型
pub type WorkflowResult<T> = Result<T, WorkflowError>;
