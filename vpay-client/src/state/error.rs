use thiserror::Error;

use super::app_state::WorkflowState;

/// 状态相关错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// 无效的状态转换
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: WorkflowState, to: WorkflowState },

    /// 当前状态与预期不符（结果已过期）
    #[error("Expected state {expected}, found {actual}")]
    UnexpectedState {
        expected: WorkflowState,
        actual: WorkflowState,
    },

    /// 校验期间状态被修改
    #[error("State changed concurrently")]
    ConcurrentModification,
}

/// 状态模块的结果类型
pub type StateResult<T> = Result<T, StateError>;
