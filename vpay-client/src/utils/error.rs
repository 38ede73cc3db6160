//! 全局错误处理模块
//!
//! 提供统一的应用错误类型和面向用户的状态消息
//!
//! # 功能
//!
//! - 统一的 `AppError` 类型，聚合所有模块错误
//! - 用户可读的错误消息
//! - 错误代码（`DEVICE_UNAVAILABLE` 等）
//! - 错误恢复建议
//!
//! # 使用示例
//!
//! ```
//! use vpay_lib::audio::AudioError;
//! use vpay_lib::utils::error::{AppError, ErrorCode};
//!
//! let err = AppError::from(AudioError::DeviceUnavailable("no input device".into()));
//! let ctx = err.context();
//!
//! assert_eq!(ctx.code, ErrorCode::DeviceUnavailable);
//! assert!(!ctx.recoverable);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::error::AudioError;
use crate::network::error::NetworkError;
use crate::network::interpretation::{Failure, FailureKind};
use crate::state::config::ConfigError;
use crate::state::StateError;
use crate::workflow::WorkflowError;

/// 应用级错误
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 音频
    DeviceUnavailable,
    CaptureFailed,
    EncodingFailure,

    // 解析服务
    TransportFailure,
    ProtocolViolation,

    // 工作流
    WorkflowBusy,
    InvalidAction,

    // 配置
    ConfigLoadFailed,
    ConfigInvalid,

    // 通用
    InternalError,
}

/// 错误上下文
///
/// 工作流用它生成展示给用户的状态消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// 错误代码
    pub code: ErrorCode,
    /// 用户可读的消息
    pub message: String,
    /// 技术细节
    pub detail: Option<String>,
    /// 恢复建议
    pub recovery_hint: Option<String>,
    /// 是否可恢复
    pub recoverable: bool,
}

impl ErrorContext {
    /// 创建新的错误上下文
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            recovery_hint: None,
            recoverable: true,
        }
    }

    /// 添加详细信息
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// 添加恢复建议
    pub fn with_recovery_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }

    /// 标记为不可恢复
    pub fn not_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }

    /// 单行状态消息：用户消息加技术细节
    pub fn status_line(&self) -> String {
        match &self.detail {
            Some(detail) if detail != &self.message => format!("{} ({})", self.message, detail),
            _ => self.message.clone(),
        }
    }
}

impl From<&Failure> for ErrorContext {
    fn from(failure: &Failure) -> Self {
        let ctx = match failure.kind {
            FailureKind::Transport => ErrorContext::new(
                ErrorCode::TransportFailure,
                "The payment request failed",
            )
            .with_recovery_hint("Check your connection and record again"),
            FailureKind::ProtocolViolation => ErrorContext::new(
                ErrorCode::ProtocolViolation,
                "The payment service sent an incomplete response",
            )
            .with_recovery_hint("Record again"),
        };
        ctx.with_detail(failure.reason.clone())
    }
}

impl From<&WorkflowError> for ErrorContext {
    fn from(err: &WorkflowError) -> Self {
        let audio = match err {
            WorkflowError::Audio(audio) => Some(audio),
            _ => None,
        };
        build_context(workflow_code(err), audio, err.to_string())
    }
}

impl AppError {
    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Audio(err) => audio_code(err),

            // 解析服务错误
            AppError::Network(NetworkError::Protocol(_))
            | AppError::Network(NetworkError::Serialization(_)) => ErrorCode::ProtocolViolation,
            AppError::Network(NetworkError::InvalidConfig(_)) => ErrorCode::ConfigInvalid,
            AppError::Network(_) => ErrorCode::TransportFailure,

            AppError::Workflow(err) => workflow_code(err),

            // 配置错误
            AppError::Config(ConfigError::Json(_)) | AppError::Config(ConfigError::Invalid(_)) => {
                ErrorCode::ConfigInvalid
            }
            AppError::Config(_) => ErrorCode::ConfigLoadFailed,

            AppError::State(_) | AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// 获取用户可读的错误消息
    pub fn user_message(&self) -> String {
        user_message(self.code(), self.audio_error())
    }

    /// 获取完整的错误上下文
    pub fn context(&self) -> ErrorContext {
        build_context(self.code(), self.audio_error(), self.to_string())
    }

    /// 获取恢复建议
    pub fn recovery_hint(&self) -> Option<String> {
        recovery_hint(self.code())
    }

    /// 检查错误是否可恢复
    pub fn is_recoverable(&self) -> bool {
        is_recoverable(self.code())
    }

    fn audio_error(&self) -> Option<&AudioError> {
        match self {
            AppError::Audio(err) | AppError::Workflow(WorkflowError::Audio(err)) => Some(err),
            _ => None,
        }
    }
}

fn audio_code(err: &AudioError) -> ErrorCode {
    match err {
        AudioError::DeviceUnavailable(_) => ErrorCode::DeviceUnavailable,
        AudioError::EncodingFailed(_) => ErrorCode::EncodingFailure,
        _ => ErrorCode::CaptureFailed,
    }
}

fn workflow_code(err: &WorkflowError) -> ErrorCode {
    match err {
        WorkflowError::Busy => ErrorCode::WorkflowBusy,
        WorkflowError::InvalidAction { .. } => ErrorCode::InvalidAction,
        WorkflowError::DeviceUnavailable(_) => ErrorCode::DeviceUnavailable,
        WorkflowError::Audio(audio) => audio_code(audio),
        WorkflowError::State(_) => ErrorCode::InternalError,
    }
}

fn user_message(code: ErrorCode, audio: Option<&AudioError>) -> String {
    match code {
        ErrorCode::DeviceUnavailable => {
            "Voice payments are unavailable: no microphone could be opened".to_string()
        }
        ErrorCode::CaptureFailed => match audio {
            Some(AudioError::EmptyRecording) => "No audio was captured".to_string(),
            Some(AudioError::AlreadyRecording) => "Already recording".to_string(),
            Some(AudioError::DeviceBusy) => "The microphone is in use".to_string(),
            _ => "Recording failed".to_string(),
        },
        ErrorCode::EncodingFailure => "The recording could not be prepared for sending".to_string(),
        ErrorCode::TransportFailure => "The payment request failed".to_string(),
        ErrorCode::ProtocolViolation => "The payment service sent an incomplete response".to_string(),
        ErrorCode::WorkflowBusy => "Still processing the last recording".to_string(),
        ErrorCode::InvalidAction => "That action is not available right now".to_string(),
        ErrorCode::ConfigLoadFailed => "Could not read the configuration file".to_string(),
        ErrorCode::ConfigInvalid => "The configuration is invalid".to_string(),
        ErrorCode::InternalError => "Something went wrong".to_string(),
    }
}

fn recovery_hint(code: ErrorCode) -> Option<String> {
    match code {
        ErrorCode::DeviceUnavailable => {
            Some("Connect a microphone and allow access to it, then restart vpay".to_string())
        }
        ErrorCode::CaptureFailed => Some("Record again".to_string()),
        ErrorCode::TransportFailure => Some("Check that the payment service is running".to_string()),
        ErrorCode::WorkflowBusy => Some("Wait for the result".to_string()),
        ErrorCode::ConfigInvalid => Some("Fix the configuration file".to_string()),
        _ => None,
    }
}

// 麦克风缺失和配置错误需要用户干预后重启
fn is_recoverable(code: ErrorCode) -> bool {
    !matches!(
        code,
        ErrorCode::DeviceUnavailable
            | ErrorCode::ConfigLoadFailed
            | ErrorCode::ConfigInvalid
            | ErrorCode::InternalError
    )
}

fn build_context(code: ErrorCode, audio: Option<&AudioError>, detail: String) -> ErrorContext {
    let mut ctx = ErrorContext::new(code, user_message(code, audio)).with_detail(detail);
    ctx.recovery_hint = recovery_hint(code);
    if !is_recoverable(code) {
        ctx = ctx.not_recoverable();
    }
    ctx
}

/// 应用结果类型
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}
