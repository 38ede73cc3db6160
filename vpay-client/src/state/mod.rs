//! 状态管理模块
//!
//! 提供支付工作流状态机、配置和状态事件
//!
//! # 模块结构
//!
//! - `app_state` - 核心状态定义和状态管理器
//! - `config` - 应用配置
//! - `error` - 状态相关错误类型
//! - `transitions` - 状态事件发射和自动重置定时器

pub mod app_state;
pub mod config;
mod error;
mod transitions;

pub use app_state::{is_valid_transition, CaptureStep, StateManager, WorkflowPhase, WorkflowState};
pub use config::{AppConfig, ConfigError, ConfigManager, ConfigResult};
pub use error::{StateError, StateResult};
pub use transitions::{AutoResetTimer, StateChangeEvent, StateEventEmitter, DEFAULT_AUTO_RESET_SECS};
