//! 应用配置模块
//!
//! 提供应用程序配置的加载、保存和校验功能
//!
//! # 配置存储位置
//!
//! - Windows: `%APPDATA%/vpay/vpay/config/config.json`
//! - macOS: `~/Library/Application Support/com.vpay.vpay/config.json`
//! - Linux: `~/.config/vpay/config.json`
//!
//! # 使用示例
//!
//! ```no_run
//! use vpay_lib::state::config::ConfigManager;
//!
//! let path = ConfigManager::default_path().unwrap();
//!
//! // 加载配置（文件不存在时返回默认值）
//! let mut config = ConfigManager::load(&path).unwrap();
//!
//! // 修改配置
//! config.workflow.auto_reset_secs = 10;
//!
//! // 保存配置
//! ConfigManager::save(&path, &config).unwrap();
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::source::CaptureConstraints;
use crate::state::transitions::DEFAULT_AUTO_RESET_SECS;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// 路径错误
    #[error("Path error: {0}")]
    Path(String),

    /// 配置值不合法
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 配置结果类型
pub type ConfigResult<T> = Result<T, ConfigError>;

/// 应用配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 解析服务配置
    pub service: ServiceConfig,
    /// 音频配置
    pub audio: AudioConfig,
    /// 工作流配置
    pub workflow: WorkflowConfig,
}

/// 解析服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// 服务根地址
    pub base_url: String,
    /// 提交录音的路径
    pub submit_path: String,
    /// 健康检查路径
    pub health_path: String,
    /// 请求超时（秒）
    pub request_timeout_secs: u64,
    /// 以 Bearer 令牌发送的 API 密钥
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            submit_path: "/api/voice-payment".to_string(),
            health_path: "/health".to_string(),
            request_timeout_secs: 30,
            api_key: None,
        }
    }
}

/// 音频配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// 输入设备 ID（None 表示使用默认设备）
    pub input_device_id: Option<String>,
    /// 录音采样率
    pub sample_rate: u32,
    /// 声道数（仅支持单声道）
    pub channels: u16,
    /// 分片间隔（毫秒）
    pub fragment_interval_ms: u32,
    /// 回声消除
    pub echo_cancellation: bool,
    /// 降噪（静音门限）
    pub noise_suppression: bool,
    /// 自动增益
    pub auto_gain_control: bool,
    /// 静音检测阈值（RMS）
    pub silence_threshold: f32,
    /// 自动增益上限
    pub max_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let constraints = CaptureConstraints::default();
        Self {
            input_device_id: constraints.device_id,
            sample_rate: constraints.sample_rate,
            channels: constraints.channel_count,
            fragment_interval_ms: constraints.fragment_interval_ms,
            echo_cancellation: constraints.echo_cancellation,
            noise_suppression: constraints.noise_suppression,
            auto_gain_control: constraints.auto_gain_control,
            silence_threshold: constraints.silence_threshold,
            max_gain: constraints.max_gain,
        }
    }
}

impl AudioConfig {
    /// 转换为采集参数
    pub fn to_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            device_id: self.input_device_id.clone(),
            sample_rate: self.sample_rate,
            channel_count: self.channels,
            fragment_interval_ms: self.fragment_interval_ms,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
            silence_threshold: self.silence_threshold,
            max_gain: self.max_gain,
        }
    }
}

/// 工作流配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 认证结束后自动重置的延迟（秒）
    pub auto_reset_secs: u64,
    /// 录音保存目录（None 表示不保存）
    pub recordings_dir: Option<PathBuf>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_reset_secs: DEFAULT_AUTO_RESET_SECS,
            recordings_dir: None,
        }
    }
}

impl WorkflowConfig {
    pub fn auto_reset_delay(&self) -> Duration {
        Duration::from_secs(self.auto_reset_secs)
    }
}

impl AppConfig {
    /// 校验配置值
    ///
    /// # Errors
    ///
    /// 任一配置项不合法时返回 [`ConfigError::Invalid`]
    pub fn validate(&self) -> ConfigResult<()> {
        let base = self.service.base_url.trim();
        let host = base
            .strip_prefix("http://")
            .or_else(|| base.strip_prefix("https://"))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "service.base_url must start with http:// or https://, got '{}'",
                    self.service.base_url
                ))
            })?;
        if host.trim_matches('/').is_empty() || host.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "service.base_url has no valid host: '{}'",
                self.service.base_url
            )));
        }

        if self.service.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "service.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.audio.channels != 1 {
            return Err(ConfigError::Invalid(format!(
                "audio.channels must be 1, got {}",
                self.audio.channels
            )));
        }

        if !(8000..=48000).contains(&self.audio.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "audio.sample_rate must be between 8000 and 48000, got {}",
                self.audio.sample_rate
            )));
        }

        if self.audio.fragment_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "audio.fragment_interval_ms must be greater than 0".to_string(),
            ));
        }

        if !(self.audio.max_gain > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "audio.max_gain must be positive, got {}",
                self.audio.max_gain
            )));
        }

        if !(self.audio.silence_threshold >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "audio.silence_threshold must not be negative, got {}",
                self.audio.silence_threshold
            )));
        }

        if self.workflow.auto_reset_secs == 0 {
            return Err(ConfigError::Invalid(
                "workflow.auto_reset_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置管理器
///
/// 负责配置文件的读写
pub struct ConfigManager;

impl ConfigManager {
    /// 从文件加载配置
    ///
    /// 文件不存在时返回默认配置；文件中缺失的字段使用默认值
    pub fn load(path: &Path) -> ConfigResult<AppConfig> {
        tracing::debug!(path = %path.display(), "Loading config");

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: AppConfig = serde_json::from_str(&content)?;
            tracing::info!(path = %path.display(), "Config loaded successfully");
            Ok(config)
        } else {
            tracing::info!("Config file not found, using defaults");
            Ok(AppConfig::default())
        }
    }

    /// 保存配置到文件
    pub fn save(path: &Path, config: &AppConfig) -> ConfigResult<()> {
        tracing::debug!(path = %path.display(), "Saving config");

        // 确保目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;

        tracing::info!(path = %path.display(), "Config saved successfully");
        Ok(())
    }

    /// 平台默认的配置文件路径
    pub fn default_path() -> ConfigResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// 平台默认的配置目录
    pub fn config_dir() -> ConfigResult<PathBuf> {
        ProjectDirs::from("com", "vpay", "vpay")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or_else(|| ConfigError::Path("could not determine home directory".to_string()))
    }
}
