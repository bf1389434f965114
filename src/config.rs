// 配置管理模块

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::fs;
use crate::error::{RuntimeError, RuntimeResult};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::info;

static CONFIG: OnceCell<RwLock<RuntimeConfig>> = OnceCell::new();
static CONFIG_PATH: OnceCell<std::path::PathBuf> = OnceCell::new();

/// 默认背景移除模型
pub const DEFAULT_REMOVE_BG_MODEL: &str = "briaai/RMBG-1.4";

/// 日志级别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// 转换为 tracing 过滤器字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn default_gpu_enabled() -> bool {
    true
}

fn default_remove_bg_model() -> String {
    DEFAULT_REMOVE_BG_MODEL.to_string()
}

/// 运行时配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// 日志级别
    #[serde(default)]
    pub log_level: LogLevel,
    /// 是否允许使用 GPU 后端；关闭后 auto 总是解析为 CPU
    #[serde(default = "default_gpu_enabled")]
    pub gpu_enabled: bool,
    /// 背景移除 worker 加载的分割模型
    #[serde(default = "default_remove_bg_model")]
    pub remove_bg_model: String,
    /// 覆盖 worker 的掩码阈值 (0.0 - 1.0)，为空时使用协议默认值
    #[serde(default)]
    pub mask_threshold: Option<f32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            gpu_enabled: true,
            remove_bg_model: default_remove_bg_model(),
            mask_threshold: None,
        }
    }
}

impl RuntimeConfig {
    /// 从文件读取配置，文件不存在时写入默认配置
    pub fn load(config_path: &Path) -> RuntimeResult<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            let mut config: RuntimeConfig = serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("[CONFIG] 配置文件 JSON 解析失败: {}，使用默认配置", e);
                RuntimeConfig::default()
            });
            if let Err(e) = config.validate() {
                tracing::warn!("[CONFIG] {}，忽略掩码阈值", e);
                config.mask_threshold = None;
            }
            Ok(config)
        } else {
            let config = RuntimeConfig::default();
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let content = serde_json::to_string_pretty(&config)?;
            fs::write(config_path, content)?;
            Ok(config)
        }
    }

    /// 掩码阈值必须在 0.0 - 1.0 之间
    pub fn validate(&self) -> RuntimeResult<()> {
        match self.mask_threshold {
            Some(t) if !(0.0..=1.0).contains(&t) => Err(RuntimeError::Config(format!(
                "掩码阈值超出范围: {}", t
            ))),
            _ => Ok(()),
        }
    }

    /// 写回配置文件
    pub fn save(&self, config_path: &Path) -> RuntimeResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, content)?;
        Ok(())
    }
}

/// 初始化全局配置
pub fn init_config(config_path: &Path) -> RuntimeResult<()> {
    CONFIG_PATH.set(config_path.to_path_buf())
        .map_err(|_| RuntimeError::Config("配置路径已初始化".to_string()))?;

    let config = RuntimeConfig::load(config_path)?;

    info!("[CONFIG] 配置已加载");

    CONFIG.set(RwLock::new(config))
        .map_err(|_| RuntimeError::Config("配置已初始化".to_string()))?;

    Ok(())
}

/// 获取配置，未初始化时返回默认值
pub fn get_config() -> RuntimeConfig {
    CONFIG.get()
        .map(|c| c.read().clone())
        .unwrap_or_default()
}

/// 更新配置
pub fn update_config(config: RuntimeConfig) -> RuntimeResult<()> {
    config.validate()?;
    info!("[CONFIG] 配置更新");

    // 先写入文件，成功后再更新内存
    if let Some(path) = CONFIG_PATH.get() {
        config.save(path)?;
    }

    if let Some(lock) = CONFIG.get() {
        let mut current = lock.write();
        *current = config;
    }

    Ok(())
}
