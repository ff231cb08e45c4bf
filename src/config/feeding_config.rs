// ==========================================
// 网箱投喂控制系统 - 投喂配置
// ==========================================
// 来源: JSON 配置文件 (路径见 FEEDING_CONFIG)，缺省字段取默认值
// 覆写: FEEDING_ALLOW_OVERTIME / FEEDING_TIMEZONE 环境变量
// ==========================================

use crate::config::error::{ConfigError, ConfigResult};
use crate::domain::line::LineProfile;
use crate::engine::schedule::OperatingWindow;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

pub const ENV_CONFIG_PATH: &str = "FEEDING_CONFIG";
pub const ENV_ALLOW_OVERTIME: &str = "FEEDING_ALLOW_OVERTIME";
pub const ENV_TIMEZONE: &str = "FEEDING_TIMEZONE";

fn is_true(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// 每日作业窗口配置 (本地时间 HH:MM[:SS] + IANA 时区)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatingWindowConfig {
    pub start: String,
    pub end: String,
    pub timezone: String,
}

impl Default for OperatingWindowConfig {
    fn default() -> Self {
        Self {
            start: "06:00".to_string(),
            end: "18:00".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}

impl OperatingWindowConfig {
    pub fn to_window(&self) -> ConfigResult<OperatingWindow> {
        OperatingWindow::parse(&self.start, &self.end, &self.timezone)
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedingConfig {
    pub operating_window: OperatingWindowConfig,
    /// 选择器定位时间 (秒)，全线统一
    pub selector_positioning_secs: f64,
    pub allow_overtime: bool,
    /// 编排器状态轮询间隔 (毫秒)
    pub poll_interval_ms: u64,
    /// 进度持久化节奏 (秒)
    pub persist_interval_secs: f64,
    pub lines: Vec<LineProfile>,
}

impl Default for FeedingConfig {
    fn default() -> Self {
        Self {
            operating_window: OperatingWindowConfig::default(),
            selector_positioning_secs: 5.0,
            allow_overtime: false,
            poll_interval_ms: 1000,
            persist_interval_secs: 5.0,
            lines: Vec::new(),
        }
    }
}

impl FeedingConfig {
    /// 从 JSON 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: FeedingConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        info!(path = %path.display(), lines = config.lines.len(), "投喂配置已加载");
        Ok(config)
    }

    /// 按环境变量加载：FEEDING_CONFIG 指定文件，未设置时使用默认值
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim())?,
            _ => {
                debug!("未设置 {}，使用默认投喂配置", ENV_CONFIG_PATH);
                Self::default()
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        if let Ok(value) = std::env::var(ENV_ALLOW_OVERTIME) {
            self.allow_overtime = is_true(&value).ok_or_else(|| ConfigError::ConfigValueError {
                key: ENV_ALLOW_OVERTIME.to_string(),
                value: value.clone(),
                message: "期望 true/false".to_string(),
            })?;
        }
        if let Ok(value) = std::env::var(ENV_TIMEZONE) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                self.operating_window.timezone = trimmed.to_string();
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.operating_window.to_window()?;

        if !self.selector_positioning_secs.is_finite() || self.selector_positioning_secs < 0.0 {
            return Err(ConfigError::Validation(
                "selector_positioning_secs 不能为负数".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Validation("poll_interval_ms 必须大于 0".to_string()));
        }
        if !self.persist_interval_secs.is_finite() || self.persist_interval_secs <= 0.0 {
            return Err(ConfigError::Validation(
                "persist_interval_secs 必须大于 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for line in &self.lines {
            line.validate()
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
            if !seen.insert(line.line_id.as_str()) {
                return Err(ConfigError::Validation(format!("重复的投喂线: {}", line.line_id)));
            }
        }
        Ok(())
    }

    pub fn line(&self, line_id: &str) -> Option<&LineProfile> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = FeedingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.operating_window.start, "06:00");
        assert_eq!(config.selector_positioning_secs, 5.0);
        assert!(!config.allow_overtime);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FeedingConfig =
            serde_json::from_str(r#"{ "allow_overtime": true, "poll_interval_ms": 250 }"#).unwrap();
        assert!(config.allow_overtime);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.persist_interval_secs, 5.0);
        assert_eq!(config.operating_window.timezone, "UTC");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FeedingConfig::default();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = FeedingConfig::default();
        config.operating_window.timezone = "Nowhere/Land".to_string();
        assert!(config.validate().is_err());

        let mut config = FeedingConfig::default();
        config.operating_window.end = "06:00".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_true() {
        assert_eq!(is_true("YES"), Some(true));
        assert_eq!(is_true(" 0 "), Some(false));
        assert_eq!(is_true("maybe"), None);
    }
}
