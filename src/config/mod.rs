// ==========================================
// 网箱投喂控制系统 - 配置层
// ==========================================
// 职责: 作业窗口、时序常量、轮询节奏、投喂线配置
// 存储: JSON 配置文件 + 环境变量覆写
// ==========================================

pub mod config_reader;
pub mod error;
pub mod feeding_config;

pub use config_reader::FeedingConfigReader;
pub use error::{ConfigError, ConfigResult};
pub use feeding_config::{FeedingConfig, OperatingWindowConfig};
