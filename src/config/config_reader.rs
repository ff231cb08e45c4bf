// ==========================================
// 网箱投喂控制系统 - 配置读取 Trait
// ==========================================
// 职责: 定义投喂引擎所需的配置读取接口
// 红线: 不包含配置写入
// ==========================================

use crate::config::error::ConfigResult;
use crate::config::feeding_config::FeedingConfig;
use crate::domain::line::LineProfile;
use crate::engine::schedule::OperatingWindow;
use async_trait::async_trait;

// ==========================================
// FeedingConfigReader Trait
// ==========================================
// 实现者: FeedingConfig (文件/环境变量)；远程配置中心按同一接口实现
#[async_trait]
pub trait FeedingConfigReader: Send + Sync {
    /// 每日作业窗口
    ///
    /// # 默认值
    /// - 06:00-18:00 UTC
    async fn get_operating_window(&self) -> ConfigResult<OperatingWindow>;

    /// 是否允许超出作业窗口
    ///
    /// # 默认值
    /// - false
    async fn get_allow_overtime(&self) -> ConfigResult<bool>;

    /// 选择器定位时间 (秒)
    ///
    /// # 默认值
    /// - 5.0
    async fn get_selector_positioning_secs(&self) -> ConfigResult<f64>;

    /// 全部投喂线配置
    async fn get_line_profiles(&self) -> ConfigResult<Vec<LineProfile>>;
}

#[async_trait]
impl FeedingConfigReader for FeedingConfig {
    async fn get_operating_window(&self) -> ConfigResult<OperatingWindow> {
        self.operating_window.to_window()
    }

    async fn get_allow_overtime(&self) -> ConfigResult<bool> {
        Ok(self.allow_overtime)
    }

    async fn get_selector_positioning_secs(&self) -> ConfigResult<f64> {
        Ok(self.selector_positioning_secs)
    }

    async fn get_line_profiles(&self) -> ConfigResult<Vec<LineProfile>> {
        Ok(self.lines.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reader_behind_trait_object() {
        let reader: Arc<dyn FeedingConfigReader> = Arc::new(FeedingConfig::default());
        let window = reader.get_operating_window().await.unwrap();
        assert_eq!(window.to_string(), "06:00-18:00 UTC");
        assert!(!reader.get_allow_overtime().await.unwrap());
        assert_eq!(reader.get_selector_positioning_secs().await.unwrap(), 5.0);
        assert!(reader.get_line_profiles().await.unwrap().is_empty());
    }
}
