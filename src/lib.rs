// ==========================================
// 网箱投喂控制系统 - 核心库
// ==========================================
// 系统定位: 投喂作业控制引擎 (会话状态机 + 策略 + 设备驱动 + 多网箱编排 + 作业窗口)
// 外部协作方: 存储、传输层、告警由调用方按接口提供
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 设备驱动层 - 设备能力接口与模拟驱动
pub mod driver;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 策略、编排、作业窗口
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 日志系统
pub mod logging;

// API 层 - 投喂用例
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    CageFeedingMode, CageFeedingStatus, MachineMode, OperationStatus, SessionStatus, SessionType,
    VisitStage,
};

// 领域实体
pub use domain::{
    CageFeeding, DomainError, DomainResult, FeedingEvent, FeedingSession, LineProfile,
    MachineCommand, MachineConfiguration, MachineStatus, Operation, VisitTiming,
};

// 设备驱动
pub use driver::{Clock, DeviceDriver, ManualClock, SimulatedDriver, SystemClock};

// 引擎
pub use engine::{
    FeedingOrchestrator, FeedingStrategy, ManualFeedingStrategy, OperatingScheduleService,
    OperatingWindow,
};

// 配置
pub use config::FeedingConfig;

// API
pub use api::{ApiError, ApiResult, FeedingApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "网箱投喂控制系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
