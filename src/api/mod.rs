// ==========================================
// 网箱投喂控制系统 - API 层
// ==========================================
// 职责: 提供投喂用例接口，供外部传输层 (HTTP/CLI) 调用
// ==========================================

pub mod dto;
pub mod error;
pub mod feeding_api;
pub mod line_locks;

// 重导出核心类型
pub use dto::{
    CageFeedingRequest, FeedingLaunch, LineStatusView, ManualFeedingRequest,
    MultiCageFeedingRequest, VisitEstimate,
};
pub use error::{ApiError, ApiResult};
pub use feeding_api::FeedingApi;
pub use line_locks::LineLocks;
