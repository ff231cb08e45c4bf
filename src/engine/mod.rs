// ==========================================
// 网箱投喂控制系统 - 引擎层
// ==========================================
// 职责: 投喂策略、作业窗口、多网箱编排、事件分发
// 红线: 引擎不直接访问存储，只通过仓储接口
// ==========================================

pub mod events;
pub mod orchestrator;
pub mod repositories;
pub mod schedule;
pub mod strategy;

// 重导出核心引擎
pub use events::{EventDispatcher, FeedingEventSink, InMemoryEventSink, NoOpEventSink, SinkResult};
pub use orchestrator::{
    ControlSignal, FeedingOrchestrator, OrchestrationHandle, OrchestratorSettings,
};
pub use repositories::FeedingRepositories;
pub use schedule::{OperatingScheduleService, OperatingWindow};
pub use strategy::{
    AdjustedStrategy, CyclicFeedingStrategy, FeedingStrategy, ManualFeedingStrategy,
    ParameterUpdate, ScheduledFeedingStrategy,
};
