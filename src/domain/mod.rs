// ==========================================
// 网箱投喂控制系统 - 领域模型层
// ==========================================
// 职责: 定义投喂会话、网箱分配、访问作业、设备配置等领域实体
// 红线: 不含数据访问逻辑，不含编排逻辑
// ==========================================

pub mod cage_feeding;
pub mod error;
pub mod event;
pub mod line;
pub mod machine;
pub mod operation;
pub mod session;
pub mod types;

// 重导出核心类型
pub use cage_feeding::CageFeeding;
pub use error::{DomainError, DomainResult};
pub use event::{FeedingEvent, FeedingEventType, OperationEvent, OperationEventType};
pub use line::{CageRoute, LineProfile};
pub use machine::{MachineCommand, MachineConfiguration, MachineStatus, VisitTiming};
pub use operation::Operation;
pub use session::{FeedingSession, InFlightVisit};
pub use types::{
    CageFeedingMode, CageFeedingStatus, MachineMode, OperationStatus, SessionStatus, SessionType,
    VisitStage,
};
