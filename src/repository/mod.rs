// ==========================================
// 网箱投喂控制系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 定义会话/作业/投喂线的数据访问接口，提供内存实现
// 说明: 持久化存储由外部协作方按同一接口实现
// ==========================================

pub mod error;
pub mod line_repo;
pub mod operation_repo;
pub mod session_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use line_repo::{InMemoryLineCatalog, LineCatalog};
pub use operation_repo::{InMemoryOperationRepository, OperationRepository};
pub use session_repo::{InMemorySessionRepository, SessionRepository};
