// ==========================================
// 网箱投喂控制系统 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合编排器与用例层所需的仓储和事件接收方
// ==========================================

use std::sync::Arc;

use crate::engine::events::EventDispatcher;
use crate::repository::{
    InMemoryLineCatalog, InMemoryOperationRepository, InMemorySessionRepository, LineCatalog,
    OperationRepository, SessionRepository,
};

/// 投喂引擎仓储集合
///
/// # 包含的仓储
/// - `session_repo`: 投喂会话
/// - `operation_repo`: 访问作业记录
/// - `line_catalog`: 投喂线配置
/// - `events`: 会话事件分发
#[derive(Clone)]
pub struct FeedingRepositories {
    pub session_repo: Arc<dyn SessionRepository>,
    pub operation_repo: Arc<dyn OperationRepository>,
    pub line_catalog: Arc<dyn LineCatalog>,
    pub events: EventDispatcher,
}

impl FeedingRepositories {
    pub fn new(
        session_repo: Arc<dyn SessionRepository>,
        operation_repo: Arc<dyn OperationRepository>,
        line_catalog: Arc<dyn LineCatalog>,
        events: EventDispatcher,
    ) -> Self {
        Self {
            session_repo,
            operation_repo,
            line_catalog,
            events,
        }
    }

    /// 全内存实现 (演示与测试)
    pub fn in_memory(line_catalog: InMemoryLineCatalog, events: EventDispatcher) -> Self {
        Self::new(
            Arc::new(InMemorySessionRepository::new()),
            Arc::new(InMemoryOperationRepository::new()),
            Arc::new(line_catalog),
            events,
        )
    }

    pub fn session_repo(&self) -> &Arc<dyn SessionRepository> {
        &self.session_repo
    }

    pub fn operation_repo(&self) -> &Arc<dyn OperationRepository> {
        &self.operation_repo
    }

    pub fn line_catalog(&self) -> &Arc<dyn LineCatalog> {
        &self.line_catalog
    }
}
