// ==========================================
// 网箱投喂控制系统 - 投喂会话仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 约束: 同一投喂线最多一个非终态会话 (保存时校验)
// ==========================================

use crate::domain::session::FeedingSession;
use crate::repository::error::{RepositoryError, RepositoryResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

// ==========================================
// SessionRepository Trait
// ==========================================
// 实现者: InMemorySessionRepository；持久化存储由外部协作方实现
pub trait SessionRepository: Send + Sync {
    /// 保存 (插入或覆盖) 会话快照
    fn save(&self, session: &FeedingSession) -> RepositoryResult<()>;

    fn find_by_id(&self, session_id: &str) -> RepositoryResult<Option<FeedingSession>>;

    /// 查询投喂线上的非终态会话
    fn find_active_by_line(&self, line_id: &str) -> RepositoryResult<Option<FeedingSession>>;

    /// 查询投喂线上最近创建的会话 (含终态)
    fn find_latest_by_line(&self, line_id: &str) -> RepositoryResult<Option<FeedingSession>>;
}

// ==========================================
// InMemorySessionRepository
// ==========================================
#[derive(Debug, Default)]
pub struct InMemorySessionRepository {
    sessions: Mutex<HashMap<String, FeedingSession>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_store(&self) -> RepositoryResult<MutexGuard<'_, HashMap<String, FeedingSession>>> {
        self.sessions
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按投喂线列出全部会话 (按创建时间)
    pub fn list_by_line(&self, line_id: &str) -> RepositoryResult<Vec<FeedingSession>> {
        let store = self.get_store()?;
        let mut sessions: Vec<FeedingSession> = store
            .values()
            .filter(|s| s.line_id == line_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }
}

impl SessionRepository for InMemorySessionRepository {
    fn save(&self, session: &FeedingSession) -> RepositoryResult<()> {
        let mut store = self.get_store()?;
        if session.is_active() {
            let conflict = store
                .values()
                .find(|s| s.line_id == session.line_id && s.id != session.id && s.is_active());
            if let Some(existing) = conflict {
                return Err(RepositoryError::UniqueConstraintViolation(format!(
                    "投喂线 {} 已有进行中的会话 {}",
                    session.line_id, existing.id
                )));
            }
        }
        store.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn find_by_id(&self, session_id: &str) -> RepositoryResult<Option<FeedingSession>> {
        Ok(self.get_store()?.get(session_id).cloned())
    }

    fn find_active_by_line(&self, line_id: &str) -> RepositoryResult<Option<FeedingSession>> {
        Ok(self
            .get_store()?
            .values()
            .find(|s| s.line_id == line_id && s.is_active())
            .cloned())
    }

    fn find_latest_by_line(&self, line_id: &str) -> RepositoryResult<Option<FeedingSession>> {
        Ok(self
            .get_store()?
            .values()
            .filter(|s| s.line_id == line_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }
}
