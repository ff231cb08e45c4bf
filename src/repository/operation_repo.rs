// ==========================================
// 网箱投喂控制系统 - 访问作业仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::operation::Operation;
use crate::repository::error::{RepositoryError, RepositoryResult};
use std::sync::{Mutex, MutexGuard};

pub trait OperationRepository: Send + Sync {
    /// 保存 (插入或覆盖) 作业记录
    fn save(&self, operation: &Operation) -> RepositoryResult<()>;

    /// 按会话查询作业记录 (按开始时间)
    fn find_by_session(&self, session_id: &str) -> RepositoryResult<Vec<Operation>>;
}

#[derive(Debug, Default)]
pub struct InMemoryOperationRepository {
    operations: Mutex<Vec<Operation>>,
}

impl InMemoryOperationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_store(&self) -> RepositoryResult<MutexGuard<'_, Vec<Operation>>> {
        self.operations
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl OperationRepository for InMemoryOperationRepository {
    fn save(&self, operation: &Operation) -> RepositoryResult<()> {
        let mut store = self.get_store()?;
        match store.iter_mut().find(|o| o.id == operation.id) {
            Some(existing) => *existing = operation.clone(),
            None => store.push(operation.clone()),
        }
        Ok(())
    }

    fn find_by_session(&self, session_id: &str) -> RepositoryResult<Vec<Operation>> {
        let store = self.get_store()?;
        let mut operations: Vec<Operation> = store
            .iter()
            .filter(|o| o.session_id == session_id)
            .cloned()
            .collect();
        operations.sort_by_key(|o| o.started_at);
        Ok(operations)
    }
}
