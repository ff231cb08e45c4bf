// ==========================================
// 网箱投喂控制系统 - 投喂线互斥锁
// ==========================================
// 用途: 同一投喂线上的用例串行执行 ("每线最多一个活动会话"在锁内检查)
// 说明: 不同投喂线之间没有共享状态，可完全并行
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct LineLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LineLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取投喂线锁 (按需创建)，持有期间同线其他用例等待
    pub async fn acquire(&self, line_id: &str) -> ApiResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|e| ApiError::InternalError(format!("投喂线锁表获取失败: {}", e)))?;
            locks
                .entry(line_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }
}
