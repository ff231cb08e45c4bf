// ==========================================
// 网箱投喂控制系统 - 领域层错误类型
// ==========================================
// 分类: 非法状态转换 / 未找到 / 参数校验 / 作业窗口 / 设备
// 工具: thiserror 派生宏
// ==========================================

use crate::driver::DriverError;
use thiserror::Error;

/// 领域层错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    // ===== 状态机错误 =====
    #[error("无效的状态转换: entity={entity}, from={from}, action={action}")]
    InvalidStateTransition {
        entity: &'static str,
        from: String,
        action: &'static str,
    },

    // ===== 引用错误 =====
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: &'static str, id: String },

    // ===== 参数校验错误 =====
    #[error("数据验证失败: {0}")]
    Validation(String),

    // ===== 作业窗口错误 =====
    #[error("当前不在作业窗口内: window={window}, local_time={local_time}")]
    OutsideOperatingWindow { window: String, local_time: String },

    #[error("预计时长超出作业窗口剩余时间: estimated={estimated_secs:.1}s, remaining={remaining_secs:.1}s")]
    ExceedsOperatingWindow {
        estimated_secs: f64,
        remaining_secs: f64,
    },

    // ===== 设备错误 =====
    #[error("设备错误: {0}")]
    Device(#[from] DriverError),

    // ===== 仓储错误 =====
    #[error("仓储错误: {0}")]
    Repository(String),
}

impl DomainError {
    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        action: &'static str,
    ) -> Self {
        DomainError::InvalidStateTransition {
            entity,
            from: from.to_string(),
            action,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        DomainError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// 是否为作业窗口相关的拒绝
    pub fn is_scheduling(&self) -> bool {
        matches!(
            self,
            DomainError::OutsideOperatingWindow { .. } | DomainError::ExceedsOperatingWindow { .. }
        )
    }
}

/// Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;
