// ==========================================
// 网箱投喂控制系统 - API 层错误类型
// ==========================================
// 职责: 把领域/设备/仓储错误转换为面向调用方的错误消息
// ==========================================

use crate::config::ConfigError;
use crate::domain::error::DomainError;
use crate::driver::DriverError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API 层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("无效的状态转换: entity={entity}, from={from}, action={action}")]
    InvalidStateTransition {
        entity: String,
        from: String,
        action: String,
    },

    // ==========================================
    // 作业窗口错误
    // ==========================================
    #[error("作业窗口限制: {0}")]
    OutsideOperatingWindow(String),

    // ==========================================
    // 设备错误
    // ==========================================
    #[error("设备错误: {0}")]
    DeviceError(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("存储错误: {0}")]
    StorageError(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 DomainError 转换
// ==========================================
impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidStateTransition {
                entity,
                from,
                action,
            } => ApiError::InvalidStateTransition {
                entity: entity.to_string(),
                from,
                action: action.to_string(),
            },
            DomainError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            DomainError::Validation(msg) => ApiError::ValidationError(msg),
            e @ DomainError::OutsideOperatingWindow { .. }
            | e @ DomainError::ExceedsOperatingWindow { .. } => {
                ApiError::OutsideOperatingWindow(e.to_string())
            }
            DomainError::Device(e) => e.into(),
            DomainError::Repository(msg) => ApiError::StorageError(msg),
        }
    }
}

// ==========================================
// 从 DriverError 转换
// ==========================================
impl From<DriverError> for ApiError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::LineNotFound(line_id) => {
                ApiError::NotFound(format!("投喂线(id={})不存在", line_id))
            }
            DriverError::InvalidCommand(msg) => ApiError::InvalidInput(msg),
            DriverError::Communication(msg) => ApiError::DeviceError(msg),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::StorageError(format!("存储锁获取失败: {}", msg))
            }
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
