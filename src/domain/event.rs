// ==========================================
// 网箱投喂控制系统 - 领域事件
// ==========================================
// 红线: 事件只追加，不修改
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==========================================
// 会话事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedingEventType {
    SessionStarted,
    SessionPaused,
    SessionResumed,
    ParamChange,
    VisitStarted,
    VisitCompleted,
    VisitSkipped,
    VisitFailed,
    SessionCompleted,
    SessionCancelled,
    SessionInterrupted,
}

impl FeedingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedingEventType::SessionStarted => "SESSION_STARTED",
            FeedingEventType::SessionPaused => "SESSION_PAUSED",
            FeedingEventType::SessionResumed => "SESSION_RESUMED",
            FeedingEventType::ParamChange => "PARAM_CHANGE",
            FeedingEventType::VisitStarted => "VISIT_STARTED",
            FeedingEventType::VisitCompleted => "VISIT_COMPLETED",
            FeedingEventType::VisitSkipped => "VISIT_SKIPPED",
            FeedingEventType::VisitFailed => "VISIT_FAILED",
            FeedingEventType::SessionCompleted => "SESSION_COMPLETED",
            FeedingEventType::SessionCancelled => "SESSION_CANCELLED",
            FeedingEventType::SessionInterrupted => "SESSION_INTERRUPTED",
        }
    }
}

/// 会话事件；id 供接收方去重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingEvent {
    pub id: String,
    pub session_id: String,
    pub line_id: String,
    pub event_type: FeedingEventType,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}

// ==========================================
// 作业事件类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationEventType {
    Started,
    Progress,
    Paused,
    Resumed,
    Completed,
    Stopped,
    Failed,
}

/// 作业事件 (作业自身的子日志)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEvent {
    pub event_type: OperationEventType,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}
