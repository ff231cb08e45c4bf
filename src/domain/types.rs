// ==========================================
// 网箱投喂控制系统 - 领域类型定义
// ==========================================
// 职责: 会话/作业/网箱分配/访问阶段的状态枚举
// 红线: 状态只能通过所属实体的转换方法修改
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 会话类型 (Session Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    Manual,    // 手动投喂
    Cyclic,    // 循环投喂
    Scheduled, // 计划投喂
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::Manual => write!(f, "MANUAL"),
            SessionType::Cyclic => write!(f, "CYCLIC"),
            SessionType::Scheduled => write!(f, "SCHEDULED"),
        }
    }
}

// ==========================================
// 会话状态 (Session Status)
// ==========================================
// 转换: CREATED → RUNNING ⇄ PAUSED → COMPLETED | CANCELLED | INTERRUPTED
// 序列化格式: SCREAMING_SNAKE_CASE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,     // 已创建
    Running,     // 投喂中
    Paused,      // 已暂停
    Completed,   // 已完成
    Cancelled,   // 已取消
    Interrupted, // 已中断
}

impl SessionStatus {
    /// 终态不可再变更
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Interrupted
        )
    }

    /// 同一条投喂线同时最多一个活跃会话
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "CREATED",
            SessionStatus::Running => "RUNNING",
            SessionStatus::Paused => "PAUSED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Cancelled => "CANCELLED",
            SessionStatus::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 网箱投喂模式 (Cage Feeding Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CageFeedingMode {
    Normal,  // 正常投喂
    Pause,   // 暂停 (本轮跳过)
    Fasting, // 禁食 (本轮跳过)
}

impl CageFeedingMode {
    /// PAUSE 与 FASTING 均不安排访问
    pub fn is_skipped(&self) -> bool {
        !matches!(self, CageFeedingMode::Normal)
    }
}

impl fmt::Display for CageFeedingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CageFeedingMode::Normal => write!(f, "NORMAL"),
            CageFeedingMode::Pause => write!(f, "PAUSE"),
            CageFeedingMode::Fasting => write!(f, "FASTING"),
        }
    }
}

// ==========================================
// 网箱分配状态 (Cage Feeding Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CageFeedingStatus {
    Pending,    // 待执行
    InProgress, // 执行中
    Completed,  // 已完成
    Cancelled,  // 已取消
}

impl fmt::Display for CageFeedingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CageFeedingStatus::Pending => write!(f, "PENDING"),
            CageFeedingStatus::InProgress => write!(f, "IN_PROGRESS"),
            CageFeedingStatus::Completed => write!(f, "COMPLETED"),
            CageFeedingStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ==========================================
// 作业状态 (Operation Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Running,   // 执行中
    Paused,    // 已暂停
    Completed, // 已完成
    Stopped,   // 被停止
    Failed,    // 设备故障
}

impl OperationStatus {
    /// 关闭后的作业不可变更
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Stopped | OperationStatus::Failed
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Running => write!(f, "RUNNING"),
            OperationStatus::Paused => write!(f, "PAUSED"),
            OperationStatus::Completed => write!(f, "COMPLETED"),
            OperationStatus::Stopped => write!(f, "STOPPED"),
            OperationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

// ==========================================
// 设备工作模式 (Machine Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineMode {
    Manual,
    Cyclic,
    Scheduled,
}

impl fmt::Display for MachineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineMode::Manual => write!(f, "MANUAL"),
            MachineMode::Cyclic => write!(f, "CYCLIC"),
            MachineMode::Scheduled => write!(f, "SCHEDULED"),
        }
    }
}

// ==========================================
// 访问阶段 (Visit Stage)
// ==========================================
// 顺序: POSITIONING_SELECTOR → BLOWING_BEFORE → FEEDING → BLOWING_AFTER → COMPLETED
// IDLE: 无访问; STOPPED: 被强制停止
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitStage {
    Idle,
    PositioningSelector,
    BlowingBefore,
    Feeding,
    BlowingAfter,
    Completed,
    Stopped,
}

impl VisitStage {
    /// 阶段序号，用于校验阶段不回退
    pub fn ordinal(&self) -> u8 {
        match self {
            VisitStage::Idle => 0,
            VisitStage::PositioningSelector => 1,
            VisitStage::BlowingBefore => 2,
            VisitStage::Feeding => 3,
            VisitStage::BlowingAfter => 4,
            VisitStage::Completed => 5,
            VisitStage::Stopped => 6,
        }
    }

    /// 访问已结束 (正常完成或被停止)
    pub fn is_finished(&self) -> bool {
        matches!(self, VisitStage::Completed | VisitStage::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStage::Idle => "IDLE",
            VisitStage::PositioningSelector => "POSITIONING_SELECTOR",
            VisitStage::BlowingBefore => "BLOWING_BEFORE",
            VisitStage::Feeding => "FEEDING",
            VisitStage::BlowingAfter => "BLOWING_AFTER",
            VisitStage::Completed => "COMPLETED",
            VisitStage::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for VisitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_terminal() {
        assert!(!SessionStatus::Created.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Paused.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(SessionStatus::Interrupted.is_terminal());
    }

    #[test]
    fn test_visit_stage_ordering() {
        let sequence = [
            VisitStage::PositioningSelector,
            VisitStage::BlowingBefore,
            VisitStage::Feeding,
            VisitStage::BlowingAfter,
            VisitStage::Completed,
        ];
        for pair in sequence.windows(2) {
            assert!(pair[0].ordinal() < pair[1].ordinal());
        }
    }

    #[test]
    fn test_serialization_format() {
        let json = serde_json::to_string(&VisitStage::PositioningSelector).unwrap();
        assert_eq!(json, "\"POSITIONING_SELECTOR\"");

        let status: SessionStatus = serde_json::from_str("\"INTERRUPTED\"").unwrap();
        assert_eq!(status, SessionStatus::Interrupted);
    }

    #[test]
    fn test_skipped_modes() {
        assert!(!CageFeedingMode::Normal.is_skipped());
        assert!(CageFeedingMode::Pause.is_skipped());
        assert!(CageFeedingMode::Fasting.is_skipped());
    }
}
