// ==========================================
// 网箱投喂控制系统 - 原子访问作业记录
// ==========================================
// 职责: 记录一次访问 (单个出料口) 的目标、实际出料与子事件
// 红线: COMPLETED / STOPPED / FAILED 之后不可再修改
// ==========================================

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::event::{OperationEvent, OperationEventType};
use crate::domain::machine::MachineCommand;
use crate::domain::types::OperationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub session_id: String,
    pub line_id: String,
    pub cage_feeding_id: Option<String>,
    pub slot: u32,
    pub target_kg: f64,
    pub dispensed_kg: f64,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub command: MachineCommand,
    pub error_code: Option<String>,
    pub events: Vec<OperationEvent>,
}

impl Operation {
    /// 创建并立即进入 RUNNING
    pub fn start(
        session_id: &str,
        line_id: &str,
        cage_feeding_id: Option<String>,
        command: MachineCommand,
        started_at: DateTime<Utc>,
    ) -> Self {
        let mut operation = Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            line_id: line_id.to_string(),
            cage_feeding_id,
            slot: command.slot,
            target_kg: command.target_kg,
            dispensed_kg: 0.0,
            status: OperationStatus::Running,
            started_at,
            ended_at: None,
            command,
            error_code: None,
            events: Vec::new(),
        };
        operation.push_event(
            OperationEventType::Started,
            started_at,
            json!({ "slot": operation.slot, "target_kg": operation.target_kg }),
        );
        operation
    }

    fn push_event(&mut self, event_type: OperationEventType, at: DateTime<Utc>, payload: Value) {
        self.events.push(OperationEvent {
            event_type,
            occurred_at: at,
            payload,
        });
    }

    fn ensure_open(&self, action: &'static str) -> DomainResult<()> {
        if self.status.is_closed() {
            return Err(DomainError::invalid_transition("Operation", self.status, action));
        }
        Ok(())
    }

    /// 更新累计出料；出料量只增不减
    pub fn update_progress(&mut self, dispensed_kg: f64) -> DomainResult<()> {
        self.ensure_open("update_progress")?;
        if dispensed_kg > self.dispensed_kg {
            self.dispensed_kg = dispensed_kg;
        }
        Ok(())
    }

    /// 在线调整目标出料量
    pub fn retarget(&mut self, target_kg: f64) -> DomainResult<()> {
        self.ensure_open("retarget")?;
        self.target_kg = target_kg;
        self.command.target_kg = target_kg;
        Ok(())
    }

    /// 记录一次进度检查点 (按持久化节奏调用)
    pub fn checkpoint(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_open("checkpoint")?;
        let dispensed = self.dispensed_kg;
        self.push_event(
            OperationEventType::Progress,
            at,
            json!({ "dispensed_kg": dispensed }),
        );
        Ok(())
    }

    pub fn pause(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != OperationStatus::Running {
            return Err(DomainError::invalid_transition("Operation", self.status, "pause"));
        }
        self.status = OperationStatus::Paused;
        let dispensed = self.dispensed_kg;
        self.push_event(OperationEventType::Paused, at, json!({ "dispensed_kg": dispensed }));
        Ok(())
    }

    pub fn resume(&mut self, at: DateTime<Utc>) -> DomainResult<()> {
        if self.status != OperationStatus::Paused {
            return Err(DomainError::invalid_transition("Operation", self.status, "resume"));
        }
        self.status = OperationStatus::Running;
        self.push_event(OperationEventType::Resumed, at, Value::Null);
        Ok(())
    }

    pub fn complete(&mut self, dispensed_kg: f64, at: DateTime<Utc>) -> DomainResult<()> {
        self.close(OperationStatus::Completed, OperationEventType::Completed, dispensed_kg, at)
    }

    pub fn stop(&mut self, dispensed_kg: f64, at: DateTime<Utc>) -> DomainResult<()> {
        self.close(OperationStatus::Stopped, OperationEventType::Stopped, dispensed_kg, at)
    }

    pub fn fail(
        &mut self,
        error_code: Option<String>,
        dispensed_kg: f64,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.error_code = error_code;
        self.close(OperationStatus::Failed, OperationEventType::Failed, dispensed_kg, at)
    }

    fn close(
        &mut self,
        status: OperationStatus,
        event_type: OperationEventType,
        dispensed_kg: f64,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_open("close")?;
        self.update_progress(dispensed_kg)?;
        self.status = status;
        self.ended_at = Some(at);
        let payload = json!({
            "dispensed_kg": self.dispensed_kg,
            "error_code": self.error_code,
        });
        self.push_event(event_type, at, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::machine::VisitTiming;

    fn operation() -> Operation {
        let timing = VisitTiming {
            selector_positioning_secs: 5.0,
            blow_before_secs: 3.0,
            blow_after_secs: 4.0,
            transport_time_secs: 20.0,
        };
        let command = MachineCommand::new(2, 10.0, 5.0, 80.0, timing).unwrap();
        Operation::start("S1", "L1", None, command, Utc::now())
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut op = operation();
        op.update_progress(3.0).unwrap();
        op.update_progress(2.0).unwrap();
        assert_eq!(op.dispensed_kg, 3.0);
    }

    #[test]
    fn test_closed_operation_is_immutable() {
        let mut op = operation();
        op.complete(10.0, Utc::now()).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert!(op.ended_at.is_some());

        assert!(op.update_progress(11.0).is_err());
        assert!(op.stop(11.0, Utc::now()).is_err());
        assert_eq!(op.dispensed_kg, 10.0);
    }

    #[test]
    fn test_fail_records_error_code() {
        let mut op = operation();
        op.fail(Some("E42".to_string()), 1.5, Utc::now()).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.error_code.as_deref(), Some("E42"));
        assert_eq!(op.events.last().unwrap().event_type, OperationEventType::Failed);
    }

    #[test]
    fn test_pause_resume_cycle() {
        let mut op = operation();
        op.pause(Utc::now()).unwrap();
        assert!(op.pause(Utc::now()).is_err());
        op.resume(Utc::now()).unwrap();
        assert_eq!(op.status, OperationStatus::Running);
    }
}
