// ==========================================
// 网箱投喂控制系统 - 网箱投喂分配
// ==========================================
// 职责: 会话内单个网箱的投喂量/访问次数分配及进度
// 红线: execution_order / programmed_kg / programmed_visits 必须严格为正
// ==========================================

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::types::{CageFeedingMode, CageFeedingStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CageFeeding {
    pub id: String,
    pub cage_id: String,
    /// 下料器/料仓引用
    pub doser_id: String,
    pub execution_order: u32,
    pub programmed_kg: f64,
    pub programmed_visits: u32,
    pub rate_kg_per_min: f64,
    pub mode: CageFeedingMode,
    pub status: CageFeedingStatus,
    /// 已完成访问 + 当前访问的累计出料
    pub dispensed_kg: f64,
    pub completed_visits: u32,
    /// 当前访问已计入 dispensed_kg 的出料
    #[serde(default)]
    pub in_flight_kg: f64,
}

impl CageFeeding {
    pub fn new(
        cage_id: impl Into<String>,
        doser_id: impl Into<String>,
        execution_order: u32,
        programmed_kg: f64,
        programmed_visits: u32,
        rate_kg_per_min: f64,
        mode: CageFeedingMode,
    ) -> DomainResult<Self> {
        let cage_id = cage_id.into();
        if execution_order == 0 {
            return Err(DomainError::Validation(format!(
                "网箱 {} 的 execution_order 必须大于 0",
                cage_id
            )));
        }
        if programmed_visits == 0 {
            return Err(DomainError::Validation(format!(
                "网箱 {} 的 programmed_visits 必须大于 0",
                cage_id
            )));
        }
        if !programmed_kg.is_finite() || programmed_kg <= 0.0 {
            return Err(DomainError::Validation(format!(
                "网箱 {} 的 programmed_kg 必须大于 0: {}",
                cage_id, programmed_kg
            )));
        }
        if !rate_kg_per_min.is_finite() || rate_kg_per_min <= 0.0 {
            return Err(DomainError::Validation(format!(
                "网箱 {} 的 rate_kg_per_min 必须大于 0: {}",
                cage_id, rate_kg_per_min
            )));
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            cage_id,
            doser_id: doser_id.into(),
            execution_order,
            programmed_kg,
            programmed_visits,
            rate_kg_per_min,
            mode,
            status: CageFeedingStatus::Pending,
            dispensed_kg: 0.0,
            completed_visits: 0,
            in_flight_kg: 0.0,
        })
    }

    pub fn remaining_visits(&self) -> u32 {
        self.programmed_visits.saturating_sub(self.completed_visits)
    }

    pub fn remaining_kg(&self) -> f64 {
        (self.programmed_kg - self.dispensed_kg).max(0.0)
    }

    /// 下一次访问的目标投喂量：剩余量平均分摊到剩余访问
    pub fn next_visit_target_kg(&self) -> f64 {
        match self.remaining_visits() {
            0 => 0.0,
            visits => self.remaining_kg() / visits as f64,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            CageFeedingStatus::Completed | CageFeedingStatus::Cancelled
        )
    }

    /// PENDING → IN_PROGRESS (已在执行中则保持)
    pub fn begin(&mut self) -> DomainResult<()> {
        match self.status {
            CageFeedingStatus::Pending | CageFeedingStatus::InProgress => {
                self.status = CageFeedingStatus::InProgress;
                Ok(())
            }
            other => Err(DomainError::invalid_transition("CageFeeding", other, "begin")),
        }
    }

    /// 同步当前访问的累计出料；只累加增量
    pub fn observe_visit(&mut self, visit_kg: f64) {
        if visit_kg > self.in_flight_kg {
            self.dispensed_kg += visit_kg - self.in_flight_kg;
            self.in_flight_kg = visit_kg;
        }
    }

    /// 记录一次完成的访问
    pub fn record_visit(&mut self, dispensed_kg: f64) -> DomainResult<()> {
        if self.status != CageFeedingStatus::InProgress {
            return Err(DomainError::invalid_transition(
                "CageFeeding",
                self.status,
                "record_visit",
            ));
        }
        self.observe_visit(dispensed_kg);
        self.in_flight_kg = 0.0;
        self.completed_visits += 1;
        Ok(())
    }

    pub fn complete(&mut self) -> DomainResult<()> {
        if self.status != CageFeedingStatus::InProgress {
            return Err(DomainError::invalid_transition(
                "CageFeeding",
                self.status,
                "complete",
            ));
        }
        self.status = CageFeedingStatus::Completed;
        Ok(())
    }

    /// 取消未完成的分配；已结束的分配保持不变
    pub fn cancel(&mut self) {
        if !self.is_finished() {
            self.status = CageFeedingStatus::Cancelled;
        }
    }
}
