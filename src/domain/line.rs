// ==========================================
// 网箱投喂控制系统 - 投喂线与出料路由
// ==========================================
// 职责: 投喂线参数 (下料能力、前后吹时长) 与网箱→出料口路由
// ==========================================

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::machine::VisitTiming;
use serde::{Deserialize, Serialize};

/// 网箱路由：选择器出料口与输送时长
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CageRoute {
    pub cage_id: String,
    pub slot: u32,
    /// 最后一粒饲料从出料口到达网箱所需时间 (秒)
    pub transport_time_secs: f64,
}

/// 投喂线参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineProfile {
    pub line_id: String,
    #[serde(default)]
    pub name: String,
    /// 下料器 100% 转速时的出料速率 (kg/min)
    pub doser_capacity_kg_per_min: f64,
    pub blow_before_secs: f64,
    pub blow_after_secs: f64,
    #[serde(default)]
    pub routes: Vec<CageRoute>,
}

impl LineProfile {
    pub fn validate(&self) -> DomainResult<()> {
        if self.line_id.trim().is_empty() {
            return Err(DomainError::Validation("line_id 不能为空".to_string()));
        }
        if !self.doser_capacity_kg_per_min.is_finite() || self.doser_capacity_kg_per_min <= 0.0 {
            return Err(DomainError::Validation(format!(
                "投喂线 {} 的 doser_capacity_kg_per_min 必须大于 0",
                self.line_id
            )));
        }
        if self.blow_before_secs < 0.0 || self.blow_after_secs < 0.0 {
            return Err(DomainError::Validation(format!(
                "投喂线 {} 的吹扫时长不能为负数",
                self.line_id
            )));
        }
        for route in &self.routes {
            if route.transport_time_secs < 0.0 || !route.transport_time_secs.is_finite() {
                return Err(DomainError::Validation(format!(
                    "网箱 {} 的 transport_time_secs 不能为负数",
                    route.cage_id
                )));
            }
        }
        Ok(())
    }

    pub fn route_for_cage(&self, cage_id: &str) -> DomainResult<&CageRoute> {
        self.routes
            .iter()
            .find(|r| r.cage_id == cage_id)
            .ok_or_else(|| DomainError::not_found("Cage", cage_id))
    }

    pub fn route_for_slot(&self, slot: u32) -> DomainResult<&CageRoute> {
        self.routes
            .iter()
            .find(|r| r.slot == slot)
            .ok_or_else(|| DomainError::not_found("Slot", format!("{}/{}", self.line_id, slot)))
    }

    /// 转速百分比 → 出料速率
    pub fn rate_for_speed(&self, doser_speed_pct: f64) -> f64 {
        self.doser_capacity_kg_per_min * doser_speed_pct / 100.0
    }

    /// 出料速率 → 转速百分比；超出下料能力时报错
    pub fn speed_for_rate(&self, rate_kg_per_min: f64) -> DomainResult<f64> {
        let pct = rate_kg_per_min / self.doser_capacity_kg_per_min * 100.0;
        if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
            return Err(DomainError::Validation(format!(
                "出料速率 {} kg/min 超出投喂线 {} 的下料能力 {} kg/min",
                rate_kg_per_min, self.line_id, self.doser_capacity_kg_per_min
            )));
        }
        Ok(pct)
    }

    pub fn visit_timing(&self, selector_positioning_secs: f64, route: &CageRoute) -> VisitTiming {
        VisitTiming {
            selector_positioning_secs,
            blow_before_secs: self.blow_before_secs,
            blow_after_secs: self.blow_after_secs,
            transport_time_secs: route.transport_time_secs,
        }
    }
}
