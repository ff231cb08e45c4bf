// ==========================================
// 网箱投喂控制系统 - 投喂策略
// ==========================================
// 用途: 将投喂意图 (模式/出料口/速度/投喂量) 转换为设备配置
// 约定: 调用方只依赖 FeedingStrategy 接口，不判断具体策略类型
// ==========================================

use crate::domain::cage_feeding::CageFeeding;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::line::LineProfile;
use crate::domain::machine::MachineConfiguration;
use crate::domain::types::{MachineMode, SessionType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 投喂策略接口
pub trait FeedingStrategy: Send + Sync {
    /// 生成下发给设备的配置
    fn get_plc_configuration(&self) -> DomainResult<MachineConfiguration>;

    /// 该策略对应的会话类型
    fn session_type(&self) -> SessionType;
}

// ==========================================
// ManualFeedingStrategy - 手动投喂
// ==========================================
// 单出料口，立即开始，无循环参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualFeedingStrategy {
    pub slot: u32,
    pub blower_speed_pct: f64,
    pub doser_speed_pct: f64,
    pub target_kg: f64,
}

impl ManualFeedingStrategy {
    pub fn new(slot: u32, blower_speed_pct: f64, doser_speed_pct: f64, target_kg: f64) -> Self {
        Self {
            slot,
            blower_speed_pct,
            doser_speed_pct,
            target_kg,
        }
    }
}

impl FeedingStrategy for ManualFeedingStrategy {
    fn get_plc_configuration(&self) -> DomainResult<MachineConfiguration> {
        Ok(MachineConfiguration::new(
            MachineMode::Manual,
            vec![self.slot],
            self.blower_speed_pct,
            self.doser_speed_pct,
            self.target_kg,
        )?
        .with_batch(0.0, 0.0)?
        .with_start(true))
    }

    fn session_type(&self) -> SessionType {
        SessionType::Manual
    }
}

// ==========================================
// CyclicFeedingStrategy - 循环投喂
// ==========================================
// 多出料口按执行顺序轮流访问，由编排器逐次下发访问指令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclicFeedingStrategy {
    pub slots: Vec<u32>,
    pub blower_speed_pct: f64,
    pub doser_speed_pct: f64,
    pub total_kg: f64,
    pub total_visits: u32,
    pub pause_between_visits_secs: f64,
}

impl CyclicFeedingStrategy {
    /// 由网箱分配构造 (跳过 PAUSE/FASTING 的分配)
    pub fn from_allocations(
        allocations: &[CageFeeding],
        line: &LineProfile,
        blower_speed_pct: f64,
        pause_between_visits_secs: f64,
    ) -> DomainResult<Self> {
        let mut eligible: Vec<&CageFeeding> =
            allocations.iter().filter(|c| !c.mode.is_skipped()).collect();
        eligible.sort_by_key(|c| c.execution_order);

        let first = eligible.first().ok_or_else(|| {
            DomainError::Validation("没有可投喂的网箱 (全部为 PAUSE/FASTING)".to_string())
        })?;

        let mut slots = Vec::with_capacity(eligible.len());
        for allocation in &eligible {
            slots.push(line.route_for_cage(&allocation.cage_id)?.slot);
        }

        Ok(Self {
            slots,
            blower_speed_pct,
            doser_speed_pct: line.speed_for_rate(first.rate_kg_per_min)?,
            total_kg: eligible.iter().map(|c| c.programmed_kg).sum(),
            total_visits: eligible.iter().map(|c| c.programmed_visits).sum(),
            pause_between_visits_secs,
        })
    }

    fn build(&self, mode: MachineMode) -> DomainResult<MachineConfiguration> {
        if self.total_visits == 0 {
            return Err(DomainError::Validation("total_visits 必须大于 0".to_string()));
        }
        let batch_kg = self.total_kg / self.total_visits as f64;
        MachineConfiguration::new(
            mode,
            self.slots.clone(),
            self.blower_speed_pct,
            self.doser_speed_pct,
            self.total_kg,
        )?
        .with_batch(batch_kg, self.pause_between_visits_secs)
    }
}

impl FeedingStrategy for CyclicFeedingStrategy {
    fn get_plc_configuration(&self) -> DomainResult<MachineConfiguration> {
        self.build(MachineMode::Cyclic)
    }

    fn session_type(&self) -> SessionType {
        SessionType::Cyclic
    }
}

// ==========================================
// ScheduledFeedingStrategy - 计划投喂
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledFeedingStrategy {
    pub cycle: CyclicFeedingStrategy,
    pub scheduled_start: DateTime<Utc>,
}

impl FeedingStrategy for ScheduledFeedingStrategy {
    fn get_plc_configuration(&self) -> DomainResult<MachineConfiguration> {
        self.cycle.build(MachineMode::Scheduled)
    }

    fn session_type(&self) -> SessionType {
        SessionType::Scheduled
    }
}

// ==========================================
// ParameterUpdate / AdjustedStrategy - 运行中调参
// ==========================================
// 未显式修改的字段沿用当前配置

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    #[serde(default)]
    pub blower_speed_pct: Option<f64>,
    #[serde(default)]
    pub doser_speed_pct: Option<f64>,
    #[serde(default)]
    pub target_kg: Option<f64>,
}

impl ParameterUpdate {
    pub fn is_empty(&self) -> bool {
        self.blower_speed_pct.is_none() && self.doser_speed_pct.is_none() && self.target_kg.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct AdjustedStrategy {
    base: MachineConfiguration,
    update: ParameterUpdate,
    session_type: SessionType,
}

impl AdjustedStrategy {
    pub fn new(base: MachineConfiguration, update: ParameterUpdate, session_type: SessionType) -> Self {
        Self {
            base,
            update,
            session_type,
        }
    }
}

impl FeedingStrategy for AdjustedStrategy {
    fn get_plc_configuration(&self) -> DomainResult<MachineConfiguration> {
        let base = &self.base;
        Ok(MachineConfiguration::new(
            base.mode,
            base.slot_numbers().to_vec(),
            self.update.blower_speed_pct.unwrap_or(base.blower_speed_pct),
            self.update.doser_speed_pct.unwrap_or(base.doser_speed_pct),
            self.update.target_kg.unwrap_or(base.target_kg),
        )?
        .with_batch(base.batch_kg, base.pause_duration_secs)?
        .with_start(base.start))
    }

    fn session_type(&self) -> SessionType {
        self.session_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::line::CageRoute;
    use crate::domain::types::CageFeedingMode;

    fn line() -> LineProfile {
        LineProfile {
            line_id: "L1".to_string(),
            name: String::new(),
            doser_capacity_kg_per_min: 20.0,
            blow_before_secs: 3.0,
            blow_after_secs: 4.0,
            routes: vec![
                CageRoute { cage_id: "C01".to_string(), slot: 1, transport_time_secs: 10.0 },
                CageRoute { cage_id: "C02".to_string(), slot: 2, transport_time_secs: 15.0 },
                CageRoute { cage_id: "C03".to_string(), slot: 3, transport_time_secs: 20.0 },
            ],
        }
    }

    #[test]
    fn test_manual_configuration() {
        let strategy = ManualFeedingStrategy::new(4, 70.0, 40.0, 25.0);
        let config = strategy.get_plc_configuration().unwrap();
        assert_eq!(config.mode, MachineMode::Manual);
        assert_eq!(config.slot_numbers(), &[4]);
        assert!(config.start);
        assert_eq!(config.batch_kg, 0.0);
        assert_eq!(config.pause_duration_secs, 0.0);
        assert_eq!(strategy.session_type(), SessionType::Manual);
    }

    #[test]
    fn test_cyclic_from_allocations_orders_and_skips() {
        let allocations = vec![
            CageFeeding::new("C03", "D1", 2, 20.0, 2, 5.0, CageFeedingMode::Normal).unwrap(),
            CageFeeding::new("C02", "D1", 3, 50.0, 1, 5.0, CageFeedingMode::Fasting).unwrap(),
            CageFeeding::new("C01", "D1", 1, 10.0, 1, 5.0, CageFeedingMode::Normal).unwrap(),
        ];
        let strategy = CyclicFeedingStrategy::from_allocations(&allocations, &line(), 80.0, 2.0).unwrap();
        let config = strategy.get_plc_configuration().unwrap();

        assert_eq!(config.slot_numbers(), &[1, 3]);
        assert_eq!(config.target_kg, 30.0);
        assert_eq!(config.batch_kg, 10.0);
        assert_eq!(config.doser_speed_pct, 25.0);
        assert!(!config.start);
    }

    #[test]
    fn test_cyclic_all_skipped_rejected() {
        let allocations =
            vec![CageFeeding::new("C01", "D1", 1, 10.0, 1, 5.0, CageFeedingMode::Pause).unwrap()];
        assert!(CyclicFeedingStrategy::from_allocations(&allocations, &line(), 80.0, 0.0).is_err());
    }

    #[test]
    fn test_strategies_behind_trait_object() {
        let cycle = CyclicFeedingStrategy {
            slots: vec![1, 2],
            blower_speed_pct: 60.0,
            doser_speed_pct: 30.0,
            total_kg: 40.0,
            total_visits: 4,
            pause_between_visits_secs: 5.0,
        };
        let strategies: Vec<Box<dyn FeedingStrategy>> = vec![
            Box::new(ManualFeedingStrategy::new(1, 50.0, 50.0, 5.0)),
            Box::new(cycle.clone()),
            Box::new(ScheduledFeedingStrategy { cycle, scheduled_start: Utc::now() }),
        ];
        let modes: Vec<MachineMode> = strategies
            .iter()
            .map(|s| s.get_plc_configuration().unwrap().mode)
            .collect();
        assert_eq!(modes, vec![MachineMode::Manual, MachineMode::Cyclic, MachineMode::Scheduled]);
    }

    #[test]
    fn test_adjusted_preserves_unchanged_fields() {
        let base = ManualFeedingStrategy::new(2, 70.0, 40.0, 25.0)
            .get_plc_configuration()
            .unwrap();
        let update = ParameterUpdate { doser_speed_pct: Some(55.0), ..Default::default() };
        let adjusted = AdjustedStrategy::new(base.clone(), update, SessionType::Manual)
            .get_plc_configuration()
            .unwrap();

        assert_eq!(adjusted.doser_speed_pct, 55.0);
        assert_eq!(adjusted.blower_speed_pct, base.blower_speed_pct);
        assert_eq!(adjusted.target_kg, base.target_kg);
        assert_eq!(adjusted.slot_numbers(), base.slot_numbers());
        assert!(adjusted.start);
    }
}
