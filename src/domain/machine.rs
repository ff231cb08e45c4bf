// ==========================================
// 网箱投喂控制系统 - 设备配置与状态值对象
// ==========================================
// 职责: MachineConfiguration / VisitTiming / MachineCommand / MachineStatus
// 红线: 值对象不可变，构造即校验
// ==========================================

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::types::{MachineMode, VisitStage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn check_percentage(field: &str, value: f64) -> DomainResult<()> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        return Err(DomainError::Validation(format!(
            "{} 必须在 0~100 之间: {}",
            field, value
        )));
    }
    Ok(())
}

fn check_positive(field: &str, value: f64) -> DomainResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DomainError::Validation(format!(
            "{} 必须大于 0: {}",
            field, value
        )));
    }
    Ok(())
}

fn check_non_negative(field: &str, value: f64) -> DomainResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(DomainError::Validation(format!(
            "{} 不能为负数: {}",
            field, value
        )));
    }
    Ok(())
}

// ==========================================
// MachineConfiguration - 设备配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMachineConfiguration")]
pub struct MachineConfiguration {
    pub mode: MachineMode,
    /// 下发后是否立即开始一次访问
    pub start: bool,
    slot_numbers: Vec<u32>,
    pub blower_speed_pct: f64,
    pub doser_speed_pct: f64,
    pub target_kg: f64,
    /// 单次访问投喂量 (循环模式)，手动模式为 0
    pub batch_kg: f64,
    /// 两次访问之间的停顿 (秒)，手动模式为 0
    pub pause_duration_secs: f64,
}

/// 反序列化中间结构，经 try_from 校验后才能得到 MachineConfiguration
#[derive(Deserialize)]
struct RawMachineConfiguration {
    mode: MachineMode,
    start: bool,
    slot_numbers: Vec<u32>,
    blower_speed_pct: f64,
    doser_speed_pct: f64,
    target_kg: f64,
    #[serde(default)]
    batch_kg: f64,
    #[serde(default)]
    pause_duration_secs: f64,
}

impl TryFrom<RawMachineConfiguration> for MachineConfiguration {
    type Error = DomainError;

    fn try_from(raw: RawMachineConfiguration) -> Result<Self, Self::Error> {
        MachineConfiguration::new(
            raw.mode,
            raw.slot_numbers,
            raw.blower_speed_pct,
            raw.doser_speed_pct,
            raw.target_kg,
        )?
        .with_batch(raw.batch_kg, raw.pause_duration_secs)
        .map(|config| config.with_start(raw.start))
    }
}

impl MachineConfiguration {
    /// 创建设备配置
    ///
    /// # 校验
    /// - slot_numbers 不能为空
    /// - blower/doser 速度在 0~100
    /// - target_kg > 0
    pub fn new(
        mode: MachineMode,
        slot_numbers: Vec<u32>,
        blower_speed_pct: f64,
        doser_speed_pct: f64,
        target_kg: f64,
    ) -> DomainResult<Self> {
        if slot_numbers.is_empty() {
            return Err(DomainError::Validation("slot_numbers 不能为空".to_string()));
        }
        check_percentage("blower_speed_pct", blower_speed_pct)?;
        check_percentage("doser_speed_pct", doser_speed_pct)?;
        check_positive("target_kg", target_kg)?;

        Ok(Self {
            mode,
            start: false,
            slot_numbers,
            blower_speed_pct,
            doser_speed_pct,
            target_kg,
            batch_kg: 0.0,
            pause_duration_secs: 0.0,
        })
    }

    /// 设置循环参数
    pub fn with_batch(mut self, batch_kg: f64, pause_duration_secs: f64) -> DomainResult<Self> {
        check_non_negative("batch_kg", batch_kg)?;
        check_non_negative("pause_duration_secs", pause_duration_secs)?;
        self.batch_kg = batch_kg;
        self.pause_duration_secs = pause_duration_secs;
        Ok(self)
    }

    pub fn with_start(mut self, start: bool) -> Self {
        self.start = start;
        self
    }

    pub fn slot_numbers(&self) -> &[u32] {
        &self.slot_numbers
    }

    /// 第一个目标出料口 (列表非空由构造保证)
    pub fn primary_slot(&self) -> u32 {
        self.slot_numbers[0]
    }
}

// ==========================================
// VisitTiming - 单次访问时序参数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisitTiming {
    pub selector_positioning_secs: f64,
    pub blow_before_secs: f64,
    pub blow_after_secs: f64,
    pub transport_time_secs: f64,
}

impl VisitTiming {
    pub fn validate(&self) -> DomainResult<()> {
        check_non_negative("selector_positioning_secs", self.selector_positioning_secs)?;
        check_non_negative("blow_before_secs", self.blow_before_secs)?;
        check_non_negative("blow_after_secs", self.blow_after_secs)?;
        check_non_negative("transport_time_secs", self.transport_time_secs)?;
        Ok(())
    }

    /// 访问开始后多少秒进入 FEEDING
    pub fn feeding_offset_secs(&self) -> f64 {
        self.selector_positioning_secs + self.blow_before_secs
    }

    /// 出料完成后的吹扫时长 (输送 + 后吹)
    pub fn post_dispense_secs(&self) -> f64 {
        self.transport_time_secs + self.blow_after_secs
    }

    /// 预计访问时长 = 选择器定位 + 前吹 + 出料 + 输送 + 后吹
    pub fn estimate_visit_secs(&self, quantity_kg: f64, rate_kg_per_min: f64) -> DomainResult<f64> {
        check_non_negative("quantity_kg", quantity_kg)?;
        check_positive("rate_kg_per_min", rate_kg_per_min)?;
        Ok(self.selector_positioning_secs
            + self.blow_before_secs
            + quantity_kg / rate_kg_per_min * 60.0
            + self.transport_time_secs
            + self.blow_after_secs)
    }
}

// ==========================================
// MachineCommand - 访问启动指令
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineCommand {
    pub slot: u32,
    pub target_kg: f64,
    pub rate_kg_per_min: f64,
    pub blower_power_pct: f64,
    pub timing: VisitTiming,
}

impl MachineCommand {
    pub fn new(
        slot: u32,
        target_kg: f64,
        rate_kg_per_min: f64,
        blower_power_pct: f64,
        timing: VisitTiming,
    ) -> DomainResult<Self> {
        check_positive("target_kg", target_kg)?;
        check_positive("rate_kg_per_min", rate_kg_per_min)?;
        check_percentage("blower_power_pct", blower_power_pct)?;
        timing.validate()?;

        Ok(Self {
            slot,
            target_kg,
            rate_kg_per_min,
            blower_power_pct,
            timing,
        })
    }

    pub fn estimated_duration_secs(&self) -> DomainResult<f64> {
        self.timing
            .estimate_visit_secs(self.target_kg, self.rate_kg_per_min)
    }
}

// ==========================================
// MachineStatus - 设备状态快照
// ==========================================
// 每次查询重新生成，驱动不持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineStatus {
    pub line_id: String,
    pub running: bool,
    pub paused: bool,
    pub dispensed_kg: f64,
    pub current_rate_kg_per_min: f64,
    pub blower_power_pct: f64,
    pub stage: VisitStage,
    pub slot: Option<u32>,
    pub has_error: bool,
    pub error_code: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl MachineStatus {
    /// 无访问时的空闲快照
    pub fn idle(line_id: &str, observed_at: DateTime<Utc>) -> Self {
        Self {
            line_id: line_id.to_string(),
            running: false,
            paused: false,
            dispensed_kg: 0.0,
            current_rate_kg_per_min: 0.0,
            blower_power_pct: 0.0,
            stage: VisitStage::Idle,
            slot: None,
            has_error: false,
            error_code: None,
            observed_at,
        }
    }
}
