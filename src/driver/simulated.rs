// ==========================================
// 网箱投喂控制系统 - 模拟设备驱动
// ==========================================
// 职责: 按访问开始后的经过时间推导当前阶段，并累计出料量
// 阶段: POSITIONING_SELECTOR → BLOWING_BEFORE → FEEDING → BLOWING_AFTER → COMPLETED
// 并发: 每条投喂线一把 tokio Mutex，状态查询也会更新累计量，必须串行
// ==========================================

use crate::domain::machine::{MachineCommand, MachineStatus, VisitTiming};
use crate::domain::types::VisitStage;
use crate::driver::clock::{Clock, SystemClock};
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::DeviceDriver;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// 浮点累计误差容限
const DISPENSE_EPSILON_KG: f64 = 1e-9;

fn secs_to_duration(secs: f64) -> Duration {
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}

fn duration_to_secs(duration: Duration) -> f64 {
    match duration.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => duration.num_seconds() as f64,
    }
}

// ==========================================
// 阶段推导 (纯函数)
// ==========================================

/// 根据访问经过时间推导阶段
///
/// # 参数
/// - elapsed_secs: 访问开始后的经过秒数
/// - timing: 访问时序参数
/// - running: 是否仍在出料
/// - since_dispensing_completed_secs: 出料完成后经过的秒数 (未完成为 None)
pub fn derive_stage(
    elapsed_secs: f64,
    timing: &VisitTiming,
    running: bool,
    since_dispensing_completed_secs: Option<f64>,
) -> VisitStage {
    if elapsed_secs < timing.selector_positioning_secs {
        return VisitStage::PositioningSelector;
    }
    if elapsed_secs < timing.feeding_offset_secs() {
        return VisitStage::BlowingBefore;
    }
    if running {
        return VisitStage::Feeding;
    }
    match since_dispensing_completed_secs {
        Some(since) if since < timing.post_dispense_secs() => VisitStage::BlowingAfter,
        Some(_) => VisitStage::Completed,
        None => VisitStage::Stopped,
    }
}

// ==========================================
// LineState - 单条投喂线的模拟状态
// ==========================================
#[derive(Debug, Clone, Default)]
struct LineState {
    running: bool,
    paused: bool,
    stopped: bool,
    slot: Option<u32>,
    target_kg: f64,
    dispensed_kg: f64,
    rate_kg_per_min: f64,
    blower_power_pct: f64,
    saved_rate_kg_per_min: f64,
    saved_blower_power_pct: f64,
    timing: Option<VisitTiming>,
    visit_started_at: Option<DateTime<Utc>>,
    last_observed_at: Option<DateTime<Utc>>,
    dispensing_completed_at: Option<DateTime<Utc>>,
    error_code: Option<String>,
}

impl LineState {
    /// 把累计出料推进到 now，并更新 last_observed_at
    fn observe(&mut self, now: DateTime<Utc>) {
        let (Some(started_at), Some(timing)) = (self.visit_started_at, self.timing) else {
            return;
        };

        // 故障期间下料器停转，时间照常推进
        let dispensing = self.running && !self.paused && self.error_code.is_none();
        if dispensing && self.rate_kg_per_min > 0.0 {
            let feeding_starts_at = started_at + secs_to_duration(timing.feeding_offset_secs());
            let from = self
                .last_observed_at
                .map_or(feeding_starts_at, |last| last.max(feeding_starts_at));

            if now > from {
                let delta_min = duration_to_secs(now - from) / 60.0;
                let remaining_kg = (self.target_kg - self.dispensed_kg).max(0.0);
                let increment_kg = self.rate_kg_per_min * delta_min;

                if increment_kg + DISPENSE_EPSILON_KG >= remaining_kg {
                    let secs_to_target = remaining_kg / self.rate_kg_per_min * 60.0;
                    self.finish_dispensing(from + secs_to_duration(secs_to_target));
                } else {
                    self.dispensed_kg += increment_kg;
                }
            }
        }

        self.last_observed_at = Some(self.last_observed_at.map_or(now, |last| last.max(now)));
    }

    /// 出料到达目标：停止下料，进入输送/后吹
    fn finish_dispensing(&mut self, at: DateTime<Utc>) {
        self.dispensed_kg = self.target_kg;
        self.running = false;
        self.paused = false;
        self.rate_kg_per_min = 0.0;
        self.dispensing_completed_at = Some(at);
    }

    fn stage(&self, now: DateTime<Utc>) -> VisitStage {
        if self.stopped {
            return VisitStage::Stopped;
        }
        let (Some(started_at), Some(timing)) = (self.visit_started_at, self.timing) else {
            return VisitStage::Idle;
        };
        let elapsed = duration_to_secs(now - started_at);
        let since_completed = self
            .dispensing_completed_at
            .map(|done| duration_to_secs(now - done));
        derive_stage(elapsed, &timing, self.running, since_completed)
    }

    fn snapshot(&self, line_id: &str, now: DateTime<Utc>) -> MachineStatus {
        let stage = self.stage(now);
        let blower_active = matches!(
            stage,
            VisitStage::PositioningSelector
                | VisitStage::BlowingBefore
                | VisitStage::Feeding
                | VisitStage::BlowingAfter
        );

        MachineStatus {
            line_id: line_id.to_string(),
            running: self.running,
            paused: self.paused,
            dispensed_kg: self.dispensed_kg,
            current_rate_kg_per_min: if self.running && self.error_code.is_none() {
                self.rate_kg_per_min
            } else {
                0.0
            },
            blower_power_pct: if blower_active { self.blower_power_pct } else { 0.0 },
            stage,
            slot: self.slot,
            has_error: self.error_code.is_some(),
            error_code: self.error_code.clone(),
            observed_at: now,
        }
    }
}

// ==========================================
// SimulatedDriver - 模拟驱动
// ==========================================
pub struct SimulatedDriver {
    clock: Arc<dyn Clock>,
    lines: Mutex<HashMap<String, Arc<AsyncMutex<LineState>>>>,
}

impl SimulatedDriver {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            lines: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// 获取 (必要时创建) 投喂线状态
    fn line(&self, line_id: &str) -> DriverResult<Arc<AsyncMutex<LineState>>> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|e| DriverError::Communication(format!("锁获取失败: {}", e)))?;
        Ok(lines
            .entry(line_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(LineState::default())))
            .clone())
    }

    fn existing_line(&self, line_id: &str) -> DriverResult<Option<Arc<AsyncMutex<LineState>>>> {
        let lines = self
            .lines
            .lock()
            .map_err(|e| DriverError::Communication(format!("锁获取失败: {}", e)))?;
        Ok(lines.get(line_id).cloned())
    }

    /// 注入设备故障 (出料冻结，has_error 置位；设定速率保留)
    pub async fn inject_fault(&self, line_id: &str, error_code: &str) -> DriverResult<()> {
        let line = self.line(line_id)?;
        let mut state = line.lock().await;
        state.observe(self.clock.now());
        state.error_code = Some(error_code.to_string());
        warn!(line_id = %line_id, error_code = %error_code, "模拟设备故障");
        Ok(())
    }

    /// 清除设备故障，按原速率继续出料
    pub async fn clear_fault(&self, line_id: &str) -> DriverResult<()> {
        if let Some(line) = self.existing_line(line_id)? {
            let mut state = line.lock().await;
            // 故障期间的时间不计入出料
            state.observe(self.clock.now());
            state.error_code = None;
            info!(line_id = %line_id, "模拟设备故障已清除");
        }
        Ok(())
    }
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::with_system_clock()
    }
}

#[async_trait]
impl DeviceDriver for SimulatedDriver {
    async fn start_visit(&self, line_id: &str, command: &MachineCommand) -> DriverResult<()> {
        if command.rate_kg_per_min <= 0.0 || command.target_kg <= 0.0 {
            return Err(DriverError::InvalidCommand(format!(
                "target_kg={} rate_kg_per_min={}",
                command.target_kg, command.rate_kg_per_min
            )));
        }

        let line = self.line(line_id)?;
        let mut state = line.lock().await;
        if state.running {
            return Err(DriverError::InvalidCommand(format!(
                "投喂线 {} 正在执行访问 (slot={:?})",
                line_id, state.slot
            )));
        }

        let now = self.clock.now();
        let error_code = state.error_code.take();
        *state = LineState {
            running: true,
            slot: Some(command.slot),
            target_kg: command.target_kg,
            rate_kg_per_min: command.rate_kg_per_min,
            blower_power_pct: command.blower_power_pct,
            timing: Some(command.timing),
            visit_started_at: Some(now),
            last_observed_at: Some(now),
            error_code,
            ..LineState::default()
        };

        info!(
            line_id = %line_id,
            slot = command.slot,
            target_kg = command.target_kg,
            rate_kg_per_min = command.rate_kg_per_min,
            "模拟驱动: 开始访问"
        );
        Ok(())
    }

    async fn get_status(&self, line_id: &str) -> DriverResult<MachineStatus> {
        let now = self.clock.now();
        let Some(line) = self.existing_line(line_id)? else {
            return Ok(MachineStatus::idle(line_id, now));
        };
        let mut state = line.lock().await;
        state.observe(now);
        Ok(state.snapshot(line_id, now))
    }

    async fn pause(&self, line_id: &str) -> DriverResult<()> {
        let Some(line) = self.existing_line(line_id)? else {
            return Ok(());
        };
        let mut state = line.lock().await;
        if !state.running || state.paused {
            debug!(line_id = %line_id, "模拟驱动: 非运行状态，忽略暂停");
            return Ok(());
        }

        state.observe(self.clock.now());
        // observe 可能刚好判定出料完成
        if !state.running {
            return Ok(());
        }
        state.saved_rate_kg_per_min = state.rate_kg_per_min;
        state.saved_blower_power_pct = state.blower_power_pct;
        state.rate_kg_per_min = 0.0;
        state.paused = true;

        info!(line_id = %line_id, dispensed_kg = state.dispensed_kg, "模拟驱动: 暂停");
        Ok(())
    }

    async fn resume(&self, line_id: &str) -> DriverResult<()> {
        let Some(line) = self.existing_line(line_id)? else {
            return Ok(());
        };
        let mut state = line.lock().await;
        if !state.paused {
            return Ok(());
        }

        state.rate_kg_per_min = state.saved_rate_kg_per_min;
        state.blower_power_pct = state.saved_blower_power_pct;
        state.paused = false;
        state.last_observed_at = Some(self.clock.now());

        info!(line_id = %line_id, dispensed_kg = state.dispensed_kg, "模拟驱动: 恢复");
        Ok(())
    }

    async fn stop(&self, line_id: &str) -> DriverResult<f64> {
        let Some(line) = self.existing_line(line_id)? else {
            return Ok(0.0);
        };
        let mut state = line.lock().await;
        let now = self.clock.now();
        state.observe(now);

        let finished_normally = state.dispensing_completed_at.is_some();
        if !finished_normally && state.visit_started_at.is_some() {
            state.stopped = true;
        }
        state.running = false;
        state.paused = false;
        state.rate_kg_per_min = 0.0;
        state.blower_power_pct = 0.0;

        info!(line_id = %line_id, dispensed_kg = state.dispensed_kg, "模拟驱动: 停止");
        Ok(state.dispensed_kg)
    }

    async fn set_doser_rate(&self, line_id: &str, rate_kg_per_min: f64) -> DriverResult<()> {
        if !rate_kg_per_min.is_finite() || rate_kg_per_min < 0.0 {
            return Err(DriverError::InvalidCommand(format!(
                "rate_kg_per_min={}",
                rate_kg_per_min
            )));
        }
        let line = self.line(line_id)?;
        let mut state = line.lock().await;
        // 先按旧速率结算到当前时刻
        state.observe(self.clock.now());
        if state.paused {
            state.saved_rate_kg_per_min = rate_kg_per_min;
        } else if state.running {
            state.rate_kg_per_min = rate_kg_per_min;
        }
        debug!(line_id = %line_id, rate_kg_per_min, "模拟驱动: 调整出料速率");
        Ok(())
    }

    async fn set_target_kg(&self, line_id: &str, target_kg: f64) -> DriverResult<()> {
        if !target_kg.is_finite() || target_kg <= 0.0 {
            return Err(DriverError::InvalidCommand(format!("target_kg={}", target_kg)));
        }
        let line = self.line(line_id)?;
        let mut state = line.lock().await;
        let now = self.clock.now();
        state.observe(now);
        if !state.running {
            debug!(line_id = %line_id, target_kg, "模拟驱动: 当前无出料，忽略目标调整");
            return Ok(());
        }

        // 新目标不低于已出料量
        state.target_kg = target_kg.max(state.dispensed_kg);
        if state.target_kg - state.dispensed_kg <= DISPENSE_EPSILON_KG {
            let feeding_starts_at = state
                .visit_started_at
                .zip(state.timing)
                .map(|(started_at, timing)| {
                    started_at + secs_to_duration(timing.feeding_offset_secs())
                });
            let done_at = feeding_starts_at.map_or(now, |at| at.max(now));
            state.finish_dispensing(done_at);
        }
        debug!(
            line_id = %line_id,
            target_kg = state.target_kg,
            dispensed_kg = state.dispensed_kg,
            "模拟驱动: 调整目标出料量"
        );
        Ok(())
    }

    async fn set_blower_power(&self, line_id: &str, power_pct: f64) -> DriverResult<()> {
        if !power_pct.is_finite() || !(0.0..=100.0).contains(&power_pct) {
            return Err(DriverError::InvalidCommand(format!("power_pct={}", power_pct)));
        }
        let line = self.line(line_id)?;
        let mut state = line.lock().await;
        if state.paused {
            state.saved_blower_power_pct = power_pct;
        } else {
            state.blower_power_pct = power_pct;
        }
        debug!(line_id = %line_id, power_pct, "模拟驱动: 调整风机功率");
        Ok(())
    }
}
