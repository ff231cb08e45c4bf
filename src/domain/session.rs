// ==========================================
// 网箱投喂控制系统 - 投喂会话聚合
// ==========================================
// 状态: CREATED → RUNNING ⇄ PAUSED → COMPLETED | CANCELLED | INTERRUPTED
// 职责: 一条投喂线上一次投喂过程的生命周期、累计出料、事件队列
// 红线: 只能通过转换方法修改状态；终态之后不可变更；会话不自行持久化
// ==========================================

use crate::domain::cage_feeding::CageFeeding;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::event::{FeedingEvent, FeedingEventType};
use crate::domain::line::LineProfile;
use crate::domain::machine::{MachineCommand, MachineConfiguration};
use crate::domain::types::{SessionStatus, SessionType};
use crate::driver::DeviceDriver;
use crate::engine::strategy::FeedingStrategy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

/// 正在进行中的访问 (用于保证累计出料单调递增)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InFlightVisit {
    pub slot: u32,
    pub dispensed_kg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedingSession {
    pub id: String,
    pub line_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub total_programmed_kg: f64,
    pub total_dispensed_kg: f64,
    pub dispensed_by_slot: BTreeMap<u32, f64>,
    pub applied_configuration: Option<MachineConfiguration>,
    #[serde(default)]
    pub cage_feedings: Vec<CageFeeding>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    in_flight: Option<InFlightVisit>,
    #[serde(skip)]
    pending_events: Vec<FeedingEvent>,
}

impl FeedingSession {
    /// 创建会话 (CREATED)
    pub fn new(line_id: impl Into<String>, session_type: SessionType, total_programmed_kg: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            line_id: line_id.into(),
            session_type,
            status: SessionStatus::Created,
            scheduled_start: None,
            actual_start: None,
            actual_end: None,
            total_programmed_kg,
            total_dispensed_kg: 0.0,
            dispensed_by_slot: BTreeMap::new(),
            applied_configuration: None,
            cage_feedings: Vec::new(),
            created_at: Utc::now(),
            in_flight: None,
            pending_events: Vec::new(),
        }
    }

    /// 创建多网箱会话；计划总量为非跳过分配之和
    pub fn with_cage_feedings(
        line_id: impl Into<String>,
        session_type: SessionType,
        mut cage_feedings: Vec<CageFeeding>,
    ) -> DomainResult<Self> {
        if cage_feedings.is_empty() {
            return Err(DomainError::Validation("网箱分配列表不能为空".to_string()));
        }
        cage_feedings.sort_by_key(|c| c.execution_order);
        for pair in cage_feedings.windows(2) {
            if pair[0].execution_order == pair[1].execution_order {
                return Err(DomainError::Validation(format!(
                    "execution_order 重复: {}",
                    pair[0].execution_order
                )));
            }
        }

        let programmed: f64 = cage_feedings
            .iter()
            .filter(|c| !c.mode.is_skipped())
            .map(|c| c.programmed_kg)
            .sum();
        let mut session = Self::new(line_id, session_type, programmed);
        session.cage_feedings = cage_feedings;
        Ok(session)
    }

    pub fn with_scheduled_start(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_start = Some(at);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn in_flight(&self) -> Option<InFlightVisit> {
        self.in_flight
    }

    // ==========================================
    // 状态转换
    // ==========================================

    /// 启动会话：下发策略生成的配置，CREATED → RUNNING
    ///
    /// 配置 start=true 时立即对首个出料口发起一次访问，并返回下发的访问指令
    pub async fn start(
        &mut self,
        strategy: &dyn FeedingStrategy,
        driver: &dyn DeviceDriver,
        line: &LineProfile,
        selector_positioning_secs: f64,
    ) -> DomainResult<Option<MachineCommand>> {
        if self.status != SessionStatus::Created {
            return Err(DomainError::invalid_transition("FeedingSession", self.status, "start"));
        }

        let configuration = strategy.get_plc_configuration()?;

        let mut dispatched = None;
        if configuration.start {
            let slot = configuration.primary_slot();
            let route = line.route_for_slot(slot)?;
            let command = MachineCommand::new(
                slot,
                configuration.target_kg,
                line.rate_for_speed(configuration.doser_speed_pct),
                configuration.blower_speed_pct,
                line.visit_timing(selector_positioning_secs, route),
            )?;
            driver.start_visit(&self.line_id, &command).await?;
            self.begin_visit(slot);
            dispatched = Some(command);
        }

        let payload = json!({
            "session_type": self.session_type,
            "configuration": configuration,
        });
        self.applied_configuration = Some(configuration);
        self.status = SessionStatus::Running;
        self.actual_start = Some(Utc::now());
        self.record_event(FeedingEventType::SessionStarted, payload);

        info!(
            session_id = %self.id,
            line_id = %self.line_id,
            session_type = %self.session_type,
            "投喂会话已启动"
        );
        Ok(dispatched)
    }

    /// RUNNING → PAUSED
    pub async fn pause(&mut self, driver: &dyn DeviceDriver) -> DomainResult<()> {
        if self.status != SessionStatus::Running {
            return Err(DomainError::invalid_transition("FeedingSession", self.status, "pause"));
        }
        driver.pause(&self.line_id).await?;
        self.status = SessionStatus::Paused;
        self.record_event(
            FeedingEventType::SessionPaused,
            json!({ "total_dispensed_kg": self.total_dispensed_kg }),
        );
        info!(session_id = %self.id, line_id = %self.line_id, "投喂会话已暂停");
        Ok(())
    }

    /// PAUSED → RUNNING
    pub async fn resume(&mut self, driver: &dyn DeviceDriver) -> DomainResult<()> {
        if self.status != SessionStatus::Paused {
            return Err(DomainError::invalid_transition("FeedingSession", self.status, "resume"));
        }
        driver.resume(&self.line_id).await?;
        self.status = SessionStatus::Running;
        self.record_event(FeedingEventType::SessionResumed, Value::Null);
        info!(session_id = %self.id, line_id = %self.line_id, "投喂会话已恢复");
        Ok(())
    }

    /// 运行中调整参数；只下发发生变化的风机/下料器/目标量参数
    pub async fn update_parameters(
        &mut self,
        strategy: &dyn FeedingStrategy,
        driver: &dyn DeviceDriver,
        line: &LineProfile,
    ) -> DomainResult<()> {
        if self.status != SessionStatus::Running {
            return Err(DomainError::invalid_transition(
                "FeedingSession",
                self.status,
                "update_parameters",
            ));
        }
        let before = self.applied_configuration.clone().ok_or_else(|| {
            DomainError::invalid_transition("FeedingSession", self.status, "update_parameters")
        })?;
        let after = strategy.get_plc_configuration()?;
        if after.target_kg != before.target_kg && !self.cage_feedings.is_empty() {
            return Err(DomainError::Validation(
                "多网箱会话的投喂量由网箱分配决定，不能在线调整".to_string(),
            ));
        }

        if after.doser_speed_pct != before.doser_speed_pct {
            driver
                .set_doser_rate(&self.line_id, line.rate_for_speed(after.doser_speed_pct))
                .await?;
        }
        if after.blower_speed_pct != before.blower_speed_pct {
            driver
                .set_blower_power(&self.line_id, after.blower_speed_pct)
                .await?;
        }
        if after.target_kg != before.target_kg {
            if self.in_flight.is_some() {
                driver.set_target_kg(&self.line_id, after.target_kg).await?;
            }
            self.total_programmed_kg = after.target_kg;
        }

        self.record_event(
            FeedingEventType::ParamChange,
            json!({ "before": before, "after": after }),
        );
        self.applied_configuration = Some(after);
        info!(session_id = %self.id, line_id = %self.line_id, "投喂参数已更新");
        Ok(())
    }

    /// 停止会话 (幂等)：终态时直接返回当前状态
    ///
    /// # 参数
    /// - completed: true → COMPLETED, false → CANCELLED
    pub async fn stop(
        &mut self,
        driver: &dyn DeviceDriver,
        completed: bool,
    ) -> DomainResult<SessionStatus> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }

        let final_kg = driver.stop(&self.line_id).await?;
        let (status, event_type) = if completed {
            (SessionStatus::Completed, FeedingEventType::SessionCompleted)
        } else {
            (SessionStatus::Cancelled, FeedingEventType::SessionCancelled)
        };
        self.finish(status, event_type, Some(final_kg), Value::Null);
        Ok(self.status)
    }

    /// 中断会话 (设备故障/作业窗口关闭/编排任务取消)
    ///
    /// 驱动停止失败时仍然进入 INTERRUPTED，不留悬空会话
    pub async fn interrupt(
        &mut self,
        driver: &dyn DeviceDriver,
        reason: &str,
    ) -> DomainResult<SessionStatus> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }

        let final_kg = match driver.stop(&self.line_id).await {
            Ok(kg) => Some(kg),
            Err(e) => {
                warn!(session_id = %self.id, line_id = %self.line_id, error = %e, "中断时停止设备失败");
                None
            }
        };
        self.finish(
            SessionStatus::Interrupted,
            FeedingEventType::SessionInterrupted,
            final_kg,
            json!({ "reason": reason }),
        );
        Ok(self.status)
    }

    fn finish(
        &mut self,
        status: SessionStatus,
        event_type: FeedingEventType,
        final_kg: Option<f64>,
        extra: Value,
    ) {
        if let (Some(visit), Some(kg)) = (self.in_flight, final_kg) {
            self.observe_visit(visit.slot, kg);
        }
        self.close_visit();
        for cage in &mut self.cage_feedings {
            cage.cancel();
        }

        self.status = status;
        self.actual_end = Some(Utc::now());
        self.record_event(
            event_type,
            json!({
                "total_dispensed_kg": self.total_dispensed_kg,
                "detail": extra,
            }),
        );
        info!(
            session_id = %self.id,
            line_id = %self.line_id,
            status = %self.status,
            total_dispensed_kg = self.total_dispensed_kg,
            "投喂会话已结束"
        );
    }

    // ==========================================
    // 出料累计
    // ==========================================

    /// 开始跟踪一次访问
    pub fn begin_visit(&mut self, slot: u32) {
        self.in_flight = Some(InFlightVisit {
            slot,
            dispensed_kg: 0.0,
        });
    }

    /// 记录访问当前累计出料；只累加增量，保证总量单调
    pub fn observe_visit(&mut self, slot: u32, dispensed_kg: f64) {
        let visit = match self.in_flight {
            Some(visit) if visit.slot == slot => visit,
            _ => InFlightVisit {
                slot,
                dispensed_kg: 0.0,
            },
        };
        let delta = dispensed_kg - visit.dispensed_kg;
        if delta > 0.0 {
            self.total_dispensed_kg += delta;
            *self.dispensed_by_slot.entry(slot).or_insert(0.0) += delta;
        }
        self.in_flight = Some(InFlightVisit {
            slot,
            dispensed_kg: visit.dispensed_kg.max(dispensed_kg),
        });
    }

    /// 结束跟踪当前访问，返回该访问的出料量
    pub fn close_visit(&mut self) -> Option<f64> {
        self.in_flight.take().map(|visit| visit.dispensed_kg)
    }

    // ==========================================
    // 事件队列
    // ==========================================

    pub fn record_event(&mut self, event_type: FeedingEventType, payload: Value) {
        self.pending_events.push(FeedingEvent {
            id: Uuid::new_v4().to_string(),
            session_id: self.id.clone(),
            line_id: self.line_id.clone(),
            event_type,
            occurred_at: Utc::now(),
            payload,
        });
    }

    /// 取出全部待发布事件 (取出后队列为空)
    pub fn pop_events(&mut self) -> Vec<FeedingEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// 发布失败时把事件放回队首，保持原有顺序
    pub fn requeue_events(&mut self, mut events: Vec<FeedingEvent>) {
        events.append(&mut self.pending_events);
        self.pending_events = events;
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }
}
