// ==========================================
// 网箱投喂控制系统 - 多网箱投喂编排器
// ==========================================
// 用途: 按 execution_order 逐个网箱下发访问、轮询设备状态、累计进度
// 运行: 独立 tokio 任务；通过 OrchestrationHandle 暂停/恢复/停止/取消
// 红线: 任务退出时会话必须处于终态 (COMPLETED/CANCELLED/INTERRUPTED)，
//       退出前先停止设备并结算最后一次出料
// ==========================================

use crate::config::FeedingConfig;
use crate::domain::error::{DomainError, DomainResult};
use crate::domain::event::FeedingEventType;
use crate::domain::line::LineProfile;
use crate::domain::machine::MachineCommand;
use crate::domain::operation::Operation;
use crate::domain::session::FeedingSession;
use crate::domain::types::{SessionStatus, VisitStage};
use crate::driver::DeviceDriver;
use crate::engine::repositories::FeedingRepositories;
use crate::engine::schedule::OperatingScheduleService;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ==========================================
// 控制信号与运行参数
// ==========================================

/// 外部控制信号 (watch 通道只保留最新值)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop { completed: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub poll_interval: Duration,
    pub persist_interval_secs: f64,
    pub selector_positioning_secs: f64,
    pub allow_overtime: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &FeedingConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            persist_interval_secs: config.persist_interval_secs,
            selector_positioning_secs: config.selector_positioning_secs,
            allow_overtime: config.allow_overtime,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&FeedingConfig::default())
    }
}

/// 编排循环的退出原因
#[derive(Debug)]
enum LoopExit {
    Finished,
    Stopped { completed: bool },
    Cancelled,
    DeviceFault(String),
    WindowRejected(DomainError),
    Failed(DomainError),
}

impl From<DomainError> for LoopExit {
    fn from(err: DomainError) -> Self {
        if err.is_scheduling() {
            LoopExit::WindowRejected(err)
        } else {
            LoopExit::Failed(err)
        }
    }
}

/// 单次访问的轮询结果
enum VisitEnd {
    Completed(f64),
    Exit(LoopExit),
}

// ==========================================
// OrchestrationHandle - 编排任务句柄
// ==========================================
pub struct OrchestrationHandle {
    session_id: String,
    line_id: String,
    control: watch::Sender<ControlSignal>,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
    task: JoinHandle<FeedingSession>,
}

impl OrchestrationHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn line_id(&self) -> &str {
        &self.line_id
    }

    /// 编排任务最近发布的会话状态
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// RUNNING → PAUSED，等待编排任务确认
    pub async fn pause(&self) -> DomainResult<SessionStatus> {
        let current = self.status();
        if current != SessionStatus::Running {
            return Err(DomainError::invalid_transition("FeedingSession", current, "pause"));
        }
        self.control.send_replace(ControlSignal::Pause);
        Ok(self.wait_for(|s| s != SessionStatus::Running).await)
    }

    /// PAUSED → RUNNING，等待编排任务确认
    pub async fn resume(&self) -> DomainResult<SessionStatus> {
        let current = self.status();
        if current != SessionStatus::Paused {
            return Err(DomainError::invalid_transition("FeedingSession", current, "resume"));
        }
        self.control.send_replace(ControlSignal::Run);
        Ok(self.wait_for(|s| s != SessionStatus::Paused).await)
    }

    /// 停止 (幂等)：已是终态时直接返回
    pub async fn stop(&self, completed: bool) -> SessionStatus {
        if self.status().is_terminal() {
            return self.status();
        }
        self.control.send_replace(ControlSignal::Stop { completed });
        self.wait_for(|s| s.is_terminal()).await
    }

    /// 取消编排任务，会话进入 INTERRUPTED
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// 等待会话进入终态
    pub async fn wait_terminal(&self) -> SessionStatus {
        self.wait_for(|s| s.is_terminal()).await
    }

    /// 等待任务结束，返回最终会话
    pub async fn join(self) -> Result<FeedingSession, JoinError> {
        self.task.await
    }

    async fn wait_for(&self, predicate: impl Fn(SessionStatus) -> bool) -> SessionStatus {
        let mut status = self.status.clone();
        let result = status.wait_for(|s| predicate(*s)).await.map(|s| *s);
        // 任务已退出时 watch 发送端关闭，返回最后发布的状态
        result.unwrap_or_else(|_| *status.borrow())
    }
}

// ==========================================
// FeedingOrchestrator
// ==========================================
pub struct FeedingOrchestrator {
    session: FeedingSession,
    line: LineProfile,
    driver: Arc<dyn DeviceDriver>,
    repos: FeedingRepositories,
    schedule: Arc<OperatingScheduleService>,
    settings: OrchestratorSettings,
    control: watch::Receiver<ControlSignal>,
    control_open: bool,
    status: watch::Sender<SessionStatus>,
    cancel: CancellationToken,
    current: Option<Operation>,
    current_cage: Option<usize>,
}

impl FeedingOrchestrator {
    /// 启动编排任务 (会话须已处于 RUNNING)
    ///
    /// # 参数
    /// - cancel: 取消令牌，通常为用例层根令牌的子令牌
    pub fn spawn(
        session: FeedingSession,
        line: LineProfile,
        driver: Arc<dyn DeviceDriver>,
        repos: FeedingRepositories,
        schedule: Arc<OperatingScheduleService>,
        settings: OrchestratorSettings,
        cancel: CancellationToken,
    ) -> OrchestrationHandle {
        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);
        let (status_tx, status_rx) = watch::channel(session.status);
        let session_id = session.id.clone();
        let line_id = session.line_id.clone();

        let orchestrator = Self {
            session,
            line,
            driver,
            repos,
            schedule,
            settings,
            control: control_rx,
            control_open: true,
            status: status_tx,
            cancel: cancel.clone(),
            current: None,
            current_cage: None,
        };
        let task = tokio::spawn(orchestrator.run());

        OrchestrationHandle {
            session_id,
            line_id,
            control: control_tx,
            status: status_rx,
            cancel,
            task,
        }
    }

    /// 执行全部网箱分配，返回最终会话
    pub async fn run(mut self) -> FeedingSession {
        info!(
            session_id = %self.session.id,
            line_id = %self.session.line_id,
            cages = self.session.cage_feedings.len(),
            "开始执行多网箱投喂编排"
        );

        let exit = match self.session.status {
            SessionStatus::Running => self.run_cages().await,
            other => LoopExit::Failed(DomainError::invalid_transition(
                "FeedingSession",
                other,
                "orchestrate",
            )),
        };
        self.finish(exit).await;

        info!(
            session_id = %self.session.id,
            line_id = %self.session.line_id,
            status = %self.session.status,
            total_dispensed_kg = self.session.total_dispensed_kg,
            "多网箱投喂编排结束"
        );
        self.session
    }

    async fn run_cages(&mut self) -> LoopExit {
        let Some(configuration) = self.session.applied_configuration.clone() else {
            return LoopExit::Failed(DomainError::Validation("会话缺少已下发配置".to_string()));
        };

        for index in 0..self.session.cage_feedings.len() {
            let cage = &mut self.session.cage_feedings[index];
            if cage.mode.is_skipped() {
                let payload = json!({ "cage_id": cage.cage_id, "mode": cage.mode });
                cage.cancel();
                debug!(cage_id = %cage.cage_id, mode = %cage.mode, "跳过网箱");
                self.session.record_event(FeedingEventType::VisitSkipped, payload);
                self.persist();
                continue;
            }
            if let Err(e) = cage.begin() {
                return e.into();
            }

            while self.session.cage_feedings[index].remaining_visits() > 0 {
                if let Some(exit) = self.wait_until_runnable().await {
                    return exit;
                }
                if let Err(e) = self.start_visit(index, configuration.blower_speed_pct).await {
                    return e.into();
                }

                let dispensed_kg = match self.poll_visit().await {
                    VisitEnd::Completed(kg) => kg,
                    VisitEnd::Exit(exit) => return exit,
                };
                if let Err(e) = self.complete_visit(index, dispensed_kg) {
                    return e.into();
                }

                let more_visits = self.session.cage_feedings[index].remaining_visits() > 0
                    || index + 1 < self.session.cage_feedings.len();
                if more_visits && configuration.pause_duration_secs > 0.0 {
                    if let Some(exit) = self.pause_between_visits(configuration.pause_duration_secs).await {
                        return exit;
                    }
                }
            }

            if let Err(e) = self.session.cage_feedings[index].complete() {
                return e.into();
            }
            self.persist();
        }

        LoopExit::Finished
    }

    /// 下发一次访问：解析路由、检查作业窗口、启动设备
    async fn start_visit(&mut self, index: usize, blower_speed_pct: f64) -> DomainResult<()> {
        let cage = &self.session.cage_feedings[index];
        let route = self.line.route_for_cage(&cage.cage_id)?;
        let command = MachineCommand::new(
            route.slot,
            cage.next_visit_target_kg(),
            cage.rate_kg_per_min,
            blower_speed_pct,
            self.line
                .visit_timing(self.settings.selector_positioning_secs, route),
        )?;

        let estimated_secs = command.estimated_duration_secs()?;
        self.schedule
            .assert_fits_in_window(estimated_secs, self.settings.allow_overtime)?;

        self.driver
            .start_visit(&self.session.line_id, &command)
            .await?;

        let payload = json!({
            "cage_id": cage.cage_id,
            "cage_feeding_id": cage.id,
            "slot": command.slot,
            "visit_no": cage.completed_visits + 1,
            "target_kg": command.target_kg,
            "estimated_secs": estimated_secs,
        });
        let operation = Operation::start(
            &self.session.id,
            &self.session.line_id,
            Some(cage.id.clone()),
            command,
            self.schedule.now(),
        );

        info!(
            session_id = %self.session.id,
            line_id = %self.session.line_id,
            cage_id = %cage.cage_id,
            slot = operation.slot,
            target_kg = operation.target_kg,
            "开始访问"
        );
        self.session.begin_visit(operation.slot);
        self.session.record_event(FeedingEventType::VisitStarted, payload);
        self.current = Some(operation);
        self.current_cage = Some(index);
        self.persist();
        Ok(())
    }

    fn complete_visit(&mut self, index: usize, dispensed_kg: f64) -> DomainResult<()> {
        let now = self.schedule.now();
        if let Some(operation) = self.current.as_mut() {
            operation.complete(dispensed_kg, now)?;
        }
        let visit_kg = self.session.close_visit().unwrap_or(dispensed_kg);

        let cage = &mut self.session.cage_feedings[index];
        cage.record_visit(visit_kg)?;
        let payload = json!({
            "cage_id": cage.cage_id,
            "visit_no": cage.completed_visits,
            "dispensed_kg": visit_kg,
        });
        info!(
            session_id = %self.session.id,
            cage_id = %cage.cage_id,
            dispensed_kg = visit_kg,
            "访问完成"
        );
        self.session.record_event(FeedingEventType::VisitCompleted, payload);
        self.current_cage = None;
        self.persist();
        self.current = None;
        Ok(())
    }

    /// 轮询设备直到访问完成，期间响应控制信号与取消
    async fn poll_visit(&mut self) -> VisitEnd {
        let line_id = self.session.line_id.clone();
        let persist_every = ChronoDuration::microseconds(
            (self.settings.persist_interval_secs * 1_000_000.0).round() as i64,
        );
        let mut last_persist = self.schedule.now();

        loop {
            let paused = self.session.status == SessionStatus::Paused;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return VisitEnd::Exit(LoopExit::Cancelled),
                changed = self.control.changed(), if self.control_open => {
                    if changed.is_err() {
                        self.control_open = false;
                        continue;
                    }
                    if let Some(exit) = self.apply_signal().await {
                        return VisitEnd::Exit(exit);
                    }
                    continue;
                }
                _ = tokio::time::sleep(self.settings.poll_interval), if !paused => {}
            }

            let status = match self.driver.get_status(&line_id).await {
                Ok(status) => status,
                Err(e) => return VisitEnd::Exit(LoopExit::Failed(e.into())),
            };

            if let Some(slot) = status.slot {
                self.session.observe_visit(slot, status.dispensed_kg);
                self.sync_cage_progress();
            }
            if let Some(operation) = self.current.as_mut() {
                if let Err(e) = operation.update_progress(status.dispensed_kg) {
                    return VisitEnd::Exit(LoopExit::Failed(e));
                }
            }

            if status.has_error {
                let code = status
                    .error_code
                    .unwrap_or_else(|| "UNKNOWN_DEVICE_ERROR".to_string());
                return VisitEnd::Exit(LoopExit::DeviceFault(code));
            }
            match status.stage {
                VisitStage::Completed => return VisitEnd::Completed(status.dispensed_kg),
                VisitStage::Stopped | VisitStage::Idle => {
                    return VisitEnd::Exit(LoopExit::DeviceFault(format!(
                        "VISIT_{}",
                        status.stage.as_str()
                    )))
                }
                _ => {}
            }

            let now = self.schedule.now();
            if now - last_persist >= persist_every {
                if let Some(operation) = self.current.as_mut() {
                    if let Err(e) = operation.checkpoint(now) {
                        return VisitEnd::Exit(LoopExit::Failed(e));
                    }
                }
                debug!(
                    session_id = %self.session.id,
                    stage = %status.stage,
                    dispensed_kg = status.dispensed_kg,
                    total_dispensed_kg = self.session.total_dispensed_kg,
                    "持久化投喂进度"
                );
                self.persist();
                last_persist = now;
            }
        }
    }

    /// 访问开始前：暂停中则等待恢复；处理已到达的控制信号
    async fn wait_until_runnable(&mut self) -> Option<LoopExit> {
        loop {
            if self.cancel.is_cancelled() {
                return Some(LoopExit::Cancelled);
            }
            if self.control_open && self.control.has_changed().unwrap_or(false) {
                if let Some(exit) = self.apply_signal().await {
                    return Some(exit);
                }
                continue;
            }
            if self.session.status == SessionStatus::Running {
                return None;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Some(LoopExit::Cancelled),
                changed = self.control.changed(), if self.control_open => {
                    if changed.is_err() {
                        self.control_open = false;
                        continue;
                    }
                    if let Some(exit) = self.apply_signal().await {
                        return Some(exit);
                    }
                }
            }
        }
    }

    async fn pause_between_visits(&mut self, secs: f64) -> Option<LoopExit> {
        let sleep = tokio::time::sleep(Duration::from_secs_f64(secs));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Some(LoopExit::Cancelled),
                changed = self.control.changed(), if self.control_open => {
                    if changed.is_err() {
                        self.control_open = false;
                        continue;
                    }
                    if let Some(exit) = self.apply_signal().await {
                        return Some(exit);
                    }
                }
                _ = &mut sleep => return None,
            }
        }
    }

    /// 处理最新控制信号
    async fn apply_signal(&mut self) -> Option<LoopExit> {
        let signal = *self.control.borrow_and_update();
        let now = self.schedule.now();
        let result = match (signal, self.session.status) {
            (ControlSignal::Stop { completed }, _) => return Some(LoopExit::Stopped { completed }),
            (ControlSignal::Pause, SessionStatus::Running) => {
                match self.session.pause(self.driver.as_ref()).await {
                    Ok(()) => match self.current.as_mut() {
                        Some(operation) => operation.pause(now),
                        None => Ok(()),
                    },
                    Err(e) => Err(e),
                }
            }
            (ControlSignal::Run, SessionStatus::Paused) => {
                match self.session.resume(self.driver.as_ref()).await {
                    Ok(()) => match self.current.as_mut() {
                        Some(operation) => operation.resume(now),
                        None => Ok(()),
                    },
                    Err(e) => Err(e),
                }
            }
            _ => Ok(()),
        };

        match result {
            Ok(()) => {
                self.persist();
                None
            }
            Err(e) => Some(LoopExit::Failed(e)),
        }
    }

    /// 结束编排：停止设备、结算出料、关闭作业记录、会话进入终态
    async fn finish(&mut self, exit: LoopExit) {
        let driver = Arc::clone(&self.driver);
        let line_id = self.session.line_id.clone();

        let final_kg = match driver.stop(&line_id).await {
            Ok(kg) => Some(kg),
            Err(e) => {
                warn!(session_id = %self.session.id, line_id = %line_id, error = %e, "停止设备失败");
                None
            }
        };
        if let (Some(visit), Some(kg)) = (self.session.in_flight(), final_kg) {
            self.session.observe_visit(visit.slot, kg);
        }
        self.sync_cage_progress();
        self.current_cage = None;

        let now = self.schedule.now();
        let dispensed = final_kg.unwrap_or_else(|| {
            self.current
                .as_ref()
                .map_or(0.0, |operation| operation.dispensed_kg)
        });
        let failure_code = match &exit {
            LoopExit::DeviceFault(code) => Some(code.clone()),
            LoopExit::Failed(_) => Some("ORCHESTRATION_ERROR".to_string()),
            _ => None,
        };
        if let Some(mut operation) = self.current.take() {
            let closed = match &failure_code {
                Some(code) => operation.fail(Some(code.clone()), dispensed, now),
                None => operation.stop(dispensed, now),
            };
            if let Err(e) = closed {
                warn!(operation_id = %operation.id, error = %e, "关闭作业记录失败");
            }
            if failure_code.is_some() {
                self.session.record_event(
                    FeedingEventType::VisitFailed,
                    json!({
                        "slot": operation.slot,
                        "error_code": operation.error_code,
                        "dispensed_kg": operation.dispensed_kg,
                    }),
                );
            }
            if let Err(e) = self.repos.operation_repo.save(&operation) {
                warn!(operation_id = %operation.id, error = %e, "保存作业记录失败");
            }
        }

        let outcome = match exit {
            LoopExit::Finished => self.session.stop(driver.as_ref(), true).await,
            LoopExit::Stopped { completed } => self.session.stop(driver.as_ref(), completed).await,
            LoopExit::Cancelled => {
                self.session
                    .interrupt(driver.as_ref(), "编排任务已取消")
                    .await
            }
            LoopExit::DeviceFault(code) => {
                warn!(session_id = %self.session.id, error_code = %code, "设备故障，中断会话");
                self.session
                    .interrupt(driver.as_ref(), &format!("设备故障: {}", code))
                    .await
            }
            LoopExit::WindowRejected(e) => {
                warn!(session_id = %self.session.id, error = %e, "访问超出作业窗口，中断会话");
                self.session.interrupt(driver.as_ref(), &e.to_string()).await
            }
            LoopExit::Failed(e) => {
                warn!(session_id = %self.session.id, error = %e, "编排失败，中断会话");
                self.session.interrupt(driver.as_ref(), &e.to_string()).await
            }
        };

        // 设备停止失败时会话仍须进入终态
        if let Err(e) = outcome {
            warn!(session_id = %self.session.id, error = %e, "停止会话失败，改为中断");
            let _ = self.session.interrupt(driver.as_ref(), &e.to_string()).await;
        }
        self.persist();
    }

    /// 把当前访问的出料同步到正在执行的网箱分配
    fn sync_cage_progress(&mut self) {
        let (Some(index), Some(visit)) = (self.current_cage, self.session.in_flight()) else {
            return;
        };
        if let Some(cage) = self.session.cage_feedings.get_mut(index) {
            cage.observe_visit(visit.dispensed_kg);
        }
    }

    /// 保存会话与当前作业，发布事件，并广播会话状态
    fn persist(&mut self) {
        if let Some(operation) = &self.current {
            if let Err(e) = self.repos.operation_repo.save(operation) {
                warn!(operation_id = %operation.id, error = %e, "保存作业记录失败");
            }
        }
        // 失败的事件已退回会话队列，下次持久化时重试
        let _ = self.repos.events.flush(&mut self.session);
        if let Err(e) = self.repos.session_repo.save(&self.session) {
            warn!(session_id = %self.session.id, error = %e, "保存会话失败");
        }
        self.status.send_replace(self.session.status);
    }
}
