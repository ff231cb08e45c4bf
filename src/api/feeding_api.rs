// ==========================================
// 网箱投喂控制系统 - 投喂用例 API
// ==========================================
// 职责: 手动投喂、多网箱投喂、暂停/恢复/停止、在线调参、状态查询
// 并发: 同一投喂线的用例在 LineLocks 内串行；"每线最多一个活动会话"在锁内检查
// 编排: 多网箱会话交给后台编排任务，本层只保留 OrchestrationHandle
// ==========================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::dto::{
    FeedingLaunch, LineStatusView, ManualFeedingRequest, MultiCageFeedingRequest, VisitEstimate,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::line_locks::LineLocks;
use crate::config::FeedingConfig;
use crate::domain::cage_feeding::CageFeeding;
use crate::domain::event::FeedingEventType;
use crate::domain::line::LineProfile;
use crate::domain::operation::Operation;
use crate::domain::session::FeedingSession;
use crate::domain::types::{SessionStatus, SessionType, VisitStage};
use crate::driver::{Clock, DeviceDriver};
use crate::engine::events::EventDispatcher;
use crate::engine::orchestrator::{FeedingOrchestrator, OrchestrationHandle, OrchestratorSettings};
use crate::engine::repositories::FeedingRepositories;
use crate::engine::schedule::OperatingScheduleService;
use crate::engine::strategy::{
    AdjustedStrategy, CyclicFeedingStrategy, FeedingStrategy, ManualFeedingStrategy,
    ParameterUpdate, ScheduledFeedingStrategy,
};
use crate::repository::InMemoryLineCatalog;

// ==========================================
// FeedingApi - 投喂用例 API
// ==========================================
pub struct FeedingApi {
    driver: Arc<dyn DeviceDriver>,
    repos: FeedingRepositories,
    schedule: Arc<OperatingScheduleService>,
    settings: OrchestratorSettings,
    line_locks: LineLocks,
    orchestrations: Mutex<HashMap<String, Arc<OrchestrationHandle>>>,
    root_cancel: CancellationToken,
}

impl FeedingApi {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        repos: FeedingRepositories,
        schedule: Arc<OperatingScheduleService>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            driver,
            repos,
            schedule,
            settings,
            line_locks: LineLocks::new(),
            orchestrations: Mutex::new(HashMap::new()),
            root_cancel: CancellationToken::new(),
        }
    }

    /// 按配置装配：内存仓储 + 配置中的投喂线 + 作业窗口
    pub fn from_config(
        config: &FeedingConfig,
        driver: Arc<dyn DeviceDriver>,
        clock: Arc<dyn Clock>,
        events: EventDispatcher,
    ) -> ApiResult<Self> {
        config.validate()?;
        let catalog = InMemoryLineCatalog::new(config.lines.clone())?;
        let window = config.operating_window.to_window()?;
        let schedule = Arc::new(OperatingScheduleService::new(
            window,
            clock,
            config.selector_positioning_secs,
        ));
        Ok(Self::new(
            driver,
            FeedingRepositories::in_memory(catalog, events),
            schedule,
            OrchestratorSettings::from_config(config),
        ))
    }

    pub fn repositories(&self) -> &FeedingRepositories {
        &self.repos
    }

    pub fn schedule(&self) -> &Arc<OperatingScheduleService> {
        &self.schedule
    }

    // ==========================================
    // 启动用例
    // ==========================================

    /// 手动投喂：单网箱单次访问，立即下发
    pub async fn start_manual_feeding(
        &self,
        request: ManualFeedingRequest,
    ) -> ApiResult<FeedingSession> {
        validate_line_id(&request.line_id)?;
        validate_positive("quantity_kg", request.quantity_kg)?;
        validate_positive("rate_kg_per_min", request.rate_kg_per_min)?;

        let _guard = self.line_locks.acquire(&request.line_id).await?;
        let line = self.load_line(&request.line_id)?;
        self.ensure_line_idle(&request.line_id)?;

        let route = line.route_for_cage(&request.cage_id)?;
        let doser_speed_pct = line.speed_for_rate(request.rate_kg_per_min)?;
        let strategy = ManualFeedingStrategy::new(
            route.slot,
            request.blower_speed_pct,
            doser_speed_pct,
            request.quantity_kg,
        );

        let estimated_secs = self.schedule.estimate_visit_duration(
            &line,
            route,
            request.quantity_kg,
            request.rate_kg_per_min,
        )?;
        self.schedule
            .assert_fits_in_window(estimated_secs, self.allow_overtime(request.allow_overtime))?;

        let mut session =
            FeedingSession::new(&request.line_id, strategy.session_type(), request.quantity_kg);
        let dispatched = session
            .start(
                &strategy,
                self.driver.as_ref(),
                &line,
                self.schedule.selector_positioning_secs(),
            )
            .await?;
        if let Some(command) = dispatched {
            let operation = Operation::start(
                &session.id,
                &session.line_id,
                None,
                command,
                self.schedule.now(),
            );
            self.repos.operation_repo.save(&operation)?;
        }
        self.persist(&mut session)?;

        info!(
            session_id = %session.id,
            line_id = %session.line_id,
            cage_id = %request.cage_id,
            quantity_kg = request.quantity_kg,
            estimated_secs,
            "手动投喂已启动"
        );
        Ok(session)
    }

    /// 多网箱投喂：校验后立即返回预计时长，编排在后台执行
    pub async fn start_multi_cage_feeding(
        &self,
        request: MultiCageFeedingRequest,
    ) -> ApiResult<FeedingLaunch> {
        validate_line_id(&request.line_id)?;
        if request.cages.is_empty() {
            return Err(ApiError::InvalidInput("网箱分配列表不能为空".to_string()));
        }
        if request.pause_between_visits_secs < 0.0 {
            return Err(ApiError::InvalidInput(
                "pause_between_visits_secs 不能为负数".to_string(),
            ));
        }

        let _guard = self.line_locks.acquire(&request.line_id).await?;
        let line = self.load_line(&request.line_id)?;
        self.ensure_line_idle(&request.line_id)?;

        let mut cages = Vec::with_capacity(request.cages.len());
        for cage in &request.cages {
            cages.push(CageFeeding::new(
                &cage.cage_id,
                &cage.doser_id,
                cage.execution_order,
                cage.quantity_kg,
                cage.visits,
                cage.rate_kg_per_min,
                cage.mode,
            )?);
        }

        let cycle = CyclicFeedingStrategy::from_allocations(
            &cages,
            &line,
            request.blower_speed_pct,
            request.pause_between_visits_secs,
        )?;
        let strategy: Box<dyn FeedingStrategy> = match request.scheduled_start {
            Some(scheduled_start) => Box::new(ScheduledFeedingStrategy {
                cycle,
                scheduled_start,
            }),
            None => Box::new(cycle),
        };

        let estimated_secs =
            self.estimate_session_secs(&line, &cages, request.pause_between_visits_secs)?;
        self.schedule
            .assert_fits_in_window(estimated_secs, self.allow_overtime(request.allow_overtime))?;

        let mut session =
            FeedingSession::with_cage_feedings(&request.line_id, strategy.session_type(), cages)?;
        if let Some(scheduled_start) = request.scheduled_start {
            session = session.with_scheduled_start(scheduled_start);
        }
        session
            .start(
                strategy.as_ref(),
                self.driver.as_ref(),
                &line,
                self.schedule.selector_positioning_secs(),
            )
            .await?;
        self.persist(&mut session)?;

        let mut settings = self.settings.clone();
        if let Some(allow_overtime) = request.allow_overtime {
            settings.allow_overtime = allow_overtime;
        }
        let launch = FeedingLaunch {
            session_id: session.id.clone(),
            line_id: session.line_id.clone(),
            estimated_secs,
        };
        let handle = FeedingOrchestrator::spawn(
            session,
            line,
            Arc::clone(&self.driver),
            self.repos.clone(),
            Arc::clone(&self.schedule),
            settings,
            self.root_cancel.child_token(),
        );
        self.orchestrations()?
            .insert(request.line_id.clone(), Arc::new(handle));

        info!(
            session_id = %launch.session_id,
            line_id = %launch.line_id,
            cages = request.cages.len(),
            estimated_secs,
            "多网箱投喂已启动"
        );
        Ok(launch)
    }

    // ==========================================
    // 控制用例
    // ==========================================

    pub async fn pause_feeding(&self, line_id: &str) -> ApiResult<SessionStatus> {
        let _guard = self.line_locks.acquire(line_id).await?;
        if let Some(handle) = self.active_orchestration(line_id)? {
            return Ok(handle.pause().await?);
        }

        let mut session = self.active_session(line_id)?;
        session.pause(self.driver.as_ref()).await?;
        if let Some(mut operation) = self.open_operation(&session.id)? {
            operation.pause(self.schedule.now())?;
            self.repos.operation_repo.save(&operation)?;
        }
        self.persist(&mut session)?;
        Ok(session.status)
    }

    pub async fn resume_feeding(&self, line_id: &str) -> ApiResult<SessionStatus> {
        let _guard = self.line_locks.acquire(line_id).await?;
        if let Some(handle) = self.active_orchestration(line_id)? {
            return Ok(handle.resume().await?);
        }

        let mut session = self.active_session(line_id)?;
        session.resume(self.driver.as_ref()).await?;
        if let Some(mut operation) = self.open_operation(&session.id)? {
            operation.resume(self.schedule.now())?;
            self.repos.operation_repo.save(&operation)?;
        }
        self.persist(&mut session)?;
        Ok(session.status)
    }

    /// 停止 (幂等)：无活动会话时返回最近一次会话的终态
    pub async fn stop_feeding(&self, line_id: &str, completed: bool) -> ApiResult<SessionStatus> {
        let _guard = self.line_locks.acquire(line_id).await?;
        if let Some(handle) = self.active_orchestration(line_id)? {
            let status = handle.stop(completed).await;
            self.orchestrations()?.remove(line_id);
            info!(line_id = %line_id, status = %status, "多网箱投喂已停止");
            return Ok(status);
        }

        match self.repos.session_repo.find_active_by_line(line_id)? {
            Some(mut session) => {
                let status = session.stop(self.driver.as_ref(), completed).await?;
                if let Some(mut operation) = self.open_operation(&session.id)? {
                    operation.stop(session.total_dispensed_kg, self.schedule.now())?;
                    self.repos.operation_repo.save(&operation)?;
                }
                self.persist(&mut session)?;
                info!(session_id = %session.id, line_id = %line_id, status = %status, "投喂已停止");
                Ok(status)
            }
            None => self
                .repos
                .session_repo
                .find_latest_by_line(line_id)?
                .map(|session| session.status)
                .ok_or_else(|| ApiError::NotFound(format!("投喂线 {} 没有投喂会话", line_id))),
        }
    }

    /// 在线调参 (仅手动会话)；未给出的字段沿用当前配置
    pub async fn update_parameters(
        &self,
        line_id: &str,
        update: ParameterUpdate,
    ) -> ApiResult<FeedingSession> {
        if update.is_empty() {
            return Err(ApiError::InvalidInput("没有需要更新的参数".to_string()));
        }

        let _guard = self.line_locks.acquire(line_id).await?;
        if self.active_orchestration(line_id)?.is_some() {
            return Err(ApiError::BusinessRuleViolation(
                "多网箱会话由编排任务下发参数，不支持在线调参".to_string(),
            ));
        }

        let line = self.load_line(line_id)?;
        let mut session = self.active_session(line_id)?;
        let base = session.applied_configuration.clone().ok_or_else(|| {
            ApiError::InvalidStateTransition {
                entity: "FeedingSession".to_string(),
                from: session.status.to_string(),
                action: "update_parameters".to_string(),
            }
        })?;
        let target_update = update.target_kg;
        let strategy = AdjustedStrategy::new(base, update, session.session_type);
        session
            .update_parameters(&strategy, self.driver.as_ref(), &line)
            .await?;
        if let Some(target_kg) = target_update {
            if let Some(mut operation) = self.open_operation(&session.id)? {
                operation.retarget(target_kg.max(operation.dispensed_kg))?;
                self.repos.operation_repo.save(&operation)?;
            }
        }
        self.persist(&mut session)?;
        Ok(session)
    }

    /// 同步手动会话：读取设备状态累计出料，访问完成后自动结束会话
    pub async fn sync_manual_session(&self, line_id: &str) -> ApiResult<FeedingSession> {
        let _guard = self.line_locks.acquire(line_id).await?;
        if let Some(handle) = self.active_orchestration(line_id)? {
            return self
                .repos
                .session_repo
                .find_by_id(handle.session_id())?
                .ok_or_else(|| ApiError::NotFound(format!("会话 {}", handle.session_id())));
        }

        let mut session = self.active_session(line_id)?;
        let status = self.driver.get_status(line_id).await?;
        if let Some(visit) = session.in_flight() {
            session.observe_visit(visit.slot, status.dispensed_kg);
        }
        let mut operation = self.open_operation(&session.id)?;
        if let Some(operation) = operation.as_mut() {
            operation.update_progress(status.dispensed_kg)?;
        }

        let now = self.schedule.now();
        if status.has_error {
            let code = status
                .error_code
                .unwrap_or_else(|| "UNKNOWN_DEVICE_ERROR".to_string());
            warn!(session_id = %session.id, line_id = %line_id, error_code = %code, "设备故障，中断手动投喂");
            if let Some(operation) = operation.as_mut() {
                operation.fail(Some(code.clone()), status.dispensed_kg, now)?;
                session.record_event(
                    FeedingEventType::VisitFailed,
                    json!({
                        "slot": operation.slot,
                        "error_code": operation.error_code,
                        "dispensed_kg": operation.dispensed_kg,
                    }),
                );
            }
            session
                .interrupt(self.driver.as_ref(), &format!("设备故障: {}", code))
                .await?;
        } else if status.stage == VisitStage::Completed && session.session_type == SessionType::Manual {
            if let Some(operation) = operation.as_mut() {
                operation.complete(status.dispensed_kg, now)?;
            }
            session.stop(self.driver.as_ref(), true).await?;
        }

        if let Some(operation) = &operation {
            self.repos.operation_repo.save(operation)?;
        }
        self.persist(&mut session)?;
        Ok(session)
    }

    // ==========================================
    // 查询用例
    // ==========================================

    pub async fn get_line_status(&self, line_id: &str) -> ApiResult<LineStatusView> {
        self.load_line(line_id)?;
        let machine = self.driver.get_status(line_id).await?;
        let session = match self.repos.session_repo.find_active_by_line(line_id)? {
            Some(session) => Some(session),
            None => self.repos.session_repo.find_latest_by_line(line_id)?,
        };
        Ok(LineStatusView {
            line_id: line_id.to_string(),
            machine,
            session,
            orchestrated: self.active_orchestration(line_id)?.is_some(),
        })
    }

    /// 单次访问预计时长及作业窗口余量
    pub fn estimate_visit(
        &self,
        line_id: &str,
        cage_id: &str,
        quantity_kg: f64,
        rate_kg_per_min: f64,
    ) -> ApiResult<VisitEstimate> {
        let line = self.load_line(line_id)?;
        let route = line.route_for_cage(cage_id)?;
        let estimated_secs =
            self.schedule
                .estimate_visit_duration(&line, route, quantity_kg, rate_kg_per_min)?;
        let remaining_window_secs = self.schedule.remaining_seconds();
        Ok(VisitEstimate {
            estimated_secs,
            remaining_window_secs,
            fits_in_window: estimated_secs <= remaining_window_secs,
        })
    }

    /// 等待投喂线上的编排任务结束；没有编排任务时返回 None
    pub async fn wait_until_finished(&self, line_id: &str) -> ApiResult<Option<SessionStatus>> {
        let handle = self.orchestrations()?.get(line_id).cloned();
        match handle {
            Some(handle) => Ok(Some(handle.wait_terminal().await)),
            None => Ok(None),
        }
    }

    /// 取消全部编排任务并等待其会话进入终态
    pub async fn shutdown(&self) -> ApiResult<Vec<SessionStatus>> {
        self.root_cancel.cancel();
        let handles: Vec<Arc<OrchestrationHandle>> =
            self.orchestrations()?.drain().map(|(_, handle)| handle).collect();
        let statuses = join_all(handles.iter().map(|handle| handle.wait_terminal())).await;
        info!(count = statuses.len(), "全部编排任务已结束");
        Ok(statuses)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn orchestrations(
        &self,
    ) -> ApiResult<std::sync::MutexGuard<'_, HashMap<String, Arc<OrchestrationHandle>>>> {
        self.orchestrations
            .lock()
            .map_err(|e| ApiError::InternalError(format!("编排任务表锁获取失败: {}", e)))
    }

    /// 未结束的编排任务；已结束的任务顺带移除
    fn active_orchestration(&self, line_id: &str) -> ApiResult<Option<Arc<OrchestrationHandle>>> {
        let mut orchestrations = self.orchestrations()?;
        match orchestrations.get(line_id) {
            Some(handle) if handle.status().is_terminal() => {
                orchestrations.remove(line_id);
                Ok(None)
            }
            Some(handle) => Ok(Some(Arc::clone(handle))),
            None => Ok(None),
        }
    }

    /// 会话中尚未关闭的访问作业 (手动会话至多一条)
    fn open_operation(&self, session_id: &str) -> ApiResult<Option<Operation>> {
        Ok(self
            .repos
            .operation_repo
            .find_by_session(session_id)?
            .into_iter()
            .find(|operation| !operation.status.is_closed()))
    }

    fn load_line(&self, line_id: &str) -> ApiResult<LineProfile> {
        self.repos
            .line_catalog
            .find_line(line_id)?
            .ok_or_else(|| ApiError::NotFound(format!("投喂线(id={})不存在", line_id)))
    }

    fn ensure_line_idle(&self, line_id: &str) -> ApiResult<()> {
        let busy = self.active_orchestration(line_id)?.is_some()
            || self.repos.session_repo.find_active_by_line(line_id)?.is_some();
        if busy {
            return Err(ApiError::BusinessRuleViolation(format!(
                "投喂线 {} 已有进行中的投喂会话",
                line_id
            )));
        }
        Ok(())
    }

    fn active_session(&self, line_id: &str) -> ApiResult<FeedingSession> {
        self.repos
            .session_repo
            .find_active_by_line(line_id)?
            .ok_or_else(|| ApiError::NotFound(format!("投喂线 {} 没有进行中的会话", line_id)))
    }

    /// 先发布事件再保存；发布失败的事件留在会话中随快照保存，下次重试
    fn persist(&self, session: &mut FeedingSession) -> ApiResult<()> {
        let _ = self.repos.events.flush(session);
        self.repos.session_repo.save(session)?;
        Ok(())
    }

    fn allow_overtime(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or(self.settings.allow_overtime)
    }

    /// 会话总预计时长 = Σ(每次访问时长 × 访问次数) + 访问间隔
    fn estimate_session_secs(
        &self,
        line: &LineProfile,
        cages: &[CageFeeding],
        pause_between_visits_secs: f64,
    ) -> ApiResult<f64> {
        let mut total_secs = 0.0;
        let mut total_visits = 0u32;
        for cage in cages.iter().filter(|c| !c.mode.is_skipped()) {
            let route = line.route_for_cage(&cage.cage_id)?;
            let per_visit_kg = cage.programmed_kg / cage.programmed_visits as f64;
            let per_visit_secs = self.schedule.estimate_visit_duration(
                line,
                route,
                per_visit_kg,
                cage.rate_kg_per_min,
            )?;
            total_secs += per_visit_secs * cage.programmed_visits as f64;
            total_visits += cage.programmed_visits;
        }
        if total_visits > 1 {
            total_secs += pause_between_visits_secs * (total_visits - 1) as f64;
        }
        Ok(total_secs)
    }
}

fn validate_line_id(line_id: &str) -> ApiResult<()> {
    if line_id.trim().is_empty() {
        return Err(ApiError::InvalidInput("投喂线ID不能为空".to_string()));
    }
    Ok(())
}

fn validate_positive(field: &str, value: f64) -> ApiResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ApiError::InvalidInput(format!("{} 必须大于 0: {}", field, value)));
    }
    Ok(())
}
