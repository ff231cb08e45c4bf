// ==========================================
// 网箱投喂控制系统 - API 请求/响应结构
// ==========================================

use crate::domain::machine::MachineStatus;
use crate::domain::session::FeedingSession;
use crate::domain::types::CageFeedingMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_visits() -> u32 {
    1
}

fn default_mode() -> CageFeedingMode {
    CageFeedingMode::Normal
}

/// 手动投喂请求 (单网箱单次访问)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualFeedingRequest {
    pub line_id: String,
    pub cage_id: String,
    pub quantity_kg: f64,
    pub rate_kg_per_min: f64,
    pub blower_speed_pct: f64,
    /// 覆盖配置中的 allow_overtime
    #[serde(default)]
    pub allow_overtime: Option<bool>,
}

/// 多网箱分配中的单个网箱
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CageFeedingRequest {
    pub cage_id: String,
    pub doser_id: String,
    pub execution_order: u32,
    pub quantity_kg: f64,
    #[serde(default = "default_visits")]
    pub visits: u32,
    pub rate_kg_per_min: f64,
    #[serde(default = "default_mode")]
    pub mode: CageFeedingMode,
}

/// 多网箱投喂请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiCageFeedingRequest {
    pub line_id: String,
    pub blower_speed_pct: f64,
    #[serde(default)]
    pub pause_between_visits_secs: f64,
    #[serde(default)]
    pub allow_overtime: Option<bool>,
    /// 设置时会话类型为 SCHEDULED
    #[serde(default)]
    pub scheduled_start: Option<DateTime<Utc>>,
    pub cages: Vec<CageFeedingRequest>,
}

/// 多网箱投喂启动结果 (编排在后台继续执行)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedingLaunch {
    pub session_id: String,
    pub line_id: String,
    pub estimated_secs: f64,
}

/// 单次访问预计时长
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEstimate {
    pub estimated_secs: f64,
    pub remaining_window_secs: f64,
    pub fits_in_window: bool,
}

/// 投喂线状态视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineStatusView {
    pub line_id: String,
    pub machine: MachineStatus,
    pub session: Option<FeedingSession>,
    pub orchestrated: bool,
}
