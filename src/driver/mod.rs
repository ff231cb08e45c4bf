// ==========================================
// 网箱投喂控制系统 - 设备驱动层
// ==========================================
// 职责: 定义投喂设备能力接口 (选择器/风机/下料器)
// 实现者: SimulatedDriver (时序模拟)；真实 PLC 适配器实现同一接口
// ==========================================

pub mod clock;
pub mod error;
pub mod simulated;

use crate::domain::machine::{MachineCommand, MachineStatus};
use async_trait::async_trait;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DriverError, DriverResult};
pub use simulated::SimulatedDriver;

// ==========================================
// DeviceDriver Trait
// ==========================================
// 同一条投喂线上的调用必须串行；不同投喂线互不影响
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// 开始一次访问 (选择器定位 → 前吹 → 出料 → 输送/后吹)
    async fn start_visit(&self, line_id: &str, command: &MachineCommand) -> DriverResult<()>;

    /// 查询当前状态快照
    async fn get_status(&self, line_id: &str) -> DriverResult<MachineStatus>;

    /// 暂停出料 (保留已出料量)
    async fn pause(&self, line_id: &str) -> DriverResult<()>;

    /// 恢复出料
    async fn resume(&self, line_id: &str) -> DriverResult<()>;

    /// 强制停止，返回最终出料量 (kg)
    async fn stop(&self, line_id: &str) -> DriverResult<f64>;

    /// 在线调整出料速率 (kg/min)
    async fn set_doser_rate(&self, line_id: &str, rate_kg_per_min: f64) -> DriverResult<()>;

    /// 在线调整本次访问的目标出料量；低于已出料量时按已出料量结束出料
    async fn set_target_kg(&self, line_id: &str, target_kg: f64) -> DriverResult<()>;

    /// 在线调整风机功率 (0~100)
    async fn set_blower_power(&self, line_id: &str, power_pct: f64) -> DriverResult<()>;
}
