// ==========================================
// 网箱投喂控制系统 - 设备驱动错误类型
// ==========================================
// 说明: 设备运行故障通过 MachineStatus.has_error 上报，
//       此处只覆盖指令无法下发的情况
// ==========================================

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("投喂线不存在: {0}")]
    LineNotFound(String),

    #[error("无效的设备指令: {0}")]
    InvalidCommand(String),

    #[error("设备通信失败: {0}")]
    Communication(String),
}

pub type DriverResult<T> = Result<T, DriverError>;
