// ==========================================
// 网箱投喂控制系统 - 作业窗口服务
// ==========================================
// 职责: 计算每日作业窗口 (本地时间) 剩余秒数，拒绝超出窗口的访问
// 规则: start > end 视为跨零点窗口；allow_overtime=true 时跳过全部检查
// ==========================================

use crate::domain::error::{DomainError, DomainResult};
use crate::domain::line::{CageRoute, LineProfile};
use crate::driver::Clock;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

const SECONDS_PER_DAY: f64 = 86_400.0;

fn secs_of_day(t: NaiveTime) -> f64 {
    t.num_seconds_from_midnight() as f64 + t.nanosecond() as f64 / 1_000_000_000.0
}

/// 解析 HH:MM 或 HH:MM:SS
pub fn parse_time_of_day(value: &str) -> DomainResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| DomainError::Validation(format!("无效的时间格式: {}", value)))
}

// ==========================================
// OperatingWindow - 每日作业窗口
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl OperatingWindow {
    pub fn new(start: NaiveTime, end: NaiveTime, timezone: Tz) -> DomainResult<Self> {
        if start == end {
            return Err(DomainError::Validation(format!(
                "作业窗口起止时间不能相同: {}",
                start
            )));
        }
        Ok(Self {
            start,
            end,
            timezone,
        })
    }

    /// 由配置字符串构造 ("06:00", "18:00", "Asia/Shanghai")
    pub fn parse(start: &str, end: &str, timezone: &str) -> DomainResult<Self> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| DomainError::Validation(format!("无效的时区: {}", timezone)))?;
        Self::new(parse_time_of_day(start)?, parse_time_of_day(end)?, tz)
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.timezone).time()
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let t = self.local_time(now);
        if self.wraps_midnight() {
            t >= self.start || t < self.end
        } else {
            t >= self.start && t < self.end
        }
    }

    /// 距窗口关闭的剩余秒数；窗口外返回 0
    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> f64 {
        if !self.contains(now) {
            return 0.0;
        }
        let t = secs_of_day(self.local_time(now));
        let end = secs_of_day(self.end);
        if end > t {
            end - t
        } else {
            SECONDS_PER_DAY - t + end
        }
    }
}

impl fmt::Display for OperatingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{} {}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M"),
            self.timezone.name()
        )
    }
}

// ==========================================
// OperatingScheduleService
// ==========================================
pub struct OperatingScheduleService {
    window: OperatingWindow,
    clock: Arc<dyn Clock>,
    selector_positioning_secs: f64,
}

impl OperatingScheduleService {
    pub fn new(window: OperatingWindow, clock: Arc<dyn Clock>, selector_positioning_secs: f64) -> Self {
        Self {
            window,
            clock,
            selector_positioning_secs,
        }
    }

    pub fn window(&self) -> &OperatingWindow {
        &self.window
    }

    pub fn selector_positioning_secs(&self) -> f64 {
        self.selector_positioning_secs
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn remaining_seconds(&self) -> f64 {
        self.window.remaining_seconds_at(self.clock.now())
    }

    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> f64 {
        self.window.remaining_seconds_at(now)
    }

    pub fn assert_fits_in_window(&self, estimated_secs: f64, allow_overtime: bool) -> DomainResult<()> {
        self.assert_fits_in_window_at(estimated_secs, allow_overtime, self.clock.now())
    }

    /// 窗口关闭或预计时长超出剩余时间时拒绝
    pub fn assert_fits_in_window_at(
        &self,
        estimated_secs: f64,
        allow_overtime: bool,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if allow_overtime {
            return Ok(());
        }

        if !self.window.contains(now) {
            let local_time = self.window.local_time(now).format("%H:%M:%S").to_string();
            warn!(window = %self.window, local_time = %local_time, "当前不在作业窗口内");
            return Err(DomainError::OutsideOperatingWindow {
                window: self.window.to_string(),
                local_time,
            });
        }

        let remaining_secs = self.window.remaining_seconds_at(now);
        if estimated_secs > remaining_secs {
            warn!(
                window = %self.window,
                estimated_secs,
                remaining_secs,
                "预计时长超出作业窗口"
            );
            return Err(DomainError::ExceedsOperatingWindow {
                estimated_secs,
                remaining_secs,
            });
        }
        Ok(())
    }

    /// 单次访问预计时长 = 选择器定位 + 前吹 + 出料 + 输送 + 后吹
    pub fn estimate_visit_duration(
        &self,
        line: &LineProfile,
        route: &CageRoute,
        quantity_kg: f64,
        rate_kg_per_min: f64,
    ) -> DomainResult<f64> {
        line.visit_timing(self.selector_positioning_secs, route)
            .estimate_visit_secs(quantity_kg, rate_kg_per_min)
    }
}
