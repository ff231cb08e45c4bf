// ==========================================
// 作业窗口集成测试
// ==========================================
// 职责: 配置 → 作业窗口 → 时长校验，随时钟推进的剩余时间
// ==========================================


#[cfg(test)]
mod schedule_window_test {
    use crate::test_helpers::*;
    use fish_feeding_control::config::{FeedingConfigReader, OperatingWindowConfig};
    use fish_feeding_control::{
        DomainError, FeedingConfig, ManualClock, OperatingScheduleService,
    };
    use std::sync::Arc;

    async fn service_from(config: &FeedingConfig, clock: &ManualClock) -> OperatingScheduleService {
        let window = config.get_operating_window().await.unwrap();
        let selector = config.get_selector_positioning_secs().await.unwrap();
        OperatingScheduleService::new(window, Arc::new(clock.clone()), selector)
    }

    #[tokio::test]
    async fn test_remaining_time_follows_clock() {
        let clock = ManualClock::new(at(17, 0, 0));
        let svc = service_from(&test_config(), &clock).await;
        assert_eq!(svc.remaining_seconds(), 3600.0);

        clock.advance_secs(3540.0);
        assert_eq!(svc.remaining_seconds(), 60.0);
        assert!(svc.assert_fits_in_window(60.0, false).is_ok());
        assert!(matches!(
            svc.assert_fits_in_window(61.0, false),
            Err(DomainError::ExceedsOperatingWindow { .. })
        ));

        clock.advance_secs(60.0);
        assert_eq!(svc.remaining_seconds(), 0.0);
        assert!(matches!(
            svc.assert_fits_in_window(1.0, false),
            Err(DomainError::OutsideOperatingWindow { .. })
        ));
    }

    #[tokio::test]
    async fn test_window_start_is_inclusive() {
        let clock = ManualClock::new(at(5, 59, 59));
        let svc = service_from(&test_config(), &clock).await;
        assert!(svc.assert_fits_in_window(1.0, false).is_err());

        clock.advance_secs(1.0);
        assert_eq!(svc.remaining_seconds(), 12.0 * 3600.0);
        assert!(svc.assert_fits_in_window(1.0, false).is_ok());
    }

    #[tokio::test]
    async fn test_configured_timezone_and_overnight_window() {
        let config = FeedingConfig {
            operating_window: OperatingWindowConfig {
                start: "20:00".to_string(),
                end: "04:00".to_string(),
                timezone: "Asia/Shanghai".to_string(),
            },
            ..test_config()
        };

        // 16:00 UTC = 次日 00:00 上海
        let clock = ManualClock::new(at(16, 0, 0));
        let svc = service_from(&config, &clock).await;
        assert!(svc.window().wraps_midnight());
        assert_eq!(svc.remaining_seconds(), 4.0 * 3600.0);

        // 08:00 UTC = 16:00 上海，窗口未开
        clock.set(at(8, 0, 0));
        assert_eq!(svc.remaining_seconds(), 0.0);
        assert!(svc.assert_fits_in_window(10.0, false).is_err());
        assert!(svc.assert_fits_in_window(10.0, true).is_ok());
    }

    #[tokio::test]
    async fn test_visit_estimate_uses_line_route() {
        let config = FeedingConfig {
            selector_positioning_secs: 10.0,
            ..test_config()
        };
        let clock = ManualClock::new(morning());
        let svc = service_from(&config, &clock).await;

        let lines = config.get_line_profiles().await.unwrap();
        let line = &lines[0];
        let route = line.route_for_cage("C02").unwrap();
        // 10 + 3 + 30 + 6 + 4
        assert_eq!(svc.estimate_visit_duration(line, route, 5.0, 10.0).unwrap(), 53.0);
        assert!(svc.estimate_visit_duration(line, route, 5.0, 0.0).is_err());
    }

    #[test]
    fn test_invalid_window_config() {
        let config = OperatingWindowConfig {
            start: "6 o'clock".to_string(),
            ..OperatingWindowConfig::default()
        };
        assert!(config.to_window().is_err());

        let config = OperatingWindowConfig {
            start: "06:00:00".to_string(),
            end: "18:30:15".to_string(),
            timezone: "Europe/Oslo".to_string(),
        };
        assert_eq!(config.to_window().unwrap().to_string(), "06:00-18:30 Europe/Oslo");
    }
}
