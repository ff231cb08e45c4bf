// ==========================================
// 多网箱投喂编排集成测试
// ==========================================
// 职责: 验证编排任务按顺序访问网箱、响应暂停/恢复/停止/取消、处理设备故障
// 时间: 手动时钟由后台任务推进 (每 1ms 推进 1s)
// ==========================================


#[cfg(test)]
mod orchestrator_test {
    use crate::test_helpers::*;
    use fish_feeding_control::api::ApiError;
    use fish_feeding_control::domain::{FeedingEventType, FeedingSession};
    use fish_feeding_control::engine::ParameterUpdate;
    use fish_feeding_control::{
        CageFeedingMode, CageFeedingStatus, OperationStatus, SessionStatus, SessionType,
        VisitStage,
    };
    use std::collections::HashSet;
    use std::time::Duration;

    // ==========================================
    // 测试辅助函数
    // ==========================================

    async fn wait_finished(env: &TestEnv) -> SessionStatus {
        tokio::time::timeout(Duration::from_secs(10), env.api.wait_until_finished(LINE_ID))
            .await
            .expect("等待编排结束超时")
            .unwrap()
            .expect("投喂线上没有编排任务")
    }

    /// 等待已保存快照中首个网箱的出料超过 min_kg
    async fn wait_for_cage_progress(env: &TestEnv, session_id: &str, min_kg: f64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if stored_session(env, session_id).cage_feedings[0].dispensed_kg > min_kg {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("等待网箱进度超时");
    }

    fn cage_sum(session: &FeedingSession) -> f64 {
        session.cage_feedings.iter().map(|c| c.dispensed_kg).sum()
    }

    fn stored_session(env: &TestEnv, session_id: &str) -> FeedingSession {
        env.api
            .repositories()
            .session_repo()
            .find_by_id(session_id)
            .unwrap()
            .unwrap()
    }

    fn count(env: &TestEnv, session_id: &str, event_type: FeedingEventType) -> usize {
        env.sink
            .events_for_session(session_id)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    // ==========================================
    // 正常完成
    // ==========================================

    #[tokio::test]
    async fn test_multi_cage_session_completes_in_order() {
        let mut env = TestEnv::new();
        let mut fasting = cage("C02", 2, 5.0, 1);
        fasting.mode = CageFeedingMode::Fasting;
        let request = multi_cage_request(vec![
            cage("C03", 3, 3.0, 2),
            fasting,
            cage("C01", 1, 2.0, 1),
        ]);

        let launch = env.api.start_multi_cage_feeding(request).await.unwrap();
        // C01: 5+3+12+4+4=28，C03 两次各 1.5kg: 2×(5+3+9+8+4)=58
        assert!(approx_eq(launch.estimated_secs, 86.0));

        env.start_ticker(1.0);
        assert_eq!(wait_finished(&env).await, SessionStatus::Completed);

        let session = stored_session(&env, &launch.session_id);
        assert_eq!(session.session_type, SessionType::Cyclic);
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(approx_eq(session.total_programmed_kg, 5.0));
        assert!(approx_eq(session.total_dispensed_kg, 5.0));
        assert!(approx_eq(session.dispensed_by_slot[&1], 2.0));
        assert!(approx_eq(session.dispensed_by_slot[&3], 3.0));
        assert!(!session.dispensed_by_slot.contains_key(&2));

        let orders: Vec<u32> = session.cage_feedings.iter().map(|c| c.execution_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        let statuses: Vec<CageFeedingStatus> =
            session.cage_feedings.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                CageFeedingStatus::Completed,
                CageFeedingStatus::Cancelled,
                CageFeedingStatus::Completed
            ]
        );
        assert_eq!(session.cage_feedings[2].completed_visits, 2);
        assert!(approx_eq(session.cage_feedings[2].dispensed_kg, 3.0));
        assert!(approx_eq(cage_sum(&session), session.total_dispensed_kg));

        let operations = env
            .api
            .repositories()
            .operation_repo()
            .find_by_session(&launch.session_id)
            .unwrap();
        assert_eq!(operations.len(), 3);
        assert!(operations
            .iter()
            .all(|o| o.status == OperationStatus::Completed));
        let slots: Vec<u32> = operations.iter().map(|o| o.slot).collect();
        assert_eq!(slots, vec![1, 3, 3]);
    }

    #[tokio::test]
    async fn test_events_published_exactly_once() {
        let mut env = TestEnv::new();
        let launch = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![
                cage("C01", 1, 1.0, 1),
                cage("C02", 2, 1.0, 2),
            ]))
            .await
            .unwrap();

        env.start_ticker(1.0);
        assert_eq!(wait_finished(&env).await, SessionStatus::Completed);

        let sid = &launch.session_id;
        assert_eq!(count(&env, sid, FeedingEventType::SessionStarted), 1);
        assert_eq!(count(&env, sid, FeedingEventType::VisitStarted), 3);
        assert_eq!(count(&env, sid, FeedingEventType::VisitCompleted), 3);
        assert_eq!(count(&env, sid, FeedingEventType::SessionCompleted), 1);
        assert_eq!(env.sink.events_for_session(sid).len(), 8);

        let first = env.sink.events_for_session(sid);
        assert_eq!(first.first().unwrap().event_type, FeedingEventType::SessionStarted);
        assert_eq!(first.last().unwrap().event_type, FeedingEventType::SessionCompleted);

        let session = stored_session(&env, sid);
        assert_eq!(session.pending_event_count(), 0);
    }

    // ==========================================
    // 控制信号
    // ==========================================

    #[tokio::test]
    async fn test_pause_and_resume_during_visit() {
        let mut env = TestEnv::new();
        // 20kg @ 10 kg/min：出料 120s
        let launch = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![cage("C01", 1, 20.0, 1)]))
            .await
            .unwrap();

        env.start_ticker(1.0);
        env.wait_for_stage(VisitStage::Feeding).await;

        assert_eq!(env.api.pause_feeding(LINE_ID).await.unwrap(), SessionStatus::Paused);
        let paused_kg = env.api.get_line_status(LINE_ID).await.unwrap().machine.dispensed_kg;
        assert!(paused_kg < 20.0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let view = env.api.get_line_status(LINE_ID).await.unwrap();
        assert!(view.machine.paused);
        assert_eq!(view.machine.dispensed_kg, paused_kg);
        assert!(view.orchestrated);

        // 暂停期间不支持在线调参
        let result = env
            .api
            .update_parameters(
                LINE_ID,
                ParameterUpdate {
                    blower_speed_pct: Some(60.0),
                    ..ParameterUpdate::default()
                },
            )
            .await;
        assert!(matches!(result, Err(ApiError::BusinessRuleViolation(_))));

        assert_eq!(env.api.resume_feeding(LINE_ID).await.unwrap(), SessionStatus::Running);
        assert_eq!(wait_finished(&env).await, SessionStatus::Completed);

        let session = stored_session(&env, &launch.session_id);
        assert!(approx_eq(session.total_dispensed_kg, 20.0));
        assert_eq!(count(&env, &launch.session_id, FeedingEventType::SessionPaused), 1);
        assert_eq!(count(&env, &launch.session_id, FeedingEventType::SessionResumed), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_remaining_cages() {
        let mut env = TestEnv::new();
        let launch = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![
                cage("C01", 1, 20.0, 1),
                cage("C02", 2, 5.0, 1),
            ]))
            .await
            .unwrap();

        env.start_ticker(1.0);
        env.wait_for_stage(VisitStage::Feeding).await;
        // 进度按持久化节奏写入网箱分配
        wait_for_cage_progress(&env, &launch.session_id, 0.5).await;

        assert_eq!(
            env.api.stop_feeding(LINE_ID, false).await.unwrap(),
            SessionStatus::Cancelled
        );
        assert_eq!(
            env.api.stop_feeding(LINE_ID, true).await.unwrap(),
            SessionStatus::Cancelled
        );

        let session = stored_session(&env, &launch.session_id);
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert!(session.total_dispensed_kg < 20.0);
        assert!(session
            .cage_feedings
            .iter()
            .all(|c| c.status == CageFeedingStatus::Cancelled));
        // 中途停止的部分出料计入当前网箱
        assert!(approx_eq(cage_sum(&session), session.total_dispensed_kg));
        assert!(approx_eq(session.cage_feedings[0].dispensed_kg, session.total_dispensed_kg));
        assert_eq!(session.cage_feedings[1].dispensed_kg, 0.0);

        let operations = env
            .api
            .repositories()
            .operation_repo()
            .find_by_session(&launch.session_id)
            .unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].status, OperationStatus::Stopped);
        assert!(approx_eq(operations[0].dispensed_kg, session.total_dispensed_kg));
    }

    #[tokio::test]
    async fn test_device_fault_interrupts_session() {
        let mut env = TestEnv::new();
        let launch = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![
                cage("C01", 1, 20.0, 1),
                cage("C02", 2, 5.0, 1),
            ]))
            .await
            .unwrap();

        env.start_ticker(1.0);
        env.wait_for_stage(VisitStage::Feeding).await;
        env.driver.inject_fault(LINE_ID, "E_DOSER_JAM").await.unwrap();

        assert_eq!(wait_finished(&env).await, SessionStatus::Interrupted);

        let session = stored_session(&env, &launch.session_id);
        assert_eq!(session.status, SessionStatus::Interrupted);
        assert_eq!(session.cage_feedings[1].status, CageFeedingStatus::Cancelled);
        assert!(approx_eq(cage_sum(&session), session.total_dispensed_kg));

        let operations = env
            .api
            .repositories()
            .operation_repo()
            .find_by_session(&launch.session_id)
            .unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].status, OperationStatus::Failed);
        assert_eq!(operations[0].error_code.as_deref(), Some("E_DOSER_JAM"));

        assert_eq!(count(&env, &launch.session_id, FeedingEventType::VisitFailed), 1);
        assert_eq!(
            count(&env, &launch.session_id, FeedingEventType::SessionInterrupted),
            1
        );
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_running_sessions() {
        let mut env = TestEnv::new();
        let launch = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![cage("C01", 1, 20.0, 1)]))
            .await
            .unwrap();

        env.start_ticker(1.0);
        env.wait_for_stage(VisitStage::Feeding).await;

        let statuses = env.api.shutdown().await.unwrap();
        assert_eq!(statuses, vec![SessionStatus::Interrupted]);

        let session = stored_session(&env, &launch.session_id);
        assert_eq!(session.status, SessionStatus::Interrupted);
        assert!(session.actual_end.is_some());

        let view = env.api.get_line_status(LINE_ID).await.unwrap();
        assert!(!view.machine.running);
        assert!(!view.orchestrated);
    }

    // ==========================================
    // 启动校验
    // ==========================================

    #[tokio::test]
    async fn test_only_one_active_session_per_line() {
        let env = TestEnv::new();
        env.api
            .start_multi_cage_feeding(multi_cage_request(vec![cage("C01", 1, 20.0, 1)]))
            .await
            .unwrap();

        let result = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![cage("C02", 1, 1.0, 1)]))
            .await;
        assert!(matches!(result, Err(ApiError::BusinessRuleViolation(_))));

        let statuses = env.api.shutdown().await.unwrap();
        assert_eq!(statuses.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_allocations_rejected() {
        let env = TestEnv::new();

        let result = env.api.start_multi_cage_feeding(multi_cage_request(vec![])).await;
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));

        let result = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![
                cage("C01", 1, 1.0, 1),
                cage("C02", 1, 1.0, 1),
            ]))
            .await;
        assert!(result.is_err());

        let mut paused = cage("C01", 1, 1.0, 1);
        paused.mode = CageFeedingMode::Pause;
        let result = env.api.start_multi_cage_feeding(multi_cage_request(vec![paused])).await;
        assert!(result.is_err());

        let result = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![cage("C09", 1, 1.0, 1)]))
            .await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));

        assert!(env
            .api
            .repositories()
            .session_repo()
            .find_latest_by_line(LINE_ID)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_session_longer_than_window_rejected() {
        let env = TestEnv::new();
        env.clock.set(at(17, 59, 0));

        let result = env
            .api
            .start_multi_cage_feeding(multi_cage_request(vec![
                cage("C01", 1, 5.0, 1),
                cage("C02", 2, 5.0, 1),
            ]))
            .await;
        // 46s + 48s > 60s
        assert!(matches!(result, Err(ApiError::OutsideOperatingWindow(_))));
    }

    #[tokio::test]
    async fn test_scheduled_start_is_recorded() {
        let mut env = TestEnv::new();
        let mut request = multi_cage_request(vec![cage("C01", 1, 1.0, 1)]);
        request.scheduled_start = Some(at(9, 0, 0));

        let launch = env.api.start_multi_cage_feeding(request).await.unwrap();
        env.start_ticker(1.0);
        assert_eq!(wait_finished(&env).await, SessionStatus::Completed);

        let session = stored_session(&env, &launch.session_id);
        assert_eq!(session.session_type, SessionType::Scheduled);
        assert_eq!(session.scheduled_start, Some(at(9, 0, 0)));

        let ids: HashSet<String> = env
            .sink
            .events()
            .into_iter()
            .map(|e| e.session_id)
            .collect();
        assert_eq!(ids.len(), 1);
    }
}
