// ==========================================
// 网箱投喂控制系统 - 演示入口
// ==========================================
// 用途: 使用模拟驱动与内存仓储，在第一条配置的投喂线上运行一次多网箱投喂
// 配置: FEEDING_CONFIG 指定 JSON 配置文件；未配置投喂线时使用内置演示线
// ==========================================

use std::sync::Arc;
use std::time::Duration;

use fish_feeding_control::api::{CageFeedingRequest, FeedingApi, MultiCageFeedingRequest};
use fish_feeding_control::domain::line::CageRoute;
use fish_feeding_control::engine::{EventDispatcher, InMemoryEventSink};
use fish_feeding_control::{logging, CageFeedingMode, FeedingConfig, LineProfile, SimulatedDriver, SystemClock};
use tracing::info;

fn demo_line() -> LineProfile {
    LineProfile {
        line_id: "LINE-01".to_string(),
        name: "演示投喂线".to_string(),
        doser_capacity_kg_per_min: 40.0,
        blow_before_secs: 3.0,
        blow_after_secs: 4.0,
        routes: vec![
            CageRoute {
                cage_id: "CAGE-A".to_string(),
                slot: 1,
                transport_time_secs: 4.0,
            },
            CageRoute {
                cage_id: "CAGE-B".to_string(),
                slot: 2,
                transport_time_secs: 6.0,
            },
            CageRoute {
                cage_id: "CAGE-C".to_string(),
                slot: 3,
                transport_time_secs: 8.0,
            },
        ],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    info!("==================================================");
    info!("{} - 投喂作业控制引擎", fish_feeding_control::APP_NAME);
    info!("系统版本: {}", fish_feeding_control::VERSION);
    info!("==================================================");

    let mut config = FeedingConfig::from_env()?;
    if config.lines.is_empty() {
        config.lines.push(demo_line());
    }
    let line = config.lines[0].clone();

    let sink = Arc::new(InMemoryEventSink::new());
    let api = FeedingApi::from_config(
        &config,
        Arc::new(SimulatedDriver::with_system_clock()),
        Arc::new(SystemClock),
        EventDispatcher::with_sink(sink.clone()),
    )?;

    let cages: Vec<CageFeedingRequest> = line
        .routes
        .iter()
        .enumerate()
        .map(|(i, route)| CageFeedingRequest {
            cage_id: route.cage_id.clone(),
            doser_id: "DOSER-1".to_string(),
            execution_order: i as u32 + 1,
            quantity_kg: 2.0,
            visits: 1,
            rate_kg_per_min: line.doser_capacity_kg_per_min / 2.0,
            mode: if i == 1 {
                CageFeedingMode::Fasting
            } else {
                CageFeedingMode::Normal
            },
        })
        .collect();

    let launch = api
        .start_multi_cage_feeding(MultiCageFeedingRequest {
            line_id: line.line_id.clone(),
            blower_speed_pct: 80.0,
            pause_between_visits_secs: 1.0,
            allow_overtime: Some(true),
            scheduled_start: None,
            cages,
        })
        .await?;
    info!(
        session_id = %launch.session_id,
        estimated_secs = launch.estimated_secs,
        "多网箱投喂已提交"
    );

    let finished = api.wait_until_finished(&line.line_id);
    tokio::pin!(finished);
    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    let final_status = loop {
        tokio::select! {
            status = &mut finished => break status?,
            _ = ticker.tick() => {
                let view = api.get_line_status(&line.line_id).await?;
                let total = view.session.as_ref().map_or(0.0, |s| s.total_dispensed_kg);
                info!(
                    stage = %view.machine.stage,
                    slot = ?view.machine.slot,
                    dispensed_kg = view.machine.dispensed_kg,
                    total_dispensed_kg = total,
                    "投喂进度"
                );
            }
        }
    };

    let session = api
        .repositories()
        .session_repo()
        .find_by_id(&launch.session_id)?;
    if let Some(session) = session {
        info!(
            status = ?final_status,
            total_dispensed_kg = session.total_dispensed_kg,
            by_slot = ?session.dispensed_by_slot,
            events = sink.events_for_session(&session.id).len(),
            "演示结束"
        );
    }
    Ok(())
}
