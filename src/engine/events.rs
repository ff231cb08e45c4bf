// ==========================================
// 网箱投喂控制系统 - 投喂事件分发
// ==========================================
// 职责: 定义事件接收方 trait，取出会话事件队列并发布
// 约定: 发布失败时事件退回会话队首，下次 flush 重新投递，
//       每个事件恰好投递一次
// ==========================================

use crate::domain::event::FeedingEvent;
use crate::domain::session::FeedingSession;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub type SinkResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// 事件接收方 Trait
// ==========================================

/// 投喂事件接收方 (持久化/审计由外部实现)
pub trait FeedingEventSink: Send + Sync {
    /// 发布一批事件；返回 Err 表示整批未被接收
    fn publish(&self, events: &[FeedingEvent]) -> SinkResult<()>;
}

/// 空操作接收方
#[derive(Debug, Clone, Default)]
pub struct NoOpEventSink;

impl FeedingEventSink for NoOpEventSink {
    fn publish(&self, events: &[FeedingEvent]) -> SinkResult<()> {
        debug!(count = events.len(), "NoOpEventSink: 跳过事件发布");
        Ok(())
    }
}

/// 内存接收方 (演示与测试)
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<FeedingEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FeedingEvent> {
        self.events
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn events_for_session(&self, session_id: &str) -> Vec<FeedingEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect()
    }
}

impl FeedingEventSink for InMemoryEventSink {
    fn publish(&self, events: &[FeedingEvent]) -> SinkResult<()> {
        let mut guard = self
            .events
            .lock()
            .map_err(|e| format!("事件存储锁获取失败: {}", e))?;
        guard.extend_from_slice(events);
        Ok(())
    }
}

// ==========================================
// EventDispatcher
// ==========================================

/// 事件分发器，未配置接收方时事件直接丢弃
#[derive(Clone, Default)]
pub struct EventDispatcher {
    sink: Option<Arc<dyn FeedingEventSink>>,
}

impl EventDispatcher {
    pub fn with_sink(sink: Arc<dyn FeedingEventSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn none() -> Self {
        Self { sink: None }
    }

    pub fn is_configured(&self) -> bool {
        self.sink.is_some()
    }

    /// 取出会话待发布事件并发布
    ///
    /// # 返回
    /// - Ok(n): 已投递事件数
    /// - Err: 发布失败，事件已退回会话队列
    pub fn flush(&self, session: &mut FeedingSession) -> SinkResult<usize> {
        let events = session.pop_events();
        if events.is_empty() {
            return Ok(0);
        }

        let Some(sink) = &self.sink else {
            debug!(session_id = %session.id, count = events.len(), "未配置事件接收方，丢弃事件");
            return Ok(events.len());
        };

        match sink.publish(&events) {
            Ok(()) => Ok(events.len()),
            Err(e) => {
                warn!(
                    session_id = %session.id,
                    count = events.len(),
                    error = %e,
                    "事件发布失败，退回队列等待重试"
                );
                session.requeue_events(events);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::FeedingEventType;
    use crate::domain::types::SessionType;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 前 N 次发布失败的接收方
    struct FlakySink {
        failures_left: AtomicUsize,
        inner: InMemoryEventSink,
    }

    impl FeedingEventSink for FlakySink {
        fn publish(&self, events: &[FeedingEvent]) -> SinkResult<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err("sink unavailable".into());
            }
            self.inner.publish(events)
        }
    }

    #[test]
    fn test_failed_publish_is_retried_exactly_once() {
        let sink = Arc::new(FlakySink {
            failures_left: AtomicUsize::new(1),
            inner: InMemoryEventSink::new(),
        });
        let dispatcher = EventDispatcher::with_sink(sink.clone());

        let mut session = FeedingSession::new("L1", SessionType::Manual, 5.0);
        session.record_event(FeedingEventType::SessionStarted, Value::Null);
        session.record_event(FeedingEventType::SessionPaused, Value::Null);

        assert!(dispatcher.flush(&mut session).is_err());
        assert_eq!(session.pending_event_count(), 2);
        assert!(sink.inner.events().is_empty());

        session.record_event(FeedingEventType::SessionResumed, Value::Null);
        assert_eq!(dispatcher.flush(&mut session).unwrap(), 3);
        assert_eq!(dispatcher.flush(&mut session).unwrap(), 0);

        let delivered: Vec<FeedingEventType> =
            sink.inner.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            delivered,
            vec![
                FeedingEventType::SessionStarted,
                FeedingEventType::SessionPaused,
                FeedingEventType::SessionResumed
            ]
        );
    }

    #[test]
    fn test_dispatcher_without_sink_drains() {
        let dispatcher = EventDispatcher::none();
        assert!(!dispatcher.is_configured());
        let mut session = FeedingSession::new("L1", SessionType::Manual, 5.0);
        session.record_event(FeedingEventType::SessionStarted, Value::Null);
        assert_eq!(dispatcher.flush(&mut session).unwrap(), 1);
        assert_eq!(session.pending_event_count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        assert!(NoOpEventSink.publish(&[]).is_ok());
    }
}
