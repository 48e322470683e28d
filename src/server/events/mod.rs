//! 事件模块
//!
//! - `types.rs`: 上传事件类型
//! - `throttle.rs`: 进度事件节流
//! - `EventBus`: 基于 broadcast 的事件发布

mod throttle;
mod types;

pub use throttle::*;
pub use types::*;

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// 事件通道容量
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// 事件总线
///
/// 没有订阅者时发布的事件直接丢弃
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<TimestampedEvent>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_id: AtomicU64::new(1),
        }
    }

    /// 发布事件
    pub fn publish(&self, event: UploadEvent) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if event.priority() == EventPriority::High {
            debug!("发布事件 #{}: {} {:?}", id, event.event_type_name(), event.task_id());
        } else {
            trace!("发布事件 #{}: {}", id, event.event_type_name());
        }
        let _ = self.sender.send(TimestampedEvent::new(id, event));
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_assigns_increasing_ids() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(UploadEvent::Cancelled {
            task_id: "a".to_string(),
        });
        bus.publish(UploadEvent::Cancelled {
            task_id: "b".to_string(),
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(first.event_id < second.event_id);
        assert_eq!(second.event.task_id(), Some("b"));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(UploadEvent::Cleared { task_ids: vec![] });
    }
}
