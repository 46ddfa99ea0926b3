//! 进程内事件中心
//!
//! 基于 `tokio::sync::broadcast`，业务服务发布的事件被分发给
//! WebSocket 连接、指标收集和 Webhook 转发等订阅方。

use serde::Deserialize;
use simrs_core::{DomainEvent, EventPublisher};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 事件中心
#[derive(Debug, Clone)]
pub struct EventHub {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// 在后台任务中逐个处理事件，落后时跳过丢失的部分继续
    pub fn spawn_listener<F>(&self, name: &'static str, handler: F) -> JoinHandle<()>
    where
        F: Fn(DomainEvent) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => handler(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(listener = name, skipped, "Event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!(listener = name, "Event listener stopped");
        })
    }
}

impl EventPublisher for EventHub {
    fn publish(&self, event: DomainEvent) {
        let kind = event.kind.as_str();
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!(kind, receivers, "Event published"),
            // 没有订阅者时事件直接丢弃
            Err(_) => tracing::trace!(kind, "Event published without subscribers"),
        }
    }
}

/// 订阅过滤条件
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub polyclinic_id: Option<Uuid>,
    /// 逗号分隔的类型前缀，例如 `queue,stock.low`
    pub kinds: Option<String>,
}

impl EventFilter {
    pub fn matches(&self, event: &DomainEvent) -> bool {
        if let Some(polyclinic_id) = self.polyclinic_id {
            if event.polyclinic_id != Some(polyclinic_id) {
                return false;
            }
        }
        match &self.kinds {
            None => true,
            Some(kinds) => {
                let kind = event.kind.as_str();
                let mut prefixes = kinds.split(',').map(str::trim).filter(|p| !p.is_empty()).peekable();
                if prefixes.peek().is_none() {
                    return true;
                }
                prefixes.any(|prefix| {
                    kind == prefix
                        || (kind.starts_with(prefix) && kind[prefix.len()..].starts_with('.'))
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use simrs_core::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = EventHub::new(16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(DomainEvent::new(EventKind::QueueIssued, json!({"number": 1})));
        assert_eq!(a.recv().await.unwrap().kind, EventKind::QueueIssued);
        assert_eq!(b.recv().await.unwrap().payload["number"], 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let hub = EventHub::new(4);
        hub.publish(DomainEvent::new(EventKind::StockLow, json!({})));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_listener_counts_events() {
        let hub = EventHub::new(16);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = hub.spawn_listener("test", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..3 {
            hub.publish(DomainEvent::new(EventKind::StockMoved, json!({})));
        }
        drop(hub);
        handle.await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_filter_by_polyclinic_and_prefix() {
        let poli = Uuid::new_v4();
        let called = DomainEvent::new(EventKind::QueueCalled, json!({})).for_polyclinic(poli);
        let low = DomainEvent::new(EventKind::StockLow, json!({}));

        let all = EventFilter::default();
        assert!(all.matches(&called) && all.matches(&low));

        let queue_only = EventFilter {
            polyclinic_id: None,
            kinds: Some("queue".into()),
        };
        assert!(queue_only.matches(&called));
        assert!(!queue_only.matches(&low));

        let this_poli = EventFilter {
            polyclinic_id: Some(poli),
            kinds: Some("stock.low, queue.called".into()),
        };
        assert!(this_poli.matches(&called));
        assert!(!this_poli.matches(&low));

        let partial = EventFilter {
            polyclinic_id: None,
            kinds: Some("que".into()),
        };
        assert!(!partial.matches(&called));
    }
}
