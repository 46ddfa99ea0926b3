//! Webhook事件通知模块
//!
//! 外部系统按事件类型订阅，转发任务从事件中心读取事件并以 JSON POST 推送。
//! 配置了密钥的订阅带有签名头 `X-Simrs-Signature: sha256=<hex>`，
//! 其值为 SHA-256(负载 + 密钥)。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use simrs_core::{DomainEvent, EventKind, Result, SimrsError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::hub::EventHub;

pub const SIGNATURE_HEADER: &str = "X-Simrs-Signature";
pub const EVENT_HEADER: &str = "X-Simrs-Event";
const MAX_ATTEMPTS: u32 = 3;

/// Webhook订阅
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<EventKind>,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub failure_count: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl WebhookSubscription {
    pub fn new(url: String, events: Vec<EventKind>, secret: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            events,
            secret,
            active: true,
            created_at: Utc::now(),
            failure_count: 0,
            last_success: None,
            last_failure: None,
        }
    }

    /// 检查是否对指定事件感兴趣
    pub fn is_interested_in(&self, kind: EventKind) -> bool {
        self.active && self.events.contains(&kind)
    }

    /// 生成签名
    pub fn generate_signature(&self, payload: &str) -> Option<String> {
        self.secret.as_deref().map(|secret| sign(payload, secret))
    }
}

pub fn sign(payload: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hasher.update(secret.as_bytes());
    format!("sha256={:x}", hasher.finalize())
}

/// Webhook订阅请求
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSubscriptionRequest {
    pub url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
    pub active: Option<bool>,
}

/// Webhook管理器
pub struct WebhookManager {
    subscriptions: RwLock<HashMap<Uuid, WebhookSubscription>>,
    client: reqwest::Client,
}

impl WebhookManager {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("SIMRS-Webhook/1.0")
            .build()
            .map_err(|e| SimrsError::Config(format!("webhook client: {}", e)))?;
        Ok(Self {
            subscriptions: RwLock::new(HashMap::new()),
            client,
        })
    }

    /// 订阅Webhook事件，无法识别的事件类型被忽略
    pub async fn subscribe(&self, request: WebhookSubscriptionRequest) -> Result<WebhookSubscription> {
        let url = request.url.trim().to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SimrsError::Validation(format!("webhook url '{}' must be http(s)", url)));
        }

        let mut events = Vec::new();
        for name in &request.events {
            match EventKind::try_from(name.as_str()) {
                Ok(kind) if !events.contains(&kind) => events.push(kind),
                Ok(_) => {}
                Err(e) => warn!("Invalid event type '{}': {}", name, e),
            }
        }
        if events.is_empty() {
            return Err(SimrsError::Validation("No valid event types specified".to_string()));
        }

        let mut subscription = WebhookSubscription::new(url, events, request.secret);
        subscription.active = request.active.unwrap_or(true);
        self.subscriptions
            .write()
            .await
            .insert(subscription.id, subscription.clone());

        info!("Created webhook subscription {} -> {}", subscription.id, subscription.url);
        Ok(subscription)
    }

    /// 取消订阅
    pub async fn unsubscribe(&self, id: Uuid) -> Result<()> {
        match self.subscriptions.write().await.remove(&id) {
            Some(_) => {
                info!("Removed webhook subscription: {}", id);
                Ok(())
            }
            None => Err(SimrsError::not_found("webhook subscription", id)),
        }
    }

    pub async fn list_subscriptions(&self) -> Vec<WebhookSubscription> {
        let mut subscriptions: Vec<_> = self.subscriptions.read().await.values().cloned().collect();
        subscriptions.sort_by_key(|s| s.created_at);
        subscriptions
    }

    /// 推送事件到所有感兴趣的订阅者，返回成功投递的数量
    pub async fn emit_event(&self, event: &DomainEvent) -> Result<usize> {
        let interested: Vec<WebhookSubscription> = self
            .subscriptions
            .read()
            .await
            .values()
            .filter(|sub| sub.is_interested_in(event.kind))
            .cloned()
            .collect();

        if interested.is_empty() {
            debug!("No subscriptions interested in event: {}", event.kind.as_str());
            return Ok(0);
        }

        let payload = serde_json::to_string(event)?;
        let mut handles = Vec::new();
        for subscription in interested {
            let payload = payload.clone();
            let client = self.client.clone();
            let kind = event.kind.as_str();
            handles.push(tokio::spawn(async move {
                let outcome = Self::send_with_retry(&client, &subscription, kind, &payload).await;
                (subscription.id, outcome)
            }));
        }

        let mut delivered = 0;
        for handle in handles {
            match handle.await {
                Ok((id, outcome)) => {
                    if outcome.is_ok() {
                        delivered += 1;
                    }
                    self.record_outcome(id, outcome.is_ok()).await;
                }
                Err(e) => error!("Webhook send task failed: {}", e),
            }
        }
        Ok(delivered)
    }

    /// 启动转发任务
    pub fn spawn_forwarder(self: Arc<Self>, hub: &EventHub) -> JoinHandle<()> {
        let mut receiver = hub.subscribe();
        tokio::spawn(async move {
            info!("Webhook forwarder started");
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.emit_event(&event).await {
                            error!("Failed to forward {}: {}", event.kind.as_str(), e);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Webhook forwarder lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            info!("Webhook forwarder stopped");
        })
    }

    async fn record_outcome(&self, id: Uuid, success: bool) {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(sub) = subscriptions.get_mut(&id) {
            if success {
                sub.last_success = Some(Utc::now());
                sub.failure_count = 0;
            } else {
                sub.last_failure = Some(Utc::now());
                sub.failure_count += 1;
            }
        }
    }

    async fn send_with_retry(
        client: &reqwest::Client,
        subscription: &WebhookSubscription,
        kind: &str,
        payload: &str,
    ) -> Result<()> {
        let mut attempt = 1;
        loop {
            match Self::send_webhook(client, subscription, kind, payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= MAX_ATTEMPTS => return Err(e),
                Err(e) => {
                    warn!("Webhook attempt {} to {} failed: {}", attempt, subscription.url, e);
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                    attempt += 1;
                }
            }
        }
    }

    /// 发送单个Webhook
    async fn send_webhook(
        client: &reqwest::Client,
        subscription: &WebhookSubscription,
        kind: &str,
        payload: &str,
    ) -> Result<()> {
        let mut request = client
            .post(&subscription.url)
            .header("Content-Type", "application/json")
            .header(EVENT_HEADER, kind)
            .body(payload.to_string());

        if let Some(signature) = subscription.generate_signature(payload) {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SimrsError::Internal(format!("webhook send failed: {}", e)))?;
        if response.status().is_success() {
            debug!("Delivered {} to {}", kind, subscription.url);
            Ok(())
        } else {
            Err(SimrsError::Internal(format!(
                "webhook {} responded {}",
                subscription.url,
                response.status()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> WebhookManager {
        WebhookManager::new(Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn test_webhook_subscription() {
        let manager = manager();
        let subscription = manager
            .subscribe(WebhookSubscriptionRequest {
                url: "https://example.com/webhook".to_string(),
                events: vec![
                    "queue.called".to_string(),
                    "stock.low".to_string(),
                    "queue.called".to_string(),
                    "study.completed".to_string(),
                ],
                secret: Some("test-secret".to_string()),
                active: None,
            })
            .await
            .unwrap();
        assert_eq!(subscription.events, vec![EventKind::QueueCalled, EventKind::StockLow]);
        assert_eq!(manager.list_subscriptions().await.len(), 1);

        manager.unsubscribe(subscription.id).await.unwrap();
        assert!(manager.list_subscriptions().await.is_empty());
        assert!(matches!(
            manager.unsubscribe(subscription.id).await,
            Err(SimrsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_validation() {
        let manager = manager();
        let bad_url = manager
            .subscribe(WebhookSubscriptionRequest {
                url: "ftp://example.com".into(),
                events: vec!["queue.called".into()],
                secret: None,
                active: None,
            })
            .await;
        assert!(matches!(bad_url, Err(SimrsError::Validation(_))));

        let no_events = manager
            .subscribe(WebhookSubscriptionRequest {
                url: "https://example.com".into(),
                events: vec!["nope".into()],
                secret: None,
                active: None,
            })
            .await;
        assert!(matches!(no_events, Err(SimrsError::Validation(_))));
    }

    #[tokio::test]
    async fn test_uninterested_event_is_not_sent() {
        let manager = manager();
        manager
            .subscribe(WebhookSubscriptionRequest {
                url: "http://127.0.0.1:9/hook".into(),
                events: vec!["stock.low".into()],
                secret: None,
                active: None,
            })
            .await
            .unwrap();
        let event = DomainEvent::new(EventKind::QueueIssued, json!({}));
        assert_eq!(manager.emit_event(&event).await.unwrap(), 0);
    }

    #[test]
    fn test_webhook_signature() {
        let subscription = WebhookSubscription::new(
            "https://example.com/webhook".to_string(),
            vec![EventKind::QueueIssued],
            Some("test-secret".to_string()),
        );

        let payload = r#"{"test": "data"}"#;
        let signature = subscription.generate_signature(payload).unwrap();
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);
        assert_eq!(signature, sign(payload, "test-secret"));
        assert_ne!(signature, sign(payload, "other-secret"));

        let unsigned = WebhookSubscription::new("https://x".into(), vec![], None);
        assert!(unsigned.generate_signature(payload).is_none());
    }
}
