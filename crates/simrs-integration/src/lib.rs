//! # SIMRS集成模块
//!
//! - 进程内事件中心，向 WebSocket 显示屏等订阅方广播领域事件
//! - Webhook事件通知，把事件推送给外部系统

pub mod hub;
pub mod webhook;

pub use hub::{EventFilter, EventHub};
pub use webhook::{WebhookManager, WebhookSubscription, WebhookSubscriptionRequest};
