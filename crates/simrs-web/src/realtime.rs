//! WebSocket 实时推送
//!
//! `GET /ws?polyclinic_id=..&kinds=queue,stock` 订阅事件中心，按条件过滤后
//! 以 JSON 文本帧推送 [`DomainEvent`]。连接落后时先收到一条 `lagged` 通知，
//! 之后继续接收新事件。
//!
//! 未带 token 的连接（叫号显示屏）只接收 `queue.*` 事件；带 token
//! （`Authorization: Bearer` 或 `?token=`）且校验通过的连接接收全部事件。

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use simrs_core::DomainEvent;
use simrs_integration::EventFilter;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{bearer_token, resolve_principal};
use crate::state::AppState;

/// 匿名连接可见的事件前缀
const PUBLIC_EVENT_PREFIX: &str = "queue.";

/// 连接参数
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeParams {
    pub polyclinic_id: Option<Uuid>,
    /// 逗号分隔的事件前缀
    pub kinds: Option<String>,
    /// 浏览器 WebSocket 无法设置请求头时使用
    pub token: Option<String>,
}

/// 连接的可见范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    Public,
    Staff,
}

impl Audience {
    fn can_see(self, event: &DomainEvent) -> bool {
        match self {
            Audience::Staff => true,
            Audience::Public => event.kind.as_str().starts_with(PUBLIC_EVENT_PREFIX),
        }
    }
}

/// 单条事件的处理结果
#[derive(Debug, PartialEq)]
enum Frame {
    Send(String),
    Skip,
    Close,
}

fn frame_for(
    received: Result<DomainEvent, RecvError>,
    filter: &EventFilter,
    audience: Audience,
) -> Frame {
    match received {
        Ok(event) if audience.can_see(&event) && filter.matches(&event) => {
            match serde_json::to_string(&event) {
                Ok(text) => Frame::Send(text),
                Err(e) => {
                    warn!("Failed to serialize event {}: {}", event.kind.as_str(), e);
                    Frame::Skip
                }
            }
        }
        Ok(_) => Frame::Skip,
        Err(RecvError::Lagged(skipped)) => {
            Frame::Send(json!({ "type": "lagged", "skipped": skipped }).to_string())
        }
        Err(RecvError::Closed) => Frame::Close,
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<RealtimeParams>,
) -> Response {
    let token = bearer_token(&headers).or(params.token.as_deref());
    let audience = match token {
        Some(token) => match resolve_principal(&state, token).await {
            Ok(principal) => {
                debug!(user = %principal.username, "Authenticated realtime client");
                Audience::Staff
            }
            Err(e) => return e.into_response(),
        },
        None => Audience::Public,
    };

    let filter = EventFilter {
        polyclinic_id: params.polyclinic_id,
        kinds: params.kinds,
    };
    let events = state.hub.subscribe();
    ws.on_upgrade(move |socket| stream_events(socket, events, filter, audience))
}

async fn stream_events(
    socket: WebSocket,
    mut events: broadcast::Receiver<DomainEvent>,
    filter: EventFilter,
    audience: Audience,
) {
    info!(
        polyclinic_id = ?filter.polyclinic_id,
        kinds = ?filter.kinds,
        audience = ?audience,
        "Realtime client connected"
    );
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            received = events.recv() => match frame_for(received, &filter, audience) {
                Frame::Send(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Frame::Skip => {}
                Frame::Close => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
                // 客户端消息不做处理
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = sender.close().await;
    info!("Realtime client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use simrs_core::EventKind;
    use uuid::Uuid;

    #[test]
    fn test_matching_event_is_sent() {
        let poli = Uuid::new_v4();
        let event = DomainEvent::new(EventKind::QueueCalled, json!({"code": "PU-001"}))
            .for_polyclinic(poli);
        let filter = EventFilter {
            polyclinic_id: Some(poli),
            kinds: Some("queue".into()),
        };

        match frame_for(Ok(event), &filter, Audience::Staff) {
            Frame::Send(text) => assert!(text.contains("PU-001")),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_other_polyclinic_is_skipped() {
        let event = DomainEvent::new(EventKind::QueueCalled, json!({}))
            .for_polyclinic(Uuid::new_v4());
        let filter = EventFilter {
            polyclinic_id: Some(Uuid::new_v4()),
            kinds: None,
        };
        assert_eq!(frame_for(Ok(event), &filter, Audience::Staff), Frame::Skip);
    }

    #[test]
    fn test_lag_produces_notice_and_close_ends_stream() {
        let filter = EventFilter::default();
        match frame_for(Err(RecvError::Lagged(7)), &filter, Audience::Public) {
            Frame::Send(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["type"], "lagged");
                assert_eq!(value["skipped"], 7);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(frame_for(Err(RecvError::Closed), &filter, Audience::Public), Frame::Close);
    }

    #[test]
    fn test_anonymous_client_only_sees_queue_events() {
        let filter = EventFilter::default();
        let dispensed = DomainEvent::new(
            EventKind::PrescriptionDispensed,
            json!({"patient_id": Uuid::new_v4()}),
        );
        let leave = DomainEvent::new(EventKind::LeaveApproved, json!({"user_id": Uuid::new_v4()}));
        let called = DomainEvent::new(EventKind::QueueCalled, json!({"code": "PU-002"}));

        assert_eq!(frame_for(Ok(dispensed.clone()), &filter, Audience::Public), Frame::Skip);
        assert_eq!(frame_for(Ok(leave), &filter, Audience::Public), Frame::Skip);
        assert!(matches!(
            frame_for(Ok(called), &filter, Audience::Public),
            Frame::Send(_)
        ));
        assert!(matches!(
            frame_for(Ok(dispensed), &filter, Audience::Staff),
            Frame::Send(_)
        ));
    }
}
