//! 领域事件
//!
//! 业务服务在状态变化后发布事件，由实时推送中心转发给显示屏等订阅方。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    QueueIssued,
    QueueCalled,
    QueueRecalled,
    QueueServing,
    QueueCompleted,
    QueueSkipped,
    StockMoved,
    StockLow,
    OpnameCompleted,
    PrescriptionDispensed,
    LeaveApproved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueIssued => "queue.issued",
            Self::QueueCalled => "queue.called",
            Self::QueueRecalled => "queue.recalled",
            Self::QueueServing => "queue.serving",
            Self::QueueCompleted => "queue.completed",
            Self::QueueSkipped => "queue.skipped",
            Self::StockMoved => "stock.moved",
            Self::StockLow => "stock.low",
            Self::OpnameCompleted => "opname.completed",
            Self::PrescriptionDispensed => "prescription.dispensed",
            Self::LeaveApproved => "attendance.leave_approved",
        }
    }

    /// 事件所属的类别，例如 "queue"
    pub fn category(&self) -> &'static str {
        self.as_str().split('.').next().unwrap_or_default()
    }
}

impl TryFrom<&str> for EventKind {
    type Error = crate::SimrsError;

    fn try_from(value: &str) -> crate::Result<Self> {
        match value {
            "queue.issued" => Ok(Self::QueueIssued),
            "queue.called" => Ok(Self::QueueCalled),
            "queue.recalled" => Ok(Self::QueueRecalled),
            "queue.serving" => Ok(Self::QueueServing),
            "queue.completed" => Ok(Self::QueueCompleted),
            "queue.skipped" => Ok(Self::QueueSkipped),
            "stock.moved" => Ok(Self::StockMoved),
            "stock.low" => Ok(Self::StockLow),
            "opname.completed" => Ok(Self::OpnameCompleted),
            "prescription.dispensed" => Ok(Self::PrescriptionDispensed),
            "attendance.leave_approved" => Ok(Self::LeaveApproved),
            _ => Err(crate::SimrsError::Validation(format!(
                "Unknown event type: {}",
                value
            ))),
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        EventKind::try_from(value.as_str()).map_err(serde::de::Error::custom)
    }
}

/// 领域事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    pub polyclinic_id: Option<Uuid>,
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            occurred_at: Utc::now(),
            polyclinic_id: None,
            payload,
        }
    }

    pub fn for_polyclinic(mut self, polyclinic_id: Uuid) -> Self {
        self.polyclinic_id = Some(polyclinic_id);
        self
    }

    /// 由可序列化数据构造事件，序列化失败时以空载荷发布
    pub fn from_data<T: Serialize>(kind: EventKind, data: &T) -> Self {
        let payload = serde_json::to_value(data).unwrap_or_else(|e| {
            tracing::warn!("Failed to serialize {} payload: {}", kind.as_str(), e);
            serde_json::Value::Null
        });
        Self::new(kind, payload)
    }
}

/// 事件发布接口
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DomainEvent);
}

/// 不做任何转发的发布器
#[derive(Debug, Default, Clone)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, event: DomainEvent) {
        tracing::trace!("Dropping event {}", event.kind.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trip() {
        let kinds = [
            EventKind::QueueIssued,
            EventKind::QueueRecalled,
            EventKind::StockLow,
            EventKind::LeaveApproved,
        ];
        for kind in kinds {
            assert_eq!(EventKind::try_from(kind.as_str()).unwrap(), kind);
        }
        assert!(EventKind::try_from("queue.teleported").is_err());
    }

    #[test]
    fn test_event_serializes_dotted_type() {
        let event = DomainEvent::new(EventKind::QueueCalled, serde_json::json!({"code": "PU-001"}))
            .for_polyclinic(Uuid::nil());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "queue.called");
        assert_eq!(json["payload"]["code"], "PU-001");
        assert_eq!(EventKind::QueueCalled.category(), "queue");
    }
}
