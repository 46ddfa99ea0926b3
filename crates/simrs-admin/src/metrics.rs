//! Prometheus 指标
//!
//! 业务计数来自领域事件流，HTTP 计数由 Web 层中间件记录。

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use simrs_core::{DomainEvent, EventKind};
use tracing::debug;

/// 指标收集器
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    tickets_issued: IntCounterVec,
    queue_transitions: IntCounterVec,
    stock_movements: IntCounterVec,
    http_requests: IntCounterVec,
    events_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let tickets_issued = IntCounterVec::new(
            Opts::new(
                "simrs_queue_tickets_issued_total",
                "Queue tickets issued per polyclinic",
            ),
            &["polyclinic"],
        )?;
        let queue_transitions = IntCounterVec::new(
            Opts::new(
                "simrs_queue_transitions_total",
                "Queue ticket transitions by resulting status",
            ),
            &["status"],
        )?;
        let stock_movements = IntCounterVec::new(
            Opts::new("simrs_stock_movements_total", "Stock movements by kind"),
            &["kind"],
        )?;
        let http_requests = IntCounterVec::new(
            Opts::new("simrs_http_requests_total", "HTTP requests by method and status"),
            &["method", "status"],
        )?;
        let events_total = IntCounter::with_opts(Opts::new(
            "simrs_domain_events_total",
            "Domain events observed",
        ))?;

        registry.register(Box::new(tickets_issued.clone()))?;
        registry.register(Box::new(queue_transitions.clone()))?;
        registry.register(Box::new(stock_movements.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(events_total.clone()))?;

        Ok(Self {
            registry,
            tickets_issued,
            queue_transitions,
            stock_movements,
            http_requests,
            events_total,
        })
    }

    /// 按事件类型累加业务指标
    pub fn observe(&self, event: &DomainEvent) {
        self.events_total.inc();
        match event.kind {
            EventKind::QueueIssued => {
                let polyclinic = event
                    .polyclinic_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.tickets_issued.with_label_values(&[&polyclinic]).inc();
            }
            EventKind::QueueCalled
            | EventKind::QueueServing
            | EventKind::QueueCompleted
            | EventKind::QueueSkipped => {
                let status = event
                    .payload
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("unknown");
                self.queue_transitions.with_label_values(&[status]).inc();
            }
            EventKind::StockMoved => {
                let kind = event
                    .payload
                    .get("kind")
                    .and_then(|k| k.as_str())
                    .unwrap_or("unknown");
                self.stock_movements.with_label_values(&[kind]).inc();
            }
            _ => debug!("No metric for event {}", event.kind.as_str()),
        }
    }

    pub fn record_http_request(&self, method: &str, status: u16) {
        self.http_requests
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    /// 以文本格式导出
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_events_drive_counters() {
        let metrics = Metrics::new().unwrap();
        let poli = Uuid::new_v4();

        metrics.observe(
            &DomainEvent::new(EventKind::QueueIssued, json!({"status": "waiting"})).for_polyclinic(poli),
        );
        metrics.observe(&DomainEvent::new(EventKind::QueueCalled, json!({"status": "called"})));
        metrics.observe(&DomainEvent::new(EventKind::StockMoved, json!({"kind": "dispense"})));
        metrics.observe(&DomainEvent::new(EventKind::StockLow, json!({})));
        metrics.record_http_request("GET", 200);

        let text = metrics.render().unwrap();
        assert!(text.contains(&format!("simrs_queue_tickets_issued_total{{polyclinic=\"{}\"}} 1", poli)));
        assert!(text.contains("simrs_queue_transitions_total{status=\"called\"} 1"));
        assert!(text.contains("simrs_stock_movements_total{kind=\"dispense\"} 1"));
        assert!(text.contains("simrs_http_requests_total{method=\"GET\",status=\"200\"} 1"));
        assert!(text.contains("simrs_domain_events_total 4"));
    }
}
