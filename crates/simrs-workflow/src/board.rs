//! 叫号显示屏
//!
//! 由当天号票列表计算显示屏所需的数据：当前号、候诊队列、各状态数量和平均耗时。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use simrs_core::{Polyclinic, QueueStatus, QueueTicket};
use uuid::Uuid;

/// 各状态号票数量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: i64,
    pub waiting: i64,
    pub called: i64,
    pub serving: i64,
    pub completed: i64,
    pub skipped: i64,
}

impl StatusCounts {
    fn add(&mut self, status: QueueStatus) {
        self.total += 1;
        match status {
            QueueStatus::Waiting => self.waiting += 1,
            QueueStatus::Called => self.called += 1,
            QueueStatus::Serving => self.serving += 1,
            QueueStatus::Completed => self.completed += 1,
            QueueStatus::Skipped => self.skipped += 1,
        }
    }
}

/// 显示屏数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueBoard {
    pub polyclinic_id: Uuid,
    pub polyclinic_code: String,
    pub polyclinic_name: String,
    pub queue_date: NaiveDate,
    pub current: Option<QueueTicket>,
    pub waiting: Vec<QueueTicket>,
    pub counts: StatusCounts,
    pub average_wait_minutes: Option<f64>,
    pub average_service_minutes: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

/// 计算显示屏数据
pub fn build_board(
    polyclinic: &Polyclinic,
    queue_date: NaiveDate,
    tickets: &[QueueTicket],
    now: DateTime<Utc>,
) -> QueueBoard {
    let mut counts = StatusCounts::default();
    let mut waits = Vec::new();
    let mut services = Vec::new();

    for ticket in tickets {
        counts.add(ticket.status);

        if let Some(called_at) = ticket.called_at {
            waits.push(minutes_between(ticket.created_at, called_at));
        }
        if let (Some(serving_at), Some(completed_at)) = (ticket.serving_at, ticket.completed_at) {
            services.push(minutes_between(serving_at, completed_at));
        }
    }

    // 最近一次叫到的号
    let current = tickets
        .iter()
        .filter(|t| matches!(t.status, QueueStatus::Called | QueueStatus::Serving))
        .max_by_key(|t| (t.called_at, t.number))
        .cloned();

    let mut waiting: Vec<QueueTicket> = tickets
        .iter()
        .filter(|t| t.status == QueueStatus::Waiting)
        .cloned()
        .collect();
    waiting.sort_by_key(|t| t.number);

    QueueBoard {
        polyclinic_id: polyclinic.id,
        polyclinic_code: polyclinic.code.clone(),
        polyclinic_name: polyclinic.name.clone(),
        queue_date,
        current,
        waiting,
        counts,
        average_wait_minutes: average(&waits),
        average_service_minutes: average(&services),
        generated_at: now,
    }
}

fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds().max(0) as f64 / 60.0
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((mean * 10.0).round() / 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ticket(number: i32, status: QueueStatus, base: DateTime<Utc>) -> QueueTicket {
        QueueTicket {
            id: Uuid::new_v4(),
            polyclinic_id: Uuid::nil(),
            patient_id: None,
            doctor_id: None,
            queue_date: base.date_naive(),
            number,
            code: format!("PU-{:03}", number),
            status,
            call_count: 0,
            handled_by: None,
            created_at: base,
            called_at: None,
            serving_at: None,
            completed_at: None,
            skipped_at: None,
            updated_at: base,
        }
    }

    #[test]
    fn test_board_summary() {
        let base = Utc.with_ymd_and_hms(2026, 4, 6, 1, 0, 0).unwrap();
        let poly = Polyclinic {
            id: Uuid::nil(),
            code: "PU".into(),
            name: "Poli Umum".into(),
            is_active: true,
            created_at: base,
            updated_at: base,
        };

        let mut done = ticket(1, QueueStatus::Completed, base);
        done.called_at = Some(base + Duration::minutes(10));
        done.serving_at = Some(base + Duration::minutes(12));
        done.completed_at = Some(base + Duration::minutes(27));

        let mut serving = ticket(2, QueueStatus::Serving, base);
        serving.called_at = Some(base + Duration::minutes(30));

        let tickets = vec![
            ticket(4, QueueStatus::Waiting, base),
            done,
            serving.clone(),
            ticket(3, QueueStatus::Waiting, base),
        ];

        let board = build_board(&poly, base.date_naive(), &tickets, base);
        assert_eq!(board.current.map(|t| t.id), Some(serving.id));
        assert_eq!(board.waiting.iter().map(|t| t.number).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(board.counts.total, 4);
        assert_eq!(board.counts.waiting, 2);
        assert_eq!(board.average_wait_minutes, Some(20.0));
        assert_eq!(board.average_service_minutes, Some(15.0));
    }

    #[test]
    fn test_empty_board() {
        let base = Utc.with_ymd_and_hms(2026, 4, 6, 1, 0, 0).unwrap();
        let poly = Polyclinic {
            id: Uuid::nil(),
            code: "GG".into(),
            name: "Poli Gigi".into(),
            is_active: true,
            created_at: base,
            updated_at: base,
        };
        let board = build_board(&poly, base.date_naive(), &[], base);
        assert!(board.current.is_none());
        assert_eq!(board.counts, StatusCounts::default());
        assert_eq!(board.average_wait_minutes, None);
    }
}
