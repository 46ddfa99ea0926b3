//! 门诊排队号票

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    /// 号票状态，只允许向前流转
    QueueStatus {
        Waiting => "waiting",     // 等待叫号
        Called => "called",       // 已叫号
        Serving => "serving",     // 就诊中
        Completed => "completed", // 已完成
        Skipped => "skipped",     // 已过号
    }
}

impl QueueStatus {
    /// 是否仍占用队列位置
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Waiting | QueueStatus::Called | QueueStatus::Serving)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Skipped)
    }
}

/// 排队号票
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueTicket {
    pub id: Uuid,
    pub polyclinic_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub number: i32,
    pub code: String,
    pub status: QueueStatus,
    pub call_count: i32,
    pub handled_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub serving_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// 取号请求（号码由存储层分配）
#[derive(Debug, Clone)]
pub struct NewQueueTicket {
    pub polyclinic_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub code_prefix: String,
}

/// 号票状态变更（比较并交换）
#[derive(Debug, Clone)]
pub struct TicketTransition {
    pub ticket_id: Uuid,
    pub expected: QueueStatus,
    pub to: QueueStatus,
    pub at: DateTime<Utc>,
    pub handled_by: Option<Uuid>,
    pub bump_call_count: bool,
}

/// 号票查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueFilter {
    pub polyclinic_id: Option<Uuid>,
    pub queue_date: Option<NaiveDate>,
    pub statuses: Option<Vec<QueueStatus>>,
    pub patient_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
