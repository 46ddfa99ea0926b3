//! 号票的 PostgreSQL 存储
//!
//! 每日号码来自 `queue_counters` 的 upsert 行锁，同一 (科室, 日期)
//! 的并发取号在该行上串行，号码不重复也不跳号。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use simrs_core::utils::{clamp_limit, format_ticket_code};
use simrs_core::{
    NewQueueTicket, QueueFilter, QueueStatus, QueueTicket, Result, SimrsError, TicketTransition,
};
use simrs_workflow::QueueStore;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::{convert_all, DbQueueTicket};

#[derive(Clone)]
pub struct PgQueueStore {
    db: DatabasePool,
}

impl PgQueueStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QueueStore for PgQueueStore {
    async fn issue_ticket(&self, request: NewQueueTicket, now: DateTime<Utc>) -> Result<QueueTicket> {
        let mut tx = self.db.pool().begin().await?;

        if let Some(patient_id) = request.patient_id {
            let duplicate: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM queue_tickets
                    WHERE polyclinic_id = $1 AND queue_date = $2 AND patient_id = $3
                      AND status IN ('waiting', 'called', 'serving')
                )
                "#,
            )
            .bind(request.polyclinic_id)
            .bind(request.queue_date)
            .bind(patient_id)
            .fetch_one(&mut *tx)
            .await?;
            if duplicate {
                return Err(SimrsError::Conflict(
                    "patient already holds an active ticket".to_string(),
                ));
            }
        }

        let number: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO queue_counters (polyclinic_id, queue_date, last_number) VALUES ($1, $2, 1)
            ON CONFLICT (polyclinic_id, queue_date)
            DO UPDATE SET last_number = queue_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(request.polyclinic_id)
        .bind(request.queue_date)
        .fetch_one(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, DbQueueTicket>(
            r#"
            INSERT INTO queue_tickets
                (id, polyclinic_id, patient_id, doctor_id, queue_date, number, code, status,
                 call_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'waiting', 0, $8, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.polyclinic_id)
        .bind(request.patient_id)
        .bind(request.doctor_id)
        .bind(request.queue_date)
        .bind(number)
        .bind(format_ticket_code(&request.code_prefix, number))
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match SimrsError::from(e) {
            // 部分唯一索引兜底：并发的同一患者取号
            SimrsError::Conflict(_) => {
                SimrsError::Conflict("patient already holds an active ticket".to_string())
            }
            other => other,
        })?;

        tx.commit().await?;
        tracing::debug!(code = %row.code, "Issued queue ticket");
        row.try_into()
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<QueueTicket>> {
        sqlx::query_as::<_, DbQueueTicket>("SELECT * FROM queue_tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(QueueTicket::try_from)
            .transpose()
    }

    async fn list_tickets(&self, filter: &QueueFilter) -> Result<Vec<QueueTicket>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM queue_tickets WHERE TRUE");
        if let Some(polyclinic_id) = filter.polyclinic_id {
            query.push(" AND polyclinic_id = ").push_bind(polyclinic_id);
        }
        if let Some(date) = filter.queue_date {
            query.push(" AND queue_date = ").push_bind(date);
        }
        if let Some(patient_id) = filter.patient_id {
            query.push(" AND patient_id = ").push_bind(patient_id);
        }
        if let Some(statuses) = &filter.statuses {
            let statuses: Vec<&str> = statuses.iter().map(QueueStatus::as_str).collect();
            query.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        query
            .push(" ORDER BY queue_date, polyclinic_id, number LIMIT ")
            .push_bind(clamp_limit(filter.limit, 200, 10_000))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        let rows = query
            .build_query_as::<DbQueueTicket>()
            .fetch_all(self.db.pool())
            .await?;
        convert_all(rows)
    }

    async fn next_waiting(&self, polyclinic_id: Uuid, date: NaiveDate) -> Result<Option<QueueTicket>> {
        sqlx::query_as::<_, DbQueueTicket>(
            r#"
            SELECT * FROM queue_tickets
            WHERE polyclinic_id = $1 AND queue_date = $2 AND status = 'waiting'
            ORDER BY number
            LIMIT 1
            "#,
        )
        .bind(polyclinic_id)
        .bind(date)
        .fetch_optional(self.db.pool())
        .await?
        .map(QueueTicket::try_from)
        .transpose()
    }

    async fn transition(&self, transition: TicketTransition) -> Result<QueueTicket> {
        let at = transition.at;
        let row = sqlx::query_as::<_, DbQueueTicket>(
            r#"
            UPDATE queue_tickets SET
                status = $3,
                updated_at = $4,
                handled_by = COALESCE($5, handled_by),
                call_count = call_count + CASE WHEN $6 THEN 1 ELSE 0 END,
                called_at = CASE WHEN $3 = 'called' THEN COALESCE(called_at, $4) ELSE called_at END,
                serving_at = CASE WHEN $3 = 'serving' THEN $4 ELSE serving_at END,
                completed_at = CASE WHEN $3 = 'completed' THEN $4 ELSE completed_at END,
                skipped_at = CASE WHEN $3 = 'skipped' THEN $4 ELSE skipped_at END
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(transition.ticket_id)
        .bind(transition.expected.as_str())
        .bind(transition.to.as_str())
        .bind(at)
        .bind(transition.handled_by)
        .bind(transition.bump_call_count)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => match self.get_ticket(transition.ticket_id).await? {
                Some(current) => Err(SimrsError::Conflict(format!(
                    "ticket {} is {}, expected {}",
                    current.code, current.status, transition.expected
                ))),
                None => Err(SimrsError::not_found("queue ticket", transition.ticket_id)),
            },
        }
    }
}
