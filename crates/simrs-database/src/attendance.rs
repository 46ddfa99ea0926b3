//! 考勤与请假的 PostgreSQL 存储
//!
//! 请假重叠检查在按用户的事务级咨询锁下进行，同一用户的并发申请串行执行。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use simrs_core::utils::clamp_limit;
use simrs_core::{
    Attendance, AttendanceFilter, AttendanceStatus, GeoPoint, LeaveDecision, LeaveFilter,
    LeaveRequest, LeaveStatus, Result, SimrsError,
};
use simrs_workflow::AttendanceStore;
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::{convert_all, DbAttendance, DbLeaveRequest};

#[derive(Clone)]
pub struct PgAttendanceStore {
    db: DatabasePool,
}

impl PgAttendanceStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AttendanceStore for PgAttendanceStore {
    async fn get_attendance(&self, user_id: Uuid, work_date: NaiveDate) -> Result<Option<Attendance>> {
        sqlx::query_as::<_, DbAttendance>("SELECT * FROM attendance WHERE user_id = $1 AND work_date = $2")
            .bind(user_id)
            .bind(work_date)
            .fetch_optional(self.db.pool())
            .await?
            .map(Attendance::try_from)
            .transpose()
    }

    async fn insert_attendance(&self, attendance: Attendance) -> Result<Attendance> {
        let check_in = attendance.check_in_location;
        let row = sqlx::query_as::<_, DbAttendance>(
            r#"
            INSERT INTO attendance
                (id, user_id, work_date, status, check_in_at, check_in_latitude, check_in_longitude,
                 check_in_photo, distance_meters, leave_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(attendance.id)
        .bind(attendance.user_id)
        .bind(attendance.work_date)
        .bind(attendance.status.as_str())
        .bind(attendance.check_in_at)
        .bind(check_in.map(|p| p.latitude))
        .bind(check_in.map(|p| p.longitude))
        .bind(&attendance.check_in_photo)
        .bind(attendance.distance_meters)
        .bind(attendance.leave_id)
        .bind(attendance.created_at)
        .bind(attendance.updated_at)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| match SimrsError::from(e) {
            SimrsError::Conflict(_) => SimrsError::Conflict(format!(
                "attendance for {} already exists",
                attendance.work_date
            )),
            other => other,
        })?;
        row.try_into()
    }

    async fn record_check_out(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        location: GeoPoint,
        photo: Option<String>,
    ) -> Result<Attendance> {
        let row = sqlx::query_as::<_, DbAttendance>(
            r#"
            UPDATE attendance SET
                check_out_at = $2,
                check_out_latitude = $3,
                check_out_longitude = $4,
                check_out_photo = $5,
                updated_at = $2
            WHERE id = $1 AND check_out_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(photo)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM attendance WHERE id = $1)")
                    .bind(id)
                    .fetch_one(self.db.pool())
                    .await?;
                if exists {
                    Err(SimrsError::Conflict("already checked out".to_string()))
                } else {
                    Err(SimrsError::not_found("attendance", id))
                }
            }
        }
    }

    async fn list_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<Attendance>> {
        let rows = sqlx::query_as::<_, DbAttendance>(
            r#"
            SELECT * FROM attendance
            WHERE ($1::UUID IS NULL OR user_id = $1)
              AND ($2::DATE IS NULL OR work_date >= $2)
              AND ($3::DATE IS NULL OR work_date <= $3)
            ORDER BY work_date, user_id
            LIMIT $4
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(clamp_limit(filter.limit, 366, 5000))
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn create_leave(&self, leave: LeaveRequest) -> Result<LeaveRequest> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(leave.user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let overlapping: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM leave_requests
                WHERE user_id = $1
                  AND status IN ('pending', 'approved')
                  AND start_date <= $3 AND $2 <= end_date
            )
            "#,
        )
        .bind(leave.user_id)
        .bind(leave.start_date)
        .bind(leave.end_date)
        .fetch_one(&mut *tx)
        .await?;
        if overlapping {
            return Err(SimrsError::Conflict(
                "leave overlaps an existing request".to_string(),
            ));
        }

        let row = sqlx::query_as::<_, DbLeaveRequest>(
            r#"
            INSERT INTO leave_requests
                (id, user_id, kind, start_date, end_date, reason, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(leave.id)
        .bind(leave.user_id)
        .bind(leave.kind.as_str())
        .bind(leave.start_date)
        .bind(leave.end_date)
        .bind(&leave.reason)
        .bind(leave.status.as_str())
        .bind(leave.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn get_leave(&self, id: Uuid) -> Result<Option<LeaveRequest>> {
        sqlx::query_as::<_, DbLeaveRequest>("SELECT * FROM leave_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(LeaveRequest::try_from)
            .transpose()
    }

    async fn list_leaves(&self, filter: &LeaveFilter) -> Result<Vec<LeaveRequest>> {
        let rows = sqlx::query_as::<_, DbLeaveRequest>(
            r#"
            SELECT * FROM leave_requests
            WHERE ($1::UUID IS NULL OR user_id = $1)
              AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY start_date DESC
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn decide_leave(&self, decision: LeaveDecision) -> Result<(LeaveRequest, Vec<Attendance>)> {
        let mut tx = self.db.pool().begin().await?;

        let leave: LeaveRequest = sqlx::query_as::<_, DbLeaveRequest>(
            "SELECT * FROM leave_requests WHERE id = $1 FOR UPDATE",
        )
        .bind(decision.leave_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SimrsError::not_found("leave request", decision.leave_id))?
        .try_into()?;
        if leave.status != LeaveStatus::Pending {
            return Err(SimrsError::Conflict(format!(
                "leave {} is {}",
                leave.id, leave.status
            )));
        }

        let mut filled = Vec::new();
        if decision.to == LeaveStatus::Approved {
            for day in leave.dates() {
                // 已有打卡记录的日期保持原样
                let row = sqlx::query_as::<_, DbAttendance>(
                    r#"
                    INSERT INTO attendance (id, user_id, work_date, status, leave_id, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $6)
                    ON CONFLICT (user_id, work_date) DO NOTHING
                    RETURNING *
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(leave.user_id)
                .bind(day)
                .bind(AttendanceStatus::Leave.as_str())
                .bind(leave.id)
                .bind(decision.at)
                .fetch_optional(&mut *tx)
                .await?;
                if let Some(row) = row {
                    filled.push(Attendance::try_from(row)?);
                }
            }
        }

        let reviewed = decision.reviewed_by.is_some();
        let row = sqlx::query_as::<_, DbLeaveRequest>(
            r#"
            UPDATE leave_requests SET
                status = $2,
                reviewed_by = CASE WHEN $5 THEN $3 ELSE reviewed_by END,
                reviewed_at = CASE WHEN $5 THEN $6 ELSE reviewed_at END,
                review_note = CASE WHEN $5 THEN $4 ELSE review_note END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(decision.leave_id)
        .bind(decision.to.as_str())
        .bind(decision.reviewed_by)
        .bind(&decision.review_note)
        .bind(reviewed)
        .bind(decision.at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((row.try_into()?, filled))
    }
}
