//! 考勤打卡与请假
//!
//! 打卡按医院当地日期归档，每人每天一条记录；
//! 请假批准时为区间内尚无记录的日期补写 Leave 考勤。

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use simrs_core::utils::{local_date, local_time, non_blank};
use simrs_core::{
    Attendance, AttendanceFilter, AttendanceStatus, DomainEvent, EventKind, EventPublisher,
    GeoPoint, LeaveDecision, LeaveFilter, LeaveRequest, LeaveStatus, NewLeaveRequest, Result,
    SimrsError,
};
use std::sync::Arc;
use uuid::Uuid;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// 两点间的大圆距离（米）
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// 考勤规则
#[derive(Debug, Clone)]
pub struct AttendancePolicy {
    pub geofence_enabled: bool,
    pub center: GeoPoint,
    pub radius_meters: f64,
    pub work_start: NaiveTime,
    pub grace_minutes: i64,
    pub offset: FixedOffset,
}

impl AttendancePolicy {
    /// 按打卡时刻判断是否迟到
    ///
    /// 以距当日零点的秒数比较，上班时间加宽限跨过零点时不回绕。
    pub fn status_at(&self, at: DateTime<Utc>) -> AttendanceStatus {
        let deadline =
            i64::from(self.work_start.num_seconds_from_midnight()) + self.grace_minutes * 60;
        let checked_in = i64::from(local_time(at, self.offset).num_seconds_from_midnight());
        if checked_in > deadline {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        }
    }

    /// 校验打卡位置，返回与中心点的距离
    pub fn check_location(&self, location: GeoPoint) -> Result<f64> {
        let distance = haversine_meters(self.center, location);
        if self.geofence_enabled && distance > self.radius_meters {
            return Err(SimrsError::Validation(format!(
                "location is {:.0} m from the hospital, allowed radius is {:.0} m",
                distance, self.radius_meters
            )));
        }
        Ok(distance)
    }
}

/// 考勤存储接口
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn get_attendance(&self, user_id: Uuid, work_date: NaiveDate) -> Result<Option<Attendance>>;

    /// 写入考勤；同一用户同一天已有记录时返回 `Conflict`
    async fn insert_attendance(&self, attendance: Attendance) -> Result<Attendance>;

    /// 记录签退；已签退时返回 `Conflict`
    async fn record_check_out(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        location: GeoPoint,
        photo: Option<String>,
    ) -> Result<Attendance>;

    async fn list_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<Attendance>>;

    /// 写入请假申请；与该用户待审或已批准的请假重叠时返回 `Conflict`
    async fn create_leave(&self, leave: LeaveRequest) -> Result<LeaveRequest>;

    async fn get_leave(&self, id: Uuid) -> Result<Option<LeaveRequest>>;

    async fn list_leaves(&self, filter: &LeaveFilter) -> Result<Vec<LeaveRequest>>;

    /// Pending → 审批结果；批准时在同一事务中补写 Leave 考勤，返回新写入的记录
    async fn decide_leave(&self, decision: LeaveDecision) -> Result<(LeaveRequest, Vec<Attendance>)>;
}

/// 考勤服务
pub struct AttendanceService {
    store: Arc<dyn AttendanceStore>,
    publisher: Arc<dyn EventPublisher>,
    policy: AttendancePolicy,
}

impl AttendanceService {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        publisher: Arc<dyn EventPublisher>,
        policy: AttendancePolicy,
    ) -> Self {
        Self {
            store,
            publisher,
            policy,
        }
    }

    pub fn policy(&self) -> &AttendancePolicy {
        &self.policy
    }

    pub async fn check_in(
        &self,
        user_id: Uuid,
        location: GeoPoint,
        photo: Option<String>,
    ) -> Result<Attendance> {
        self.check_in_at(user_id, location, photo, Utc::now()).await
    }

    /// 指定时刻签到
    pub async fn check_in_at(
        &self,
        user_id: Uuid,
        location: GeoPoint,
        photo: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Attendance> {
        let work_date = local_date(at, self.policy.offset);
        if let Some(existing) = self.store.get_attendance(user_id, work_date).await? {
            return Err(SimrsError::Conflict(format!(
                "already recorded as {} on {}",
                existing.status, work_date
            )));
        }

        let on_leave = self
            .store
            .list_leaves(&LeaveFilter {
                user_id: Some(user_id),
                status: Some(LeaveStatus::Approved),
            })
            .await?
            .into_iter()
            .any(|leave| leave.covers(work_date));
        if on_leave {
            return Err(SimrsError::Conflict(format!("on approved leave on {}", work_date)));
        }

        let distance = self.policy.check_location(location)?;
        let status = self.policy.status_at(at);

        let attendance = Attendance {
            id: Uuid::new_v4(),
            user_id,
            work_date,
            status,
            check_in_at: Some(at),
            check_out_at: None,
            check_in_location: Some(location),
            check_out_location: None,
            check_in_photo: non_blank(photo),
            check_out_photo: None,
            distance_meters: Some(distance),
            leave_id: None,
            created_at: at,
            updated_at: at,
        };
        let saved = self.store.insert_attendance(attendance).await?;
        tracing::info!(user = %user_id, date = %work_date, "Checked in as {}", saved.status);
        Ok(saved)
    }

    pub async fn check_out(
        &self,
        user_id: Uuid,
        location: GeoPoint,
        photo: Option<String>,
    ) -> Result<Attendance> {
        self.check_out_at(user_id, location, photo, Utc::now()).await
    }

    pub async fn check_out_at(
        &self,
        user_id: Uuid,
        location: GeoPoint,
        photo: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Attendance> {
        let work_date = local_date(at, self.policy.offset);
        let attendance = self
            .store
            .get_attendance(user_id, work_date)
            .await?
            .filter(|a| a.check_in_at.is_some())
            .ok_or_else(|| SimrsError::Validation(format!("no check-in on {}", work_date)))?;
        if attendance.check_out_at.is_some() {
            return Err(SimrsError::Conflict(format!("already checked out on {}", work_date)));
        }
        self.policy.check_location(location)?;

        let saved = self
            .store
            .record_check_out(attendance.id, at, location, non_blank(photo))
            .await?;
        tracing::info!(user = %user_id, date = %work_date, "Checked out");
        Ok(saved)
    }

    pub async fn list_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<Attendance>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if to < from {
                return Err(SimrsError::Validation("'to' is before 'from'".to_string()));
            }
        }
        self.store.list_attendance(filter).await
    }

    pub async fn request_leave(&self, user_id: Uuid, request: NewLeaveRequest) -> Result<LeaveRequest> {
        if request.end_date < request.start_date {
            return Err(SimrsError::Validation(
                "leave end date is before start date".to_string(),
            ));
        }

        let leave = LeaveRequest {
            id: Uuid::new_v4(),
            user_id,
            kind: request.kind,
            start_date: request.start_date,
            end_date: request.end_date,
            reason: non_blank(request.reason),
            status: LeaveStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            created_at: Utc::now(),
        };
        let saved = self.store.create_leave(leave).await?;
        tracing::info!(
            "Leave {} requested by {} for {}..{}",
            saved.id,
            user_id,
            saved.start_date,
            saved.end_date
        );
        Ok(saved)
    }

    pub async fn get_leave(&self, id: Uuid) -> Result<LeaveRequest> {
        self.store
            .get_leave(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("leave request", id))
    }

    pub async fn list_leaves(&self, filter: &LeaveFilter) -> Result<Vec<LeaveRequest>> {
        self.store.list_leaves(filter).await
    }

    pub async fn approve(&self, id: Uuid, reviewer: Uuid, note: Option<String>) -> Result<LeaveRequest> {
        let (leave, filled) = self.decide(id, LeaveStatus::Approved, Some(reviewer), note).await?;
        tracing::info!("Approved leave {} ({} attendance rows filled)", id, filled.len());
        self.publisher.publish(DomainEvent::new(
            EventKind::LeaveApproved,
            serde_json::json!({
                "leave_id": leave.id,
                "user_id": leave.user_id,
                "start_date": leave.start_date,
                "end_date": leave.end_date,
                "filled_days": filled.len(),
            }),
        ));
        Ok(leave)
    }

    pub async fn reject(&self, id: Uuid, reviewer: Uuid, note: Option<String>) -> Result<LeaveRequest> {
        let (leave, _) = self.decide(id, LeaveStatus::Rejected, Some(reviewer), note).await?;
        tracing::info!("Rejected leave {}", id);
        Ok(leave)
    }

    /// 本人撤回待审的请假
    pub async fn cancel(&self, id: Uuid, user_id: Uuid) -> Result<LeaveRequest> {
        let leave = self.get_leave(id).await?;
        if leave.user_id != user_id {
            return Err(SimrsError::Permission(
                "only the requester can cancel a leave request".to_string(),
            ));
        }
        let (leave, _) = self.decide(id, LeaveStatus::Cancelled, None, None).await?;
        Ok(leave)
    }

    async fn decide(
        &self,
        id: Uuid,
        to: LeaveStatus,
        reviewed_by: Option<Uuid>,
        review_note: Option<String>,
    ) -> Result<(LeaveRequest, Vec<Attendance>)> {
        let leave = self.get_leave(id).await?;
        if leave.status != LeaveStatus::Pending {
            return Err(SimrsError::InvalidStateTransition {
                from: leave.status.to_string(),
                event: to.to_string(),
            });
        }
        self.store
            .decide_leave(LeaveDecision {
                leave_id: id,
                to,
                reviewed_by,
                review_note: non_blank(review_note),
                at: Utc::now(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAttendance;
    use chrono::{Duration, TimeZone};
    use simrs_core::{LeaveKind, NoopPublisher};

    const HOSPITAL: GeoPoint = GeoPoint { latitude: -6.2088, longitude: 106.8456 };

    fn service() -> AttendanceService {
        AttendanceService::new(
            Arc::new(InMemoryAttendance::new()),
            Arc::new(NoopPublisher),
            AttendancePolicy {
                geofence_enabled: true,
                center: HOSPITAL,
                radius_meters: 150.0,
                work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                grace_minutes: 15,
                offset: FixedOffset::east_opt(7 * 3600).unwrap(),
            },
        )
    }

    /// 雅加达当地时间
    fn wib(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, day, hour, minute, 0).unwrap() - Duration::hours(7)
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, day).unwrap()
    }

    #[test]
    fn test_haversine() {
        let monas = GeoPoint { latitude: -6.1754, longitude: 106.8272 };
        let d = haversine_meters(HOSPITAL, monas);
        assert!((d - 4200.0).abs() < 150.0, "distance was {}", d);
        assert!(haversine_meters(HOSPITAL, HOSPITAL) < 1e-6);
    }

    #[tokio::test]
    async fn test_check_in_present_and_late() {
        let service = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let on_time = service.check_in_at(a, HOSPITAL, None, wib(6, 8, 10)).await.unwrap();
        assert_eq!(on_time.status, AttendanceStatus::Present);
        assert_eq!(on_time.work_date, date(6));

        let late = service.check_in_at(b, HOSPITAL, None, wib(6, 8, 16)).await.unwrap();
        assert_eq!(late.status, AttendanceStatus::Late);

        assert!(matches!(
            service.check_in_at(a, HOSPITAL, None, wib(6, 9, 0)).await,
            Err(SimrsError::Conflict(_))
        ));
    }

    #[test]
    fn test_late_threshold_past_midnight() {
        let policy = AttendancePolicy {
            work_start: NaiveTime::from_hms_opt(23, 45, 0).unwrap(),
            grace_minutes: 30,
            ..service().policy().clone()
        };
        assert_eq!(policy.status_at(wib(6, 23, 50)), AttendanceStatus::Present);
        assert_eq!(policy.status_at(wib(6, 23, 59)), AttendanceStatus::Present);

        let early_shift = AttendancePolicy {
            work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            grace_minutes: 15,
            ..policy
        };
        assert_eq!(early_shift.status_at(wib(6, 8, 15)), AttendanceStatus::Present);
        assert_eq!(early_shift.status_at(wib(6, 8, 16)), AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn test_geofence() {
        let service = service();
        let far = GeoPoint { latitude: -6.30, longitude: 106.90 };
        assert!(matches!(
            service.check_in_at(Uuid::new_v4(), far, None, wib(6, 7, 50)).await,
            Err(SimrsError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_check_out_requires_check_in() {
        let service = service();
        let user = Uuid::new_v4();
        assert!(service.check_out_at(user, HOSPITAL, None, wib(6, 16, 0)).await.is_err());

        service.check_in_at(user, HOSPITAL, None, wib(6, 7, 55)).await.unwrap();
        let out = service.check_out_at(user, HOSPITAL, None, wib(6, 16, 0)).await.unwrap();
        assert!(out.check_out_at.is_some());
        assert!(service.check_out_at(user, HOSPITAL, None, wib(6, 16, 5)).await.is_err());
    }

    #[tokio::test]
    async fn test_leave_approval_backfills() {
        let service = service();
        let user = Uuid::new_v4();
        let reviewer = Uuid::new_v4();

        // 第7天已经打过卡
        service.check_in_at(user, HOSPITAL, None, wib(7, 7, 45)).await.unwrap();

        let leave = service
            .request_leave(
                user,
                NewLeaveRequest { kind: LeaveKind::Sick, start_date: date(7), end_date: date(9), reason: None },
            )
            .await
            .unwrap();
        assert!(matches!(
            service
                .request_leave(
                    user,
                    NewLeaveRequest { kind: LeaveKind::Annual, start_date: date(9), end_date: date(10), reason: None },
                )
                .await,
            Err(SimrsError::Conflict(_))
        ));

        let approved = service.approve(leave.id, reviewer, None).await.unwrap();
        assert_eq!(approved.status, LeaveStatus::Approved);

        let rows = service
            .list_attendance(&AttendanceFilter { user_id: Some(user), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| r.status == AttendanceStatus::Leave).count(), 2);

        assert!(matches!(
            service.check_in_at(user, HOSPITAL, None, wib(8, 7, 50)).await,
            Err(SimrsError::Conflict(_))
        ));
        assert!(service.reject(leave.id, reviewer, None).await.is_err());
    }

    #[tokio::test]
    async fn test_leave_cancel_by_owner_only() {
        let service = service();
        let user = Uuid::new_v4();
        let leave = service
            .request_leave(
                user,
                NewLeaveRequest { kind: LeaveKind::Permit, start_date: date(20), end_date: date(20), reason: None },
            )
            .await
            .unwrap();
        assert!(matches!(
            service.cancel(leave.id, Uuid::new_v4()).await,
            Err(SimrsError::Permission(_))
        ));
        assert_eq!(service.cancel(leave.id, user).await.unwrap().status, LeaveStatus::Cancelled);

        assert!(service
            .request_leave(
                user,
                NewLeaveRequest { kind: LeaveKind::Permit, start_date: date(21), end_date: date(20), reason: None },
            )
            .await
            .is_err());
    }
}
