//! 数据库模型
//!
//! 使用 `FromRow` 读取行，再转换为核心领域模型。状态类字段以文本存储，
//! 转换时解析失败视为数据损坏。

use chrono::{DateTime, NaiveDate, Utc};
use simrs_core::{
    AccessGrant, AccessLevel, AccessTarget, AccessTargetKind, Attendance, AttendanceStatus,
    BatchAllocation, Doctor, Document, DocumentAccessLog, DocumentAccessRule, DocumentAction,
    Folder, GeoPoint, GrantSubject, Item, ItemStock, LeaveKind, LeaveRequest, LeaveStatus,
    MedicalRecord, MovementKind, OpnameLine, OpnameStatus, Patient, Polyclinic, Prescription,
    PrescriptionItem, PrescriptionStatus, QueueStatus, QueueTicket, Result, Role, RuleScope,
    SimrsError, StockBatch, StockMovement, StockOpname, User,
};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// 批量转换查询结果
pub fn convert_all<T, U>(rows: Vec<T>) -> Result<Vec<U>>
where
    U: TryFrom<T, Error = SimrsError>,
{
    rows.into_iter().map(U::try_from).collect()
}

fn geo(latitude: Option<f64>, longitude: Option<f64>) -> Option<GeoPoint> {
    match (latitude, longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
        _ => None,
    }
}

/// 数据库患者表
#[derive(Debug, FromRow)]
pub struct DbPatient {
    pub id: Uuid,
    pub medical_record_number: String,
    pub nik: Option<String>,
    pub name: String,
    pub sex: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbPatient> for Patient {
    type Error = SimrsError;

    fn try_from(row: DbPatient) -> Result<Self> {
        Ok(Patient {
            id: row.id,
            medical_record_number: row.medical_record_number,
            nik: row.nik,
            name: row.name,
            sex: row.sex.map(|s| s.parse()).transpose()?,
            birth_date: row.birth_date,
            phone: row.phone,
            address: row.address,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbPolyclinic {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbPolyclinic> for Polyclinic {
    type Error = SimrsError;

    fn try_from(row: DbPolyclinic) -> Result<Self> {
        Ok(Polyclinic {
            id: row.id,
            code: row.code,
            name: row.name,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbDoctor {
    pub id: Uuid,
    pub name: String,
    pub polyclinic_id: Uuid,
    pub license_number: Option<String>,
    pub user_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbDoctor> for Doctor {
    type Error = SimrsError;

    fn try_from(row: DbDoctor) -> Result<Self> {
        Ok(Doctor {
            id: row.id,
            name: row.name,
            polyclinic_id: row.polyclinic_id,
            license_number: row.license_number,
            user_id: row.user_id,
            is_active: row.is_active,
            created_at: row.created_at,
        })
    }
}

/// 数据库号票表
#[derive(Debug, FromRow)]
pub struct DbQueueTicket {
    pub id: Uuid,
    pub polyclinic_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub queue_date: NaiveDate,
    pub number: i32,
    pub code: String,
    pub status: String,
    pub call_count: i32,
    pub handled_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub called_at: Option<DateTime<Utc>>,
    pub serving_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbQueueTicket> for QueueTicket {
    type Error = SimrsError;

    fn try_from(row: DbQueueTicket) -> Result<Self> {
        Ok(QueueTicket {
            id: row.id,
            polyclinic_id: row.polyclinic_id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            queue_date: row.queue_date,
            number: row.number,
            code: row.code,
            status: row.status.parse::<QueueStatus>()?,
            call_count: row.call_count,
            handled_by: row.handled_by,
            created_at: row.created_at,
            called_at: row.called_at,
            serving_at: row.serving_at,
            completed_at: row.completed_at,
            skipped_at: row.skipped_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbItem {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub unit: String,
    pub category: Option<String>,
    pub min_stock: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbItem> for Item {
    type Error = SimrsError;

    fn try_from(row: DbItem) -> Result<Self> {
        Ok(Item {
            id: row.id,
            code: row.code,
            name: row.name,
            unit: row.unit,
            category: row.category,
            min_stock: row.min_stock,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 物品及批次余量合计
#[derive(Debug, FromRow)]
pub struct DbItemStock {
    #[sqlx(flatten)]
    pub item: DbItem,
    pub on_hand: i64,
}

impl TryFrom<DbItemStock> for ItemStock {
    type Error = SimrsError;

    fn try_from(row: DbItemStock) -> Result<Self> {
        Ok(ItemStock {
            item: row.item.try_into()?,
            on_hand: row.on_hand,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbStockBatch {
    pub id: Uuid,
    pub item_id: Uuid,
    pub batch_no: Option<String>,
    pub quantity: i64,
    pub remaining: i64,
    pub received_at: DateTime<Utc>,
    pub expires_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbStockBatch> for StockBatch {
    type Error = SimrsError;

    fn try_from(row: DbStockBatch) -> Result<Self> {
        Ok(StockBatch {
            id: row.id,
            item_id: row.item_id,
            batch_no: row.batch_no,
            quantity: row.quantity,
            remaining: row.remaining,
            received_at: row.received_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbStockMovement {
    pub id: Uuid,
    pub item_id: Uuid,
    pub kind: String,
    pub quantity: i64,
    pub balance_after: i64,
    pub allocations: Json<Vec<BatchAllocation>>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub note: Option<String>,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbStockMovement> for StockMovement {
    type Error = SimrsError;

    fn try_from(row: DbStockMovement) -> Result<Self> {
        Ok(StockMovement {
            id: row.id,
            item_id: row.item_id,
            kind: row.kind.parse::<MovementKind>()?,
            quantity: row.quantity,
            balance_after: row.balance_after,
            allocations: row.allocations.0,
            reference_type: row.reference_type,
            reference_id: row.reference_id,
            note: row.note,
            actor_id: row.actor_id,
            created_at: row.created_at,
        })
    }
}

/// 盘点单表头，明细另行查询
#[derive(Debug, FromRow)]
pub struct DbStockOpname {
    pub id: Uuid,
    pub title: String,
    pub notes: Option<String>,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl DbStockOpname {
    pub fn with_lines(self, lines: Vec<OpnameLine>) -> Result<StockOpname> {
        Ok(StockOpname {
            id: self.id,
            title: self.title,
            notes: self.notes,
            status: self.status.parse::<OpnameStatus>()?,
            created_by: self.created_by,
            lines,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbOpnameLine {
    pub opname_id: Uuid,
    pub item_id: Uuid,
    pub system_quantity: Option<i64>,
    pub physical_quantity: Option<i64>,
    pub difference: Option<i64>,
    pub note: Option<String>,
    pub counted_by: Option<Uuid>,
    pub counted_at: Option<DateTime<Utc>>,
}

impl From<DbOpnameLine> for OpnameLine {
    fn from(row: DbOpnameLine) -> Self {
        OpnameLine {
            item_id: row.item_id,
            system_quantity: row.system_quantity,
            physical_quantity: row.physical_quantity,
            difference: row.difference,
            note: row.note,
            counted_by: row.counted_by,
            counted_at: row.counted_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct DbMedicalRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub ticket_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub complaint: Option<String>,
    pub diagnosis: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbMedicalRecord> for MedicalRecord {
    type Error = SimrsError;

    fn try_from(row: DbMedicalRecord) -> Result<Self> {
        Ok(MedicalRecord {
            id: row.id,
            patient_id: row.patient_id,
            ticket_id: row.ticket_id,
            doctor_id: row.doctor_id,
            complaint: row.complaint,
            diagnosis: row.diagnosis,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbPrescription {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub medical_record_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub status: String,
    pub items: Json<Vec<PrescriptionItem>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispensed_at: Option<DateTime<Utc>>,
    pub dispensed_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbPrescription> for Prescription {
    type Error = SimrsError;

    fn try_from(row: DbPrescription) -> Result<Self> {
        Ok(Prescription {
            id: row.id,
            ticket_id: row.ticket_id,
            medical_record_id: row.medical_record_id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            status: row.status.parse::<PrescriptionStatus>()?,
            items: row.items.0,
            notes: row.notes,
            created_at: row.created_at,
            dispensed_at: row.dispensed_at,
            dispensed_by: row.dispensed_by,
            cancelled_at: row.cancelled_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbFolder {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbFolder> for Folder {
    type Error = SimrsError;

    fn try_from(row: DbFolder) -> Result<Self> {
        Ok(Folder {
            id: row.id,
            name: row.name,
            parent_id: row.parent_id,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbDocument {
    pub id: Uuid,
    pub folder_id: Option<Uuid>,
    pub title: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub storage_key: String,
    pub compressed: bool,
    pub owner_id: Option<Uuid>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbDocument> for Document {
    type Error = SimrsError;

    fn try_from(row: DbDocument) -> Result<Self> {
        Ok(Document {
            id: row.id,
            folder_id: row.folder_id,
            title: row.title,
            file_name: row.file_name,
            mime_type: row.mime_type,
            size_bytes: row.size_bytes,
            checksum: row.checksum,
            storage_key: row.storage_key,
            compressed: row.compressed,
            owner_id: row.owner_id,
            is_public: row.is_public,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 规则作用范围的存储形式
pub fn scope_parts(scope: &RuleScope) -> (&'static str, Uuid) {
    match scope {
        RuleScope::Document(id) => ("document", *id),
        RuleScope::Folder(id) => ("folder", *id),
    }
}

#[derive(Debug, FromRow)]
pub struct DbAccessRule {
    pub id: Uuid,
    pub scope_kind: String,
    pub scope_id: Uuid,
    pub target_kind: String,
    pub target_value: String,
    pub level: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbAccessRule> for DocumentAccessRule {
    type Error = SimrsError;

    fn try_from(row: DbAccessRule) -> Result<Self> {
        let scope = match row.scope_kind.as_str() {
            "document" => RuleScope::Document(row.scope_id),
            "folder" => RuleScope::Folder(row.scope_id),
            other => {
                return Err(SimrsError::Database(format!("unknown rule scope '{}'", other)));
            }
        };
        let kind = row.target_kind.parse::<AccessTargetKind>()?;
        Ok(DocumentAccessRule {
            id: row.id,
            scope,
            target: AccessTarget::from_parts(kind, &row.target_value)?,
            level: row.level.parse::<AccessLevel>()?,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbAccessLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub action: String,
    pub granted: bool,
    pub at: DateTime<Utc>,
}

impl TryFrom<DbAccessLog> for DocumentAccessLog {
    type Error = SimrsError;

    fn try_from(row: DbAccessLog) -> Result<Self> {
        Ok(DocumentAccessLog {
            id: row.id,
            document_id: row.document_id,
            user_id: row.user_id,
            action: row.action.parse::<DocumentAction>()?,
            granted: row.granted,
            at: row.at,
        })
    }
}

/// 数据库考勤表，坐标拆为经纬度两列
#[derive(Debug, FromRow)]
pub struct DbAttendance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub work_date: NaiveDate,
    pub status: String,
    pub check_in_at: Option<DateTime<Utc>>,
    pub check_out_at: Option<DateTime<Utc>>,
    pub check_in_latitude: Option<f64>,
    pub check_in_longitude: Option<f64>,
    pub check_out_latitude: Option<f64>,
    pub check_out_longitude: Option<f64>,
    pub check_in_photo: Option<String>,
    pub check_out_photo: Option<String>,
    pub distance_meters: Option<f64>,
    pub leave_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbAttendance> for Attendance {
    type Error = SimrsError;

    fn try_from(row: DbAttendance) -> Result<Self> {
        Ok(Attendance {
            id: row.id,
            user_id: row.user_id,
            work_date: row.work_date,
            status: row.status.parse::<AttendanceStatus>()?,
            check_in_at: row.check_in_at,
            check_out_at: row.check_out_at,
            check_in_location: geo(row.check_in_latitude, row.check_in_longitude),
            check_out_location: geo(row.check_out_latitude, row.check_out_longitude),
            check_in_photo: row.check_in_photo,
            check_out_photo: row.check_out_photo,
            distance_meters: row.distance_meters,
            leave_id: row.leave_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbLeaveRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: Option<String>,
    pub status: String,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbLeaveRequest> for LeaveRequest {
    type Error = SimrsError;

    fn try_from(row: DbLeaveRequest) -> Result<Self> {
        Ok(LeaveRequest {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse::<LeaveKind>()?,
            start_date: row.start_date,
            end_date: row.end_date,
            reason: row.reason,
            status: row.status.parse::<LeaveStatus>()?,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            review_note: row.review_note,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbRole {
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = SimrsError;

    fn try_from(row: DbRole) -> Result<Self> {
        Ok(Role {
            name: row.name,
            description: row.description,
            is_system: row.is_system,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: String,
    pub password_hash: String,
    pub is_active: bool,
    pub polyclinic_ids: Vec<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbUser> for User {
    type Error = SimrsError;

    fn try_from(row: DbUser) -> Result<Self> {
        Ok(User {
            id: row.id,
            username: row.username,
            full_name: row.full_name,
            email: row.email,
            role: row.role,
            password_hash: row.password_hash,
            is_active: row.is_active,
            polyclinic_ids: row.polyclinic_ids,
            doctor_id: row.doctor_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login_at: row.last_login_at,
        })
    }
}

/// 授权主体的存储形式
pub fn subject_parts(subject: &GrantSubject) -> (&'static str, String) {
    match subject {
        GrantSubject::Role(role) => ("role", role.clone()),
        GrantSubject::User(id) => ("user", id.to_string()),
    }
}

#[derive(Debug, FromRow)]
pub struct DbAccessGrant {
    pub id: Uuid,
    pub subject_kind: String,
    pub subject_value: String,
    pub feature: String,
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbAccessGrant> for AccessGrant {
    type Error = SimrsError;

    fn try_from(row: DbAccessGrant) -> Result<Self> {
        let subject = match row.subject_kind.as_str() {
            "role" => GrantSubject::Role(row.subject_value),
            "user" => GrantSubject::User(Uuid::parse_str(&row.subject_value).map_err(|e| {
                SimrsError::Database(format!("invalid grant user id: {}", e))
            })?),
            other => {
                return Err(SimrsError::Database(format!("unknown grant subject '{}'", other)));
            }
        };
        Ok(AccessGrant {
            id: row.id,
            subject,
            feature: row.feature,
            granted_by: row.granted_by,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_row_conversion() {
        let now = Utc::now();
        let row = DbQueueTicket {
            id: Uuid::new_v4(),
            polyclinic_id: Uuid::new_v4(),
            patient_id: None,
            doctor_id: None,
            queue_date: now.date_naive(),
            number: 3,
            code: "PU-003".into(),
            status: "serving".into(),
            call_count: 1,
            handled_by: None,
            created_at: now,
            called_at: Some(now),
            serving_at: Some(now),
            completed_at: None,
            skipped_at: None,
            updated_at: now,
        };
        let ticket = QueueTicket::try_from(row).unwrap();
        assert_eq!(ticket.status, QueueStatus::Serving);
        assert_eq!(ticket.code, "PU-003");
    }

    #[test]
    fn test_corrupt_status_is_error() {
        let now = Utc::now();
        let row = DbLeaveRequest {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: "annual".into(),
            start_date: now.date_naive(),
            end_date: now.date_naive(),
            reason: None,
            status: "maybe".into(),
            reviewed_by: None,
            reviewed_at: None,
            review_note: None,
            created_at: now,
        };
        assert!(LeaveRequest::try_from(row).is_err());
    }

    #[test]
    fn test_rule_and_grant_parts() {
        let now = Utc::now();
        let folder = Uuid::new_v4();
        let user = Uuid::new_v4();
        let rule = DocumentAccessRule::try_from(DbAccessRule {
            id: Uuid::new_v4(),
            scope_kind: "folder".into(),
            scope_id: folder,
            target_kind: "user".into(),
            target_value: user.to_string(),
            level: "download".into(),
            created_at: now,
        })
        .unwrap();
        assert_eq!(rule.scope, RuleScope::Folder(folder));
        assert_eq!(rule.target, AccessTarget::User(user));
        assert_eq!(scope_parts(&rule.scope), ("folder", folder));

        let grant = AccessGrant::try_from(DbAccessGrant {
            id: Uuid::new_v4(),
            subject_kind: "role".into(),
            subject_value: "nurse".into(),
            feature: "queue:call".into(),
            granted_by: None,
            created_at: now,
        })
        .unwrap();
        assert_eq!(subject_parts(&grant.subject), ("role", "nurse".to_string()));
    }

    #[test]
    fn test_attendance_location_requires_both_columns() {
        assert!(geo(Some(1.0), None).is_none());
        assert_eq!(
            geo(Some(-6.2), Some(106.8)),
            Some(GeoPoint {
                latitude: -6.2,
                longitude: 106.8
            })
        );
    }
}
