//! 病历与处方

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 门诊病历
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub ticket_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub complaint: Option<String>,
    pub diagnosis: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

string_enum! {
    PrescriptionStatus {
        Pending => "pending",
        Dispensed => "dispensed",
        Cancelled => "cancelled",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescriptionItem {
    pub item_id: Uuid,
    pub quantity: i64,
    pub dosage: Option<String>, // 用法用量，例如 "3x1"
}

/// 处方
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub medical_record_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub status: PrescriptionStatus,
    pub items: Vec<PrescriptionItem>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub dispensed_at: Option<DateTime<Utc>>,
    pub dispensed_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// 处方与病历一并创建
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPrescription {
    pub ticket_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub complaint: Option<String>,
    pub diagnosis: String,
    pub notes: Option<String>,
    pub items: Vec<PrescriptionItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrescriptionFilter {
    pub patient_id: Option<Uuid>,
    pub ticket_id: Option<Uuid>,
    pub status: Option<PrescriptionStatus>,
    pub limit: Option<i64>,
}
