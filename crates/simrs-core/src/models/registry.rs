//! 患者、科室与医生

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

string_enum! {
    /// 性别
    Sex {
        Male => "male",
        Female => "female",
    }
}

/// 患者基本信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub medical_record_number: String, // 病历号 (RM)
    pub nik: Option<String>,           // 身份证号 (16位)
    pub name: String,
    pub sex: Option<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 新患者登记请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPatient {
    pub nik: Option<String>,
    pub name: String,
    pub sex: Option<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// 患者信息修改
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub name: Option<String>,
    pub sex: Option<Sex>,
    pub birth_date: Option<NaiveDate>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// 科室 (Poli)，拥有独立的每日排队计数器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Polyclinic {
    pub id: Uuid,
    pub code: String, // 号票前缀，例如 "PU"
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 医生
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub polyclinic_id: Uuid,
    pub license_number: Option<String>, // 执业许可号 (SIP)
    pub user_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDoctor {
    pub name: String,
    pub polyclinic_id: Uuid,
    pub license_number: Option<String>,
    pub user_id: Option<Uuid>,
}
