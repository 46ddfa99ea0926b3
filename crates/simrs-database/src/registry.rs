//! 患者、科室与医生的 PostgreSQL 存储

use async_trait::async_trait;
use chrono::Utc;
use simrs_core::utils::format_medical_record_number;
use simrs_core::{
    Doctor, NewDoctor, NewPatient, Patient, PatientUpdate, Polyclinic, Result, SimrsError,
};
use simrs_workflow::RegistryStore;
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::{convert_all, DbDoctor, DbPatient, DbPolyclinic};

/// PostgreSQL 登记存储
#[derive(Clone)]
pub struct PgRegistryStore {
    db: DatabasePool,
}

impl PgRegistryStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn create_patient(&self, patient: NewPatient, year: i32) -> Result<Patient> {
        let mut tx = self.db.pool().begin().await?;

        // 行锁保证同一年内病历号严格递增
        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO medical_record_counters (year, last_value) VALUES ($1, 1)
            ON CONFLICT (year) DO UPDATE SET last_value = medical_record_counters.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(year)
        .fetch_one(&mut *tx)
        .await?;

        let now = Utc::now();
        let row = sqlx::query_as::<_, DbPatient>(
            r#"
            INSERT INTO patients
                (id, medical_record_number, nik, name, sex, birth_date, phone, address, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(format_medical_record_number(year, sequence))
        .bind(&patient.nik)
        .bind(&patient.name)
        .bind(patient.sex.map(|s| s.as_str()))
        .bind(patient.birth_date)
        .bind(&patient.phone)
        .bind(&patient.address)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match SimrsError::from(e) {
            SimrsError::Conflict(_) => SimrsError::Conflict(format!(
                "NIK {} is already registered",
                patient.nik.as_deref().unwrap_or_default()
            )),
            other => other,
        })?;

        tx.commit().await?;
        row.try_into()
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(Patient::try_from)
            .transpose()
    }

    async fn find_patient_by_mrn(&self, medical_record_number: &str) -> Result<Option<Patient>> {
        sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE medical_record_number = $1")
            .bind(medical_record_number)
            .fetch_optional(self.db.pool())
            .await?
            .map(Patient::try_from)
            .transpose()
    }

    async fn find_patient_by_nik(&self, nik: &str) -> Result<Option<Patient>> {
        sqlx::query_as::<_, DbPatient>("SELECT * FROM patients WHERE nik = $1")
            .bind(nik)
            .fetch_optional(self.db.pool())
            .await?
            .map(Patient::try_from)
            .transpose()
    }

    async fn search_patients(&self, query: Option<&str>, limit: i64, offset: i64) -> Result<Vec<Patient>> {
        let pattern = query.map(|q| format!("%{}%", q.replace('%', "\\%").replace('_', "\\_")));
        let rows = sqlx::query_as::<_, DbPatient>(
            r#"
            SELECT * FROM patients
            WHERE $1::TEXT IS NULL
               OR name ILIKE $1
               OR medical_record_number ILIKE $1
               OR nik LIKE $1
            ORDER BY medical_record_number
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn update_patient(&self, id: Uuid, update: PatientUpdate) -> Result<Patient> {
        let row = sqlx::query_as::<_, DbPatient>(
            r#"
            UPDATE patients SET
                name = COALESCE($2, name),
                sex = COALESCE($3, sex),
                birth_date = COALESCE($4, birth_date),
                phone = COALESCE($5, phone),
                address = COALESCE($6, address),
                updated_at = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.name.map(|n| n.trim().to_string()))
        .bind(update.sex.map(|s| s.as_str()))
        .bind(update.birth_date)
        .bind(update.phone)
        .bind(update.address)
        .bind(Utc::now())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| SimrsError::not_found("patient", id))?;
        row.try_into()
    }

    async fn create_polyclinic(&self, code: &str, name: &str) -> Result<Polyclinic> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, DbPolyclinic>(
            r#"
            INSERT INTO polyclinics (id, code, name, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, TRUE, $4, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .bind(now)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| match SimrsError::from(e) {
            SimrsError::Conflict(_) => {
                SimrsError::Conflict(format!("polyclinic code {} already exists", code))
            }
            other => other,
        })?;
        row.try_into()
    }

    async fn get_polyclinic(&self, id: Uuid) -> Result<Option<Polyclinic>> {
        sqlx::query_as::<_, DbPolyclinic>("SELECT * FROM polyclinics WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(Polyclinic::try_from)
            .transpose()
    }

    async fn list_polyclinics(&self, active_only: bool) -> Result<Vec<Polyclinic>> {
        let rows = sqlx::query_as::<_, DbPolyclinic>(
            "SELECT * FROM polyclinics WHERE is_active OR NOT $1 ORDER BY code",
        )
        .bind(active_only)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn update_polyclinic(
        &self,
        id: Uuid,
        name: Option<String>,
        is_active: Option<bool>,
    ) -> Result<Polyclinic> {
        let row = sqlx::query_as::<_, DbPolyclinic>(
            r#"
            UPDATE polyclinics SET
                name = COALESCE($2, name),
                is_active = COALESCE($3, is_active),
                updated_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name.map(|n| n.trim().to_string()))
        .bind(is_active)
        .bind(Utc::now())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| SimrsError::not_found("polyclinic", id))?;
        row.try_into()
    }

    async fn create_doctor(&self, doctor: NewDoctor) -> Result<Doctor> {
        let row = sqlx::query_as::<_, DbDoctor>(
            r#"
            INSERT INTO doctors (id, name, polyclinic_id, license_number, user_id, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(doctor.name.trim())
        .bind(doctor.polyclinic_id)
        .bind(&doctor.license_number)
        .bind(doctor.user_id)
        .bind(Utc::now())
        .fetch_one(self.db.pool())
        .await?;
        row.try_into()
    }

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>> {
        sqlx::query_as::<_, DbDoctor>("SELECT * FROM doctors WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(Doctor::try_from)
            .transpose()
    }

    async fn list_doctors(&self, polyclinic_id: Option<Uuid>) -> Result<Vec<Doctor>> {
        let rows = sqlx::query_as::<_, DbDoctor>(
            "SELECT * FROM doctors WHERE $1::UUID IS NULL OR polyclinic_id = $1 ORDER BY name",
        )
        .bind(polyclinic_id)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }
}
