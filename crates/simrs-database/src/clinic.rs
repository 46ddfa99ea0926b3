//! 病历与处方的 PostgreSQL 存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simrs_core::utils::clamp_limit;
use simrs_core::{
    MedicalRecord, Prescription, PrescriptionFilter, Result, SimrsError, StockChange,
    StockMovement,
};
use simrs_workflow::PrescriptionStore;
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::inventory::apply_in_tx;
use crate::models::{convert_all, DbMedicalRecord, DbPrescription};

#[derive(Clone)]
pub struct PgPrescriptionStore {
    db: DatabasePool,
}

impl PgPrescriptionStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// 锁定处方并确认仍为 pending
    async fn lock_pending(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
        let status: String = sqlx::query_scalar("SELECT status FROM prescriptions WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| SimrsError::not_found("prescription", id))?;
        if status != "pending" {
            return Err(SimrsError::Conflict(format!("prescription {} is {}", id, status)));
        }
        Ok(())
    }
}

#[async_trait]
impl PrescriptionStore for PgPrescriptionStore {
    async fn create_prescription(
        &self,
        record: MedicalRecord,
        prescription: Prescription,
    ) -> Result<Prescription> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO medical_records
                (id, patient_id, ticket_id, doctor_id, complaint, diagnosis, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.patient_id)
        .bind(record.ticket_id)
        .bind(record.doctor_id)
        .bind(&record.complaint)
        .bind(&record.diagnosis)
        .bind(&record.notes)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, DbPrescription>(
            r#"
            INSERT INTO prescriptions
                (id, ticket_id, medical_record_id, patient_id, doctor_id, status, items, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(prescription.id)
        .bind(prescription.ticket_id)
        .bind(prescription.medical_record_id)
        .bind(prescription.patient_id)
        .bind(prescription.doctor_id)
        .bind(prescription.status.as_str())
        .bind(Json(&prescription.items))
        .bind(&prescription.notes)
        .bind(prescription.created_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>> {
        sqlx::query_as::<_, DbPrescription>("SELECT * FROM prescriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(Prescription::try_from)
            .transpose()
    }

    async fn list_prescriptions(&self, filter: &PrescriptionFilter) -> Result<Vec<Prescription>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM prescriptions WHERE TRUE");
        if let Some(patient_id) = filter.patient_id {
            query.push(" AND patient_id = ").push_bind(patient_id);
        }
        if let Some(ticket_id) = filter.ticket_id {
            query.push(" AND ticket_id = ").push_bind(ticket_id);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(clamp_limit(filter.limit, 100, 1000));

        let rows = query
            .build_query_as::<DbPrescription>()
            .fetch_all(self.db.pool())
            .await?;
        convert_all(rows)
    }

    async fn medical_records(&self, patient_id: Uuid) -> Result<Vec<MedicalRecord>> {
        let rows = sqlx::query_as::<_, DbMedicalRecord>(
            "SELECT * FROM medical_records WHERE patient_id = $1 ORDER BY created_at DESC",
        )
        .bind(patient_id)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn dispense(
        &self,
        id: Uuid,
        changes: Vec<StockChange>,
        dispensed_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(Prescription, Vec<StockMovement>)> {
        let mut tx = self.db.pool().begin().await?;
        Self::lock_pending(&mut tx, id).await?;

        let movements = apply_in_tx(&mut tx, changes, at).await?;
        let row = sqlx::query_as::<_, DbPrescription>(
            r#"
            UPDATE prescriptions SET status = 'dispensed', dispensed_at = $2, dispensed_by = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(dispensed_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((row.try_into()?, movements))
    }

    async fn cancel_prescription(&self, id: Uuid, at: DateTime<Utc>) -> Result<Prescription> {
        let mut tx = self.db.pool().begin().await?;
        Self::lock_pending(&mut tx, id).await?;

        let row = sqlx::query_as::<_, DbPrescription>(
            "UPDATE prescriptions SET status = 'cancelled', cancelled_at = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }
}
