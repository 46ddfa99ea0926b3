//! 患者登记、科室与医生管理

use async_trait::async_trait;
use chrono::{Datelike, FixedOffset, Utc};
use simrs_core::utils::{is_valid_nik, is_valid_polyclinic_code, local_date, non_blank};
use simrs_core::{
    Doctor, NewDoctor, NewPatient, Patient, PatientUpdate, Polyclinic, Result, SimrsError,
};
use std::sync::Arc;
use uuid::Uuid;

/// 登记存储接口
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// 从年度计数器分配病历号并创建患者，两者在同一事务内完成
    async fn create_patient(&self, patient: NewPatient, year: i32) -> Result<Patient>;

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>>;

    async fn find_patient_by_mrn(&self, medical_record_number: &str) -> Result<Option<Patient>>;

    async fn find_patient_by_nik(&self, nik: &str) -> Result<Option<Patient>>;

    async fn search_patients(&self, query: Option<&str>, limit: i64, offset: i64) -> Result<Vec<Patient>>;

    async fn update_patient(&self, id: Uuid, update: PatientUpdate) -> Result<Patient>;

    async fn create_polyclinic(&self, code: &str, name: &str) -> Result<Polyclinic>;

    async fn get_polyclinic(&self, id: Uuid) -> Result<Option<Polyclinic>>;

    async fn list_polyclinics(&self, active_only: bool) -> Result<Vec<Polyclinic>>;

    async fn update_polyclinic(
        &self,
        id: Uuid,
        name: Option<String>,
        is_active: Option<bool>,
    ) -> Result<Polyclinic>;

    async fn create_doctor(&self, doctor: NewDoctor) -> Result<Doctor>;

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>>;

    async fn list_doctors(&self, polyclinic_id: Option<Uuid>) -> Result<Vec<Doctor>>;
}

/// 登记服务
pub struct RegistrationService {
    store: Arc<dyn RegistryStore>,
    offset: FixedOffset,
}

impl RegistrationService {
    pub fn new(store: Arc<dyn RegistryStore>, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    pub fn store(&self) -> Arc<dyn RegistryStore> {
        self.store.clone()
    }

    /// 登记新患者并分配病历号
    pub async fn register_patient(&self, patient: NewPatient) -> Result<Patient> {
        let name = patient.name.trim().to_string();
        if name.is_empty() {
            return Err(SimrsError::Validation("patient name is required".to_string()));
        }

        let nik = non_blank(patient.nik);
        if let Some(nik) = &nik {
            if !is_valid_nik(nik) {
                return Err(SimrsError::Validation("NIK must be 16 digits".to_string()));
            }
            if self.store.find_patient_by_nik(nik).await?.is_some() {
                return Err(SimrsError::Conflict(format!("NIK {} is already registered", nik)));
            }
        }

        let year = local_date(Utc::now(), self.offset).year();
        let patient = NewPatient {
            nik,
            name,
            phone: non_blank(patient.phone),
            address: non_blank(patient.address),
            ..patient
        };
        let created = self.store.create_patient(patient, year).await?;
        tracing::info!("Registered patient {} as {}", created.id, created.medical_record_number);
        Ok(created)
    }

    pub async fn get_patient(&self, id: Uuid) -> Result<Patient> {
        self.store
            .get_patient(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("patient", id))
    }

    pub async fn find_by_medical_record_number(&self, mrn: &str) -> Result<Patient> {
        self.store
            .find_patient_by_mrn(mrn.trim())
            .await?
            .ok_or_else(|| SimrsError::not_found("patient", mrn))
    }

    pub async fn search_patients(
        &self,
        query: Option<String>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Patient>> {
        let query = non_blank(query);
        let limit = simrs_core::utils::clamp_limit(limit, 50, 200);
        self.store
            .search_patients(query.as_deref(), limit, offset.unwrap_or(0).max(0))
            .await
    }

    pub async fn update_patient(&self, id: Uuid, update: PatientUpdate) -> Result<Patient> {
        if matches!(&update.name, Some(name) if name.trim().is_empty()) {
            return Err(SimrsError::Validation("patient name must not be blank".to_string()));
        }
        self.store.update_patient(id, update).await
    }

    pub async fn create_polyclinic(&self, code: &str, name: &str) -> Result<Polyclinic> {
        let code = code.trim().to_uppercase();
        if !is_valid_polyclinic_code(&code) {
            return Err(SimrsError::Validation(
                "polyclinic code must be 1-6 uppercase letters or digits".to_string(),
            ));
        }
        if name.trim().is_empty() {
            return Err(SimrsError::Validation("polyclinic name is required".to_string()));
        }
        let created = self.store.create_polyclinic(&code, name.trim()).await?;
        tracing::info!("Created polyclinic {} ({})", created.code, created.id);
        Ok(created)
    }

    pub async fn get_polyclinic(&self, id: Uuid) -> Result<Polyclinic> {
        self.store
            .get_polyclinic(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("polyclinic", id))
    }

    pub async fn list_polyclinics(&self, active_only: bool) -> Result<Vec<Polyclinic>> {
        self.store.list_polyclinics(active_only).await
    }

    pub async fn update_polyclinic(
        &self,
        id: Uuid,
        name: Option<String>,
        is_active: Option<bool>,
    ) -> Result<Polyclinic> {
        if matches!(&name, Some(n) if n.trim().is_empty()) {
            return Err(SimrsError::Validation("polyclinic name must not be blank".to_string()));
        }
        self.store.update_polyclinic(id, name, is_active).await
    }

    pub async fn create_doctor(&self, doctor: NewDoctor) -> Result<Doctor> {
        if doctor.name.trim().is_empty() {
            return Err(SimrsError::Validation("doctor name is required".to_string()));
        }
        self.get_polyclinic(doctor.polyclinic_id).await?;
        self.store.create_doctor(doctor).await
    }

    pub async fn get_doctor(&self, id: Uuid) -> Result<Doctor> {
        self.store
            .get_doctor(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("doctor", id))
    }

    pub async fn list_doctors(&self, polyclinic_id: Option<Uuid>) -> Result<Vec<Doctor>> {
        self.store.list_doctors(polyclinic_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryRegistry;
    use simrs_core::utils::fixed_offset;

    fn service() -> RegistrationService {
        RegistrationService::new(Arc::new(InMemoryRegistry::new()), fixed_offset(7).unwrap())
    }

    #[tokio::test]
    async fn test_register_allocates_sequential_mrn() {
        let service = service();
        let first = service
            .register_patient(NewPatient {
                name: "Siti Aminah".into(),
                nik: Some("3174012501900001".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let second = service
            .register_patient(NewPatient {
                name: "Budi".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(first.medical_record_number.starts_with("RM"));
        assert!(first.medical_record_number.ends_with("000001"));
        assert!(second.medical_record_number.ends_with("000002"));

        let found = service
            .find_by_medical_record_number(&second.medical_record_number)
            .await
            .unwrap();
        assert_eq!(found.id, second.id);
        assert_eq!(service.search_patients(Some("siti".into()), None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_nik_rules() {
        let service = service();
        let bad = service
            .register_patient(NewPatient {
                name: "X".into(),
                nik: Some("12345".into()),
                ..Default::default()
            })
            .await;
        assert!(matches!(bad, Err(SimrsError::Validation(_))));

        let nik = Some("3174012501900002".to_string());
        service
            .register_patient(NewPatient { name: "A".into(), nik: nik.clone(), ..Default::default() })
            .await
            .unwrap();
        let dup = service
            .register_patient(NewPatient { name: "B".into(), nik, ..Default::default() })
            .await;
        assert!(matches!(dup, Err(SimrsError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_polyclinic_code_rules() {
        let service = service();
        let poly = service.create_polyclinic("pu", "Poli Umum").await.unwrap();
        assert_eq!(poly.code, "PU");
        assert!(service.create_polyclinic("PU", "Lagi").await.is_err());
        assert!(service.create_polyclinic("TOOLONG", "x").await.is_err());

        let updated = service.update_polyclinic(poly.id, None, Some(false)).await.unwrap();
        assert!(!updated.is_active);
        assert!(service.list_polyclinics(true).await.unwrap().is_empty());
    }
}
