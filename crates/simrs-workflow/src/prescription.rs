//! 病历与处方
//!
//! 处方必须挂在一张有患者的号票上；发药时按先进先出一次性扣减全部明细。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simrs_core::{
    DomainEvent, EventKind, EventPublisher, MedicalRecord, MovementKind, NewPrescription,
    Prescription, PrescriptionFilter, PrescriptionStatus, QueueStatus, Result, SimrsError,
    StockChange, StockMovement,
};
use simrs_inventory::StockService;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::queue::QueueStore;

/// 处方存储接口
#[async_trait]
pub trait PrescriptionStore: Send + Sync {
    /// 病历与处方一起写入
    async fn create_prescription(
        &self,
        record: MedicalRecord,
        prescription: Prescription,
    ) -> Result<Prescription>;

    async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>>;

    async fn list_prescriptions(&self, filter: &PrescriptionFilter) -> Result<Vec<Prescription>>;

    async fn medical_records(&self, patient_id: Uuid) -> Result<Vec<MedicalRecord>>;

    /// Pending → Dispensed，并在同一事务中扣减库存
    async fn dispense(
        &self,
        id: Uuid,
        changes: Vec<StockChange>,
        dispensed_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(Prescription, Vec<StockMovement>)>;

    /// Pending → Cancelled
    async fn cancel_prescription(&self, id: Uuid, at: DateTime<Utc>) -> Result<Prescription>;
}

/// 处方服务
pub struct PrescriptionService {
    store: Arc<dyn PrescriptionStore>,
    queue: Arc<dyn QueueStore>,
    stock: Arc<StockService>,
    publisher: Arc<dyn EventPublisher>,
}

impl PrescriptionService {
    pub fn new(
        store: Arc<dyn PrescriptionStore>,
        queue: Arc<dyn QueueStore>,
        stock: Arc<StockService>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            queue,
            stock,
            publisher,
        }
    }

    /// 开具处方，同时写入病历
    pub async fn create(&self, request: NewPrescription) -> Result<Prescription> {
        if request.diagnosis.trim().is_empty() {
            return Err(SimrsError::Validation("diagnosis is required".to_string()));
        }
        if request.items.is_empty() {
            return Err(SimrsError::Validation(
                "prescription needs at least one item".to_string(),
            ));
        }

        let ticket = self
            .queue
            .get_ticket(request.ticket_id)
            .await?
            .ok_or_else(|| SimrsError::not_found("queue ticket", request.ticket_id))?;
        if !matches!(ticket.status, QueueStatus::Serving | QueueStatus::Completed) {
            return Err(SimrsError::Validation(format!(
                "ticket {} is {}, the patient has not been seen",
                ticket.code, ticket.status
            )));
        }
        let patient_id = ticket.patient_id.ok_or_else(|| {
            SimrsError::Validation(format!("ticket {} has no registered patient", ticket.code))
        })?;
        if patient_id != request.patient_id {
            return Err(SimrsError::Validation(
                "patient does not match the ticket".to_string(),
            ));
        }

        let mut checked = HashSet::new();
        for line in &request.items {
            if line.quantity <= 0 {
                return Err(SimrsError::Validation(format!(
                    "quantity for item {} must be positive",
                    line.item_id
                )));
            }
            if checked.insert(line.item_id) {
                let stock = self.stock.get_item(line.item_id).await?;
                if !stock.item.is_active {
                    return Err(SimrsError::Validation(format!(
                        "item {} is no longer dispensed",
                        stock.item.code
                    )));
                }
            }
        }

        let now = Utc::now();
        let doctor_id = request.doctor_id.or(ticket.doctor_id);
        let record = MedicalRecord {
            id: Uuid::new_v4(),
            patient_id,
            ticket_id: ticket.id,
            doctor_id,
            complaint: request.complaint,
            diagnosis: request.diagnosis.trim().to_string(),
            notes: request.notes.clone(),
            created_at: now,
        };
        let prescription = Prescription {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            medical_record_id: record.id,
            patient_id,
            doctor_id,
            status: PrescriptionStatus::Pending,
            items: request.items,
            notes: request.notes,
            created_at: now,
            dispensed_at: None,
            dispensed_by: None,
            cancelled_at: None,
        };

        let created = self.store.create_prescription(record, prescription).await?;
        tracing::info!(
            "Created prescription {} for ticket {} ({} items)",
            created.id,
            ticket.code,
            created.items.len()
        );
        Ok(created)
    }

    pub async fn get(&self, id: Uuid) -> Result<Prescription> {
        self.store
            .get_prescription(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("prescription", id))
    }

    pub async fn list(&self, filter: &PrescriptionFilter) -> Result<Vec<Prescription>> {
        self.store.list_prescriptions(filter).await
    }

    pub async fn medical_records(&self, patient_id: Uuid) -> Result<Vec<MedicalRecord>> {
        self.store.medical_records(patient_id).await
    }

    /// 发药，任一明细库存不足则整张处方失败
    pub async fn dispense(&self, id: Uuid, pharmacist: Option<Uuid>) -> Result<Prescription> {
        let prescription = self.get(id).await?;
        ensure_pending(&prescription, "dispense")?;

        let changes: Vec<StockChange> = prescription
            .items
            .iter()
            .map(|line| {
                StockChange::new(line.item_id, -line.quantity, MovementKind::Dispense)
                    .with_reference("prescription", prescription.id)
                    .with_note(line.dosage.clone())
                    .with_actor(pharmacist)
            })
            .collect();

        let (dispensed, movements) = self
            .store
            .dispense(id, changes, pharmacist, Utc::now())
            .await?;

        tracing::info!("Dispensed prescription {} ({} movements)", id, movements.len());
        self.stock.announce(&movements).await;
        self.publisher
            .publish(DomainEvent::from_data(EventKind::PrescriptionDispensed, &dispensed));
        Ok(dispensed)
    }

    pub async fn cancel(&self, id: Uuid) -> Result<Prescription> {
        let prescription = self.get(id).await?;
        ensure_pending(&prescription, "cancel")?;
        let cancelled = self.store.cancel_prescription(id, Utc::now()).await?;
        tracing::info!("Cancelled prescription {}", id);
        Ok(cancelled)
    }
}

fn ensure_pending(prescription: &Prescription, event: &str) -> Result<()> {
    if prescription.status == PrescriptionStatus::Pending {
        Ok(())
    } else {
        Err(SimrsError::InvalidStateTransition {
            from: prescription.status.to_string(),
            event: event.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryClinic, InMemoryQueue, InMemoryRegistry};
    use crate::queue::QueueService;
    use crate::registration::RegistrationService;
    use simrs_core::utils::fixed_offset;
    use simrs_core::{NewItem, NewPatient, NoopPublisher, PrescriptionItem};
    use simrs_inventory::{InMemoryInventory, ReceiveStock};

    struct Fixture {
        prescriptions: PrescriptionService,
        queue: QueueService,
        stock: Arc<StockService>,
        poly: Uuid,
        patient: Uuid,
        pct: Uuid,
    }

    async fn fixture() -> Fixture {
        let publisher: Arc<dyn EventPublisher> = Arc::new(NoopPublisher);
        let offset = fixed_offset(7).unwrap();
        let registry = Arc::new(InMemoryRegistry::new());
        let registration = RegistrationService::new(registry.clone(), offset);
        let poly = registration.create_polyclinic("PU", "Poli Umum").await.unwrap().id;
        let patient = registration
            .register_patient(NewPatient { name: "Dewi".into(), ..Default::default() })
            .await
            .unwrap()
            .id;

        let queue_store = Arc::new(InMemoryQueue::new());
        let queue = QueueService::new(queue_store.clone(), registry, publisher.clone(), offset);

        let inventory = Arc::new(InMemoryInventory::new());
        let stock = Arc::new(StockService::new(inventory.clone(), publisher.clone()));
        let pct = stock
            .create_item(NewItem {
                code: "PCT".into(),
                name: "Paracetamol".into(),
                unit: "tablet".into(),
                category: None,
                min_stock: 0,
            })
            .await
            .unwrap()
            .id;
        stock
            .receive(pct, ReceiveStock { quantity: 10, ..Default::default() }, None)
            .await
            .unwrap();

        let prescriptions = PrescriptionService::new(
            Arc::new(InMemoryClinic::new(inventory)),
            queue_store,
            stock.clone(),
            publisher,
        );
        Fixture { prescriptions, queue, stock, poly, patient, pct }
    }

    async fn seen_ticket(f: &Fixture) -> Uuid {
        let ticket = f.queue.take_number(f.poly, Some(f.patient), None).await.unwrap();
        f.queue.call(ticket.id, None).await.unwrap();
        f.queue.serve(ticket.id, None).await.unwrap();
        ticket.id
    }

    fn request(f: &Fixture, ticket_id: Uuid, quantity: i64) -> NewPrescription {
        NewPrescription {
            ticket_id,
            patient_id: f.patient,
            doctor_id: None,
            complaint: Some("demam".into()),
            diagnosis: "R50.9".into(),
            notes: None,
            items: vec![PrescriptionItem { item_id: f.pct, quantity, dosage: Some("3x1".into()) }],
        }
    }

    #[tokio::test]
    async fn test_create_and_dispense() {
        let f = fixture().await;
        let ticket = seen_ticket(&f).await;
        let created = f.prescriptions.create(request(&f, ticket, 6)).await.unwrap();
        assert_eq!(created.status, PrescriptionStatus::Pending);
        assert_eq!(f.prescriptions.medical_records(f.patient).await.unwrap().len(), 1);

        let dispensed = f.prescriptions.dispense(created.id, None).await.unwrap();
        assert_eq!(dispensed.status, PrescriptionStatus::Dispensed);
        assert_eq!(f.stock.get_item(f.pct).await.unwrap().on_hand, 4);
        assert!(f.prescriptions.dispense(created.id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_dispense_insufficient_leaves_pending() {
        let f = fixture().await;
        let ticket = seen_ticket(&f).await;
        let created = f.prescriptions.create(request(&f, ticket, 12)).await.unwrap();

        assert!(matches!(
            f.prescriptions.dispense(created.id, None).await,
            Err(SimrsError::InsufficientStock { .. })
        ));
        assert_eq!(
            f.prescriptions.get(created.id).await.unwrap().status,
            PrescriptionStatus::Pending
        );
        assert_eq!(f.stock.get_item(f.pct).await.unwrap().on_hand, 10);
    }

    #[tokio::test]
    async fn test_ticket_must_be_seen() {
        let f = fixture().await;
        let waiting = f.queue.take_number(f.poly, Some(f.patient), None).await.unwrap();
        assert!(matches!(
            f.prescriptions.create(request(&f, waiting.id, 1)).await,
            Err(SimrsError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let f = fixture().await;
        let ticket = seen_ticket(&f).await;
        let created = f.prescriptions.create(request(&f, ticket, 1)).await.unwrap();
        let cancelled = f.prescriptions.cancel(created.id).await.unwrap();
        assert_eq!(cancelled.status, PrescriptionStatus::Cancelled);
        assert!(f.prescriptions.dispense(created.id, None).await.is_err());
    }
}
