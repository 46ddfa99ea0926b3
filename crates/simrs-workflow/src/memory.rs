//! 内存存储实现，用于测试和演示

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use simrs_core::utils::{clamp_limit, format_medical_record_number, format_ticket_code};
use simrs_core::{
    Attendance, AttendanceFilter, AttendanceStatus, Doctor, GeoPoint, LeaveDecision, LeaveFilter,
    LeaveRequest, LeaveStatus, MedicalRecord, NewDoctor, NewPatient, NewQueueTicket, Patient,
    PatientUpdate, Polyclinic, Prescription, PrescriptionFilter, PrescriptionStatus, QueueFilter,
    QueueStatus, QueueTicket, Result, SimrsError, StockChange, StockMovement, TicketTransition,
};
use simrs_inventory::StockStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::attendance::AttendanceStore;
use crate::prescription::PrescriptionStore;
use crate::queue::QueueStore;
use crate::registration::RegistryStore;

#[derive(Debug, Default)]
struct RegistryState {
    patients: HashMap<Uuid, Patient>,
    mrn_counters: HashMap<i32, i64>,
    polyclinics: HashMap<Uuid, Polyclinic>,
    doctors: HashMap<Uuid, Doctor>,
}

/// 内存登记存储
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn create_patient(&self, patient: NewPatient, year: i32) -> Result<Patient> {
        let mut state = self.state.write().await;
        if let Some(nik) = &patient.nik {
            if state.patients.values().any(|p| p.nik.as_ref() == Some(nik)) {
                return Err(SimrsError::Conflict(format!("NIK {} is already registered", nik)));
            }
        }

        let sequence = state.mrn_counters.entry(year).or_insert(0);
        *sequence += 1;
        let medical_record_number = format_medical_record_number(year, *sequence);

        let now = Utc::now();
        let created = Patient {
            id: Uuid::new_v4(),
            medical_record_number,
            nik: patient.nik,
            name: patient.name,
            sex: patient.sex,
            birth_date: patient.birth_date,
            phone: patient.phone,
            address: patient.address,
            created_at: now,
            updated_at: now,
        };
        state.patients.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_patient(&self, id: Uuid) -> Result<Option<Patient>> {
        Ok(self.state.read().await.patients.get(&id).cloned())
    }

    async fn find_patient_by_mrn(&self, medical_record_number: &str) -> Result<Option<Patient>> {
        let state = self.state.read().await;
        Ok(state
            .patients
            .values()
            .find(|p| p.medical_record_number == medical_record_number)
            .cloned())
    }

    async fn find_patient_by_nik(&self, nik: &str) -> Result<Option<Patient>> {
        let state = self.state.read().await;
        Ok(state
            .patients
            .values()
            .find(|p| p.nik.as_deref() == Some(nik))
            .cloned())
    }

    async fn search_patients(&self, query: Option<&str>, limit: i64, offset: i64) -> Result<Vec<Patient>> {
        let state = self.state.read().await;
        let query = query.map(|q| q.to_lowercase());
        let mut patients: Vec<Patient> = state
            .patients
            .values()
            .filter(|p| match &query {
                Some(q) => {
                    p.name.to_lowercase().contains(q)
                        || p.medical_record_number.to_lowercase().contains(q)
                        || p.nik.as_deref().map_or(false, |nik| nik.contains(q.as_str()))
                }
                None => true,
            })
            .cloned()
            .collect();
        patients.sort_by(|a, b| a.medical_record_number.cmp(&b.medical_record_number));
        Ok(patients
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update_patient(&self, id: Uuid, update: PatientUpdate) -> Result<Patient> {
        let mut state = self.state.write().await;
        let patient = state
            .patients
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("patient", id))?;
        if let Some(name) = update.name {
            patient.name = name.trim().to_string();
        }
        if update.sex.is_some() {
            patient.sex = update.sex;
        }
        if update.birth_date.is_some() {
            patient.birth_date = update.birth_date;
        }
        if update.phone.is_some() {
            patient.phone = update.phone;
        }
        if update.address.is_some() {
            patient.address = update.address;
        }
        patient.updated_at = Utc::now();
        Ok(patient.clone())
    }

    async fn create_polyclinic(&self, code: &str, name: &str) -> Result<Polyclinic> {
        let mut state = self.state.write().await;
        if state.polyclinics.values().any(|p| p.code == code) {
            return Err(SimrsError::Conflict(format!("polyclinic code {} already exists", code)));
        }
        let now = Utc::now();
        let polyclinic = Polyclinic {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: name.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.polyclinics.insert(polyclinic.id, polyclinic.clone());
        Ok(polyclinic)
    }

    async fn get_polyclinic(&self, id: Uuid) -> Result<Option<Polyclinic>> {
        Ok(self.state.read().await.polyclinics.get(&id).cloned())
    }

    async fn list_polyclinics(&self, active_only: bool) -> Result<Vec<Polyclinic>> {
        let state = self.state.read().await;
        let mut polyclinics: Vec<Polyclinic> = state
            .polyclinics
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect();
        polyclinics.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(polyclinics)
    }

    async fn update_polyclinic(
        &self,
        id: Uuid,
        name: Option<String>,
        is_active: Option<bool>,
    ) -> Result<Polyclinic> {
        let mut state = self.state.write().await;
        let polyclinic = state
            .polyclinics
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("polyclinic", id))?;
        if let Some(name) = name {
            polyclinic.name = name.trim().to_string();
        }
        if let Some(is_active) = is_active {
            polyclinic.is_active = is_active;
        }
        polyclinic.updated_at = Utc::now();
        Ok(polyclinic.clone())
    }

    async fn create_doctor(&self, doctor: NewDoctor) -> Result<Doctor> {
        let mut state = self.state.write().await;
        let created = Doctor {
            id: Uuid::new_v4(),
            name: doctor.name.trim().to_string(),
            polyclinic_id: doctor.polyclinic_id,
            license_number: doctor.license_number,
            user_id: doctor.user_id,
            is_active: true,
            created_at: Utc::now(),
        };
        state.doctors.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>> {
        Ok(self.state.read().await.doctors.get(&id).cloned())
    }

    async fn list_doctors(&self, polyclinic_id: Option<Uuid>) -> Result<Vec<Doctor>> {
        let state = self.state.read().await;
        let mut doctors: Vec<Doctor> = state
            .doctors
            .values()
            .filter(|d| polyclinic_id.map_or(true, |id| d.polyclinic_id == id))
            .cloned()
            .collect();
        doctors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(doctors)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    counters: HashMap<(Uuid, NaiveDate), i32>,
    tickets: HashMap<Uuid, QueueTicket>,
}

/// 内存号票存储，计数器与号票在同一把锁下更新
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: RwLock<QueueState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueue {
    async fn issue_ticket(&self, request: NewQueueTicket, now: DateTime<Utc>) -> Result<QueueTicket> {
        let mut state = self.state.write().await;

        if let Some(patient_id) = request.patient_id {
            let duplicate = state.tickets.values().any(|t| {
                t.polyclinic_id == request.polyclinic_id
                    && t.queue_date == request.queue_date
                    && t.patient_id == Some(patient_id)
                    && t.status.is_active()
            });
            if duplicate {
                return Err(SimrsError::Conflict(
                    "patient already holds an active ticket".to_string(),
                ));
            }
        }

        let counter = state
            .counters
            .entry((request.polyclinic_id, request.queue_date))
            .or_insert(0);
        *counter += 1;
        let number = *counter;

        let ticket = QueueTicket {
            id: Uuid::new_v4(),
            polyclinic_id: request.polyclinic_id,
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            queue_date: request.queue_date,
            number,
            code: format_ticket_code(&request.code_prefix, number),
            status: QueueStatus::Waiting,
            call_count: 0,
            handled_by: None,
            created_at: now,
            called_at: None,
            serving_at: None,
            completed_at: None,
            skipped_at: None,
            updated_at: now,
        };
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket)
    }

    async fn get_ticket(&self, id: Uuid) -> Result<Option<QueueTicket>> {
        Ok(self.state.read().await.tickets.get(&id).cloned())
    }

    async fn list_tickets(&self, filter: &QueueFilter) -> Result<Vec<QueueTicket>> {
        let state = self.state.read().await;
        let mut tickets: Vec<QueueTicket> = state
            .tickets
            .values()
            .filter(|t| filter.polyclinic_id.map_or(true, |id| t.polyclinic_id == id))
            .filter(|t| filter.queue_date.map_or(true, |d| t.queue_date == d))
            .filter(|t| filter.patient_id.map_or(true, |id| t.patient_id == Some(id)))
            .filter(|t| {
                filter
                    .statuses
                    .as_ref()
                    .map_or(true, |statuses| statuses.contains(&t.status))
            })
            .cloned()
            .collect();
        tickets.sort_by_key(|t| (t.queue_date, t.polyclinic_id, t.number));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = clamp_limit(filter.limit, 200, 10_000) as usize;
        Ok(tickets.into_iter().skip(offset).take(limit).collect())
    }

    async fn next_waiting(&self, polyclinic_id: Uuid, date: NaiveDate) -> Result<Option<QueueTicket>> {
        let state = self.state.read().await;
        Ok(state
            .tickets
            .values()
            .filter(|t| {
                t.polyclinic_id == polyclinic_id
                    && t.queue_date == date
                    && t.status == QueueStatus::Waiting
            })
            .min_by_key(|t| t.number)
            .cloned())
    }

    async fn transition(&self, transition: TicketTransition) -> Result<QueueTicket> {
        let mut state = self.state.write().await;
        let ticket = state
            .tickets
            .get_mut(&transition.ticket_id)
            .ok_or_else(|| SimrsError::not_found("queue ticket", transition.ticket_id))?;
        if ticket.status != transition.expected {
            return Err(SimrsError::Conflict(format!(
                "ticket {} is {}, expected {}",
                ticket.code, ticket.status, transition.expected
            )));
        }

        ticket.status = transition.to;
        ticket.updated_at = transition.at;
        if transition.handled_by.is_some() {
            ticket.handled_by = transition.handled_by;
        }
        if transition.bump_call_count {
            ticket.call_count += 1;
        }
        match transition.to {
            QueueStatus::Called => {
                ticket.called_at.get_or_insert(transition.at);
            }
            QueueStatus::Serving => ticket.serving_at = Some(transition.at),
            QueueStatus::Completed => ticket.completed_at = Some(transition.at),
            QueueStatus::Skipped => ticket.skipped_at = Some(transition.at),
            QueueStatus::Waiting => {}
        }
        Ok(ticket.clone())
    }
}

#[derive(Debug, Default)]
struct ClinicState {
    records: HashMap<Uuid, MedicalRecord>,
    prescriptions: HashMap<Uuid, Prescription>,
}

/// 内存处方存储
///
/// 发药时在持有处方锁的情况下调用库存存储的原子变动，
/// 库存失败则处方状态保持不变。
pub struct InMemoryClinic {
    state: Mutex<ClinicState>,
    stock: Arc<dyn StockStore>,
}

impl InMemoryClinic {
    pub fn new(stock: Arc<dyn StockStore>) -> Self {
        Self {
            state: Mutex::new(ClinicState::default()),
            stock,
        }
    }
}

#[async_trait]
impl PrescriptionStore for InMemoryClinic {
    async fn create_prescription(
        &self,
        record: MedicalRecord,
        prescription: Prescription,
    ) -> Result<Prescription> {
        let mut state = self.state.lock().await;
        state.records.insert(record.id, record);
        state.prescriptions.insert(prescription.id, prescription.clone());
        Ok(prescription)
    }

    async fn get_prescription(&self, id: Uuid) -> Result<Option<Prescription>> {
        Ok(self.state.lock().await.prescriptions.get(&id).cloned())
    }

    async fn list_prescriptions(&self, filter: &PrescriptionFilter) -> Result<Vec<Prescription>> {
        let state = self.state.lock().await;
        let mut prescriptions: Vec<Prescription> = state
            .prescriptions
            .values()
            .filter(|p| filter.patient_id.map_or(true, |id| p.patient_id == id))
            .filter(|p| filter.ticket_id.map_or(true, |id| p.ticket_id == id))
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        prescriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        prescriptions.truncate(clamp_limit(filter.limit, 100, 1000) as usize);
        Ok(prescriptions)
    }

    async fn medical_records(&self, patient_id: Uuid) -> Result<Vec<MedicalRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<MedicalRecord> = state
            .records
            .values()
            .filter(|r| r.patient_id == patient_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn dispense(
        &self,
        id: Uuid,
        changes: Vec<StockChange>,
        dispensed_by: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<(Prescription, Vec<StockMovement>)> {
        let mut state = self.state.lock().await;
        let status = state
            .prescriptions
            .get(&id)
            .map(|p| p.status)
            .ok_or_else(|| SimrsError::not_found("prescription", id))?;
        if status != PrescriptionStatus::Pending {
            return Err(SimrsError::Conflict(format!("prescription {} is {}", id, status)));
        }

        let movements = self.stock.apply(changes).await?;
        let prescription = state
            .prescriptions
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("prescription", id))?;
        prescription.status = PrescriptionStatus::Dispensed;
        prescription.dispensed_at = Some(at);
        prescription.dispensed_by = dispensed_by;
        Ok((prescription.clone(), movements))
    }

    async fn cancel_prescription(&self, id: Uuid, at: DateTime<Utc>) -> Result<Prescription> {
        let mut state = self.state.lock().await;
        let prescription = state
            .prescriptions
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("prescription", id))?;
        if prescription.status != PrescriptionStatus::Pending {
            return Err(SimrsError::Conflict(format!(
                "prescription {} is {}",
                id, prescription.status
            )));
        }
        prescription.status = PrescriptionStatus::Cancelled;
        prescription.cancelled_at = Some(at);
        Ok(prescription.clone())
    }
}

#[derive(Debug, Default)]
struct AttendanceState {
    attendance: HashMap<(Uuid, NaiveDate), Attendance>,
    leaves: HashMap<Uuid, LeaveRequest>,
}

/// 内存考勤存储
#[derive(Debug, Default)]
pub struct InMemoryAttendance {
    state: RwLock<AttendanceState>,
}

impl InMemoryAttendance {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttendanceStore for InMemoryAttendance {
    async fn get_attendance(&self, user_id: Uuid, work_date: NaiveDate) -> Result<Option<Attendance>> {
        Ok(self
            .state
            .read()
            .await
            .attendance
            .get(&(user_id, work_date))
            .cloned())
    }

    async fn insert_attendance(&self, attendance: Attendance) -> Result<Attendance> {
        let mut state = self.state.write().await;
        let key = (attendance.user_id, attendance.work_date);
        if state.attendance.contains_key(&key) {
            return Err(SimrsError::Conflict(format!(
                "attendance for {} already exists",
                attendance.work_date
            )));
        }
        state.attendance.insert(key, attendance.clone());
        Ok(attendance)
    }

    async fn record_check_out(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        location: GeoPoint,
        photo: Option<String>,
    ) -> Result<Attendance> {
        let mut state = self.state.write().await;
        let attendance = state
            .attendance
            .values_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| SimrsError::not_found("attendance", id))?;
        if attendance.check_out_at.is_some() {
            return Err(SimrsError::Conflict("already checked out".to_string()));
        }
        attendance.check_out_at = Some(at);
        attendance.check_out_location = Some(location);
        attendance.check_out_photo = photo;
        attendance.updated_at = at;
        Ok(attendance.clone())
    }

    async fn list_attendance(&self, filter: &AttendanceFilter) -> Result<Vec<Attendance>> {
        let state = self.state.read().await;
        let mut rows: Vec<Attendance> = state
            .attendance
            .values()
            .filter(|a| filter.user_id.map_or(true, |id| a.user_id == id))
            .filter(|a| filter.from.map_or(true, |from| a.work_date >= from))
            .filter(|a| filter.to.map_or(true, |to| a.work_date <= to))
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.work_date, a.user_id));
        rows.truncate(clamp_limit(filter.limit, 366, 5000) as usize);
        Ok(rows)
    }

    async fn create_leave(&self, leave: LeaveRequest) -> Result<LeaveRequest> {
        let mut state = self.state.write().await;
        let overlapping = state.leaves.values().any(|other| {
            other.user_id == leave.user_id
                && matches!(other.status, LeaveStatus::Pending | LeaveStatus::Approved)
                && other.overlaps(leave.start_date, leave.end_date)
        });
        if overlapping {
            return Err(SimrsError::Conflict(
                "leave overlaps an existing request".to_string(),
            ));
        }
        state.leaves.insert(leave.id, leave.clone());
        Ok(leave)
    }

    async fn get_leave(&self, id: Uuid) -> Result<Option<LeaveRequest>> {
        Ok(self.state.read().await.leaves.get(&id).cloned())
    }

    async fn list_leaves(&self, filter: &LeaveFilter) -> Result<Vec<LeaveRequest>> {
        let state = self.state.read().await;
        let mut leaves: Vec<LeaveRequest> = state
            .leaves
            .values()
            .filter(|l| filter.user_id.map_or(true, |id| l.user_id == id))
            .filter(|l| filter.status.map_or(true, |s| l.status == s))
            .cloned()
            .collect();
        leaves.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(leaves)
    }

    async fn decide_leave(&self, decision: LeaveDecision) -> Result<(LeaveRequest, Vec<Attendance>)> {
        let mut state = self.state.write().await;
        let leave = state
            .leaves
            .get(&decision.leave_id)
            .cloned()
            .ok_or_else(|| SimrsError::not_found("leave request", decision.leave_id))?;
        if leave.status != LeaveStatus::Pending {
            return Err(SimrsError::Conflict(format!(
                "leave {} is {}",
                leave.id, leave.status
            )));
        }

        let mut filled = Vec::new();
        if decision.to == LeaveStatus::Approved {
            for day in leave.dates() {
                let key = (leave.user_id, day);
                if state.attendance.contains_key(&key) {
                    continue;
                }
                let row = Attendance {
                    id: Uuid::new_v4(),
                    user_id: leave.user_id,
                    work_date: day,
                    status: AttendanceStatus::Leave,
                    check_in_at: None,
                    check_out_at: None,
                    check_in_location: None,
                    check_out_location: None,
                    check_in_photo: None,
                    check_out_photo: None,
                    distance_meters: None,
                    leave_id: Some(leave.id),
                    created_at: decision.at,
                    updated_at: decision.at,
                };
                state.attendance.insert(key, row.clone());
                filled.push(row);
            }
        }

        let stored = state
            .leaves
            .get_mut(&decision.leave_id)
            .ok_or_else(|| SimrsError::not_found("leave request", decision.leave_id))?;
        stored.status = decision.to;
        if decision.reviewed_by.is_some() {
            stored.reviewed_by = decision.reviewed_by;
            stored.reviewed_at = Some(decision.at);
            stored.review_note = decision.review_note;
        }
        Ok((stored.clone(), filled))
    }
}
