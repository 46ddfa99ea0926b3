//! 门诊排队服务
//!
//! 协调号码分配、状态机和显示屏，状态变化后通过事件发布器广播。

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use simrs_core::utils::{clamp_limit, local_date};
use simrs_core::{
    DomainEvent, EventKind, EventPublisher, NewQueueTicket, QueueFilter, QueueStatus,
    QueueTicket, Result, SimrsError, TicketTransition,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::board::{build_board, QueueBoard};
use crate::registration::RegistryStore;
use crate::state_machine::{QueueEvent, QueueStateMachine};

/// `call_next` 遇到并发抢号时的重试次数
const CALL_NEXT_ATTEMPTS: usize = 3;

/// 号票存储接口
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// 分配 (科室, 日期) 下一个号码并创建号票，两者在同一事务中完成
    async fn issue_ticket(&self, request: NewQueueTicket, now: DateTime<Utc>) -> Result<QueueTicket>;

    async fn get_ticket(&self, id: Uuid) -> Result<Option<QueueTicket>>;

    async fn list_tickets(&self, filter: &QueueFilter) -> Result<Vec<QueueTicket>>;

    /// 号码最小的等待中号票
    async fn next_waiting(&self, polyclinic_id: Uuid, date: NaiveDate) -> Result<Option<QueueTicket>>;

    /// 比较并交换状态；当前状态与 `expected` 不一致时返回 `Conflict`
    async fn transition(&self, transition: TicketTransition) -> Result<QueueTicket>;
}

/// 排队服务
pub struct QueueService {
    store: Arc<dyn QueueStore>,
    registry: Arc<dyn RegistryStore>,
    publisher: Arc<dyn EventPublisher>,
    state_machine: QueueStateMachine,
    offset: FixedOffset,
}

impl QueueService {
    pub fn new(
        store: Arc<dyn QueueStore>,
        registry: Arc<dyn RegistryStore>,
        publisher: Arc<dyn EventPublisher>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            registry,
            publisher,
            state_machine: QueueStateMachine::new(),
            offset,
        }
    }

    pub fn store(&self) -> Arc<dyn QueueStore> {
        self.store.clone()
    }

    /// 医院当地的今天
    pub fn today(&self) -> NaiveDate {
        local_date(Utc::now(), self.offset)
    }

    /// 取号
    pub async fn take_number(
        &self,
        polyclinic_id: Uuid,
        patient_id: Option<Uuid>,
        doctor_id: Option<Uuid>,
    ) -> Result<QueueTicket> {
        let polyclinic = self
            .registry
            .get_polyclinic(polyclinic_id)
            .await?
            .ok_or_else(|| SimrsError::not_found("polyclinic", polyclinic_id))?;
        if !polyclinic.is_active {
            return Err(SimrsError::Validation(format!(
                "polyclinic {} is not accepting patients",
                polyclinic.code
            )));
        }

        if let Some(doctor_id) = doctor_id {
            let doctor = self
                .registry
                .get_doctor(doctor_id)
                .await?
                .ok_or_else(|| SimrsError::not_found("doctor", doctor_id))?;
            if doctor.polyclinic_id != polyclinic_id {
                return Err(SimrsError::Validation(format!(
                    "doctor {} does not practice at {}",
                    doctor.name, polyclinic.code
                )));
            }
        }

        let now = Utc::now();
        let queue_date = local_date(now, self.offset);

        if let Some(patient_id) = patient_id {
            if self.registry.get_patient(patient_id).await?.is_none() {
                return Err(SimrsError::not_found("patient", patient_id));
            }
            let active = self
                .store
                .list_tickets(&QueueFilter {
                    polyclinic_id: Some(polyclinic_id),
                    queue_date: Some(queue_date),
                    patient_id: Some(patient_id),
                    statuses: Some(vec![
                        QueueStatus::Waiting,
                        QueueStatus::Called,
                        QueueStatus::Serving,
                    ]),
                    ..Default::default()
                })
                .await?;
            if let Some(existing) = active.first() {
                return Err(SimrsError::Conflict(format!(
                    "patient already holds active ticket {}",
                    existing.code
                )));
            }
        }

        let ticket = self
            .store
            .issue_ticket(
                NewQueueTicket {
                    polyclinic_id,
                    patient_id,
                    doctor_id,
                    queue_date,
                    code_prefix: polyclinic.code.clone(),
                },
                now,
            )
            .await?;

        tracing::info!(
            polyclinic = %polyclinic.code,
            date = %queue_date,
            number = ticket.number,
            "Issued queue ticket {}",
            ticket.code
        );
        self.broadcast(EventKind::QueueIssued, &ticket);
        Ok(ticket)
    }

    pub async fn get_ticket(&self, id: Uuid) -> Result<QueueTicket> {
        self.store
            .get_ticket(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("queue ticket", id))
    }

    /// 查询号票；未指定日期时查询今天
    pub async fn list_tickets(&self, mut filter: QueueFilter) -> Result<Vec<QueueTicket>> {
        if filter.queue_date.is_none() {
            filter.queue_date = Some(self.today());
        }
        filter.limit = Some(clamp_limit(filter.limit, 200, 1000));
        self.store.list_tickets(&filter).await
    }

    pub async fn call(&self, id: Uuid, staff: Option<Uuid>) -> Result<QueueTicket> {
        let ticket = self.get_ticket(id).await?;
        self.apply_event(ticket, QueueEvent::Call, staff).await
    }

    /// 叫今天号码最小的等待号票
    pub async fn call_next(&self, polyclinic_id: Uuid, staff: Option<Uuid>) -> Result<QueueTicket> {
        let today = self.today();
        for attempt in 1..=CALL_NEXT_ATTEMPTS {
            let next = self
                .store
                .next_waiting(polyclinic_id, today)
                .await?
                .ok_or_else(|| {
                    SimrsError::NotFound(format!("no waiting tickets for polyclinic {}", polyclinic_id))
                })?;

            match self.apply_event(next, QueueEvent::Call, staff).await {
                Err(SimrsError::Conflict(reason)) if attempt < CALL_NEXT_ATTEMPTS => {
                    tracing::debug!("call_next lost a race (attempt {}): {}", attempt, reason);
                }
                result => return result,
            }
        }
        Err(SimrsError::Conflict("could not claim a waiting ticket".to_string()))
    }

    /// 重新叫号：状态不变，叫号次数加一
    pub async fn recall(&self, id: Uuid, staff: Option<Uuid>) -> Result<QueueTicket> {
        let ticket = self.get_ticket(id).await?;
        if ticket.status != QueueStatus::Called {
            return Err(SimrsError::InvalidStateTransition {
                from: ticket.status.to_string(),
                event: "recall".to_string(),
            });
        }

        let updated = self
            .store
            .transition(TicketTransition {
                ticket_id: id,
                expected: QueueStatus::Called,
                to: QueueStatus::Called,
                at: Utc::now(),
                handled_by: staff,
                bump_call_count: true,
            })
            .await?;
        tracing::info!("Recalled ticket {} (call #{})", updated.code, updated.call_count);
        self.broadcast(EventKind::QueueRecalled, &updated);
        Ok(updated)
    }

    pub async fn serve(&self, id: Uuid, staff: Option<Uuid>) -> Result<QueueTicket> {
        let ticket = self.get_ticket(id).await?;
        self.apply_event(ticket, QueueEvent::Serve, staff).await
    }

    pub async fn complete(&self, id: Uuid, staff: Option<Uuid>) -> Result<QueueTicket> {
        let ticket = self.get_ticket(id).await?;
        self.apply_event(ticket, QueueEvent::Complete, staff).await
    }

    pub async fn skip(&self, id: Uuid, staff: Option<Uuid>) -> Result<QueueTicket> {
        let ticket = self.get_ticket(id).await?;
        self.apply_event(ticket, QueueEvent::Skip, staff).await
    }

    /// 显示屏数据
    pub async fn board(&self, polyclinic_id: Uuid, date: Option<NaiveDate>) -> Result<QueueBoard> {
        let polyclinic = self
            .registry
            .get_polyclinic(polyclinic_id)
            .await?
            .ok_or_else(|| SimrsError::not_found("polyclinic", polyclinic_id))?;
        let queue_date = date.unwrap_or_else(|| self.today());
        let tickets = self
            .store
            .list_tickets(&QueueFilter {
                polyclinic_id: Some(polyclinic_id),
                queue_date: Some(queue_date),
                limit: Some(10_000),
                ..Default::default()
            })
            .await?;
        Ok(build_board(&polyclinic, queue_date, &tickets, Utc::now()))
    }

    async fn apply_event(
        &self,
        ticket: QueueTicket,
        event: QueueEvent,
        staff: Option<Uuid>,
    ) -> Result<QueueTicket> {
        let to = self.state_machine.transition(ticket.status, event)?;
        let updated = self
            .store
            .transition(TicketTransition {
                ticket_id: ticket.id,
                expected: ticket.status,
                to,
                at: Utc::now(),
                handled_by: staff,
                bump_call_count: event == QueueEvent::Call,
            })
            .await?;

        tracing::info!("Ticket {} moved {} -> {}", updated.code, ticket.status, updated.status);
        let kind = match event {
            QueueEvent::Call => EventKind::QueueCalled,
            QueueEvent::Serve => EventKind::QueueServing,
            QueueEvent::Complete => EventKind::QueueCompleted,
            QueueEvent::Skip => EventKind::QueueSkipped,
        };
        self.broadcast(kind, &updated);
        Ok(updated)
    }

    fn broadcast(&self, kind: EventKind, ticket: &QueueTicket) {
        self.publisher
            .publish(DomainEvent::from_data(kind, ticket).for_polyclinic(ticket.polyclinic_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryQueue, InMemoryRegistry};
    use crate::registration::RegistrationService;
    use simrs_core::utils::fixed_offset;
    use simrs_core::NewPatient;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<DomainEvent>>);

    impl EventPublisher for Recorder {
        fn publish(&self, event: DomainEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    struct Fixture {
        queue: Arc<QueueService>,
        registration: RegistrationService,
        events: Arc<Recorder>,
        poly: Uuid,
    }

    async fn fixture() -> Fixture {
        let registry = Arc::new(InMemoryRegistry::new());
        let offset = fixed_offset(7).unwrap();
        let events = Arc::new(Recorder::default());
        let registration = RegistrationService::new(registry.clone(), offset);
        let poly = registration.create_polyclinic("PU", "Poli Umum").await.unwrap().id;
        let queue = Arc::new(QueueService::new(
            Arc::new(InMemoryQueue::new()),
            registry,
            events.clone(),
            offset,
        ));
        Fixture { queue, registration, events, poly }
    }

    #[tokio::test]
    async fn test_numbers_start_at_one_and_increase() {
        let f = fixture().await;
        let first = f.queue.take_number(f.poly, None, None).await.unwrap();
        let second = f.queue.take_number(f.poly, None, None).await.unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(first.code, "PU-001");
        assert_eq!(second.number, 2);
        assert_eq!(first.status, QueueStatus::Waiting);
        assert_eq!(first.queue_date, f.queue.today());
    }

    #[tokio::test]
    async fn test_concurrent_take_number_has_no_duplicates() {
        let f = fixture().await;
        let mut handles = Vec::new();
        for _ in 0..50 {
            let queue = f.queue.clone();
            let poly = f.poly;
            handles.push(tokio::spawn(async move { queue.take_number(poly, None, None).await }));
        }
        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap().unwrap().number);
        }
        numbers.sort();
        assert_eq!(numbers, (1..=50).collect::<Vec<i32>>());
    }

    #[tokio::test]
    async fn test_full_lifecycle_broadcasts() {
        let f = fixture().await;
        let ticket = f.queue.take_number(f.poly, None, None).await.unwrap();

        let called = f.queue.call(ticket.id, None).await.unwrap();
        assert_eq!(called.status, QueueStatus::Called);
        assert_eq!(called.call_count, 1);
        let first_call = called.called_at;

        let recalled = f.queue.recall(ticket.id, None).await.unwrap();
        assert_eq!(recalled.status, QueueStatus::Called);
        assert_eq!(recalled.call_count, 2);
        assert_eq!(recalled.called_at, first_call);

        let serving = f.queue.serve(ticket.id, None).await.unwrap();
        assert!(serving.serving_at.is_some());
        let done = f.queue.complete(ticket.id, None).await.unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
        assert!(done.completed_at.is_some());

        let kinds: Vec<EventKind> = f.events.0.lock().unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::QueueIssued,
                EventKind::QueueCalled,
                EventKind::QueueRecalled,
                EventKind::QueueServing,
                EventKind::QueueCompleted,
            ]
        );
        assert!(f.events.0.lock().unwrap().iter().all(|e| e.polyclinic_id == Some(f.poly)));
    }

    #[tokio::test]
    async fn test_backward_transitions_rejected() {
        let f = fixture().await;
        let ticket = f.queue.take_number(f.poly, None, None).await.unwrap();
        assert!(matches!(
            f.queue.serve(ticket.id, None).await,
            Err(SimrsError::InvalidStateTransition { .. })
        ));
        assert!(f.queue.recall(ticket.id, None).await.is_err());

        f.queue.skip(ticket.id, None).await.unwrap();
        assert!(f.queue.call(ticket.id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_call_next_takes_lowest_waiting() {
        let f = fixture().await;
        let first = f.queue.take_number(f.poly, None, None).await.unwrap();
        let second = f.queue.take_number(f.poly, None, None).await.unwrap();
        f.queue.skip(first.id, None).await.unwrap();

        let called = f.queue.call_next(f.poly, None).await.unwrap();
        assert_eq!(called.id, second.id);
        assert!(matches!(
            f.queue.call_next(f.poly, None).await,
            Err(SimrsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_transition_conflicts() {
        let f = fixture().await;
        let ticket = f.queue.take_number(f.poly, None, None).await.unwrap();
        f.queue.call(ticket.id, None).await.unwrap();

        // 另一位工作人员仍以为号票在等待
        let stale = f
            .queue
            .store()
            .transition(TicketTransition {
                ticket_id: ticket.id,
                expected: QueueStatus::Waiting,
                to: QueueStatus::Called,
                at: Utc::now(),
                handled_by: None,
                bump_call_count: true,
            })
            .await;
        assert!(matches!(stale, Err(SimrsError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_one_active_ticket_per_patient() {
        let f = fixture().await;
        let patient = f
            .registration
            .register_patient(NewPatient { name: "Ani".into(), ..Default::default() })
            .await
            .unwrap();

        let ticket = f.queue.take_number(f.poly, Some(patient.id), None).await.unwrap();
        assert!(matches!(
            f.queue.take_number(f.poly, Some(patient.id), None).await,
            Err(SimrsError::Conflict(_))
        ));

        f.queue.skip(ticket.id, None).await.unwrap();
        let again = f.queue.take_number(f.poly, Some(patient.id), None).await.unwrap();
        assert_eq!(again.number, 2);
    }

    #[tokio::test]
    async fn test_inactive_polyclinic_rejects() {
        let f = fixture().await;
        f.registration.update_polyclinic(f.poly, None, Some(false)).await.unwrap();
        assert!(matches!(
            f.queue.take_number(f.poly, None, None).await,
            Err(SimrsError::Validation(_))
        ));
        assert!(f.queue.take_number(Uuid::new_v4(), None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_board_reflects_queue() {
        let f = fixture().await;
        let a = f.queue.take_number(f.poly, None, None).await.unwrap();
        f.queue.take_number(f.poly, None, None).await.unwrap();
        f.queue.call(a.id, None).await.unwrap();

        let board = f.queue.board(f.poly, None).await.unwrap();
        assert_eq!(board.current.map(|t| t.id), Some(a.id));
        assert_eq!(board.waiting.len(), 1);
        assert_eq!(board.counts.total, 2);
    }
}
