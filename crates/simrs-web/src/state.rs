//! 路由共享状态

use chrono::FixedOffset;
use simrs_admin::{
    AccessControlService, AccessStore, InMemoryAdmin, Metrics, RoleService, UserService, UserStore,
};
use simrs_core::EventPublisher;
use simrs_integration::{EventHub, WebhookManager};
use simrs_inventory::{InMemoryInventory, OpnameService, OpnameStore, StockService, StockStore};
use simrs_storage::{DocumentService, DocumentStorage, DocumentStore, InMemoryDocuments};
use simrs_workflow::{
    AttendancePolicy, AttendanceService, AttendanceStore, InMemoryAttendance, InMemoryClinic,
    InMemoryQueue, InMemoryRegistry, PrescriptionService, PrescriptionStore, QueueService,
    QueueStore, RegistrationService, RegistryStore,
};
use std::sync::Arc;

use crate::auth::AuthSettings;

/// 各业务模块的存储实现
#[derive(Clone)]
pub struct Stores {
    pub registry: Arc<dyn RegistryStore>,
    pub queue: Arc<dyn QueueStore>,
    pub stock: Arc<dyn StockStore>,
    pub opnames: Arc<dyn OpnameStore>,
    pub prescriptions: Arc<dyn PrescriptionStore>,
    pub attendance: Arc<dyn AttendanceStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub users: Arc<dyn UserStore>,
    pub access: Arc<dyn AccessStore>,
}

impl Stores {
    /// 全部使用内存实现，用于测试和演示
    pub fn in_memory() -> Self {
        let inventory = Arc::new(InMemoryInventory::new());
        let admin = Arc::new(InMemoryAdmin::new());
        Self {
            registry: Arc::new(InMemoryRegistry::new()),
            queue: Arc::new(InMemoryQueue::new()),
            stock: inventory.clone(),
            opnames: inventory.clone(),
            prescriptions: Arc::new(InMemoryClinic::new(inventory)),
            attendance: Arc::new(InMemoryAttendance::new()),
            documents: Arc::new(InMemoryDocuments::new()),
            users: admin.clone(),
            access: admin,
        }
    }
}

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub registration: Arc<RegistrationService>,
    pub queue: Arc<QueueService>,
    pub stock: Arc<StockService>,
    pub opnames: Arc<OpnameService>,
    pub prescriptions: Arc<PrescriptionService>,
    pub attendance: Arc<AttendanceService>,
    pub documents: Arc<DocumentService>,
    pub roles: Arc<RoleService>,
    pub users: Arc<UserService>,
    pub access: Arc<AccessControlService>,
    pub hub: EventHub,
    pub metrics: Option<Metrics>,
    pub webhooks: Option<Arc<WebhookManager>>,
    pub auth: Arc<AuthSettings>,
}

impl AppState {
    /// 组装业务服务，事件统一发布到 `hub`
    pub fn new(
        stores: Stores,
        hub: EventHub,
        offset: FixedOffset,
        policy: AttendancePolicy,
        storage: DocumentStorage,
        auth: AuthSettings,
    ) -> Self {
        let publisher: Arc<dyn EventPublisher> = Arc::new(hub.clone());

        let stock = Arc::new(StockService::new(stores.stock.clone(), publisher.clone()));
        let opnames = Arc::new(OpnameService::new(
            stores.opnames.clone(),
            stock.clone(),
            publisher.clone(),
        ));
        let prescriptions = Arc::new(PrescriptionService::new(
            stores.prescriptions.clone(),
            stores.queue.clone(),
            stock.clone(),
            publisher.clone(),
        ));

        Self {
            registration: Arc::new(RegistrationService::new(stores.registry.clone(), offset)),
            queue: Arc::new(QueueService::new(
                stores.queue.clone(),
                stores.registry.clone(),
                publisher.clone(),
                offset,
            )),
            stock,
            opnames,
            prescriptions,
            attendance: Arc::new(AttendanceService::new(
                stores.attendance.clone(),
                publisher,
                policy,
            )),
            documents: Arc::new(DocumentService::new(stores.documents.clone(), storage)),
            roles: Arc::new(RoleService::new(stores.users.clone())),
            users: Arc::new(UserService::new(stores.users.clone())),
            access: Arc::new(AccessControlService::new(stores.access, stores.users)),
            hub,
            metrics: None,
            webhooks: None,
            auth: Arc::new(auth),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_webhooks(mut self, webhooks: Arc<WebhookManager>) -> Self {
        self.webhooks = Some(webhooks);
        self
    }
}
