//! 库存服务
//!
//! 所有数量变化都经由 [`StockStore::apply`] 一次性提交，
//! 服务层负责参数校验和事件发布。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use simrs_core::{
    DomainEvent, EventKind, EventPublisher, Item, ItemFilter, ItemStock, ItemUpdate,
    MovementFilter, MovementKind, NewItem, Result, SimrsError, StockBatch, StockChange,
    StockMovement,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// 库存存储接口
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn create_item(&self, item: NewItem) -> Result<Item>;

    async fn update_item(&self, id: Uuid, update: ItemUpdate) -> Result<Item>;

    async fn get_item(&self, id: Uuid) -> Result<Option<ItemStock>>;

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ItemStock>>;

    /// 全部在用物品的 id，按编码排序，不分页
    async fn active_item_ids(&self) -> Result<Vec<Uuid>>;

    async fn batches(&self, item_id: Uuid, include_exhausted: bool) -> Result<Vec<StockBatch>>;

    /// 原子地应用一组变动：全部成功或全部不生效
    async fn apply(&self, changes: Vec<StockChange>) -> Result<Vec<StockMovement>>;

    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>>;
}

/// 入库请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub quantity: i64,
    pub batch_no: Option<String>,
    pub expires_at: Option<NaiveDate>,
    pub received_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// 库存服务
pub struct StockService {
    store: Arc<dyn StockStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl StockService {
    pub fn new(store: Arc<dyn StockStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    pub fn store(&self) -> Arc<dyn StockStore> {
        self.store.clone()
    }

    pub async fn create_item(&self, item: NewItem) -> Result<Item> {
        let code = item.code.trim();
        if code.is_empty() || item.name.trim().is_empty() || item.unit.trim().is_empty() {
            return Err(SimrsError::Validation(
                "item code, name and unit are required".to_string(),
            ));
        }
        if item.min_stock < 0 {
            return Err(SimrsError::Validation("min_stock must not be negative".to_string()));
        }

        let item = NewItem {
            code: code.to_uppercase(),
            ..item
        };
        let created = self.store.create_item(item).await?;
        tracing::info!("Created stock item {} ({})", created.code, created.id);
        Ok(created)
    }

    pub async fn update_item(&self, id: Uuid, update: ItemUpdate) -> Result<Item> {
        if matches!(update.min_stock, Some(min) if min < 0) {
            return Err(SimrsError::Validation("min_stock must not be negative".to_string()));
        }
        self.store.update_item(id, update).await
    }

    pub async fn get_item(&self, id: Uuid) -> Result<ItemStock> {
        self.store
            .get_item(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("stock item", id))
    }

    pub async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ItemStock>> {
        self.store.list_items(filter).await
    }

    pub async fn batches(&self, item_id: Uuid, include_exhausted: bool) -> Result<Vec<StockBatch>> {
        self.get_item(item_id).await?;
        self.store.batches(item_id, include_exhausted).await
    }

    pub async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>> {
        self.store.movements(filter).await
    }

    /// 入库，生成新批次
    pub async fn receive(
        &self,
        item_id: Uuid,
        request: ReceiveStock,
        actor_id: Option<Uuid>,
    ) -> Result<StockMovement> {
        if request.quantity <= 0 {
            return Err(SimrsError::Validation(
                "received quantity must be positive".to_string(),
            ));
        }
        let mut change = StockChange::new(item_id, request.quantity, MovementKind::Receipt)
            .with_note(request.note)
            .with_actor(actor_id);
        change.batch_no = request.batch_no;
        change.expires_at = request.expires_at;
        change.received_at = request.received_at;

        self.apply_one(change).await
    }

    /// 按先进先出扣减
    pub async fn consume(
        &self,
        item_id: Uuid,
        quantity: i64,
        kind: MovementKind,
        reference: Option<(&str, Uuid)>,
        actor_id: Option<Uuid>,
    ) -> Result<StockMovement> {
        if quantity <= 0 {
            return Err(SimrsError::Validation(
                "consumed quantity must be positive".to_string(),
            ));
        }
        let mut change = StockChange::new(item_id, -quantity, kind).with_actor(actor_id);
        if let Some((reference_type, reference_id)) = reference {
            change = change.with_reference(reference_type, reference_id);
        }
        self.apply_one(change).await
    }

    /// 手工修正一个增减量
    pub async fn adjust(
        &self,
        item_id: Uuid,
        delta: i64,
        reason: Option<String>,
        actor_id: Option<Uuid>,
    ) -> Result<StockMovement> {
        if delta == 0 {
            return Err(SimrsError::Validation("adjustment must not be zero".to_string()));
        }
        let change = StockChange::new(item_id, delta, MovementKind::Adjustment)
            .with_note(reason)
            .with_actor(actor_id);
        self.apply_one(change).await
    }

    /// 修正到指定的实际数量；数量一致时不产生流水
    pub async fn correct_to(
        &self,
        item_id: Uuid,
        actual: i64,
        reason: Option<String>,
        actor_id: Option<Uuid>,
    ) -> Result<Option<StockMovement>> {
        if actual < 0 {
            return Err(SimrsError::Validation("actual quantity must not be negative".to_string()));
        }
        let current = self.get_item(item_id).await?;
        let delta = actual - current.on_hand;
        if delta == 0 {
            return Ok(None);
        }
        self.adjust(item_id, delta, reason, actor_id).await.map(Some)
    }

    /// 批量变动，全部成功或全部失败
    pub async fn apply(&self, changes: Vec<StockChange>) -> Result<Vec<StockMovement>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        for change in &changes {
            validate_change(change)?;
        }

        let movements = self.store.apply(changes).await?;
        self.announce(&movements).await;
        Ok(movements)
    }

    async fn apply_one(&self, change: StockChange) -> Result<StockMovement> {
        let mut movements = self.apply(vec![change]).await?;
        movements
            .pop()
            .ok_or_else(|| SimrsError::Internal("stock store returned no movement".to_string()))
    }

    /// 发布流水事件，扣减后低于安全库存时发布预警
    pub async fn announce(&self, movements: &[StockMovement]) {
        let mut decreased = BTreeSet::new();
        for movement in movements {
            tracing::debug!(
                item_id = %movement.item_id,
                kind = movement.kind.as_str(),
                quantity = movement.quantity,
                balance = movement.balance_after,
                "Stock moved"
            );
            self.publisher
                .publish(DomainEvent::from_data(EventKind::StockMoved, movement));
            if movement.quantity < 0 {
                decreased.insert(movement.item_id);
            }
        }

        for item_id in decreased {
            match self.store.get_item(item_id).await {
                Ok(Some(stock)) if stock.is_low() => {
                    tracing::warn!(
                        "Stock of {} is low: {} on hand, minimum {}",
                        stock.item.code,
                        stock.on_hand,
                        stock.item.min_stock
                    );
                    self.publisher.publish(DomainEvent::new(
                        EventKind::StockLow,
                        serde_json::json!({
                            "item_id": stock.item.id,
                            "code": stock.item.code,
                            "name": stock.item.name,
                            "on_hand": stock.on_hand,
                            "min_stock": stock.item.min_stock,
                        }),
                    ));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to check low stock for {}: {}", item_id, e),
            }
        }
    }
}

/// 变动方向与类型是否匹配
pub fn validate_change(change: &StockChange) -> Result<()> {
    if change.delta == 0 {
        return Err(SimrsError::Validation(format!(
            "zero {} change for item {}",
            change.kind, change.item_id
        )));
    }
    match change.kind {
        MovementKind::Receipt | MovementKind::Return if change.delta < 0 => {
            Err(SimrsError::Validation(format!("{} must increase stock", change.kind)))
        }
        MovementKind::Dispense if change.delta > 0 => {
            Err(SimrsError::Validation("dispense must decrease stock".to_string()))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryInventory;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<DomainEvent>>);

    impl EventPublisher for Recorder {
        fn publish(&self, event: DomainEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl Recorder {
        fn kinds(&self) -> Vec<EventKind> {
            self.0.lock().unwrap().iter().map(|e| e.kind).collect()
        }
    }

    async fn service() -> (StockService, Arc<Recorder>, Item) {
        let store = Arc::new(InMemoryInventory::new());
        let recorder = Arc::new(Recorder::default());
        let service = StockService::new(store, recorder.clone());
        let item = service
            .create_item(NewItem {
                code: "pct500".into(),
                name: "Paracetamol 500mg".into(),
                unit: "tablet".into(),
                category: Some("analgesic".into()),
                min_stock: 5,
            })
            .await
            .unwrap();
        (service, recorder, item)
    }

    fn receipt(quantity: i64, days_ago: i64) -> ReceiveStock {
        ReceiveStock {
            quantity,
            received_at: Some(
                Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap() - Duration::days(days_ago),
            ),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_receive_then_consume_fifo() {
        let (service, _, item) = service().await;
        assert_eq!(item.code, "PCT500");

        service.receive(item.id, receipt(10, 1), None).await.unwrap();
        service.receive(item.id, receipt(4, 5), None).await.unwrap();

        let movement = service
            .consume(item.id, 6, MovementKind::Dispense, None, None)
            .await
            .unwrap();
        assert_eq!(movement.quantity, -6);
        assert_eq!(movement.balance_after, 8);
        assert_eq!(movement.allocations.len(), 2);
        assert_eq!(movement.allocations[0].quantity, 4);

        let live = service.batches(item.id, false).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].remaining, 8);
        assert_eq!(service.batches(item.id, true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_insufficient_stock_changes_nothing() {
        let (service, _, item) = service().await;
        service.receive(item.id, receipt(3, 1), None).await.unwrap();

        let err = service
            .consume(item.id, 4, MovementKind::Dispense, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SimrsError::InsufficientStock { available: 3, .. }));
        assert_eq!(service.get_item(item.id).await.unwrap().on_hand, 3);
        assert_eq!(service.movements(&MovementFilter::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_is_all_or_nothing() {
        let (service, _, item) = service().await;
        let other = service
            .create_item(NewItem {
                code: "AMX".into(),
                name: "Amoxicillin".into(),
                unit: "capsule".into(),
                category: None,
                min_stock: 0,
            })
            .await
            .unwrap();
        service.receive(item.id, receipt(10, 1), None).await.unwrap();

        let result = service
            .apply(vec![
                StockChange::new(item.id, -2, MovementKind::Dispense),
                StockChange::new(other.id, -1, MovementKind::Dispense),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(service.get_item(item.id).await.unwrap().on_hand, 10);
    }

    #[tokio::test]
    async fn test_low_stock_event_after_decrease() {
        let (service, recorder, item) = service().await;
        service.receive(item.id, receipt(8, 1), None).await.unwrap();
        service.adjust(item.id, -3, Some("broken strip".into()), None).await.unwrap();

        let kinds = recorder.kinds();
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::StockMoved).count(), 2);
        assert_eq!(kinds.last(), Some(&EventKind::StockLow));
    }

    #[tokio::test]
    async fn test_correct_to_records_difference() {
        let (service, _, item) = service().await;
        service.receive(item.id, receipt(12, 1), None).await.unwrap();

        let movement = service.correct_to(item.id, 9, None, None).await.unwrap().unwrap();
        assert_eq!(movement.kind, MovementKind::Adjustment);
        assert_eq!(movement.quantity, -3);
        assert!(service.correct_to(item.id, 9, None, None).await.unwrap().is_none());
        assert!(service.correct_to(item.id, -1, None, None).await.is_err());
    }

    #[test]
    fn test_validate_change_direction() {
        let id = Uuid::new_v4();
        assert!(validate_change(&StockChange::new(id, -1, MovementKind::Receipt)).is_err());
        assert!(validate_change(&StockChange::new(id, 1, MovementKind::Dispense)).is_err());
        assert!(validate_change(&StockChange::new(id, 0, MovementKind::Adjustment)).is_err());
        assert!(validate_change(&StockChange::new(id, -4, MovementKind::Opname)).is_ok());
    }
}
