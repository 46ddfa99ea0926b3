//! 库存盘点
//!
//! 盘点单生命周期：Draft → InProgress → Completed，Draft/InProgress 可取消。
//! 完成时将每个差异作为盘点流水与状态变更一起原子提交。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simrs_core::{
    DomainEvent, EventKind, EventPublisher, MovementKind, NewOpname, OpnameCount,
    OpnameLine, OpnameStatus, Result, SimrsError, StockChange, StockMovement, StockOpname,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::stock::{StockService, StockStore};

/// 盘点事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpnameEvent {
    Start,
    Complete,
    Cancel,
}

/// 盘点状态机
#[derive(Debug)]
pub struct OpnameStateMachine {
    transitions: HashMap<(OpnameStatus, OpnameEvent), OpnameStatus>,
}

impl OpnameStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();
        transitions.insert((OpnameStatus::Draft, OpnameEvent::Start), OpnameStatus::InProgress);
        transitions.insert((OpnameStatus::InProgress, OpnameEvent::Complete), OpnameStatus::Completed);
        transitions.insert((OpnameStatus::Draft, OpnameEvent::Cancel), OpnameStatus::Cancelled);
        transitions.insert((OpnameStatus::InProgress, OpnameEvent::Cancel), OpnameStatus::Cancelled);
        Self { transitions }
    }

    pub fn can_transition(&self, from: OpnameStatus, event: OpnameEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    pub fn transition(&self, from: OpnameStatus, event: OpnameEvent) -> Result<OpnameStatus> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| SimrsError::InvalidStateTransition {
                from: from.to_string(),
                event: format!("{:?}", event),
            })
    }
}

impl Default for OpnameStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 盘点存储接口
#[async_trait]
pub trait OpnameStore: Send + Sync {
    async fn create_opname(&self, opname: StockOpname) -> Result<StockOpname>;

    async fn get_opname(&self, id: Uuid) -> Result<Option<StockOpname>>;

    async fn list_opnames(&self, status: Option<OpnameStatus>) -> Result<Vec<StockOpname>>;

    /// 状态比较并交换，当前状态不是 `expected` 时返回 `Conflict`
    async fn set_opname_status(
        &self,
        id: Uuid,
        expected: OpnameStatus,
        to: OpnameStatus,
        at: DateTime<Utc>,
    ) -> Result<StockOpname>;

    /// 写入一行计数，盘点单必须处于 InProgress
    async fn record_count(&self, id: Uuid, count: OpnameCount) -> Result<StockOpname>;

    /// InProgress → Completed，并在同一事务中应用库存变动
    async fn complete_opname(
        &self,
        id: Uuid,
        changes: Vec<StockChange>,
        at: DateTime<Utc>,
    ) -> Result<(StockOpname, Vec<StockMovement>)>;
}

/// 盘点服务
pub struct OpnameService {
    store: Arc<dyn OpnameStore>,
    stock: Arc<StockService>,
    publisher: Arc<dyn EventPublisher>,
    state_machine: OpnameStateMachine,
}

impl OpnameService {
    pub fn new(
        store: Arc<dyn OpnameStore>,
        stock: Arc<StockService>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            store,
            stock,
            publisher,
            state_machine: OpnameStateMachine::new(),
        }
    }

    fn stock_store(&self) -> Arc<dyn StockStore> {
        self.stock.store()
    }

    /// 创建盘点单；未指定物品时盘点全部在用物品
    pub async fn create(
        &self,
        title: String,
        notes: Option<String>,
        item_ids: Option<Vec<Uuid>>,
        created_by: Option<Uuid>,
    ) -> Result<StockOpname> {
        if title.trim().is_empty() {
            return Err(SimrsError::Validation("opname title is required".to_string()));
        }

        let item_ids = match item_ids {
            Some(ids) => {
                let mut seen = HashSet::new();
                let ids: Vec<Uuid> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
                for id in &ids {
                    self.stock.get_item(*id).await?;
                }
                ids
            }
            None => self.stock_store().active_item_ids().await?,
        };
        if item_ids.is_empty() {
            return Err(SimrsError::Validation("opname needs at least one item".to_string()));
        }

        let request = NewOpname {
            title: title.trim().to_string(),
            notes,
            created_by,
            item_ids,
        };
        let opname = StockOpname {
            id: Uuid::new_v4(),
            title: request.title,
            notes: request.notes,
            status: OpnameStatus::Draft,
            created_by: request.created_by,
            lines: request.item_ids.into_iter().map(OpnameLine::pending).collect(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        };

        let created = self.store.create_opname(opname).await?;
        tracing::info!("Created opname {} with {} lines", created.id, created.lines.len());
        Ok(created)
    }

    pub async fn get(&self, id: Uuid) -> Result<StockOpname> {
        self.store
            .get_opname(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("opname", id))
    }

    pub async fn list(&self, status: Option<OpnameStatus>) -> Result<Vec<StockOpname>> {
        self.store.list_opnames(status).await
    }

    pub async fn start(&self, id: Uuid) -> Result<StockOpname> {
        self.move_to(id, OpnameEvent::Start).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<StockOpname> {
        self.move_to(id, OpnameEvent::Cancel).await
    }

    /// 录入实盘数量，同时记录当时的账面数量
    pub async fn record_count(
        &self,
        id: Uuid,
        item_id: Uuid,
        physical_quantity: i64,
        note: Option<String>,
        counted_by: Option<Uuid>,
    ) -> Result<StockOpname> {
        if physical_quantity < 0 {
            return Err(SimrsError::Validation(
                "physical quantity must not be negative".to_string(),
            ));
        }
        let opname = self.get(id).await?;
        if opname.status != OpnameStatus::InProgress {
            return Err(SimrsError::Conflict(format!(
                "opname {} is {}, counts are only accepted while in_progress",
                id, opname.status
            )));
        }
        if opname.line(item_id).is_none() {
            return Err(SimrsError::Validation(format!(
                "item {} is not part of opname {}",
                item_id, id
            )));
        }

        let system_quantity = self.stock.get_item(item_id).await?.on_hand;
        let count = OpnameCount {
            item_id,
            system_quantity,
            physical_quantity,
            note,
            counted_by,
            counted_at: Utc::now(),
        };
        tracing::debug!(
            opname = %id,
            item = %item_id,
            system = system_quantity,
            physical = physical_quantity,
            "Recorded opname count"
        );
        self.store.record_count(id, count).await
    }

    /// 完成盘点并应用差异
    pub async fn complete(&self, id: Uuid, actor_id: Option<Uuid>) -> Result<StockOpname> {
        let opname = self.get(id).await?;
        self.state_machine.transition(opname.status, OpnameEvent::Complete)?;

        let uncounted = opname.uncounted_items();
        if !uncounted.is_empty() {
            return Err(SimrsError::Validation(format!(
                "{} item(s) have not been counted",
                uncounted.len()
            )));
        }

        let changes = reconciliation_changes(&opname, actor_id);
        let (completed, movements) = self.store.complete_opname(id, changes, Utc::now()).await?;

        tracing::info!(
            "Completed opname {} with {} adjusting movements",
            completed.id,
            movements.len()
        );
        self.stock.announce(&movements).await;
        self.publisher.publish(DomainEvent::new(
            EventKind::OpnameCompleted,
            serde_json::json!({
                "opname_id": completed.id,
                "title": completed.title,
                "lines": completed.lines.len(),
                "adjusted_items": movements.len(),
            }),
        ));
        Ok(completed)
    }

    async fn move_to(&self, id: Uuid, event: OpnameEvent) -> Result<StockOpname> {
        let opname = self.get(id).await?;
        let to = self.state_machine.transition(opname.status, event)?;
        let updated = self
            .store
            .set_opname_status(id, opname.status, to, Utc::now())
            .await?;
        tracing::info!("Opname {} moved {} -> {}", id, opname.status, to);
        Ok(updated)
    }
}

/// 差异不为零的行转换为盘点流水
pub fn reconciliation_changes(opname: &StockOpname, actor_id: Option<Uuid>) -> Vec<StockChange> {
    opname
        .lines
        .iter()
        .filter_map(|line| {
            let difference = line.difference.filter(|d| *d != 0)?;
            Some(
                StockChange::new(line.item_id, difference, MovementKind::Opname)
                    .with_reference("opname", opname.id)
                    .with_note(line.note.clone())
                    .with_actor(actor_id),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryInventory;
    use crate::stock::ReceiveStock;
    use simrs_core::{ItemUpdate, MovementFilter, NewItem, NoopPublisher};

    async fn setup() -> (OpnameService, Arc<StockService>, Uuid, Uuid) {
        let inventory = Arc::new(InMemoryInventory::new());
        let publisher: Arc<dyn EventPublisher> = Arc::new(NoopPublisher);
        let stock = Arc::new(StockService::new(inventory.clone(), publisher.clone()));
        let opnames = OpnameService::new(inventory, stock.clone(), publisher);

        let mut ids = Vec::new();
        for (code, qty) in [("PCT", 20), ("AMX", 5)] {
            let item = stock
                .create_item(NewItem {
                    code: code.into(),
                    name: code.into(),
                    unit: "tablet".into(),
                    category: None,
                    min_stock: 0,
                })
                .await
                .unwrap();
            stock
                .receive(item.id, ReceiveStock { quantity: qty, ..Default::default() }, None)
                .await
                .unwrap();
            ids.push(item.id);
        }
        (opnames, stock, ids[0], ids[1])
    }

    #[test]
    fn test_state_machine() {
        let sm = OpnameStateMachine::new();
        assert!(sm.can_transition(OpnameStatus::Draft, OpnameEvent::Start));
        assert!(sm.can_transition(OpnameStatus::InProgress, OpnameEvent::Cancel));
        assert!(!sm.can_transition(OpnameStatus::Draft, OpnameEvent::Complete));
        assert!(sm.transition(OpnameStatus::Completed, OpnameEvent::Cancel).is_err());
    }

    #[tokio::test]
    async fn test_full_reconciliation() {
        let (opnames, stock, pct, amx) = setup().await;
        let opname = opnames.create("Juni".into(), None, None, None).await.unwrap();
        assert_eq!(opname.lines.len(), 2);

        // 草稿状态不接受计数
        assert!(opnames.record_count(opname.id, pct, 18, None, None).await.is_err());

        opnames.start(opname.id).await.unwrap();
        opnames.record_count(opname.id, pct, 18, None, None).await.unwrap();
        assert!(matches!(
            opnames.complete(opname.id, None).await,
            Err(SimrsError::Validation(_))
        ));

        let counted = opnames.record_count(opname.id, amx, 5, None, None).await.unwrap();
        let line = counted.line(pct).unwrap();
        assert_eq!(line.system_quantity, Some(20));
        assert_eq!(line.difference, Some(-2));

        let done = opnames.complete(opname.id, None).await.unwrap();
        assert_eq!(done.status, OpnameStatus::Completed);
        assert!(done.completed_at.is_some());

        assert_eq!(stock.get_item(pct).await.unwrap().on_hand, 18);
        assert_eq!(stock.get_item(amx).await.unwrap().on_hand, 5);
        let movements = stock
            .movements(&MovementFilter {
                reference_id: Some(opname.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(movements.len(), 1);
        assert_eq!(movements[0].kind, MovementKind::Opname);

        assert!(opnames.cancel(opname.id).await.is_err());
    }

    #[tokio::test]
    async fn test_recount_overwrites_and_duplicates_collapse() {
        let (opnames, _, pct, _) = setup().await;
        let opname = opnames
            .create("Spot".into(), None, Some(vec![pct, pct]), None)
            .await
            .unwrap();
        assert_eq!(opname.lines.len(), 1);

        opnames.start(opname.id).await.unwrap();
        opnames.record_count(opname.id, pct, 25, None, None).await.unwrap();
        let counted = opnames.record_count(opname.id, pct, 21, None, None).await.unwrap();
        assert_eq!(counted.line(pct).unwrap().difference, Some(1));

        assert!(opnames.create("Empty".into(), None, Some(vec![]), None).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_from_draft() {
        let (opnames, _, pct, _) = setup().await;
        let opname = opnames.create("x".into(), None, Some(vec![pct]), None).await.unwrap();
        let cancelled = opnames.cancel(opname.id).await.unwrap();
        assert_eq!(cancelled.status, OpnameStatus::Cancelled);
        assert!(opnames.start(opname.id).await.is_err());
        assert_eq!(opnames.list(Some(OpnameStatus::Cancelled)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_all_active_items_are_counted_beyond_page_size() {
        let (opnames, stock, pct, _) = setup().await;
        for n in 0..150 {
            let code = format!("OBT{:03}", n);
            stock
                .create_item(NewItem {
                    code: code.clone(),
                    name: code,
                    unit: "box".into(),
                    category: None,
                    min_stock: 0,
                })
                .await
                .unwrap();
        }
        stock
            .update_item(pct, ItemUpdate { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();

        let opname = opnames.create("Tahunan".into(), None, None, None).await.unwrap();
        assert_eq!(opname.lines.len(), 151);
        assert!(opname.line(pct).is_none());
    }
}
