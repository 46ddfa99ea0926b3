//! 内存存储实现
//!
//! 单个读写锁保护全部库存状态，变动先在副本上计算，成功后再整体提交，
//! 与数据库事务具有相同的原子性。用于测试和演示。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simrs_core::utils::clamp_limit;
use simrs_core::{
    BatchAllocation, Item, ItemFilter, ItemStock, ItemUpdate, MovementFilter, NewItem,
    OpnameCount, OpnameStatus, Result, SimrsError, StockBatch, StockChange, StockMovement,
    StockOpname,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::fifo;
use crate::opname::OpnameStore;
use crate::stock::StockStore;

#[derive(Debug, Default)]
struct InventoryState {
    items: HashMap<Uuid, Item>,
    batches: HashMap<Uuid, Vec<StockBatch>>,
    movements: Vec<StockMovement>,
    opnames: HashMap<Uuid, StockOpname>,
}

impl InventoryState {
    fn on_hand(&self, item_id: Uuid) -> i64 {
        self.batches
            .get(&item_id)
            .map(|b| fifo::on_hand(b))
            .unwrap_or(0)
    }

    fn item_stock(&self, item: &Item) -> ItemStock {
        ItemStock {
            item: item.clone(),
            on_hand: self.on_hand(item.id),
        }
    }

    fn apply(&mut self, changes: Vec<StockChange>, now: DateTime<Utc>) -> Result<Vec<StockMovement>> {
        let mut staged: HashMap<Uuid, Vec<StockBatch>> = HashMap::new();
        let mut movements = Vec::with_capacity(changes.len());

        for change in changes {
            let item = self
                .items
                .get(&change.item_id)
                .ok_or_else(|| SimrsError::not_found("stock item", change.item_id))?;
            let batches = staged
                .entry(change.item_id)
                .or_insert_with(|| self.batches.get(&change.item_id).cloned().unwrap_or_default());

            let allocations = if change.delta > 0 {
                let batch = fifo::new_batch(&change, now);
                let allocation = BatchAllocation {
                    batch_id: batch.id,
                    quantity: batch.quantity,
                };
                batches.push(batch);
                vec![allocation]
            } else {
                let plan = fifo::plan_consumption(&item.code, batches, -change.delta)?;
                fifo::apply_allocations(batches, &plan)?;
                plan
            };

            movements.push(StockMovement {
                id: Uuid::new_v4(),
                item_id: change.item_id,
                kind: change.kind,
                quantity: change.delta,
                balance_after: fifo::on_hand(batches),
                allocations,
                reference_type: change.reference_type,
                reference_id: change.reference_id,
                note: change.note,
                actor_id: change.actor_id,
                created_at: now,
            });
        }

        self.batches.extend(staged);
        self.movements.extend(movements.iter().cloned());
        Ok(movements)
    }
}

/// 内存库存
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    state: RwLock<InventoryState>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockStore for InMemoryInventory {
    async fn create_item(&self, item: NewItem) -> Result<Item> {
        let mut state = self.state.write().await;
        if state.items.values().any(|i| i.code == item.code) {
            return Err(SimrsError::Conflict(format!("item code {} already exists", item.code)));
        }
        let now = Utc::now();
        let created = Item {
            id: Uuid::new_v4(),
            code: item.code,
            name: item.name,
            unit: item.unit,
            category: item.category,
            min_stock: item.min_stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.items.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_item(&self, id: Uuid, update: ItemUpdate) -> Result<Item> {
        let mut state = self.state.write().await;
        let item = state
            .items
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("stock item", id))?;
        if let Some(name) = update.name {
            item.name = name;
        }
        if let Some(unit) = update.unit {
            item.unit = unit;
        }
        if update.category.is_some() {
            item.category = update.category;
        }
        if let Some(min_stock) = update.min_stock {
            item.min_stock = min_stock;
        }
        if let Some(is_active) = update.is_active {
            item.is_active = is_active;
        }
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<ItemStock>> {
        let state = self.state.read().await;
        Ok(state.items.get(&id).map(|item| state.item_stock(item)))
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ItemStock>> {
        let state = self.state.read().await;
        let search = filter.search.as_ref().map(|s| s.to_lowercase());
        let mut items: Vec<ItemStock> = state
            .items
            .values()
            .filter(|item| !filter.active_only || item.is_active)
            .filter(|item| match &search {
                Some(q) => {
                    item.code.to_lowercase().contains(q) || item.name.to_lowercase().contains(q)
                }
                None => true,
            })
            .map(|item| state.item_stock(item))
            .filter(|stock| !filter.low_stock_only || stock.is_low())
            .collect();
        items.sort_by(|a, b| a.item.code.cmp(&b.item.code));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = clamp_limit(filter.limit, 100, 1000) as usize;
        Ok(items.into_iter().skip(offset).take(limit).collect())
    }

    async fn active_item_ids(&self) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        let mut items: Vec<&Item> = state.items.values().filter(|item| item.is_active).collect();
        items.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(items.into_iter().map(|item| item.id).collect())
    }

    async fn batches(&self, item_id: Uuid, include_exhausted: bool) -> Result<Vec<StockBatch>> {
        let state = self.state.read().await;
        let mut batches: Vec<StockBatch> = state
            .batches
            .get(&item_id)
            .map(|b| {
                b.iter()
                    .filter(|batch| include_exhausted || !batch.is_exhausted())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        fifo::sort_for_consumption(&mut batches);
        Ok(batches)
    }

    async fn apply(&self, changes: Vec<StockChange>) -> Result<Vec<StockMovement>> {
        let mut state = self.state.write().await;
        state.apply(changes, Utc::now())
    }

    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>> {
        let state = self.state.read().await;
        let limit = clamp_limit(filter.limit, 100, 1000) as usize;
        Ok(state
            .movements
            .iter()
            .rev()
            .filter(|m| filter.item_id.map_or(true, |id| m.item_id == id))
            .filter(|m| filter.kind.map_or(true, |k| m.kind == k))
            .filter(|m| filter.reference_id.map_or(true, |id| m.reference_id == Some(id)))
            .filter(|m| filter.from.map_or(true, |from| m.created_at >= from))
            .filter(|m| filter.to.map_or(true, |to| m.created_at <= to))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OpnameStore for InMemoryInventory {
    async fn create_opname(&self, opname: StockOpname) -> Result<StockOpname> {
        let mut state = self.state.write().await;
        state.opnames.insert(opname.id, opname.clone());
        Ok(opname)
    }

    async fn get_opname(&self, id: Uuid) -> Result<Option<StockOpname>> {
        Ok(self.state.read().await.opnames.get(&id).cloned())
    }

    async fn list_opnames(&self, status: Option<OpnameStatus>) -> Result<Vec<StockOpname>> {
        let state = self.state.read().await;
        let mut opnames: Vec<StockOpname> = state
            .opnames
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        opnames.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(opnames)
    }

    async fn set_opname_status(
        &self,
        id: Uuid,
        expected: OpnameStatus,
        to: OpnameStatus,
        at: DateTime<Utc>,
    ) -> Result<StockOpname> {
        let mut state = self.state.write().await;
        let opname = state
            .opnames
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("opname", id))?;
        if opname.status != expected {
            return Err(SimrsError::Conflict(format!(
                "opname {} is {}, expected {}",
                id, opname.status, expected
            )));
        }
        opname.status = to;
        match to {
            OpnameStatus::InProgress => opname.started_at = Some(at),
            OpnameStatus::Completed => opname.completed_at = Some(at),
            OpnameStatus::Cancelled => opname.cancelled_at = Some(at),
            OpnameStatus::Draft => {}
        }
        Ok(opname.clone())
    }

    async fn record_count(&self, id: Uuid, count: OpnameCount) -> Result<StockOpname> {
        let mut state = self.state.write().await;
        let opname = state
            .opnames
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("opname", id))?;
        if opname.status != OpnameStatus::InProgress {
            return Err(SimrsError::Conflict(format!("opname {} is {}", id, opname.status)));
        }
        let line = opname
            .lines
            .iter_mut()
            .find(|l| l.item_id == count.item_id)
            .ok_or_else(|| SimrsError::not_found("opname line", count.item_id))?;
        line.system_quantity = Some(count.system_quantity);
        line.physical_quantity = Some(count.physical_quantity);
        line.difference = Some(count.physical_quantity - count.system_quantity);
        line.note = count.note;
        line.counted_by = count.counted_by;
        line.counted_at = Some(count.counted_at);
        Ok(opname.clone())
    }

    async fn complete_opname(
        &self,
        id: Uuid,
        changes: Vec<StockChange>,
        at: DateTime<Utc>,
    ) -> Result<(StockOpname, Vec<StockMovement>)> {
        let mut state = self.state.write().await;
        match state.opnames.get(&id) {
            Some(o) if o.status == OpnameStatus::InProgress => {}
            Some(o) => {
                return Err(SimrsError::Conflict(format!("opname {} is {}", id, o.status)));
            }
            None => return Err(SimrsError::not_found("opname", id)),
        }

        let movements = state.apply(changes, at)?;
        let opname = state
            .opnames
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("opname", id))?;
        opname.status = OpnameStatus::Completed;
        opname.completed_at = Some(at);
        Ok((opname.clone(), movements))
    }
}
