//! 库存与盘点的 PostgreSQL 存储
//!
//! 变动按物品加行锁后读取剩余批次，先进先出计划由 `simrs_inventory::fifo`
//! 计算，批次更新和流水写入在同一事务内提交。发药和盘点完成复用
//! [`apply_in_tx`]，与各自的状态变更一起提交或回滚。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simrs_core::utils::clamp_limit;
use simrs_core::{
    BatchAllocation, Item, ItemFilter, ItemStock, ItemUpdate, MovementFilter, NewItem,
    OpnameCount, OpnameLine, OpnameStatus, Result, SimrsError, StockBatch, StockChange,
    StockMovement, StockOpname,
};
use simrs_inventory::{fifo, OpnameStore, StockStore};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::{
    convert_all, DbItem, DbItemStock, DbOpnameLine, DbStockBatch, DbStockMovement, DbStockOpname,
};

const ITEM_STOCK_SELECT: &str = r#"
    SELECT * FROM (
        SELECT i.*,
               COALESCE((SELECT SUM(b.remaining) FROM stock_batches b
                         WHERE b.item_id = i.id AND b.remaining > 0), 0)::BIGINT AS on_hand
        FROM items i
    ) s
"#;

/// 在调用方的事务中应用一组库存变动
///
/// 任一变动失败时返回错误，调用方丢弃事务即可撤销之前的写入。
pub(crate) async fn apply_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    changes: Vec<StockChange>,
    now: DateTime<Utc>,
) -> Result<Vec<StockMovement>> {
    let mut movements = Vec::with_capacity(changes.len());

    for change in changes {
        let code: String = sqlx::query_scalar("SELECT code FROM items WHERE id = $1 FOR UPDATE")
            .bind(change.item_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| SimrsError::not_found("stock item", change.item_id))?;

        let rows = sqlx::query_as::<_, DbStockBatch>(
            r#"
            SELECT * FROM stock_batches
            WHERE item_id = $1 AND remaining > 0
            ORDER BY received_at, created_at
            FOR UPDATE
            "#,
        )
        .bind(change.item_id)
        .fetch_all(&mut **tx)
        .await?;
        let mut batches: Vec<StockBatch> = convert_all(rows)?;

        let allocations = if change.delta > 0 {
            let batch = fifo::new_batch(&change, now);
            sqlx::query(
                r#"
                INSERT INTO stock_batches
                    (id, item_id, batch_no, quantity, remaining, received_at, expires_at, created_at)
                VALUES ($1, $2, $3, $4, $4, $5, $6, $7)
                "#,
            )
            .bind(batch.id)
            .bind(batch.item_id)
            .bind(&batch.batch_no)
            .bind(batch.quantity)
            .bind(batch.received_at)
            .bind(batch.expires_at)
            .bind(batch.created_at)
            .execute(&mut **tx)
            .await?;

            let allocation = BatchAllocation {
                batch_id: batch.id,
                quantity: batch.quantity,
            };
            batches.push(batch);
            vec![allocation]
        } else {
            let plan = fifo::plan_consumption(&code, &batches, -change.delta)?;
            for allocation in &plan {
                sqlx::query("UPDATE stock_batches SET remaining = remaining - $2 WHERE id = $1")
                    .bind(allocation.batch_id)
                    .bind(allocation.quantity)
                    .execute(&mut **tx)
                    .await?;
            }
            fifo::apply_allocations(&mut batches, &plan)?;
            plan
        };

        let row = sqlx::query_as::<_, DbStockMovement>(
            r#"
            INSERT INTO stock_movements
                (id, item_id, kind, quantity, balance_after, allocations,
                 reference_type, reference_id, note, actor_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(change.item_id)
        .bind(change.kind.as_str())
        .bind(change.delta)
        .bind(fifo::on_hand(&batches))
        .bind(Json(&allocations))
        .bind(&change.reference_type)
        .bind(change.reference_id)
        .bind(&change.note)
        .bind(change.actor_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;
        movements.push(row.try_into()?);
    }

    Ok(movements)
}

/// PostgreSQL 库存存储，同时实现盘点存储
#[derive(Clone)]
pub struct PgInventoryStore {
    db: DatabasePool,
}

impl PgInventoryStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    async fn lines_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OpnameLine>>> {
        let rows = sqlx::query_as::<_, DbOpnameLine>(
            r#"
            SELECT l.* FROM stock_opname_lines l
            JOIN items i ON i.id = l.item_id
            WHERE l.opname_id = ANY($1)
            ORDER BY i.code
            "#,
        )
        .bind(ids)
        .fetch_all(self.pool())
        .await?;

        let mut lines: HashMap<Uuid, Vec<OpnameLine>> = HashMap::new();
        for row in rows {
            lines.entry(row.opname_id).or_default().push(row.into());
        }
        Ok(lines)
    }

    async fn require_opname(&self, id: Uuid) -> Result<StockOpname> {
        self.get_opname(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("opname", id))
    }

    /// 锁定盘点单并确认处于 InProgress
    async fn lock_in_progress(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<()> {
        let status: String = sqlx::query_scalar("SELECT status FROM stock_opnames WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| SimrsError::not_found("opname", id))?;
        if status != OpnameStatus::InProgress.as_str() {
            return Err(SimrsError::Conflict(format!("opname {} is {}", id, status)));
        }
        Ok(())
    }
}

#[async_trait]
impl StockStore for PgInventoryStore {
    async fn create_item(&self, item: NewItem) -> Result<Item> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, DbItem>(
            r#"
            INSERT INTO items (id, code, name, unit, category, min_stock, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&item.code)
        .bind(&item.name)
        .bind(&item.unit)
        .bind(&item.category)
        .bind(item.min_stock)
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(|e| match SimrsError::from(e) {
            SimrsError::Conflict(_) => {
                SimrsError::Conflict(format!("item code {} already exists", item.code))
            }
            other => other,
        })?;
        row.try_into()
    }

    async fn update_item(&self, id: Uuid, update: ItemUpdate) -> Result<Item> {
        let row = sqlx::query_as::<_, DbItem>(
            r#"
            UPDATE items SET
                name = COALESCE($2, name),
                unit = COALESCE($3, unit),
                category = COALESCE($4, category),
                min_stock = COALESCE($5, min_stock),
                is_active = COALESCE($6, is_active),
                updated_at = $7
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.name)
        .bind(update.unit)
        .bind(update.category)
        .bind(update.min_stock)
        .bind(update.is_active)
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| SimrsError::not_found("stock item", id))?;
        row.try_into()
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<ItemStock>> {
        sqlx::query_as::<_, DbItemStock>(&format!("{} WHERE s.id = $1", ITEM_STOCK_SELECT))
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .map(ItemStock::try_from)
            .transpose()
    }

    async fn list_items(&self, filter: &ItemFilter) -> Result<Vec<ItemStock>> {
        let mut query = QueryBuilder::<Postgres>::new(ITEM_STOCK_SELECT);
        query.push(" WHERE TRUE");
        if filter.active_only {
            query.push(" AND s.is_active");
        }
        if filter.low_stock_only {
            query.push(" AND s.on_hand <= s.min_stock");
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search);
            query
                .push(" AND (s.code ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR s.name ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        query
            .push(" ORDER BY s.code LIMIT ")
            .push_bind(clamp_limit(filter.limit, 100, 1000))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        let rows = query
            .build_query_as::<DbItemStock>()
            .fetch_all(self.pool())
            .await?;
        convert_all(rows)
    }

    async fn active_item_ids(&self) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM items WHERE is_active ORDER BY code",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(ids)
    }

    async fn batches(&self, item_id: Uuid, include_exhausted: bool) -> Result<Vec<StockBatch>> {
        let rows = sqlx::query_as::<_, DbStockBatch>(
            r#"
            SELECT * FROM stock_batches
            WHERE item_id = $1 AND (remaining > 0 OR $2)
            ORDER BY received_at, created_at
            "#,
        )
        .bind(item_id)
        .bind(include_exhausted)
        .fetch_all(self.pool())
        .await?;
        convert_all(rows)
    }

    async fn apply(&self, changes: Vec<StockChange>) -> Result<Vec<StockMovement>> {
        let mut tx = self.pool().begin().await?;
        let movements = apply_in_tx(&mut tx, changes, Utc::now()).await?;
        tx.commit().await?;
        Ok(movements)
    }

    async fn movements(&self, filter: &MovementFilter) -> Result<Vec<StockMovement>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM stock_movements WHERE TRUE");
        if let Some(item_id) = filter.item_id {
            query.push(" AND item_id = ").push_bind(item_id);
        }
        if let Some(kind) = filter.kind {
            query.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(reference_id) = filter.reference_id {
            query.push(" AND reference_id = ").push_bind(reference_id);
        }
        if let Some(from) = filter.from {
            query.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            query.push(" AND created_at <= ").push_bind(to);
        }
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(clamp_limit(filter.limit, 100, 1000));

        let rows = query
            .build_query_as::<DbStockMovement>()
            .fetch_all(self.pool())
            .await?;
        convert_all(rows)
    }
}

#[async_trait]
impl OpnameStore for PgInventoryStore {
    async fn create_opname(&self, opname: StockOpname) -> Result<StockOpname> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r#"
            INSERT INTO stock_opnames (id, title, notes, status, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(opname.id)
        .bind(&opname.title)
        .bind(&opname.notes)
        .bind(opname.status.as_str())
        .bind(opname.created_by)
        .bind(opname.created_at)
        .execute(&mut *tx)
        .await?;

        for line in &opname.lines {
            sqlx::query("INSERT INTO stock_opname_lines (opname_id, item_id) VALUES ($1, $2)")
                .bind(opname.id)
                .bind(line.item_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        self.require_opname(opname.id).await
    }

    async fn get_opname(&self, id: Uuid) -> Result<Option<StockOpname>> {
        let header = sqlx::query_as::<_, DbStockOpname>("SELECT * FROM stock_opnames WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        match header {
            Some(header) => {
                let lines = self.lines_for(&[id]).await?.remove(&id).unwrap_or_default();
                header.with_lines(lines).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn list_opnames(&self, status: Option<OpnameStatus>) -> Result<Vec<StockOpname>> {
        let headers = sqlx::query_as::<_, DbStockOpname>(
            r#"
            SELECT * FROM stock_opnames
            WHERE $1::TEXT IS NULL OR status = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(self.pool())
        .await?;

        let ids: Vec<Uuid> = headers.iter().map(|h| h.id).collect();
        let mut lines = self.lines_for(&ids).await?;
        headers
            .into_iter()
            .map(|header| {
                let own = lines.remove(&header.id).unwrap_or_default();
                header.with_lines(own)
            })
            .collect()
    }

    async fn set_opname_status(
        &self,
        id: Uuid,
        expected: OpnameStatus,
        to: OpnameStatus,
        at: DateTime<Utc>,
    ) -> Result<StockOpname> {
        let updated = sqlx::query(
            r#"
            UPDATE stock_opnames SET
                status = $3,
                started_at = CASE WHEN $3 = 'in_progress' THEN $4 ELSE started_at END,
                completed_at = CASE WHEN $3 = 'completed' THEN $4 ELSE completed_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled' THEN $4 ELSE cancelled_at END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(self.pool())
        .await?
        .rows_affected();

        let current = self.require_opname(id).await?;
        if updated == 0 {
            return Err(SimrsError::Conflict(format!(
                "opname {} is {}, expected {}",
                id, current.status, expected
            )));
        }
        Ok(current)
    }

    async fn record_count(&self, id: Uuid, count: OpnameCount) -> Result<StockOpname> {
        let mut tx = self.pool().begin().await?;
        Self::lock_in_progress(&mut tx, id).await?;

        let updated = sqlx::query(
            r#"
            UPDATE stock_opname_lines SET
                system_quantity = $3,
                physical_quantity = $4,
                difference = $4 - $3,
                note = $5,
                counted_by = $6,
                counted_at = $7
            WHERE opname_id = $1 AND item_id = $2
            "#,
        )
        .bind(id)
        .bind(count.item_id)
        .bind(count.system_quantity)
        .bind(count.physical_quantity)
        .bind(&count.note)
        .bind(count.counted_by)
        .bind(count.counted_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(SimrsError::not_found("opname line", count.item_id));
        }

        tx.commit().await?;
        self.require_opname(id).await
    }

    async fn complete_opname(
        &self,
        id: Uuid,
        changes: Vec<StockChange>,
        at: DateTime<Utc>,
    ) -> Result<(StockOpname, Vec<StockMovement>)> {
        let mut tx = self.pool().begin().await?;
        Self::lock_in_progress(&mut tx, id).await?;

        let movements = apply_in_tx(&mut tx, changes, at).await?;
        sqlx::query("UPDATE stock_opnames SET status = 'completed', completed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(opname = %id, movements = movements.len(), "Opname completed");
        Ok((self.require_opname(id).await?, movements))
    }
}
