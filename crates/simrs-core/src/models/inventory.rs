//! 药房库存：物品、批次、流水与盘点

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 库存物品
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub unit: String, // 单位，例如 "tablet"
    pub category: Option<String>,
    pub min_stock: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub code: String,
    pub name: String,
    pub unit: String,
    pub category: Option<String>,
    #[serde(default)]
    pub min_stock: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub category: Option<String>,
    pub min_stock: Option<i64>,
    pub is_active: Option<bool>,
}

/// 物品及其当前结存
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStock {
    #[serde(flatten)]
    pub item: Item,
    pub on_hand: i64,
}

impl ItemStock {
    pub fn is_low(&self) -> bool {
        self.on_hand <= self.item.min_stock
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFilter {
    pub search: Option<String>,
    #[serde(default)]
    pub low_stock_only: bool,
    #[serde(default)]
    pub active_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 入库批次，按 received_at 先进先出消耗
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockBatch {
    pub id: Uuid,
    pub item_id: Uuid,
    pub batch_no: Option<String>,
    pub quantity: i64,
    pub remaining: i64,
    pub received_at: DateTime<Utc>,
    pub expires_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl StockBatch {
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

string_enum! {
    /// 库存流水类型
    MovementKind {
        Receipt => "receipt",       // 入库
        Dispense => "dispense",     // 处方发药
        Adjustment => "adjustment", // 手工修正
        Opname => "opname",         // 盘点修正
        Return => "return",         // 退回
    }
}

/// 单个批次的扣减量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAllocation {
    pub batch_id: Uuid,
    pub quantity: i64,
}

/// 库存流水（只追加的审计记录）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub item_id: Uuid,
    pub kind: MovementKind,
    pub quantity: i64, // 正数为增加，负数为减少
    pub balance_after: i64,
    pub allocations: Vec<BatchAllocation>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub note: Option<String>,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// 一次库存变动请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChange {
    pub item_id: Uuid,
    pub delta: i64,
    pub kind: MovementKind,
    pub batch_no: Option<String>,
    pub expires_at: Option<NaiveDate>,
    pub received_at: Option<DateTime<Utc>>,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub note: Option<String>,
    pub actor_id: Option<Uuid>,
}

impl StockChange {
    pub fn new(item_id: Uuid, delta: i64, kind: MovementKind) -> Self {
        Self {
            item_id,
            delta,
            kind,
            batch_no: None,
            expires_at: None,
            received_at: None,
            reference_type: None,
            reference_id: None,
            note: None,
            actor_id: None,
        }
    }

    pub fn with_reference(mut self, reference_type: &str, reference_id: Uuid) -> Self {
        self.reference_type = Some(reference_type.to_string());
        self.reference_id = Some(reference_id);
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn with_actor(mut self, actor_id: Option<Uuid>) -> Self {
        self.actor_id = actor_id;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovementFilter {
    pub item_id: Option<Uuid>,
    pub kind: Option<MovementKind>,
    pub reference_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

string_enum! {
    /// 盘点状态
    OpnameStatus {
        Draft => "draft",
        InProgress => "in_progress",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

/// 盘点单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockOpname {
    pub id: Uuid,
    pub title: String,
    pub notes: Option<String>,
    pub status: OpnameStatus,
    pub created_by: Option<Uuid>,
    pub lines: Vec<OpnameLine>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl StockOpname {
    pub fn line(&self, item_id: Uuid) -> Option<&OpnameLine> {
        self.lines.iter().find(|l| l.item_id == item_id)
    }

    pub fn uncounted_items(&self) -> Vec<Uuid> {
        self.lines
            .iter()
            .filter(|l| l.physical_quantity.is_none())
            .map(|l| l.item_id)
            .collect()
    }
}

/// 盘点明细
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpnameLine {
    pub item_id: Uuid,
    pub system_quantity: Option<i64>,
    pub physical_quantity: Option<i64>,
    pub difference: Option<i64>,
    pub note: Option<String>,
    pub counted_by: Option<Uuid>,
    pub counted_at: Option<DateTime<Utc>>,
}

impl OpnameLine {
    pub fn pending(item_id: Uuid) -> Self {
        Self {
            item_id,
            system_quantity: None,
            physical_quantity: None,
            difference: None,
            note: None,
            counted_by: None,
            counted_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewOpname {
    pub title: String,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub item_ids: Vec<Uuid>,
}

/// 盘点计数录入
#[derive(Debug, Clone)]
pub struct OpnameCount {
    pub item_id: Uuid,
    pub system_quantity: i64,
    pub physical_quantity: i64,
    pub note: Option<String>,
    pub counted_by: Option<Uuid>,
    pub counted_at: DateTime<Utc>,
}
