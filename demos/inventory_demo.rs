//! 库存与盘点演示程序
//!
//! 两个批次入库后按先进先出出库，随后做一次盘点把账面数量修正为实盘数量。

use anyhow::Result;
use chrono::NaiveDate;
use simrs_core::{EventPublisher, MovementKind, NewItem, SimrsError};
use simrs_integration::EventHub;
use simrs_inventory::{InMemoryInventory, OpnameService, ReceiveStock, StockService};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("🚀 启动库存演示");

    let hub = EventHub::new(64);
    let publisher: Arc<dyn EventPublisher> = Arc::new(hub.clone());
    let inventory = Arc::new(InMemoryInventory::new());
    let stock = Arc::new(StockService::new(inventory.clone(), publisher.clone()));
    let opnames = OpnameService::new(inventory, stock.clone(), publisher);
    let pharmacist = Some(Uuid::new_v4());

    // 1. 建档与入库
    let item = stock
        .create_item(NewItem {
            code: "PCT500".to_string(),
            name: "Paracetamol 500 mg".to_string(),
            unit: "tablet".to_string(),
            category: Some("analgesik".to_string()),
            min_stock: 50,
        })
        .await?;

    for (batch_no, quantity, expires) in [("B-001", 100, (2027, 3, 31)), ("B-002", 60, (2027, 9, 30))] {
        stock
            .receive(
                item.id,
                ReceiveStock {
                    quantity,
                    batch_no: Some(batch_no.to_string()),
                    expires_at: NaiveDate::from_ymd_opt(expires.0, expires.1, expires.2),
                    ..ReceiveStock::default()
                },
                pharmacist,
            )
            .await?;
        info!("📦 入库批次 {} 数量 {}", batch_no, quantity);
    }

    // 2. 先进先出出库，跨越两个批次
    let movement = stock
        .consume(item.id, 120, MovementKind::Dispense, None, pharmacist)
        .await?;
    for allocation in &movement.allocations {
        info!("💊 从批次 {} 扣减 {}", allocation.batch_id, allocation.quantity);
    }
    info!("   出库后结存 {}", movement.balance_after);

    // 3. 超量出库被拒绝
    match stock
        .consume(item.id, 500, MovementKind::Dispense, None, pharmacist)
        .await
    {
        Err(SimrsError::InsufficientStock { requested, available, .. }) => {
            warn!("❌ 库存不足: 需要 {}，可用 {}", requested, available);
        }
        other => warn!("意外结果: {:?}", other.map(|m| m.id)),
    }

    // 4. 盘点
    let opname = opnames
        .create("月末盘点".to_string(), None, Some(vec![item.id]), pharmacist)
        .await?;
    opnames.start(opname.id).await?;
    let counted = opnames
        .record_count(opname.id, item.id, 37, Some("破损 3 片".to_string()), pharmacist)
        .await?;
    if let Some(line) = counted.line(item.id) {
        info!(
            "📋 账面 {:?} 实盘 {:?} 差异 {:?}",
            line.system_quantity, line.physical_quantity, line.difference
        );
    }
    let completed = opnames.complete(opname.id, pharmacist).await?;
    info!("✅ 盘点 {} 状态 {}", completed.title, completed.status);

    let current = stock.get_item(item.id).await?;
    info!("📊 {} 当前库存 {}", current.item.name, current.on_hand);

    info!("✅ 库存演示完成");
    Ok(())
}
