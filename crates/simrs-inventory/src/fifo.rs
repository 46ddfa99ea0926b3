//! 先进先出批次计算
//!
//! 纯函数，不做任何存储访问。内存实现和 Postgres 实现共用同一套规则：
//! 按 `received_at` 从早到晚，同一时间按创建顺序，跳过已耗尽的批次。

use chrono::{DateTime, Utc};
use simrs_core::{BatchAllocation, Result, SimrsError, StockBatch, StockChange};
use uuid::Uuid;

/// 批次消耗顺序
pub fn sort_for_consumption(batches: &mut [StockBatch]) {
    batches.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then(a.created_at.cmp(&b.created_at))
    });
}

/// 当前结存
pub fn on_hand(batches: &[StockBatch]) -> i64 {
    batches.iter().map(|b| b.remaining.max(0)).sum()
}

/// 计算扣减 `quantity` 需要动用的批次
///
/// 只计算不修改；可用总量不足时返回 `InsufficientStock`。
pub fn plan_consumption(
    item: &str,
    batches: &[StockBatch],
    quantity: i64,
) -> Result<Vec<BatchAllocation>> {
    if quantity <= 0 {
        return Err(SimrsError::Validation(format!(
            "consumption quantity must be positive, got {}",
            quantity
        )));
    }

    let available = on_hand(batches);
    if available < quantity {
        return Err(SimrsError::InsufficientStock {
            item: item.to_string(),
            requested: quantity,
            available,
        });
    }

    let mut ordered: Vec<&StockBatch> = batches.iter().filter(|b| !b.is_exhausted()).collect();
    ordered.sort_by(|a, b| {
        a.received_at
            .cmp(&b.received_at)
            .then(a.created_at.cmp(&b.created_at))
    });

    let mut outstanding = quantity;
    let mut allocations = Vec::new();
    for batch in ordered {
        if outstanding == 0 {
            break;
        }
        let take = outstanding.min(batch.remaining);
        allocations.push(BatchAllocation {
            batch_id: batch.id,
            quantity: take,
        });
        outstanding -= take;
    }

    Ok(allocations)
}

/// 将扣减结果写回批次
pub fn apply_allocations(batches: &mut [StockBatch], allocations: &[BatchAllocation]) -> Result<()> {
    for allocation in allocations {
        let batch = batches
            .iter_mut()
            .find(|b| b.id == allocation.batch_id)
            .ok_or_else(|| SimrsError::not_found("stock batch", allocation.batch_id))?;
        if batch.remaining < allocation.quantity {
            return Err(SimrsError::Internal(format!(
                "batch {} has {} left, cannot take {}",
                batch.id, batch.remaining, allocation.quantity
            )));
        }
        batch.remaining -= allocation.quantity;
    }
    Ok(())
}

/// 由入库变动生成新批次
pub fn new_batch(change: &StockChange, now: DateTime<Utc>) -> StockBatch {
    StockBatch {
        id: Uuid::new_v4(),
        item_id: change.item_id,
        batch_no: change.batch_no.clone(),
        quantity: change.delta,
        remaining: change.delta,
        received_at: change.received_at.unwrap_or(now),
        expires_at: change.expires_at,
        created_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn batch(remaining: i64, received_days_ago: i64) -> StockBatch {
        let base = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        StockBatch {
            id: Uuid::new_v4(),
            item_id: Uuid::nil(),
            batch_no: None,
            quantity: remaining,
            remaining,
            received_at: base - Duration::days(received_days_ago),
            expires_at: None,
            created_at: base,
        }
    }

    #[test]
    fn test_consumes_oldest_first() {
        let newer = batch(10, 1);
        let older = batch(5, 3);
        let batches = vec![newer.clone(), older.clone()];

        let plan = plan_consumption("PCT500", &batches, 8).unwrap();
        assert_eq!(
            plan,
            vec![
                BatchAllocation { batch_id: older.id, quantity: 5 },
                BatchAllocation { batch_id: newer.id, quantity: 3 },
            ]
        );
    }

    #[test]
    fn test_skips_exhausted_batches() {
        let empty = batch(0, 5);
        let live = batch(4, 2);
        let plan = plan_consumption("AMX", &[empty, live.clone()], 4).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].batch_id, live.id);
    }

    #[test]
    fn test_ties_keep_creation_order() {
        let mut first = batch(2, 1);
        let mut second = batch(2, 1);
        second.created_at = first.created_at + Duration::seconds(1);
        first.batch_no = Some("A".into());
        let plan = plan_consumption("ORS", &[second.clone(), first.clone()], 3).unwrap();
        assert_eq!(plan[0].batch_id, first.id);
        assert_eq!(plan[1], BatchAllocation { batch_id: second.id, quantity: 1 });
    }

    #[test]
    fn test_insufficient_stock_reports_available() {
        let batches = vec![batch(3, 2), batch(2, 1)];
        match plan_consumption("PCT500", &batches, 6) {
            Err(SimrsError::InsufficientStock { requested, available, .. }) => {
                assert_eq!(requested, 6);
                assert_eq!(available, 5);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(plan_consumption("PCT500", &batches, 0).is_err());
    }

    #[test]
    fn test_apply_allocations_updates_remaining() {
        let mut batches = vec![batch(3, 2), batch(5, 1)];
        let plan = plan_consumption("X", &batches, 4).unwrap();
        apply_allocations(&mut batches, &plan).unwrap();
        sort_for_consumption(&mut batches);
        assert_eq!(batches[0].remaining, 0);
        assert_eq!(batches[1].remaining, 4);
        assert_eq!(on_hand(&batches), 4);
    }
}
