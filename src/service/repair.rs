//! 收货数量修复 (每次加载只运行一次)
//!
//! 旧版本曾把订货数量误写进收货明细的 qtyReceived。判定条件:
//! 已存 qtyReceived 恰好等于匹配到的订货数量, 而匹配条目的原始请购数量与订货数量不同,
//! 此时把 qtyReceived 改回原始请购数量。
//!
//! 注意: 这是概率性判断, 不是真正的数据损坏检测。真实收货量恰好等于订货量时也会被改写。

use super::resolver::MatchResolver;
use crate::models::source::{ORIGINAL_QTY_ALIASES, PURCHASE_QTY_ALIASES};
use crate::models::{ReceiptRecord, RepairOutcome};
use bigdecimal::{BigDecimal, Zero};

/// 一次性闩锁: 进入后不再触发, 直到会话重置
#[derive(Debug, Clone, Default)]
pub struct RepairLatch {
    done: bool,
}

impl RepairLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// 首次调用返回 true 并闩上, 之后都返回 false
    pub fn try_enter(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.done = true;
        true
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn reset(&mut self) {
        self.done = false;
    }
}

/// 扫描全部收货单; 只返回实际被改动的收货单
pub fn run_repair(receipts: &[ReceiptRecord], resolver: &MatchResolver) -> RepairOutcome {
    let mut outcome = RepairOutcome::default();
    let zero = BigDecimal::zero();

    for receipt in receipts {
        let mut changed = false;
        let mut fixed = receipt.clone();
        for line in fixed.items.iter_mut() {
            let Some((_, entry)) = resolver.resolve_entry(&receipt.po_no, &receipt.indent_no, &line.item_code)
            else {
                continue;
            };
            let purchase_qty = entry.qty_by(&PURCHASE_QTY_ALIASES);
            let original_qty = entry.qty_by(&ORIGINAL_QTY_ALIASES);
            if purchase_qty > zero
                && original_qty > zero
                && line.qty_received == purchase_qty
                && original_qty != purchase_qty
            {
                tracing::debug!(
                    "restore qtyReceived {} -> {} (po {}, item {})",
                    line.qty_received,
                    original_qty,
                    receipt.po_no,
                    line.item_code
                );
                line.qty_received = original_qty;
                outcome.restored_lines += 1;
                changed = true;
            }
        }
        if changed {
            outcome.changed.push(fixed);
        }
    }

    if outcome.restored_lines > 0 {
        tracing::info!(
            "修复收货数量: {} 行, 涉及 {} 张收货单",
            outcome.restored_lines,
            outcome.changed.len()
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReceiptLine, SourceEntry};
    use serde_json::json;

    fn receipt(po: &str, code: &str, received: i32) -> ReceiptRecord {
        ReceiptRecord {
            id: Some(format!("r-{}", po)),
            po_no: po.into(),
            items: vec![ReceiptLine {
                qty_received: BigDecimal::from(received),
                ..ReceiptLine::blank("", code)
            }],
            ..ReceiptRecord::default()
        }
    }

    fn resolver() -> MatchResolver {
        let orders: Vec<SourceEntry> = serde_json::from_value(json!([
            { "poNo": "PO-1", "itemCode": "A1", "purchaseQty": 50, "originalIndentQty": 30 },
            { "poNo": "PO-2", "itemCode": "B1", "purchaseQty": 40, "originalIndentQty": 40 }
        ]))
        .unwrap();
        MatchResolver::new(&orders, &[])
    }

    #[test]
    fn received_equal_to_order_qty_is_restored_to_original() {
        let input = vec![receipt("PO-1", "A1", 50), receipt("PO-2", "B1", 40), receipt("PO-3", "C1", 9)];
        let outcome = run_repair(&input, &resolver());

        assert_eq!(outcome.restored_lines, 1);
        assert_eq!(outcome.changed.len(), 1);
        assert_eq!(outcome.changed[0].items[0].qty_received, BigDecimal::from(30));
    }

    #[test]
    fn genuine_partial_receipt_is_left_alone() {
        let outcome = run_repair(&[receipt("PO-1", "A1", 20)], &resolver());
        assert!(outcome.changed.is_empty());
    }

    #[test]
    fn latch_fires_once_until_reset() {
        let mut latch = RepairLatch::new();
        assert!(latch.try_enter());
        assert!(!latch.try_enter());
        assert!(latch.is_done());
        latch.reset();
        assert!(latch.try_enter());
    }
}
