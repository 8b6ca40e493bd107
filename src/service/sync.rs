//! 集合之间的同步
//!
//! - 收货单 -> 采购记录: 收货/合格/拒收数量回写
//! - 请购明细变化 -> 采购记录: 状态、库存、采购数量刷新
//! - 匹配器 -> 收货明细: 订货数量缓存重算

use super::keys::{composite_key, normalize};
use super::resolver::MatchResolver;
use crate::models::{IndentItem, IndentStatus, ProcurementRecord, ReceiptRecord};
use bigdecimal::{BigDecimal, Zero};
use std::collections::HashMap;

/// 收货单数量回写采购记录; 第二个返回值表示是否有变化
pub fn apply_receipts(
    procurement: &[ProcurementRecord],
    receipts: &[ReceiptRecord],
) -> (Vec<ProcurementRecord>, bool) {
    let mut changed = false;
    let updated = procurement
        .iter()
        .map(|rec| {
            let po = normalize(&rec.po_no);
            if po.is_empty() {
                return rec.clone();
            }
            let code = normalize(&rec.item_code);
            let line = receipts
                .iter()
                .find(|r| normalize(&r.po_no) == po)
                .and_then(|r| r.items.iter().find(|l| normalize(&l.item_code) == code));
            let Some(line) = line else {
                return rec.clone();
            };
            if line.qty_received == rec.received_qty
                && line.ok_qty == rec.ok_qty
                && line.reject_qty == rec.rejected_qty
            {
                return rec.clone();
            }
            changed = true;
            ProcurementRecord {
                received_qty: line.qty_received.clone(),
                ok_qty: line.ok_qty.clone(),
                rejected_qty: line.reject_qty.clone(),
                ..rec.clone()
            }
        })
        .collect();
    if changed {
        tracing::info!("收货数量已回写采购记录");
    }
    (updated, changed)
}

/// 请购明细变化后刷新采购记录; 关闭明细后处理, 同一键以关闭状态为准
pub fn apply_indent_update(
    procurement: &[ProcurementRecord],
    open: &[IndentItem],
    closed: &[IndentItem],
) -> (Vec<ProcurementRecord>, bool) {
    let mut reported: HashMap<String, (IndentStatus, BigDecimal)> = HashMap::new();
    let tagged = open
        .iter()
        .map(|i| (i, IndentStatus::Open))
        .chain(closed.iter().map(|i| (i, IndentStatus::Closed)));
    for (item, status) in tagged {
        let indent_no = item.indent_no();
        if indent_no.trim().is_empty() {
            continue;
        }
        let stock = item.stock();
        for code in [item.item_code(), item.alt_code()] {
            reported.insert(composite_key(&indent_no, &code), (status, stock.clone()));
        }
    }

    let mut changed = false;
    let updated = procurement
        .iter()
        .map(|rec| {
            let Some((status, stock)) = reported.get(&composite_key(&rec.indent_no, &rec.item_code)) else {
                return rec.clone();
            };
            let desired = if status.is_open() { stock.clone() } else { BigDecimal::zero() };
            if rec.indent_status == *status && rec.current_stock == *stock && rec.purchase_qty == desired {
                return rec.clone();
            }
            changed = true;
            ProcurementRecord {
                indent_status: *status,
                current_stock: stock.clone(),
                purchase_qty: desired,
                ..rec.clone()
            }
        })
        .collect();
    (updated, changed)
}

/// 重算收货明细的订货数量缓存, 只返回有变化的收货单
pub fn refresh_order_quantities(receipts: &[ReceiptRecord], resolver: &MatchResolver) -> Vec<ReceiptRecord> {
    receipts
        .iter()
        .filter_map(|receipt| {
            let mut fixed = receipt.clone();
            let mut changed = false;
            for line in fixed.items.iter_mut() {
                let qty = Some(resolver.resolve(&receipt.po_no, &receipt.indent_no, &line.item_code));
                if line.po_qty != qty {
                    line.po_qty = qty;
                    changed = true;
                }
            }
            changed.then_some(fixed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReceiptLine, SourceEntry};
    use serde_json::json;

    fn procurement(po: &str, indent: &str, code: &str) -> ProcurementRecord {
        ProcurementRecord {
            po_no: po.into(),
            indent_no: indent.into(),
            item_code: code.into(),
            ..ProcurementRecord::default()
        }
    }

    fn receipt(po: &str, code: &str, received: i32, ok: i32, reject: i32) -> ReceiptRecord {
        ReceiptRecord {
            po_no: po.into(),
            items: vec![ReceiptLine {
                qty_received: BigDecimal::from(received),
                ok_qty: BigDecimal::from(ok),
                reject_qty: BigDecimal::from(reject),
                ..ReceiptLine::blank("", code)
            }],
            ..ReceiptRecord::default()
        }
    }

    #[test]
    fn receipt_quantities_are_copied_onto_matching_record() {
        let records = vec![procurement("PO-1", "IND-1", "A1"), procurement("", "IND-2", "A1")];
        let (updated, changed) = apply_receipts(&records, &[receipt("po-1", "a1", 10, 8, 2)]);

        assert!(changed);
        assert_eq!(updated[0].received_qty, BigDecimal::from(10));
        assert_eq!(updated[0].ok_qty, BigDecimal::from(8));
        assert_eq!(updated[0].rejected_qty, BigDecimal::from(2));
        assert_eq!(updated[1].received_qty, BigDecimal::zero());

        let (_, again) = apply_receipts(&updated, &[receipt("PO-1", "A1", 10, 8, 2)]);
        assert!(!again);
    }

    #[test]
    fn indent_update_closes_and_zeroes_purchase_qty() {
        let records = vec![ProcurementRecord {
            purchase_qty: BigDecimal::from(5),
            ..procurement("PO-1", "IND-1", "A1")
        }];
        let open: Vec<IndentItem> = serde_json::from_value(json!([{ "indentNo": "IND-1", "itemCode": "A1", "stock": 4 }])).unwrap();
        let closed: Vec<IndentItem> = serde_json::from_value(json!([{ "indentNo": "IND-1", "Code": "A1", "stock": 6 }])).unwrap();

        let (updated, changed) = apply_indent_update(&records, &open, &[]);
        assert!(changed);
        assert_eq!(updated[0].purchase_qty, BigDecimal::from(4));

        let (updated, changed) = apply_indent_update(&updated, &open, &closed);
        assert!(changed);
        assert_eq!(updated[0].indent_status, IndentStatus::Closed);
        assert_eq!(updated[0].current_stock, BigDecimal::from(6));
        assert_eq!(updated[0].purchase_qty, BigDecimal::zero());
    }

    #[test]
    fn order_qty_cache_refresh_returns_only_changed_receipts() {
        let orders: Vec<SourceEntry> = serde_json::from_value(json!([{ "poNo": "PO-1", "itemCode": "A1", "purchaseQty": 12 }])).unwrap();
        let resolver = MatchResolver::new(&orders, &[]);
        let stale = receipt("PO-1", "A1", 0, 0, 0);
        let fresh = ReceiptRecord {
            items: vec![ReceiptLine {
                po_qty: Some(BigDecimal::from(12)),
                ..ReceiptLine::blank("", "A1")
            }],
            ..stale.clone()
        };

        let changed = refresh_order_quantities(&[stale, fresh], &resolver);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].items[0].po_qty, Some(BigDecimal::from(12)));
    }
}
