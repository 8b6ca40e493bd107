//! 从请购明细导入采购记录 (手动触发)
//!
//! 只在用户点击导入时运行。自动导入会在每次数据变化时覆盖用户导入后手工填写的
//! PO 号、供应商和下单日期。已存在的 `(indentNo, itemCode)` 只刷新系统字段。

use super::dedupe::dedupe_procurement;
use super::keys::composite_key;
use super::live_stock::LiveStockMap;
use crate::models::{IndentImportSummary, IndentItem, IndentStatus, ProcurementRecord};
use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;
use std::collections::HashSet;

/// 开放请购明细中出现过的键 (itemCode 与 Code 两种写法)
fn open_keys(open: &[IndentItem]) -> HashSet<String> {
    let mut keys = HashSet::new();
    for item in open {
        keys.insert(composite_key(&item.indent_no(), &item.item_code()));
        keys.insert(composite_key(&item.indent_no(), &item.alt_code()));
    }
    keys
}

/// 规划导入, 返回去重后的完整采购记录集合和统计
pub fn import_from_indents(
    existing: &[ProcurementRecord],
    open: &[IndentItem],
    closed: &[IndentItem],
    live_stock: &LiveStockMap,
) -> (Vec<ProcurementRecord>, IndentImportSummary) {
    let mut summary = IndentImportSummary::default();
    let mut result: Vec<ProcurementRecord> = existing.to_vec();
    let mut index: IndexMap<String, usize> = IndexMap::new();
    for (i, rec) in result.iter().enumerate() {
        index.entry(composite_key(&rec.indent_no, &rec.item_code)).or_insert(i);
    }
    let open_set = open_keys(open);

    for item in open.iter().chain(closed.iter()) {
        let indent_no = item.indent_no().trim().to_string();
        if indent_no.is_empty() {
            continue;
        }
        let code = item.code();
        let key = composite_key(&indent_no, &code);
        let stock = item.stock();
        let indent_qty = item.indent_qty();
        let status = if open_set.contains(&key) {
            IndentStatus::Open
        } else {
            IndentStatus::Closed
        };

        if let Some(&idx) = index.get(&key) {
            let rec = &mut result[idx];
            rec.original_indent_qty = indent_qty;
            rec.indent_status = status;
            let oa = item.oa_no();
            if !oa.is_empty() {
                rec.oa_no = oa;
            }
            rec.purchase_qty = if status.is_open() { stock.clone() } else { BigDecimal::zero() };
            rec.current_stock = stock;
            summary.updated += 1;
        } else {
            let purchase_qty = if status.is_open() {
                live_stock
                    .get(&indent_no, &code)
                    .map(|hit| hit.display.clone())
                    .unwrap_or_else(|| stock.clone())
            } else {
                BigDecimal::zero()
            };
            result.push(ProcurementRecord {
                item_name: item.item_name(),
                item_code: code,
                indent_no,
                indent_date: item.indent_date(),
                indent_by: item.indent_by(),
                oa_no: item.oa_no(),
                original_indent_qty: indent_qty,
                current_stock: stock,
                indent_status: status,
                purchase_qty,
                ..ProcurementRecord::default()
            });
            index.insert(key, result.len() - 1);
            summary.created += 1;
        }
    }

    tracing::info!("请购导入: 新建 {}, 更新 {}", summary.created, summary.updated);
    (dedupe_procurement(result), summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(v: serde_json::Value) -> Vec<IndentItem> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn new_open_item_takes_live_stock_and_closed_item_gets_zero() {
        let open = items(json!([{ "indentNo": "IND-1", "itemCode": "A1", "model": "Bolt", "qty": 20, "stock": 3 }]));
        let closed = items(json!([{ "indentNo": "IND-2", "Code": "B1", "qty": 4, "stock": 9 }]));
        let live = LiveStockMap::compute(&open, &closed, &[], &[]);

        let (records, summary) = import_from_indents(&[], &open, &closed, &live);

        assert_eq!(summary, IndentImportSummary { created: 2, updated: 0 });
        assert_eq!(records[0].item_name, "Bolt");
        assert_eq!(records[0].original_indent_qty, BigDecimal::from(20));
        assert_eq!(records[0].purchase_qty, BigDecimal::from(20));
        assert_eq!(records[1].item_code, "B1");
        assert_eq!(records[1].indent_status, IndentStatus::Closed);
        assert_eq!(records[1].purchase_qty, BigDecimal::zero());
    }

    #[test]
    fn existing_record_keeps_user_fields() {
        let existing = vec![ProcurementRecord {
            id: Some("p1".into()),
            indent_no: "IND-1".into(),
            item_code: "A1".into(),
            po_no: "PO-77".into(),
            supplier_name: "Acme".into(),
            order_place_date: "2024-05-01".into(),
            oa_no: "OA-1".into(),
            ..ProcurementRecord::default()
        }];
        let open = items(json!([{ "indentNo": "ind-1", "itemCode": "a1", "qty": 6, "stock": 2 }]));

        let (records, summary) = import_from_indents(&existing, &open, &[], &LiveStockMap::default());

        assert_eq!(summary, IndentImportSummary { created: 0, updated: 1 });
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.po_no, "PO-77");
        assert_eq!(rec.supplier_name, "Acme");
        assert_eq!(rec.order_place_date, "2024-05-01");
        assert_eq!(rec.oa_no, "OA-1");
        assert_eq!(rec.current_stock, BigDecimal::from(2));
        assert_eq!(rec.purchase_qty, BigDecimal::from(2));
        assert_eq!(rec.original_indent_qty, BigDecimal::from(6));
    }

    #[test]
    fn item_present_in_both_collections_stays_open() {
        let open = items(json!([{ "indentNo": "IND-3", "itemCode": "C1", "stock": 5 }]));
        let closed = items(json!([{ "indentNo": "IND-3", "itemCode": "C1", "stock": 5 }]));

        let (records, _) = import_from_indents(&[], &open, &closed, &LiveStockMap::default());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].indent_status, IndentStatus::Open);
    }
}
