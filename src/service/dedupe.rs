//! 去重
//!
//! 采购记录和检验记录统一采用 "先出现者保留" 策略, 保留记录维持原有先后顺序。
//! 收货单以文档 id 为身份, 不做去重。

use super::keys::{composite_key, order_key};
use crate::models::{InspectionRecord, ProcurementRecord};
use indexmap::IndexSet;
use std::hash::Hash;

/// 按键去重, 第一次出现的记录保留
pub fn dedupe_by<T, K, F>(records: Vec<T>, mut key: F) -> Vec<T>
where
    K: Hash + Eq,
    F: FnMut(&T) -> K,
{
    let mut seen: IndexSet<K> = IndexSet::with_capacity(records.len());
    records.into_iter().filter(|r| seen.insert(key(r))).collect()
}

/// 采购记录按 `(indentNo, itemCode)` 去重
pub fn dedupe_procurement(records: Vec<ProcurementRecord>) -> Vec<ProcurementRecord> {
    let before = records.len();
    let kept = dedupe_by(records, |r| composite_key(&r.indent_no, &r.item_code));
    if kept.len() < before {
        tracing::info!("去重采购记录: {} -> {}", before, kept.len());
    }
    kept
}

/// 检验记录每条一行物料, 按 (订单键, 物料编码) 去重
pub fn dedupe_inspections(records: Vec<InspectionRecord>) -> Vec<InspectionRecord> {
    dedupe_by(records, |r| composite_key(&order_key(&r.po_no, &r.indent_no), &r.item_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(indent: &str, code: &str, remarks: &str) -> ProcurementRecord {
        ProcurementRecord {
            indent_no: indent.into(),
            item_code: code.into(),
            remarks: remarks.into(),
            ..ProcurementRecord::default()
        }
    }

    #[test]
    fn first_occurrence_wins_and_order_is_kept() {
        let input = vec![
            rec("IND-1", "A1", "first"),
            rec("IND-2", "B1", "other"),
            rec(" ind-1", "a1 ", "second"),
        ];
        let out = dedupe_procurement(input);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].remarks, "first");
        assert_eq!(out[1].remarks, "other");
    }

    #[test]
    fn dedupe_is_idempotent() {
        let input = vec![
            rec("IND-1", "A1", "x"),
            rec("IND-1", "A1", "y"),
            rec("IND-3", "C1", "z"),
        ];
        let once = dedupe_procurement(input);
        let twice = dedupe_procurement(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn inspections_keep_distinct_items_of_one_order() {
        let a = InspectionRecord {
            po_no: "PO-1".into(),
            item_code: "A1".into(),
            ..InspectionRecord::default()
        };
        let b = InspectionRecord {
            item_code: "B1".into(),
            ..a.clone()
        };
        let dup = InspectionRecord {
            remarks: "later".into(),
            ..a.clone()
        };
        let out = dedupe_inspections(vec![a.clone(), b, dup]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], a);
    }
}
