//! 孤儿清理
//!
//! 收货单/检验记录的上级订单或请购已不存在时删除, 并把它的订单键登记进墓碑集合,
//! 防止导入流程立刻把它重新建出来; 只有强制导入才会跳过墓碑。

use super::keys::{indent_key, normalize, order_key};
use crate::models::{InspectionRecord, OrphanRef, OrphanSweep, ReceiptRecord, SourceEntry};
use indexmap::IndexSet;
use std::collections::HashSet;

/// 会话级墓碑集合
#[derive(Debug, Clone, Default)]
pub struct Tombstones {
    keys: IndexSet<String>,
}

impl Tombstones {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bury(&mut self, key: &str) {
        if self.keys.insert(normalize(key)) {
            tracing::debug!("tombstoned order key {}", key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(&normalize(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

/// 当前有效的订单键: 订单号与 `INDENT::<请购号>` 两种形式
pub fn valid_order_keys<'a, I>(sources: I) -> HashSet<String>
where
    I: IntoIterator<Item = &'a SourceEntry>,
{
    let mut keys = HashSet::new();
    for entry in sources {
        let po = normalize(&entry.po_no());
        let indent = normalize(&entry.indent_no());
        if !po.is_empty() {
            keys.insert(po);
        }
        if !indent.is_empty() {
            keys.insert(indent_key(&indent));
        }
    }
    keys
}

fn is_orphan(valid: &HashSet<String>, po_no: &str, indent_no: &str) -> bool {
    let po = normalize(po_no);
    let indent = normalize(indent_no);
    let key = order_key(&po, &indent);
    if valid.contains(&key) {
        return false;
    }
    if !po.is_empty() && valid.contains(&po) {
        return false;
    }
    !(!indent.is_empty() && valid.contains(&indent_key(&indent)))
}

/// 生成清理计划; 没有 id 的记录无法删除, 跳过
pub fn plan_sweep(
    valid: &HashSet<String>,
    receipts: &[ReceiptRecord],
    inspections: &[InspectionRecord],
) -> OrphanSweep {
    let receipts = receipts
        .iter()
        .filter(|r| is_orphan(valid, &r.po_no, &r.indent_no))
        .filter_map(|r| {
            r.id.clone().map(|id| OrphanRef {
                id,
                key: order_key(&r.po_no, &r.indent_no),
            })
        })
        .collect();
    let inspections = inspections
        .iter()
        .filter(|r| is_orphan(valid, &r.po_no, &r.indent_no))
        .filter_map(|r| {
            r.id.clone().map(|id| OrphanRef {
                id,
                key: order_key(&r.po_no, &r.indent_no),
            })
        })
        .collect();
    OrphanSweep { receipts, inspections }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sources(v: serde_json::Value) -> Vec<SourceEntry> {
        serde_json::from_value(v).unwrap()
    }

    fn receipt(id: &str, po: &str, indent: &str) -> ReceiptRecord {
        ReceiptRecord {
            id: Some(id.into()),
            po_no: po.into(),
            indent_no: indent.into(),
            ..ReceiptRecord::default()
        }
    }

    #[test]
    fn receipt_without_parent_order_is_planned_for_deletion() {
        let valid = valid_order_keys(&sources(json!([{ "poNo": "PO-1", "indentNo": "IND-1" }])));
        let plan = plan_sweep(
            &valid,
            &[receipt("r1", "PO-9", ""), receipt("r2", "po-1", ""), receipt("r3", "", "ind-1")],
            &[],
        );

        assert_eq!(plan.receipts, vec![OrphanRef { id: "r1".into(), key: "PO-9".into() }]);
    }

    #[test]
    fn indent_key_keeps_receipt_whose_order_number_changed() {
        let valid = valid_order_keys(&sources(json!([{ "poNo": "PO-NEW", "indentNo": "IND-5" }])));
        let plan = plan_sweep(&valid, &[receipt("r1", "PO-OLD", "IND-5")], &[]);
        assert!(plan.is_empty());
    }

    #[test]
    fn inspections_are_swept_and_records_without_id_skipped() {
        let valid = valid_order_keys(&sources(json!([{ "poNo": "PO-1" }])));
        let inspection = InspectionRecord {
            id: Some("v1".into()),
            po_no: "PO-2".into(),
            ..InspectionRecord::default()
        };
        let no_id = ReceiptRecord { id: None, ..receipt("", "PO-3", "") };
        let plan = plan_sweep(&valid, &[no_id], &[inspection]);

        assert!(plan.receipts.is_empty());
        assert_eq!(plan.inspections.len(), 1);
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn tombstones_compare_normalized() {
        let mut t = Tombstones::new();
        t.bury(" po-9");
        assert!(t.contains("PO-9"));
        assert_eq!(t.len(), 1);
        t.clear();
        assert!(t.is_empty());
    }
}
