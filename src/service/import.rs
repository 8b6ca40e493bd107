//! 订单 -> 收货单导入 (幂等)
//!
//! 已物化过的订单键记录在 processed 集合里, 会话开始时由现有收货单初始化。
//! 重复导入不会产生重复收货单; 对已存在但缺少可选字段 (供应商、OA 号、明细) 的收货单
//! 只补缺失字段, 不覆盖用户录入的数据。

use super::keys::{indent_key, normalize};
use super::orphans::Tombstones;
use super::resolver::MatchResolver;
use crate::models::{ImportSummary, ReceiptLine, ReceiptRecord, SourceEntry};
use chrono::Local;
use indexmap::IndexSet;

#[derive(Debug, Clone, Default)]
pub struct ImportTracker {
    processed: IndexSet<String>,
}

/// 一次导入的结果: 新建的收货单与被补字段的收货单
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub created: Vec<ReceiptRecord>,
    pub patched: Vec<ReceiptRecord>,
}

impl ImportPlan {
    pub fn summary(&self) -> ImportSummary {
        ImportSummary {
            created: self.created.len(),
            patched: self.patched.len(),
        }
    }
}

impl ImportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用现有收货单初始化 (订单号与请购键两种形式)
    pub fn seed(&mut self, receipts: &[ReceiptRecord]) {
        for r in receipts {
            let po = normalize(&r.po_no);
            if !po.is_empty() {
                self.processed.insert(po);
            }
            let indent = normalize(&r.indent_no);
            if !indent.is_empty() {
                self.processed.insert(indent_key(&indent));
            }
        }
    }

    pub fn is_processed(&self, key: &str) -> bool {
        self.processed.contains(&normalize(key))
    }

    pub fn mark(&mut self, key: &str) {
        self.processed.insert(normalize(key));
    }

    pub fn forget(&mut self, key: &str) {
        self.processed.shift_remove(&normalize(key));
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.processed.iter()
    }

    pub fn clear(&mut self) {
        self.processed.clear();
    }

    /// 规划一次导入; 调用方负责持久化
    ///
    /// `orders` 为导入来源 (订单集合为空时用采购记录), `purchase_data` 用于补 OA 号、
    /// 供应商以及无明细订单的明细行。
    pub fn import_all(
        &mut self,
        orders: &[SourceEntry],
        purchase_data: &[SourceEntry],
        existing: &[ReceiptRecord],
        tombstones: &Tombstones,
        resolver: &MatchResolver,
        force: bool,
    ) -> ImportPlan {
        let mut plan = ImportPlan::default();
        let today = Local::now().format("%Y-%m-%d").to_string();

        for order in orders {
            let po_no = order.po_no().trim().to_string();
            let indent_no = order.indent_no().trim().to_string();
            if po_no.is_empty() {
                continue;
            }
            let key = normalize(&po_no);
            if !force && self.processed.contains(&key) {
                continue;
            }
            if !force && tombstones.contains(&key) {
                tracing::debug!("skip tombstoned order {}", po_no);
                continue;
            }

            let related: Vec<&SourceEntry> = purchase_data
                .iter()
                .filter(|p| related_to(p, &po_no, &indent_no))
                .collect();
            let oa_no = related.first().map(|p| p.oa_no()).unwrap_or_default();
            let mut supplier = order.supplier().trim().to_string();
            let lines = lines_for(order, &related, &mut supplier, &po_no, &indent_no, resolver);

            if plan
                .created
                .iter()
                .chain(plan.patched.iter())
                .any(|r| normalize(&r.po_no) == key)
            {
                continue;
            }
            let existing_rec = existing.iter().find(|r| normalize(&r.po_no) == key).cloned();

            match existing_rec {
                Some(mut rec) => {
                    let mut patched = false;
                    if rec.supplier_name.trim().is_empty() && !supplier.is_empty() {
                        rec.supplier_name = supplier;
                        patched = true;
                    }
                    if rec.oa_no.trim().is_empty() && !oa_no.is_empty() {
                        rec.oa_no = oa_no;
                        patched = true;
                    }
                    if rec.items.is_empty() && !lines.is_empty() {
                        rec.items = lines;
                        patched = true;
                    }
                    if patched {
                        self.mark(&key);
                        plan.patched.push(rec);
                    }
                }
                None => {
                    plan.created.push(ReceiptRecord {
                        id: None,
                        received_date: today.clone(),
                        indent_no,
                        po_no,
                        oa_no,
                        batch_no: String::new(),
                        invoice_no: String::new(),
                        supplier_name: supplier,
                        items: lines,
                    });
                    self.mark(&key);
                }
            }
        }

        let summary = plan.summary();
        if summary.is_nothing() {
            tracing::info!("没有需要导入的订单 (全部已处理)");
        } else {
            tracing::info!("订单导入: 新建 {}, 补全 {}", summary.created, summary.patched);
        }
        plan
    }
}

fn related_to(entry: &SourceEntry, po_no: &str, indent_no: &str) -> bool {
    let p_po = entry.po_no().trim().to_string();
    let p_indent = entry.indent_no().trim().to_string();
    (!po_no.is_empty() && p_po == po_no) || (!indent_no.is_empty() && p_indent == indent_no)
}

/// 收货明细来源: 订单内嵌明细 > 订单顶层物料 > 采购记录中的相关行 > 一行空白
fn lines_for(
    order: &SourceEntry,
    related: &[&SourceEntry],
    supplier: &mut String,
    po_no: &str,
    indent_no: &str,
    resolver: &MatchResolver,
) -> Vec<ReceiptLine> {
    let make = |name: String, code: String| {
        let po_qty = resolver.resolve(po_no, indent_no, &code);
        ReceiptLine {
            po_qty: Some(po_qty),
            ..ReceiptLine::blank(name, code)
        }
    };

    let nested = order.items();
    if !nested.is_empty() {
        return nested
            .iter()
            .map(|it| make(it.item_name(), it.line_code()))
            .collect();
    }

    let top_name = order.item_name();
    let top_code = order.top_level_code();
    if !top_name.is_empty() || !top_code.is_empty() {
        return vec![make(top_name, top_code)];
    }

    if !related.is_empty() {
        if supplier.is_empty() {
            *supplier = related[0].supplier().trim().to_string();
        }
        return related
            .iter()
            .map(|p| make(p.item_name(), p.top_level_code()))
            .collect();
    }

    vec![ReceiptLine::blank("", "")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use serde_json::json;

    fn sources(v: serde_json::Value) -> Vec<SourceEntry> {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn second_import_of_unchanged_sources_is_a_no_op() {
        let orders = sources(json!([
            { "poNo": "PO-1", "indentNo": "IND-1", "supplierName": "Acme", "itemCode": "A1", "itemName": "Bolt", "purchaseQty": 12 },
            { "poNo": "PO-2", "items": [{ "itemCode": "B1", "itemName": "Nut" }, { "Code": "B2" }] }
        ]));
        let resolver = MatchResolver::new(&orders, &[]);
        let mut tracker = ImportTracker::new();
        let tombstones = Tombstones::new();

        let first = tracker.import_all(&orders, &[], &[], &tombstones, &resolver, false);
        assert_eq!(first.summary(), ImportSummary { created: 2, patched: 0 });
        assert_eq!(first.created[0].items[0].po_qty, Some(BigDecimal::from(12)));
        assert_eq!(first.created[1].items.len(), 2);

        let second = tracker.import_all(&orders, &[], &first.created, &tombstones, &resolver, false);
        assert!(second.summary().is_nothing());
    }

    #[test]
    fn tombstoned_order_is_skipped_unless_forced() {
        let orders = sources(json!([{ "poNo": "PO-9", "itemCode": "Z1" }]));
        let resolver = MatchResolver::new(&orders, &[]);
        let mut tracker = ImportTracker::new();
        let mut tombstones = Tombstones::new();
        tombstones.bury("PO-9");

        assert!(tracker
            .import_all(&orders, &[], &[], &tombstones, &resolver, false)
            .summary()
            .is_nothing());
        let forced = tracker.import_all(&orders, &[], &[], &tombstones, &resolver, true);
        assert_eq!(forced.created.len(), 1);
    }

    #[test]
    fn existing_receipt_only_gets_missing_fields() {
        let orders = sources(json!([{ "poNo": "PO-3", "indentNo": "IND-3", "supplierName": "Beta" }]));
        let purchase = sources(json!([{ "poNo": "PO-3", "oaNo": "OA-77", "itemCode": "C1", "itemName": "Gear" }]));
        let resolver = MatchResolver::new(&orders, &purchase);
        let existing = vec![ReceiptRecord {
            id: Some("r1".into()),
            po_no: "PO-3".into(),
            supplier_name: "User Typed".into(),
            invoice_no: "INV-1".into(),
            ..ReceiptRecord::default()
        }];

        let mut tracker = ImportTracker::new();
        let plan = tracker.import_all(&orders, &purchase, &existing, &Tombstones::new(), &resolver, true);

        assert_eq!(plan.summary(), ImportSummary { created: 0, patched: 1 });
        let rec = &plan.patched[0];
        assert_eq!(rec.supplier_name, "User Typed");
        assert_eq!(rec.invoice_no, "INV-1");
        assert_eq!(rec.oa_no, "OA-77");
        assert_eq!(rec.items[0].item_code, "C1");
    }

    #[test]
    fn seeded_keys_suppress_import() {
        let orders = sources(json!([{ "poNo": "po-4" }]));
        let mut tracker = ImportTracker::new();
        tracker.seed(&[ReceiptRecord { po_no: "PO-4".into(), ..ReceiptRecord::default() }]);
        assert!(tracker.is_processed("PO-4"));

        let plan = tracker.import_all(&orders, &[], &[], &Tombstones::new(), &MatchResolver::default(), false);
        assert!(plan.summary().is_nothing());
    }
}
