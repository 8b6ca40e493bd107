//! 实际入库汇总
//!
//! 按库存记录逐行: 所有收货明细中物料名称 (去空白) 相同者的合格数量之和,
//! 合格数量不大于 0 的明细改用收货数量。

use crate::models::{PurchaseActual, ReceiptRecord, StockRecord};
use bigdecimal::{BigDecimal, Zero};
use std::collections::HashMap;
use std::io::Write;

pub fn purchase_actuals(receipts: &[ReceiptRecord], stock: &[StockRecord]) -> Vec<PurchaseActual> {
    let mut totals: HashMap<&str, BigDecimal> = HashMap::new();
    for line in receipts.iter().flat_map(|r| r.items.iter()) {
        let name = line.item_name.trim();
        if name.is_empty() {
            continue;
        }
        let ok = if line.ok_qty > BigDecimal::zero() {
            &line.ok_qty
        } else {
            &line.qty_received
        };
        *totals.entry(name).or_insert_with(BigDecimal::zero) += ok;
    }

    stock
        .iter()
        .map(|rec| {
            let total = totals
                .get(rec.item_name.trim())
                .cloned()
                .unwrap_or_else(BigDecimal::zero);
            PurchaseActual {
                item_name: rec.item_name.clone(),
                item_code: rec.item_code.clone(),
                ok_total: total.clone(),
                purchase_actual_qty_in_store: total,
            }
        })
        .collect()
}

/// 写出 CSV (带表头)
pub fn write_csv<W: Write>(rows: &[PurchaseActual], out: W) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["itemName", "itemCode", "okTotal", "purchaseActualQtyInStore"])?;
    for row in rows {
        writer.write_record(&[
            row.item_name.clone(),
            row.item_code.clone(),
            row.ok_total.to_string(),
            row.purchase_actual_qty_in_store.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReceiptLine;

    fn line(name: &str, received: i32, ok: i32) -> ReceiptLine {
        ReceiptLine {
            qty_received: BigDecimal::from(received),
            ok_qty: BigDecimal::from(ok),
            ..ReceiptLine::blank(name, "")
        }
    }

    #[test]
    fn ok_qty_falls_back_to_received_and_names_are_trimmed() {
        let receipts = vec![ReceiptRecord {
            items: vec![line("Bolt ", 10, 8), line(" Bolt", 5, 0), line("", 3, 3)],
            ..ReceiptRecord::default()
        }];
        let stock = vec![
            StockRecord {
                item_name: "Bolt".into(),
                item_code: "A1".into(),
                ..StockRecord::default()
            },
            StockRecord {
                item_name: "Nut".into(),
                item_code: "B1".into(),
                ..StockRecord::default()
            },
        ];

        let rows = purchase_actuals(&receipts, &stock);
        assert_eq!(rows[0].ok_total, BigDecimal::from(13));
        assert_eq!(rows[0].purchase_actual_qty_in_store, BigDecimal::from(13));
        assert_eq!(rows[1].ok_total, BigDecimal::zero());
    }

    #[test]
    fn csv_has_header_and_one_row_per_stock_record() {
        let rows = vec![PurchaseActual {
            item_name: "Bolt".into(),
            item_code: "A1".into(),
            ok_total: BigDecimal::from(13),
            purchase_actual_qty_in_store: BigDecimal::from(13),
        }];
        let mut buf = Vec::new();
        write_csv(&rows, &mut buf).unwrap();

        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "itemName,itemCode,okTotal,purchaseActualQtyInStore\nBolt,A1,13,13\n");
    }
}
