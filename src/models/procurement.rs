use super::loose::{de_opt_qty, de_string};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 请购行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndentStatus {
    #[default]
    Open,
    Closed,
    Partial,
}

impl IndentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndentStatus::Open => "Open",
            IndentStatus::Closed => "Closed",
            IndentStatus::Partial => "Partial",
        }
    }

    /// 未知文本按 Open 处理
    pub fn from_text(text: &str) -> Self {
        match text.trim().to_ascii_lowercase().as_str() {
            "closed" => IndentStatus::Closed,
            "partial" => IndentStatus::Partial,
            _ => IndentStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, IndentStatus::Open)
    }
}

impl fmt::Display for IndentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for IndentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IndentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = de_string(deserializer)?;
        Ok(IndentStatus::from_text(&text))
    }
}

/// 采购记录 (purchaseData)
///
/// 身份键为规范化后的 `(indentNo, itemCode)`。PO 号、供应商、下单日期由用户在
/// 导入后手工维护, 自动流程不得覆盖。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawProcurement", rename_all = "camelCase")]
pub struct ProcurementRecord {
    #[serde(skip)]
    pub id: Option<String>,
    pub order_place_date: String,
    pub po_no: String,
    pub supplier_name: String,
    pub item_name: String,
    pub item_code: String,
    pub indent_no: String,
    pub indent_date: String,
    pub indent_by: String,
    pub oa_no: String,
    pub original_indent_qty: BigDecimal,
    pub purchase_qty: BigDecimal,
    pub current_stock: BigDecimal,
    pub indent_status: IndentStatus,
    pub received_qty: BigDecimal,
    pub ok_qty: BigDecimal,
    pub rejected_qty: BigDecimal,
    pub grn_no: String,
    pub debit_note_or_qty_returned: String,
    pub remarks: String,
}

impl Default for ProcurementRecord {
    fn default() -> Self {
        Self {
            id: None,
            order_place_date: String::new(),
            po_no: String::new(),
            supplier_name: String::new(),
            item_name: String::new(),
            item_code: String::new(),
            indent_no: String::new(),
            indent_date: String::new(),
            indent_by: String::new(),
            oa_no: String::new(),
            original_indent_qty: BigDecimal::zero(),
            purchase_qty: BigDecimal::zero(),
            current_stock: BigDecimal::zero(),
            indent_status: IndentStatus::Open,
            received_qty: BigDecimal::zero(),
            ok_qty: BigDecimal::zero(),
            rejected_qty: BigDecimal::zero(),
            grn_no: String::new(),
            debit_note_or_qty_returned: String::new(),
            remarks: String::new(),
        }
    }
}

/// 文档原始形态, 兼容旧字段 (qty / poQty / inStock)
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawProcurement {
    #[serde(deserialize_with = "de_string")]
    order_place_date: String,
    #[serde(deserialize_with = "de_string")]
    po_no: String,
    #[serde(deserialize_with = "de_string")]
    supplier_name: String,
    #[serde(deserialize_with = "de_string")]
    item_name: String,
    #[serde(deserialize_with = "de_string")]
    item_code: String,
    #[serde(deserialize_with = "de_string")]
    indent_no: String,
    #[serde(deserialize_with = "de_string")]
    indent_date: String,
    #[serde(deserialize_with = "de_string")]
    indent_by: String,
    #[serde(deserialize_with = "de_string")]
    oa_no: String,
    #[serde(deserialize_with = "de_opt_qty")]
    original_indent_qty: Option<BigDecimal>,
    #[serde(deserialize_with = "de_opt_qty")]
    purchase_qty: Option<BigDecimal>,
    #[serde(deserialize_with = "de_opt_qty")]
    po_qty: Option<BigDecimal>,
    #[serde(deserialize_with = "de_opt_qty")]
    qty: Option<BigDecimal>,
    #[serde(deserialize_with = "de_opt_qty")]
    current_stock: Option<BigDecimal>,
    #[serde(deserialize_with = "de_opt_qty")]
    in_stock: Option<BigDecimal>,
    indent_status: IndentStatus,
    #[serde(deserialize_with = "de_opt_qty")]
    received_qty: Option<BigDecimal>,
    #[serde(deserialize_with = "de_opt_qty")]
    ok_qty: Option<BigDecimal>,
    #[serde(deserialize_with = "de_opt_qty")]
    rejected_qty: Option<BigDecimal>,
    #[serde(deserialize_with = "de_string")]
    grn_no: String,
    #[serde(deserialize_with = "de_string")]
    debit_note_or_qty_returned: String,
    #[serde(deserialize_with = "de_string")]
    remarks: String,
}

impl From<RawProcurement> for ProcurementRecord {
    fn from(raw: RawProcurement) -> Self {
        let zero = BigDecimal::zero;
        Self {
            id: None,
            order_place_date: raw.order_place_date,
            po_no: raw.po_no,
            supplier_name: raw.supplier_name,
            item_name: raw.item_name,
            item_code: raw.item_code,
            indent_no: raw.indent_no,
            indent_date: raw.indent_date,
            indent_by: raw.indent_by,
            oa_no: raw.oa_no,
            original_indent_qty: raw.original_indent_qty.or_else(|| raw.qty.clone()).unwrap_or_else(zero),
            purchase_qty: raw
                .purchase_qty
                .or(raw.po_qty)
                .or(raw.qty)
                .unwrap_or_else(zero),
            current_stock: raw.current_stock.or(raw.in_stock).unwrap_or_else(zero),
            indent_status: raw.indent_status,
            received_qty: raw.received_qty.unwrap_or_else(zero),
            ok_qty: raw.ok_qty.unwrap_or_else(zero),
            rejected_qty: raw.rejected_qty.unwrap_or_else(zero),
            grn_no: raw.grn_no,
            debit_note_or_qty_returned: raw.debit_note_or_qty_returned,
            remarks: raw.remarks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_quantity_fields_are_migrated() {
        let rec: ProcurementRecord = serde_json::from_value(json!({
            "indentNo": "IND-1",
            "itemCode": "A1",
            "qty": "12",
            "inStock": 4,
            "indentStatus": "closed"
        }))
        .unwrap();

        assert_eq!(rec.original_indent_qty, BigDecimal::from(12));
        assert_eq!(rec.purchase_qty, BigDecimal::from(12));
        assert_eq!(rec.current_stock, BigDecimal::from(4));
        assert_eq!(rec.indent_status, IndentStatus::Closed);
        assert_eq!(rec.ok_qty, BigDecimal::zero());
    }

    #[test]
    fn explicit_purchase_qty_wins_over_legacy_fields() {
        let rec: ProcurementRecord = serde_json::from_value(json!({
            "purchaseQty": 0,
            "poQty": 7,
            "indentStatus": null
        }))
        .unwrap();

        assert_eq!(rec.purchase_qty, BigDecimal::zero());
        assert_eq!(rec.indent_status, IndentStatus::Open);
    }
}
