use super::loose::{de_opt_qty, de_qty, de_string};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

/// 收货单明细 (PSIR item)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReceiptLine {
    #[serde(deserialize_with = "de_string")]
    pub item_name: String,
    #[serde(deserialize_with = "de_string")]
    pub item_code: String,
    #[serde(deserialize_with = "de_qty")]
    pub qty_received: BigDecimal,
    #[serde(deserialize_with = "de_qty")]
    pub ok_qty: BigDecimal,
    #[serde(deserialize_with = "de_qty")]
    pub reject_qty: BigDecimal,
    #[serde(deserialize_with = "de_string")]
    pub grn_no: String,
    #[serde(deserialize_with = "de_string")]
    pub remarks: String,
    /// 订货数量缓存, 由匹配器重算, 不是数据源
    #[serde(deserialize_with = "de_opt_qty", skip_serializing_if = "Option::is_none")]
    pub po_qty: Option<BigDecimal>,
}

impl Default for ReceiptLine {
    fn default() -> Self {
        Self {
            item_name: String::new(),
            item_code: String::new(),
            qty_received: BigDecimal::zero(),
            ok_qty: BigDecimal::zero(),
            reject_qty: BigDecimal::zero(),
            grn_no: String::new(),
            remarks: String::new(),
            po_qty: None,
        }
    }
}

impl ReceiptLine {
    /// 导入生成的空白明细
    pub fn blank(item_name: impl Into<String>, item_code: impl Into<String>) -> Self {
        Self {
            item_name: item_name.into(),
            item_code: item_code.into(),
            ..Self::default()
        }
    }
}

/// 收货单 (PSIR)
///
/// 明细为空的收货单视为已删除, 不得持久化。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReceiptRecord {
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(deserialize_with = "de_string")]
    pub received_date: String,
    #[serde(deserialize_with = "de_string")]
    pub indent_no: String,
    #[serde(deserialize_with = "de_string")]
    pub po_no: String,
    #[serde(deserialize_with = "de_string")]
    pub oa_no: String,
    #[serde(deserialize_with = "de_string")]
    pub batch_no: String,
    #[serde(deserialize_with = "de_string")]
    pub invoice_no: String,
    #[serde(deserialize_with = "de_string")]
    pub supplier_name: String,
    #[serde(deserialize_with = "de_lines")]
    pub items: Vec<ReceiptLine>,
}

/// items 字段不是数组时按空列表处理
fn de_lines<'de, D>(deserializer: D) -> Result<Vec<ReceiptLine>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Array(_) => serde_json::from_value(value).map_err(serde::de::Error::custom),
        _ => Ok(Vec::new()),
    }
}

impl ReceiptRecord {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 表头必填项校验, 返回缺失字段名
    pub fn missing_header_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let checks = [
            ("receivedDate", &self.received_date),
            ("indentNo", &self.indent_no),
            ("poNo", &self.po_no),
            ("invoiceNo", &self.invoice_no),
            ("supplierName", &self.supplier_name),
        ];
        for (name, value) in checks {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        if self.items.is_empty() {
            missing.push("items");
        }
        missing
    }
}

/// 来料检验记录 (VSIR), 每条记录一行物料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InspectionRecord {
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(deserialize_with = "de_string")]
    pub received_date: String,
    #[serde(deserialize_with = "de_string")]
    pub indent_no: String,
    #[serde(deserialize_with = "de_string")]
    pub po_no: String,
    #[serde(deserialize_with = "de_string")]
    pub oa_no: String,
    #[serde(deserialize_with = "de_string")]
    pub purchase_batch_no: String,
    #[serde(deserialize_with = "de_string")]
    pub vendor_batch_no: String,
    #[serde(deserialize_with = "de_string")]
    pub dc_no: String,
    #[serde(deserialize_with = "de_string")]
    pub invoice_dc_no: String,
    #[serde(deserialize_with = "de_string")]
    pub vendor_name: String,
    #[serde(deserialize_with = "de_string")]
    pub item_name: String,
    #[serde(deserialize_with = "de_string")]
    pub item_code: String,
    #[serde(deserialize_with = "de_qty")]
    pub qty_received: BigDecimal,
    #[serde(deserialize_with = "de_qty")]
    pub ok_qty: BigDecimal,
    #[serde(deserialize_with = "de_qty")]
    pub rework_qty: BigDecimal,
    #[serde(deserialize_with = "de_qty")]
    pub reject_qty: BigDecimal,
    #[serde(deserialize_with = "de_string")]
    pub grn_no: String,
    #[serde(deserialize_with = "de_string")]
    pub remarks: String,
}

impl Default for InspectionRecord {
    fn default() -> Self {
        Self {
            id: None,
            received_date: String::new(),
            indent_no: String::new(),
            po_no: String::new(),
            oa_no: String::new(),
            purchase_batch_no: String::new(),
            vendor_batch_no: String::new(),
            dc_no: String::new(),
            invoice_dc_no: String::new(),
            vendor_name: String::new(),
            item_name: String::new(),
            item_code: String::new(),
            qty_received: BigDecimal::zero(),
            ok_qty: BigDecimal::zero(),
            rework_qty: BigDecimal::zero(),
            reject_qty: BigDecimal::zero(),
            grn_no: String::new(),
            remarks: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receipt_tolerates_missing_and_malformed_fields() {
        let rec: ReceiptRecord = serde_json::from_value(json!({
            "poNo": 4711,
            "items": [{ "itemCode": "A1", "qtyReceived": "5", "okQty": null }]
        }))
        .unwrap();

        assert_eq!(rec.po_no, "4711");
        assert_eq!(rec.items.len(), 1);
        assert_eq!(rec.items[0].qty_received, BigDecimal::from(5));
        assert_eq!(rec.items[0].ok_qty, BigDecimal::zero());
        assert_eq!(rec.items[0].po_qty, None);
    }

    #[test]
    fn non_array_items_read_as_empty_receipt() {
        let rec: ReceiptRecord = serde_json::from_value(json!({ "poNo": "PO-1", "items": "x" })).unwrap();
        assert!(rec.is_empty());
        assert!(rec.missing_header_fields().contains(&"items"));
    }
}
