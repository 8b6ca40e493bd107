//! 来源集合的宽松视图
//!
//! 订单与请购数据由多个入口写入, 字段别名不统一, 因此保留原始 JSON 对象,
//! 通过别名链读取。

use super::loose::{first_present, first_text, lenient_qty, loose_str, numeric};
use super::ProcurementRecord;
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 物料编码的全部别名
pub const CODE_ALIASES: [&str; 4] = ["itemCode", "Code", "CodeNo", "Item"];
/// 订货数量别名链
pub const ORDER_QTY_ALIASES: [&str; 4] = ["purchaseQty", "poQty", "qty", "originalIndentQty"];
/// 采购数量别名链 (修复流程使用)
pub const PURCHASE_QTY_ALIASES: [&str; 2] = ["purchaseQty", "poQty"];
/// 原始请购数量别名链
pub const ORIGINAL_QTY_ALIASES: [&str; 3] = ["originalIndentQty", "originalQty", "qty"];

const NAME_ALIASES: [&str; 3] = ["itemName", "Item", "model"];

/// 订单来源条目 (purchaseOrders / purchaseData 文档)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceEntry {
    fields: Map<String, Value>,
}

impl SourceEntry {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn text(&self, key: &str) -> String {
        self.fields.get(key).map(loose_str).unwrap_or_default()
    }

    pub fn po_no(&self) -> String {
        self.text("poNo")
    }

    pub fn indent_no(&self) -> String {
        self.text("indentNo")
    }

    pub fn oa_no(&self) -> String {
        self.text("oaNo")
    }

    pub fn supplier(&self) -> String {
        first_text(&self.fields, &["supplierName", "supplier"])
    }

    pub fn item_name(&self) -> String {
        first_text(&self.fields, &NAME_ALIASES)
    }

    /// 合并键使用的编码: itemCode || Code || Item
    pub fn primary_code(&self) -> String {
        first_text(&self.fields, &["itemCode", "Code", "Item"])
    }

    /// 订单内嵌明细的编码: itemCode || Code
    pub fn line_code(&self) -> String {
        first_text(&self.fields, &["itemCode", "Code"])
    }

    /// 顶层物料编码: itemCode || Code || CodeNo
    pub fn top_level_code(&self) -> String {
        first_text(&self.fields, &["itemCode", "Code", "CodeNo"])
    }

    /// 全部编码别名的原始取值 (缺失为空串)
    pub fn candidate_codes(&self) -> impl Iterator<Item = String> + '_ {
        CODE_ALIASES
            .iter()
            .map(move |alias| self.fields.get(*alias).map(loose_str).unwrap_or_default())
    }

    /// 按别名链取数量; 链上全部缺失或不是数字 (如 "40 pcs") 时为 0
    pub fn qty_by(&self, aliases: &[&str]) -> BigDecimal {
        first_present(&self.fields, aliases)
            .and_then(numeric)
            .unwrap_or_else(BigDecimal::zero)
    }

    pub fn order_qty(&self) -> BigDecimal {
        self.qty_by(&ORDER_QTY_ALIASES)
    }

    /// 订单内嵌明细 (items 数组中的对象)
    pub fn items(&self) -> Vec<SourceEntry> {
        match self.fields.get("items") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_object().cloned())
                .map(SourceEntry::new)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&ProcurementRecord> for SourceEntry {
    fn from(rec: &ProcurementRecord) -> Self {
        match serde_json::to_value(rec) {
            Ok(Value::Object(fields)) => SourceEntry::new(fields),
            _ => SourceEntry::default(),
        }
    }
}

/// 请购明细 (openIndentItems / closedIndentItems 文档)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndentItem {
    fields: Map<String, Value>,
}

/// 可直接覆盖显示的 "本请购可用" 字段
const AVAILABLE_OVERRIDE_ALIASES: [&str; 4] =
    ["availableForThisIndent", "allocatedAvailable", "qty1", "available"];

const STOCK_ALIASES: [&str; 12] = [
    "stock",
    "Stock",
    "currentStock",
    "Current Stock",
    "availableStock",
    "Available",
    "available",
    "instock",
    "inStock",
    "balance",
    "Balance",
    "qty1",
];

const STOCK_QTY_FALLBACK: [&str; 4] = ["quantity", "Quantity", "qty", "Qty"];

const INDENT_QTY_ALIASES: [&str; 8] = [
    "qty",
    "indentQty",
    "quantity",
    "Quantity",
    "requestedQty",
    "requiredQty",
    "Qty",
    "qty1",
];

impl IndentItem {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    fn text(&self, key: &str) -> String {
        self.fields.get(key).map(loose_str).unwrap_or_default()
    }

    pub fn indent_no(&self) -> String {
        self.text("indentNo")
    }

    pub fn item_code(&self) -> String {
        self.text("itemCode")
    }

    /// Code 别名 (部分请购单只填这一列)
    pub fn alt_code(&self) -> String {
        self.text("Code")
    }

    pub fn code(&self) -> String {
        first_text(&self.fields, &["itemCode", "Code"])
    }

    pub fn item_name(&self) -> String {
        first_text(&self.fields, &["model", "itemName", "Item", "description"])
    }

    pub fn indent_date(&self) -> String {
        first_text(&self.fields, &["date", "indentDate"])
    }

    pub fn indent_by(&self) -> String {
        self.text("indentBy")
    }

    pub fn oa_no(&self) -> String {
        first_text(&self.fields, &["oaNo", "OA"])
    }

    /// 显式的 "本请购可用数量", 第一个能解析为数字的别名
    pub fn available_override(&self) -> Option<BigDecimal> {
        AVAILABLE_OVERRIDE_ALIASES
            .iter()
            .filter_map(|alias| self.fields.get(*alias))
            .filter(|v| !v.is_null())
            .find_map(numeric)
    }

    /// 请购单上的库存: 第一个非零的库存别名, 其次数量别名, 最后 qty - issued
    pub fn stock(&self) -> BigDecimal {
        let first_non_zero = |aliases: &[&str]| {
            aliases
                .iter()
                .filter_map(|alias| self.fields.get(*alias))
                .map(lenient_qty)
                .find(|n| !n.is_zero())
        };
        if let Some(n) = first_non_zero(&STOCK_ALIASES[..]) {
            return n;
        }
        if let Some(n) = first_non_zero(&STOCK_QTY_FALLBACK[..]) {
            return n;
        }
        if let (Some(qty), Some(issued)) = (self.fields.get("qty"), self.fields.get("issued")) {
            let balance = lenient_qty(qty) - lenient_qty(issued);
            if balance >= BigDecimal::zero() {
                return balance;
            }
        }
        BigDecimal::zero()
    }

    /// 请购数量: 第一个非空且可解析的别名
    pub fn indent_qty(&self) -> BigDecimal {
        INDENT_QTY_ALIASES
            .iter()
            .filter_map(|alias| self.fields.get(*alias))
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
            .find_map(numeric)
            .unwrap_or_else(BigDecimal::zero)
    }
}

/// 请购单 (indentData), items 的存储顺序即分配顺序
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Indent {
    fields: Map<String, Value>,
}

/// 请购单内的一行
#[derive(Debug, Clone, PartialEq)]
pub struct IndentLine {
    pub item_code: String,
    /// Code || Item
    pub alt_code: String,
    pub qty: BigDecimal,
}

impl Indent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn indent_no(&self) -> String {
        self.fields.get("indentNo").map(loose_str).unwrap_or_default()
    }

    /// 明细行; 非对象的元素保留为空行以维持位置
    pub fn lines(&self) -> Vec<Option<IndentLine>> {
        match self.fields.get("items") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_object().map(|obj| IndentLine {
                        item_code: obj.get("itemCode").map(loose_str).unwrap_or_default(),
                        alt_code: first_text(obj, &["Code", "Item"]),
                        qty: obj.get("qty").and_then(numeric).unwrap_or_else(BigDecimal::zero),
                    })
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
