use super::loose::{de_qty, de_string};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

/// 库存记录 (stockRecords), 只读输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StockRecord {
    #[serde(deserialize_with = "de_string")]
    pub item_code: String,
    #[serde(deserialize_with = "de_string")]
    pub item_name: String,
    #[serde(deserialize_with = "de_qty")]
    pub closing_stock: BigDecimal,
}

impl Default for StockRecord {
    fn default() -> Self {
        Self {
            item_code: String::new(),
            item_name: String::new(),
            closing_stock: BigDecimal::zero(),
        }
    }
}

/// 物料主数据 (itemMaster), 名称与编码对照
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemMasterEntry {
    #[serde(deserialize_with = "de_string")]
    pub item_name: String,
    #[serde(deserialize_with = "de_string")]
    pub item_code: String,
}
