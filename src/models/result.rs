use super::{IndentStatus, ReceiptRecord, SourceEntry};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 实时库存显示值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStock {
    pub display: BigDecimal,
    pub is_short: bool,
    pub status: IndentStatus,
}

/// 匹配优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStep {
    /// 订单号 + 物料编码
    PoAndCode,
    /// 请购号 + 物料编码
    IndentAndCode,
    /// 仅订单号
    PoOnly,
    /// 仅物料编码 (任意订单)
    CodeAny,
}

/// 诊断版匹配结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetails {
    pub po_no: String,
    pub indent_no: String,
    pub item_code: String,
    pub attempted: Vec<MatchStep>,
    pub matched_step: Option<MatchStep>,
    pub matched_entry: Option<SourceEntry>,
    pub qty: BigDecimal,
}

/// 收货单导入统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub created: usize,
    pub patched: usize,
}

impl ImportSummary {
    /// 没有任何可导入内容
    pub fn is_nothing(&self) -> bool {
        self.created == 0 && self.patched == 0
    }
}

/// 请购导入统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndentImportSummary {
    pub created: usize,
    pub updated: usize,
}

/// 待清理的孤儿记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanRef {
    pub id: String,
    /// 订单键 (墓碑登记用)
    pub key: String,
}

/// 孤儿清理计划
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanSweep {
    pub receipts: Vec<OrphanRef>,
    pub inspections: Vec<OrphanRef>,
}

impl OrphanSweep {
    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty() && self.inspections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receipts.len() + self.inspections.len()
    }
}

/// 修复结果: 仅包含实际改动的收货单
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepairOutcome {
    pub changed: Vec<ReceiptRecord>,
    pub restored_lines: usize,
}

/// 实际入库汇总 (按库存记录逐行)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseActual {
    pub item_name: String,
    pub item_code: String,
    pub ok_total: BigDecimal,
    pub purchase_actual_qty_in_store: BigDecimal,
}
