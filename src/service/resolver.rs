//! 订货数量匹配
//!
//! 同一张订单可能同时出现在 purchaseOrders (主集合) 和 purchaseData (次集合) 中。
//! 先按 `(poNo, indentNo, code)` 合并两个集合, 次集合后写入, 键冲突时覆盖主集合;
//! 然后按固定优先级查找第一个命中条目并取其数量。

use super::keys::{normalize, KEY_SEPARATOR};
use crate::models::{MatchDetails, MatchStep, SourceEntry};
use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;

const STEPS: [MatchStep; 4] = [
    MatchStep::PoAndCode,
    MatchStep::IndentAndCode,
    MatchStep::PoOnly,
    MatchStep::CodeAny,
];

/// 合并后的条目及预先规范化的字段
#[derive(Debug, Clone)]
struct MergedEntry {
    po: String,
    indent: String,
    codes: Vec<String>,
    entry: SourceEntry,
}

impl MergedEntry {
    fn new(entry: SourceEntry) -> Self {
        Self {
            po: normalize(&entry.po_no()),
            indent: normalize(&entry.indent_no()),
            codes: entry.candidate_codes().map(|c| normalize(&c)).collect(),
            entry,
        }
    }

    fn has_code(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }
}

/// 匹配器, 构建一次后可重复查询; 纯函数, 不写库
#[derive(Debug, Clone, Default)]
pub struct MatchResolver {
    merged: IndexMap<String, MergedEntry>,
}

impl MatchResolver {
    pub fn new(primary: &[SourceEntry], secondary: &[SourceEntry]) -> Self {
        let mut merged = IndexMap::with_capacity(primary.len() + secondary.len());
        for entry in primary.iter().chain(secondary.iter()) {
            let key = format!(
                "{}{sep}{}{sep}{}",
                normalize(&entry.po_no()),
                normalize(&entry.indent_no()),
                normalize(&entry.primary_code()),
                sep = KEY_SEPARATOR
            );
            merged.insert(key, MergedEntry::new(entry.clone()));
        }
        Self { merged }
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    fn find(&self, step: MatchStep, po: &str, indent: &str, code: &str) -> Option<&MergedEntry> {
        let mut entries = self.merged.values();
        match step {
            MatchStep::PoAndCode => {
                if po.is_empty() || code.is_empty() {
                    return None;
                }
                entries.find(|e| e.po == po && e.has_code(code))
            }
            MatchStep::IndentAndCode => {
                if indent.is_empty() || code.is_empty() {
                    return None;
                }
                entries.find(|e| e.indent == indent && e.has_code(code))
            }
            MatchStep::PoOnly => {
                if po.is_empty() {
                    return None;
                }
                entries.find(|e| e.po == po)
            }
            MatchStep::CodeAny => {
                if code.is_empty() {
                    return None;
                }
                entries.find(|e| e.has_code(code))
            }
        }
    }

    /// 按优先级返回第一个命中的条目
    pub fn resolve_entry(&self, po_no: &str, indent_no: &str, item_code: &str) -> Option<(MatchStep, &SourceEntry)> {
        let (po, indent, code) = (normalize(po_no), normalize(indent_no), normalize(item_code));
        STEPS
            .iter()
            .find_map(|step| self.find(*step, &po, &indent, &code).map(|e| (*step, &e.entry)))
    }

    /// 订货数量, 无命中为 0
    pub fn resolve(&self, po_no: &str, indent_no: &str, item_code: &str) -> BigDecimal {
        self.resolve_entry(po_no, indent_no, item_code)
            .map(|(_, entry)| entry.order_qty())
            .unwrap_or_else(BigDecimal::zero)
    }

    /// 诊断版: 额外返回命中的步骤、条目以及尝试过的步骤
    pub fn explain(&self, po_no: &str, indent_no: &str, item_code: &str) -> MatchDetails {
        let (po, indent, code) = (normalize(po_no), normalize(indent_no), normalize(item_code));
        let mut details = MatchDetails {
            po_no: po_no.to_string(),
            indent_no: indent_no.to_string(),
            item_code: item_code.to_string(),
            attempted: Vec::new(),
            matched_step: None,
            matched_entry: None,
            qty: BigDecimal::zero(),
        };

        for step in STEPS {
            details.attempted.push(step);
            if let Some(hit) = self.find(step, &po, &indent, &code) {
                details.matched_step = Some(step);
                details.qty = hit.entry.order_qty();
                details.matched_entry = Some(hit.entry.clone());
                break;
            }
        }

        tracing::debug!(
            "match po={} indent={} code={} -> {:?} (tried {})",
            po_no,
            indent_no,
            item_code,
            details.matched_step,
            details.attempted.len()
        );
        details
    }
}
