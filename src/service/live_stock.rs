//! 实时库存表
//!
//! 多个请购行会争用同一物料的库存。对每个 `(indentNo, itemCode)` 计算:
//! 按请购单存储顺序累计到本行为止的请购量, 与期末库存比较得出显示值和缺货标记。
//!
//! 整表在任一输入 (开放/关闭请购明细、请购单、库存记录) 变化时一次性重算,
//! 渲染和查询只做 O(1) 查表; 不允许逐行增量计算, 否则数据陆续到达时会先显示错误值。

use super::keys::{composite_key, indent_only_key, normalize};
use crate::models::{Indent, IndentItem, IndentStatus, LiveStock, StockRecord};
use bigdecimal::{BigDecimal, Zero};
use indexmap::IndexMap;
use rayon::prelude::*;
use std::collections::HashMap;

/// 累计量或自身数量与期末库存比较
///
/// 数量 > 期末库存时显示差额并标记缺货, 否则显示期末库存;
/// 数量无法确定 (0) 时直接显示期末库存。
pub fn evaluate(qty: &BigDecimal, closing: &BigDecimal) -> (BigDecimal, bool) {
    if *qty > BigDecimal::zero() && qty > closing {
        (qty - closing, true)
    } else {
        (closing.clone(), false)
    }
}

/// 某物料编码在请购单中的出现位置 (按扫描顺序)
struct CodeOccurrence {
    indent_no: String,
    qty: BigDecimal,
}

/// 待计算的一行
struct Pending<'a> {
    key: String,
    item: &'a IndentItem,
    indent_no: String,
    code: String,
    status: IndentStatus,
}

#[derive(Debug, Clone, Default)]
pub struct LiveStockMap {
    entries: IndexMap<String, LiveStock>,
}

impl LiveStockMap {
    /// 整表计算
    pub fn compute(
        open_items: &[IndentItem],
        closed_items: &[IndentItem],
        indents: &[Indent],
        stock: &[StockRecord],
    ) -> Self {
        let closing = closing_index(stock);
        let occurrences = occurrence_index(indents);

        let mut pending: IndexMap<String, Pending<'_>> = IndexMap::new();
        let tagged = open_items
            .iter()
            .map(|i| (i, IndentStatus::Open))
            .chain(closed_items.iter().map(|i| (i, IndentStatus::Closed)));
        for (item, status) in tagged {
            let indent_no = normalize(&item.indent_no());
            if indent_no.is_empty() {
                continue;
            }
            let mut codes: Vec<String> = [normalize(&item.item_code()), normalize(&item.alt_code())]
                .into_iter()
                .filter(|c| !c.is_empty())
                .collect();
            if codes.is_empty() {
                codes.push(String::new());
            }
            for code in codes {
                let key = composite_key(&indent_no, &code);
                if pending.contains_key(&key) {
                    continue;
                }
                pending.insert(
                    key.clone(),
                    Pending { key, item, indent_no: indent_no.clone(), code, status },
                );
            }
        }

        let work: Vec<Pending<'_>> = pending.into_values().collect();
        let computed: Vec<(String, LiveStock)> = work
            .par_iter()
            .map(|p| (p.key.clone(), compute_line(p, &occurrences, &closing)))
            .collect();

        tracing::debug!("live stock map rebuilt: {} keys", computed.len());
        Self {
            entries: computed.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按 `(indentNo, itemCode)` 查询, 未命中时回退到只有请购号的键
    pub fn get(&self, indent_no: &str, item_code: &str) -> Option<&LiveStock> {
        self.entries
            .get(&composite_key(indent_no, item_code))
            .or_else(|| self.entries.get(&indent_only_key(indent_no)))
    }

    /// 查询, 都未命中时使用调用方给的默认值
    pub fn get_or(&self, indent_no: &str, item_code: &str, default: LiveStock) -> LiveStock {
        self.get(indent_no, item_code).cloned().unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LiveStock)> {
        self.entries.iter()
    }
}

/// 物料编码 -> 期末库存, 同编码取第一条
fn closing_index(stock: &[StockRecord]) -> HashMap<String, BigDecimal> {
    let mut index = HashMap::with_capacity(stock.len());
    for rec in stock {
        index
            .entry(normalize(&rec.item_code))
            .or_insert_with(|| rec.closing_stock.clone());
    }
    index
}

/// 物料编码 -> 按请购单存储顺序排列的出现位置
///
/// 一行同时以 itemCode 和 Code/Item 登记, 两者相同只登记一次。
fn occurrence_index(indents: &[Indent]) -> HashMap<String, Vec<CodeOccurrence>> {
    let mut index: HashMap<String, Vec<CodeOccurrence>> = HashMap::new();
    for indent in indents {
        let indent_no = normalize(&indent.indent_no());
        for line in indent.lines().into_iter().flatten() {
            let code = normalize(&line.item_code);
            let alt = normalize(&line.alt_code);
            index.entry(code.clone()).or_default().push(CodeOccurrence {
                indent_no: indent_no.clone(),
                qty: line.qty.clone(),
            });
            if alt != code {
                index.entry(alt).or_default().push(CodeOccurrence {
                    indent_no: indent_no.clone(),
                    qty: line.qty.clone(),
                });
            }
        }
    }
    index
}

/// 从头累计到本请购第一次出现该编码的位置 (含); 找不到本行时为 0
fn cumulative(occurrences: &HashMap<String, Vec<CodeOccurrence>>, code: &str, indent_no: &str) -> BigDecimal {
    let Some(list) = occurrences.get(code) else {
        return BigDecimal::zero();
    };
    let mut total = BigDecimal::zero();
    for occ in list {
        total += &occ.qty;
        if occ.indent_no == indent_no {
            return total;
        }
    }
    BigDecimal::zero()
}

fn compute_line(
    p: &Pending<'_>,
    occurrences: &HashMap<String, Vec<CodeOccurrence>>,
    closing: &HashMap<String, BigDecimal>,
) -> LiveStock {
    if let Some(available) = p.item.available_override() {
        return LiveStock {
            display: available,
            is_short: false,
            status: p.status,
        };
    }

    let mut qty = cumulative(occurrences, &p.code, &p.indent_no);
    if qty.is_zero() {
        qty = p.item.indent_qty();
    }
    let closing = closing.get(&p.code).cloned().unwrap_or_else(BigDecimal::zero);
    let (display, is_short) = evaluate(&qty, &closing);
    LiveStock {
        display,
        is_short,
        status: p.status,
    }
}
