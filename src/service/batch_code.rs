//! 收货批次号分配
//!
//! 格式 `<两位年份>/P<n>`: 取所有现有批次号中 `P<数字>` 的最大值加 1, 不区分年份,
//! 前缀使用当前年份。并发分配不做唯一性校验, 两个调用方基于同一份旧数据
//! 可能得到相同批次号, 这是已接受的限制。

use crate::models::ReceiptRecord;
use chrono::{Datelike, Local};
use regex::Regex;
use std::sync::OnceLock;

fn batch_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"P(\d+)").ok()).as_ref()
}

/// 批次号中的序号, 无法识别时为 None
pub fn batch_sequence(batch_no: &str) -> Option<u64> {
    let caps = batch_pattern()?.captures(batch_no)?;
    caps.get(1)?.as_str().parse::<u64>().ok().filter(|n| *n > 0)
}

#[derive(Debug, Clone, Copy)]
pub struct BatchCodeAllocator {
    year: i32,
}

impl BatchCodeAllocator {
    pub fn for_year(year: i32) -> Self {
        Self { year }
    }

    /// 以本地当前年份分配
    pub fn current() -> Self {
        Self::for_year(Local::now().year())
    }

    /// 下一个批次号; 对同一输入是纯函数
    pub fn next_code<'a, I>(&self, batch_codes: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let max = batch_codes.into_iter().filter_map(batch_sequence).max().unwrap_or(0);
        format!("{:02}/P{}", self.year.rem_euclid(100), max + 1)
    }

    pub fn next_for(&self, receipts: &[ReceiptRecord]) -> String {
        self.next_code(receipts.iter().map(|r| r.batch_no.as_str()))
    }
}

impl Default for BatchCodeAllocator {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_code_is_max_plus_one_with_current_year() {
        let alloc = BatchCodeAllocator::for_year(2024);
        assert_eq!(alloc.next_code(["24/P3", "24/P7"]), "24/P8");
        assert_eq!(alloc.next_code(["24/P7", "24/P3"]), "24/P8");
    }

    #[test]
    fn allocation_is_pure_and_ignores_year_prefix() {
        let alloc = BatchCodeAllocator::for_year(2025);
        let existing = ["23/P12", "", "manual", "24/P2"];
        assert_eq!(alloc.next_code(existing), "25/P13");
        assert_eq!(alloc.next_code(existing), "25/P13");
    }

    #[test]
    fn first_code_starts_at_one() {
        let alloc = BatchCodeAllocator::for_year(2009);
        assert_eq!(alloc.next_for(&[]), "09/P1");
        assert_eq!(batch_sequence("24/P0"), None);
    }
}
