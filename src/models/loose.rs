//! 宽松字段解析
//!
//! 文档库里的数据来自多个录入入口, 同一含义的字段可能有多个别名,
//! 数量可能是数字、带千分位的字符串, 甚至缺失。这里统一处理:
//! 解析不出的数量一律按 0 处理, 不报错。

use bigdecimal::{BigDecimal, Zero};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::OnceLock;

fn number_run() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").ok()).as_ref()
}

/// 任意值转字符串: null -> "", 数字/布尔按文本输出
pub fn loose_str(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// 严格数值: JSON 数字, 或去掉空白和千分位后能完整解析的字符串
pub fn numeric(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            if cleaned.is_empty() {
                return None;
            }
            BigDecimal::from_str(&cleaned).ok()
        }
        Value::Bool(b) => Some(BigDecimal::from(i32::from(*b))),
        _ => None,
    }
}

/// 宽松数量: 严格解析失败时取文本中第一段数字, 仍失败则为 0
pub fn lenient_qty(value: &Value) -> BigDecimal {
    if let Some(n) = numeric(value) {
        return n;
    }
    if let Value::String(s) = value {
        let cleaned = s.replace(',', "");
        if let Some(m) = number_run().and_then(|re| re.find(&cleaned)) {
            if let Ok(n) = BigDecimal::from_str(m.as_str()) {
                return n;
            }
        }
    }
    BigDecimal::zero()
}

/// 别名链中第一个存在且非 null 的字段
pub fn first_present<'a>(fields: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|alias| fields.get(*alias))
        .find(|v| !v.is_null())
}

/// 别名链中第一个非空字符串
pub fn first_text(fields: &Map<String, Value>, aliases: &[&str]) -> String {
    aliases
        .iter()
        .filter_map(|alias| fields.get(*alias))
        .map(loose_str)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// serde: 宽松字符串
pub fn de_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(loose_str(&value))
}

/// serde: 宽松数量, 缺失/非数字为 0
pub fn de_qty<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(lenient_qty(&value))
}

/// serde: 可选数量, null 视为缺失
pub fn de_opt_qty<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(lenient_qty(&value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_accepts_numbers_and_clean_strings() {
        assert_eq!(numeric(&json!(12)), Some(BigDecimal::from(12)));
        assert_eq!(numeric(&json!(" 1,200 ")), Some(BigDecimal::from(1200)));
        assert_eq!(numeric(&json!("abc")), None);
        assert_eq!(numeric(&json!("")), None);
        assert_eq!(numeric(&Value::Null), None);
    }

    #[test]
    fn lenient_qty_extracts_first_number_or_zero() {
        assert_eq!(lenient_qty(&json!("40 pcs")), BigDecimal::from(40));
        assert_eq!(lenient_qty(&json!("n/a")), BigDecimal::zero());
        assert_eq!(lenient_qty(&Value::Null), BigDecimal::zero());
    }

    #[test]
    fn first_present_skips_null_aliases() {
        let fields = json!({ "purchaseQty": null, "poQty": 0, "qty": 9 });
        let fields = fields.as_object().unwrap();
        assert_eq!(
            first_present(fields, &["purchaseQty", "poQty", "qty"]),
            Some(&json!(0))
        );
        assert_eq!(first_present(fields, &["missing"]), None);
    }
}
