//! 键规范化
//!
//! 所有跨集合关联都靠字符串键: 去首尾空白并转大写后比较, 不做任何模糊匹配。


/// 组合键分隔符
pub const KEY_SEPARATOR: char = '|';
/// 无订单号时的请购键前缀
pub const INDENT_KEY_PREFIX: &str = "INDENT::";

pub fn normalize(value: &str) -> String {
    value.trim().to_uppercase()
}

/// `(indentNo, itemCode)` 组合键
pub fn composite_key(indent_no: &str, item_code: &str) -> String {
    format!("{}{}{}", normalize(indent_no), KEY_SEPARATOR, normalize(item_code))
}

/// 只有请购号的回退键 (物料编码为空)
pub fn indent_only_key(indent_no: &str) -> String {
    composite_key(indent_no, "")
}

/// 请购形式的订单键
pub fn indent_key(indent_no: &str) -> String {
    format!("{}{}", INDENT_KEY_PREFIX, normalize(indent_no))
}

/// 收货/检验记录的逻辑键: 有订单号用订单号, 否则 `INDENT::<请购号>`
pub fn order_key(po_no: &str, indent_no: &str) -> String {
    let po = normalize(po_no);
    if po.is_empty() {
        indent_key(indent_no)
    } else {
        po
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_uppercases() {
        assert_eq!(normalize("  po-9 "), "PO-9");
    }

    #[test]
    fn composite_keys_compare_after_normalization() {
        assert_eq!(composite_key(" ind-1", "a1 "), composite_key("IND-1", "A1"));
        assert_ne!(composite_key("IND-1", "A1"), composite_key("IND-1", "A2"));
        assert_eq!(indent_only_key("ind-1"), "IND-1|");
    }

    #[test]
    fn order_key_falls_back_to_indent() {
        assert_eq!(order_key("po-9", "IND-1"), "PO-9");
        assert_eq!(order_key("  ", "ind-1"), "INDENT::IND-1");
    }
}
