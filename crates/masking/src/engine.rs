use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::MaskRule;

/// Roles that see raw values unless configured otherwise.
pub const DEFAULT_UNMASK_ROLES: &[&str] = &["admin"];

/// Output of the `redact` rule.
pub const REDACTED: &str = "[REDACTED]";

const HASH_PREFIX_LEN: usize = 12;

/// Masks one value for one role.
///
/// Roles listed in `unmask_roles` get the value back untouched, as do null
/// and empty-string values regardless of role.
pub fn mask_value<S: AsRef<str>>(
    value: &Value,
    rule: &MaskRule,
    role: &str,
    unmask_roles: &[S],
) -> Value {
    if unmask_roles.iter().any(|r| r.as_ref() == role) {
        return value.clone();
    }
    if is_empty(value) {
        return value.clone();
    }

    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    match rule {
        MaskRule::Email => Value::String(mask_email(&text)),
        MaskRule::Phone => Value::String(keep_last_four(&text, "***-***-", "***-***-****")),
        MaskRule::Ssn => Value::String(keep_last_four(&text, "***-**-", "***-**-****")),
        MaskRule::CreditCard => Value::String(keep_last_four(
            &text,
            "****-****-****-",
            "****-****-****-****",
        )),
        MaskRule::Name => Value::String(mask_name(&text)),
        MaskRule::Ip => Value::String(mask_ip(&text)),
        MaskRule::Redact => Value::String(REDACTED.to_string()),
        MaskRule::Hash => Value::String(mask_hash(&text)),
        MaskRule::NumericRound => round_numeric(value, &text),
        MaskRule::Custom { pattern } => Value::String(mask_custom(&text, pattern)),
        MaskRule::Unrecognized(tag) => {
            debug!(rule = %tag, "unrecognized masking rule, value passed through");
            value.clone()
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn mask_email(text: &str) -> String {
    let Some((local, domain)) = text.split_once('@') else {
        return "***@***.***".to_string();
    };
    let kept: String = local.chars().take(2).collect();
    format!("{kept}***@{domain}")
}

fn keep_last_four(text: &str, prefix: &str, fallback: &str) -> String {
    let digits: Vec<char> = text.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return fallback.to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("{prefix}{tail}")
}

fn mask_name(text: &str) -> String {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|token| {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(first), Some(_)) => format!("{first}***"),
                _ => "*".to_string(),
            }
        })
        .collect();
    if tokens.is_empty() {
        return "***".to_string();
    }
    tokens.join(" ")
}

fn mask_ip(text: &str) -> String {
    let octets: Vec<&str> = text.split('.').collect();
    if octets.len() == 4 {
        format!("{}.{}.***.***", octets[0], octets[1])
    } else {
        "***.***.***.***".to_string()
    }
}

fn mask_hash(text: &str) -> String {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    format!("{}...", &digest[..HASH_PREFIX_LEN])
}

fn round_numeric(value: &Value, text: &str) -> Value {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(v) = parsed.filter(|v| v.is_finite()) else {
        return Value::String("***".to_string());
    };

    let step = if v.abs() > 100.0 { 100.0 } else { 10.0 };
    let rounded = (v / step).round() * step;

    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Value::from(rounded as i64),
        Value::Number(_) => Value::from(rounded),
        _ => {
            debug!(value = %text, "numeric_round applied to text value");
            Value::String(format!("{}", rounded as i64))
        }
    }
}

fn mask_custom(text: &str, pattern: &str) -> String {
    let stars = || "*".repeat(text.chars().count());
    if pattern.is_empty() {
        return stars();
    }
    match Regex::new(pattern) {
        Ok(re) => re.replace_all(text, "*").into_owned(),
        Err(_) => stars(),
    }
}

/// Masking with a fixed set of unmask roles.
#[derive(Clone, Debug)]
pub struct MaskingEngine {
    unmask_roles: Vec<String>,
}

impl Default for MaskingEngine {
    fn default() -> Self {
        Self::new(DEFAULT_UNMASK_ROLES.iter().map(|r| r.to_string()).collect())
    }
}

impl MaskingEngine {
    pub fn new(unmask_roles: Vec<String>) -> Self {
        Self { unmask_roles }
    }

    pub fn unmask_roles(&self) -> &[String] {
        &self.unmask_roles
    }

    pub fn mask(&self, value: &Value, rule: &MaskRule, role: &str) -> Value {
        mask_value(value, rule, role, &self.unmask_roles)
    }

    /// Applies `rules` (display column name -> rule) to every row in place.
    pub fn mask_rows(
        &self,
        rows: &mut [Map<String, Value>],
        rules: &BTreeMap<String, MaskRule>,
        role: &str,
    ) {
        if rules.is_empty() || self.unmask_roles.iter().any(|r| r == role) {
            return;
        }
        for row in rows.iter_mut() {
            for (column, rule) in rules {
                if let Some(cell) = row.get_mut(column) {
                    *cell = mask_value(cell, rule, role, &self.unmask_roles);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn viewer(value: Value, rule: MaskRule) -> Value {
        mask_value(&value, &rule, "viewer", DEFAULT_UNMASK_ROLES)
    }

    #[test]
    fn test_email() {
        assert_eq!(viewer(json!("john.doe@example.com"), MaskRule::Email), json!("jo***@example.com"));
        assert_eq!(viewer(json!("c@x.com"), MaskRule::Email), json!("c***@x.com"));
        assert_eq!(viewer(json!("not-an-email"), MaskRule::Email), json!("***@***.***"));
    }

    #[test]
    fn test_last_four_rules() {
        assert_eq!(viewer(json!("+1-555-123-4567"), MaskRule::Phone), json!("***-***-4567"));
        assert_eq!(viewer(json!("123-45-6789"), MaskRule::Ssn), json!("***-**-6789"));
        assert_eq!(
            viewer(json!("4532-1234-5678-9010"), MaskRule::CreditCard),
            json!("****-****-****-9010")
        );
        assert_eq!(viewer(json!("12"), MaskRule::Phone), json!("***-***-****"));
        assert_eq!(viewer(json!(5551234567u64), MaskRule::Phone), json!("***-***-4567"));
    }

    #[test]
    fn test_name_and_ip() {
        assert_eq!(viewer(json!("John Michael Doe"), MaskRule::Name), json!("J*** M*** D***"));
        assert_eq!(viewer(json!("John"), MaskRule::Name), json!("J***"));
        assert_eq!(viewer(json!("192.168.1.100"), MaskRule::Ip), json!("192.168.***.***"));
        assert_eq!(viewer(json!("::1"), MaskRule::Ip), json!("***.***.***.***"));
    }

    #[test]
    fn test_redact_and_hash() {
        assert_eq!(viewer(json!("secret"), MaskRule::Redact), json!(REDACTED));

        let hashed = viewer(json!("secret"), MaskRule::Hash);
        let text = hashed.as_str().unwrap();
        assert_eq!(text.len(), HASH_PREFIX_LEN + 3);
        assert!(text.ends_with("..."));
        assert_eq!(hashed, viewer(json!("secret"), MaskRule::Hash));
    }

    #[test]
    fn test_numeric_round() {
        assert_eq!(viewer(json!(42), MaskRule::NumericRound), json!(40));
        assert_eq!(viewer(json!(1234), MaskRule::NumericRound), json!(1200));
        assert_eq!(viewer(json!(-157), MaskRule::NumericRound), json!(-200));
        assert_eq!(viewer(json!(47.3), MaskRule::NumericRound), json!(50.0));
        assert_eq!(viewer(json!("87"), MaskRule::NumericRound), json!("90"));
        assert_eq!(viewer(json!("n/a"), MaskRule::NumericRound), json!("***"));
    }

    #[test]
    fn test_custom_regex() {
        let rule = MaskRule::parse("custom:\\d");
        assert_eq!(viewer(json!("ab12c3"), rule), json!("ab**c*"));
        let broken = MaskRule::parse("custom:(");
        assert_eq!(viewer(json!("abc"), broken), json!("***"));
    }

    #[test]
    fn test_unrecognized_rule_fails_open() {
        assert_eq!(viewer(json!("keep me"), MaskRule::parse("rot13")), json!("keep me"));
    }

    #[test]
    fn test_empty_values_pass_through() {
        assert_eq!(viewer(Value::Null, MaskRule::Email), Value::Null);
        assert_eq!(viewer(json!(""), MaskRule::Redact), json!(""));
    }

    #[test]
    fn test_mask_rows_skips_unmask_roles() {
        let engine = MaskingEngine::default();
        let mut rules = BTreeMap::new();
        rules.insert("email".to_string(), MaskRule::Email);

        let original: Map<String, Value> =
            serde_json::from_value(json!({"id": 3, "email": "c@x.com"})).unwrap();

        let mut rows = vec![original.clone()];
        engine.mask_rows(&mut rows, &rules, "admin");
        assert_eq!(rows[0], original);

        engine.mask_rows(&mut rows, &rules, "viewer");
        assert_eq!(rows[0]["email"], json!("c***@x.com"));
        assert_eq!(rows[0]["id"], json!(3));
    }

    fn recognized_rule() -> impl Strategy<Value = MaskRule> {
        prop_oneof![
            Just(MaskRule::Email),
            Just(MaskRule::Phone),
            Just(MaskRule::Ssn),
            Just(MaskRule::CreditCard),
            Just(MaskRule::Name),
            Just(MaskRule::Ip),
            Just(MaskRule::Redact),
            Just(MaskRule::Hash),
            Just(MaskRule::NumericRound),
            Just(MaskRule::Custom { pattern: "[A-Za-z0-9]".into() }),
        ]
    }

    proptest! {
        #[test]
        fn admin_always_sees_raw_value(text in ".{0,40}", rule in recognized_rule()) {
            let value = Value::String(text);
            prop_assert_eq!(mask_value(&value, &rule, "admin", DEFAULT_UNMASK_ROLES), value);
        }

        #[test]
        fn viewer_never_sees_raw_value(text in "[a-z]{3,12}", rule in recognized_rule()) {
            let value = Value::String(text);
            prop_assert_ne!(mask_value(&value, &rule, "viewer", DEFAULT_UNMASK_ROLES), value);
        }
    }
}
