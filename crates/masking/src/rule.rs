use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Masking rule attached to a column.
///
/// Rules are persisted and exchanged by their tag (`"email"`,
/// `"custom:<regex>"`, ...). Parsing never fails: a tag that names no known
/// rule becomes [`MaskRule::Unrecognized`] and keeps its original spelling.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MaskRule {
    /// `john.doe@example.com` -> `jo***@example.com`
    Email,
    /// `+1-555-123-4567` -> `***-***-4567`
    Phone,
    /// `123-45-6789` -> `***-**-6789`
    Ssn,
    /// `4532-1234-5678-9010` -> `****-****-****-9010`
    CreditCard,
    /// `John Michael Doe` -> `J*** M*** D***`
    Name,
    /// `192.168.1.100` -> `192.168.***.***`
    Ip,
    /// Constant placeholder.
    Redact,
    /// Truncated SHA-256 digest.
    Hash,
    /// Nearest 10, or nearest 100 above magnitude 100.
    NumericRound,
    /// Every match of `pattern` is replaced with `*`.
    Custom { pattern: String },
    /// Unknown tag. Values pass through unmasked.
    Unrecognized(String),
}

const CUSTOM_PREFIX: &str = "custom:";

impl MaskRule {
    pub fn parse(tag: &str) -> Self {
        let trimmed = tag.trim();
        if let Some(pattern) = trimmed.strip_prefix(CUSTOM_PREFIX) {
            return MaskRule::Custom {
                pattern: pattern.to_string(),
            };
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "email" => MaskRule::Email,
            "phone" => MaskRule::Phone,
            "ssn" => MaskRule::Ssn,
            "credit_card" => MaskRule::CreditCard,
            "name" => MaskRule::Name,
            "ip" => MaskRule::Ip,
            "redact" => MaskRule::Redact,
            "hash" => MaskRule::Hash,
            "numeric_round" => MaskRule::NumericRound,
            _ => MaskRule::Unrecognized(tag.to_string()),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, MaskRule::Unrecognized(_))
    }
}

impl fmt::Display for MaskRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskRule::Email => f.write_str("email"),
            MaskRule::Phone => f.write_str("phone"),
            MaskRule::Ssn => f.write_str("ssn"),
            MaskRule::CreditCard => f.write_str("credit_card"),
            MaskRule::Name => f.write_str("name"),
            MaskRule::Ip => f.write_str("ip"),
            MaskRule::Redact => f.write_str("redact"),
            MaskRule::Hash => f.write_str("hash"),
            MaskRule::NumericRound => f.write_str("numeric_round"),
            MaskRule::Custom { pattern } => write!(f, "{CUSTOM_PREFIX}{pattern}"),
            MaskRule::Unrecognized(tag) => f.write_str(tag),
        }
    }
}

impl FromStr for MaskRule {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MaskRule::parse(s))
    }
}

impl From<String> for MaskRule {
    fn from(tag: String) -> Self {
        MaskRule::parse(&tag)
    }
}

impl From<MaskRule> for String {
    fn from(rule: MaskRule) -> Self {
        rule.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tags() {
        assert_eq!(MaskRule::parse("email"), MaskRule::Email);
        assert_eq!(MaskRule::parse(" Credit_Card "), MaskRule::CreditCard);
        assert_eq!(
            MaskRule::parse("custom:\\d+"),
            MaskRule::Custom { pattern: "\\d+".into() }
        );
    }

    #[test]
    fn test_unknown_tag_is_kept_verbatim() {
        let rule = MaskRule::parse("tokenize");
        assert!(!rule.is_recognized());
        assert_eq!(rule.to_string(), "tokenize");
    }

    #[test]
    fn test_serde_uses_tag() {
        let json = serde_json::to_string(&MaskRule::NumericRound).unwrap();
        assert_eq!(json, "\"numeric_round\"");
        let back: MaskRule = serde_json::from_str("\"custom:[a-z]\"").unwrap();
        assert_eq!(back, MaskRule::Custom { pattern: "[a-z]".into() });
    }
}
