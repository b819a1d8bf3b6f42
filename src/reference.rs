//! Reference declarations
//!
//! A `Reference` declares a foreign-key-like relationship between two
//! collections: the named field of every record in `source` must hold the id
//! of an existing record in `target`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::error::SweepError;

/// Collection and field names double as SQL identifiers in the Postgres
/// backend, so the accepted alphabet is deliberately strict.
static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex"));

/// A declared foreign-key relationship between two collections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Collection whose records carry the reference field
    #[validate(length(min = 1, message = "Source collection is required"))]
    pub source: String,

    /// Field on source records holding the target id
    #[validate(length(min = 1, message = "Reference field is required"))]
    pub field: String,

    /// Collection the field must point into
    #[validate(length(min = 1, message = "Target collection is required"))]
    pub target: String,
}

impl Reference {
    pub fn new(
        source: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<Self, SweepError> {
        let reference = Self {
            source: source.into(),
            field: field.into(),
            target: target.into(),
        };
        reference.check()?;
        Ok(reference)
    }

    fn check(&self) -> Result<(), SweepError> {
        self.validate()
            .map_err(|e| SweepError::Reference(e.to_string()))?;
        for (label, value) in [
            ("source collection", &self.source),
            ("reference field", &self.field),
            ("target collection", &self.target),
        ] {
            if !IDENT_RE.is_match(value) {
                return Err(SweepError::Reference(format!(
                    "{} '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                    label, value
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}->{}", self.source, self.field, self.target)
    }
}

impl FromStr for Reference {
    type Err = SweepError;

    /// Parse the operator syntax `source.field->target`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lhs, target) = s.split_once("->").ok_or_else(|| {
            SweepError::Reference(format!(
                "expected 'source.field->target', got '{}'",
                s
            ))
        })?;
        let (source, field) = lhs.split_once('.').ok_or_else(|| {
            SweepError::Reference(format!(
                "expected 'source.field' before '->', got '{}'",
                lhs
            ))
        })?;
        Reference::new(source.trim(), field.trim(), target.trim())
    }
}

/// Validate a bare collection name against the identifier alphabet
pub fn valid_collection_name(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_operator_syntax() {
        let r: Reference = "orders.product_id->products".parse().unwrap();
        assert_eq!(r.source, "orders");
        assert_eq!(r.field, "product_id");
        assert_eq!(r.target, "products");
        assert_eq!(r.to_string(), "orders.product_id->products");
    }

    #[test]
    fn trims_whitespace_around_parts() {
        let r: Reference = "orders . product_id -> products".parse().unwrap();
        assert_eq!(r.source, "orders");
        assert_eq!(r.target, "products");
    }

    #[test]
    fn rejects_missing_arrow() {
        let err = "orders.product_id".parse::<Reference>().unwrap_err();
        assert!(matches!(err, SweepError::Reference(_)));
    }

    #[test]
    fn rejects_missing_field() {
        let err = "orders->products".parse::<Reference>().unwrap_err();
        assert!(matches!(err, SweepError::Reference(_)));
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        assert!("ord;ers.x->t".parse::<Reference>().is_err());
        assert!("orders.x->t\"".parse::<Reference>().is_err());
        assert!(Reference::new("", "x", "t").is_err());
    }

    #[test]
    fn collection_name_guard() {
        assert!(valid_collection_name("test_orders"));
        assert!(!valid_collection_name("drop table"));
        assert!(!valid_collection_name(""));
    }
}
