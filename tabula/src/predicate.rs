//! Conjunctive field/value predicates
//!
//! A [`Predicate`] is an ordered list of `field = value` clauses ANDed
//! together. Field names are validated when the predicate is built; whether a
//! field actually exists is left to the backend, which rejects unknown fields
//! with [`ExecutorErrorKind::UnknownField`](crate::executor::ExecutorErrorKind::UnknownField).
//! Values are never rendered into statement text; backends bind them.
//!
//! # Example
//!
//! ```rust
//! use tabula::predicate::{Predicate, Value};
//! use tabula::predicate;
//!
//! // Fluent builder
//! let by_slug = Predicate::builder().eq("slug", "acme").eq("active", true).build()?;
//! assert_eq!(by_slug.len(), 2);
//!
//! // Pair form
//! let same = Predicate::from_pairs([("slug", Value::from("acme")), ("active", Value::from(true))])?;
//! assert_eq!(by_slug, same);
//!
//! // Flat form, as `field, value, field, value, ...`
//! let flat = Predicate::from_flat(vec!["slug".into(), "acme".into(), "active".into(), true.into()])?;
//! assert_eq!(by_slug, flat);
//!
//! // Macro
//! let from_macro = predicate!("slug" => "acme", "active" => true)?;
//! assert_eq!(by_slug, from_macro);
//! # Ok::<(), tabula::predicate::PredicateError>(())
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("field name pattern is valid"));

/// Why a predicate could not be built
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredicateError {
    /// Flat argument list with an odd number of entries
    #[error("arguments must be field/value pairs, got {len} entries")]
    OddArity {
        /// Number of entries received
        len: usize,
    },

    /// A field slot in a flat argument list held a non-string value
    #[error("field names must be strings (argument {index} is {found})")]
    FieldNotString {
        /// Zero-based position in the flat list
        index: usize,
        /// Type of the offending value
        found: &'static str,
    },

    /// Empty or non-identifier field name
    #[error("invalid field name '{field}'")]
    InvalidFieldName {
        /// The rejected name
        field: String,
    },
}

/// A value compared against a field
///
/// Passed through to the backend opaquely; coercion is the backend's job.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// String value
    String(String),
    /// 64-bit integer value
    Integer(i64),
    /// 64-bit floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// Null value (matches `IS NULL`)
    Null,
}

impl Value {
    /// Name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::Null => "null",
        }
    }

    /// Convert to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Integer(n) => serde_json::Value::from(*n),
            Self::Float(n) => serde_json::Value::from(*n),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Null => serde_json::Value::Null,
        }
    }

    /// Equality against a stored JSON value. A missing field counts as null.
    pub fn matches(&self, stored: Option<&serde_json::Value>) -> bool {
        use serde_json::Value as J;
        match (self, stored) {
            (Self::Null, None | Some(J::Null)) => true,
            (Self::String(a), Some(J::String(b))) => a == b,
            (Self::Integer(a), Some(J::Number(b))) => match b.as_i64() {
                Some(b) => *a == b,
                None => b.as_f64() == Some(*a as f64),
            },
            (Self::Float(a), Some(J::Number(b))) => b.as_f64() == Some(*a),
            (Self::Boolean(a), Some(J::Bool(b))) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "'{}'", s),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Null => write!(f, "NULL"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    /// Timestamps compare in their serialized form, the same text the entity stores
    fn from(at: DateTime<Utc>) -> Self {
        match serde_json::to_value(at) {
            Ok(serde_json::Value::String(s)) => Self::String(s),
            _ => Self::String(at.to_rfc3339()),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One `field = value` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    /// Entity field name
    pub field: String,
    /// Value the field must equal
    pub value: Value,
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Null => write!(f, "{} IS NULL", self.field),
            ref value => write!(f, "{} = {}", self.field, value),
        }
    }
}

/// Ordered conjunction of clauses. The empty predicate matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    clauses: Vec<Clause>,
}

/// Check that a field name is a plain identifier
pub fn validate_field_name(field: &str) -> Result<(), PredicateError> {
    if FIELD_NAME.is_match(field) {
        Ok(())
    } else {
        Err(PredicateError::InvalidFieldName {
            field: field.to_string(),
        })
    }
}

impl Predicate {
    /// Start a fluent builder
    pub fn builder() -> PredicateBuilder {
        PredicateBuilder::default()
    }

    /// The predicate that matches every row
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from `(field, value)` pairs
    pub fn from_pairs<I, F, V>(pairs: I) -> Result<Self, PredicateError>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<Value>,
    {
        let clauses = pairs
            .into_iter()
            .map(|(field, value)| {
                let field = field.into();
                validate_field_name(&field)?;
                Ok(Clause {
                    field,
                    value: value.into(),
                })
            })
            .collect::<Result<Vec<_>, PredicateError>>()?;
        Ok(Self { clauses })
    }

    /// Build from a flat `field, value, field, value, ...` list.
    ///
    /// Fails on odd length or when a field slot is not a string.
    pub fn from_flat(args: Vec<Value>) -> Result<Self, PredicateError> {
        if args.len() % 2 != 0 {
            return Err(PredicateError::OddArity { len: args.len() });
        }

        let mut clauses = Vec::with_capacity(args.len() / 2);
        let mut iter = args.into_iter().enumerate();
        while let (Some((index, field)), Some((_, value))) = (iter.next(), iter.next()) {
            let field = match field {
                Value::String(field) => field,
                other => {
                    return Err(PredicateError::FieldNotString {
                        index,
                        found: other.type_name(),
                    })
                }
            };
            validate_field_name(&field)?;
            clauses.push(Clause { field, value });
        }

        Ok(Self { clauses })
    }

    /// The clauses in order
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Number of clauses
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Whether this predicate matches every row
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate against a record keyed by field name
    pub fn matches(&self, record: &crate::entity::Record) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.value.matches(record.get(&clause.field)))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "<all>");
        }
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{}", clause)?;
        }
        Ok(())
    }
}

/// Fluent builder for [`Predicate`]; validation happens in [`build`](Self::build)
#[derive(Debug, Clone, Default)]
pub struct PredicateBuilder {
    pairs: Vec<(String, Value)>,
}

impl PredicateBuilder {
    /// Add `field = value`
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.pairs.push((field.into(), value.into()));
        self
    }

    /// Add `field IS NULL`
    #[must_use]
    pub fn is_null(mut self, field: impl Into<String>) -> Self {
        self.pairs.push((field.into(), Value::Null));
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<Predicate, PredicateError> {
        Predicate::from_pairs(self.pairs)
    }
}

/// Anything a repository method accepts as a filter
pub trait IntoPredicate {
    /// Convert, validating field names and arity
    fn into_predicate(self) -> Result<Predicate, PredicateError>;
}

impl IntoPredicate for Predicate {
    fn into_predicate(self) -> Result<Predicate, PredicateError> {
        Ok(self)
    }
}

impl IntoPredicate for &Predicate {
    fn into_predicate(self) -> Result<Predicate, PredicateError> {
        Ok(self.clone())
    }
}

impl IntoPredicate for Result<Predicate, PredicateError> {
    fn into_predicate(self) -> Result<Predicate, PredicateError> {
        self
    }
}

impl IntoPredicate for PredicateBuilder {
    fn into_predicate(self) -> Result<Predicate, PredicateError> {
        self.build()
    }
}

/// Flat `field, value, ...` form
impl IntoPredicate for Vec<Value> {
    fn into_predicate(self) -> Result<Predicate, PredicateError> {
        Predicate::from_flat(self)
    }
}

impl<F, V> IntoPredicate for Vec<(F, V)>
where
    F: Into<String>,
    V: Into<Value>,
{
    fn into_predicate(self) -> Result<Predicate, PredicateError> {
        Predicate::from_pairs(self)
    }
}

impl<F, V, const N: usize> IntoPredicate for [(F, V); N]
where
    F: Into<String>,
    V: Into<Value>,
{
    fn into_predicate(self) -> Result<Predicate, PredicateError> {
        Predicate::from_pairs(self)
    }
}

/// Build a [`Predicate`] from `field => value` pairs.
///
/// Expands to a `Result<Predicate, PredicateError>`.
#[macro_export]
macro_rules! predicate {
    () => {
        ::std::result::Result::<$crate::predicate::Predicate, $crate::predicate::PredicateError>::Ok(
            $crate::predicate::Predicate::all(),
        )
    };
    ($($field:expr => $value:expr),+ $(,)?) => {
        $crate::predicate::Predicate::builder()
            $(.eq($field, $value))+
            .build()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_even_string_pairs_build() {
        for n in 0..5 {
            let args: Vec<Value> = (0..n)
                .flat_map(|i| [Value::from(format!("f{}", i)), Value::from(i as i64)])
                .collect();
            let predicate = Predicate::from_flat(args).unwrap();
            assert_eq!(predicate.len(), n);
        }
    }

    #[test]
    fn test_odd_arity_rejected() {
        for len in [1usize, 3, 5] {
            let args: Vec<Value> = (0..len).map(|_| Value::from("slug")).collect();
            assert_eq!(
                Predicate::from_flat(args).unwrap_err(),
                PredicateError::OddArity { len }
            );
        }
    }

    #[test]
    fn test_non_string_field_rejected() {
        let err = Predicate::from_flat(vec!["slug".into(), "acme".into(), 7.into(), "x".into()])
            .unwrap_err();
        assert_eq!(
            err,
            PredicateError::FieldNotString {
                index: 2,
                found: "integer"
            }
        );
    }

    #[test]
    fn test_field_names_validated() {
        assert!(Predicate::from_pairs([("", Value::Null)]).is_err());
        assert!(Predicate::from_pairs([("slug; DROP TABLE x", Value::Null)]).is_err());
        assert!(Predicate::from_pairs([("1st", Value::Null)]).is_err());
        assert!(Predicate::from_pairs([("_private", Value::Null)]).is_ok());
        assert!(Predicate::builder().eq("created at", 1).build().is_err());
    }

    #[test]
    fn test_order_preserved() {
        let predicate = Predicate::builder()
            .eq("b", 1)
            .eq("a", 2)
            .eq("b", 3)
            .build()
            .unwrap();
        let fields: Vec<&str> = predicate.clauses().iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["b", "a", "b"]);
    }

    #[test]
    fn test_display() {
        let predicate = predicate!("slug" => "acme", "id" => 3, "deleted_at" => Value::Null).unwrap();
        assert_eq!(predicate.to_string(), "slug = 'acme' AND id = 3 AND deleted_at IS NULL");
        assert_eq!(Predicate::all().to_string(), "<all>");
    }

    #[test]
    fn test_matches_record() {
        let record = json!({"slug": "acme", "id": 3, "score": 1.5, "active": true, "note": null});
        let record = record.as_object().unwrap().clone();

        assert!(predicate!("slug" => "acme", "id" => 3).unwrap().matches(&record));
        assert!(predicate!("score" => 1.5, "active" => true).unwrap().matches(&record));
        assert!(predicate!("note" => Value::Null).unwrap().matches(&record));
        assert!(predicate!("missing" => Value::Null).unwrap().matches(&record));
        assert!(!predicate!("slug" => "other").unwrap().matches(&record));
        assert!(!predicate!("id" => "3").unwrap().matches(&record));
        assert!(Predicate::all().matches(&record));
    }

    #[test]
    fn test_into_predicate_forms() {
        let expected = predicate!("slug" => "acme").unwrap();
        assert_eq!([("slug", "acme")].into_predicate().unwrap(), expected);
        assert_eq!(vec![("slug", "acme")].into_predicate().unwrap(), expected);
        assert_eq!(vec![Value::from("slug"), Value::from("acme")].into_predicate().unwrap(), expected);
        assert_eq!((&expected).into_predicate().unwrap(), expected);
        assert_eq!(Predicate::builder().eq("slug", "acme").into_predicate().unwrap(), expected);
        assert!(vec![Value::from("slug")].into_predicate().is_err());
    }

    #[test]
    fn test_option_and_timestamp_values() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));

        let at = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let stored = serde_json::to_value(at).unwrap();
        assert!(Value::from(at).matches(Some(&stored)));
    }
}
