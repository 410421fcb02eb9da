//! # Value Type System
//!
//! The typed contents of a row field or a value cell, plus the per-column
//! "type witness" (canonical equality, hashing, ordering, and the text
//! import/export parse/format pair) chosen once at predicate registration,
//! rather than duplicating type-dispatch logic at every call site.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Error;

/// The declared type of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    Float,
    Bool,
    String,
    /// A small-cardinality, repeatedly-compared string (an enum tag, a
    /// category name). Distinct from `String` only by declared intent:
    /// equality/hashing are identical, but per-`Program` constant interning
    /// (`Program::intern_constant`) gives repeated symbol literals a shared
    /// backing cell, making comparisons against a bound symbol cheap the
    /// way a dedicated enum type would be.
    Symbol,
    Timestamp,
    /// A homogeneous list of values — the type of a bound `In` collection or
    /// an aggregation's materialized input; never a column type host code
    /// declares via `ColumnSpec`.
    List,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::String => "string",
            DataType::Symbol => "symbol",
            DataType::Timestamp => "timestamp",
            DataType::List => "list",
        };
        write!(f, "{s}")
    }
}

impl DataType {
    /// Text-decode a cell value of this type. The interface point a CSV
    /// importer (an external collaborator, out of scope here) would call.
    pub fn parse_field(self, s: &str) -> Result<Value, Error> {
        match self {
            DataType::Int => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| Error::Type {
                    expected: self,
                    found: DataType::String,
                    detail: format!("cannot parse '{s}' as int: {e}"),
                }),
            DataType::Float => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| Error::Type {
                    expected: self,
                    found: DataType::String,
                    detail: format!("cannot parse '{s}' as float: {e}"),
                }),
            DataType::Bool => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                other => Err(Error::Type {
                    expected: self,
                    found: DataType::String,
                    detail: format!("cannot parse '{other}' as bool"),
                }),
            },
            DataType::String => Ok(Value::String(Arc::from(s))),
            DataType::Symbol => Ok(Value::Symbol(Arc::from(s))),
            DataType::Timestamp => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| Value::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|e| Error::Type {
                    expected: self,
                    found: DataType::String,
                    detail: format!("cannot parse '{s}' as timestamp: {e}"),
                }),
            DataType::List => Err(Error::Type {
                expected: self,
                found: DataType::String,
                detail: "list columns have no text encoding".to_string(),
            }),
        }
    }
}

/// A typed value: the contents of a row field or a value cell.
///
/// `Eq`/`Hash`/`Ord` are implemented by hand because `f64` lacks them; the
/// implementation treats floats bitwise so that `Value` can live in
/// `HashMap`/`HashSet` keys the way row-set and key indices require.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(Arc<str>),
    Symbol(Arc<str>),
    Timestamp(DateTime<Utc>),
    List(Arc<Vec<Value>>),
}

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn symbol(s: impl Into<Arc<str>>) -> Self {
        Value::Symbol(s.into())
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::Float(_) => DataType::Float,
            Value::Bool(_) => DataType::Bool,
            Value::String(_) => DataType::String,
            Value::Symbol(_) => DataType::Symbol,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::List(_) => DataType::List,
        }
    }

    /// Canonical equality for this value's type, used by match/row-set
    /// membership/key lookups. Identical to `PartialEq` for every variant
    /// here but kept as its own named entry point: a type-witness
    /// operation, not incidental derive behavior.
    pub fn canonical_eq(&self, other: &Value) -> bool {
        self == other
    }

    /// Format this value the way a CSV exporter (external collaborator)
    /// would encode it.
    pub fn format_field(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::String(s) => s.to_string(),
            Value::Symbol(s) => s.to_string(),
            Value::Timestamp(t) => t.to_rfc3339(),
            Value::List(items) => {
                format!("[{}]", items.iter().map(Value::format_field).collect::<Vec<_>>().join(","))
            }
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::String(s) => s.hash(state),
            Value::Symbol(s) => s.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::List(items) => items.hash(state),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Symbol(a), Value::Symbol(b)) => a.partial_cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_field())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_equality_is_bitwise() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }

    #[test]
    fn parse_round_trips() {
        let v = DataType::Int.parse_field("42").unwrap();
        assert_eq!(v, Value::Int(42));
        assert_eq!(v.format_field(), "42");

        let v = DataType::Bool.parse_field("true").unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(DataType::Int.parse_field("nope").is_err());
    }

    #[test]
    fn symbol_parses_and_compares_like_string_but_is_a_distinct_type() {
        let v = DataType::Symbol.parse_field("idle").unwrap();
        assert_eq!(v, Value::symbol("idle"));
        assert_eq!(v.data_type(), DataType::Symbol);
        assert_ne!(v, Value::string("idle"));
    }

    #[test]
    fn ordering_coerces_int_and_float() {
        assert_eq!(
            Value::Int(2).partial_cmp(&Value::Float(2.0)),
            Some(Ordering::Equal)
        );
        assert!(Value::Int(1) < Value::Float(1.5));
    }
}
