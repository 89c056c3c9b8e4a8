//! Typed table cells.
//!
//! Codemap tag columns and joined event-table columns hold [`TagValue`]s.
//! A column's [`DType`] is fixed when the codemap is compiled; joins may add
//! nulls to any column.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Declared semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Int,
    Float,
    Bool,
    Str,
}

impl DType {
    pub fn as_str(self) -> &'static str {
        match self {
            DType::Int => "int",
            DType::Float => "float",
            DType::Bool => "bool",
            DType::Str => "str",
        }
    }

    /// Narrowest type that every string in `cells` parses as.
    ///
    /// Order of preference: `Int`, `Float`, `Bool`, then `Str`.
    pub fn infer<'a>(cells: impl IntoIterator<Item = &'a str> + Clone) -> DType {
        let all = |f: fn(&str) -> bool| cells.clone().into_iter().all(|c| f(c.trim()));
        if all(|c| c.parse::<i64>().is_ok()) {
            DType::Int
        } else if all(|c| c.parse::<f64>().is_ok()) {
            DType::Float
        } else if all(|c| parse_bool(c).is_some()) {
            DType::Bool
        } else {
            DType::Str
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// One cell of an event table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl TagValue {
    /// Parse `s` as a value of `dtype`. Returns `None` when `s` does not parse.
    pub fn parse_as(s: &str, dtype: DType) -> Option<TagValue> {
        let s = s.trim();
        match dtype {
            DType::Int => s.parse().ok().map(TagValue::Int),
            DType::Float => s.parse().ok().map(TagValue::Float),
            DType::Bool => parse_bool(s).map(TagValue::Bool),
            DType::Str => Some(TagValue::Str(s.to_string())),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TagValue::Null)
    }

    pub fn dtype(&self) -> Option<DType> {
        match self {
            TagValue::Null => None,
            TagValue::Bool(_) => Some(DType::Bool),
            TagValue::Int(_) => Some(DType::Int),
            TagValue::Float(_) => Some(DType::Float),
            TagValue::Str(_) => Some(DType::Str),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            TagValue::Int(v) => Some(v),
            TagValue::Float(v) if v.fract() == 0.0 => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            TagValue::Int(v) => Some(v as f64),
            TagValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            TagValue::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Hashable join key. Nulls never match anything.
    ///
    /// Integral floats key the same as the equal integer.
    pub fn join_key(&self) -> Option<JoinKey> {
        match self {
            TagValue::Null => None,
            TagValue::Bool(b) => Some(JoinKey::Bool(*b)),
            TagValue::Int(v) => Some(JoinKey::Int(*v)),
            TagValue::Float(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => {
                Some(JoinKey::Int(*v as i64))
            }
            TagValue::Float(v) => Some(JoinKey::Float(v.to_bits())),
            TagValue::Str(s) => Some(JoinKey::Str(s.clone())),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TagValue::Null => 0,
            TagValue::Bool(_) => 1,
            TagValue::Int(_) | TagValue::Float(_) => 2,
            TagValue::Str(_) => 3,
        }
    }

    /// Total order used by `sort_by`: null < bool < number < string.
    /// Numbers compare by value across `Int`/`Float`.
    pub fn total_cmp(&self, other: &TagValue) -> Ordering {
        match (self, other) {
            (TagValue::Bool(a), TagValue::Bool(b)) => a.cmp(b),
            (TagValue::Int(a), TagValue::Int(b)) => a.cmp(b),
            (TagValue::Str(a), TagValue::Str(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 && b.rank() == 2 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    /// Text form used by the flat exporter. Floats keep a decimal point so
    /// the column reads back as float; nulls are the empty string.
    pub fn to_field(&self) -> String {
        match self {
            TagValue::Null => String::new(),
            TagValue::Bool(b) => b.to_string(),
            TagValue::Int(v) => v.to_string(),
            TagValue::Float(v) => format!("{v:?}"),
            TagValue::Str(s) => s.clone(),
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Null => f.write_str("null"),
            other => f.write_str(&other.to_field()),
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Bool(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(v.to_string())
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Str(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_prefers_narrowest_type() {
        assert_eq!(DType::infer(["1", "-2", "300"]), DType::Int);
        assert_eq!(DType::infer(["1", "2.5"]), DType::Float);
        assert_eq!(DType::infer(["True", "false"]), DType::Bool);
        assert_eq!(DType::infer(["like", "2"]), DType::Str);
    }

    #[test]
    fn numbers_sort_across_int_and_float() {
        let a = TagValue::Int(2);
        let b = TagValue::Float(1.5);
        assert_eq!(a.total_cmp(&b), Ordering::Greater);
        assert_eq!(TagValue::Null.total_cmp(&b), Ordering::Less);
        assert_eq!(TagValue::from("a").total_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn integral_float_joins_with_int() {
        assert_eq!(TagValue::Float(101.0).join_key(), TagValue::Int(101).join_key());
        assert!(TagValue::Null.join_key().is_none());
    }

    #[test]
    fn float_field_keeps_decimal_point() {
        assert_eq!(TagValue::Float(3.0).to_field(), "3.0");
        assert_eq!(TagValue::Int(3).to_field(), "3");
        assert_eq!(TagValue::Null.to_field(), "");
    }
}
