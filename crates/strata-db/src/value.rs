//! Backend-agnostic column values.
//!
//! [`Value`] carries query parameters into the connection layer and result
//! columns back out. Drivers return a narrower set of variants than the ORM
//! stores (SQLite has no boolean or timestamp type), so [`Value::coerce`]
//! restores the declared type during hydration.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::fields::FieldType;

/// Text layout used for naive timestamps on backends without a native type.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A backend-agnostic representation of a database value.
///
/// ```
/// use strata_db::Value;
///
/// assert_eq!(Value::from(42_i64), Value::Int(42));
/// assert_eq!(Value::from("hello"), Value::String("hello".to_string()));
/// assert_eq!(Value::from(None::<i64>), Value::Null);
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// SQL NULL.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    /// A date without time.
    Date(NaiveDate),
    /// A date and time without timezone.
    DateTime(NaiveDateTime),
    /// A date and time in UTC.
    DateTimeTz(DateTime<Utc>),
    /// A time without date.
    Time(NaiveTime),
    /// A UUID value.
    Uuid(uuid::Uuid),
    /// A JSON document.
    Json(serde_json::Value),
    /// A list of values, only meaningful as the operand of an `in` lookup.
    List(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{}", dt.format(DATETIME_FORMAT)),
            Self::DateTimeTz(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Time(t) => write!(f, "{t}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Json(j) => write!(f, "{j}"),
            Self::List(vals) => {
                write!(f, "[")?;
                for (i, v) in vals.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => String,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    DateTime<Utc> => DateTimeTz,
    NaiveTime => Time,
    uuid::Uuid => Uuid,
    serde_json::Value => Json,
    Vec<Value> => List,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

impl Value {
    /// Returns `true` if this is `Value::Null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// A hashable identity for grouping rows by key.
    ///
    /// Two values that a database would consider equal as join keys map to
    /// the same string. Used to fan prefetched rows back to their parents.
    pub fn key(&self) -> String {
        match self {
            Self::Null => "n:".to_string(),
            Self::Bool(b) => format!("i:{}", i64::from(*b)),
            Self::Int(i) => format!("i:{i}"),
            Self::Float(v) => format!("f:{v}"),
            Self::Uuid(u) => format!("s:{u}"),
            Self::Bytes(b) => format!("b:{b:?}"),
            other => format!("s:{other}"),
        }
    }

    /// Converts into a JSON value for `values()` style output.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::json!(i),
            Self::Float(v) => serde_json::json!(v),
            Self::Json(j) => j.clone(),
            Self::List(vals) => serde_json::Value::Array(vals.iter().map(Self::to_json).collect()),
            other => serde_json::Value::String(other.to_string()),
        }
    }

    /// Restores the declared type of a column value read from a driver.
    ///
    /// Values already in the right shape pass through unchanged. Values that
    /// cannot be parsed are returned as read rather than dropped.
    pub fn coerce(self, field_type: &FieldType) -> Self {
        match (field_type, self) {
            (_, Self::Null) => Self::Null,
            (FieldType::Boolean, Self::Int(i)) => Self::Bool(i != 0),
            (FieldType::Float, Self::Int(i)) => {
                #[allow(clippy::cast_precision_loss)]
                let f = i as f64;
                Self::Float(f)
            }
            (FieldType::Json, Self::String(s)) => serde_json::from_str(&s)
                .map_or_else(|_| Self::String(s), Self::Json),
            (FieldType::Uuid, Self::String(s)) => {
                uuid::Uuid::parse_str(&s).map_or_else(|_| Self::String(s), Self::Uuid)
            }
            (FieldType::Date, Self::String(s)) => {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_or_else(|_| Self::String(s), Self::Date)
            }
            (FieldType::Time, Self::String(s)) => {
                NaiveTime::parse_from_str(&s, "%H:%M:%S%.f").map_or_else(|_| Self::String(s), Self::Time)
            }
            (FieldType::DateTime, Self::String(s)) => parse_datetime(&s).unwrap_or(Self::String(s)),
            (_, v) => v,
        }
    }
}

fn parse_datetime(s: &str) -> Option<Value> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(Value::DateTimeTz(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(Value::DateTime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7_i32), Value::Int(7));
        assert_eq!(Value::from(1.5_f64), Value::Float(1.5));
        assert_eq!(Value::from(String::from("x")), Value::String("x".into()));
        assert_eq!(Value::from(Some("y")), Value::String("y".into()));
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(
            Value::from(vec![Value::Int(1), Value::Int(2)]),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "NULL");
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::List(vec![Value::Int(1), "a".into()]).to_string(), "[1, a]");
        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(Value::DateTime(dt).to_string(), "2024-01-02 03:04:05");
    }

    #[test]
    fn test_key_groups_equal_join_values() {
        assert_eq!(Value::Int(1).key(), Value::Bool(true).key());
        assert_ne!(Value::Int(1).key(), Value::String("1".into()).key());
        assert_eq!(Value::Null.key(), "n:");
    }

    #[test]
    fn test_coerce_sqlite_shapes() {
        assert_eq!(Value::Int(1).coerce(&FieldType::Boolean), Value::Bool(true));
        assert_eq!(Value::Int(0).coerce(&FieldType::Boolean), Value::Bool(false));
        assert_eq!(
            Value::String("{}".into()).coerce(&FieldType::Json),
            Value::Json(serde_json::json!({}))
        );
        assert_eq!(Value::Null.coerce(&FieldType::Json), Value::Null);

        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_micro_opt(7, 8, 9, 10)
            .unwrap();
        let stored = Value::DateTime(dt).to_string();
        assert_eq!(Value::String(stored).coerce(&FieldType::DateTime), Value::DateTime(dt));
    }

    #[test]
    fn test_coerce_keeps_unparseable_text() {
        assert_eq!(
            Value::String("not json {".into()).coerce(&FieldType::Json),
            Value::String("not json {".into())
        );
    }

    #[test]
    fn test_to_json() {
        assert_eq!(Value::Int(5).to_json(), serde_json::json!(5));
        assert_eq!(Value::Null.to_json(), serde_json::Value::Null);
        assert_eq!(Value::String("a".into()).to_json(), serde_json::json!("a"));
    }
}
