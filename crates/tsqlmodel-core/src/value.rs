//! Dynamic SQL values.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::row::{ColumnInfo, Row};

/// A dynamically-typed SQL Server value.
///
/// This enum represents every value the adapter binds as a parameter or reads
/// back from a result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// BIT
    Bool(bool),

    /// TINYINT (unsigned in SQL Server)
    TinyInt(u8),

    /// SMALLINT
    SmallInt(i16),

    /// INT
    Int(i32),

    /// BIGINT
    BigInt(i64),

    /// REAL
    Float(f32),

    /// FLOAT
    Double(f64),

    /// DECIMAL, NUMERIC and MONEY (stored as string)
    Decimal(String),

    /// NVARCHAR / VARCHAR / NCHAR
    Text(String),

    /// VARBINARY
    Bytes(Vec<u8>),

    /// DATE (days since epoch)
    Date(i32),

    /// TIME (microseconds since midnight)
    Time(i64),

    /// DATETIME2 (microseconds since epoch)
    Timestamp(i64),

    /// DATETIMEOFFSET (microseconds since epoch, UTC)
    TimestampTz(i64),

    /// UNIQUEIDENTIFIER (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON document carried as NVARCHAR(MAX)
    Json(serde_json::Value),

    /// Table-valued parameter, bound by name
    Table(TableValue),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a text value, which compares with LIKE.
    pub const fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }

    /// Get the SQL Server type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BIT",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INT",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "FLOAT",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "NVARCHAR",
            Value::Bytes(_) => "VARBINARY",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "DATETIME2",
            Value::TimestampTz(_) => "DATETIMEOFFSET",
            Value::Uuid(_) => "UNIQUEIDENTIFIER",
            Value::Json(_) => "JSON",
            Value::Table(_) => "TABLE",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::TinyInt(v) => Some(*v != 0),
            Value::SmallInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::TinyInt(v) => Some(f64::from(*v)),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Get the table payload of a table-valued parameter.
    pub fn as_table(&self) -> Option<&TableValue> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Convert a `u64` to `Value`, clamping to `i64::MAX` if it overflows.
    #[must_use]
    pub fn from_u64_clamped(v: u64) -> Self {
        if let Ok(signed) = i64::try_from(v) {
            Value::BigInt(signed)
        } else {
            tracing::warn!(
                value = v,
                clamped_to = i64::MAX,
                "u64 value exceeds BIGINT range; clamping to i64::MAX"
            );
            Value::BigInt(i64::MAX)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(v) => write!(f, "{}", u8::from(*v)),
            Value::TinyInt(v) => write!(f, "{v}"),
            Value::SmallInt(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(v) | Value::Text(v) => write!(f, "'{}'", v.replace('\'', "''")),
            Value::Bytes(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                Ok(())
            }
            Value::Date(v) => write!(f, "DATE({v})"),
            Value::Time(v) => write!(f, "TIME({v})"),
            Value::Timestamp(v) => write!(f, "DATETIME2({v})"),
            Value::TimestampTz(v) => write!(f, "DATETIMEOFFSET({v})"),
            Value::Uuid(u) => {
                for (i, byte) in u.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        write!(f, "-")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Json(v) => write!(f, "'{v}'"),
            Value::Table(t) => write!(f, "{} ({} rows)", t.parameter_name, t.rows.len()),
        }
    }
}

/// The payload of a table-valued parameter.
///
/// Rows are positional against `columns`; the parameter binds by
/// `parameter_name` and is typed by the user-defined table type `type_name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableValue {
    /// Parameter name including the leading `@`
    pub parameter_name: String,
    /// Qualified table type name, e.g. `[dbo].[FieldValueTableType]`
    pub type_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableValue {
    pub fn new(
        parameter_name: impl Into<String>,
        type_name: impl Into<String>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            type_name: type_name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row; values must follow `columns` order.
    pub fn push_row(&mut self, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.push(values);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// View the table contents as result rows sharing one column set.
    pub fn to_rows(&self) -> Vec<Row> {
        let columns = Arc::new(ColumnInfo::new(self.columns.clone()));
        self.rows
            .iter()
            .map(|values| Row::with_columns(Arc::clone(&columns), values.clone()))
            .collect()
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::BigInt(i64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<[u8; 16]> for Value {
    fn from(v: [u8; 16]) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<TableValue> for Value {
    fn from(v: TableValue) -> Self {
        Value::Table(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}
