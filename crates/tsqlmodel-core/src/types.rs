//! SQL Server type definitions and Rust type mapping.

use std::fmt;

/// SQL Server column types used in entity attributes and table type DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Float,
    Decimal { precision: u8, scale: u8 },
    Money,
    /// `NCHAR(n)`
    NChar(u32),
    /// `NVARCHAR(n)`; `None` is `NVARCHAR(MAX)`
    NVarChar(Option<u32>),
    /// `VARCHAR(n)`; `None` is `VARCHAR(MAX)`
    VarChar(Option<u32>),
    /// `VARBINARY(n)`; `None` is `VARBINARY(MAX)`
    VarBinary(Option<u32>),
    Date,
    Time,
    DateTime2,
    DateTimeOffset,
    UniqueIdentifier,
    /// Verbatim type text, e.g. `DECIMAL(19, 4)` or a user-defined type
    Custom(&'static str),
}

impl SqlType {
    /// Get the T-SQL type name for this type.
    pub fn sql_name(&self) -> String {
        fn length(n: Option<u32>) -> String {
            n.map_or_else(|| "MAX".to_string(), |n| n.to_string())
        }
        match self {
            SqlType::Bit => "BIT".to_string(),
            SqlType::TinyInt => "TINYINT".to_string(),
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Int => "INT".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::Float => "FLOAT".to_string(),
            SqlType::Decimal { precision, scale } => format!("DECIMAL({}, {})", precision, scale),
            SqlType::Money => "MONEY".to_string(),
            SqlType::NChar(n) => format!("NCHAR({})", n),
            SqlType::NVarChar(n) => format!("NVARCHAR({})", length(*n)),
            SqlType::VarChar(n) => format!("VARCHAR({})", length(*n)),
            SqlType::VarBinary(n) => format!("VARBINARY({})", length(*n)),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::DateTime2 => "DATETIME2".to_string(),
            SqlType::DateTimeOffset => "DATETIMEOFFSET".to_string(),
            SqlType::UniqueIdentifier => "UNIQUEIDENTIFIER".to_string(),
            SqlType::Custom(name) => (*name).to_string(),
        }
    }

    pub const fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt
                | SqlType::SmallInt
                | SqlType::Int
                | SqlType::BigInt
                | SqlType::Real
                | SqlType::Float
                | SqlType::Decimal { .. }
                | SqlType::Money
        )
    }

    pub const fn is_text(&self) -> bool {
        matches!(
            self,
            SqlType::NChar(_) | SqlType::NVarChar(_) | SqlType::VarChar(_)
        )
    }

    pub const fn is_temporal(&self) -> bool {
        matches!(
            self,
            SqlType::Date | SqlType::Time | SqlType::DateTime2 | SqlType::DateTimeOffset
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_name())
    }
}

/// Trait for Rust types that have a corresponding SQL Server column type.
pub trait TypeInfo {
    /// The SQL type for this Rust type.
    const SQL_TYPE: SqlType;

    /// Whether this type is nullable by default.
    const NULLABLE: bool = false;
}

impl TypeInfo for bool {
    const SQL_TYPE: SqlType = SqlType::Bit;
}

impl TypeInfo for u8 {
    const SQL_TYPE: SqlType = SqlType::TinyInt;
}

impl TypeInfo for i16 {
    const SQL_TYPE: SqlType = SqlType::SmallInt;
}

impl TypeInfo for i32 {
    const SQL_TYPE: SqlType = SqlType::Int;
}

impl TypeInfo for i64 {
    const SQL_TYPE: SqlType = SqlType::BigInt;
}

impl TypeInfo for f32 {
    const SQL_TYPE: SqlType = SqlType::Real;
}

impl TypeInfo for f64 {
    const SQL_TYPE: SqlType = SqlType::Float;
}

impl TypeInfo for String {
    const SQL_TYPE: SqlType = SqlType::NVarChar(None);
}

impl TypeInfo for Vec<u8> {
    const SQL_TYPE: SqlType = SqlType::VarBinary(None);
}

impl TypeInfo for [u8; 16] {
    const SQL_TYPE: SqlType = SqlType::UniqueIdentifier;
}

impl TypeInfo for serde_json::Value {
    const SQL_TYPE: SqlType = SqlType::NVarChar(None);
}

impl<T: TypeInfo> TypeInfo for Option<T> {
    const SQL_TYPE: SqlType = T::SQL_TYPE;
    const NULLABLE: bool = true;
}
