//! Rendered statements.

use std::fmt;

use tsqlmodel_core::Value;

/// SQL text with its positional parameters.
///
/// Parameter `i` binds to the placeholder `@i`. A merge statement carries a
/// single [`Value::Table`] which binds by its own parameter name instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// The table-valued parameter, if this statement binds one.
    pub fn table_parameter(&self) -> Option<&tsqlmodel_core::TableValue> {
        self.params.iter().find_map(Value::as_table)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Sequential placeholder allocation while a statement renders.
pub(crate) struct Parameters<'q> {
    qualifier: &'q dyn tsqlmodel_core::NameQualifier,
    values: Vec<Value>,
}

impl<'q> Parameters<'q> {
    pub(crate) fn new(qualifier: &'q dyn tsqlmodel_core::NameQualifier) -> Self {
        Self {
            qualifier,
            values: Vec::new(),
        }
    }

    /// Append a value and return its placeholder.
    pub(crate) fn bind(&mut self, value: Value) -> String {
        let placeholder = self.qualifier.parameter(self.values.len());
        self.values.push(value);
        placeholder
    }

    pub(crate) fn into_values(self) -> Vec<Value> {
        self.values
    }
}
