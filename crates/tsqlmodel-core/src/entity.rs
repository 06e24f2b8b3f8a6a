//! Entity metadata and the `Entity` trait.
//!
//! An [`EntityDescriptor`] is the static description of one row type: its
//! table, its direct attributes, and the relations that pull related rows
//! into the same selection. `#[derive(Entity)]` generates descriptors; they
//! can also be written by hand.

use std::borrow::Cow;
use std::fmt;

use crate::Result;
use crate::row::Row;
use crate::types::SqlType;
use crate::value::Value;

/// A direct attribute of an entity, mapped to one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeInfo {
    /// Rust-facing property name, also the result column alias
    pub property: &'static str,
    /// Database column name
    pub column: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    /// Database-generated (IDENTITY); never inserted or updated
    pub identity: bool,
}

impl AttributeInfo {
    pub const fn new(property: &'static str, column: &'static str, sql_type: SqlType) -> Self {
        Self {
            property,
            column,
            sql_type,
            nullable: false,
            primary_key: false,
            identity: false,
        }
    }

    pub const fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub const fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        self
    }

    /// Mark the attribute as an IDENTITY column. Identity columns are keys.
    pub const fn identity(mut self, value: bool) -> Self {
        self.identity = value;
        if value {
            self.primary_key = true;
        }
        self
    }
}

/// How a relation is joined into a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
}

impl JoinType {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
        }
    }
}

/// One key pair of a relation: a property on the owning entity and the
/// property it matches on the related entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationKey {
    pub source: &'static str,
    pub target: &'static str,
}

impl RelationKey {
    pub const fn new(source: &'static str, target: &'static str) -> Self {
        Self { source, target }
    }
}

/// A related entity embedded in the owning entity's default selection.
#[derive(Clone, Copy)]
pub struct RelationInfo {
    /// Property holding the related entity; prefixes its result aliases
    pub property: &'static str,
    /// Table alias, required when the related table appears more than once
    pub alias: Option<&'static str>,
    pub join_type: JoinType,
    pub keys: &'static [RelationKey],
    pub target: fn() -> &'static EntityDescriptor,
}

impl fmt::Debug for RelationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationInfo")
            .field("property", &self.property)
            .field("alias", &self.alias)
            .field("join_type", &self.join_type)
            .field("keys", &self.keys)
            .field("target", &(self.target)().entity_name)
            .finish()
    }
}

/// Static description of an entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityDescriptor {
    pub entity_name: &'static str,
    /// Schema; the name qualifier's default applies when `None`
    pub schema: Option<&'static str>,
    pub table: &'static str,
    pub alias: Option<&'static str>,
    pub attributes: &'static [AttributeInfo],
    pub relations: &'static [RelationInfo],
}

impl EntityDescriptor {
    pub fn attribute(&self, property: &str) -> Option<&'static AttributeInfo> {
        self.attributes.iter().find(|a| a.property == property)
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &'static AttributeInfo> {
        self.attributes.iter().filter(|a| a.primary_key)
    }

    pub fn identity(&self) -> Option<&'static AttributeInfo> {
        self.attributes.iter().find(|a| a.identity)
    }

    /// Identity of the descriptor for caching; descriptors are statics.
    pub fn cache_key(&'static self) -> usize {
        std::ptr::from_ref(self) as usize
    }
}

/// A row type that maps to a table (or a table type) in SQL Server.
pub trait Entity: Sized + Send + Sync + 'static {
    /// Static metadata for this entity.
    fn descriptor() -> &'static EntityDescriptor;

    /// Direct attribute values keyed by property name, in declaration order.
    fn to_row(&self) -> Vec<(&'static str, Value)>;

    /// Construct an entity from a result row whose columns are property names
    /// (related entities under `Relation.Property`).
    #[allow(clippy::result_large_err)]
    fn from_row(row: &Row) -> Result<Self>;

    /// Store a database-generated identity value.
    #[allow(unused_variables, clippy::result_large_err)]
    fn set_identity(&mut self, value: &Value) -> Result<()> {
        Ok(())
    }

    /// Primary key values keyed by property name.
    fn key_values(&self) -> Vec<(&'static str, Value)> {
        let descriptor = Self::descriptor();
        self.to_row()
            .into_iter()
            .filter(|(property, _)| {
                descriptor
                    .attribute(property)
                    .is_some_and(|a| a.primary_key)
            })
            .collect()
    }
}

/// A dotted attribute path from the root entity: `Name`,
/// `Category.Name`, `SubContainer.TopContainer.Name`.
///
/// The derive macro emits one constant handle per property; nested paths
/// compose with [`AttributeRef::then`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeRef(Cow<'static, str>);

impl AttributeRef {
    pub const fn from_static(path: &'static str) -> Self {
        Self(Cow::Borrowed(path))
    }

    pub fn new(path: impl Into<String>) -> Self {
        Self(Cow::Owned(path.into()))
    }

    /// Continue the path through a relation: `CATEGORY.then(&NAME)`.
    #[must_use]
    pub fn then(&self, next: &AttributeRef) -> Self {
        Self(Cow::Owned(format!("{}.{}", self.0, next.0)))
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// The last path segment (the property name).
    pub fn property(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Everything before the last segment, if the path is related.
    pub fn relation_path(&self) -> Option<&str> {
        self.0.rsplit_once('.').map(|(head, _)| head)
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for AttributeRef {
    fn from(path: &'static str) -> Self {
        Self::from_static(path)
    }
}

impl From<String> for AttributeRef {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl From<&AttributeRef> for AttributeRef {
    fn from(attr: &AttributeRef) -> Self {
        attr.clone()
    }
}
