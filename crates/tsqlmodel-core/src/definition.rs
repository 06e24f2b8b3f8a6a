//! Resolved entity definitions.
//!
//! A [`DefinitionProvider`] flattens an [`EntityDescriptor`] and every
//! descriptor reachable through its relations into one [`EntityDefinition`]:
//! the attribute list a default selection projects, and the join graph that
//! reaches the related tables.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::Result;
use crate::entity::{AttributeRef, Entity, EntityDescriptor, JoinType};
use crate::error::{Error, SchemaErrorKind};
use crate::types::SqlType;

/// Where an attribute lives: a table, optionally under an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityLocation {
    pub entity_name: String,
    pub schema: String,
    pub table: String,
    pub alias: Option<String>,
}

impl EntityLocation {
    pub fn new(
        entity_name: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            schema: schema.into(),
            table: table.into(),
            alias: None,
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The name other clauses use to reference this location.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// One attribute of a resolved definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityAttributeDefinition {
    /// Relation properties from the root, `None` for direct attributes
    pub relation_path: Option<String>,
    pub property: &'static str,
    pub column: &'static str,
    pub location: EntityLocation,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub identity: bool,
    pub ordinal: usize,
}

impl EntityAttributeDefinition {
    /// Full dotted path; also the result column name.
    pub fn path(&self) -> String {
        match &self.relation_path {
            Some(relation) => format!("{}.{}", relation, self.property),
            None => self.property.to_string(),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.relation_path.is_none()
    }

    /// Column alias needed in a projection, if the column name alone is not
    /// the result name.
    pub fn alias(&self) -> Option<String> {
        match &self.relation_path {
            Some(_) => Some(self.path()),
            None if self.property != self.column => Some(self.property.to_string()),
            None => None,
        }
    }

    pub fn is_insertable(&self) -> bool {
        self.is_direct() && !self.identity
    }
}

/// A resolved relation: the join from `source` to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRelationDefinition {
    /// Relation property path from the root
    pub path: String,
    pub join_type: JoinType,
    pub source: EntityLocation,
    pub target: EntityLocation,
    /// `(source column, target column)` pairs
    pub keys: Vec<(String, String)>,
}

/// The flattened definition of an entity.
#[derive(Debug, Clone)]
pub struct EntityDefinition {
    pub entity_name: String,
    pub location: EntityLocation,
    attributes: Vec<EntityAttributeDefinition>,
    relations: Vec<EntityRelationDefinition>,
    by_path: HashMap<String, usize>,
}

impl EntityDefinition {
    pub fn new(
        entity_name: impl Into<String>,
        location: EntityLocation,
        attributes: Vec<EntityAttributeDefinition>,
        relations: Vec<EntityRelationDefinition>,
    ) -> Self {
        let by_path = attributes
            .iter()
            .enumerate()
            .map(|(i, a)| (a.path(), i))
            .collect();
        Self {
            entity_name: entity_name.into(),
            location,
            attributes,
            relations,
            by_path,
        }
    }

    /// All attributes in projection order.
    pub fn attributes(&self) -> &[EntityAttributeDefinition] {
        &self.attributes
    }

    pub fn relations(&self) -> &[EntityRelationDefinition] {
        &self.relations
    }

    pub fn direct_attributes(&self) -> impl Iterator<Item = &EntityAttributeDefinition> {
        self.attributes.iter().filter(|a| a.is_direct())
    }

    pub fn primary_key(&self) -> impl Iterator<Item = &EntityAttributeDefinition> {
        self.direct_attributes().filter(|a| a.primary_key)
    }

    pub fn identity(&self) -> Option<&EntityAttributeDefinition> {
        self.direct_attributes().find(|a| a.identity)
    }

    pub fn insertable_attributes(&self) -> impl Iterator<Item = &EntityAttributeDefinition> {
        self.attributes.iter().filter(|a| a.is_insertable())
    }

    pub fn find(&self, path: &str) -> Option<&EntityAttributeDefinition> {
        self.by_path.get(path).map(|&i| &self.attributes[i])
    }

    /// Direct attribute by column name.
    pub fn find_column(&self, column: &str) -> Option<&EntityAttributeDefinition> {
        self.direct_attributes().find(|a| a.column == column)
    }

    #[allow(clippy::result_large_err)]
    pub fn require(&self, attribute: &AttributeRef) -> Result<&EntityAttributeDefinition> {
        self.find(attribute.path()).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::AttributeNotFound,
                format!(
                    "attribute '{}' is not part of the definition of {}",
                    attribute, self.entity_name
                ),
            )
        })
    }
}

/// Produces definitions for entity descriptors.
pub trait DefinitionProvider: Send + Sync {
    /// Default schema applied to descriptors without one.
    fn default_schema(&self) -> &str;

    #[allow(clippy::result_large_err)]
    fn resolve_descriptor(
        &self,
        descriptor: &'static EntityDescriptor,
    ) -> Result<Arc<EntityDefinition>>;
}

impl dyn DefinitionProvider {
    /// Resolve the definition of `E`.
    #[allow(clippy::result_large_err)]
    pub fn resolve<E: Entity>(&self) -> Result<Arc<EntityDefinition>> {
        self.resolve_descriptor(E::descriptor())
    }
}

/// Definition provider over compile-time descriptors, caching resolutions.
#[derive(Debug)]
pub struct StaticDefinitionProvider {
    default_schema: String,
    cache: Mutex<HashMap<usize, Arc<EntityDefinition>>>,
}

impl StaticDefinitionProvider {
    pub fn new(default_schema: impl Into<String>) -> Self {
        Self {
            default_schema: default_schema.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn location(&self, descriptor: &EntityDescriptor, alias: Option<&str>) -> EntityLocation {
        EntityLocation {
            entity_name: descriptor.entity_name.to_string(),
            schema: descriptor
                .schema
                .unwrap_or(&self.default_schema)
                .to_string(),
            table: descriptor.table.to_string(),
            alias: alias.or(descriptor.alias).map(str::to_string),
        }
    }

    #[allow(clippy::result_large_err)]
    fn build(&self, descriptor: &'static EntityDescriptor) -> Result<EntityDefinition> {
        let root = self.location(descriptor, None);
        let mut walk = Walk {
            attributes: Vec::new(),
            relations: Vec::new(),
            references: HashMap::from([(root.reference_name().to_string(), String::new())]),
        };
        walk.push_attributes(descriptor, &root, None);
        self.walk_relations(&mut walk, descriptor, &root, None)?;

        tracing::debug!(
            entity = descriptor.entity_name,
            attributes = walk.attributes.len(),
            relations = walk.relations.len(),
            "Resolved entity definition"
        );
        Ok(EntityDefinition::new(
            descriptor.entity_name,
            root,
            walk.attributes,
            walk.relations,
        ))
    }

    #[allow(clippy::result_large_err)]
    fn walk_relations(
        &self,
        walk: &mut Walk,
        descriptor: &'static EntityDescriptor,
        source: &EntityLocation,
        prefix: Option<&str>,
    ) -> Result<()> {
        // Every location claims its reference name once, so a cyclic relation
        // graph stops at the first repeated table or alias.
        for relation in descriptor.relations {
            let target = (relation.target)();
            let path = match prefix {
                Some(prefix) => format!("{}.{}", prefix, relation.property),
                None => relation.property.to_string(),
            };
            let location = self.location(target, relation.alias);

            if let Some(existing) = walk.references.get(location.reference_name()) {
                let existing = if existing.is_empty() {
                    descriptor.entity_name
                } else {
                    existing.as_str()
                };
                return Err(Error::schema(
                    SchemaErrorKind::AmbiguousRelation,
                    format!(
                        "relation '{}' joins [{}] which is already referenced by '{}'; declare a distinct alias",
                        path,
                        location.reference_name(),
                        existing
                    ),
                ));
            }
            walk.references
                .insert(location.reference_name().to_string(), path.clone());

            let mut keys = Vec::with_capacity(relation.keys.len());
            for key in relation.keys {
                let source_attr = descriptor.attribute(key.source).ok_or_else(|| {
                    missing_key(descriptor.entity_name, key.source, &path)
                })?;
                let target_attr = target
                    .attribute(key.target)
                    .ok_or_else(|| missing_key(target.entity_name, key.target, &path))?;
                keys.push((source_attr.column.to_string(), target_attr.column.to_string()));
            }
            if keys.is_empty() {
                return Err(Error::schema(
                    SchemaErrorKind::Invalid,
                    format!("relation '{}' declares no join keys", path),
                ));
            }

            walk.relations.push(EntityRelationDefinition {
                path: path.clone(),
                join_type: relation.join_type,
                source: source.clone(),
                target: location.clone(),
                keys,
            });
            walk.push_attributes(target, &location, Some(&path));
            self.walk_relations(walk, target, &location, Some(&path))?;
        }
        Ok(())
    }
}

impl Default for StaticDefinitionProvider {
    fn default() -> Self {
        Self::new("dbo")
    }
}

impl DefinitionProvider for StaticDefinitionProvider {
    fn default_schema(&self) -> &str {
        &self.default_schema
    }

    fn resolve_descriptor(
        &self,
        descriptor: &'static EntityDescriptor,
    ) -> Result<Arc<EntityDefinition>> {
        let key = descriptor.cache_key();
        if let Some(found) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(found));
        }

        let definition = Arc::new(self.build(descriptor)?);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::clone(&definition));
        Ok(definition)
    }
}

struct Walk {
    attributes: Vec<EntityAttributeDefinition>,
    relations: Vec<EntityRelationDefinition>,
    /// reference name -> relation path that claimed it ("" for the root)
    references: HashMap<String, String>,
}

impl Walk {
    fn push_attributes(
        &mut self,
        descriptor: &EntityDescriptor,
        location: &EntityLocation,
        relation_path: Option<&str>,
    ) {
        for attribute in descriptor.attributes {
            let ordinal = self.attributes.len();
            self.attributes.push(EntityAttributeDefinition {
                relation_path: relation_path.map(str::to_string),
                property: attribute.property,
                column: attribute.column,
                location: location.clone(),
                sql_type: attribute.sql_type,
                nullable: attribute.nullable,
                primary_key: attribute.primary_key,
                identity: attribute.identity,
                ordinal,
            });
        }
    }
}

fn missing_key(entity: &str, property: &str, path: &str) -> Error {
    Error::schema(
        SchemaErrorKind::AttributeNotFound,
        format!(
            "relation '{}' names key '{}' which is not an attribute of {}",
            path, property, entity
        ),
    )
}
