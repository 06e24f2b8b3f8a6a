//! The Transact-SQL adapter.
//!
//! Renders selections, counts, existence checks, updates, deletions,
//! insertions and table type definitions into parameterized statements.
//! Clauses are separated by `\n`; parameters are numbered `@0..` in the
//! order their clauses render.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tsqlmodel_core::{
    AttributeRef, DefinitionProvider, Entity, EntityAttributeDefinition, EntityDefinition,
    EntityDescriptor, EntityLocation, Error, NameQualifier, Result, StaticDefinitionProvider,
    TransactSqlQualifier, Value,
};

use crate::builder::UpdateSet;
use crate::cache::StatementCache;
use crate::clause::{OrderBy, Page};
use crate::predicate::{ComparisonOp, Predicate};
use crate::select::{Selection, SelectionSpec};
use crate::statement::{Parameters, Statement};

/// Name of the key CTE in paged selections.
pub const PAGE_CTE: &str = "pgCte";
/// Alias of the derived table counted for set operations.
pub const SET_COUNT_ALIAS: &str = "setCount";
/// Variable that receives `SCOPE_IDENTITY()` after an identity insert.
pub const NEW_ID: &str = "@NewId";

/// What a SELECT branch projects.
#[derive(Clone, Copy)]
enum Head {
    Columns,
    Literal(&'static str),
}

/// Renders statements for entities resolved through a [`DefinitionProvider`].
pub struct TransactSqlAdapter {
    definitions: Arc<dyn DefinitionProvider>,
    qualifier: Arc<dyn NameQualifier>,
    inserts: Mutex<StatementCache>,
}

impl TransactSqlAdapter {
    pub fn new(definitions: Arc<dyn DefinitionProvider>, qualifier: Arc<dyn NameQualifier>) -> Self {
        Self {
            definitions,
            qualifier,
            inserts: Mutex::new(StatementCache::default()),
        }
    }

    /// Adapter over static descriptors with `schema` as the default schema.
    pub fn for_schema(schema: &str) -> Self {
        Self::new(
            Arc::new(StaticDefinitionProvider::new(schema)),
            Arc::new(TransactSqlQualifier::new(schema)),
        )
    }

    /// Bound the insertion text cache.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.inserts = Mutex::new(StatementCache::new(capacity));
        self
    }

    pub fn definitions(&self) -> &Arc<dyn DefinitionProvider> {
        &self.definitions
    }

    pub fn qualifier(&self) -> &dyn NameQualifier {
        self.qualifier.as_ref()
    }

    #[allow(clippy::result_large_err)]
    pub fn resolve<E: Entity>(&self) -> Result<Arc<EntityDefinition>> {
        self.definitions.resolve_descriptor(E::descriptor())
    }

    #[allow(clippy::result_large_err)]
    fn resolve_spec(&self, spec: &SelectionSpec) -> Result<Arc<EntityDefinition>> {
        self.definitions.resolve_descriptor(spec.descriptor)
    }

    // ==================== Selection ====================

    /// SELECT statement for `selection`, paged through a key CTE when a page
    /// is set.
    #[allow(clippy::result_large_err)]
    pub fn select_statement<E: Entity>(&self, selection: &Selection<E>) -> Result<Statement> {
        let statement = self.render_selection(selection.spec())?;
        tracing::trace!(sql = %statement.sql, "Rendered selection");
        Ok(statement)
    }

    #[allow(clippy::result_large_err)]
    pub fn render_selection(&self, spec: &SelectionSpec) -> Result<Statement> {
        if let Some(page) = spec.page {
            return self.render_page(spec, page);
        }

        let definition = self.resolve_spec(spec)?;
        let mut params = Parameters::new(self.qualifier());
        let mut lines;
        let order;
        if spec.set_operations.is_empty() {
            lines = self.branch_lines(&definition, spec, Head::Columns, &mut params)?;
            order = self.order_line(&definition, &spec.order, false)?;
        } else {
            lines = self.set_lines(spec, Head::Columns, &mut params)?;
            order = self.order_line(&definition, &spec.order, true)?;
        }
        lines.extend(order);
        Ok(Statement::new(lines.join("\n"), params.into_values()))
    }

    #[allow(clippy::result_large_err)]
    fn render_page(&self, spec: &SelectionSpec, page: Page) -> Result<Statement> {
        if !spec.set_operations.is_empty() {
            return Err(Error::build(
                "a paged selection cannot be combined with set operations",
            ));
        }
        if !page.is_valid() {
            return Err(Error::build(format!(
                "page size and number must be positive, got size {} number {}",
                page.size, page.number
            )));
        }

        let definition = self.resolve_spec(spec)?;
        let keys: Vec<&EntityAttributeDefinition> = definition.primary_key().collect();
        if keys.is_empty() {
            return Err(Error::build(format!(
                "{} has no primary key to page by",
                definition.entity_name
            )));
        }

        let q = self.qualifier();
        let cte = q.escape(PAGE_CTE);
        let mut params = Parameters::new(q);

        // Outer statement parameters bind first.
        let columns = self.projection(&definition, spec)?;
        let outer_joins = self.join_lines(&definition, spec, None)?;
        let correlation = keys
            .iter()
            .map(|k| format!("{}.{} = {}", cte, q.escape(k.column), q.qualify_attribute(k)))
            .collect::<Vec<_>>()
            .join(" AND ");
        let mut conditions = vec![format!("EXISTS (SELECT 1 FROM {} WHERE {})", cte, correlation)];
        for predicate in &spec.predicates {
            conditions.push(self.predicate(&definition, predicate, &mut params)?);
        }

        let key_order: Vec<OrderBy> = keys
            .iter()
            .map(|k| OrderBy::asc(AttributeRef::new(k.path())))
            .collect();
        let outer_order = if spec.order.is_empty() {
            &key_order
        } else {
            &spec.order
        };

        let seek = spec.page_seek.as_deref().unwrap_or(spec);
        let join_source = if seek.joins.is_empty() { spec } else { seek };
        let cte_joins = self.join_lines(&definition, join_source, None)?;
        let cte_where = self.where_line(&definition, &seek.predicates, &mut params)?;
        let cte_order = if seek.order.is_empty() {
            outer_order
        } else {
            &seek.order
        };
        let offset = params.bind(Value::from_u64_clamped(page.offset()));
        let fetch = params.bind(Value::BigInt(i64::from(page.size)));

        let table = q.table_source(&definition.location);
        let mut lines = vec![
            format!(";WITH {} AS (", cte),
            format!(
                "SELECT {}",
                keys.iter()
                    .map(|k| q.qualify_attribute(k))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            format!("FROM {}", table),
        ];
        lines.extend(cte_joins);
        lines.extend(cte_where);
        lines.extend(self.order_line(&definition, cte_order, false)?);
        lines.push(format!("OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", offset, fetch));
        lines.push(")".to_string());
        lines.push(format!("SELECT {}", columns));
        lines.push(format!("FROM {}", table));
        lines.extend(outer_joins);
        lines.push(format!("WHERE {}", conditions.join(" AND ")));
        lines.extend(self.order_line(&definition, outer_order, false)?);
        lines.push("OPTION (RECOMPILE)".to_string());

        tracing::debug!(
            entity = %definition.entity_name,
            size = page.size,
            number = page.number,
            "Rendered paged selection"
        );
        Ok(Statement::new(lines.join("\n"), params.into_values()))
    }

    // ==================== Count / Exists ====================

    /// `SELECT COUNT(1)` over the selection; ordering and paging are ignored.
    #[allow(clippy::result_large_err)]
    pub fn count_statement<E: Entity>(&self, selection: &Selection<E>) -> Result<Statement> {
        let spec = selection.spec();
        let mut params = Parameters::new(self.qualifier());
        let lines = if spec.set_operations.is_empty() {
            let definition = self.resolve_spec(spec)?;
            self.branch_lines(&definition, spec, Head::Literal("COUNT(1)"), &mut params)?
        } else {
            let mut lines = vec!["SELECT COUNT(1) FROM (".to_string()];
            lines.extend(self.set_lines(spec, Head::Columns, &mut params)?);
            lines.push(format!(") AS {}", self.qualifier().escape(SET_COUNT_ALIAS)));
            lines
        };
        Ok(Statement::new(lines.join("\n"), params.into_values()))
    }

    /// `IF EXISTS (...) SELECT 1 ELSE SELECT 0`.
    #[allow(clippy::result_large_err)]
    pub fn exists_statement<E: Entity>(&self, selection: &Selection<E>) -> Result<Statement> {
        let spec = selection.spec();
        let mut params = Parameters::new(self.qualifier());
        let mut lines = vec!["IF EXISTS (".to_string()];
        if spec.set_operations.is_empty() {
            let definition = self.resolve_spec(spec)?;
            lines.extend(self.branch_lines(&definition, spec, Head::Literal("1"), &mut params)?);
        } else {
            // Branches keep their projection so INTERSECT and EXCEPT compare rows.
            lines.extend(self.set_lines(spec, Head::Columns, &mut params)?);
        }
        lines.push(") SELECT 1 ELSE SELECT 0".to_string());
        Ok(Statement::new(lines.join("\n"), params.into_values()))
    }

    // ==================== Update / Delete ====================

    /// UPDATE of the rows matched by `selection`. Ordering, paging and set
    /// operations are discarded.
    #[allow(clippy::result_large_err)]
    pub fn update_statement<E: Entity>(
        &self,
        values: &UpdateSet<E>,
        selection: &Selection<E>,
    ) -> Result<Statement> {
        let definition = self.resolve::<E>()?;
        if values.is_empty() {
            return Err(Error::build(format!(
                "update of {} sets no attributes",
                definition.entity_name
            )));
        }

        let q = self.qualifier();
        let mut params = Parameters::new(q);
        let mut assignments = Vec::with_capacity(values.len());
        for (attribute, value) in values.values() {
            let target = definition.require(attribute)?;
            if !target.is_direct() {
                return Err(Error::build(format!(
                    "cannot update related attribute '{}'",
                    attribute
                )));
            }
            if target.identity {
                return Err(Error::build(format!(
                    "cannot update identity attribute '{}'",
                    attribute
                )));
            }
            assignments.push(format!("{} = {}", q.escape(target.column), params.bind(value.clone())));
        }

        let mut lines = vec![
            format!("UPDATE {}", q.qualify_location(&definition.location)),
            format!("SET {}", assignments.join(", ")),
        ];
        lines.extend(self.target_lines(&definition, selection.spec(), &mut params)?);
        Ok(Statement::new(lines.join("\n"), params.into_values()))
    }

    /// DELETE of the rows matched by `selection`.
    #[allow(clippy::result_large_err)]
    pub fn delete_statement<E: Entity>(&self, selection: &Selection<E>) -> Result<Statement> {
        let definition = self.resolve::<E>()?;
        let q = self.qualifier();
        let mut params = Parameters::new(q);
        let mut lines = vec![format!("DELETE {}", q.qualify_location(&definition.location))];
        lines.extend(self.target_lines(&definition, selection.spec(), &mut params)?);
        Ok(Statement::new(lines.join("\n"), params.into_values()))
    }

    /// FROM, the full join graph and WHERE for UPDATE/DELETE.
    #[allow(clippy::result_large_err)]
    fn target_lines(
        &self,
        definition: &EntityDefinition,
        spec: &SelectionSpec,
        params: &mut Parameters<'_>,
    ) -> Result<Vec<String>> {
        let mut lines = vec![format!(
            "FROM {}",
            self.qualifier().table_source(&definition.location)
        )];
        lines.extend(self.join_lines(definition, spec, None)?);
        lines.extend(self.where_line(definition, &spec.predicates, params)?);
        Ok(lines)
    }

    // ==================== Insert ====================

    /// INSERT of `item`. Identity entities capture the generated key through
    /// `SCOPE_IDENTITY()` and select it.
    #[allow(clippy::result_large_err)]
    pub fn insert_statement<E: Entity>(&self, item: &E) -> Result<Statement> {
        let descriptor = E::descriptor();
        let definition = self.resolve::<E>()?;
        let sql = self.insert_text(descriptor, &definition)?;

        let values = item.to_row();
        let params = definition
            .insertable_attributes()
            .map(|attribute| {
                values
                    .iter()
                    .find(|(property, _)| *property == attribute.property)
                    .map_or(Value::Null, |(_, value)| value.clone())
            })
            .collect();
        Ok(Statement::new(sql, params))
    }

    #[allow(clippy::result_large_err)]
    fn insert_text(
        &self,
        descriptor: &'static EntityDescriptor,
        definition: &EntityDefinition,
    ) -> Result<String> {
        let mut cache = self.inserts.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get_or_try_insert(descriptor.cache_key(), || {
            tracing::debug!(entity = %definition.entity_name, "Rendering insert text");
            Ok(self.render_insert(definition))
        })
    }

    fn render_insert(&self, definition: &EntityDefinition) -> String {
        let q = self.qualifier();
        let table = q.qualify_table(&definition.location);
        let columns: Vec<&EntityAttributeDefinition> = definition.insertable_attributes().collect();
        let identity = definition.identity();

        let mut lines = Vec::new();
        if let Some(identity) = identity {
            lines.push(format!(
                "DECLARE {} {}",
                NEW_ID,
                identity.sql_type.sql_name().to_ascii_lowercase()
            ));
        }
        if columns.is_empty() {
            lines.push(format!("INSERT INTO {} DEFAULT VALUES", table));
        } else {
            lines.push(format!(
                "INSERT INTO {} ({})",
                table,
                columns
                    .iter()
                    .map(|c| q.escape(c.column))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            lines.push(format!(
                "VALUES ({})",
                (0..columns.len())
                    .map(|i| q.parameter(i))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if identity.is_some() {
            lines.push(format!("SET {} = SCOPE_IDENTITY()", NEW_ID));
            lines.push(format!("SELECT {}", NEW_ID));
        }
        lines.join("\n")
    }

    /// Number of entities whose insertion text is cached.
    pub fn cached_inserts(&self) -> usize {
        self.inserts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // ==================== Table types ====================

    /// `CREATE TYPE ... AS TABLE` for a structure entity.
    #[allow(clippy::result_large_err)]
    pub fn create_table_type_statement<S: Entity>(&self) -> Result<Statement> {
        let definition = self.resolve::<S>()?;
        let q = self.qualifier();
        let columns: Vec<String> = definition
            .direct_attributes()
            .map(|a| {
                format!(
                    "    {} {} {}",
                    q.escape(a.column),
                    a.sql_type,
                    if a.nullable { "NULL" } else { "NOT NULL" }
                )
            })
            .collect();
        if columns.is_empty() {
            return Err(Error::build(format!(
                "{} has no attributes to declare",
                definition.entity_name
            )));
        }
        Ok(Statement::new(
            format!(
                "CREATE TYPE {} AS TABLE (\n{}\n)",
                q.qualify_table(&definition.location),
                columns.join(",\n")
            ),
            Vec::new(),
        ))
    }

    // ==================== Shared rendering ====================

    /// SELECT, FROM, joins and WHERE of one branch.
    #[allow(clippy::result_large_err)]
    fn branch_lines(
        &self,
        definition: &EntityDefinition,
        spec: &SelectionSpec,
        head: Head,
        params: &mut Parameters<'_>,
    ) -> Result<Vec<String>> {
        let projection = match head {
            Head::Columns => self.projection(definition, spec)?,
            Head::Literal(text) => text.to_string(),
        };
        let mut lines = vec![
            format!("SELECT {}", projection),
            format!("FROM {}", self.qualifier().table_source(&definition.location)),
        ];
        lines.extend(self.join_lines(definition, spec, None)?);
        lines.extend(self.where_line(definition, &spec.predicates, params)?);
        Ok(lines)
    }

    /// The head branch followed by each set operation branch.
    #[allow(clippy::result_large_err)]
    fn set_lines(
        &self,
        spec: &SelectionSpec,
        head: Head,
        params: &mut Parameters<'_>,
    ) -> Result<Vec<String>> {
        let definition = self.resolve_spec(spec)?;
        let mut lines = self.branch_lines(&definition, spec, head, params)?;
        for operation in &spec.set_operations {
            let branch = &operation.selection;
            if branch.page.is_some() || !branch.set_operations.is_empty() {
                return Err(Error::build(
                    "set operation branches cannot be paged or carry set operations",
                ));
            }
            let branch_definition = self.resolve_spec(branch)?;
            lines.push(operation.op_type.as_sql().to_string());
            lines.extend(self.branch_lines(&branch_definition, branch, head, params)?);
        }
        Ok(lines)
    }

    #[allow(clippy::result_large_err)]
    fn projection(&self, definition: &EntityDefinition, spec: &SelectionSpec) -> Result<String> {
        let q = self.qualifier();
        let columns: Vec<String> = if spec.projection.is_empty() {
            definition
                .attributes()
                .iter()
                .map(|a| q.select_column(a))
                .collect()
        } else {
            spec.projection
                .iter()
                .map(|a| definition.require(a).map(|a| q.select_column(a)))
                .collect::<Result<_>>()?
        };
        Ok(columns.join(", "))
    }

    /// JOIN lines. Explicit joins win; otherwise the definition's relations
    /// are joined, all of them or only those leading to `required` paths.
    #[allow(clippy::result_large_err)]
    fn join_lines(
        &self,
        definition: &EntityDefinition,
        spec: &SelectionSpec,
        required: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let q = self.qualifier();
        if !spec.joins.is_empty() {
            return self.explicit_join_lines(definition, spec);
        }

        Ok(definition
            .relations()
            .iter()
            .filter(|r| required.is_none_or(|paths| relation_needed(&r.path, paths)))
            .map(|relation| {
                let on = relation
                    .keys
                    .iter()
                    .map(|(source, target)| {
                        format!(
                            "{} = {}",
                            q.qualify_column(&relation.source, source),
                            q.qualify_column(&relation.target, target)
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                format!(
                    "{} {} ON {}",
                    relation.join_type.as_sql(),
                    q.table_source(&relation.target),
                    on
                )
            })
            .collect())
    }

    #[allow(clippy::result_large_err)]
    fn explicit_join_lines(
        &self,
        definition: &EntityDefinition,
        spec: &SelectionSpec,
    ) -> Result<Vec<String>> {
        let q = self.qualifier();
        let mut groups: Vec<(tsqlmodel_core::JoinType, EntityLocation, Vec<String>)> = Vec::new();

        for join in &spec.joins {
            let left = definition.require(&join.left)?;
            let right = definition.require(&join.right)?;
            let target = if right.location != definition.location {
                right.location.clone()
            } else if left.location != definition.location {
                left.location.clone()
            } else {
                return Err(Error::build(format!(
                    "join {} = {} does not reach a related table",
                    join.left, join.right
                )));
            };
            let condition = format!("{} = {}", q.qualify_attribute(left), q.qualify_attribute(right));

            match groups.last_mut() {
                Some((join_type, location, conditions))
                    if *location == target && *join_type == join.join_type =>
                {
                    conditions.push(condition);
                }
                _ => groups.push((join.join_type, target, vec![condition])),
            }
        }

        Ok(groups
            .into_iter()
            .map(|(join_type, location, conditions)| {
                format!(
                    "{} {} ON {}",
                    join_type.as_sql(),
                    q.table_source(&location),
                    conditions.join(" AND ")
                )
            })
            .collect())
    }

    #[allow(clippy::result_large_err)]
    fn where_line(
        &self,
        definition: &EntityDefinition,
        predicates: &[Predicate],
        params: &mut Parameters<'_>,
    ) -> Result<Option<String>> {
        if predicates.is_empty() {
            return Ok(None);
        }
        let conditions = predicates
            .iter()
            .map(|p| self.predicate(definition, p, params))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(format!("WHERE {}", conditions.join(" AND "))))
    }

    /// ORDER BY line. Set operation results are ordered by result column
    /// name since table references are out of scope there.
    #[allow(clippy::result_large_err)]
    fn order_line(
        &self,
        definition: &EntityDefinition,
        order: &[OrderBy],
        by_result_name: bool,
    ) -> Result<Option<String>> {
        if order.is_empty() {
            return Ok(None);
        }
        let q = self.qualifier();
        let terms = order
            .iter()
            .map(|o| {
                let attribute = definition.require(&o.attribute)?;
                let column = if by_result_name {
                    q.escape(&attribute.alias().unwrap_or_else(|| attribute.column.to_string()))
                } else {
                    q.qualify_attribute(attribute)
                };
                Ok(o.render(&column))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(format!("ORDER BY {}", terms.join(", "))))
    }

    #[allow(clippy::result_large_err)]
    fn predicate(
        &self,
        definition: &EntityDefinition,
        predicate: &Predicate,
        params: &mut Parameters<'_>,
    ) -> Result<String> {
        let q = self.qualifier();
        match predicate {
            Predicate::Compare { attribute, op, value } => {
                let column = q.qualify_attribute(definition.require(attribute)?);
                let sql = match (op, value) {
                    (ComparisonOp::Eq, Value::Null) => format!("{} IS NULL", column),
                    (ComparisonOp::Ne, Value::Null) => format!("{} IS NOT NULL", column),
                    (_, Value::Null) => {
                        return Err(Error::build(format!(
                            "cannot compare '{}' with NULL using {}",
                            attribute,
                            op.as_sql()
                        )));
                    }
                    (ComparisonOp::Eq, v) if v.is_text() => {
                        format!("{} LIKE {}", column, params.bind(v.clone()))
                    }
                    (ComparisonOp::Ne, v) if v.is_text() => {
                        format!("{} NOT LIKE {}", column, params.bind(v.clone()))
                    }
                    (op, v) => format!("{} {} {}", column, op.as_sql(), params.bind(v.clone())),
                };
                Ok(sql)
            }
            Predicate::Between { attribute, low, high } => {
                let column = q.qualify_attribute(definition.require(attribute)?);
                match (low.is_null(), high.is_null()) {
                    (false, false) => {
                        let low = params.bind(low.clone());
                        let high = params.bind(high.clone());
                        Ok(format!("{} BETWEEN {} AND {}", column, low, high))
                    }
                    (true, false) => Ok(format!("{} <= {}", column, params.bind(high.clone()))),
                    (false, true) => Ok(format!("{} >= {}", column, params.bind(low.clone()))),
                    (true, true) => Err(Error::build(format!(
                        "range on '{}' has no bounds",
                        attribute
                    ))),
                }
            }
            Predicate::Include {
                attribute,
                values,
                negated,
            } => {
                let column = q.qualify_attribute(definition.require(attribute)?);
                if values.is_empty() {
                    return Ok(if *negated { "1 = 1" } else { "1 = 0" }.to_string());
                }
                let placeholders = values
                    .iter()
                    .map(|v| params.bind(v.clone()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let keyword = if *negated { "NOT IN" } else { "IN" };
                Ok(format!("{} {} ({})", column, keyword, placeholders))
            }
            Predicate::Exists {
                subquery,
                correlation,
                negated,
            } => self.exists_predicate(definition, subquery, correlation, *negated, params),
        }
    }

    /// One-line correlated EXISTS. The subquery joins only the relations its
    /// own predicates reach.
    #[allow(clippy::result_large_err)]
    fn exists_predicate(
        &self,
        outer: &EntityDefinition,
        subquery: &SelectionSpec,
        correlation: &[(AttributeRef, AttributeRef)],
        negated: bool,
        params: &mut Parameters<'_>,
    ) -> Result<String> {
        let q = self.qualifier();
        let inner = self.resolve_spec(subquery)?;

        let required = required_relations(
            &inner,
            subquery
                .predicates
                .iter()
                .flat_map(Predicate::attributes)
                .chain(correlation.iter().map(|(_, inner)| inner)),
        )?;
        let joins = self.join_lines(&inner, subquery, Some(&required))?;

        let mut conditions = Vec::with_capacity(correlation.len() + subquery.predicates.len());
        for (outer_attribute, inner_attribute) in correlation {
            conditions.push(format!(
                "{} = {}",
                q.qualify_attribute(inner.require(inner_attribute)?),
                q.qualify_attribute(outer.require(outer_attribute)?)
            ));
        }
        for predicate in &subquery.predicates {
            conditions.push(self.predicate(&inner, predicate, params)?);
        }

        let mut sql = format!(
            "{}EXISTS (SELECT 1 FROM {}",
            if negated { "NOT " } else { "" },
            q.table_source(&inner.location)
        );
        for join in joins {
            sql.push(' ');
            sql.push_str(&join);
        }
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push(')');
        Ok(sql)
    }
}

impl Default for TransactSqlAdapter {
    fn default() -> Self {
        Self::for_schema("dbo")
    }
}

impl fmt::Debug for TransactSqlAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactSqlAdapter")
            .field("default_schema", &self.qualifier.default_schema())
            .field("cached_inserts", &self.cached_inserts())
            .finish_non_exhaustive()
    }
}

/// Relation paths that must be joined to reach `attributes`.
#[allow(clippy::result_large_err)]
fn required_relations<'a>(
    definition: &EntityDefinition,
    attributes: impl IntoIterator<Item = &'a AttributeRef>,
) -> Result<Vec<String>> {
    let mut paths: Vec<String> = Vec::new();
    for attribute in attributes {
        if let Some(path) = &definition.require(attribute)?.relation_path {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
    }
    Ok(paths)
}

/// A relation is needed when a required path is it or runs through it.
fn relation_needed(relation: &str, required: &[String]) -> bool {
    required.iter().any(|path| {
        path == relation
            || path
                .strip_prefix(relation)
                .is_some_and(|rest| rest.starts_with('.'))
    })
}
