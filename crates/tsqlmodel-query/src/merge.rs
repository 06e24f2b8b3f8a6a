//! Table-valued MERGE commands.
//!
//! A [`StructuredMergeCommand`] ships a batch of structure rows `S` to the
//! server as one table-valued parameter and merges them into one or more
//! target tables. One merge may capture its output and join it back to the
//! source rows, which recovers generated identity values together with
//! source-only columns.
//!
//! ```ignore
//! let command = StructuredMergeCommand::new(elements)
//!     .merge_into::<FieldValueElementRow>(|m| {
//!         m.on([FieldValueElementRow::FIELD_VALUE_ID, FieldValueElementRow::ORDER])
//!             .delete_unmatched_in_source(FieldValueElementRow::FIELD_VALUE_ID)
//!             .select_from_inserted()
//!     });
//! let statement = command.build(&adapter)?;
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::OnceLock;

use regex::Regex;
use tsqlmodel_core::{
    AttributeRef, Entity, EntityDefinition, EntityDescriptor, Error, NameQualifier, Result, Row,
    TableValue, Value,
};

use crate::statement::Statement;
use crate::tsql::TransactSqlAdapter;

/// Table variable receiving OUTPUT rows.
pub const INSERTED_TABLE: &str = "@inserted";

fn parameter_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^@[A-Za-z_][A-Za-z0-9_]{0,127}$").ok())
        .as_ref()
}

/// Normalize a table-valued parameter name to `@Name` and check that it is
/// a plain variable name.
#[allow(clippy::result_large_err)]
pub fn validate_parameter_name(name: &str) -> Result<String> {
    let name = if name.starts_with('@') {
        name.to_string()
    } else {
        format!("@{}", name)
    };
    match parameter_pattern() {
        Some(pattern) if pattern.is_match(&name) => Ok(name),
        Some(_) => Err(Error::build(format!(
            "'{}' is not a valid table-valued parameter name",
            name
        ))),
        None => Err(Error::build("parameter name pattern failed to compile")),
    }
}

/// What a merge selects after it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeOutput {
    /// Nothing; the merge reports an affected row count.
    #[default]
    None,
    /// OUTPUT INSERTED rows captured and joined back to the source.
    Inserted,
    /// Target rows re-read by joining the source to the target.
    Source,
}

/// A projection of the structured parameter used as the merge source.
///
/// Fans one structure type out into narrow tables: each derived source
/// picks some columns (optionally renamed) and skips rows where a column is
/// NULL.
#[derive(Debug, Clone, Default)]
pub struct DerivedSource {
    columns: Vec<(AttributeRef, Option<String>)>,
    not_null: Vec<AttributeRef>,
}

impl DerivedSource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn column(mut self, attribute: impl Into<AttributeRef>) -> Self {
        self.columns.push((attribute.into(), None));
        self
    }

    /// Project a column under another name, usually the target's column.
    #[must_use]
    pub fn column_as(mut self, attribute: impl Into<AttributeRef>, alias: impl Into<String>) -> Self {
        self.columns.push((attribute.into(), Some(alias.into())));
        self
    }

    #[must_use]
    pub fn where_not_null(mut self, attribute: impl Into<AttributeRef>) -> Self {
        self.not_null.push(attribute.into());
        self
    }
}

#[derive(Debug, Clone)]
struct MergeSpec {
    target: &'static EntityDescriptor,
    /// `(target attribute, source column)`; the source column defaults to the target column
    keys: Vec<(AttributeRef, Option<String>)>,
    source: Option<DerivedSource>,
    delete_scope: Option<AttributeRef>,
    output: MergeOutput,
}

/// Options for merging into target `T`.
pub struct MergeInto<T> {
    spec: MergeSpec,
    _target: PhantomData<fn() -> T>,
}

impl<T: Entity> MergeInto<T> {
    fn new() -> Self {
        Self {
            spec: MergeSpec {
                target: T::descriptor(),
                keys: Vec::new(),
                source: None,
                delete_scope: None,
                output: MergeOutput::None,
            },
            _target: PhantomData,
        }
    }

    /// Match on these target attributes against same-named source columns.
    /// Without this the target's primary key is used.
    #[must_use]
    pub fn on<A: Into<AttributeRef>>(mut self, attributes: impl IntoIterator<Item = A>) -> Self {
        self.spec
            .keys
            .extend(attributes.into_iter().map(|a| (a.into(), None)));
        self
    }

    /// Match target attributes against differently named source columns.
    #[must_use]
    pub fn on_columns<A: Into<AttributeRef>, C: Into<String>>(
        mut self,
        pairs: impl IntoIterator<Item = (A, C)>,
    ) -> Self {
        self.spec.keys.extend(
            pairs
                .into_iter()
                .map(|(target, source)| (target.into(), Some(source.into()))),
        );
        self
    }

    /// Merge from a projection of the structured parameter.
    #[must_use]
    pub fn from(mut self, source: DerivedSource) -> Self {
        self.spec.source = Some(source);
        self
    }

    /// Delete target rows missing from the source, limited to target rows
    /// whose `scope` value appears in the source batch.
    #[must_use]
    pub fn delete_unmatched_in_source(mut self, scope: impl Into<AttributeRef>) -> Self {
        self.spec.delete_scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn select_from_inserted(mut self) -> Self {
        self.spec.output = MergeOutput::Inserted;
        self
    }

    #[must_use]
    pub fn select_from_source(mut self) -> Self {
        self.spec.output = MergeOutput::Source;
        self
    }
}

/// A batch of structure rows merged into one or more tables.
pub struct StructuredMergeCommand<S> {
    items: Vec<S>,
    parameter_name: Option<String>,
    merges: Vec<MergeSpec>,
}

impl<S: Entity> StructuredMergeCommand<S> {
    pub fn new(items: impl IntoIterator<Item = S>) -> Self {
        Self {
            items: items.into_iter().collect(),
            parameter_name: None,
            merges: Vec::new(),
        }
    }

    /// Override the parameter name, `@{TypeName}` by default.
    #[allow(clippy::result_large_err)]
    pub fn with_parameter_name(mut self, name: &str) -> Result<Self> {
        self.parameter_name = Some(validate_parameter_name(name)?);
        Ok(self)
    }

    #[must_use]
    pub fn merge_into<T: Entity>(
        mut self,
        configure: impl FnOnce(MergeInto<T>) -> MergeInto<T>,
    ) -> Self {
        self.merges.push(configure(MergeInto::new()).spec);
        self
    }

    pub fn items(&self) -> &[S] {
        &self.items
    }

    pub fn into_items(self) -> Vec<S> {
        self.items
    }

    /// Whether the statement ends in a SELECT of merged rows.
    pub fn returns_rows(&self) -> bool {
        self.merges.iter().any(|m| m.output != MergeOutput::None)
    }

    /// Render the command. The statement's only parameter is the table value.
    #[allow(clippy::result_large_err)]
    pub fn build(&self, adapter: &TransactSqlAdapter) -> Result<Statement> {
        if self.merges.is_empty() {
            return Err(Error::build("merge command has no target"));
        }
        let outputs = self
            .merges
            .iter()
            .filter(|m| m.output != MergeOutput::None)
            .count();
        if outputs > 1 {
            return Err(Error::build(format!(
                "only one merge per command may select output, found {}",
                outputs
            )));
        }

        let source = adapter.resolve::<S>()?;
        let q = adapter.qualifier();
        let parameter = match &self.parameter_name {
            Some(name) => name.clone(),
            None => validate_parameter_name(&source.location.table)?,
        };
        let context = SourceContext {
            definition: &source,
            type_name: q.qualify_table(&source.location),
            parameter,
            columns: source.direct_attributes().map(|a| a.column.to_string()).collect(),
        };

        let table = self.table_value(&context);
        let mut blocks = Vec::with_capacity(self.merges.len());
        for merge in &self.merges {
            let target = adapter.definitions().resolve_descriptor(merge.target)?;
            blocks.push(render_merge(q, &context, &table, &target, merge)?);
        }

        tracing::debug!(
            source = %source.entity_name,
            merges = self.merges.len(),
            rows = table.len(),
            "Rendered structured merge"
        );
        Ok(Statement::new(blocks.join("\n\n"), vec![Value::Table(table)]))
    }

    fn table_value(&self, context: &SourceContext<'_>) -> TableValue {
        let mut table = TableValue::new(
            context.parameter.clone(),
            context.type_name.clone(),
            context.columns.clone(),
        );
        let attributes: Vec<_> = context.definition.direct_attributes().collect();
        for item in &self.items {
            let values = item.to_row();
            table.push_row(
                attributes
                    .iter()
                    .map(|attribute| {
                        values
                            .iter()
                            .find(|(property, _)| *property == attribute.property)
                            .map_or(Value::Null, |(_, v)| v.clone())
                    })
                    .collect(),
            );
        }
        table
    }

    /// Decode output rows, whose columns carry structure column names, into `S`.
    #[allow(clippy::result_large_err)]
    pub fn hydrate(&self, adapter: &TransactSqlAdapter, rows: &[Row]) -> Result<Vec<S>> {
        let source = adapter.resolve::<S>()?;
        rows.iter()
            .map(|row| {
                let renamed = row.iter().map(|(name, value)| {
                    let property = source.find_column(name).map_or(name, |a| a.property);
                    (property.to_string(), value.clone())
                });
                S::from_row(&Row::from_pairs(renamed))
            })
            .collect()
    }
}

impl<S> fmt::Debug for StructuredMergeCommand<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuredMergeCommand")
            .field("items", &self.items.len())
            .field("parameter_name", &self.parameter_name)
            .field("merges", &self.merges)
            .finish()
    }
}

struct SourceContext<'a> {
    definition: &'a EntityDefinition,
    type_name: String,
    parameter: String,
    /// Structure columns in declaration order
    columns: Vec<String>,
}

impl SourceContext<'_> {
    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

#[allow(clippy::result_large_err, clippy::too_many_lines)]
fn render_merge(
    q: &dyn NameQualifier,
    source: &SourceContext<'_>,
    table: &TableValue,
    target: &EntityDefinition,
    merge: &MergeSpec,
) -> Result<String> {
    let target_alias = q.escape("Target");
    let source_alias = q.escape("Source");
    let target_table = q.qualify_table(&target.location);

    // Columns the USING clause provides, and its text.
    let (using, available) = match &merge.source {
        None => (source.parameter.clone(), source.columns.clone()),
        Some(derived) => derived_source(q, source, derived)?,
    };

    let keys: Vec<(String, String)> = if merge.keys.is_empty() {
        target
            .primary_key()
            .map(|a| (a.column.to_string(), a.column.to_string()))
            .collect()
    } else {
        merge
            .keys
            .iter()
            .map(|(attribute, column)| {
                let resolved = target.require(attribute)?;
                if !resolved.is_direct() {
                    return Err(Error::build(format!(
                        "merge key '{}' is not a column of {}",
                        attribute, target.entity_name
                    )));
                }
                let source_column = column.clone().unwrap_or_else(|| resolved.column.to_string());
                Ok((resolved.column.to_string(), source_column))
            })
            .collect::<Result<_>>()?
    };
    if keys.is_empty() {
        return Err(Error::build(format!(
            "merge into {} has no match keys",
            target.entity_name
        )));
    }
    if let Some((_, missing)) = keys.iter().find(|(_, s)| !available.contains(s)) {
        return Err(Error::build(format!(
            "merge source does not provide key column '{}'",
            missing
        )));
    }

    if merge.source.is_none() {
        ensure_single_match(table, &keys, &target.entity_name)?;
    }

    let source_for = |column: &str| -> Option<String> {
        keys.iter()
            .find(|(t, _)| t == column)
            .map(|(_, s)| s.clone())
            .or_else(|| available.iter().find(|c| *c == column).cloned())
    };
    let assign = |target_column: &str, source_column: &str| {
        format!(
            "{}.{} = {}.{}",
            target_alias,
            q.escape(target_column),
            source_alias,
            q.escape(source_column)
        )
    };

    let insertable: Vec<(String, String)> = target
        .insertable_attributes()
        .filter_map(|a| source_for(a.column).map(|s| (a.column.to_string(), s)))
        .collect();
    if insertable.is_empty() {
        return Err(Error::build(format!(
            "merge source provides no insertable column of {}",
            target.entity_name
        )));
    }

    let mut updates: Vec<String> = target
        .insertable_attributes()
        .filter(|a| !a.primary_key && !keys.iter().any(|(t, _)| t == a.column))
        .filter_map(|a| source_for(a.column).map(|s| assign(a.column, &s)))
        .collect();
    if updates.is_empty() {
        // Matched rows still reach OUTPUT.
        updates = keys.iter().map(|(t, s)| assign(t, s)).collect();
    }

    let mut lines = Vec::new();
    if merge.output == MergeOutput::Inserted {
        lines.push(format!("DECLARE {} {};", INSERTED_TABLE, source.type_name));
    }
    lines.push(format!("MERGE {} AS {}", target_table, target_alias));
    lines.push(format!("USING {} AS {}", using, source_alias));
    lines.push(format!(
        "ON ({})",
        keys.iter()
            .map(|(t, s)| assign(t, s))
            .collect::<Vec<_>>()
            .join(" AND ")
    ));
    lines.push(format!("WHEN MATCHED THEN UPDATE SET {}", updates.join(", ")));
    lines.push(format!(
        "WHEN NOT MATCHED BY TARGET THEN INSERT ({}) VALUES ({})",
        insertable
            .iter()
            .map(|(t, _)| q.escape(t))
            .collect::<Vec<_>>()
            .join(", "),
        insertable
            .iter()
            .map(|(_, s)| format!("{}.{}", source_alias, q.escape(s)))
            .collect::<Vec<_>>()
            .join(", ")
    ));

    if let Some(scope) = &merge.delete_scope {
        let resolved = target.require(scope)?;
        if !resolved.is_direct() || !source.has_column(resolved.column) {
            return Err(Error::build(format!(
                "delete scope '{}' must be a column of both {} and the structured source",
                scope, target.entity_name
            )));
        }
        let column = q.escape(resolved.column);
        lines.push(format!(
            "WHEN NOT MATCHED BY SOURCE AND {}.{} IN (SELECT {} FROM {}) THEN DELETE",
            target_alias, column, column, source.parameter
        ));
    }

    if merge.output == MergeOutput::None {
        terminate(&mut lines);
        return Ok(lines.join("\n"));
    }
    if merge.source.is_some() {
        return Err(Error::build(
            "merge output requires the structured parameter as the source",
        ));
    }

    // Target columns the structure type can hold, in target order.
    let output: Vec<&str> = target
        .direct_attributes()
        .map(|a| a.column)
        .filter(|c| source.has_column(c))
        .collect();
    if let Some((t, _)) = keys.iter().find(|(t, _)| !output.contains(&t.as_str())) {
        return Err(Error::build(format!(
            "merge key '{}' is not a column of the structured source",
            t
        )));
    }
    let source_only: Vec<&str> = source
        .columns
        .iter()
        .map(String::as_str)
        .filter(|c| !output.contains(c))
        .collect();
    let escaped = |prefix: &str, columns: &[&str]| -> Vec<String> {
        columns
            .iter()
            .map(|c| format!("{}{}", prefix, q.escape(c)))
            .collect()
    };

    match merge.output {
        MergeOutput::Inserted => {
            lines.push(format!("OUTPUT {}", escaped("INSERTED.", &output).join(", ")));
            lines.push(format!(
                "INTO {} ({});",
                INSERTED_TABLE,
                escaped("", &output).join(", ")
            ));
            let mut selected = escaped("i.", &output);
            selected.extend(escaped("s.", &source_only));
            lines.push(format!("SELECT {}", selected.join(", ")));
            lines.push(format!("FROM {} AS i", INSERTED_TABLE));
            lines.push(format!(
                "INNER JOIN {} AS s ON {};",
                source.parameter,
                join_on(q, "i", &keys)
            ));
        }
        MergeOutput::Source => {
            terminate(&mut lines);
            let mut selected = escaped("t.", &output);
            selected.extend(escaped("s.", &source_only));
            lines.push(format!("SELECT {}", selected.join(", ")));
            lines.push(format!("FROM {} AS s", source.parameter));
            lines.push(format!(
                "INNER JOIN {} AS t ON {};",
                target_table,
                join_on(q, "t", &keys)
            ));
        }
        MergeOutput::None => {}
    }
    Ok(lines.join("\n"))
}

#[allow(clippy::result_large_err)]
fn derived_source(
    q: &dyn NameQualifier,
    source: &SourceContext<'_>,
    derived: &DerivedSource,
) -> Result<(String, Vec<String>)> {
    if derived.columns.is_empty() {
        return Err(Error::build("derived merge source selects no columns"));
    }
    let column_of = |attribute: &AttributeRef| -> Result<&'static str> {
        let resolved = source.definition.require(attribute)?;
        if resolved.is_direct() {
            Ok(resolved.column)
        } else {
            Err(Error::build(format!(
                "derived source column '{}' is not a structure column",
                attribute
            )))
        }
    };

    let mut selected = Vec::with_capacity(derived.columns.len());
    let mut names = Vec::with_capacity(derived.columns.len());
    for (attribute, alias) in &derived.columns {
        let column = column_of(attribute)?;
        match alias {
            Some(alias) => {
                selected.push(format!("{} AS {}", q.escape(column), q.escape(alias)));
                names.push(alias.clone());
            }
            None => {
                selected.push(q.escape(column));
                names.push(column.to_string());
            }
        }
    }
    let filters = derived
        .not_null
        .iter()
        .map(|a| column_of(a).map(|c| format!("{} IS NOT NULL", q.escape(c))))
        .collect::<Result<Vec<_>>>()?;

    let mut using = format!("(SELECT {} FROM {}", selected.join(", "), source.parameter);
    if !filters.is_empty() {
        using.push_str(" WHERE ");
        using.push_str(&filters.join(" AND "));
    }
    using.push(')');
    Ok((using, names))
}

/// A target row may be matched by at most one source row; SQL Server
/// rejects the whole MERGE otherwise. Rows with a NULL key never match.
#[allow(clippy::result_large_err)]
fn ensure_single_match(table: &TableValue, keys: &[(String, String)], target: &str) -> Result<()> {
    let positions: Vec<usize> = keys
        .iter()
        .filter_map(|(_, source)| table.columns.iter().position(|c| c == source))
        .collect();
    if positions.len() != keys.len() {
        return Ok(());
    }

    let mut seen: Vec<Vec<&Value>> = Vec::with_capacity(table.len());
    for (index, row) in table.rows.iter().enumerate() {
        let key: Vec<&Value> = positions.iter().filter_map(|&i| row.get(i)).collect();
        if key.len() != positions.len() || key.iter().any(|v| v.is_null()) {
            continue;
        }
        if seen.contains(&key) {
            return Err(Error::build(format!(
                "source row {} repeats a match key already in the batch; each {} row may be merged once",
                index, target
            )));
        }
        seen.push(key);
    }
    Ok(())
}

fn join_on(q: &dyn NameQualifier, alias: &str, keys: &[(String, String)]) -> String {
    keys.iter()
        .map(|(t, s)| format!("{}.{} = s.{}", alias, q.escape(t), q.escape(s)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn terminate(lines: &mut [String]) {
    if let Some(last) = lines.last_mut() {
        last.push(';');
    }
}
