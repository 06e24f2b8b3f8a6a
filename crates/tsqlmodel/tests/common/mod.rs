//! Shared fixtures: a small forms schema and an in-memory server that runs
//! the statement shapes the adapter renders.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;
use tsqlmodel::{
    Connection, Cx, Entity, Error, IsolationLevel, Outcome, Result, Row, TableValue,
    TransactionOps, Value,
};

// ==================== Entities ====================

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct CategoryRow {
    #[entity(identity)]
    pub category_id: i32,
    #[entity(sql_type = "NVARCHAR(50)")]
    pub name: String,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct FieldRow {
    #[entity(identity)]
    pub field_id: i32,
    pub name: String,
    #[entity(column = "FieldDescription")]
    pub description: Option<String>,
    pub category_id: i32,
    pub other_category_id: Option<i32>,
    #[entity(relation(on = "CategoryId = CategoryId"))]
    pub category: CategoryRow,
    #[entity(relation(on = "OtherCategoryId = CategoryId", alias = "OtherAlias"))]
    pub other_category: Option<CategoryRow>,
}

/// A row without identity: the key is supplied by the caller.
#[derive(Entity, Debug, Clone, PartialEq)]
pub struct FieldDependencyRow {
    #[entity(key)]
    pub field_id: i32,
    #[entity(key)]
    pub depends_on_field_id: i32,
    pub note: Option<String>,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct TopContainerRow {
    #[entity(identity)]
    pub top_container_id: i32,
    #[entity(column = "TopContainerName")]
    pub name: String,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct SubContainerRow {
    #[entity(identity)]
    pub sub_container_id: i32,
    pub top_container_id: i32,
    #[entity(column = "SubContainerName")]
    pub name: String,
    #[entity(relation(on = "TopContainerId = TopContainerId"))]
    pub top_container: TopContainerRow,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct DomainAggregateRow {
    #[entity(identity)]
    pub domain_aggregate_id: i32,
    pub sub_container_id: i32,
    #[entity(column = "DomainAggregateName")]
    pub name: String,
    pub description: Option<String>,
    #[entity(relation(on = "SubContainerId = SubContainerId"))]
    pub sub_container: SubContainerRow,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct GenericSubmissionRow {
    #[entity(identity)]
    pub generic_submission_id: i32,
    #[entity(sql_type = "NVARCHAR(100)")]
    pub subject: String,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct FieldValueRow {
    #[entity(identity)]
    pub field_value_id: i32,
    pub generic_submission_id: i32,
    pub field_id: i32,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct FieldValueElementRow {
    #[entity(identity)]
    pub field_value_element_id: i32,
    pub field_value_id: i32,
    pub order: i32,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct DateElementRow {
    #[entity(key)]
    pub field_value_element_id: i32,
    /// Days since 1970-01-01
    #[entity(sql_type = "DATE")]
    pub value: i32,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct FloatElementRow {
    #[entity(key)]
    pub field_value_element_id: i32,
    pub value: f64,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct IntegerElementRow {
    #[entity(key)]
    pub field_value_element_id: i32,
    pub value: i64,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct MoneyElementRow {
    #[entity(key)]
    pub field_value_element_id: i32,
    #[entity(sql_type = "MONEY")]
    pub value: f64,
}

#[derive(Entity, Debug, Clone, PartialEq)]
pub struct TextElementRow {
    #[entity(key)]
    pub field_value_element_id: i32,
    pub value: String,
}

/// Table type shipped to the server; exactly one element column is set.
#[derive(Entity, Debug, Clone, PartialEq, Default)]
pub struct FieldValueElementTableTypeRow {
    pub field_value_element_id: Option<i32>,
    pub field_value_id: i32,
    pub order: i32,
    #[entity(sql_type = "DATE")]
    pub date_element: Option<i32>,
    pub float_element: Option<f64>,
    pub integer_element: Option<i64>,
    #[entity(sql_type = "MONEY")]
    pub money_element: Option<f64>,
    pub text_element: Option<String>,
}

// ==================== Test helpers ====================

pub fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

// ==================== In-memory server ====================

type StoredRow = Vec<(String, Value)>;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default)]
struct Table {
    identity: Option<String>,
    next_id: i32,
    rows: Vec<StoredRow>,
}

impl Table {
    fn next_identity(&mut self) -> Option<(String, Value)> {
        let column = self.identity.clone()?;
        self.next_id += 1;
        Some((column, Value::Int(self.next_id)))
    }
}

#[derive(Debug, Default)]
struct Store {
    tables: HashMap<String, Table>,
    statements: Vec<String>,
}

/// A connection to an in-memory database.
///
/// It runs the statements the adapter renders for single-table entities:
/// selections (paged or not), counts, existence checks, inserts and merges.
/// Joins are not supported.
#[derive(Clone, Default)]
pub struct MemoryServer {
    store: Arc<Mutex<Store>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `column` of `table` as an IDENTITY column starting at 1.
    pub fn with_identity(self, table: &str, column: &str) -> Self {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .identity = Some(column.to_string());
        self
    }

    /// Store rows directly.
    pub fn seed(&self, table: &str, rows: Vec<Vec<(&str, Value)>>) {
        let mut store = self.lock();
        let table = store.tables.entry(table.to_string()).or_default();
        for row in rows {
            let row: StoredRow = row.into_iter().map(|(c, v)| (c.to_string(), v)).collect();
            if let Some(column) = &table.identity {
                let id = get(&row, column).as_i64().and_then(|n| i32::try_from(n).ok());
                table.next_id = table.next_id.max(id.unwrap_or_default());
            }
            table.rows.push(row);
        }
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| t.rows.len())
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("lock poisoned")
    }

    fn apply(&self, sql: &str, params: &[Value]) -> Result<(Vec<Row>, u64)> {
        let mut store = self.lock();
        store.statements.push(sql.to_string());
        run(&mut store, sql, params)
    }

    fn snapshot(&self) -> HashMap<String, Table> {
        self.lock().tables.clone()
    }

    fn restore(&self, tables: HashMap<String, Table>) {
        self.lock().tables = tables;
    }
}

pub struct MemoryTransaction {
    server: MemoryServer,
    begin: HashMap<String, Table>,
    savepoints: Mutex<Vec<(String, HashMap<String, Table>)>>,
}

fn done<T: Send>(result: Result<T>) -> impl Future<Output = Outcome<T, Error>> + Send {
    async move {
        match result {
            Ok(v) => Outcome::Ok(v),
            Err(e) => Outcome::Err(e),
        }
    }
}

impl Connection for MemoryServer {
    type Tx<'conn>
        = MemoryTransaction
    where
        Self: 'conn;

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        done(self.apply(sql, params).map(|(rows, _)| rows))
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        done(self.apply(sql, params).map(|(_, affected)| affected))
    }

    fn begin_with(
        &self,
        _cx: &Cx,
        _isolation: IsolationLevel,
    ) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        done(Ok(MemoryTransaction {
            server: self.clone(),
            begin: self.snapshot(),
            savepoints: Mutex::new(Vec::new()),
        }))
    }

    fn ping(&self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        done(Ok(()))
    }

    #[allow(clippy::manual_async_fn)]
    fn close(self, _cx: &Cx) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

impl TransactionOps for MemoryTransaction {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        done(self.server.apply(sql, params).map(|(rows, _)| rows))
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        done(self.server.apply(sql, params).map(|(_, affected)| affected))
    }

    fn savepoint(&self, _cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.savepoints
            .lock()
            .expect("lock poisoned")
            .push((name.to_string(), self.server.snapshot()));
        done(Ok(()))
    }

    fn rollback_to(&self, _cx: &Cx, name: &str) -> impl Future<Output = Outcome<(), Error>> + Send {
        let found = self
            .savepoints
            .lock()
            .expect("lock poisoned")
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, tables)| tables.clone());
        let result = match found {
            Some(tables) => {
                self.server.restore(tables);
                Ok(())
            }
            None => Err(Error::Custom(format!("no savepoint named {name}"))),
        };
        done(result)
    }

    fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        done(Ok(()))
    }

    fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        self.server.restore(self.begin.clone());
        done(Ok(()))
    }
}

// ==================== Statement interpreter ====================

fn unsupported(what: &str) -> Error {
    Error::Custom(format!("memory server cannot run: {what}"))
}

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("valid regex"))
}

/// `[dbo].[Table].[Column]` or `[Column]` -> `Column`
fn column_ref(text: &str) -> Option<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    pattern(&RE, r"^(?:\[[^\]]+\]\.)*\[([^\]]+)\]$")
        .captures(text.trim())
        .map(|c| c[1].to_string())
}

fn get<'r>(row: &'r StoredRow, column: &str) -> &'r Value {
    row.iter()
        .find(|(c, _)| c == column)
        .map_or(&NULL, |(_, v)| v)
}

fn set(row: &mut StoredRow, column: &str, value: Value) {
    match row.iter_mut().find(|(c, _)| c == column) {
        Some(slot) => slot.1 = value,
        None => row.push((column.to_string(), value)),
    }
}

/// SQL equality: NULL matches nothing.
fn same(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    a.as_str().cmp(&b.as_str())
}

fn param(params: &[Value], token: &str) -> Result<Value> {
    let index: usize = token
        .trim()
        .trim_start_matches('@')
        .parse()
        .map_err(|_| unsupported(token))?;
    params.get(index).cloned().ok_or_else(|| unsupported(token))
}

fn run(store: &mut Store, sql: &str, params: &[Value]) -> Result<(Vec<Row>, u64)> {
    if sql.starts_with("MERGE ") || sql.contains("\nMERGE ") {
        merge(store, sql, params)
    } else if sql.starts_with(";WITH ") {
        paged_select(store, sql, params).map(|rows| (rows, 0))
    } else if let Some(inner) = sql
        .strip_prefix("IF EXISTS (\n")
        .and_then(|rest| rest.strip_suffix("\n) SELECT 1 ELSE SELECT 0"))
    {
        let lines: Vec<&str> = inner.lines().collect();
        let plan = SelectPlan::parse(&lines, params)?;
        let found = !plan.evaluate(store).is_empty();
        Ok((vec![scalar(Value::Int(i32::from(found)))], 0))
    } else if sql.starts_with("SELECT ") {
        let lines: Vec<&str> = sql.lines().collect();
        let plan = SelectPlan::parse(&lines, params)?;
        let rows = plan.evaluate(store);
        Ok((plan.project(&rows), 0))
    } else if sql.contains("INSERT INTO ") {
        insert(store, sql, params)
    } else if sql.starts_with("UPDATE ") || sql.starts_with("DELETE ") {
        modify(store, sql, params).map(|affected| (Vec::new(), affected))
    } else {
        Err(unsupported(sql))
    }
}

fn scalar(value: Value) -> Row {
    Row::new(vec![String::new()], vec![value])
}

enum Projection {
    Columns(Vec<(String, String)>),
    Count,
    One,
}

enum Condition {
    Equals(String, Value),
    In(String, Vec<Value>),
    IsNull(String, bool),
    Never,
}

impl Condition {
    fn holds(&self, row: &StoredRow) -> bool {
        match self {
            Condition::Equals(column, value) => same(get(row, column), value),
            Condition::In(column, values) => values.iter().any(|v| same(get(row, column), v)),
            Condition::IsNull(column, negated) => get(row, column).is_null() != *negated,
            Condition::Never => false,
        }
    }
}

struct SelectPlan {
    projection: Projection,
    table: String,
    conditions: Vec<Condition>,
    order: Vec<(String, bool)>,
    window: Option<(usize, usize)>,
}

impl SelectPlan {
    fn parse(lines: &[&str], params: &[Value]) -> Result<Self> {
        static FROM: OnceLock<Regex> = OnceLock::new();
        static COLUMN: OnceLock<Regex> = OnceLock::new();
        static EQUALS: OnceLock<Regex> = OnceLock::new();
        static IN: OnceLock<Regex> = OnceLock::new();
        static NULL_CHECK: OnceLock<Regex> = OnceLock::new();
        static WINDOW: OnceLock<Regex> = OnceLock::new();

        let mut plan = SelectPlan {
            projection: Projection::One,
            table: String::new(),
            conditions: Vec::new(),
            order: Vec::new(),
            window: None,
        };
        for line in lines {
            if let Some(list) = line.strip_prefix("SELECT ") {
                plan.projection = match list {
                    "COUNT(1)" => Projection::Count,
                    "1" => Projection::One,
                    _ => Projection::Columns(
                        list.split(", ")
                            .map(|item| -> Result<(String, String)> {
                                let c = pattern(
                                    &COLUMN,
                                    r"^(?:\[[^\]]+\]\.)*\[([^\]]+)\](?: AS \[([^\]]+)\])?$",
                                )
                                .captures(item)
                                .ok_or_else(|| unsupported(item))?;
                                let column = c[1].to_string();
                                let name = c.get(2).map_or(column.clone(), |m| m.as_str().to_string());
                                Ok((column, name))
                            })
                            .collect::<Result<_>>()?,
                    ),
                };
            } else if line.starts_with("FROM ") {
                let c = pattern(&FROM, r"^FROM \[[^\]]+\]\.\[([^\]]+)\]")
                    .captures(line)
                    .ok_or_else(|| unsupported(line))?;
                plan.table = c[1].to_string();
            } else if let Some(conditions) = line.strip_prefix("WHERE ") {
                for condition in conditions.split(" AND ") {
                    if condition.starts_with("EXISTS (") || condition == "1 = 1" {
                        continue;
                    }
                    if condition == "1 = 0" {
                        plan.conditions.push(Condition::Never);
                    } else if let Some(c) =
                        pattern(&EQUALS, r"^(.+) (?:=|LIKE) (@\d+)$").captures(condition)
                    {
                        let column = column_ref(&c[1]).ok_or_else(|| unsupported(condition))?;
                        plan.conditions
                            .push(Condition::Equals(column, param(params, &c[2])?));
                    } else if let Some(c) = pattern(&IN, r"^(.+) IN \(([^)]*)\)$").captures(condition) {
                        let column = column_ref(&c[1]).ok_or_else(|| unsupported(condition))?;
                        let values = c[2]
                            .split(", ")
                            .map(|token| param(params, token))
                            .collect::<Result<_>>()?;
                        plan.conditions.push(Condition::In(column, values));
                    } else if let Some(c) =
                        pattern(&NULL_CHECK, r"^(.+) IS (NOT )?NULL$").captures(condition)
                    {
                        let column = column_ref(&c[1]).ok_or_else(|| unsupported(condition))?;
                        plan.conditions
                            .push(Condition::IsNull(column, c.get(2).is_some()));
                    } else {
                        return Err(unsupported(condition));
                    }
                }
            } else if let Some(terms) = line.strip_prefix("ORDER BY ") {
                for term in terms.split(", ") {
                    let (term, descending) = match term.strip_suffix(" DESC") {
                        Some(rest) => (rest, true),
                        None => (term, false),
                    };
                    let column = column_ref(term).ok_or_else(|| unsupported(term))?;
                    plan.order.push((column, descending));
                }
            } else if let Some(c) = pattern(&WINDOW, r"^OFFSET (@\d+) ROWS FETCH NEXT (@\d+) ROWS ONLY$")
                .captures(line)
            {
                let bound = |token: &str| -> Result<usize> {
                    param(params, token)?
                        .as_i64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| unsupported(token))
                };
                plan.window = Some((bound(&c[1])?, bound(&c[2])?));
            } else if *line == "OPTION (RECOMPILE)" {
                continue;
            } else {
                return Err(unsupported(line));
            }
        }
        Ok(plan)
    }

    fn evaluate(&self, store: &Store) -> Vec<StoredRow> {
        let mut rows: Vec<StoredRow> = store
            .tables
            .get(&self.table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|row| self.conditions.iter().all(|c| c.holds(row)))
            .collect();
        rows.sort_by(|a, b| {
            self.order
                .iter()
                .map(|(column, descending)| {
                    let ordering = compare(get(a, column), get(b, column));
                    if *descending { ordering.reverse() } else { ordering }
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        match self.window {
            Some((offset, fetch)) => rows.into_iter().skip(offset).take(fetch).collect(),
            None => rows,
        }
    }

    fn project(&self, rows: &[StoredRow]) -> Vec<Row> {
        match &self.projection {
            Projection::Count => {
                let count = i32::try_from(rows.len()).unwrap_or(i32::MAX);
                vec![scalar(Value::Int(count))]
            }
            Projection::One => rows.iter().map(|_| scalar(Value::Int(1))).collect(),
            Projection::Columns(columns) => rows
                .iter()
                .map(|row| {
                    Row::new(
                        columns.iter().map(|(_, name)| name.clone()).collect(),
                        columns.iter().map(|(c, _)| get(row, c).clone()).collect(),
                    )
                })
                .collect(),
        }
    }
}

fn paged_select(store: &Store, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let lines: Vec<&str> = sql.lines().collect();
    let close = lines
        .iter()
        .position(|line| *line == ")")
        .ok_or_else(|| unsupported(sql))?;
    let cte = SelectPlan::parse(&lines[1..close], params)?;
    let outer = SelectPlan::parse(&lines[close + 1..], params)?;
    let Projection::Columns(keys) = &cte.projection else {
        return Err(unsupported(sql));
    };

    let page = cte.evaluate(store);
    let in_page = |row: &StoredRow| {
        page.iter()
            .any(|p| keys.iter().all(|(k, _)| same(get(p, k), get(row, k))))
    };
    let rows: Vec<StoredRow> = outer.evaluate(store).into_iter().filter(|r| in_page(r)).collect();
    Ok(outer.project(&rows))
}

fn insert(store: &mut Store, sql: &str, params: &[Value]) -> Result<(Vec<Row>, u64)> {
    static INSERT: OnceLock<Regex> = OnceLock::new();
    let c = pattern(&INSERT, r"INSERT INTO \[[^\]]+\]\.\[([^\]]+)\] \(([^)]*)\)")
        .captures(sql)
        .ok_or_else(|| unsupported(sql))?;
    let table = store.tables.entry(c[1].to_string()).or_default();
    let mut row: StoredRow = c[2]
        .split(", ")
        .filter_map(column_ref)
        .zip(params.iter().cloned())
        .collect();
    let identity = table.next_identity();
    if let Some((column, value)) = &identity {
        set(&mut row, column, value.clone());
    }
    table.rows.push(row);

    match identity {
        // SCOPE_IDENTITY() is NUMERIC
        Some((_, id)) if sql.starts_with("DECLARE @NewId") => {
            let id = id.as_i64().unwrap_or_default();
            Ok((vec![scalar(Value::Decimal(id.to_string()))], 1))
        }
        _ => Ok((Vec::new(), 1)),
    }
}

/// UPDATE or DELETE of a single unaliased table.
fn modify(store: &mut Store, sql: &str, params: &[Value]) -> Result<u64> {
    static TARGET: OnceLock<Regex> = OnceLock::new();
    static ASSIGN: OnceLock<Regex> = OnceLock::new();

    let lines: Vec<&str> = sql.lines().collect();
    let c = pattern(&TARGET, r"^(UPDATE|DELETE) \[[^\]]+\]\.\[([^\]]+)\]$")
        .captures(lines[0])
        .ok_or_else(|| unsupported(sql))?;
    let deleting = &c[1] == "DELETE";
    let table_name = c[2].to_string();

    let (assignments, filters) = if deleting {
        (Vec::new(), &lines[1..])
    } else {
        let set = lines
            .get(1)
            .and_then(|l| l.strip_prefix("SET "))
            .ok_or_else(|| unsupported(sql))?;
        let assignments = pattern(&ASSIGN, r"\[([^\]]+)\] = (@\d+)")
            .captures_iter(set)
            .map(|a| -> Result<(String, Value)> { Ok((a[1].to_string(), param(params, &a[2])?)) })
            .collect::<Result<Vec<_>>>()?;
        (assignments, &lines[2..])
    };
    let mut plan = SelectPlan::parse(filters, params)?;
    plan.table = table_name.clone();

    let table = store.tables.entry(table_name).or_default();
    let before = table.rows.len();
    if deleting {
        table
            .rows
            .retain(|row| !plan.conditions.iter().all(|c| c.holds(row)));
        return Ok((before - table.rows.len()) as u64);
    }
    let mut affected = 0;
    for row in &mut table.rows {
        if plan.conditions.iter().all(|c| c.holds(row)) {
            for (column, value) in &assignments {
                set(row, column, value.clone());
            }
            affected += 1;
        }
    }
    Ok(affected)
}

fn merge(store: &mut Store, sql: &str, params: &[Value]) -> Result<(Vec<Row>, u64)> {
    let tvp = params
        .iter()
        .find_map(Value::as_table)
        .ok_or_else(|| unsupported("merge without a table-valued parameter"))?;
    let mut output = Vec::new();
    let mut affected = 0;
    for block in sql.split("\n\n") {
        let (count, rows) = merge_block(store, block, tvp)?;
        affected += count;
        output.extend(rows);
    }
    Ok((output, affected))
}

fn pairs(line: &str) -> Vec<(String, String)> {
    static PAIR: OnceLock<Regex> = OnceLock::new();
    pattern(&PAIR, r"\[Target\]\.\[([^\]]+)\] = \[Source\]\.\[([^\]]+)\]")
        .captures_iter(line)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

fn line_starting<'a>(lines: &[&'a str], prefix: &str) -> Option<&'a str> {
    lines.iter().copied().find(|line| line.starts_with(prefix))
}

fn derived_rows(using: &str, tvp: &[StoredRow]) -> Result<Vec<StoredRow>> {
    static DERIVED: OnceLock<Regex> = OnceLock::new();
    static ITEM: OnceLock<Regex> = OnceLock::new();
    static NOT_NULL: OnceLock<Regex> = OnceLock::new();

    let c = pattern(&DERIVED, r"^\(SELECT (.+) FROM @\w+(?: WHERE (.+))?\)$")
        .captures(using)
        .ok_or_else(|| unsupported(using))?;
    let columns: Vec<(String, String)> = c[1]
        .split(", ")
        .map(|item| -> Result<(String, String)> {
            let m = pattern(&ITEM, r"^\[([^\]]+)\](?: AS \[([^\]]+)\])?$")
                .captures(item)
                .ok_or_else(|| unsupported(item))?;
            let column = m[1].to_string();
            let name = m.get(2).map_or(column.clone(), |n| n.as_str().to_string());
            Ok((column, name))
        })
        .collect::<Result<_>>()?;
    let required: Vec<String> = match c.get(2) {
        Some(filters) => filters
            .as_str()
            .split(" AND ")
            .map(|f| {
                pattern(&NOT_NULL, r"^\[([^\]]+)\] IS NOT NULL$")
                    .captures(f)
                    .map(|m| m[1].to_string())
                    .ok_or_else(|| unsupported(f))
            })
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };

    Ok(tvp
        .iter()
        .filter(|row| required.iter().all(|c| !get(row, c).is_null()))
        .map(|row| {
            columns
                .iter()
                .map(|(column, name)| (name.clone(), get(row, column).clone()))
                .collect()
        })
        .collect())
}

fn tvp_rows(tvp: &TableValue) -> Vec<StoredRow> {
    tvp.rows
        .iter()
        .map(|values| tvp.columns.iter().cloned().zip(values.iter().cloned()).collect())
        .collect()
}

fn merge_block(store: &mut Store, block: &str, tvp: &TableValue) -> Result<(u64, Vec<Row>)> {
    static TARGET: OnceLock<Regex> = OnceLock::new();
    static INSERT: OnceLock<Regex> = OnceLock::new();
    static DELETE: OnceLock<Regex> = OnceLock::new();
    static OUTPUT: OnceLock<Regex> = OnceLock::new();

    let lines: Vec<&str> = block.lines().collect();
    let target = line_starting(&lines, "MERGE ")
        .and_then(|l| pattern(&TARGET, r"^MERGE \[[^\]]+\]\.\[([^\]]+)\] AS \[Target\]$").captures(l))
        .map(|c| c[1].to_string())
        .ok_or_else(|| unsupported(block))?;
    let using = line_starting(&lines, "USING ")
        .and_then(|l| l.strip_prefix("USING "))
        .and_then(|l| l.strip_suffix(" AS [Source]"))
        .ok_or_else(|| unsupported(block))?;

    let parameter_rows = tvp_rows(tvp);
    let source_rows = if using.starts_with("(SELECT ") {
        derived_rows(using, &parameter_rows)?
    } else {
        parameter_rows.clone()
    };

    let keys = line_starting(&lines, "ON (").map(pairs).unwrap_or_default();
    let updates = line_starting(&lines, "WHEN MATCHED THEN UPDATE SET ")
        .map(pairs)
        .unwrap_or_default();
    let inserts: Vec<(String, String)> = line_starting(&lines, "WHEN NOT MATCHED BY TARGET")
        .and_then(|l| pattern(&INSERT, r"INSERT \(([^)]*)\) VALUES \(([^)]*)\)").captures(l))
        .map(|c| {
            c[1].split(", ")
                .filter_map(column_ref)
                .zip(c[2].split(", ").filter_map(column_ref))
                .collect()
        })
        .ok_or_else(|| unsupported(block))?;
    let delete_scope = line_starting(&lines, "WHEN NOT MATCHED BY SOURCE")
        .and_then(|l| {
            pattern(&DELETE, r"\[Target\]\.\[([^\]]+)\] IN \(SELECT \[([^\]]+)\] FROM")
                .captures(l)
        })
        .map(|c| (c[1].to_string(), c[2].to_string()));
    if keys.is_empty() {
        return Err(unsupported(block));
    }

    let table = store.tables.entry(target).or_default();
    let matches = |target: &StoredRow, source: &StoredRow| {
        keys.iter().all(|(t, s)| same(get(target, t), get(source, s)))
    };

    let mut affected = 0u64;
    let mut touched: Vec<StoredRow> = Vec::new();
    for source in &source_rows {
        let position = table.rows.iter().position(|row| matches(row, source));
        let row = match position {
            Some(index) => {
                let row = &mut table.rows[index];
                for (t, s) in &updates {
                    set(row, t, get(source, s).clone());
                }
                row.clone()
            }
            None => {
                let mut row: StoredRow = inserts
                    .iter()
                    .map(|(t, s)| (t.clone(), get(source, s).clone()))
                    .collect();
                if let Some((column, value)) = table.next_identity() {
                    set(&mut row, &column, value);
                }
                table.rows.push(row.clone());
                row
            }
        };
        touched.push(row);
        affected += 1;
    }

    if let Some((target_column, source_column)) = delete_scope {
        let scope: Vec<&Value> = parameter_rows
            .iter()
            .map(|row| get(row, &source_column))
            .collect();
        let before = table.rows.len();
        table.rows.retain(|row| {
            let in_scope = scope.iter().any(|v| same(get(row, &target_column), v));
            let matched = source_rows.iter().any(|source| matches(row, source));
            !in_scope || matched
        });
        affected += (before - table.rows.len()) as u64;
    }

    let Some(select) = line_starting(&lines, "SELECT ") else {
        return Ok((affected, Vec::new()));
    };
    let columns: Vec<(String, String)> = select
        .trim_start_matches("SELECT ")
        .split(", ")
        .map(|item| {
            pattern(&OUTPUT, r"^(i|t|s)\.\[([^\]]+)\]$")
                .captures(item)
                .map(|c| (c[1].to_string(), c[2].to_string()))
                .ok_or_else(|| unsupported(item))
        })
        .collect::<Result<_>>()?;

    let mut output = Vec::new();
    for source in &parameter_rows {
        let Some(target) = touched.iter().rev().find(|row| matches(row, source)) else {
            continue;
        };
        output.push(Row::new(
            columns.iter().map(|(_, c)| c.clone()).collect(),
            columns
                .iter()
                .map(|(side, c)| {
                    if side == "s" {
                        get(source, c).clone()
                    } else {
                        get(target, c).clone()
                    }
                })
                .collect(),
        ));
    }
    Ok((affected, output))
}
