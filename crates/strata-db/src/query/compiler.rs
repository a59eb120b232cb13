//! SQL statement AST and compiler.
//!
//! The queryset layer lowers its state into a [`Query`] (or the pieces of an
//! INSERT/UPDATE/DELETE) with every column already qualified by its join
//! alias. [`SqlCompiler`] renders those into parameterized SQL for one backend.
//! Nothing here knows about models; name resolution happens in
//! [`resolver`](super::resolver) and [`builder`](super::builder).

use crate::query::lookups::Lookup;
use crate::value::Value;

/// The SQL dialect a statement is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackendType {
    PostgreSQL,
    SQLite,
}

/// Alias used for the base table inside correlated subqueries.
pub const SUBQUERY_ALIAS: &str = "U0";

/// Quotes an identifier, doubling embedded quotes.
pub fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// A column qualified by the alias of the table it is read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }

    fn sql(&self) -> String {
        format!("{}.{}", quote(&self.alias), quote(&self.column))
    }
}

/// A table in a FROM or JOIN clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub table: String,
    /// Emitted as `AS "alias"` when it differs from the table name.
    pub alias: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, table: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            schema: schema.map(str::to_string),
            alias: table.clone(),
            table,
        }
    }

    #[must_use]
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    fn name_sql(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote(schema), quote(&self.table)),
            None => quote(&self.table),
        }
    }

    fn sql(&self) -> String {
        if self.alias == self.table {
            self.name_sql()
        } else {
            format!("{} AS {}", self.name_sql(), quote(&self.alias))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

impl JoinType {
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// One join: `{kind} table AS alias ON alias.right_column = left_alias.left_column`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: TableRef,
    pub join_type: JoinType,
    pub left: ColumnRef,
    pub right_column: String,
}

/// A boolean expression over qualified columns.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    Condition {
        column: ColumnRef,
        lookup: Lookup,
        value: Value,
    },
    And(Vec<WhereNode>),
    Or(Vec<WhereNode>),
    Not(Box<WhereNode>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub descending: bool,
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub from: TableRef,
    /// Selected columns, read back positionally.
    pub columns: Vec<ColumnRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<WhereNode>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub distinct: bool,
    pub for_update: bool,
}

impl Query {
    pub fn new(from: TableRef) -> Self {
        Self {
            from,
            columns: Vec::new(),
            joins: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
            for_update: false,
        }
    }
}

/// The filter of an UPDATE or DELETE.
///
/// Without joins the condition is applied directly, qualified by the table
/// name. With joins it becomes a correlated `EXISTS` over the base table
/// aliased as [`SUBQUERY_ALIAS`], matched on the primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationFilter {
    pub joins: Vec<Join>,
    pub where_clause: Option<WhereNode>,
    pub pk_column: String,
}

/// A generic database row passed from the connection layer to the ORM.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row from column names and values of equal length.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The first value named `column`.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_by_index(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Renders statements for one backend.
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    backend: DatabaseBackendType,
}

impl SqlCompiler {
    pub const fn new(backend: DatabaseBackendType) -> Self {
        Self { backend }
    }

    pub const fn backend(&self) -> DatabaseBackendType {
        self.backend
    }

    /// `$n` on PostgreSQL, `?` elsewhere. `index` is 1-based.
    fn placeholder(&self, index: usize) -> String {
        match self.backend {
            DatabaseBackendType::PostgreSQL => format!("${index}"),
            DatabaseBackendType::SQLite => "?".to_string(),
        }
    }

    fn push_param(&self, value: Value, params: &mut Vec<Value>) -> String {
        params.push(value);
        self.placeholder(params.len())
    }

    pub fn compile_select(&self, query: &Query) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.select_sql(query, &mut params, true);
        (sql, params)
    }

    /// `SELECT COUNT(*)`, wrapping the query when DISTINCT or slicing would
    /// otherwise be lost.
    pub fn compile_count(&self, query: &Query) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = if query.distinct || query.limit.is_some() || query.offset.is_some() {
            let inner = Query {
                order_by: Vec::new(),
                for_update: false,
                ..query.clone()
            };
            format!(
                "SELECT COUNT(*) FROM ({}) AS {}",
                self.select_sql(&inner, &mut params, false),
                quote("subquery")
            )
        } else {
            let mut sql = String::from("SELECT COUNT(*)");
            self.push_from_where(query, &mut sql, &mut params);
            sql
        };
        (sql, params)
    }

    /// `SELECT 1 ... LIMIT 1`; never fetches row data.
    pub fn compile_exists(&self, query: &Query) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = if query.distinct || query.limit.is_some() || query.offset.is_some() {
            let inner = Query {
                order_by: Vec::new(),
                for_update: false,
                ..query.clone()
            };
            format!(
                "SELECT 1 FROM ({}) AS {} LIMIT 1",
                self.select_sql(&inner, &mut params, false),
                quote("subquery")
            )
        } else {
            let mut sql = String::from("SELECT 1");
            self.push_from_where(query, &mut sql, &mut params);
            sql.push_str(" LIMIT 1");
            sql
        };
        (sql, params)
    }

    /// A single multi-row INSERT. Every row must have one value per column.
    /// With `returning`, PostgreSQL reports that column of each inserted row.
    pub fn compile_insert(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: &[Vec<Value>],
        returning: Option<&str>,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("INSERT INTO {}", table.name_sql());

        if columns.is_empty() {
            sql.push_str(" DEFAULT VALUES");
        } else {
            let cols: Vec<String> = columns.iter().map(|c| quote(c)).collect();
            sql.push_str(&format!(" ({}) VALUES ", cols.join(", ")));
            let tuples: Vec<String> = rows
                .iter()
                .map(|row| {
                    let phs: Vec<String> = row
                        .iter()
                        .map(|v| self.push_param(v.clone(), &mut params))
                        .collect();
                    format!("({})", phs.join(", "))
                })
                .collect();
            sql.push_str(&tuples.join(", "));
        }

        if let (Some(col), DatabaseBackendType::PostgreSQL) = (returning, self.backend) {
            sql.push_str(&format!(" RETURNING {}", quote(col)));
        }
        (sql, params)
    }

    pub fn compile_update(
        &self,
        table: &TableRef,
        assignments: &[(String, Value)],
        filter: &MutationFilter,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sets: Vec<String> = assignments
            .iter()
            .map(|(col, val)| {
                let ph = self.push_param(val.clone(), &mut params);
                format!("{} = {ph}", quote(col))
            })
            .collect();
        let mut sql = format!("UPDATE {} SET {}", table.name_sql(), sets.join(", "));
        self.push_mutation_where(table, filter, &mut sql, &mut params);
        (sql, params)
    }

    pub fn compile_delete(&self, table: &TableRef, filter: &MutationFilter) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", table.name_sql());
        self.push_mutation_where(table, filter, &mut sql, &mut params);
        (sql, params)
    }

    fn select_sql(&self, query: &Query, params: &mut Vec<Value>, with_tail: bool) -> String {
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }
        if query.columns.is_empty() {
            sql.push('*');
        } else {
            let cols: Vec<String> = query.columns.iter().map(ColumnRef::sql).collect();
            sql.push_str(&cols.join(", "));
        }
        self.push_from_where(query, &mut sql, params);

        if with_tail && !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("{} {dir}", o.column.sql())
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        match (query.limit, query.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => match self.backend {
                DatabaseBackendType::SQLite => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
                DatabaseBackendType::PostgreSQL => sql.push_str(&format!(" OFFSET {offset}")),
            },
            (None, None) => {}
        }

        if with_tail && query.for_update && self.backend == DatabaseBackendType::PostgreSQL {
            sql.push_str(" FOR UPDATE");
        }
        sql
    }

    fn push_from_where(&self, query: &Query, sql: &mut String, params: &mut Vec<Value>) {
        sql.push_str(&format!(" FROM {}", query.from.sql()));
        self.push_joins(&query.joins, sql);
        if let Some(node) = &query.where_clause {
            sql.push_str(" WHERE ");
            self.compile_where_node(node, sql, params);
        }
    }

    fn push_joins(&self, joins: &[Join], sql: &mut String) {
        for join in joins {
            sql.push_str(&format!(
                " {} {} ON {}.{} = {}",
                join.join_type.sql_keyword(),
                join.table.sql(),
                quote(&join.table.alias),
                quote(&join.right_column),
                join.left.sql()
            ));
        }
    }

    fn push_mutation_where(
        &self,
        table: &TableRef,
        filter: &MutationFilter,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) {
        if filter.joins.is_empty() {
            if let Some(node) = &filter.where_clause {
                sql.push_str(" WHERE ");
                self.compile_where_node(node, sql, params);
            }
            return;
        }

        let inner = TableRef {
            alias: SUBQUERY_ALIAS.to_string(),
            ..table.clone()
        };
        sql.push_str(&format!(" WHERE EXISTS (SELECT 1 FROM {}", inner.sql()));
        self.push_joins(&filter.joins, sql);
        sql.push_str(&format!(
            " WHERE {} = {}",
            ColumnRef::new(SUBQUERY_ALIAS, &filter.pk_column).sql(),
            ColumnRef::new(&table.table, &filter.pk_column).sql()
        ));
        if let Some(node) = &filter.where_clause {
            sql.push_str(" AND (");
            self.compile_where_node(node, sql, params);
            sql.push(')');
        }
        sql.push(')');
    }

    pub(crate) fn compile_where_node(&self, node: &WhereNode, sql: &mut String, params: &mut Vec<Value>) {
        match node {
            WhereNode::Condition {
                column,
                lookup,
                value,
            } => self.compile_lookup(&column.sql(), *lookup, value, sql, params),
            WhereNode::And(children) => self.compile_group(children, " AND ", "1=1", sql, params),
            WhereNode::Or(children) => self.compile_group(children, " OR ", "1=0", sql, params),
            WhereNode::Not(inner) => {
                sql.push_str("NOT (");
                self.compile_where_node(inner, sql, params);
                sql.push(')');
            }
        }
    }

    fn compile_group(
        &self,
        children: &[WhereNode],
        sep: &str,
        empty: &str,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) {
        match children {
            [] => sql.push_str(empty),
            [only] => self.compile_where_node(only, sql, params),
            _ => {
                sql.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(sep);
                    }
                    self.compile_where_node(child, sql, params);
                }
                sql.push(')');
            }
        }
    }

    fn compile_like(&self, column: &str, pattern: String, insensitive: bool, sql: &mut String, params: &mut Vec<Value>) {
        let ph = self.push_param(Value::String(pattern), params);
        match (insensitive, self.backend) {
            (true, DatabaseBackendType::PostgreSQL) => {
                sql.push_str(&format!("{column} ILIKE {ph} ESCAPE '\\'"));
            }
            (true, DatabaseBackendType::SQLite) => {
                sql.push_str(&format!("LOWER({column}) LIKE LOWER({ph}) ESCAPE '\\'"));
            }
            (false, _) => sql.push_str(&format!("{column} LIKE {ph} ESCAPE '\\'")),
        }
    }

    fn compile_lookup(
        &self,
        column: &str,
        lookup: Lookup,
        value: &Value,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) {
        let text = || escape_like(&value.to_string());
        match lookup {
            Lookup::Exact if value.is_null() => sql.push_str(&format!("{column} IS NULL")),
            Lookup::Exact => {
                let ph = self.push_param(value.clone(), params);
                sql.push_str(&format!("{column} = {ph}"));
            }
            Lookup::IExact => {
                let ph = self.push_param(value.clone(), params);
                sql.push_str(&format!("LOWER({column}) = LOWER({ph})"));
            }
            Lookup::Contains => self.compile_like(column, format!("%{}%", text()), false, sql, params),
            Lookup::IContains => self.compile_like(column, format!("%{}%", text()), true, sql, params),
            Lookup::StartsWith => self.compile_like(column, format!("{}%", text()), false, sql, params),
            Lookup::IStartsWith => self.compile_like(column, format!("{}%", text()), true, sql, params),
            Lookup::EndsWith => self.compile_like(column, format!("%{}", text()), false, sql, params),
            Lookup::IEndsWith => self.compile_like(column, format!("%{}", text()), true, sql, params),
            Lookup::In => {
                let items: &[Value] = match value {
                    Value::List(items) => items,
                    other => std::slice::from_ref(other),
                };
                if items.is_empty() {
                    sql.push_str("1=0");
                } else {
                    let phs: Vec<String> = items
                        .iter()
                        .map(|v| self.push_param(v.clone(), params))
                        .collect();
                    sql.push_str(&format!("{column} IN ({})", phs.join(", ")));
                }
            }
            Lookup::Gt | Lookup::Gte | Lookup::Lt | Lookup::Lte => {
                let op = match lookup {
                    Lookup::Gt => ">",
                    Lookup::Gte => ">=",
                    Lookup::Lt => "<",
                    _ => "<=",
                };
                let ph = self.push_param(value.clone(), params);
                sql.push_str(&format!("{column} {op} {ph}"));
            }
            Lookup::IsNull => {
                if value.as_bool().unwrap_or(true) {
                    sql.push_str(&format!("{column} IS NULL"));
                } else {
                    sql.push_str(&format!("{column} IS NOT NULL"));
                }
            }
        }
    }
}

/// Escapes LIKE metacharacters with a backslash.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> SqlCompiler {
        SqlCompiler::new(DatabaseBackendType::PostgreSQL)
    }

    fn sqlite() -> SqlCompiler {
        SqlCompiler::new(DatabaseBackendType::SQLite)
    }

    fn cond(alias: &str, column: &str, lookup: Lookup, value: impl Into<Value>) -> WhereNode {
        WhereNode::Condition {
            column: ColumnRef::new(alias, column),
            lookup,
            value: value.into(),
        }
    }

    fn tracks_query() -> Query {
        let mut q = Query::new(TableRef::new(None, "tracks"));
        q.columns = vec![
            ColumnRef::new("tracks", "id"),
            ColumnRef::new("tracks", "title"),
        ];
        q
    }

    #[test]
    fn test_select_basic() {
        let mut q = tracks_query();
        q.where_clause = Some(cond("tracks", "title", Lookup::Exact, "Kokomo"));
        q.order_by = vec![OrderBy {
            column: ColumnRef::new("tracks", "id"),
            descending: false,
        }];
        q.limit = Some(2);
        let (sql, params) = pg().compile_select(&q);
        assert_eq!(
            sql,
            "SELECT \"tracks\".\"id\", \"tracks\".\"title\" FROM \"tracks\" \
             WHERE \"tracks\".\"title\" = $1 ORDER BY \"tracks\".\"id\" ASC LIMIT 2"
        );
        assert_eq!(params, vec![Value::from("Kokomo")]);
    }

    #[test]
    fn test_select_with_join_and_schema() {
        let mut q = tracks_query();
        q.from = TableRef::new(Some("tenant"), "tracks");
        q.joins.push(Join {
            table: TableRef::new(Some("tenant"), "albums").aliased("album"),
            join_type: JoinType::Left,
            left: ColumnRef::new("tracks", "album"),
            right_column: "id".into(),
        });
        let (sql, _) = sqlite().compile_select(&q);
        assert_eq!(
            sql,
            "SELECT \"tracks\".\"id\", \"tracks\".\"title\" FROM \"tenant\".\"tracks\" \
             LEFT JOIN \"tenant\".\"albums\" AS \"album\" ON \"album\".\"id\" = \"tracks\".\"album\""
        );
    }

    #[test]
    fn test_offset_without_limit() {
        let mut q = tracks_query();
        q.offset = Some(5);
        assert!(sqlite().compile_select(&q).0.ends_with("LIMIT -1 OFFSET 5"));
        assert!(pg().compile_select(&q).0.ends_with(" OFFSET 5"));
    }

    #[test]
    fn test_for_update_only_on_postgres() {
        let mut q = tracks_query();
        q.for_update = true;
        assert!(pg().compile_select(&q).0.ends_with("FOR UPDATE"));
        assert!(!sqlite().compile_select(&q).0.contains("FOR UPDATE"));
    }

    #[test]
    fn test_count_plain_and_wrapped() {
        let mut q = tracks_query();
        q.where_clause = Some(cond("tracks", "id", Lookup::Gt, 3));
        let (sql, params) = pg().compile_count(&q);
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM \"tracks\" WHERE \"tracks\".\"id\" > $1"
        );
        assert_eq!(params.len(), 1);

        q.distinct = true;
        let (sql, _) = pg().compile_count(&q);
        assert!(sql.starts_with("SELECT COUNT(*) FROM (SELECT DISTINCT"));
        assert!(sql.ends_with("AS \"subquery\""));
    }

    #[test]
    fn test_exists() {
        let q = tracks_query();
        let (sql, _) = sqlite().compile_exists(&q);
        assert_eq!(sql, "SELECT 1 FROM \"tracks\" LIMIT 1");
    }

    #[test]
    fn test_where_groups() {
        let mut q = tracks_query();
        q.where_clause = Some(WhereNode::And(vec![
            WhereNode::Or(vec![
                cond("tracks", "title", Lookup::Exact, "a"),
                cond("tracks", "title", Lookup::Exact, "b"),
            ]),
            WhereNode::Not(Box::new(cond("tracks", "id", Lookup::Exact, Value::Null))),
        ]));
        let (sql, params) = pg().compile_select(&q);
        assert!(sql.ends_with(
            "WHERE ((\"tracks\".\"title\" = $1 OR \"tracks\".\"title\" = $2) AND NOT (\"tracks\".\"id\" IS NULL))"
        ));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_empty_groups() {
        let mut sql = String::new();
        let mut params = Vec::new();
        pg().compile_where_node(&WhereNode::And(vec![]), &mut sql, &mut params);
        assert_eq!(sql, "1=1");
        sql.clear();
        pg().compile_where_node(&WhereNode::Or(vec![]), &mut sql, &mut params);
        assert_eq!(sql, "1=0");
    }

    #[test]
    fn test_lookups() {
        let render = |c: SqlCompiler, node: WhereNode| {
            let mut sql = String::new();
            let mut params = Vec::new();
            c.compile_where_node(&node, &mut sql, &mut params);
            (sql, params)
        };

        let (sql, params) = render(pg(), cond("t", "name", Lookup::IContains, "50%_off"));
        assert_eq!(sql, "\"t\".\"name\" ILIKE $1 ESCAPE '\\'");
        assert_eq!(params, vec![Value::from("%50\\%\\_off%")]);

        let (sql, _) = render(sqlite(), cond("t", "name", Lookup::IStartsWith, "a"));
        assert_eq!(sql, "LOWER(\"t\".\"name\") LIKE LOWER(?) ESCAPE '\\'");

        let (sql, params) = render(
            pg(),
            cond("t", "id", Lookup::In, vec![Value::Int(1), Value::Int(2)]),
        );
        assert_eq!(sql, "\"t\".\"id\" IN ($1, $2)");
        assert_eq!(params.len(), 2);

        let (sql, params) = render(pg(), cond("t", "id", Lookup::In, Vec::<Value>::new()));
        assert_eq!(sql, "1=0");
        assert!(params.is_empty());

        let (sql, _) = render(pg(), cond("t", "team", Lookup::IsNull, false));
        assert_eq!(sql, "\"t\".\"team\" IS NOT NULL");

        let (sql, _) = render(pg(), cond("t", "n", Lookup::Lte, 4));
        assert_eq!(sql, "\"t\".\"n\" <= $1");

        let (sql, _) = render(sqlite(), cond("t", "n", Lookup::IExact, "X"));
        assert_eq!(sql, "LOWER(\"t\".\"n\") = LOWER(?)");
    }

    #[test]
    fn test_insert_multi_row() {
        let table = TableRef::new(None, "users");
        let (sql, params) = pg().compile_insert(
            &table,
            &["name".into(), "language".into()],
            &[
                vec!["a".into(), Value::Null],
                vec!["b".into(), "en".into()],
            ],
            Some("id"),
        );
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"name\", \"language\") VALUES ($1, $2), ($3, $4) RETURNING \"id\""
        );
        assert_eq!(params.len(), 4);

        let (sql, _) = sqlite().compile_insert(&table, &[], &[vec![]], Some("id"));
        assert_eq!(sql, "INSERT INTO \"users\" DEFAULT VALUES");
    }

    #[test]
    fn test_update_direct() {
        let table = TableRef::new(None, "tracks");
        let filter = MutationFilter {
            joins: vec![],
            where_clause: Some(cond("tracks", "album", Lookup::Exact, 1)),
            pk_column: "id".into(),
        };
        let (sql, params) =
            pg().compile_update(&table, &[("title".into(), "x".into())], &filter);
        assert_eq!(
            sql,
            "UPDATE \"tracks\" SET \"title\" = $1 WHERE \"tracks\".\"album\" = $2"
        );
        assert_eq!(params, vec![Value::from("x"), Value::Int(1)]);
    }

    #[test]
    fn test_delete_with_join_uses_exists() {
        let table = TableRef::new(None, "tracks");
        let filter = MutationFilter {
            joins: vec![Join {
                table: TableRef::new(None, "albums").aliased("album"),
                join_type: JoinType::Inner,
                left: ColumnRef::new(SUBQUERY_ALIAS, "album"),
                right_column: "id".into(),
            }],
            where_clause: Some(cond("album", "name", Lookup::Exact, "Malibu")),
            pk_column: "id".into(),
        };
        let (sql, params) = sqlite().compile_delete(&table, &filter);
        assert_eq!(
            sql,
            "DELETE FROM \"tracks\" WHERE EXISTS (SELECT 1 FROM \"tracks\" AS \"U0\" \
             INNER JOIN \"albums\" AS \"album\" ON \"album\".\"id\" = \"U0\".\"album\" \
             WHERE \"U0\".\"id\" = \"tracks\".\"id\" AND (\"album\".\"name\" = ?))"
        );
        assert_eq!(params, vec![Value::from("Malibu")]);
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_row_access() {
        let row = Row::new(vec!["id".into(), "name".into()], vec![Value::Int(1), "x".into()]);
        assert_eq!(row.get("name"), Some(&Value::from("x")));
        assert_eq!(row.get_by_index(0), Some(&Value::Int(1)));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.len(), 2);
    }
}
