use rusqlite::types::Value as SqlValue;

use super::fields::{QueryFieldList, SummaryFieldList};
use super::predicate::{BoolOp, FieldPredicate, Predicate, SqlOperator};
use crate::catalog::{
    ACTOR_FIELD, ContextKind, ID_FIELD, JOIN_KEY_FIELD, NOUN_FIELD, QueryScope, ScalarKind,
    VERB_FIELD,
};
use crate::error::QueryError;

/// Whose rows a query reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Any,
    Named(String),
}

impl Actor {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Any => "*",
            Self::Named(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortClause {
    pub column: String,
    pub descending: bool,
}

impl SortClause {
    fn sql(&self) -> String {
        format!(
            "{} {}",
            self.column,
            if self.descending { "DESC" } else { "ASC" }
        )
    }
}

/// SQL text plus the values bound to its `?` placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// A projected column of the row-fetch form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowColumn {
    pub name: String,
    pub kind: Option<ScalarKind>,
}

#[derive(Debug, Clone)]
pub struct CrawlQuery<'a> {
    scope: QueryScope<'a>,
    argstr: String,
    actor: Actor,
    index: i64,
    predicate: Predicate,
    sorts: Vec<SortClause>,
    tables: Vec<String>,
    joined: bool,
    summarise: Option<SummaryFieldList>,
    extra: QueryFieldList,
    random: bool,
}

impl<'a> CrawlQuery<'a> {
    /// Starts a query over the scope's table, ordered by the context's
    /// default sort field so that index 0 is the latest row.
    pub fn new(
        scope: QueryScope<'a>,
        actor: Actor,
        index: i64,
        argstr: impl Into<String>,
    ) -> Result<Self, QueryError> {
        let default_sort = scope.dbfield(scope.schema().default_sort())?;
        let mut query = Self {
            scope,
            argstr: argstr.into(),
            actor,
            index,
            predicate: Predicate::default(),
            sorts: vec![SortClause {
                column: default_sort,
                descending: false,
            }],
            tables: vec![scope.table_ref(scope.context_kind())],
            joined: false,
            summarise: None,
            extra: QueryFieldList::default(),
            random: false,
        };

        if let Actor::Named(name) = &query.actor {
            let column = scope.dbfield(ACTOR_FIELD)?;
            let node = Predicate::Field(FieldPredicate::text(column, SqlOperator::Eq, name.clone()));
            query.predicate.add(BoolOp::And, node);
        }
        query.check_joins();
        Ok(query)
    }

    #[must_use]
    pub fn scope(&self) -> QueryScope<'a> {
        self.scope
    }

    #[must_use]
    pub fn argstr(&self) -> &str {
        &self.argstr
    }

    #[must_use]
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    #[must_use]
    pub fn index(&self) -> i64 {
        self.index
    }

    #[must_use]
    pub fn sorts(&self) -> &[SortClause] {
        &self.sorts
    }

    #[must_use]
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    #[must_use]
    pub fn summarise(&self) -> Option<&SummaryFieldList> {
        self.summarise.as_ref()
    }

    #[must_use]
    pub fn extra(&self) -> &QueryFieldList {
        &self.extra
    }

    #[must_use]
    pub fn is_random(&self) -> bool {
        self.random
    }

    pub fn set_random(&mut self, random: bool) {
        self.random = random;
    }

    #[must_use]
    pub fn is_summary(&self) -> bool {
        self.summarise.is_some()
    }

    /// Grouped, or projecting only aggregate columns.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.is_summary() || self.extra.is_aggregate()
    }

    pub fn add_predicate(&mut self, op: BoolOp, node: Predicate) {
        self.predicate.add(op, node);
        self.check_joins();
    }

    pub fn set_extra(&mut self, extra: QueryFieldList) {
        self.extra = extra;
        self.check_joins();
    }

    /// Assigns the group-by list. Milestone-type pivots become a verb
    /// filter plus a group on the noun column; fields only reachable through
    /// the joined table force the join.
    pub fn set_summarise(&mut self, mut list: SummaryFieldList) {
        for field in list.fields_mut() {
            if !self.scope.is_pivot(&field.field) {
                continue;
            }
            if let Ok(column) = self.scope.dbfield(VERB_FIELD) {
                let verb = std::mem::replace(&mut field.field, NOUN_FIELD.to_string());
                let node = Predicate::Field(FieldPredicate::text(column, SqlOperator::Eq, verb));
                self.predicate.add(BoolOp::And, node);
            }
        }

        let needs_join = list
            .fields()
            .iter()
            .any(|field| !self.scope.directly_summarisable(&field.field));
        self.summarise = Some(list);
        if needs_join {
            self.fixup_join();
        }
        self.check_joins();
    }

    /// Replaces the row order so index 0 is the row with the largest
    /// (`max=`) or smallest (`min=`) value of `field`.
    pub fn set_row_sort(&mut self, field: &str, largest_first: bool) -> Result<(), QueryError> {
        let field = self.scope.canonicalise_field(field)?;
        let column = self.scope.dbfield(&field)?;
        self.sorts = vec![SortClause {
            column,
            descending: !largest_first,
        }];
        self.check_joins();
        Ok(())
    }

    /// Joins the game table when a milestone query reads any game column.
    pub fn check_joins(&mut self) {
        if self.joined || self.scope.context_kind().fallback().is_none() {
            return;
        }
        let alias = self.scope.catalog().context(ContextKind::Game).alias();
        let qualified = format!("{alias}.");
        let reads_game = self.predicate.references_alias(alias)
            || self.sorts.iter().any(|sort| sort.column.starts_with(&qualified))
            || self
                .extra
                .fields()
                .iter()
                .any(|field| field.sql().contains(&qualified));
        if reads_game {
            self.fixup_join();
        }
    }

    /// Adds the game table and the join-key equality. Applied at most once.
    pub fn fixup_join(&mut self) {
        if self.joined {
            return;
        }
        let Some(target) = self.scope.context_kind().fallback() else {
            return;
        };
        self.joined = true;

        let catalog = self.scope.catalog();
        let local = catalog.context(self.scope.context_kind()).alias();
        let remote = catalog.context(target).alias();
        self.tables.push(self.scope.table_ref(target));
        self.predicate.add(
            BoolOp::And,
            Predicate::Const(format!(
                "{local}.{JOIN_KEY_FIELD} = {remote}.{JOIN_KEY_FIELD}"
            )),
        );
    }

    /// Sibling query with every sort direction flipped, never random.
    #[must_use]
    pub fn reverse(&self) -> Self {
        let mut reversed = self.clone();
        for sort in &mut reversed.sorts {
            sort.descending = !sort.descending;
        }
        reversed.random = false;
        reversed
    }

    /// Columns of the row-fetch form: every context field, then any
    /// non-aggregate extra fields.
    #[must_use]
    pub fn row_columns(&self) -> Vec<RowColumn> {
        let mut columns: Vec<RowColumn> = self
            .scope
            .schema()
            .fields()
            .iter()
            .map(|field| RowColumn {
                name: field.name.clone(),
                kind: Some(field.kind),
            })
            .collect();
        if !self.extra.is_aggregate() {
            columns.extend(self.extra.fields().iter().map(|field| RowColumn {
                name: field.display().to_string(),
                kind: field.kind(),
            }));
        }
        columns
    }

    #[must_use]
    pub fn select_all(&self) -> SqlStatement {
        let schema = self.scope.schema();
        let mut columns: Vec<String> = schema
            .fields()
            .iter()
            .map(|field| format!("{}.{}", schema.alias(), field.column))
            .collect();
        if !self.extra.is_aggregate() {
            columns.extend(self.extra.fields().iter().map(|field| field.select_expr()));
        }

        let (where_clause, params) = self.where_clause();
        let mut sql = format!(
            "SELECT {} FROM {}{where_clause}",
            columns.join(", "),
            self.tables.join(", ")
        );
        sql.push_str(&self.order_by());
        SqlStatement { sql, params }
    }

    #[must_use]
    pub fn select_count(&self) -> SqlStatement {
        let (where_clause, params) = self.where_clause();
        SqlStatement {
            sql: format!("SELECT COUNT(*) FROM {}{where_clause}", self.tables.join(", ")),
            params,
        }
    }

    /// Aggregate form. Only a single-field group is ordered in SQL.
    pub fn summary_query(&self) -> Result<SqlStatement, QueryError> {
        let mut group_columns = Vec::new();
        if let Some(list) = &self.summarise {
            for field in list.fields() {
                group_columns.push(self.scope.dbfield(&field.field)?);
            }
        }

        let mut columns = vec!["COUNT(*) AS fieldcount".to_string()];
        columns.extend(group_columns.iter().cloned());
        columns.extend(self.extra.fields().iter().map(|field| field.select_expr()));

        let (where_clause, params) = self.where_clause();
        let mut sql = format!(
            "SELECT {} FROM {}{where_clause}",
            columns.join(", "),
            self.tables.join(", ")
        );
        if !group_columns.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", group_columns.join(", ")));
        }
        if let Some([single]) = self.summarise.as_ref().map(SummaryFieldList::fields) {
            sql.push_str(&format!(" ORDER BY fieldcount {}", single.order.sql()));
        }
        Ok(SqlStatement { sql, params })
    }

    fn where_clause(&self) -> (String, Vec<SqlValue>) {
        let (text, params) = self.predicate.render();
        if text.is_empty() {
            (String::new(), params)
        } else {
            (format!(" WHERE {text}"), params)
        }
    }

    fn order_by(&self) -> String {
        if self.sorts.is_empty() {
            return String::new();
        }
        let tiebreak = SortClause {
            column: format!("{}.{ID_FIELD}", self.scope.schema().alias()),
            descending: self.sorts[0].descending,
        };
        let clauses: Vec<String> = self
            .sorts
            .iter()
            .chain(std::iter::once(&tiebreak))
            .map(SortClause::sql)
            .collect();
        format!(" ORDER BY {}", clauses.join(", "))
    }
}
