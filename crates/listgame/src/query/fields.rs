//! Field Expression Parser for `x=` (extra columns) and `s=` (group-by)
//! clauses.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use super::sort::{SortCondition, SortField};
use crate::catalog::{QueryScope, ScalarKind};
use crate::error::QueryError;

const FIELD_PATTERN: &str = r"[A-Za-z_][\w.:]*";
const FUNCTION_PATTERN: &str = r"\w+\(\s*[A-Za-z_][\w.:]*\s*\)";

/// `+` (the default) puts larger values first in reports; `-` smaller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Descending,
    Ascending,
}

impl Order {
    /// Splits an optional `+`/`-` marker off the front of `item`.
    #[must_use]
    pub fn split_prefix(item: &str) -> (Self, &str) {
        if let Some(rest) = item.strip_prefix('-') {
            (Self::Ascending, rest)
        } else {
            (Self::Descending, item.strip_prefix('+').unwrap_or(item))
        }
    }

    #[must_use]
    pub const fn inverted(self) -> Self {
        match self {
            Self::Descending => Self::Ascending,
            Self::Ascending => Self::Descending,
        }
    }

    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Descending => "DESC",
            Self::Ascending => "ASC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldExpr {
    Column(String),
    Count,
    Aggregate { function: String, field: String },
}

/// One projected column of an `x=` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryField {
    pub expr: FieldExpr,
    pub order: Order,
    sql: String,
    display: String,
    alias: Option<String>,
    kind: Option<ScalarKind>,
}

impl QueryField {
    #[must_use]
    pub fn display(&self) -> &str {
        &self.display
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Projection text, `expr AS alias` when aliased.
    #[must_use]
    pub fn select_expr(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS {alias}", self.sql),
            None => self.sql.clone(),
        }
    }

    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        !matches!(self.expr, FieldExpr::Column(_))
    }

    #[must_use]
    pub fn is_count(&self) -> bool {
        self.expr == FieldExpr::Count
    }

    #[must_use]
    pub fn kind(&self) -> Option<ScalarKind> {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryFieldList {
    fields: Vec<QueryField>,
    source: String,
    aggregate: bool,
}

impl QueryFieldList {
    #[must_use]
    pub fn fields(&self) -> &[QueryField] {
        &self.fields
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        self.aggregate
    }

    /// Position of the field displayed as `name` (case-insensitive).
    #[must_use]
    pub fn position_of_display(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| field.display.eq_ignore_ascii_case(name))
    }

    /// One sort per field, in field order, honouring each field's marker.
    #[must_use]
    pub fn default_sorts(&self) -> Vec<SortCondition> {
        self.fields
            .iter()
            .enumerate()
            .map(|(index, field)| {
                let target = if field.is_count() {
                    SortField::count()
                } else {
                    SortField::extra(index, field.display())
                };
                SortCondition::new(target, field.order == Order::Ascending)
            })
            .collect()
    }
}

/// One `s=` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryField {
    pub order: Order,
    pub field: String,
    pub percentage: bool,
    pub kind: Option<ScalarKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryFieldList {
    fields: Vec<SummaryField>,
    source: String,
}

impl SummaryFieldList {
    pub const MAX_FIELDS: usize = 2;

    #[must_use]
    pub fn fields(&self) -> &[SummaryField] {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut [SummaryField] {
        &mut self.fields
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Report sort used when no `o=` was given: by count in the first
    /// field's direction, or chronologically by key for a date field.
    #[must_use]
    pub fn default_sort(&self) -> SortCondition {
        let first = &self.fields[0];
        if first.kind == Some(ScalarKind::Date) {
            let order = first.order.inverted();
            SortCondition::new(SortField::key(), order == Order::Ascending)
        } else {
            SortCondition::new(SortField::count(), first.order == Order::Ascending)
        }
    }
}

/// Parses field clauses for one request. Owns the column-alias counter so
/// generated aliases are unique within the request and nowhere else.
#[derive(Debug)]
pub struct FieldParser<'a> {
    scope: QueryScope<'a>,
    next_alias: u32,
}

impl<'a> FieldParser<'a> {
    #[must_use]
    pub fn new(scope: QueryScope<'a>) -> Self {
        Self {
            scope,
            next_alias: 0,
        }
    }

    /// Parses a whole `x=...` token.
    pub fn parse_extra_clause(&mut self, clause: &str) -> Result<QueryFieldList, QueryError> {
        let body = extra_clause_regex()
            .captures(clause.trim())
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| QueryError::malformed(clause))?;

        let mut fields = Vec::new();
        for item in split_items(body.as_str()) {
            fields.push(self.parse_extra_item(item, clause)?);
        }

        let aggregate = fields.first().is_some_and(QueryField::is_aggregate);
        if fields.iter().any(|field| field.is_aggregate() != aggregate) {
            return Err(QueryError::InconsistentFieldKinds {
                clause: clause.to_string(),
            });
        }

        Ok(QueryFieldList {
            fields,
            source: clause.to_string(),
            aggregate,
        })
    }

    /// Parses a whole `s=...` token.
    pub fn parse_group_clause(&mut self, clause: &str) -> Result<SummaryFieldList, QueryError> {
        let body = group_clause_regex()
            .captures(clause.trim())
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| QueryError::malformed(clause))?;
        let items = split_items(body.as_str());
        if items.len() > SummaryFieldList::MAX_FIELDS {
            return Err(QueryError::malformed(clause));
        }

        let mut seen = BTreeSet::new();
        let mut fields = Vec::with_capacity(items.len());
        for item in items {
            let (order, rest) = Order::split_prefix(item);
            let (rest, percentage) = match rest.strip_suffix('%') {
                Some(stripped) => (stripped, true),
                None => (rest, false),
            };

            if let Some(caps) = function_call_regex().captures(rest) {
                let aggregate = self.aggregate_field(&caps[1], &caps[2], clause)?;
                return Err(QueryError::NotSummarisable {
                    field: aggregate.display,
                });
            }

            let field = self.scope.canonicalise_field(rest)?;
            if !seen.insert(field.clone()) {
                return Err(QueryError::DuplicateGroupField {
                    field,
                    clause: clause.to_string(),
                });
            }
            if !self.scope.summarisable(&field) {
                return Err(QueryError::NotSummarisable { field });
            }

            fields.push(SummaryField {
                order,
                kind: self.scope.field_kind(&field),
                field,
                percentage,
            });
        }

        Ok(SummaryFieldList {
            fields,
            source: clause.to_string(),
        })
    }

    fn parse_extra_item(&mut self, item: &str, clause: &str) -> Result<QueryField, QueryError> {
        let (order, rest) = Order::split_prefix(item);
        let mut field = match function_call_regex().captures(rest) {
            Some(caps) => self.aggregate_field(&caps[1], &caps[2], clause)?,
            None => self.simple_field(rest)?,
        };
        field.order = order;
        Ok(field)
    }

    fn simple_field(&mut self, raw: &str) -> Result<QueryField, QueryError> {
        if raw.trim().eq_ignore_ascii_case("n") {
            return Ok(QueryField {
                expr: FieldExpr::Count,
                order: Order::default(),
                sql: "COUNT(*)".to_string(),
                display: "N".to_string(),
                alias: Some(self.unique_alias("count")),
                kind: Some(ScalarKind::Integer),
            });
        }

        let field = self.scope.canonicalise_field(raw)?;
        Ok(QueryField {
            expr: FieldExpr::Column(field.clone()),
            order: Order::default(),
            sql: self.scope.dbfield(&field)?,
            kind: self.scope.field_kind(&field),
            display: field,
            alias: None,
        })
    }

    fn aggregate_field(
        &mut self,
        function: &str,
        raw_field: &str,
        clause: &str,
    ) -> Result<QueryField, QueryError> {
        let field = self.scope.canonicalise_field(raw_field)?;
        let function = function.trim().to_ascii_lowercase();
        let Some(accepted) = self.scope.catalog().aggregate_functions().get(&function) else {
            return Err(QueryError::UnknownAggregateFunction {
                function,
                clause: clause.to_string(),
            });
        };

        let kind = self.scope.field_kind(&field);
        if !accepted.accepts(kind) {
            return Err(QueryError::AggregateTypeMismatch { function, field });
        }

        let column = self.scope.dbfield(&field)?;
        let sql = if function == "cdist" {
            format!("COUNT(DISTINCT {column})")
        } else {
            format!("{function}({column})")
        };
        let stem = format!("{function}_{}", sanitize_alias(&field));
        let aggregate_kind = match function.as_str() {
            "cdist" => Some(ScalarKind::Integer),
            _ => kind,
        };

        Ok(QueryField {
            expr: FieldExpr::Aggregate {
                function: function.clone(),
                field: field.clone(),
            },
            order: Order::default(),
            sql,
            display: format!("{function}({field})"),
            alias: Some(self.unique_alias(&stem)),
            kind: aggregate_kind,
        })
    }

    fn unique_alias(&mut self, stem: &str) -> String {
        self.next_alias += 1;
        format!("{stem}_{}", self.next_alias)
    }
}

/// True for tokens that look like an `x=` clause, well-formed or not.
#[must_use]
pub fn is_extra_clause(token: &str) -> bool {
    clause_prefix(token, 'x')
}

/// True for tokens that look like an `s=` clause, well-formed or not.
#[must_use]
pub fn is_group_clause(token: &str) -> bool {
    clause_prefix(token.strip_prefix('-').unwrap_or(token), 's')
}

fn clause_prefix(token: &str, letter: char) -> bool {
    let mut chars = token.trim_start().chars();
    chars
        .next()
        .is_some_and(|first| first.eq_ignore_ascii_case(&letter))
        && chars.as_str().trim_start().starts_with('=')
}

fn split_items(body: &str) -> Vec<&str> {
    body.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

fn sanitize_alias(field: &str) -> String {
    field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn extra_clause_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        let item = format!(r"[+-]?(?:{FUNCTION_PATTERN}|{FIELD_PATTERN})");
        Regex::new(&format!(r"^(?i:x)\s*=\s*({item}(?:\s*,\s*{item})*)$"))
            .expect("extra clause regex should compile")
    })
}

fn group_clause_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        let item = format!(r"[+-]?(?:{FUNCTION_PATTERN}|{FIELD_PATTERN})%?");
        Regex::new(&format!(r"^-?(?i:s)\s*=\s*({item}(?:\s*,\s*{item})*)$"))
            .expect("group clause regex should compile")
    })
}

fn function_call_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(\w+)\(\s*([A-Za-z_][\w.:]*)\s*\)$")
            .expect("function call regex should compile")
    })
}

#[cfg(test)]
mod tests {
    use super::{FieldExpr, FieldParser, Order, is_extra_clause, is_group_clause};
    use crate::catalog::{Catalog, ContextKind, QueryScope, ScalarKind};
    use crate::error::QueryError;
    use crate::query::sort::{SortField, SortTarget};

    fn parser(catalog: &Catalog) -> FieldParser<'_> {
        FieldParser::new(QueryScope::new(catalog, ContextKind::Game, "crawl"))
    }

    #[test]
    fn parses_mixed_aggregate_functions() {
        let catalog = Catalog::builtin();
        let list = parser(&catalog)
            .parse_extra_clause("x=avg(turns),cdist(race)")
            .expect("aggregate list should parse");

        assert!(list.is_aggregate());
        let displays: Vec<&str> = list.fields().iter().map(|f| f.display()).collect();
        assert_eq!(displays, vec!["avg(turn)", "cdist(race)"]);
        assert_eq!(list.fields()[0].sql(), "avg(lg.turn)");
        assert_eq!(list.fields()[1].sql(), "COUNT(DISTINCT lg.race)");
        assert_eq!(
            list.fields()[0].select_expr(),
            "avg(lg.turn) AS avg_turn_1"
        );
    }

    #[test]
    fn rejects_mixing_aggregate_and_bare_fields() {
        let catalog = Catalog::builtin();
        let err = parser(&catalog)
            .parse_extra_clause("x=win,avg(turn)")
            .expect_err("unknown bare field fails first");
        assert_eq!(err, QueryError::unknown_field("win"));

        let err = parser(&catalog)
            .parse_extra_clause("x=xl,avg(turn)")
            .expect_err("mixed list must fail");
        assert_eq!(
            err,
            QueryError::InconsistentFieldKinds {
                clause: "x=xl,avg(turn)".to_string()
            }
        );
    }

    #[test]
    fn count_is_an_aggregate_column() {
        let catalog = Catalog::builtin();
        let list = parser(&catalog)
            .parse_extra_clause("x=n,max(xl)")
            .expect("count list should parse");

        assert!(list.is_aggregate());
        assert!(list.fields()[0].is_count());
        assert_eq!(list.fields()[0].select_expr(), "COUNT(*) AS count_1");
        assert_eq!(list.fields()[1].select_expr(), "max(lg.xl) AS max_xl_2");
    }

    #[test]
    fn aggregate_failures_are_typed() {
        let catalog = Catalog::builtin();

        let err = parser(&catalog)
            .parse_extra_clause("x=median(turn)")
            .expect_err("unknown function must fail");
        assert!(matches!(err, QueryError::UnknownAggregateFunction { ref function, .. } if function == "median"));

        let err = parser(&catalog)
            .parse_extra_clause("x=avg(god)")
            .expect_err("avg over text must fail");
        assert_eq!(
            err,
            QueryError::AggregateTypeMismatch {
                function: "avg".to_string(),
                field: "god".to_string()
            }
        );
    }

    #[test]
    fn extra_markers_set_field_order() {
        let catalog = Catalog::builtin();
        let list = parser(&catalog)
            .parse_extra_clause("x=-avg(xl),+max(turn)")
            .expect("ordered list should parse");

        assert_eq!(list.fields()[0].order, Order::Ascending);
        assert_eq!(list.fields()[1].order, Order::Descending);
        let sorts = list.default_sorts();
        assert!(sorts[0].reverse());
        assert!(!sorts[1].reverse());
        assert_eq!(sorts[1].field(), &SortField::extra(1, "max(turn)"));
    }

    #[test]
    fn malformed_extra_clause_is_rejected() {
        let catalog = Catalog::builtin();
        let err = parser(&catalog)
            .parse_extra_clause("x=avg(turn")
            .expect_err("unbalanced call must fail");
        assert_eq!(err, QueryError::malformed("x=avg(turn"));
    }

    #[test]
    fn group_clause_rejects_case_insensitive_duplicates() {
        let catalog = Catalog::builtin();
        let err = parser(&catalog)
            .parse_group_clause("s=god,God")
            .expect_err("duplicate group field must fail");
        assert_eq!(
            err,
            QueryError::DuplicateGroupField {
                field: "god".to_string(),
                clause: "s=god,God".to_string()
            }
        );
    }

    #[test]
    fn group_clause_rejects_duplicates_through_aliases() {
        let catalog = Catalog::builtin();
        let err = parser(&catalog)
            .parse_group_clause("s=class,cls")
            .expect_err("aliased duplicate must fail");
        assert!(matches!(err, QueryError::DuplicateGroupField { .. }));
    }

    #[test]
    fn group_clause_parses_markers() {
        let catalog = Catalog::builtin();
        let list = parser(&catalog)
            .parse_group_clause("s=god,-char%")
            .expect("group clause should parse");

        let god = &list.fields()[0];
        assert_eq!(god.field, "god");
        assert_eq!(god.order, Order::Descending);
        assert!(!god.percentage);
        let ch = &list.fields()[1];
        assert_eq!(ch.field, "char");
        assert_eq!(ch.order, Order::Ascending);
        assert!(ch.percentage);
        assert_eq!(list.fields().len(), 2);
    }

    #[test]
    fn group_clause_limits_field_count() {
        let catalog = Catalog::builtin();
        let err = parser(&catalog)
            .parse_group_clause("s=god,race,cls")
            .expect_err("three fields must fail");
        assert_eq!(err, QueryError::malformed("s=god,race,cls"));
    }

    #[test]
    fn group_clause_requires_summarisable_fields() {
        let catalog = Catalog::builtin();
        let err = parser(&catalog)
            .parse_group_clause("s=tmsg")
            .expect_err("tmsg is not summarisable");
        assert_eq!(
            err,
            QueryError::NotSummarisable {
                field: "tmsg".to_string()
            }
        );

        let err = parser(&catalog)
            .parse_group_clause("s=max(xl)")
            .expect_err("aggregates cannot key a group");
        assert_eq!(
            err,
            QueryError::NotSummarisable {
                field: "max(xl)".to_string()
            }
        );
    }

    #[test]
    fn milestone_group_clause_accepts_pivots() {
        let catalog = Catalog::builtin();
        let mut parser =
            FieldParser::new(QueryScope::new(&catalog, ContextKind::Milestone, "crawl"));
        let list = parser
            .parse_group_clause("s=rune")
            .expect("pivot should be summarisable");
        assert_eq!(list.fields()[0].field, "rune");
        assert_eq!(list.fields()[0].kind, Some(ScalarKind::Text));
    }

    #[test]
    fn default_sort_orders_counts_by_first_field() {
        let catalog = Catalog::builtin();
        let list = parser(&catalog)
            .parse_group_clause("s=god")
            .expect("group clause should parse");
        let sort = list.default_sort();
        assert_eq!(sort.field().target(), SortTarget::Count);
        assert!(!sort.reverse());

        let list = parser(&catalog)
            .parse_group_clause("s=-god")
            .expect("group clause should parse");
        assert!(list.default_sort().reverse());
    }

    #[test]
    fn default_sort_for_dates_is_chronological() {
        let catalog = Catalog::builtin();
        let list = parser(&catalog)
            .parse_group_clause("s=end")
            .expect("date group clause should parse");
        let sort = list.default_sort();
        assert_eq!(sort.field().target(), SortTarget::Key);
        assert!(sort.reverse(), "oldest first for a plain date group");

        let list = parser(&catalog)
            .parse_group_clause("s=-end")
            .expect("date group clause should parse");
        assert!(!list.default_sort().reverse(), "newest first for -date");
    }

    #[test]
    fn aliases_are_scoped_to_the_parser() {
        let catalog = Catalog::builtin();
        let first = parser(&catalog)
            .parse_extra_clause("x=n")
            .expect("count should parse");
        let second = parser(&catalog)
            .parse_extra_clause("x=n")
            .expect("count should parse");
        assert_eq!(first.fields()[0].alias(), second.fields()[0].alias());
    }

    #[test]
    fn column_fields_keep_their_expression() {
        let catalog = Catalog::builtin();
        let list = parser(&catalog)
            .parse_extra_clause("x=xl,char")
            .expect("bare list should parse");
        assert!(!list.is_aggregate());
        assert_eq!(list.fields()[1].expr, FieldExpr::Column("char".to_string()));
        assert_eq!(list.fields()[1].sql(), "lg.charabbrev");
    }

    #[test]
    fn clause_detection_is_lenient() {
        assert!(is_extra_clause("x=avg(turn"));
        assert!(is_extra_clause("X = n"));
        assert!(is_group_clause("-s=god"));
        assert!(is_group_clause("s=god"));
        assert!(!is_group_clause("sc>100"));
        assert!(!is_extra_clause("xl=10"));
    }
}
