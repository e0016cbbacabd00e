//! Sort Spec Resolver (`o=`) and post-aggregation filters.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

use super::fields::QueryFieldList;
use crate::error::QueryError;

/// Which slot of a report row a sort field reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortTarget {
    Key,
    Count,
    Extra(usize),
}

/// Component of a per-sub-query value vector. With one sub-query the vector
/// has a single slot and every part reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RatioPart {
    Denominator,
    #[default]
    Numerator,
    Ratio,
}

/// A comparable value pulled out of a report row.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Missing,
    Number(f64),
    Text(String),
}

impl SortValue {
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Missing => 0.0,
            Self::Number(value) => *value,
            Self::Text(text) => text.trim().parse().unwrap_or(0.0),
        }
    }

    /// Total order: missing values first, then numbers, then text.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Missing, Self::Missing) => Ordering::Equal,
            (Self::Missing, _) => Ordering::Less,
            (_, Self::Missing) => Ordering::Greater,
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a
                .to_ascii_lowercase()
                .cmp(&b.to_ascii_lowercase())
                .then_with(|| a.cmp(b)),
        }
    }
}

/// Access to the sortable slots of a merged report row.
pub trait SortRow {
    fn key_value(&self) -> SortValue;
    /// One count per sub-query.
    fn count_values(&self) -> Vec<SortValue>;
    /// One value per sub-query for the extra field at `index`.
    fn extra_values(&self, index: usize) -> Vec<SortValue>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    target: SortTarget,
    part: RatioPart,
    label: String,
}

impl SortField {
    #[must_use]
    pub fn key() -> Self {
        Self {
            target: SortTarget::Key,
            part: RatioPart::default(),
            label: ".".to_string(),
        }
    }

    #[must_use]
    pub fn count() -> Self {
        Self {
            target: SortTarget::Count,
            part: RatioPart::default(),
            label: "n".to_string(),
        }
    }

    #[must_use]
    pub fn extra(index: usize, label: &str) -> Self {
        Self {
            target: SortTarget::Extra(index),
            part: RatioPart::default(),
            label: label.to_ascii_lowercase(),
        }
    }

    /// Parses `.`, `n`, `%`, an extra field's display name, or any of these
    /// behind a `den.`/`num.`/`%.` selector.
    pub fn parse(raw: &str, extra: &QueryFieldList) -> Result<Self, QueryError> {
        let raw = raw.trim();
        if raw == "." {
            return Ok(Self::key());
        }

        let expanded = if raw == "%" { "%.n" } else { raw };
        let (part, expr) = match expanded.split_once('.') {
            Some(("den", rest)) => (RatioPart::Denominator, rest),
            Some(("num", rest)) => (RatioPart::Numerator, rest),
            Some(("%", rest)) => (RatioPart::Ratio, rest),
            _ => (RatioPart::default(), expanded),
        };

        let expr = expr.to_ascii_lowercase();
        let target = if expr == "n" {
            SortTarget::Count
        } else {
            let index = extra
                .position_of_display(&expr)
                .ok_or_else(|| QueryError::UnknownSortField {
                    field: expr.clone(),
                })?;
            SortTarget::Extra(index)
        };

        Ok(Self {
            target,
            part,
            label: raw.to_string(),
        })
    }

    #[must_use]
    pub fn target(&self) -> SortTarget {
        self.target
    }

    #[must_use]
    pub fn part(&self) -> RatioPart {
        self.part
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resolves against `row`. The slot is chosen per row: single-slot
    /// vectors always read slot 0.
    pub fn value<R: SortRow + ?Sized>(&self, row: &R) -> SortValue {
        let values = match self.target {
            SortTarget::Key => return row.key_value(),
            SortTarget::Count => row.count_values(),
            SortTarget::Extra(index) => row.extra_values(index),
        };
        if values.len() == 1 {
            return values.into_iter().next().unwrap_or(SortValue::Missing);
        }
        match self.part {
            RatioPart::Denominator => values.first().cloned().unwrap_or(SortValue::Missing),
            RatioPart::Numerator => values.get(1).cloned().unwrap_or(SortValue::Missing),
            RatioPart::Ratio => {
                let den = values.first().map_or(0.0, SortValue::as_f64);
                let num = values.get(1).map_or(0.0, SortValue::as_f64);
                SortValue::Number(if den == 0.0 { 0.0 } else { num / den })
            }
        }
    }
}

/// A bound sort comparator. `reverse == false` puts larger values first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortCondition {
    field: SortField,
    reverse: bool,
}

impl SortCondition {
    #[must_use]
    pub fn new(field: SortField, reverse: bool) -> Self {
        Self { field, reverse }
    }

    /// Parses one `o=` item; a leading `-` reverses it, `+` is ignored.
    pub fn parse(expr: &str, extra: &QueryFieldList) -> Result<Self, QueryError> {
        let (reverse, rest) = split_negated(expr.trim());
        Ok(Self::new(SortField::parse(rest, extra)?, reverse))
    }

    #[must_use]
    pub fn field(&self) -> &SortField {
        &self.field
    }

    #[must_use]
    pub fn reverse(&self) -> bool {
        self.reverse
    }

    pub fn compare<R: SortRow + ?Sized>(&self, a: &R, b: &R) -> Ordering {
        let av = self.field.value(a);
        let bv = self.field.value(b);
        if self.reverse {
            av.total_cmp(&bv)
        } else {
            bv.total_cmp(&av)
        }
    }
}

/// Applies each condition in turn until one separates the rows.
pub fn compare_rows<R: SortRow + ?Sized>(sorts: &[SortCondition], a: &R, b: &R) -> Ordering {
    sorts
        .iter()
        .map(|sort| sort.compare(a, b))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal)
}

#[must_use]
pub fn is_sort_clause(token: &str) -> bool {
    sort_clause_regex().is_match(token.trim())
}

/// Parses a whole `o=a,-b` token.
pub fn parse_sort_clause(
    clause: &str,
    extra: &QueryFieldList,
) -> Result<Vec<SortCondition>, QueryError> {
    let body = sort_clause_regex()
        .captures(clause.trim())
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str())
        .filter(|body| !body.trim().is_empty())
        .ok_or_else(|| QueryError::malformed(clause))?;

    body.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| SortCondition::parse(item, extra))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl FilterOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "=" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }

    fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Self::Lt => left < right,
            Self::Le => left <= right,
            Self::Gt => left > right,
            Self::Ge => left >= right,
            Self::Eq => left == right,
            Self::Ne => left != right,
        }
    }
}

/// Numeric test on a merged report row, applied after aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterPredicate {
    field: SortField,
    op: FilterOp,
    value: f64,
}

impl FilterPredicate {
    /// Recognises `LHS op NUMBER` where LHS names a report slot in `extra`.
    /// Anything else is left for the SQL predicate parser.
    #[must_use]
    pub fn recognise(token: &str, extra: &QueryFieldList) -> Option<Self> {
        let caps = filter_regex().captures(token.trim())?;
        let field = SortField::parse(&caps[1], extra).ok()?;
        match field.target() {
            SortTarget::Key => return None,
            SortTarget::Extra(_) if !extra.is_aggregate() => return None,
            SortTarget::Count | SortTarget::Extra(_) => {}
        }
        let op = FilterOp::parse(&caps[2])?;
        let value = caps[3].parse::<f64>().ok()?;
        Some(Self { field, op, value })
    }

    #[must_use]
    pub fn field(&self) -> &SortField {
        &self.field
    }

    pub fn matches<R: SortRow + ?Sized>(&self, row: &R) -> bool {
        self.op.apply(self.field.value(row).as_f64(), self.value)
    }
}

/// `-x` → `(true, "x")`, `+x` → `(false, "x")`.
#[must_use]
pub fn split_negated(expr: &str) -> (bool, &str) {
    if let Some(rest) = expr.strip_prefix('-') {
        (true, rest)
    } else {
        (false, expr.strip_prefix('+').unwrap_or(expr))
    }
}

fn sort_clause_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(?i:o)\s*=\s*(.*)$").expect("sort clause regex should compile")
    })
}

fn filter_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^((?:(?:den|num|%)\.)?\S+?)(<=|>=|!=|<|>|=)(\S+)$")
            .expect("filter regex should compile")
    })
}
