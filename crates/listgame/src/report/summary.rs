//! Aggregation/Summary Engine: runs every query of a [`QueryGroup`], merges
//! their grouped rows by key, then unifies, sorts and renders the report.

use std::collections::HashMap;
use std::fmt;

use rusqlite::types::Value as SqlValue;
use tracing::debug;

use super::format::{cell_as_f64, format_cell, percentage};
use crate::error::QueryError;
use crate::exec::driver::{Driver, SqlRow};
use crate::query::QueryGroup;
use crate::query::fields::SummaryField;
use crate::query::sort::{SortCondition, SortRow, SortValue, compare_rows};

const KEY_SEPARATOR: &str = "@@";

/// Leaf rows carry values; group rows carry their sorted children.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryNode {
    Leaf,
    Group(Vec<SummaryRow>),
}

/// One report row. `counts` and each `extra_values` entry hold one slot per
/// sub-query; a group row's counts are the sums of its children's.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    fields: Vec<SqlValue>,
    key: Option<SqlValue>,
    counts: Vec<i64>,
    extra_values: Vec<Vec<SqlValue>>,
    percentage: bool,
    node: SummaryNode,
}

impl SummaryRow {
    #[must_use]
    pub fn key(&self) -> Option<&SqlValue> {
        self.key.as_ref()
    }

    #[must_use]
    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    #[must_use]
    pub fn extra_values(&self) -> &[Vec<SqlValue>] {
        &self.extra_values
    }

    #[must_use]
    pub fn node(&self) -> &SummaryNode {
        &self.node
    }

    #[must_use]
    pub fn count(&self) -> i64 {
        self.counts.first().copied().unwrap_or(0)
    }

    fn merge_key(&self) -> String {
        self.fields
            .iter()
            .map(format_cell)
            .collect::<Vec<_>>()
            .join(KEY_SEPARATOR)
            .to_lowercase()
    }

    /// Adds another sub-query's values at slot `position`, padding every
    /// vector up to it first. A key already filled at `position` (group
    /// values differing only in case) has its count summed into the slot.
    fn combine(&mut self, other: &SummaryRow, position: usize) {
        if let Some(count) = self.counts.get_mut(position) {
            *count += other.count();
            return;
        }
        self.pad(position);
        self.counts.push(other.count());
        for (slot, values) in self.extra_values.iter_mut().enumerate() {
            let value = other
                .extra_values
                .get(slot)
                .and_then(|values| values.first())
                .cloned()
                .unwrap_or(SqlValue::Integer(0));
            values.push(value);
        }
    }

    fn pad(&mut self, size: usize) {
        if self.counts.len() < size {
            self.counts.resize(size, 0);
        }
        for values in &mut self.extra_values {
            if values.len() < size {
                values.resize(size, SqlValue::Integer(0));
            }
        }
    }

    fn key_text(&self) -> String {
        self.key.as_ref().map(format_cell).unwrap_or_default()
    }

    fn count_string(&self) -> String {
        self.counts
            .iter()
            .rev()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }

    fn counted_keys(&self) -> String {
        let count = self.count_string();
        if count == "1" {
            self.key_text()
        } else {
            format!("{count}x {}", self.key_text())
        }
    }

    fn percentage_string(&self, layout: &Layout<'_>, parent_count: i64) -> String {
        if layout.ratio || !self.percentage {
            return String::new();
        }
        format!(
            "({})",
            percentage(self.count() as f64, parent_count as f64)
        )
    }

    fn extra_val_string(&self) -> String {
        let mut parts = Vec::new();
        if let [den, num, ..] = self.counts.as_slice() {
            parts.push(percentage(*num as f64, *den as f64));
        }
        parts.push(
            self.extra_values
                .iter()
                .map(|values| value_string(values))
                .collect::<Vec<_>>()
                .join(";"),
        );
        let joined = join_non_empty(&parts, ";");
        if joined.is_empty() {
            joined
        } else {
            format!("[{joined}]")
        }
    }

    fn render(&self, layout: &Layout<'_>, parent_count: i64) -> String {
        match &self.node {
            SummaryNode::Group(children) => {
                let master = join_non_empty(
                    &[
                        self.counted_keys(),
                        self.percentage_string(layout, parent_count),
                    ],
                    " ",
                );
                let children: Vec<String> = children
                    .iter()
                    .map(|child| child.render(layout, self.count()))
                    .collect();
                format!("{master} ({})", children.join(", "))
            }
            SummaryNode::Leaf if self.key.is_some() => join_non_empty(
                &[
                    self.counted_keys(),
                    self.percentage_string(layout, parent_count),
                    self.extra_val_string(),
                ],
                " ",
            ),
            SummaryNode::Leaf => self
                .extra_values
                .iter()
                .enumerate()
                .map(|(index, values)| {
                    let label = layout.labels.get(index).map_or("?", String::as_str);
                    format!("{label}={}", value_string(values))
                })
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

impl SortRow for SummaryRow {
    fn key_value(&self) -> SortValue {
        self.key.as_ref().map_or(SortValue::Missing, sort_value)
    }

    fn count_values(&self) -> Vec<SortValue> {
        self.counts
            .iter()
            .map(|count| SortValue::Number(*count as f64))
            .collect()
    }

    fn extra_values(&self, index: usize) -> Vec<SortValue> {
        self.extra_values
            .get(index)
            .map(|values| values.iter().map(sort_value).collect())
            .unwrap_or_default()
    }
}

struct Layout<'r> {
    ratio: bool,
    labels: &'r [String],
}

/// A rendered-on-demand grouped report.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    totals: Vec<i64>,
    entity: String,
    description: String,
    ratio: bool,
    labels: Vec<String>,
    rows: Vec<SummaryRow>,
}

impl SummaryReport {
    #[must_use]
    pub fn totals(&self) -> &[i64] {
        &self.totals
    }

    #[must_use]
    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    fn count_phrase(&self) -> String {
        match self.totals.as_slice() {
            [1] => "One".to_string(),
            [count] => count.to_string(),
            counts => counts
                .iter()
                .rev()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join("/"),
        }
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = Layout {
            ratio: self.ratio,
            labels: &self.labels,
        };
        let total = self.totals.first().copied().unwrap_or(0);
        let rows: Vec<String> = self
            .rows
            .iter()
            .map(|row| row.render(&layout, total))
            .collect();
        write!(
            f,
            "{} {} for {}: {}",
            self.count_phrase(),
            pluralise(&self.entity, total),
            self.description,
            rows.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryOutcome {
    NoResults,
    Report(SummaryReport),
}

/// Counts then aggregates each query in order. Stops with
/// [`SummaryOutcome::NoResults`] at the first empty sub-query, or when the
/// post-aggregation filters discard every row.
pub fn summarise<D>(driver: &D, group: &QueryGroup<'_>) -> Result<SummaryOutcome, QueryError>
where
    D: Driver + ?Sized,
{
    let mut counts = Vec::with_capacity(group.queries().len());
    for query in group.queries() {
        let stmt = query.select_count();
        let count = driver
            .count(&stmt.sql, &stmt.params)
            .map_err(|error| QueryError::driver(&error))?;
        if count == 0 {
            return Ok(SummaryOutcome::NoResults);
        }
        counts.push(count);
    }

    let group_fields: &[SummaryField] = group
        .primary()
        .summarise()
        .map(|list| list.fields())
        .unwrap_or_default();
    let query_count = group.queries().len();

    let mut rows: Vec<SummaryRow> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (position, query) in group.queries().iter().enumerate() {
        let stmt = query.summary_query()?;
        let raw = driver
            .rows(&stmt.sql, &stmt.params, None, None)
            .map_err(|error| QueryError::driver(&error))?;
        debug!(position, rows = raw.len(), "summary rows");

        for raw_row in raw {
            let row = summary_row(raw_row, group_fields);
            if query_count == 1 {
                rows.push(row);
                continue;
            }
            let key = row.merge_key();
            match index.get(&key) {
                Some(&slot) => rows[slot].combine(&row, position),
                None if position == 0 => {
                    index.insert(key, rows.len());
                    rows.push(row);
                }
                None => {}
            }
        }
    }
    if query_count > 1 {
        for row in &mut rows {
            row.pad(query_count);
        }
    }

    let filters = group.filters();
    let mut totals = counts;
    if !filters.is_empty() {
        rows.retain(|row| filters.iter().all(|filter| filter.matches(row)));
        if rows.is_empty() {
            return Ok(SummaryOutcome::NoResults);
        }
        totals = sum_counts(&rows, query_count);
    }

    let rows = if group_fields.len() > 1 {
        unify(rows, group_fields, group.sorts())
    } else {
        let percentage = group_fields.first().is_some_and(|field| field.percentage);
        let mut rows: Vec<SummaryRow> = rows
            .into_iter()
            .map(|mut row| {
                row.key = row.fields.last().cloned();
                row.percentage = percentage;
                row
            })
            .collect();
        sort_rows(&mut rows, group.sorts());
        rows
    };

    Ok(SummaryOutcome::Report(SummaryReport {
        totals,
        entity: group.entity_name().to_string(),
        description: group.description().to_string(),
        ratio: group.is_ratio(),
        labels: group
            .extra()
            .fields()
            .iter()
            .map(|field| field.display().to_string())
            .collect(),
        rows,
    }))
}

/// Row layout of the aggregate form: `fieldcount`, group columns, extras.
fn summary_row(raw: SqlRow, group_fields: &[SummaryField]) -> SummaryRow {
    let mut cells = raw.into_iter();
    let count = cells.next().map_or(0, |cell| match cell {
        SqlValue::Integer(count) => count,
        other => cell_as_f64(&other) as i64,
    });
    let fields: Vec<SqlValue> = cells.by_ref().take(group_fields.len()).collect();
    let extra_values = cells.map(|cell| vec![cell]).collect();
    SummaryRow {
        fields,
        key: None,
        counts: vec![count],
        extra_values,
        percentage: false,
        node: SummaryNode::Leaf,
    }
}

/// Buckets rows on the first group field (case-insensitive, in first-seen
/// order); each bucket becomes a group row over its second-level leaves.
fn unify(
    rows: Vec<SummaryRow>,
    group_fields: &[SummaryField],
    sorts: &[SortCondition],
) -> Vec<SummaryRow> {
    let mut buckets: Vec<Vec<SummaryRow>> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for row in rows {
        let key = row.fields.first().map(format_cell).unwrap_or_default().to_lowercase();
        match positions.get(&key) {
            Some(&position) => buckets[position].push(row),
            None => {
                positions.insert(key, buckets.len());
                buckets.push(vec![row]);
            }
        }
    }

    let child_percentage = group_fields.get(1).is_some_and(|field| field.percentage);
    let mut parents: Vec<SummaryRow> = buckets
        .into_iter()
        .filter_map(|bucket| {
            let first = bucket.first()?;
            let key = first.fields.first().cloned();
            let extra_values = first.extra_values.clone();
            let width = first.counts.len();

            let mut children: Vec<SummaryRow> = bucket
                .into_iter()
                .map(|mut child| {
                    child.key = child.fields.last().cloned();
                    child.percentage = child_percentage;
                    child
                })
                .collect();
            sort_rows(&mut children, sorts);

            Some(SummaryRow {
                fields: key.iter().cloned().collect(),
                key,
                counts: sum_counts(&children, width),
                extra_values,
                percentage: group_fields[0].percentage,
                node: SummaryNode::Group(children),
            })
        })
        .collect();
    sort_rows(&mut parents, sorts);
    parents
}

/// Explicit comparator chain, else descending count.
fn sort_rows(rows: &mut [SummaryRow], sorts: &[SortCondition]) {
    if sorts.is_empty() {
        rows.sort_by(|a, b| b.count().cmp(&a.count()));
    } else {
        rows.sort_by(|a, b| compare_rows(sorts, a, b));
    }
}

fn sum_counts(rows: &[SummaryRow], width: usize) -> Vec<i64> {
    let mut totals = vec![0; width];
    for row in rows {
        for (total, count) in totals.iter_mut().zip(&row.counts) {
            *total += count;
        }
    }
    totals
}

/// One slot: the formatted value. Two slots: `num/den (pct)`.
fn value_string(values: &[SqlValue]) -> String {
    match values {
        [value] => format_cell(value),
        [den, num, ..] => format!(
            "{}/{} ({})",
            format_cell(num),
            format_cell(den),
            percentage(cell_as_f64(num), cell_as_f64(den))
        ),
        [] => String::new(),
    }
}

fn sort_value(cell: &SqlValue) -> SortValue {
    match cell {
        SqlValue::Null => SortValue::Missing,
        SqlValue::Integer(value) => SortValue::Number(*value as f64),
        SqlValue::Real(value) => SortValue::Number(*value),
        SqlValue::Text(text) => SortValue::Text(text.clone()),
        SqlValue::Blob(bytes) => SortValue::Text(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn join_non_empty(parts: &[String], separator: &str) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(separator)
}

/// `game` → `games` unless the count is exactly one.
#[must_use]
pub fn pluralise(entity: &str, count: i64) -> String {
    if count == 1 {
        entity.to_string()
    } else {
        format!("{entity}s")
    }
}
