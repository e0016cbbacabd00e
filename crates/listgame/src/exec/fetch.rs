//! Indexed Row Fetch: resolves "the Nth most recent match" into one read.

use std::fmt;

use rand::Rng;
use tracing::debug;

use super::driver::{Driver, SqlRow};
use crate::error::QueryError;
use crate::query::CrawlQuery;
use crate::query::crawl_query::RowColumn;
use crate::report::format::format_field_value;

/// Where to read one row: `offset` rows into the (possibly reversed) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPlan {
    /// Offset from the front of the unreversed order.
    pub front: i64,
    pub reversed: bool,
    pub offset: i64,
    /// 1-based display rank.
    pub rank: i64,
}

/// Index 0 is the last row in sort order. Reads past the midpoint switch
/// to the reversed order so fewer rows are skipped.
pub fn plan_scan(count: i64, index: i64) -> Result<ScanPlan, QueryError> {
    let front = count - 1 - index;
    if index < 0 || front < 0 || front >= count {
        return Err(QueryError::IndexOutOfRange { index });
    }
    Ok(plan_front(count, front))
}

fn plan_front(count: i64, front: i64) -> ScanPlan {
    let reversed = front > count / 2;
    ScanPlan {
        front,
        reversed,
        offset: if reversed { count - 1 - front } else { front },
        rank: count - front,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub rank: i64,
    pub count: i64,
    pub columns: Vec<RowColumn>,
    pub row: SqlRow,
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .columns
            .iter()
            .zip(&self.row)
            .filter_map(|(column, value)| {
                let text = format_field_value(&column.name, column.kind, value);
                (!text.is_empty()).then(|| format!("{}={text}", column.name))
            })
            .collect();
        write!(f, "{}/{}. {}", self.rank, self.count, fields.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    NoResult,
    Found(QueryResult),
}

/// Counts the query's matches, then reads the single row its index (or a
/// random pick) selects. A random pick clears the query's random flag.
pub fn fetch_indexed<D, R>(
    driver: &D,
    query: &mut CrawlQuery<'_>,
    rng: &mut R,
) -> Result<FetchOutcome, QueryError>
where
    D: Driver + ?Sized,
    R: Rng + ?Sized,
{
    let count_stmt = query.select_count();
    let count = driver
        .count(&count_stmt.sql, &count_stmt.params)
        .map_err(|error| QueryError::driver(&error))?;
    if count <= 0 {
        return Ok(FetchOutcome::NoResult);
    }

    let plan = if query.is_random() {
        query.set_random(false);
        plan_front(count, rng.gen_range(0..count))
    } else {
        plan_scan(count, query.index())?
    };

    let stmt = if plan.reversed {
        debug!(count, offset = plan.offset, "index past midpoint; scanning reversed order");
        query.reverse().select_all()
    } else {
        query.select_all()
    };
    let offset = usize::try_from(plan.offset)
        .map_err(|_| QueryError::IndexOutOfRange { index: query.index() })?;
    let rows = driver
        .rows(&stmt.sql, &stmt.params, Some(1), Some(offset))
        .map_err(|error| QueryError::driver(&error))?;

    Ok(match rows.into_iter().next() {
        Some(row) => FetchOutcome::Found(QueryResult {
            rank: plan.rank,
            count,
            columns: query.row_columns(),
            row,
        }),
        None => FetchOutcome::NoResult,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::Result;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rusqlite::types::Value as SqlValue;

    use super::{FetchOutcome, QueryResult, ScanPlan, fetch_indexed, plan_scan};
    use crate::catalog::{Catalog, ContextKind, QueryScope, ScalarKind};
    use crate::error::QueryError;
    use crate::exec::driver::{Driver, SqlRow};
    use crate::query::crawl_query::{Actor, CrawlQuery, RowColumn};

    /// Answers counts with a fixed number and records every row request.
    struct StubDriver {
        count: i64,
        requests: RefCell<Vec<(String, Option<usize>)>>,
    }

    impl Driver for StubDriver {
        fn count(&self, _sql: &str, _params: &[SqlValue]) -> Result<i64> {
            Ok(self.count)
        }

        fn rows(
            &self,
            sql: &str,
            _params: &[SqlValue],
            _limit: Option<usize>,
            offset: Option<usize>,
        ) -> Result<Vec<SqlRow>> {
            self.requests.borrow_mut().push((sql.to_string(), offset));
            Ok(vec![vec![SqlValue::Integer(1)]])
        }
    }

    fn stub(count: i64) -> StubDriver {
        StubDriver {
            count,
            requests: RefCell::new(Vec::new()),
        }
    }

    fn query(catalog: &Catalog, index: i64) -> CrawlQuery<'_> {
        CrawlQuery::new(
            QueryScope::new(catalog, ContextKind::Game, "crawl"),
            Actor::Any,
            index,
            "*",
        )
        .expect("query should build")
    }

    #[test]
    fn index_resolves_from_the_back() {
        let plan = plan_scan(10, 0).expect("index 0 should resolve");
        assert_eq!(plan.front, 9);
        assert_eq!(plan.rank, 1);

        let plan = plan_scan(10, 9).expect("index 9 should resolve");
        assert_eq!(plan.front, 0);
        assert_eq!(plan.rank, 10);

        assert_eq!(
            plan_scan(10, 10).expect_err("index 10 must fail"),
            QueryError::IndexOutOfRange { index: 10 }
        );
    }

    #[test]
    fn reversal_threshold_is_half_the_count() {
        assert_eq!(
            plan_scan(10, 2).expect("index 2 should resolve"),
            ScanPlan {
                front: 7,
                reversed: true,
                offset: 2,
                rank: 3
            }
        );
        let plan = plan_scan(10, 8).expect("index 8 should resolve");
        assert!(!plan.reversed);
        assert_eq!(plan.offset, 1);
        let plan = plan_scan(10, 4).expect("index 4 should resolve");
        assert_eq!(plan.front, 5);
        assert!(!plan.reversed);
    }

    #[test]
    fn zero_count_is_no_result() {
        let catalog = Catalog::builtin();
        let driver = stub(0);
        let mut q = query(&catalog, 0);
        let outcome = fetch_indexed(&driver, &mut q, &mut StdRng::seed_from_u64(7))
            .expect("fetch should succeed");
        assert_eq!(outcome, FetchOutcome::NoResult);
        assert!(driver.requests.borrow().is_empty());
    }

    #[test]
    fn late_rows_are_read_through_the_reversed_query() {
        let catalog = Catalog::builtin();
        let driver = stub(10);
        let mut q = query(&catalog, 0);
        let outcome = fetch_indexed(&driver, &mut q, &mut StdRng::seed_from_u64(7))
            .expect("fetch should succeed");

        let FetchOutcome::Found(result) = outcome else {
            panic!("expected a row");
        };
        assert_eq!((result.rank, result.count), (1, 10));
        let requests = driver.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].0.ends_with("ORDER BY lg.tend DESC, lg.id DESC"));
        assert_eq!(requests[0].1, Some(0));
    }

    #[test]
    fn early_rows_use_the_forward_query() {
        let catalog = Catalog::builtin();
        let driver = stub(10);
        let mut q = query(&catalog, 8);
        fetch_indexed(&driver, &mut q, &mut StdRng::seed_from_u64(7))
            .expect("fetch should succeed");

        let requests = driver.requests.borrow();
        assert!(requests[0].0.ends_with("ORDER BY lg.tend ASC, lg.id ASC"));
        assert_eq!(requests[0].1, Some(1));
    }

    #[test]
    fn out_of_range_index_fails_after_counting() {
        let catalog = Catalog::builtin();
        let driver = stub(3);
        let mut q = query(&catalog, 3);
        let err = fetch_indexed(&driver, &mut q, &mut StdRng::seed_from_u64(7))
            .expect_err("index past count must fail");
        assert_eq!(err, QueryError::IndexOutOfRange { index: 3 });
    }

    #[test]
    fn random_pick_clears_the_flag() {
        let catalog = Catalog::builtin();
        let driver = stub(5);
        let mut q = query(&catalog, 0);
        q.set_random(true);
        let outcome = fetch_indexed(&driver, &mut q, &mut StdRng::seed_from_u64(11))
            .expect("random fetch should succeed");

        assert!(matches!(outcome, FetchOutcome::Found(ref result) if (1..=5).contains(&result.rank)));
        assert!(!q.is_random());
    }

    #[test]
    fn results_render_non_empty_fields() {
        let result = QueryResult {
            rank: 3,
            count: 10,
            columns: vec![
                RowColumn {
                    name: "name".to_string(),
                    kind: Some(ScalarKind::Text),
                },
                RowColumn {
                    name: "god".to_string(),
                    kind: Some(ScalarKind::Text),
                },
                RowColumn {
                    name: "dur".to_string(),
                    kind: Some(ScalarKind::Integer),
                },
            ],
            row: vec![
                SqlValue::Text("Ell".to_string()),
                SqlValue::Null,
                SqlValue::Integer(3_725),
            ],
        };
        assert_eq!(result.to_string(), "3/10. name=Ell, dur=1:02:05");
    }
}
