//! Request execution: parse a command's arguments, run them through the
//! driver, and produce the single reply line.

pub mod driver;
pub mod fetch;

use rand::Rng;
use tracing::debug;

pub use driver::{Driver, SqlRow, SqliteDriver};
pub use fetch::{FetchOutcome, QueryResult, ScanPlan, fetch_indexed, plan_scan};

use crate::catalog::{Catalog, ContextKind};
use crate::error::QueryError;
use crate::query::{QueryGroup, parse_query};
use crate::report::summary::pluralise;
use crate::report::{SummaryOutcome, summarise};

/// Runs one `lg`/`lm` style request. Grouped or aggregate queries produce a
/// summary report; anything else reads the single indexed row.
pub fn execute<D, R>(
    driver: &D,
    catalog: &Catalog,
    context: ContextKind,
    default_actor: &str,
    args: &[String],
    rng: &mut R,
) -> Result<String, QueryError>
where
    D: Driver + ?Sized,
    R: Rng + ?Sized,
{
    let mut group = parse_query(catalog, context, default_actor, args)?;
    debug!(
        query = group.primary().argstr(),
        queries = group.queries().len(),
        aggregate = group.primary().is_aggregate(),
        "parsed query"
    );

    if group.primary().is_aggregate() {
        return Ok(match summarise(driver, &group)? {
            SummaryOutcome::Report(report) => report.to_string(),
            SummaryOutcome::NoResults => no_results(&group),
        });
    }

    Ok(match fetch_indexed(driver, group.primary_mut(), rng)? {
        FetchOutcome::Found(result) => result.to_string(),
        FetchOutcome::NoResult => no_results(&group),
    })
}

fn no_results(group: &QueryGroup<'_>) -> String {
    format!(
        "No {} for {}.",
        pluralise(group.entity_name(), 0),
        group.description()
    )
}
