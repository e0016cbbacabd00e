use anyhow::{Context, Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use tracing::debug;

pub type SqlRow = Vec<SqlValue>;

/// The database calls the query core needs.
pub trait Driver {
    /// Runs a `SELECT COUNT(*)` form and returns its single value.
    fn count(&self, sql: &str, params: &[SqlValue]) -> Result<i64>;

    /// Runs a select, reading at most `limit` rows after skipping `offset`.
    fn rows(
        &self,
        sql: &str,
        params: &[SqlValue],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<SqlRow>>;
}

/// [`Driver`] over a rusqlite connection.
#[derive(Debug)]
pub struct SqliteDriver {
    connection: Connection,
}

impl SqliteDriver {
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }
}

impl Driver for SqliteDriver {
    fn count(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        debug!(sql, params = params.len(), "count query");
        self.connection
            .query_row(sql, params_from_iter(params.iter()), |row| {
                row.get::<usize, i64>(0)
            })
            .with_context(|| format!("failed to count rows: {sql}"))
    }

    fn rows(
        &self,
        sql: &str,
        params: &[SqlValue],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<SqlRow>> {
        let sql = paged_sql(sql, limit, offset);
        debug!(sql = %sql, params = params.len(), "row query");

        let mut statement = self
            .connection
            .prepare(&sql)
            .map_err(|error| Error::new(error).context("failed to prepare query"))?;
        let column_count = statement.column_count();
        let mut rows = statement
            .query(params_from_iter(params.iter()))
            .map_err(|error| Error::new(error).context("failed to execute query"))?;

        let mut result = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|error| Error::new(error).context("failed to fetch query row"))?
        {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                values.push(
                    row.get::<usize, SqlValue>(index)
                        .map_err(|error| Error::new(error).context("failed to decode query column"))?,
                );
            }
            result.push(values);
        }
        Ok(result)
    }
}

fn paged_sql(sql: &str, limit: Option<usize>, offset: Option<usize>) -> String {
    match (limit, offset) {
        (None, None) => sql.to_string(),
        (Some(limit), None) | (Some(limit), Some(0)) => format!("{sql} LIMIT {limit}"),
        (Some(limit), Some(offset)) => format!("{sql} LIMIT {limit} OFFSET {offset}"),
        (None, Some(offset)) => format!("{sql} LIMIT -1 OFFSET {offset}"),
    }
}
