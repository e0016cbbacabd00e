use anyhow::Result;
use clap::Args;
use rand::SeedableRng;
use rand::rngs::StdRng;

use super::load_catalog;
use crate::catalog::ContextKind;
use crate::config::RuntimePaths;
use crate::exec::{SqliteDriver, execute};
use crate::query::tokenize;
use crate::sqlite::{ensure_sqlite_schema, open_sqlite_connection};

#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Fixes the random pick made by `-random`.
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    #[arg(
        value_name = "TERM",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub terms: Vec<String>,
}

/// Runs one query and prints its reply line. Rejected queries surface as a
/// [`crate::error::QueryError`] inside the returned error.
pub fn run(
    args: &QueryArgs,
    context: ContextKind,
    runtime_paths: &RuntimePaths,
    nick: &str,
) -> Result<()> {
    let catalog = load_catalog(runtime_paths)?;
    let connection = open_sqlite_connection(&runtime_paths.db_path)?;
    ensure_sqlite_schema(&connection, &catalog)?;
    let driver = SqliteDriver::new(connection);

    let terms = tokenize(&args.terms);
    let reply = match args.seed {
        Some(seed) => execute(
            &driver,
            &catalog,
            context,
            nick,
            &terms,
            &mut StdRng::seed_from_u64(seed),
        )?,
        None => execute(
            &driver,
            &catalog,
            context,
            nick,
            &terms,
            &mut rand::thread_rng(),
        )?,
    };
    println!("{reply}");
    Ok(())
}
