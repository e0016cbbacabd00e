use anyhow::Result;
use clap::Args;

use super::load_catalog;
use crate::config::RuntimePaths;
use crate::sqlite::{ensure_sqlite_schema, open_sqlite_connection};

#[derive(Debug, Clone, Args)]
pub struct InitArgs {}

pub fn run(_args: &InitArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let catalog = load_catalog(runtime_paths)?;
    let connection = open_sqlite_connection(&runtime_paths.db_path)?;
    ensure_sqlite_schema(&connection, &catalog)?;
    println!("init: schema ready db={}", runtime_paths.db_path.display());
    Ok(())
}
