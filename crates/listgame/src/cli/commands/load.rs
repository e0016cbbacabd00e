use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Args;

use super::load_catalog;
use crate::catalog::ContextKind;
use crate::config::RuntimePaths;
use crate::sqlite::{ensure_sqlite_schema, insert_records, open_sqlite_connection, parse_jsonl_records};

#[derive(Debug, Clone, Args)]
pub struct LoadArgs {
    /// JSONL file, one event record per line.
    #[arg(value_name = "PATH")]
    pub input: PathBuf,

    /// Load into the milestone table instead of the game table.
    #[arg(long, default_value_t = false)]
    pub milestones: bool,

    /// Game type whose tables receive the records.
    #[arg(long, value_name = "TYPE")]
    pub game: Option<String>,
}

pub fn run(args: &LoadArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let catalog = load_catalog(runtime_paths)?;
    let game = match &args.game {
        Some(token) => catalog
            .game_type(token)
            .ok_or_else(|| anyhow!("unknown game type: {token}"))?,
        None => catalog.default_game_type(),
    };
    let kind = if args.milestones {
        ContextKind::Milestone
    } else {
        ContextKind::Game
    };

    let input = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read records: {}", args.input.display()))?;
    let records = parse_jsonl_records(&input)
        .with_context(|| format!("invalid records file: {}", args.input.display()))?;

    let mut connection = open_sqlite_connection(&runtime_paths.db_path)?;
    ensure_sqlite_schema(&connection, &catalog)?;
    let written = insert_records(&mut connection, &catalog, kind, game, &records)?;
    println!(
        "load: complete records={written} table={} db={}",
        catalog.table_name(kind, game),
        runtime_paths.db_path.display()
    );
    Ok(())
}
