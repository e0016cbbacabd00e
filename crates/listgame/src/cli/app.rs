use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    catalog::CatalogArgs, init::InitArgs, load::LoadArgs, query::QueryArgs,
};

#[derive(Debug, Parser)]
#[command(
    name = "listgame",
    version,
    about = "Query game and milestone logs with listgame shorthand"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Actor used when a query names none (defaults to $LISTGAME_NICK, then $USER).
    #[arg(long, global = true, value_name = "NAME")]
    pub nick: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Query finished games.
    Lg(QueryArgs),
    /// Query milestones.
    Lm(QueryArgs),
    Catalog(CatalogArgs),
    Init(InitArgs),
    Load(LoadArgs),
}
