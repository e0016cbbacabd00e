#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use listgame::QueryError;
use listgame::catalog::ContextKind;
use listgame::cli::app::{Cli, Command, RuntimeArgs};
use listgame::cli::commands;
use listgame::config::RuntimePaths;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_REJECTED_QUERY: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;
const DEFAULT_LOG_FILTER: &str = "listgame=warn";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing();

    match execute(cli) {
        Ok(()) => EXIT_SUCCESS,
        Err(error) => {
            let exit_code = classify_runtime_error(&error);
            if exit_code == EXIT_REJECTED_QUERY {
                println!("{error}");
            } else {
                eprintln!("listgame: {error:#}");
            }
            exit_code
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
    match cli.command {
        Command::Lg(args) => commands::query::run(
            &args,
            ContextKind::Game,
            &runtime_paths,
            &resolve_nick(&cli.runtime),
        ),
        Command::Lm(args) => commands::query::run(
            &args,
            ContextKind::Milestone,
            &runtime_paths,
            &resolve_nick(&cli.runtime),
        ),
        Command::Catalog(args) => commands::catalog::run(&args, &runtime_paths),
        Command::Init(args) => commands::init::run(&args, &runtime_paths),
        Command::Load(args) => commands::load::run(&args, &runtime_paths),
    }
}

/// Bad input is a rejected query; driver failures and everything outside
/// the query core are runtime failures.
fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<QueryError>() {
        Some(query_error) if query_error.is_input_error() => EXIT_REJECTED_QUERY,
        _ => EXIT_RUNTIME_FAILURE,
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn resolve_nick(args: &RuntimeArgs) -> String {
    let env_nick = std::env::var("LISTGAME_NICK").ok();
    let env_user = std::env::var("USER").ok();
    listgame::config::resolve_nick(
        args.nick.as_deref(),
        env_nick.as_deref(),
        env_user.as_deref(),
    )
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    listgame::config::resolve_runtime_paths(
        &home_dir,
        &cwd,
        args.db.as_deref(),
        args.catalog.as_deref(),
    )
}
