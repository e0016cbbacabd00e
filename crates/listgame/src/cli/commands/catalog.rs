use anyhow::{Context, Result};
use clap::Args;

use super::load_catalog;
use crate::config::RuntimePaths;

#[derive(Debug, Clone, Args)]
pub struct CatalogArgs {
    /// Print the JSON Schema of the catalog document instead.
    #[arg(long, default_value_t = false)]
    pub schema: bool,
}

pub fn run(args: &CatalogArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    println!("{}", render(args, runtime_paths)?);
    Ok(())
}

pub fn render(args: &CatalogArgs, runtime_paths: &RuntimePaths) -> Result<String> {
    let document = if args.schema {
        crate::catalog::json_schema()
    } else {
        let catalog = load_catalog(runtime_paths)?;
        serde_json::to_value(catalog.to_file()).context("failed to serialize catalog")?
    };
    serde_json::to_string_pretty(&document).context("failed to render catalog json")
}
