pub mod catalog;
pub mod init;
pub mod load;
pub mod query;

use anyhow::Result;

use crate::catalog::Catalog;
use crate::config::RuntimePaths;

/// The catalog named by `--catalog`, else the builtin one.
pub fn load_catalog(runtime_paths: &RuntimePaths) -> Result<Catalog> {
    match &runtime_paths.catalog_path {
        Some(path) => Catalog::load(path),
        None => Ok(Catalog::builtin()),
    }
}
