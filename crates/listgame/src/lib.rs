#![forbid(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod query;
pub mod report;
pub mod sqlite;
pub mod utils;

pub use cli::app::{Cli, Command};
pub use error::QueryError;
