pub mod crawl_query;
pub mod fields;
pub mod pipeline;
pub mod predicate;
pub mod sort;

pub use crawl_query::{Actor, CrawlQuery, SqlStatement};
pub use pipeline::{QueryGroup, parse_query, tokenize};
