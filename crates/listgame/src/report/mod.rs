pub mod format;
pub mod summary;

pub use summary::{SummaryOutcome, SummaryReport, SummaryRow, summarise};
