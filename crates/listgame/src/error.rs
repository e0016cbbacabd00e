use thiserror::Error;

/// Caller-facing failures of the query core.
///
/// Every variant renders as a single human-readable line; that line is the
/// command's reply. Zero matching rows is not an error and never appears here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Malformed clause: {clause}")]
    MalformedClause { clause: String },

    #[error("Repeated field {field} in summary list {clause}")]
    DuplicateGroupField { field: String, clause: String },

    #[error("Cannot mix aggregate and non-aggregate fields in {clause}")]
    InconsistentFieldKinds { clause: String },

    #[error("Cannot summarise by {field}")]
    NotSummarisable { field: String },

    #[error("Unknown selector {field}")]
    UnknownField { field: String },

    #[error("Unknown aggregate function {function} in {clause}")]
    UnknownAggregateFunction { function: String, clause: String },

    #[error("{function} cannot be applied to {field}")]
    AggregateTypeMismatch { function: String, field: String },

    #[error("Bad sort condition: '{field}'")]
    UnknownSortField { field: String },

    #[error("Bad input: {input}; when using /, all query pieces must be summary queries")]
    MixedAggregationAcrossFragments { input: String },

    #[error("Bad index: {index}")]
    BadIndex { index: String },

    #[error("Index out of range: {index}")]
    IndexOutOfRange { index: i64 },

    #[error("query execution failed: {message}")]
    Driver { message: String },
}

impl QueryError {
    #[must_use]
    pub fn malformed(clause: impl Into<String>) -> Self {
        Self::MalformedClause {
            clause: clause.into(),
        }
    }

    #[must_use]
    pub fn unknown_field(field: impl Into<String>) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }

    #[must_use]
    pub fn driver(error: &anyhow::Error) -> Self {
        Self::Driver {
            message: format!("{error:#}"),
        }
    }

    /// Driver failures are runtime faults; everything else is bad input.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        !matches!(self, Self::Driver { .. })
    }
}
