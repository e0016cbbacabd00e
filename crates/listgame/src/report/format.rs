use rusqlite::types::Value as SqlValue;

use crate::catalog::ScalarKind;
use crate::utils::time::{pretty_date, pretty_duration};

const DURATION_FIELD: &str = "dur";

/// Two decimals with trailing zeros (and a bare point) trimmed.
#[must_use]
pub fn format_number(value: f64) -> String {
    let fixed = format!("{value:.2}");
    if fixed.contains('.') {
        fixed.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        fixed
    }
}

/// `num/den` as a two-decimal percentage, `-` when `den` is zero.
#[must_use]
pub fn percentage(num: f64, den: f64) -> String {
    if den == 0.0 {
        "-".to_string()
    } else {
        format!("{:.2}%", num * 100.0 / den)
    }
}

#[must_use]
pub fn format_cell(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Integer(value) => value.to_string(),
        SqlValue::Real(value) => format_number(*value),
        SqlValue::Text(value) => value.clone(),
        SqlValue::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[must_use]
pub fn cell_as_f64(value: &SqlValue) -> f64 {
    match value {
        SqlValue::Integer(value) => *value as f64,
        SqlValue::Real(value) => *value,
        SqlValue::Text(value) => value.trim().parse().unwrap_or(0.0),
        SqlValue::Null | SqlValue::Blob(_) => 0.0,
    }
}

/// Display form of a named field: dates prettified, `dur` as `H:MM:SS`.
#[must_use]
pub fn format_field_value(name: &str, kind: Option<ScalarKind>, value: &SqlValue) -> String {
    if name == DURATION_FIELD {
        if let SqlValue::Integer(seconds) = value {
            return pretty_duration(*seconds);
        }
    }
    match (kind, value) {
        (Some(ScalarKind::Date), SqlValue::Text(text)) => pretty_date(text),
        _ => format_cell(value),
    }
}
