use anyhow::{Context, Result, anyhow, bail};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

/// Parses an event timestamp: the stored form, RFC 3339, a logfile stamp
/// (`YYYYMMDDHHMMSS` with a zero-based month and an optional `S`/`D` suffix),
/// or epoch seconds.
pub fn parse_event_time(raw: &str) -> Result<PrimitiveDateTime> {
    let candidate = raw.trim();
    if candidate.is_empty() {
        bail!("timestamp input is empty");
    }

    if let Ok(parsed) = PrimitiveDateTime::parse(
        candidate,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    ) {
        return Ok(parsed);
    }

    if let Ok(parsed) = OffsetDateTime::parse(candidate, &Rfc3339) {
        let utc = parsed.to_offset(UtcOffset::UTC);
        return Ok(PrimitiveDateTime::new(utc.date(), utc.time()));
    }

    let stamp = candidate.trim_end_matches(['S', 'D']);
    if stamp.len() == 14 && stamp.bytes().all(|b| b.is_ascii_digit()) {
        return parse_logfile_stamp(stamp);
    }

    if let Ok(seconds) = candidate.parse::<i64>() {
        let parsed = OffsetDateTime::from_unix_timestamp(seconds)
            .with_context(|| format!("epoch seconds out of range: {candidate}"))?;
        return Ok(PrimitiveDateTime::new(parsed.date(), parsed.time()));
    }

    bail!("unsupported timestamp format: {candidate}");
}

/// Normalizes any accepted timestamp to the stored form
/// `YYYY-MM-DD HH:MM:SS`, which sorts chronologically as text.
pub fn normalize_event_time(raw: &str) -> Result<String> {
    let parsed = parse_event_time(raw)?;
    parsed
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .context("failed to format event timestamp")
}

/// Display form of a date cell. Unparseable input is shown as given.
#[must_use]
pub fn pretty_date(raw: &str) -> String {
    normalize_event_time(raw).unwrap_or_else(|_| raw.to_string())
}

/// `H:MM:SS`, hours unbounded.
#[must_use]
pub fn pretty_duration(seconds: i64) -> String {
    let sign = if seconds < 0 { "-" } else { "" };
    let seconds = seconds.unsigned_abs();
    format!(
        "{sign}{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

fn parse_logfile_stamp(stamp: &str) -> Result<PrimitiveDateTime> {
    let field = |range: std::ops::Range<usize>| -> Result<u32> {
        stamp[range]
            .parse::<u32>()
            .with_context(|| format!("invalid logfile timestamp: {stamp}"))
    };

    let year = i32::try_from(field(0..4)?).map_err(|_| anyhow!("year out of range: {stamp}"))?;
    let month = u8::try_from(field(4..6)? + 1)
        .ok()
        .and_then(|month| Month::try_from(month).ok())
        .ok_or_else(|| anyhow!("month out of range: {stamp}"))?;
    let day = u8::try_from(field(6..8)?).map_err(|_| anyhow!("day out of range: {stamp}"))?;
    let hour = u8::try_from(field(8..10)?).map_err(|_| anyhow!("hour out of range: {stamp}"))?;
    let minute =
        u8::try_from(field(10..12)?).map_err(|_| anyhow!("minute out of range: {stamp}"))?;
    let second =
        u8::try_from(field(12..14)?).map_err(|_| anyhow!("second out of range: {stamp}"))?;

    let date = Date::from_calendar_date(year, month, day)
        .with_context(|| format!("invalid logfile date: {stamp}"))?;
    let time = Time::from_hms(hour, minute, second)
        .with_context(|| format!("invalid logfile time: {stamp}"))?;
    Ok(PrimitiveDateTime::new(date, time))
}

#[cfg(test)]
mod tests {
    use super::{normalize_event_time, pretty_date, pretty_duration};

    #[test]
    fn logfile_stamps_use_zero_based_months() {
        let stored = normalize_event_time("20100523153000S").expect("stamp should parse");
        assert_eq!(stored, "2010-06-23 15:30:00");
    }

    #[test]
    fn rfc3339_is_converted_to_utc() {
        let stored =
            normalize_event_time("2026-02-05T09:00:03+02:00").expect("timestamp should parse");
        assert_eq!(stored, "2026-02-05 07:00:03");
    }

    #[test]
    fn stored_form_round_trips() {
        assert_eq!(pretty_date("2011-01-02 03:04:05"), "2011-01-02 03:04:05");
        assert_eq!(
            normalize_event_time("1770274803").expect("epoch should parse"),
            "2026-02-05 07:00:03"
        );
    }

    #[test]
    fn unparseable_dates_are_shown_verbatim() {
        assert_eq!(pretty_date("yesterday"), "yesterday");
        assert!(normalize_event_time("20101323153000S").is_err());
    }

    #[test]
    fn durations_render_as_hours_minutes_seconds() {
        assert_eq!(pretty_duration(0), "0:00:00");
        assert_eq!(pretty_duration(3_725), "1:02:05");
        assert_eq!(pretty_duration(100_000), "27:46:40");
    }
}
