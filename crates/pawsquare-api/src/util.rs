use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

/// Parse a SQLite timestamp column. SQLite's `datetime('now')` stores
/// `YYYY-MM-DD HH:MM:SS` without a timezone; parse as naive UTC when RFC 3339
/// parsing fails.
pub(crate) fn parse_timestamp(value: &str, context: &str) -> DateTime<Utc> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on {}: {}", value, context, e);
            DateTime::default()
        })
}

pub(crate) fn parse_id(value: &str, context: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt id '{}' on {}: {}", value, context, e);
        Uuid::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_naive_timestamps_parse_as_utc() {
        let parsed = parse_timestamp("2026-08-07 12:30:00", "test");
        assert_eq!(parsed.to_rfc3339(), "2026-08-07T12:30:00+00:00");
    }

    #[test]
    fn rfc3339_timestamps_parse_directly() {
        let parsed = parse_timestamp("2026-08-07T12:30:00Z", "test");
        assert_eq!(parsed.to_rfc3339(), "2026-08-07T12:30:00+00:00");
    }
}
