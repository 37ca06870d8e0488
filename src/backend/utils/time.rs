// src/backend/utils/time.rs
use crate::error::VaultError;
use crate::models::common::{Timestamp, NANOS_PER_MINUTE};
use chrono::{DateTime, SecondsFormat};

/// Returns the current Internet Computer time as nanoseconds since epoch.
pub fn get_current_time_ns() -> Timestamp {
    ic_cdk::api::time()
}

/// Drops seconds and sub-second precision, the granularity of release sweeps.
pub fn truncate_to_minute(ts: Timestamp) -> Timestamp {
    ts - ts % NANOS_PER_MINUTE
}

/// Parses an RFC3339 timestamp into nanoseconds since epoch.
pub fn parse_rfc3339(value: &str) -> Result<Timestamp, VaultError> {
    let parsed = DateTime::parse_from_rfc3339(value.trim()).map_err(|e| {
        VaultError::ValidationFailed(format!("invalid RFC3339 timestamp '{}': {}", value, e))
    })?;
    parsed
        .timestamp_nanos_opt()
        .and_then(|nanos| u64::try_from(nanos).ok())
        .ok_or_else(|| {
            VaultError::ValidationFailed(format!("timestamp '{}' is out of range", value))
        })
}

pub fn format_rfc3339(ts: Timestamp) -> Option<String> {
    let secs = i64::try_from(ts / 1_000_000_000).ok()?;
    let nanos = (ts % 1_000_000_000) as u32;
    DateTime::from_timestamp(secs, nanos).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_offsets_into_utc_nanos() {
        let ts = parse_rfc3339("2030-01-01T09:30:00+02:00").unwrap();
        assert_eq!(format_rfc3339(ts).as_deref(), Some("2030-01-01T07:30:00Z"));
    }

    #[test]
    fn rejects_garbage_and_pre_epoch_dates() {
        assert!(matches!(
            parse_rfc3339("next tuesday"),
            Err(VaultError::ValidationFailed(_))
        ));
        assert!(matches!(
            parse_rfc3339("1960-01-01T00:00:00Z"),
            Err(VaultError::ValidationFailed(_))
        ));
    }

    #[test]
    fn truncation_keeps_whole_minutes() {
        let ts = 5 * NANOS_PER_MINUTE + 59_999_999_999;
        assert_eq!(truncate_to_minute(ts), 5 * NANOS_PER_MINUTE);
    }
}
