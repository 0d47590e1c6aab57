//! Utility functions for reading and writing stored values.

use crate::error::{Error, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Milliseconds since the Unix epoch. Times before the epoch clamp to 0.
pub(crate) fn to_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

/// `None` when the platform cannot represent the time.
pub(crate) fn from_millis(millis: u64) -> Option<SystemTime> {
    UNIX_EPOCH.checked_add(Duration::from_millis(millis))
}

/// Parse a stored counter. A missing value reads as 0.
pub(crate) fn parse_counter(raw: Option<&str>) -> Result<u64> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::StoreUnavailable(format!("stored counter {:?} is not a number", raw))),
        None => Ok(0),
    }
}

/// Parse a stored timestamp.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Result<Option<SystemTime>> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .ok()
            .and_then(from_millis)
            .map(Some)
            .ok_or_else(|| {
                Error::StoreUnavailable(format!("stored timestamp {:?} is not a valid time", raw))
            }),
        None => Ok(None),
    }
}
