use std::time::{SystemTime, UNIX_EPOCH};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod operator;
pub mod sse;
pub mod team;
pub mod validation;
pub mod views;

pub(crate) fn format_system_time(at: SystemTime) -> String {
    let datetime = match at.duration_since(UNIX_EPOCH) {
        Ok(after) => time::Duration::try_from(after)
            .ok()
            .and_then(|offset| OffsetDateTime::UNIX_EPOCH.checked_add(offset)),
        Err(before) => time::Duration::try_from(before.duration())
            .ok()
            .and_then(|offset| OffsetDateTime::UNIX_EPOCH.checked_sub(offset)),
    };

    datetime
        .and_then(|datetime| datetime.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
