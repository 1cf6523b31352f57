//! OpsDeck Protocol
//!
//! Shared types for the conversation console: the canonical message shape,
//! the history payloads served over HTTP and the frames received over the
//! live WebSocket channel.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub mod frame;
pub mod history;
pub mod types;

pub use frame::{InboundFrame, StructuredFrame};
pub use history::{ConversationRecord, HistoryEntry, HistoryPayload};
pub use types::*;

/// Generate a new unique message ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a short random conversation identity (12 hex chars).
pub fn new_conversation_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// Current wall-clock time as an ISO 8601 UTC timestamp
pub fn now_timestamp() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    iso_timestamp(millis)
}

/// Format millis-since-epoch as `YYYY-MM-DDTHH:MM:SSZ`
pub fn iso_timestamp(millis: u128) -> String {
    let total_secs = (millis / 1000) as i64;
    let days = total_secs.div_euclid(86_400);
    let secs_of_day = total_secs.rem_euclid(86_400);

    // Civil-from-days over 400-year eras
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    )
}
