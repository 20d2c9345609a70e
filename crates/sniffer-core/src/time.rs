use chrono::{SecondsFormat, Utc};

/// Wall-clock timestamp for an emitted record: ISO-8601 UTC with
/// millisecond precision, e.g. `2026-07-26T12:34:56.789Z`.
///
/// Per spec.md §9's clock-source note, this is the *only* place the wall
/// clock is read; connection/stream bookkeeping uses a monotonic clock
/// (`std::time::Instant`) instead.
pub fn now_iso8601_millis() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
