pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else if ms < 3_600_000 {
        let mins = ms / 60_000;
        let secs = (ms % 60_000) / 1000;
        format!("{}m {}s", mins, secs)
    } else {
        let hours = ms / 3_600_000;
        let mins = (ms % 3_600_000) / 60_000;
        format!("{}h {}m", hours, mins)
    }
}

pub fn format_cost(usd: f64) -> String {
    let usd = usd.abs(); // avoid negative zero display
    if usd < 0.01 {
        format!("${:.4}", usd)
    } else {
        format!("${:.2}", usd)
    }
}

/// Current UTC time as an RFC 3339 string, the timestamp format used on
/// every persisted record and emitted event.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
