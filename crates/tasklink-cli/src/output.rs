use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Render a timestamp relative to now, e.g. `in 42m` or `3h ago`.
pub fn relative_time(at: chrono::DateTime<chrono::Utc>) -> String {
    let delta = at - chrono::Utc::now();
    let secs = delta.num_seconds();
    let span = secs.unsigned_abs();
    let text = if span < 60 {
        format!("{span}s")
    } else if span < 3600 {
        format!("{}m", span / 60)
    } else if span < 86_400 {
        format!("{}h", span / 3600)
    } else {
        format!("{}d", span / 86_400)
    };
    if secs >= 0 {
        format!("in {text}")
    } else {
        format!("{text} ago")
    }
}
