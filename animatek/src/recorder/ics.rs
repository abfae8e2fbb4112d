use animatek_ipc::SessionRecord;
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{event_summary, rounded_minutes, ExternalError};

/// Write a single-event iCalendar file for the session; returns its path
pub async fn write_ics(
    out_dir: &Path,
    record: &SessionRecord,
    timezone: &str,
) -> Result<PathBuf, ExternalError> {
    fs::create_dir_all(out_dir).await?;
    let uid = format!(
        "{}-{:08x}@animatek.timer",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    );
    let path = out_dir.join(file_name(record));
    fs::write(&path, render(record, timezone, &uid)).await?;
    Ok(path)
}

fn file_name(record: &SessionRecord) -> String {
    let category: String = record
        .category
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let category = if category.is_empty() { "Categoria".to_string() } else { category };
    format!("{}_{}.ics", record.start.format("%Y%m%d_%H%M%S"), category)
}

fn local_stamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y%m%dT%H%M%S").to_string()
}

fn render(record: &SessionRecord, timezone: &str, uid: &str) -> String {
    let minutes = rounded_minutes(record);
    [
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//Animatek Timer//ES".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{uid}"),
        format!("DTSTAMP:{}", record.end.format("%Y%m%dT%H%M%SZ")),
        format!("DTSTART;TZID={timezone}:{}", local_stamp(record.start)),
        format!("DTEND;TZID={timezone}:{}", local_stamp(record.end)),
        format!("SUMMARY:{}", event_summary(record)),
        format!("DESCRIPTION:Duración: {minutes} min"),
        "END:VEVENT".to_string(),
        "END:VCALENDAR".to_string(),
    ]
    .join("\r\n")
}
