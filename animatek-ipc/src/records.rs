use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One completed practice session as stored in `sessions.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: i64,
    #[serde(rename = "startISO")]
    pub start: DateTime<Utc>,
    #[serde(rename = "endISO")]
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub duration_min: i64,
    #[serde(default)]
    pub duration_sec: i64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub session_type: String,
    #[serde(default)]
    pub session_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ics_path: Option<PathBuf>,
    #[serde(default)]
    pub sheet_appended: bool,
    #[serde(default)]
    pub ledger_appended: bool,
    /// Set when either registration fell back to a local artifact
    #[serde(default)]
    pub degraded: bool,
}

/// Where the calendar entry for a session ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarRegistration<'a> {
    External(&'a str),
    Local(&'a Path),
}

impl SessionRecord {
    pub fn calendar(&self) -> Option<CalendarRegistration<'_>> {
        match (&self.calendar_event_id, &self.ics_path) {
            (Some(id), _) => Some(CalendarRegistration::External(id)),
            (None, Some(path)) => Some(CalendarRegistration::Local(path)),
            (None, None) => None,
        }
    }

    /// Minutes used for aggregation; seconds win when present
    pub fn minutes(&self) -> f64 {
        if self.duration_sec > 0 {
            self.duration_sec as f64 / 60.0
        } else {
            self.duration_min as f64
        }
    }
}

/// Editable subset of a stored session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<i64>,
    #[serde(rename = "startISO", default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(rename = "endISO", default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn apply(self, record: &mut SessionRecord) {
        if let Some(url) = self.url {
            record.url = Some(url);
        }
        if let Some(name) = self.session_name {
            record.session_name = name;
        }
        if let Some(category) = self.category {
            record.category = category;
        }
        if let Some(language) = self.language {
            record.language = language;
        }
        if let Some(kind) = self.session_type {
            record.session_type = kind;
        }
        if let Some(min) = self.duration_min {
            record.duration_min = min;
        }
        if let Some(sec) = self.duration_sec {
            record.duration_sec = sec;
        }
        if let Some(start) = self.start {
            record.start = start;
        }
        if let Some(end) = self.end {
            record.end = end;
        }
    }
}

/// Per-category aggregation over the stored sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotals {
    pub totals_min: BTreeMap<String, f64>,
    pub totals_hours: BTreeMap<String, f64>,
    pub count: usize,
}

impl CategoryTotals {
    pub fn from_sessions(sessions: &[SessionRecord]) -> Self {
        let mut totals_min: BTreeMap<String, f64> = BTreeMap::new();
        for session in sessions {
            *totals_min.entry(session.category.clone()).or_insert(0.0) += session.minutes();
        }
        let totals_hours = totals_min
            .iter()
            .map(|(category, min)| (category.clone(), (min / 60.0 * 100.0).round() / 100.0))
            .collect();
        Self {
            totals_min,
            totals_hours,
            count: sessions.len(),
        }
    }
}

/// User-facing configuration kept in `config.json`
///
/// Keys the daemon does not know about are preserved in `extra` so that
/// dashboards can store their own settings alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub default_duration_min: f64,
    pub categories: Vec<String>,
    pub theme: String,
    pub opacity: f64,
    pub timezone: String,
    pub languages: Vec<String>,
    pub default_language: String,
    pub default_session_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_duration_min: 90.0,
            categories: ["Octatrack", "Digitakt", "Oxi One", "Bitwig"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            theme: "auto".to_string(),
            opacity: 0.85,
            timezone: "Europe/Madrid".to_string(),
            languages: vec!["ES".to_string(), "EN".to_string()],
            default_language: "ES".to_string(),
            default_session_type: "privada".to_string(),
            extra: Map::new(),
        }
    }
}

impl AppConfig {
    /// Timer duration derived from `defaultDurationMin`, never below a minute
    pub fn default_duration_sec(&self) -> u64 {
        let minutes = if self.default_duration_min.is_finite() {
            self.default_duration_min.round().max(0.0) as u64
        } else {
            0
        };
        (minutes * 60).max(60)
    }

    pub fn default_category(&self) -> String {
        self.categories
            .first()
            .cloned()
            .unwrap_or_else(|| "General".to_string())
    }

    /// Shallow merge: every top-level key of `patch` replaces the current one
    pub fn merged(&self, patch: &Value) -> Result<Self, serde_json::Error> {
        let mut current = serde_json::to_value(self)?;
        if let (Value::Object(base), Value::Object(updates)) = (&mut current, patch) {
            for (key, value) in updates {
                base.insert(key.clone(), value.clone());
            }
        }
        serde_json::from_value(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(category: &str, duration_sec: i64) -> SessionRecord {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        SessionRecord {
            id: 1,
            start,
            end: start + chrono::Duration::seconds(duration_sec),
            duration_min: (duration_sec as f64 / 60.0).round() as i64,
            duration_sec,
            category: category.to_string(),
            language: "ES".to_string(),
            session_type: "privada".to_string(),
            session_name: category.to_string(),
            url: None,
            calendar_event_id: None,
            ics_path: Some(PathBuf::from("/tmp/x.ics")),
            sheet_appended: false,
            ledger_appended: true,
            degraded: true,
        }
    }

    #[test]
    fn test_record_wire_names() {
        let value = serde_json::to_value(record("Bitwig", 600)).unwrap();
        assert!(value.get("startISO").is_some());
        assert!(value.get("endISO").is_some());
        assert_eq!(value["durationMin"], 10);
        assert_eq!(value["icsPath"], "/tmp/x.ics");
        assert!(value.get("calendarEventId").is_none());
        assert!(value.get("url").is_none());
    }

    #[test]
    fn test_legacy_record_without_outcome_fields() {
        let raw = json!({
            "id": 1700000000000i64,
            "startISO": "2025-01-02T10:00:00.000Z",
            "endISO": "2025-01-02T11:30:00.000Z",
            "durationMin": 90,
            "durationSec": 5400,
            "category": "Octatrack",
            "language": "ES",
            "sessionType": "privada",
            "sessionName": "Octatrack",
            "calendarEventId": "abc123"
        });
        let rec: SessionRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(rec.calendar(), Some(CalendarRegistration::External("abc123")));
        assert!(!rec.degraded);
    }

    #[test]
    fn test_patch_only_touches_given_fields() {
        let mut rec = record("Bitwig", 600);
        SessionPatch {
            url: Some("https://youtu.be/x".to_string()),
            category: Some("Digitakt".to_string()),
            ..Default::default()
        }
        .apply(&mut rec);
        assert_eq!(rec.url.as_deref(), Some("https://youtu.be/x"));
        assert_eq!(rec.category, "Digitakt");
        assert_eq!(rec.session_name, "Bitwig");
        assert_eq!(rec.duration_sec, 600);
    }

    #[test]
    fn test_category_totals() {
        let sessions = vec![
            record("Bitwig", 3600),
            record("Bitwig", 1800),
            record("Octatrack", 900),
        ];
        let totals = CategoryTotals::from_sessions(&sessions);
        assert_eq!(totals.count, 3);
        assert_eq!(totals.totals_min["Bitwig"], 90.0);
        assert_eq!(totals.totals_hours["Bitwig"], 1.5);
        assert_eq!(totals.totals_hours["Octatrack"], 0.25);
    }

    #[test]
    fn test_config_merge_keeps_unknown_keys() {
        let cfg = AppConfig::default();
        let merged = cfg
            .merged(&json!({"defaultDurationMin": 45, "accent": "#ff0000"}))
            .unwrap();
        assert_eq!(merged.default_duration_sec(), 2700);
        assert_eq!(merged.extra["accent"], "#ff0000");
        assert_eq!(merged.categories, cfg.categories);
    }

    #[test]
    fn test_config_duration_floor() {
        let cfg = AppConfig {
            default_duration_min: 0.2,
            ..Default::default()
        };
        assert_eq!(cfg.default_duration_sec(), 60);
    }
}
