//! Session completion pipeline
//!
//! A finished interval becomes a [`SessionRecord`], is appended to the
//! record store, and is then registered with two independent external
//! services. Each registration has a local fallback:
//!
//! - calendar event -> `.ics` file in the sessions directory
//! - spreadsheet row -> line in `sessions_log.csv`
//!
//! Nothing here is ever reported back as an error; a fallback only shows up
//! as `degraded` on the record and as the artifact on disk.

mod google;
mod ics;
mod ledger;

pub use google::GoogleWorkspace;

use animatek_ipc::SessionRecord;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::store::{RecordStore, StoreError};

#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Malformed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Create an event for the session, returning its external id
    async fn insert_event(&self, record: &SessionRecord, timezone: &str)
        -> Result<String, ExternalError>;
}

/// One row of the practice spreadsheet (`A:F`)
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub category: String,
    pub duration_min: f64,
    pub language: String,
    pub date: String,
    pub session_type: String,
    pub url: String,
}

#[async_trait]
pub trait SheetService: Send + Sync {
    async fn append_row(&self, record: &SessionRecord) -> Result<(), ExternalError>;
    async fn list_rows(&self) -> Result<Vec<SheetRow>, ExternalError>;
}

/// Stand-in when no external account is set up; every call falls back
pub struct Unconfigured;

#[async_trait]
impl CalendarService for Unconfigured {
    async fn insert_event(&self, _: &SessionRecord, _: &str) -> Result<String, ExternalError> {
        Err(ExternalError::NotConfigured("Calendar"))
    }
}

#[async_trait]
impl SheetService for Unconfigured {
    async fn append_row(&self, _: &SessionRecord) -> Result<(), ExternalError> {
        Err(ExternalError::NotConfigured("Spreadsheet"))
    }

    async fn list_rows(&self) -> Result<Vec<SheetRow>, ExternalError> {
        Err(ExternalError::NotConfigured("Spreadsheet"))
    }
}

/// Session fields captured from the timer at completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFields {
    pub category: String,
    pub session_name: String,
    pub language: String,
    pub session_type: String,
}

pub struct SessionRecorder {
    store: Arc<RecordStore>,
    calendar: Arc<dyn CalendarService>,
    sheet: Arc<dyn SheetService>,
    out_dir: PathBuf,
    call_timeout: Duration,
}

impl SessionRecorder {
    pub fn new(
        store: Arc<RecordStore>,
        calendar: Arc<dyn CalendarService>,
        sheet: Arc<dyn SheetService>,
        out_dir: impl Into<PathBuf>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            calendar,
            sheet,
            out_dir: out_dir.into(),
            call_timeout,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Persist and register a finished session. Never fails.
    pub async fn record(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        fields: SessionFields,
    ) -> SessionRecord {
        let mut record = build_record(start, end, fields);

        if let Err(e) = self.store.append_session(&record).await {
            error!("Failed to persist session {}: {}", record.id, e);
        }

        let timezone = match self.store.config().await {
            Ok(config) => config.timezone,
            Err(e) => {
                warn!("Could not read config for timezone: {}", e);
                animatek_ipc::AppConfig::default().timezone
            }
        };

        self.register_calendar(&mut record, &timezone).await;
        self.register_sheet(&mut record).await;
        record.degraded = record.calendar_event_id.is_none() || !record.sheet_appended;

        let outcome = record.clone();
        let annotated = self
            .store
            .update_session(record.id, move |stored| {
                stored.calendar_event_id = outcome.calendar_event_id;
                stored.ics_path = outcome.ics_path;
                stored.sheet_appended = outcome.sheet_appended;
                stored.ledger_appended = outcome.ledger_appended;
                stored.degraded = outcome.degraded;
            })
            .await;
        if let Err(e) = annotated {
            error!("Failed to store registration outcome for {}: {}", record.id, e);
        }

        info!(
            "Session {} recorded: {} {}s{}",
            record.id,
            record.category,
            record.duration_sec,
            if record.degraded { " (degraded)" } else { "" }
        );
        record
    }

    async fn register_calendar(&self, record: &mut SessionRecord, timezone: &str) {
        let external = timeout(self.call_timeout, self.calendar.insert_event(record, timezone))
            .await
            .unwrap_or(Err(ExternalError::Timeout(self.call_timeout)));
        match external {
            Ok(event_id) => {
                record.calendar_event_id = Some(event_id);
                return;
            }
            Err(e) => warn!("Calendar registration failed, writing .ics instead: {}", e),
        }

        match ics::write_ics(&self.out_dir, record, timezone).await {
            Ok(path) => record.ics_path = Some(path),
            Err(e) => error!("Calendar fallback failed for {}: {}", record.id, e),
        }
    }

    async fn register_sheet(&self, record: &mut SessionRecord) {
        let external = timeout(self.call_timeout, self.sheet.append_row(record))
            .await
            .unwrap_or(Err(ExternalError::Timeout(self.call_timeout)));
        match external {
            Ok(()) => {
                record.sheet_appended = true;
                return;
            }
            Err(e) => warn!("Spreadsheet append failed, writing CSV instead: {}", e),
        }

        let path = self.out_dir.join(ledger::LEDGER_FILE);
        let row = record.clone();
        let appended = tokio::task::spawn_blocking(move || ledger::append_row(&path, &row)).await;
        match appended {
            Ok(Ok(())) => record.ledger_appended = true,
            Ok(Err(e)) => error!("Ledger fallback failed for {}: {}", record.id, e),
            Err(e) => error!("Ledger task panicked for {}: {}", record.id, e),
        }
    }

    /// Replace every stored session with the spreadsheet contents
    pub async fn import_from_sheet(&self) -> Result<usize, ExternalError> {
        let rows = timeout(self.call_timeout, self.sheet.list_rows())
            .await
            .unwrap_or(Err(ExternalError::Timeout(self.call_timeout)))?;
        let sessions = records_from_rows(&rows);
        self.store.replace_sessions(&sessions).await?;
        info!("Imported {} sessions from spreadsheet", sessions.len());
        Ok(sessions.len())
    }
}

/// Wall-clock duration, pauses included, never below one second
fn build_record(start: DateTime<Utc>, end: DateTime<Utc>, fields: SessionFields) -> SessionRecord {
    let end = end.max(start);
    let total_sec = (((end - start).num_milliseconds() as f64) / 1000.0).round() as i64;
    let duration_sec = total_sec.max(1);
    SessionRecord {
        id: end.timestamp_millis(),
        start,
        end,
        duration_min: (duration_sec as f64 / 60.0).round() as i64,
        duration_sec,
        category: fields.category,
        language: fields.language,
        session_type: fields.session_type,
        session_name: fields.session_name,
        url: None,
        calendar_event_id: None,
        ics_path: None,
        sheet_appended: false,
        ledger_appended: false,
        degraded: false,
    }
}

fn records_from_rows(rows: &[SheetRow]) -> Vec<SessionRecord> {
    rows.iter()
        .filter_map(|row| {
            let Some(start) = midday(&row.date) else {
                warn!("Skipping spreadsheet row with bad date {:?}", row.date);
                return None;
            };
            let minutes = if row.duration_min.is_finite() { row.duration_min.max(0.0) } else { 0.0 };
            let end = start + chrono::Duration::seconds((minutes * 60.0).round() as i64);
            Some(SessionRecord {
                id: start.timestamp_millis(),
                start,
                end,
                duration_min: minutes.round() as i64,
                duration_sec: (minutes * 60.0).round() as i64,
                category: row.category.clone(),
                language: row.language.clone(),
                session_type: row.session_type.clone(),
                session_name: row.category.clone(),
                url: Some(row.url.clone()).filter(|u| !u.is_empty()),
                calendar_event_id: None,
                ics_path: None,
                sheet_appended: true,
                ledger_appended: false,
                degraded: false,
            })
        })
        .collect()
}

/// 12:00 local time on a `YYYY-MM-DD` date
fn midday(date: &str) -> Option<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let noon = day.and_hms_opt(12, 0, 0)?;
    Local
        .from_local_datetime(&noon)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `YYYY-MM-DD` of the session start in local time
fn local_date(record: &SessionRecord) -> String {
    record.start.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

fn rounded_minutes(record: &SessionRecord) -> i64 {
    (record.duration_sec as f64 / 60.0).round() as i64
}

fn event_summary(record: &SessionRecord) -> String {
    format!("Sesión {} {} minutos", record.category, rounded_minutes(record))
}
