use animatek_ipc::SessionRecord;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::{
    event_summary, local_date, rounded_minutes, CalendarService, ExternalError, SheetRow,
    SheetService,
};
use crate::store::RecordStore;

const CALENDAR_API: &str = "https://www.googleapis.com/calendar/v3";
const SHEETS_API: &str = "https://sheets.googleapis.com/v4";
const TOKENS_FILE: &str = "tokens.json";

/// Google Calendar + Sheets over REST
///
/// Uses the `access_token` from `tokens.json` in the record store. Obtaining
/// and refreshing that token happens outside the daemon.
pub struct GoogleWorkspace {
    http: reqwest::Client,
    store: Arc<RecordStore>,
    calendar_id: String,
    sheet_id: Option<String>,
}

impl GoogleWorkspace {
    pub fn new(
        store: Arc<RecordStore>,
        calendar_id: impl Into<String>,
        sheet_id: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ExternalError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            store,
            calendar_id: calendar_id.into(),
            sheet_id: sheet_id.filter(|id| !id.is_empty()),
        })
    }

    async fn access_token(&self) -> Result<String, ExternalError> {
        let tokens: Option<Value> = self.store.read_document(TOKENS_FILE).await?;
        tokens
            .as_ref()
            .and_then(|t| t.get("access_token"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ExternalError::NotConfigured("Google OAuth token"))
    }

    fn sheet_id(&self) -> Result<&str, ExternalError> {
        self.sheet_id
            .as_deref()
            .ok_or(ExternalError::NotConfigured("SHEET_ID"))
    }
}

async fn json_reply(response: reqwest::Response) -> Result<Value, ExternalError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ExternalError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl CalendarService for GoogleWorkspace {
    async fn insert_event(
        &self,
        record: &SessionRecord,
        timezone: &str,
    ) -> Result<String, ExternalError> {
        let token = self.access_token().await?;
        let minutes = rounded_minutes(record);
        let event = json!({
            "summary": event_summary(record),
            "description": format!(
                "Registrada automáticamente por Animatek Timer. Duración: {minutes} min."
            ),
            "start": { "dateTime": record.start.to_rfc3339(), "timeZone": timezone },
            "end": { "dateTime": record.end.to_rfc3339(), "timeZone": timezone },
            "reminders": {
                "useDefault": false,
                "overrides": [{ "method": "popup", "minutes": 1 }]
            },
        });

        let response = self
            .http
            .post(format!("{CALENDAR_API}/calendars/{}/events", self.calendar_id))
            .bearer_auth(token)
            .json(&event)
            .send()
            .await?;
        let created = json_reply(response).await?;
        created["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ExternalError::Malformed("event without id".to_string()))
    }
}

#[async_trait]
impl SheetService for GoogleWorkspace {
    async fn append_row(&self, record: &SessionRecord) -> Result<(), ExternalError> {
        let sheet_id = self.sheet_id()?;
        let token = self.access_token().await?;
        let row = [
            record.category.clone(),
            record.duration_min.to_string(),
            record.language.clone(),
            local_date(record),
            record.session_type.clone(),
            record.url.clone().unwrap_or_default(),
        ];

        let response = self
            .http
            .post(format!("{SHEETS_API}/spreadsheets/{sheet_id}/values/A:F:append"))
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(token)
            .json(&json!({ "values": [row] }))
            .send()
            .await?;
        json_reply(response).await?;
        Ok(())
    }

    async fn list_rows(&self) -> Result<Vec<SheetRow>, ExternalError> {
        let sheet_id = self.sheet_id()?;
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{SHEETS_API}/spreadsheets/{sheet_id}/values/A2:F"))
            .bearer_auth(token)
            .send()
            .await?;
        let body = json_reply(response).await?;
        Ok(parse_rows(&body))
    }
}

fn parse_rows(body: &Value) -> Vec<SheetRow> {
    let cell = |row: &[Value], i: usize| -> String {
        match row.get(i) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };
    body["values"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_array)
                .map(|row| SheetRow {
                    category: cell(row, 0),
                    duration_min: cell(row, 1).trim().parse().unwrap_or(0.0),
                    language: cell(row, 2),
                    date: cell(row, 3),
                    session_type: cell(row, 4),
                    url: cell(row, 5),
                })
                .collect()
        })
        .unwrap_or_default()
}
