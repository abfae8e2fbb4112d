//! Durable record store: `config.json` and the append-only `sessions.json`
//!
//! Every write is a full-document replace through a temp file and a rename,
//! so readers never see a half-written document. Read-modify-write cycles
//! are serialized by an in-process lock.

use animatek_ipc::{AppConfig, SessionRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

const SESSIONS_FILE: &str = "sessions.json";
const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session {0} not found")]
    SessionNotFound(i64),
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub struct RecordStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordStore {
    /// Open the store, creating the directory and both documents if missing
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        };
        fs::create_dir_all(&store.dir).await?;
        if !store.path(SESSIONS_FILE).exists() {
            store.write_json(SESSIONS_FILE, &Vec::<SessionRecord>::new()).await?;
        }
        if !store.path(CONFIG_FILE).exists() {
            store.write_json(CONFIG_FILE, &AppConfig::default()).await?;
        }
        Ok(store)
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Read any JSON document in the store; `None` if it does not exist
    pub async fn read_document<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match fs::read_to_string(self.path(name)).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path(name);
        let tmp = self.path(&format!("{name}.tmp"));
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn config(&self) -> Result<AppConfig> {
        Ok(self.read_document(CONFIG_FILE).await?.unwrap_or_default())
    }

    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(CONFIG_FILE, config).await
    }

    pub async fn sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(self.read_document(SESSIONS_FILE).await?.unwrap_or_default())
    }

    pub async fn append_session(&self, record: &SessionRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.sessions().await?;
        sessions.push(record.clone());
        self.write_json(SESSIONS_FILE, &sessions).await
    }

    /// Full overwrite, used by the spreadsheet re-import
    pub async fn replace_sessions(&self, sessions: &[SessionRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(SESSIONS_FILE, sessions).await
    }

    pub async fn clear_sessions(&self) -> Result<()> {
        self.replace_sessions(&[]).await
    }

    /// Remove every session with `id`; returns how many went away
    pub async fn delete_session(&self, id: i64) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.sessions().await?;
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        let removed = before - sessions.len();
        self.write_json(SESSIONS_FILE, &sessions).await?;
        Ok(removed)
    }

    pub async fn update_session<F>(&self, id: i64, update: F) -> Result<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let _guard = self.write_lock.lock().await;
        let mut sessions = self.sessions().await?;
        let record = sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::SessionNotFound(id))?;
        update(record);
        let updated = record.clone();
        self.write_json(SESSIONS_FILE, &sessions).await?;
        Ok(updated)
    }
}
