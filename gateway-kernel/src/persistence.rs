//! Local persistence of inbound entities.
//!
//! `JsonFilePersistence` appends one JSON document per line to a file per
//! topic under the data directory (`PIOT/ConstrainedDevice/SensorMsg` is stored
//! in `PIOT_ConstrainedDevice_SensorMsg.jsonl`). Each line wraps the entity with
//! an id, the storage time and the QoS it arrived with.

use crate::models::{now_timestamp, DataMessage};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),
}

/// Storage collaborator. Failures surface as `false`, never as a fault.
pub trait PersistenceClient: Send + Sync {
    fn store(&self, topic: &str, qos: i32, messages: &[DataMessage]) -> bool;

    fn fetch(&self, topic: &str) -> Result<Vec<DataMessage>, PersistenceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: Uuid,
    pub stored_at: String,
    pub qos: i32,
    pub message: DataMessage,
}

pub struct JsonFilePersistence {
    data_dir: PathBuf,
    write_lock: parking_lot::Mutex<()>,
}

impl JsonFilePersistence {
    /// Creates `data_dir` if needed.
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        debug!(dir = %data_dir.display(), "persistence initialized");
        Ok(Self {
            data_dir,
            write_lock: parking_lot::Mutex::new(()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_for(&self, topic: &str) -> Result<PathBuf, PersistenceError> {
        let name: String = topic
            .trim_matches('/')
            .chars()
            .map(|c| match c {
                '/' => '_',
                c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
                _ => '-',
            })
            .collect();
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(PersistenceError::InvalidTopic(topic.to_string()));
        }
        Ok(self.data_dir.join(format!("{name}.jsonl")))
    }

    fn append(
        &self,
        topic: &str,
        qos: i32,
        messages: &[DataMessage],
    ) -> Result<usize, PersistenceError> {
        let path = self.file_for(topic)?;
        let mut lines = String::new();
        for message in messages {
            let record = StoredRecord {
                id: Uuid::new_v4(),
                stored_at: now_timestamp(),
                qos,
                message: message.clone(),
            };
            lines.push_str(&serde_json::to_string(&record)?);
            lines.push('\n');
        }

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(lines.as_bytes())?;
        Ok(messages.len())
    }

    /// Full records for `topic`, oldest first. Corrupt lines are skipped.
    pub fn records(&self, topic: &str) -> Result<Vec<StoredRecord>, PersistenceError> {
        let path = self.file_for(topic)?;
        let content = {
            let _guard = self.write_lock.lock();
            match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            }
        };

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<StoredRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(%topic, "skipping corrupt record: {e}");
                    None
                }
            })
            .collect())
    }
}

impl PersistenceClient for JsonFilePersistence {
    fn store(&self, topic: &str, qos: i32, messages: &[DataMessage]) -> bool {
        if messages.is_empty() {
            return false;
        }
        match self.append(topic, qos, messages) {
            Ok(count) => {
                debug!(%topic, count, "stored");
                true
            }
            Err(e) => {
                warn!(%topic, "failed to store: {e}");
                false
            }
        }
    }

    fn fetch(&self, topic: &str) -> Result<Vec<DataMessage>, PersistenceError> {
        Ok(self.records(topic)?.into_iter().map(|r| r.message).collect())
    }
}
