//! Append-only JSON-lines sinks.
//!
//! - [`AuditLogger`]: one line per intake decision (the `AuditLog` port)
//! - [`JsonlNotificationLog`]: one line per notification (a `NotificationChannel`)

use async_trait::async_trait;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AuditEntry, Notification};
use crate::domain::ports::{AuditLog, NotificationChannel};

/// A file opened in append mode, written one JSON document per line.
#[derive(Clone)]
struct JsonlFile {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl JsonlFile {
    /// Creates parent directories if they don't exist and opens in append
    /// mode to preserve the existing trail.
    async fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    fn append<T: Serialize>(&self, value: &T) -> DomainResult<()> {
        let json = serde_json::to_string(value)?;

        let mut file = self
            .file
            .lock()
            .map_err(|e| DomainError::DatabaseError(format!("{} mutex poisoned: {e}", self.path.display())))?;
        writeln!(file, "{json}")
            .and_then(|()| file.flush())
            .map_err(|e| DomainError::DatabaseError(format!("failed to write {}: {e}", self.path.display())))
    }
}

/// Audit logger for intake decisions
#[derive(Clone)]
pub struct AuditLogger {
    sink: JsonlFile,
}

impl AuditLogger {
    pub async fn new(log_path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            sink: JsonlFile::open(log_path.as_ref()).await?,
        })
    }
}

#[async_trait]
impl AuditLog for AuditLogger {
    async fn record(&self, entry: &AuditEntry) -> DomainResult<()> {
        self.sink.append(entry)?;

        info!(
            target_id = %entry.target_id,
            decision = entry.decision.as_str(),
            request_id = ?entry.decision.request_id(),
            severity = entry.severity,
            coalesced_count = ?entry.coalesced_count,
            "audit event"
        );
        Ok(())
    }
}

/// Notification channel appending every notification to a JSONL file.
#[derive(Clone)]
pub struct JsonlNotificationLog {
    sink: JsonlFile,
}

impl JsonlNotificationLog {
    pub async fn new(log_path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            sink: JsonlFile::open(log_path.as_ref()).await?,
        })
    }
}

#[async_trait]
impl NotificationChannel for JsonlNotificationLog {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn send(&self, notification: &Notification) -> DomainResult<()> {
        self.sink.append(notification)
    }
}
