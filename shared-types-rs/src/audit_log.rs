// shared-types-rs/src/audit_log.rs
// File-backed `agent_logs` audit trail.
//
// Implementation notes:
// - Append-only NDJSON file on disk (one AuditEntry per line).
// - Appends are serialized through a mutex so concurrent writers never
//   interleave partial lines.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::model::AuditEntry;
use crate::repository::{AuditLog, StoreResult};

pub struct FileAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileAuditLog {
    /// Create an audit log at `path`, creating the parent directory eagerly
    /// so a bad path fails at startup instead of on the first append.
    pub fn new(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    /// Path from AGENT_AUDIT_LOG_PATH or `data/agent-logs/agent_logs.ndjson`.
    pub fn new_default() -> StoreResult<Self> {
        let path = std::env::var("AGENT_AUDIT_LOG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data/agent-logs/agent_logs.ndjson"));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> StoreResult<Vec<AuditEntry>> {
        let buf = match fs::read_to_string(self.path()).await {
            Ok(buf) => buf,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut out = Vec::new();
        for line in buf.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => out.push(entry),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to parse audit log line; skipping");
                }
            }
        }

        Ok(out)
    }
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn append(&self, entry: AuditEntry) -> StoreResult<()> {
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn entries_for(&self, agent_id: &str) -> StoreResult<Vec<AuditEntry>> {
        let all = self.read_all().await?;
        Ok(all.into_iter().filter(|e| e.agent_id == agent_id).collect())
    }
}
