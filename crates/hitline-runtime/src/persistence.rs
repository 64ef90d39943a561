//! JSON-lines summary store: one finished session per line, append-only.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hitline_core::types::SessionSummary;
use hitline_session::{Ack, PersistError, Persistence};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct JsonlPersistence {
    path: PathBuf,
    /// Serializes appends from concurrent persist tasks.
    write: Mutex<()>,
}

impl JsonlPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Persistence for JsonlPersistence {
    async fn save_session_summary(&self, summary: &SessionSummary) -> Result<Ack, PersistError> {
        let mut line = serde_json::to_string(summary)
            .map_err(|e| PersistError::Serialize(e.to_string()))?;
        line.push('\n');

        let _guard = self.write.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistError::Io(format!("{}: {e}", parent.display())))?;
        }
        let path = self.path.display();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PersistError::Io(format!("{path}: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PersistError::Io(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| PersistError::Io(e.to_string()))?;

        tracing::debug!(
            session_id = %summary.session_id,
            path = %path,
            "summary appended"
        );
        Ok(Ack::new(path.to_string()))
    }
}

/// Read every stored summary. A missing file is an empty history; a
/// malformed line is an error.
pub async fn read_summaries(path: &Path) -> Result<Vec<SessionSummary>, PersistError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PersistError::Io(format!("{}: {e}", path.display()))),
    };
    let shown = path.display();
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            let at = i + 1;
            serde_json::from_str(line)
                .map_err(|e| PersistError::Serialize(format!("{shown}:{at}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};
    use hitline_core::types::{EndReason, GoalMap};

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
            + TimeDelta::seconds(secs)
    }

    fn summary(id: &str, total_hits: u64) -> SessionSummary {
        SessionSummary {
            session_id: id.to_string(),
            targets: Vec::new(),
            total_hits,
            per_device_stats: Vec::new(),
            splits: Vec::new(),
            transitions: Vec::new(),
            transition_stats: Vec::new(),
            goals: GoalMap::new(),
            stopped_devices: Vec::new(),
            score: 0.0,
            accuracy: None,
            started_at: ts(0),
            ended_at: ts(30),
            duration_seconds: 30.0,
            is_valid: true,
            end_reason: EndReason::Duration,
        }
    }

    #[tokio::test]
    async fn appends_one_line_per_summary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("sessions.jsonl");
        let store = JsonlPersistence::new(&path);

        let first = summary("session-a", 4);
        let second = summary("session-b", 7);
        store.save_session_summary(&first).await.expect("save a");
        store.save_session_summary(&second).await.expect("save b");

        let text = std::fs::read_to_string(&path).expect("file written");
        assert_eq!(text.lines().count(), 2);

        let stored = read_summaries(store.path()).await.expect("read back");
        let ids: Vec<&str> = stored.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["session-a", "session-b"]);
        assert_eq!(stored[1].total_hits, 7);
        assert_eq!(stored[1].end_reason, EndReason::Duration);
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let absent = dir.path().join("absent.jsonl");
        let stored = read_summaries(&absent).await.expect("read");
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn malformed_line_is_reported_with_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sessions.jsonl");
        std::fs::write(&path, "{\"not\":\"a summary\"}\n").expect("seed file");

        let err = read_summaries(&path).await.expect_err("malformed");
        match err {
            PersistError::Serialize(msg) => assert!(msg.contains(":1:"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unwritable_path_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A directory cannot be opened for appending.
        let store = JsonlPersistence::new(dir.path());
        let doomed = summary("session-x", 1);
        let err = store.save_session_summary(&doomed).await.expect_err("io");
        assert!(matches!(err, PersistError::Io(_)));
    }
}
