//! Call record sinks
//!
//! [`JsonlRecorder`] appends one JSON line per finished call to
//! `calls.jsonl`. Appends are serialized through a mutex so concurrent
//! sessions never interleave partial lines. [`LogFinalizer`] is selected
//! with `recording.sink = "log"`.

use anyhow::{Result, Context};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use super::{CallRecord, Finalizer};
use crate::types::render_transcript;

const RECORD_FILE: &str = "calls.jsonl";

pub struct JsonlRecorder {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRecorder {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir, write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }
}

#[async_trait]
impl Finalizer for JsonlRecorder {
    async fn finalize(&self, record: CallRecord) -> Result<()> {
        let mut line = serde_json::to_string(&record).context("Failed to serialize call record")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create transcript directory")?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path())
            .await
            .context("Failed to open call record file")?;
        file.write_all(line.as_bytes()).await.context("Failed to write call record")?;
        file.flush().await?;

        info!("Recorded call {} ({} transcript lines)", record.call_id, record.transcript.len());
        Ok(())
    }
}

/// Writes the transcript to the log only
pub struct LogFinalizer;

#[async_trait]
impl Finalizer for LogFinalizer {
    async fn finalize(&self, record: CallRecord) -> Result<()> {
        info!(
            "Call {} ended ({:?}) after {} interactions:\n{}",
            record.call_id,
            record.close_reason,
            record.interactions,
            render_transcript(&record.transcript)
        );
        Ok(())
    }
}
