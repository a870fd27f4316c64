//! Append-only transcript log for one session.

use std::path::Path;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// File name of a trial's transcript inside its trial directory.
pub const TRANSCRIPT_FILE: &str = "transcript.jsonl";

/// Writes raw engine records to disk, one per line, in arrival order.
pub struct TranscriptWriter {
    file: File,
    records: usize,
}

impl TranscriptWriter {
    /// Creates (or truncates) the transcript at `path`.
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        Ok(Self {
            file,
            records: 0,
        })
    }

    /// Appends one record verbatim.
    pub async fn append(&mut self, raw: &str) -> std::io::Result<()> {
        self.file.write_all(raw.trim_end_matches(['\r', '\n']).as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.records += 1;
        Ok(())
    }

    /// Flushes buffered data and syncs the file.
    pub async fn finish(mut self) -> std::io::Result<usize> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.records)
    }
}
