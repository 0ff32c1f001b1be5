//! Durable fallback spool between Edge and Worker (spec.md §4.2, §6.3).
//!
//! Append-only JSONL files named `spool_{UTCtimestamp}.jsonl`, rotated on
//! process start, hour boundary, or size cap. Every write flushes the kernel
//! buffer before returning, per the durability contract of spec.md §5:
//! "a hit is durable once... the spool append returned from the kernel
//! flush". Processed files are renamed `.done`, never deleted.

use crate::errors::SpoolError;
use crate::record::TrackingRecord;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

pub struct SpoolWriter {
    directory: PathBuf,
    rotate_bytes: u64,
    inner: Mutex<WriterState>,
}

struct WriterState {
    file: File,
    path: PathBuf,
    bytes_written: u64,
    opened_hour: u32,
}

impl SpoolWriter {
    pub async fn open(directory: impl Into<PathBuf>, rotate_bytes: u64) -> std::io::Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory).await?;
        let (file, path) = new_spool_file(&directory).await?;
        Ok(Self {
            directory,
            rotate_bytes,
            inner: Mutex::new(WriterState {
                file,
                path,
                bytes_written: 0,
                opened_hour: Utc::now().format("%H").to_string().parse().unwrap_or(0),
            }),
        })
    }

    /// Append one record as a JSON line, flushing immediately. Rotates first
    /// if the size cap or an hour boundary has been crossed.
    pub async fn append(&self, record: &TrackingRecord) -> Result<(), SpoolError> {
        let line = serde_json::to_string(record)
            .map_err(|e| SpoolError::Malformed(e.to_string()))?;
        let mut state = self.inner.lock().await;

        let current_hour: u32 = Utc::now().format("%H").to_string().parse().unwrap_or(0);
        if current_hour != state.opened_hour || state.bytes_written >= self.rotate_bytes {
            let (file, path) = new_spool_file(&self.directory).await?;
            state.file = file;
            state.path = path;
            state.bytes_written = 0;
            state.opened_hour = current_hour;
        }

        state.file.write_all(line.as_bytes()).await?;
        state.file.write_all(b"\n").await?;
        state.file.flush().await?;
        state.file.sync_data().await?;
        state.bytes_written += line.len() as u64 + 1;
        Ok(())
    }
}

async fn new_spool_file(directory: &Path) -> std::io::Result<(File, PathBuf)> {
    let name = format!("spool_{}.jsonl", Utc::now().format("%Y%m%dT%H%M%S%.f"));
    let path = directory.join(name);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    Ok((file, path))
}

/// Replay every `*.jsonl` file in the spool directory, chronological by
/// filename then line order within file (spec.md §5). Malformed lines are
/// logged and skipped; the file is still renamed `.done` once fully read.
pub async fn replay_all(
    directory: impl AsRef<Path>,
    mut on_record: impl FnMut(TrackingRecord),
) -> Result<usize, SpoolError> {
    let directory = directory.as_ref();
    if !directory.exists() {
        return Ok(0);
    }
    let mut entries = Vec::new();
    let mut read_dir = fs::read_dir(directory).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            entries.push(path);
        }
    }
    entries.sort();

    let mut total = 0usize;
    for path in entries {
        total += replay_file(&path, &mut on_record).await?;
        let done_path = path.with_extension("jsonl.done");
        fs::rename(&path, &done_path).await?;
    }
    Ok(total)
}

async fn replay_file(
    path: &Path,
    on_record: &mut impl FnMut(TrackingRecord),
) -> Result<usize, SpoolError> {
    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut count = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TrackingRecord>(&line) {
            Ok(record) => {
                on_record(record);
                count += 1;
            }
            Err(e) => {
                tracing::warn!("spool: malformed line in {}: {e}", path.display());
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(q: &str) -> TrackingRecord {
        TrackingRecord::new(
            "42".into(),
            "1".into(),
            "1.2.3.4".into(),
            "ua".into(),
            "".into(),
            "/42/1_SMART.GIF".into(),
            "{}".into(),
            q.into(),
        )
    }

    #[tokio::test]
    async fn replay_is_a_no_op_on_an_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let count = replay_all(dir.path(), |_| {}).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn appended_records_survive_a_restart_style_replay() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SpoolWriter::open(dir.path(), 100 * 1024 * 1024).await.unwrap();
        for i in 0..5 {
            writer.append(&sample_record(&format!("n={i}"))).await.unwrap();
        }

        let mut replayed = Vec::new();
        let count = replay_all(dir.path(), |r| replayed.push(r)).await.unwrap();
        assert_eq!(count, 5);
        assert_eq!(replayed[0].query_string, "n=0");
        assert_eq!(replayed[4].query_string, "n=4");

        // processed files are renamed .done, never deleted
        let mut read_dir = fs::read_dir(dir.path()).await.unwrap();
        let mut saw_done = false;
        while let Some(entry) = read_dir.next_entry().await.unwrap() {
            if entry.path().to_string_lossy().ends_with(".jsonl.done") {
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool_bad.jsonl");
        tokio::fs::write(&path, b"not json\n{\"bad\":true}\n").await.unwrap();
        let mut replayed = Vec::new();
        let count = replay_all(dir.path(), |r| replayed.push(r)).await.unwrap();
        assert_eq!(count, 0);
    }
}
