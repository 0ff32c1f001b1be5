//! Primary Edge→Worker handoff channel (spec.md §4.2, §9).
//!
//! "Stream-oriented single-host IPC with server-side multi-acceptor and
//! client-side persistent connection" is implemented concretely over a Unix
//! domain socket: wire format is one UTF-8 JSON object per newline-terminated
//! line, no framing beyond `\n`.

use crate::record::TrackingRecord;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

/// Write timeout for a single IPC send attempt (spec.md §4.1 — "non-blocking,
/// bounded timeout 1s").
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Edge-side client: connects (lazily, reconnecting on failure) and writes
/// one JSON line per record.
pub struct IpcClient {
    socket_path: String,
    stream: tokio::sync::Mutex<Option<UnixStream>>,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            stream: tokio::sync::Mutex::new(None),
        }
    }

    /// Attempt to send one record. Never blocks past `WRITE_TIMEOUT`;
    /// the caller (`edge::forward::forward`) falls back to the spool on
    /// any error.
    pub async fn send(&self, record: &TrackingRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tokio::time::timeout(WRITE_TIMEOUT, self.send_inner(&line))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "ipc write timed out"))?
    }

    async fn send_inner(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            *guard = Some(UnixStream::connect(&self.socket_path).await?);
        }
        let stream = guard.as_mut().unwrap();
        if let Err(e) = write_line(stream, line).await {
            *guard = None;
            return Err(e);
        }
        Ok(())
    }
}

async fn write_line(stream: &mut UnixStream, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await
}

/// Worker-side: `acceptor_count` tasks (≥4 per spec.md §4.2) each `accept()`
/// on the same listener and stream parsed records into `tx`. Malformed lines
/// are logged and skipped, never fatal to the connection.
pub fn spawn_acceptors(
    socket_path: impl AsRef<Path>,
    acceptor_count: usize,
    tx: mpsc::Sender<TrackingRecord>,
) -> std::io::Result<()> {
    let path = socket_path.as_ref();
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)?;
    let listener = std::sync::Arc::new(listener);

    for acceptor_id in 0..acceptor_count.max(1) {
        let listener = listener.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let tx = tx.clone();
                        tokio::spawn(serve_connection(stream, tx));
                    }
                    Err(e) => {
                        tracing::warn!("ipc acceptor {acceptor_id} accept failed: {e}");
                    }
                }
            }
        });
    }
    Ok(())
}

/// FIFO within a single connection (spec.md §5); across connections, order
/// is undefined, matching spec.md's ordering guarantees.
async fn serve_connection(stream: UnixStream, tx: mpsc::Sender<TrackingRecord>) {
    let reader = BufReader::new(stream);
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TrackingRecord>(&line) {
                    Ok(record) => {
                        // Backpressure: `send` blocks when the enrichment
                        // channel is full (spec.md §4.3, §5).
                        if tx.send(record).await.is_err() {
                            tracing::warn!("ipc connection: enrichment channel closed, dropping");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("ipc connection: malformed record, skipping: {e}");
                    }
                }
            }
            Ok(None) => return,
            Err(e) => {
                tracing::warn!("ipc connection read error: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn client_roundtrips_a_record_to_the_worker_channel() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let (tx, mut rx) = mpsc::channel(16);
        spawn_acceptors(&socket_path, 2, tx).unwrap();
        // give the acceptor a moment to bind/listen
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = IpcClient::new(socket_path.to_string_lossy().to_string());
        let record = TrackingRecord::new(
            "42".into(),
            "1".into(),
            "1.2.3.4".into(),
            "ua".into(),
            "".into(),
            "/42/1_SMART.GIF".into(),
            "{}".into(),
            "sw=1920".into(),
        );
        client.send(&record).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for record")
            .expect("channel closed");
        assert_eq!(received.company_id, "42");
        assert_eq!(received.query_string, "sw=1920");
    }
}
