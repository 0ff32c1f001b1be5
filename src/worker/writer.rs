//! Bulk writer (spec.md §4.3.2): drains the writer channel, batches by size
//! or time, and issues one batched insert per flush. Retry shape mirrors
//! `usage_tracker::usage_writer`'s `tokio::select!` between channel receipt
//! and an interval tick, plus an explicit transient/fatal split on the
//! store error the teacher's handlers don't need but a background writer
//! does.

use crate::errors::BulkWriteError;
use crate::record::TrackingRecord;
use clickhouse::Client;
use std::time::Duration;
use tokio::sync::mpsc;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub fn spawn(
    ch: Client,
    rx: mpsc::Receiver<TrackingRecord>,
    batch_size: usize,
    time_threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(ch, rx, batch_size, time_threshold))
}

async fn run(
    ch: Client,
    mut rx: mpsc::Receiver<TrackingRecord>,
    batch_size: usize,
    time_threshold: Duration,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(time_threshold);
    ticker.tick().await; // first tick fires immediately; discard it

    loop {
        tokio::select! {
            maybe_record = rx.recv() => {
                match maybe_record {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= batch_size {
                            flush(&ch, &mut batch).await;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            flush(&ch, &mut batch).await;
                        }
                        tracing::info!("bulk writer: channel closed, exiting");
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    flush(&ch, &mut batch).await;
                }
            }
        }
    }
}

async fn flush(ch: &Client, batch: &mut Vec<TrackingRecord>) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match write_batch(ch, batch).await {
            Ok(()) => {
                batch.clear();
                return;
            }
            Err(BulkWriteError::Transient(e)) => {
                tracing::warn!("bulk writer: transient store error, retrying in {backoff:?}: {e}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(BulkWriteError::Fatal(e)) => {
                tracing::error!(
                    "bulk writer: fatal store error, dropping batch of {}: {e}",
                    batch.len()
                );
                batch.clear();
                return;
            }
        }
    }
}

async fn write_batch(ch: &Client, batch: &[TrackingRecord]) -> Result<(), BulkWriteError> {
    let first_id = crate::store::reserve_raw_ids(ch, batch.len() as u64)
        .await
        .map_err(|e| classify(anyhow_to_clickhouse(e)))?;
    let rows: Vec<(u64, TrackingRecord)> = batch
        .iter()
        .enumerate()
        .map(|(i, r)| (first_id + i as u64, r.clone()))
        .collect();
    crate::store::insert_raw_batch(ch, &rows)
        .await
        .map_err(|e| classify(anyhow_to_clickhouse(e)))
}

fn anyhow_to_clickhouse(e: anyhow::Error) -> clickhouse::error::Error {
    match e.downcast::<clickhouse::error::Error>() {
        Ok(ch_err) => ch_err,
        Err(other) => clickhouse::error::Error::Custom(other.to_string()),
    }
}

/// Network-layer failures are treated as transient (spec.md §4.3.2:
/// "connection, deadlock"); anything else (schema mismatch, auth, malformed
/// query) is treated as fatal to the batch.
fn classify(e: clickhouse::error::Error) -> BulkWriteError {
    match &e {
        clickhouse::error::Error::Network(_) => BulkWriteError::Transient(e),
        _ => BulkWriteError::Fatal(e),
    }
}
