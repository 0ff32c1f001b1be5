//! Worker process (spec.md §4.3): merges intake, runs the 15-step pipeline
//! single-consumer, and hands enriched records to the bulk writer.

pub mod listener;
pub mod pipeline;
pub mod writer;

use crate::config::Config;
use crate::record::TrackingRecord;
use pipeline::state::PipelineState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Wire the enrichment channel → pipeline → writer channel → bulk writer
/// chain and start the intake listener. Returns the writer task's
/// `JoinHandle` so the binary can await it at shutdown.
pub async fn run(config: Arc<Config>, ch: clickhouse::Client) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let (enrichment_tx, enrichment_rx) = mpsc::channel::<TrackingRecord>(config.enrichment_channel_capacity);
    let (writer_tx, writer_rx) = mpsc::channel::<TrackingRecord>(config.writer_channel_capacity);

    let maxmind = std::env::var("TRACEPIXEL_GEOIP_DB")
        .ok()
        .and_then(|path| maxminddb::Reader::open_readfile(path).ok());
    let pipeline_state = Arc::new(PipelineState::new(config.geo_api_requests_per_minute, maxmind));
    PipelineState::spawn_geo_rate_limit_refill(pipeline_state.clone(), config.geo_api_requests_per_minute);
    spawn_sweepers(pipeline_state.clone());

    spawn_enrichment_consumer(pipeline_state, enrichment_rx, writer_tx);
    let writer_handle = writer::spawn(
        ch,
        writer_rx,
        1000,
        Duration::from_secs(2),
    );

    listener::start(&config, enrichment_tx).await?;
    Ok(writer_handle)
}

fn spawn_enrichment_consumer(
    state: Arc<PipelineState>,
    mut enrichment_rx: mpsc::Receiver<TrackingRecord>,
    writer_tx: mpsc::Sender<TrackingRecord>,
) {
    tokio::spawn(async move {
        while let Some(record) = enrichment_rx.recv().await {
            let enriched = pipeline::run_all(&state, record).await;
            // Non-blocking offer: a stalled store must not stall enrichment
            // (spec.md §4.3.2). The pre-enrichment copy already lives in the
            // spool, so a drop here is not a durability loss.
            if let Err(mpsc::error::TrySendError::Full(_)) = writer_tx.try_send(enriched) {
                tracing::warn!("worker: writer channel full, dropping enriched record");
            }
        }
        tracing::info!("worker: enrichment channel closed, consumer exiting");
    });
}

fn spawn_sweepers(state: Arc<PipelineState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            pipeline::session::prune_expired(&state);
            pipeline::cross_customer::prune_expired(&state);
        }
    });
}
