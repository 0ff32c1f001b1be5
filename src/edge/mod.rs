pub mod classify;
pub mod datacenter;
pub mod fingerprint_stability;
pub mod forward;
pub mod server;
pub mod velocity;

use crate::config::Config;
use crate::ipc::IpcClient;
use crate::spool::SpoolWriter;
use classify::ReservedRanges;
use datacenter::DatacenterTrie;
use fingerprint_stability::FingerprintStabilityTracker;
use std::sync::Arc;
use velocity::VelocityTracker;

/// Shared state behind every Edge HTTP handler (spec.md §4.1). Cloned
/// cheaply per-request via axum's `State` extractor (everything is an `Arc`
/// or `Arc`-like atomic handle).
#[derive(Clone)]
pub struct EdgeState {
    pub reserved_ranges: Arc<ReservedRanges>,
    pub datacenter_trie: Arc<DatacenterTrie>,
    pub fingerprint_stability: Arc<FingerprintStabilityTracker>,
    pub velocity: Arc<VelocityTracker>,
    pub ipc: Arc<IpcClient>,
    pub spool: Arc<SpoolWriter>,
    pub ch: clickhouse::Client,
    pub config: Arc<Config>,
}

impl EdgeState {
    pub async fn new(config: Config, ch: clickhouse::Client) -> anyhow::Result<Self> {
        let spool = SpoolWriter::open(&config.spool_directory, config.spool_rotate_bytes).await?;
        Ok(Self {
            reserved_ranges: Arc::new(ReservedRanges::default()),
            datacenter_trie: Arc::new(DatacenterTrie::empty()),
            fingerprint_stability: Arc::new(FingerprintStabilityTracker::new()),
            velocity: Arc::new(VelocityTracker::new()),
            ipc: Arc::new(IpcClient::new(config.ipc_socket_path.clone())),
            spool: Arc::new(spool),
            ch,
            config: Arc::new(config),
        })
    }
}
