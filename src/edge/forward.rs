//! `Forward(record)` (spec.md §4.1): never blocks the HTTP response past its
//! own tier's bound. Success on any tier counts as acknowledged receipt.

use super::EdgeState;
use crate::record::TrackingRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardTier {
    Ipc,
    Spool,
    DirectInsert,
}

pub async fn forward(state: &EdgeState, record: &TrackingRecord) -> ForwardTier {
    if let Err(e) = state.ipc.send(record).await {
        tracing::warn!("forward: ipc failed, falling back to spool: {e}");
    } else {
        return ForwardTier::Ipc;
    }

    if let Err(e) = state.spool.append(record).await {
        tracing::error!("forward: spool failed, falling back to direct insert: {e}");
    } else {
        return ForwardTier::Spool;
    }

    // Last resort: insert straight into Raw, unenriched. This still
    // satisfies the at-least-once contract (spec.md §5) since a Raw row now
    // exists even though the worker's enrichment channel never saw it.
    if let Err(e) = direct_insert(state, record).await {
        tracing::error!("forward: direct insert also failed, hit may be lost: {e}");
    }
    ForwardTier::DirectInsert
}

async fn direct_insert(state: &EdgeState, record: &TrackingRecord) -> anyhow::Result<()> {
    let id = crate::store::reserve_raw_ids(&state.ch, 1).await?;
    crate::store::insert_raw_batch(&state.ch, &[(id, record.clone())]).await
}
