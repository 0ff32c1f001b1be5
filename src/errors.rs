use thiserror::Error;

/// Failures from the `Forward` handoff (spec.md §4.1). Every variant is
/// non-fatal to the HTTP response — the Edge always returns the GIF.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("ipc write failed: {0}")]
    Ipc(#[source] std::io::Error),
    #[error("spool append failed: {0}")]
    Spool(#[source] std::io::Error),
    #[error("direct insert failed: {0}")]
    DirectInsert(#[source] clickhouse::error::Error),
}

/// A single enrichment step's failure. Caught at the step boundary; the
/// pipeline never aborts a record because of one.
#[derive(Debug, Error)]
pub enum EnrichmentStepError {
    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error("lookup failed: {0}")]
    Lookup(String),
    #[error("malformed input: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed spool line: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum BulkWriteError {
    #[error("transient store error: {0}")]
    Transient(#[source] clickhouse::error::Error),
    #[error("fatal store error (schema/permission): {0}")]
    Fatal(#[source] clickhouse::error::Error),
}

#[derive(Debug, Error)]
pub enum EtlError {
    #[error("store error: {0}")]
    Store(#[from] clickhouse::error::Error),
    #[error("watermark error: {0}")]
    Watermark(String),
}
