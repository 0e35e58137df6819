// Pipeline ingestion: source payloads, retry and pacing, raw snapshots and the ingestion log

pub mod batch;
pub mod ingest_log;
pub mod payloads;
pub mod rate_limiter;
pub mod raw_ingestor;
pub mod retry;
pub mod snapshot_store;
