//! s3frame: typed tables from S3 Select query streams.
//!
//! Executes one SQL-like filter query against an object-storage file and
//! materializes the streamed, schema-less output as an Arrow
//! `RecordBatch`. Per-column types are inferred from the data, and
//! string columns holding consistent timestamps are promoted to time
//! columns. For bucketed series stored without a time axis, a synthetic
//! one is reconstructed from a single sampled origin.

pub mod client;
pub mod collect;
pub mod config;
pub mod error;
pub mod infer;
pub mod query;
pub mod temporal;
pub mod timeaxis;

pub use client::{EventStream, S3SelectClient, SelectApi, SelectEvent, SelectStats};
pub use config::SourceConfig;
pub use error::{Error, Result};
pub use query::{InputFormat, Operation, QueryDescriptor, SelectRequest};

use arrow::record_batch::RecordBatch;
use diagnostics::*;
use tokio_util::sync::CancellationToken;

/// Execute one select query end to end and return its typed table.
///
/// Compiles the descriptor, collects and materializes the data stream,
/// and promotes temporal string columns. When the descriptor declares a
/// time field with a positive bucket width and the result has rows, the
/// enrichment query runs afterwards and the reconstructed time axis is
/// appended. The two remote requests are issued sequentially, and
/// nothing is retried internally.
pub async fn run_select(
    client: &dyn SelectApi,
    config: &SourceConfig,
    descriptor: &QueryDescriptor,
    cancel: &CancellationToken,
) -> Result<RecordBatch> {
    let data_request = query::compile_data_request(config, descriptor)?;
    let key = data_request.key.as_str();
    info!("executing select against {key}", key: key);

    let payload = collect::collect_payload(client, &data_request, cancel).await?;
    let rows = infer::UntypedRowSet::parse(&payload)?;
    let batch = infer::materialize(&rows).await?;
    let batch = temporal::classify_time_columns(&batch)?;

    let row_count = batch.num_rows();
    info!(
        "select against {key} returned {rows} rows, {columns} columns",
        key: key,
        rows: row_count,
        columns: batch.num_columns()
    );

    if row_count > 0 {
        if let Some(time_request) = query::compile_time_request(config, descriptor) {
            return timeaxis::reconstruct(client, &time_request, descriptor, &batch, cancel).await;
        }
    }

    Ok(batch)
}
