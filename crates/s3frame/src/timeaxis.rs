//! Time-axis reconstruction for bucketed series stored without a per-row
//! timestamp column.
//!
//! The enrichment query samples one value, the origin of the axis, and
//! the caller supplies the bucket width, so the full axis is `base +
//! i * bucket` for every row of the primary table. This avoids scanning
//! the object a second time for per-row timestamps.

use crate::client::SelectApi;
use crate::collect::collect_payload;
use crate::error::{Error, Result};
use crate::infer::UntypedRowSet;
use crate::query::{QueryDescriptor, SelectRequest};
use crate::temporal;
use arrow::array::{ArrayRef, TimestampNanosecondArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{Field, Schema};
use diagnostics::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Name given to the synthesized column when the service reports only a
/// positional placeholder.
const TIME_COLUMN_LABEL: &str = "time";

/// Execute the enrichment request and append a synthetic, uniformly
/// spaced time column to `batch`.
///
/// Fails with [`Error::TimeFieldUnavailable`] when the enrichment query
/// returns no rows. The appended column always has exactly as many values
/// as the primary table has rows.
pub async fn reconstruct(
    client: &dyn SelectApi,
    request: &SelectRequest,
    descriptor: &QueryDescriptor,
    batch: &RecordBatch,
    cancel: &CancellationToken,
) -> Result<RecordBatch> {
    let payload = collect_payload(client, request, cancel).await?;
    let rows = UntypedRowSet::parse(&payload)?;
    if rows.is_empty() {
        return Err(Error::TimeFieldUnavailable);
    }

    let source_column = rows
        .columns()
        .first()
        .cloned()
        .ok_or(Error::TimeFieldUnavailable)?;
    let base_text = rows.cell(0, &source_column).unwrap_or_default();
    let base = temporal::parse_single(base_text, descriptor.json_time_month_first)
        .ok_or_else(|| {
            Error::MalformedResult(format!("unparseable base timestamp: {base_text:?}"))
        })?;
    let base_nanos = base
        .timestamp_nanos_opt()
        .ok_or_else(|| Error::MalformedResult("base timestamp out of range".to_string()))?;

    let bucket = descriptor.json_time_bucket;
    let row_count = batch.num_rows();
    debug!(
        "reconstructing {rows} timestamps from base {base} step {step}ns",
        rows: row_count,
        base: base_text,
        step: bucket
    );

    let mut axis = Vec::with_capacity(row_count);
    for i in 0..row_count {
        let offset = bucket.checked_mul(i as i64).and_then(|o| base_nanos.checked_add(o));
        let nanos = offset.ok_or_else(|| {
            Error::MalformedResult("synthesized timestamp out of range".to_string())
        })?;
        axis.push(nanos);
    }

    let name = if source_column == "_1" {
        TIME_COLUMN_LABEL.to_string()
    } else {
        source_column
    };

    append_column(
        batch,
        Field::new(&name, temporal::time_data_type(), false),
        Arc::new(TimestampNanosecondArray::from(axis).with_timezone("UTC")),
    )
}

/// Append one column; fails unless its length matches the batch exactly.
fn append_column(batch: &RecordBatch, field: Field, column: ArrayRef) -> Result<RecordBatch> {
    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns = batch.columns().to_vec();
    fields.push(field);
    columns.push(column);

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{EventStream, SelectEvent};
    use crate::query::{InputFormat, InputSerialization};
    use arrow::array::Int64Array;
    use arrow_schema::DataType;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::DateTime;

    struct OneShot {
        fragment: Option<&'static str>,
    }

    #[async_trait]
    impl SelectApi for OneShot {
        async fn select(&self, _request: &SelectRequest) -> Result<EventStream> {
            let events: Vec<Result<SelectEvent>> = self
                .fragment
                .iter()
                .map(|f| Ok(SelectEvent::Records(Bytes::from_static(f.as_bytes()))))
                .collect();
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn time_request() -> SelectRequest {
        SelectRequest {
            bucket: "b".to_string(),
            key: "k.json".to_string(),
            expression: "SELECT s.time FROM S3Object s LIMIT 1".to_string(),
            input: InputSerialization::Json { record_type: None },
            compression: None,
            output_record_delimiter: ",".to_string(),
        }
    }

    fn descriptor(bucket_ns: i64) -> QueryDescriptor {
        QueryDescriptor {
            path: "k.json".to_string(),
            format: InputFormat::Json,
            query: "SELECT * FROM S3Object".to_string(),
            json_time_field: "SELECT s.time FROM S3Object s LIMIT 1".to_string(),
            json_time_bucket: bucket_ns,
            ..Default::default()
        }
    }

    fn three_row_batch() -> RecordBatch {
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)])),
            vec![Arc::new(Int64Array::from(vec![10, 20, 30])) as ArrayRef],
        )
        .unwrap()
    }

    fn nanos(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap()
    }

    #[tokio::test]
    async fn appends_uniform_axis_from_sampled_base() {
        let client = OneShot {
            fragment: Some(r#"{"_1":"2021-01-01T00:00:00Z"},"#),
        };
        let enriched = reconstruct(
            &client,
            &time_request(),
            &descriptor(1_000_000_000),
            &three_row_batch(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(enriched.num_columns(), 2);
        assert_eq!(enriched.schema().field(1).name(), "time");

        let axis = enriched
            .column(1)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        assert_eq!(axis.value(0), nanos("2021-01-01T00:00:00Z"));
        assert_eq!(axis.value(1), nanos("2021-01-01T00:00:01Z"));
        assert_eq!(axis.value(2), nanos("2021-01-01T00:00:02Z"));
    }

    #[tokio::test]
    async fn named_source_column_keeps_its_name() {
        let client = OneShot {
            fragment: Some(r#"{"ts":"2021-01-01T00:00:00Z"},"#),
        };
        let enriched = reconstruct(
            &client,
            &time_request(),
            &descriptor(1_000_000_000),
            &three_row_batch(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(enriched.schema().field(1).name(), "ts");
    }

    #[tokio::test]
    async fn empty_enrichment_result_is_time_field_unavailable() {
        let client = OneShot { fragment: None };
        let result = reconstruct(
            &client,
            &time_request(),
            &descriptor(1_000_000_000),
            &three_row_batch(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::TimeFieldUnavailable)));
    }

    #[tokio::test]
    async fn unparseable_base_is_malformed_result() {
        let client = OneShot {
            fragment: Some(r#"{"_1":"garbage"},"#),
        };
        let result = reconstruct(
            &client,
            &time_request(),
            &descriptor(1_000_000_000),
            &three_row_batch(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(Error::MalformedResult(_))));
    }
}
