//! Schema inference and column materialization.
//!
//! The select stream yields rows with no declared schema and no
//! integer/float distinction, so typing a column requires seeing every one
//! of its values in lexical form. The payload is first parsed into an
//! untyped row set, then round-tripped through delimited text: one side of
//! an async pipe writes CSV (header row carrying the original column
//! names) while the other side re-parses it through arrow-csv, whose
//! column-wide inference classifies each column as `Int64`, `Float64`, or
//! `Utf8`. Two streamed passes are made, one for inference over all rows
//! and one for decoding, so the serialized text is never held in full.

use crate::error::{Error, Result};
use arrow::record_batch::RecordBatch;
use arrow_csv::reader::{Decoder, Format};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use diagnostics::*;
use futures::StreamExt;
use futures::stream::Stream;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::io::SyncIoBridge;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Rows of column name to lexical cell value, parsed from one framed
/// payload. Column order is first appearance; absent and null cells are
/// not stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UntypedRowSet {
    columns: Vec<String>,
    rows: Vec<HashMap<String, String>>,
}

impl UntypedRowSet {
    /// Parse a framed JSON-array payload. Fails with
    /// [`Error::MalformedResult`] unless the payload is an array of
    /// objects.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::MalformedResult(e.to_string()))?;
        let Value::Array(items) = value else {
            return Err(Error::MalformedResult(
                "payload is not an array of rows".to_string(),
            ));
        };

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let Value::Object(cells) = item else {
                return Err(Error::MalformedResult(
                    "result row is not an object".to_string(),
                ));
            };
            let mut row = HashMap::with_capacity(cells.len());
            for (name, cell) in cells {
                if !columns.contains(&name) {
                    columns.push(name.clone());
                }
                if cell.is_null() {
                    continue;
                }
                row.insert(name, lexical(&cell));
            }
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell value at `row` for `column`, if present.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        self.rows.get(row)?.get(column).map(String::as_str)
    }
}

/// The lexical form of one cell. Numbers keep their wire spelling, so a
/// fractional marker like `3.0` survives into the sniffing pass; nested
/// values stay as JSON text.
fn lexical(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Materialize typed columns from an untyped row set.
///
/// Column kinds after this step are `Int64` (every value a whole number),
/// `Float64` (any fractional or mixed numeric), or `Utf8` (anything
/// else). Temporal reclassification happens later.
pub async fn materialize(rows: &UntypedRowSet) -> Result<RecordBatch> {
    if rows.columns.is_empty() {
        return Ok(RecordBatch::new_empty(Arc::new(Schema::empty())));
    }

    let schema = infer_column_types(rows).await?;
    debug!(
        "inferred {columns} columns over {rows} rows",
        columns: schema.fields().len(),
        rows: rows.row_count()
    );

    decode_rows(rows, schema).await
}

/// First pass: stream the row set as CSV through a pipe into arrow-csv's
/// schema inference, which scans every row. Types other than the numeric
/// pair collapse to `Utf8`; date detection is left to the temporal
/// classifier.
async fn infer_column_types(rows: &UntypedRowSet) -> Result<SchemaRef> {
    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);

    let bridge = SyncIoBridge::new(reader);
    let infer_task = tokio::task::spawn_blocking(move || {
        Format::default()
            .with_header(true)
            .infer_schema(bridge, None)
    });

    let (write_result, infer_result) = tokio::join!(
        async {
            let result = write_rows(&mut writer, rows).await;
            // Close our end even on failure so the reader sees EOF.
            let _ = writer.shutdown().await;
            result
        },
        infer_task,
    );
    write_result?;

    let (schema, _) = infer_result
        .map_err(|e| Error::MalformedResult(format!("inference task failed: {e}")))?
        .map_err(|e| Error::MalformedResult(e.to_string()))?;

    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|field| match field.data_type() {
            DataType::Int64 | DataType::Float64 => field.as_ref().clone(),
            _ => Field::new(field.name(), DataType::Utf8, true),
        })
        .collect();

    Ok(Arc::new(Schema::new(fields)))
}

/// Second pass: stream the same CSV text through arrow-csv's decoder
/// under the inferred schema.
async fn decode_rows(rows: &UntypedRowSet, schema: SchemaRef) -> Result<RecordBatch> {
    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);

    let decoder = arrow_csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build_decoder();

    let (write_result, decode_result) = tokio::join!(
        async {
            let result = write_rows(&mut writer, rows).await;
            let _ = writer.shutdown().await;
            result
        },
        async {
            let mut stream = std::pin::pin!(decode_stream(decoder, BufReader::new(reader)));
            let mut batches = Vec::new();
            while let Some(batch) = stream.next().await {
                batches.push(batch?);
            }
            Ok::<_, Error>(batches)
        },
    );
    write_result?;
    let batches = decode_result?;

    arrow::compute::concat_batches(&schema, &batches).map_err(Error::from)
}

/// Decode CSV text into record batches as it arrives, following the
/// arrow-csv async decoder pattern.
fn decode_stream<R: AsyncBufRead + Unpin + Send>(
    mut decoder: Decoder,
    mut reader: R,
) -> impl Stream<Item = Result<RecordBatch>> {
    futures::stream::poll_fn(move |cx| {
        loop {
            let buf = match futures::ready!(Pin::new(&mut reader).poll_fill_buf(cx)) {
                Ok(b) if b.is_empty() => break,
                Ok(b) => b,
                Err(e) => return Poll::Ready(Some(Err(Error::Io(e)))),
            };

            let decoded = match decoder.decode(buf) {
                Ok(decoded) => decoded,
                Err(e) => return Poll::Ready(Some(Err(Error::MalformedResult(e.to_string())))),
            };

            Pin::new(&mut reader).consume(decoded);

            if decoded == 0 || decoder.capacity() == 0 {
                break;
            }
        }

        match decoder.flush() {
            Ok(Some(batch)) => Poll::Ready(Some(Ok(batch))),
            Ok(None) => Poll::Ready(None),
            Err(e) => Poll::Ready(Some(Err(Error::MalformedResult(e.to_string())))),
        }
    })
}

/// Serialize the row set as CSV. The header row carries the original
/// column names so column identity survives the round-trip; missing cells
/// become empty fields.
async fn write_rows<W>(writer: &mut W, rows: &UntypedRowSet) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    for (i, name) in rows.columns.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        push_field(&mut line, name);
    }
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;

    for row in &rows.rows {
        line.clear();
        for (i, name) in rows.columns.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            if let Some(cell) = row.get(name) {
                push_field(&mut line, cell);
            }
        }
        // The reader skips fully blank lines; quote one empty field so
        // the row keeps its slot.
        if line.is_empty() {
            line.push_str("\"\"");
        }
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
    }

    Ok(())
}

fn push_field(line: &mut String, value: &str) {
    if value.contains(['"', ',', '\n', '\r']) {
        line.push('"');
        for ch in value.chars() {
            if ch == '"' {
                line.push('"');
            }
            line.push(ch);
        }
        line.push('"');
    } else {
        line.push_str(value);
    }
}
