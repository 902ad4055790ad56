//! Streaming event collector.
//!
//! Drives one select request to completion and frames the streamed record
//! fragments as a single syntactically valid JSON array. The service emits
//! bare JSON objects back-to-back, each followed by the output record
//! delimiter; the collector prepends `[` and replaces the final trailing
//! delimiter with `]`.

use crate::client::{SelectApi, SelectEvent};
use crate::error::{Error, Result};
use crate::query::SelectRequest;
use bytes::{BufMut, Bytes, BytesMut};
use diagnostics::*;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

/// Fixed operation tag for cost telemetry.
const TELEMETRY_TAG: &str = "S3Select";

/// Execute `request` and accumulate its record events into a framed JSON
/// array payload. An empty result yields `[]`.
///
/// The event stream is dropped, and thereby released, on every exit path.
/// Cancellation surfaces as [`Error::Cancelled`], never as a malformed
/// result.
pub async fn collect_payload(
    client: &dyn SelectApi,
    request: &SelectRequest,
    cancel: &CancellationToken,
) -> Result<Bytes> {
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        started = client.select(request) => started?,
    };

    let key = request.key.as_str();
    debug!("select stream opened for {key}", key: key);

    let mut payload = BytesMut::new();
    payload.put_u8(b'[');

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            event = stream.next() => event,
        };

        match event {
            Some(Ok(SelectEvent::Records(bytes))) => payload.extend_from_slice(&bytes),
            Some(Ok(SelectEvent::Stats(stats))) => {
                // Informational only; forwarded to the log, never the caller.
                info!(
                    "{tag} stats: scanned {scanned}, processed {processed}, returned {returned}",
                    tag: TELEMETRY_TAG,
                    scanned: stats.bytes_scanned,
                    processed: stats.bytes_processed,
                    returned: stats.bytes_returned
                );
            }
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }

    if payload.last() == Some(&b',') {
        let last = payload.len() - 1;
        payload[last] = b']';
    } else {
        payload.put_u8(b']');
    }

    debug!(
        "select stream for {key} complete, {payload_len} payload bytes",
        key: key,
        payload_len: payload.len()
    );

    Ok(payload.freeze())
}
