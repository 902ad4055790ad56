//! The remote query-service seam.
//!
//! [`SelectApi`] is the only surface the response pipeline sees: one call
//! that starts a select query and yields an event stream. The concrete
//! implementation speaks the S3 `SelectObjectContent` API through the AWS
//! SDK; tests substitute a scripted in-memory client.

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::query::{InputSerialization, SelectRequest};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::types::InputSerialization as S3InputSerialization;
use aws_sdk_s3::types::{
    CompressionType, CsvInput, ExpressionType, FileHeaderInfo, JsonInput, JsonOutput, JsonType,
    OutputSerialization, SelectObjectContentEventStream,
};
use bytes::Bytes;
use futures::stream::BoxStream;

/// Query cost telemetry reported by the service mid-stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectStats {
    pub bytes_scanned: i64,
    pub bytes_processed: i64,
    pub bytes_returned: i64,
}

/// One event observed on a select stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectEvent {
    /// A fragment of the result payload: well-formed JSON objects emitted
    /// back-to-back, each followed by the output record delimiter.
    Records(Bytes),
    /// Informational cost telemetry; never part of the result.
    Stats(SelectStats),
}

/// Stream of select events. Item errors mean the stream failed
/// mid-execution; dropping the stream releases the connection.
pub type EventStream = BoxStream<'static, Result<SelectEvent>>;

/// Remote query execution, abstracted for testing.
#[async_trait]
pub trait SelectApi: Send + Sync {
    /// Start a select query. Fails with [`Error::RemoteQueryUnreachable`]
    /// when the call cannot be initiated; stream items fail with
    /// [`Error::RemoteQueryFailed`].
    async fn select(&self, request: &SelectRequest) -> Result<EventStream>;
}

/// S3 `SelectObjectContent` client.
pub struct S3SelectClient {
    client: aws_sdk_s3::Client,
}

impl S3SelectClient {
    /// Build a client from per-call configuration. Static credentials are
    /// used when an access key is configured; otherwise the ambient
    /// provider chain applies.
    pub async fn connect(config: &SourceConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if !config.access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                config.access_key.clone(),
                config.secret_key.clone(),
                None,
                None,
                "s3frame",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }
    }

    fn build_input(request: &SelectRequest) -> S3InputSerialization {
        let mut builder = S3InputSerialization::builder().set_compression_type(
            request
                .compression
                .as_deref()
                .map(CompressionType::from),
        );

        match &request.input {
            InputSerialization::Csv(options) => {
                let csv = CsvInput::builder()
                    .allow_quoted_record_delimiter(options.allow_quoted_record_delimiter)
                    .set_file_header_info(
                        options.file_header_info.as_deref().map(FileHeaderInfo::from),
                    )
                    .set_comments(options.comments.clone())
                    .set_field_delimiter(options.field_delimiter.clone())
                    .set_quote_character(options.quote_character.clone())
                    .set_quote_escape_character(options.quote_escape_character.clone())
                    .set_record_delimiter(options.record_delimiter.clone())
                    .build();
                builder = builder.csv(csv);
            }
            InputSerialization::Json { record_type } => {
                let json = JsonInput::builder()
                    .set_type(record_type.as_deref().map(JsonType::from))
                    .build();
                builder = builder.json(json);
            }
            InputSerialization::Plain => {}
        }

        builder.build()
    }
}

#[async_trait]
impl SelectApi for S3SelectClient {
    async fn select(&self, request: &SelectRequest) -> Result<EventStream> {
        let output = OutputSerialization::builder()
            .json(
                JsonOutput::builder()
                    .record_delimiter(&request.output_record_delimiter)
                    .build(),
            )
            .build();

        let response = self
            .client
            .select_object_content()
            .bucket(&request.bucket)
            .key(&request.key)
            .expression(&request.expression)
            .expression_type(ExpressionType::Sql)
            .input_serialization(Self::build_input(request))
            .output_serialization(output)
            .send()
            .await
            .map_err(|e| Error::RemoteQueryUnreachable(e.to_string()))?;

        let stream = futures::stream::unfold(response.payload, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(Some(SelectObjectContentEventStream::Records(event))) => {
                        let payload = event
                            .payload
                            .map(|blob| Bytes::from(blob.into_inner()))
                            .unwrap_or_default();
                        return Some((Ok(SelectEvent::Records(payload)), receiver));
                    }
                    Ok(Some(SelectObjectContentEventStream::Stats(event))) => {
                        let stats = event
                            .details
                            .map(|details| SelectStats {
                                bytes_scanned: details.bytes_scanned.unwrap_or(0),
                                bytes_processed: details.bytes_processed.unwrap_or(0),
                                bytes_returned: details.bytes_returned.unwrap_or(0),
                            })
                            .unwrap_or_default();
                        return Some((Ok(SelectEvent::Stats(stats)), receiver));
                    }
                    // Progress, continuation, and end markers carry no data.
                    Ok(Some(_)) => continue,
                    Ok(None) => return None,
                    Err(e) => {
                        return Some((Err(Error::RemoteQueryFailed(e.to_string())), receiver));
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
