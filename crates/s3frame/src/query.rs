//! Inbound query descriptor and the parameter compiler.
//!
//! A descriptor arrives as JSON from the host, is classified once into an
//! [`Operation`] at the boundary, and for select queries is compiled into
//! one or two [`SelectRequest`]s: the data request (always) and the
//! time-enrichment request (only for JSON input with a time field and a
//! positive bucket width).

use crate::config::SourceConfig;
use crate::error::{Error, Result};
use serde::Deserialize;

/// Declared serialization of the stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum InputFormat {
    #[serde(rename = "CSV")]
    Csv,
    #[serde(rename = "JSON")]
    Json,
    /// No declared format; the object is queried as plain text.
    #[default]
    #[serde(other)]
    Plain,
}

/// One query as submitted by the host. Field names match the host's JSON
/// exactly; every field other than `path` and `query` is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryDescriptor {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub format: InputFormat,
    #[serde(default)]
    pub compression: String,
    #[serde(default)]
    pub query: String,

    #[serde(default)]
    pub csv_allow_quoted_record_delimiter: bool,
    #[serde(default)]
    pub csv_comments: String,
    #[serde(default)]
    pub csv_field_delimiter: String,
    #[serde(default)]
    pub csv_file_header_info: String,
    #[serde(default)]
    pub csv_quote_character: String,
    #[serde(default)]
    pub csv_quote_escape_character: String,
    #[serde(default)]
    pub csv_record_delimiter: String,

    #[serde(default)]
    pub json_type: String,
    #[serde(default)]
    pub json_time_field: String,
    #[serde(default)]
    pub json_time_month_first: bool,
    /// Bucket width between synthesized rows, in nanoseconds.
    #[serde(default)]
    pub json_time_bucket: i64,
}

/// The operation a descriptor asks for, decided once at the boundary from
/// the query text. Only [`Operation::Select`] is executed by this crate;
/// the other variants carry the fields their host-side behaviors need.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    List { path: String, formatted: bool },
    Upload { path: String },
    Delete { path: String },
    Select(QueryDescriptor),
}

impl Operation {
    /// Classify a descriptor by its query text.
    pub fn classify(descriptor: QueryDescriptor) -> Operation {
        let text = descriptor.query.as_str();
        if text.starts_with("LIST") {
            Operation::List {
                formatted: text.contains("FORMATTED"),
                path: descriptor.path,
            }
        } else if text.starts_with("UPLOAD") {
            Operation::Upload {
                path: descriptor.path,
            }
        } else if text.starts_with("DELETE") {
            Operation::Delete {
                path: descriptor.path,
            }
        } else {
            Operation::Select(descriptor)
        }
    }
}

/// CSV input options for a compiled request. `None` fields are not
/// transmitted; the quoted-record-delimiter flag always is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CsvInputOptions {
    pub allow_quoted_record_delimiter: bool,
    pub file_header_info: Option<String>,
    pub comments: Option<String>,
    pub field_delimiter: Option<String>,
    pub quote_character: Option<String>,
    pub quote_escape_character: Option<String>,
    pub record_delimiter: Option<String>,
}

/// Declared input serialization of a compiled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSerialization {
    Csv(CsvInputOptions),
    Json { record_type: Option<String> },
    Plain,
}

/// A compiled remote query request: stateless and read-only once built.
/// Output serialization is always record-delimited JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectRequest {
    pub bucket: String,
    pub key: String,
    pub expression: String,
    pub input: InputSerialization,
    pub compression: Option<String>,
    pub output_record_delimiter: String,
}

/// Delimiter between JSON records in the output stream. The collector
/// relies on this when framing the payload as an array.
pub const OUTPUT_RECORD_DELIMITER: &str = ",";

fn transmitted(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Compile the primary data request. Fails with [`Error::InvalidQuery`]
/// when the object path or the filter expression is missing, before any
/// remote call is made.
pub fn compile_data_request(
    config: &SourceConfig,
    descriptor: &QueryDescriptor,
) -> Result<SelectRequest> {
    if descriptor.path.is_empty() {
        return Err(Error::InvalidQuery("object path is required".to_string()));
    }
    if descriptor.query.is_empty() {
        return Err(Error::InvalidQuery(
            "filter expression is required".to_string(),
        ));
    }

    let input = match descriptor.format {
        InputFormat::Csv => InputSerialization::Csv(CsvInputOptions {
            allow_quoted_record_delimiter: descriptor.csv_allow_quoted_record_delimiter,
            file_header_info: transmitted(&descriptor.csv_file_header_info),
            comments: transmitted(&descriptor.csv_comments),
            field_delimiter: transmitted(&descriptor.csv_field_delimiter),
            quote_character: transmitted(&descriptor.csv_quote_character),
            quote_escape_character: transmitted(&descriptor.csv_quote_escape_character),
            record_delimiter: transmitted(&descriptor.csv_record_delimiter),
        }),
        InputFormat::Json => InputSerialization::Json {
            record_type: transmitted(&descriptor.json_type),
        },
        InputFormat::Plain => InputSerialization::Plain,
    };

    Ok(SelectRequest {
        bucket: config.bucket.clone(),
        key: descriptor.path.clone(),
        expression: descriptor.query.clone(),
        input,
        compression: transmitted(&descriptor.compression),
        output_record_delimiter: OUTPUT_RECORD_DELIMITER.to_string(),
    })
}

/// Compile the time-enrichment request, present only when the input is
/// JSON, a time-field expression is declared, and the bucket width is
/// positive.
pub fn compile_time_request(
    config: &SourceConfig,
    descriptor: &QueryDescriptor,
) -> Option<SelectRequest> {
    if descriptor.format != InputFormat::Json
        || descriptor.json_time_field.is_empty()
        || descriptor.json_time_bucket <= 0
    {
        return None;
    }

    Some(SelectRequest {
        bucket: config.bucket.clone(),
        key: descriptor.path.clone(),
        expression: descriptor.json_time_field.clone(),
        input: InputSerialization::Json {
            record_type: transmitted(&descriptor.json_type),
        },
        compression: transmitted(&descriptor.compression),
        output_record_delimiter: OUTPUT_RECORD_DELIMITER.to_string(),
    })
}
