//! Temporal column classification.
//!
//! String columns frequently carry timestamps in an undeclared layout, and
//! the input gives no locale, so `01-02-2021` is ambiguous between
//! day-first and month-first. A column is reclassified as a time column
//! only when every non-empty value parses under one single layout within
//! one hypothesis: day-before-month is tried first, and month-before-day
//! only if that fails. Anything inconsistent stays text, and a column
//! that fails to classify never raises an error.

use crate::error::Result;
use arrow::array::{Array, ArrayRef, StringArray, TimestampNanosecondArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use diagnostics::*;
use std::sync::Arc;

/// One recognized date/time layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// RFC 3339 with an explicit offset, e.g. `2021-01-01T00:00:00Z`.
    Rfc3339,
    /// A chrono format string yielding a naive datetime, taken as UTC.
    DateTime(&'static str),
    /// A chrono format string yielding a date, taken as midnight UTC.
    Date(&'static str),
}

/// Layouts whose meaning does not depend on day/month order.
const COMMON_LAYOUTS: &[Layout] = &[
    Layout::Rfc3339,
    Layout::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
    Layout::DateTime("%Y-%m-%d %H:%M:%S%.f"),
    Layout::DateTime("%Y-%m-%d %H:%M"),
    Layout::Date("%Y-%m-%d"),
    Layout::DateTime("%Y/%m/%d %H:%M:%S"),
    Layout::Date("%Y/%m/%d"),
];

/// Day-before-month layouts.
const DAY_FIRST_LAYOUTS: &[Layout] = &[
    Layout::DateTime("%d-%m-%Y %H:%M:%S"),
    Layout::Date("%d-%m-%Y"),
    Layout::DateTime("%d/%m/%Y %H:%M:%S"),
    Layout::Date("%d/%m/%Y"),
    Layout::Date("%d.%m.%Y"),
];

/// Month-before-day layouts.
const MONTH_FIRST_LAYOUTS: &[Layout] = &[
    Layout::DateTime("%m-%d-%Y %H:%M:%S"),
    Layout::Date("%m-%d-%Y"),
    Layout::DateTime("%m/%d/%Y %H:%M:%S"),
    Layout::Date("%m/%d/%Y"),
    Layout::Date("%m.%d.%Y"),
];

fn parse_layout(value: &str, layout: Layout) -> Option<DateTime<Utc>> {
    match layout {
        Layout::Rfc3339 => DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Layout::DateTime(format) => NaiveDateTime::parse_from_str(value, format)
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive)),
        Layout::Date(format) => NaiveDate::parse_from_str(value, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive)),
    }
}

/// First layout under `month_first` that parses `value`.
fn detect_layout(value: &str, month_first: bool) -> Option<Layout> {
    let ordered = if month_first {
        MONTH_FIRST_LAYOUTS
    } else {
        DAY_FIRST_LAYOUTS
    };
    COMMON_LAYOUTS
        .iter()
        .chain(ordered.iter())
        .copied()
        .find(|&layout| parse_layout(value, layout).is_some())
}

/// Infer the single layout shared by every non-empty value under one
/// hypothesis. `None` when any value fails to parse, when values disagree
/// on the layout, or when there are no non-empty values.
fn guess_layout<'a>(
    values: impl Iterator<Item = Option<&'a str>>,
    month_first: bool,
) -> Option<Layout> {
    let mut layout = None;
    for value in values.flatten() {
        if value.is_empty() {
            continue;
        }
        let found = detect_layout(value, month_first)?;
        match layout {
            None => layout = Some(found),
            Some(existing) if existing == found => {}
            Some(_) => return None,
        }
    }
    layout
}

/// Parse one sampled timestamp, preferring the hypothesis named by
/// `month_first` and falling back to the other.
pub fn parse_single(value: &str, month_first: bool) -> Option<DateTime<Utc>> {
    detect_layout(value, month_first)
        .or_else(|| detect_layout(value, !month_first))
        .and_then(|layout| parse_layout(value, layout))
}

/// Timestamp array type used for every time column: nanoseconds, UTC.
pub fn time_data_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, Some("UTC".into()))
}

/// Reclassify string columns that hold consistently formatted timestamps.
///
/// Day-before-month is attempted first; month-before-day only when the
/// first hypothesis fails. Columns that classify are reparsed into
/// nanosecond timestamps with one output slot per input cell, empty cells
/// becoming nulls. Everything else passes through untouched.
pub fn classify_time_columns(batch: &RecordBatch) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());

    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        let replaced = if field.data_type() == &DataType::Utf8 {
            column
                .as_any()
                .downcast_ref::<StringArray>()
                .and_then(classify_column)
        } else {
            None
        };

        match replaced {
            Some(times) => {
                debug!("column {name} reclassified as time", name: field.name().as_str());
                fields.push(Field::new(field.name(), time_data_type(), true));
                columns.push(Arc::new(times));
            }
            None => {
                fields.push(field.as_ref().clone());
                columns.push(Arc::clone(column));
            }
        }
    }

    if columns.is_empty() {
        return Ok(batch.clone());
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(Into::into)
}

/// Parse a whole string column under the accepted hypothesis, or `None`
/// when it does not classify. Nanosecond overflow also declines the
/// column rather than failing the query.
fn classify_column(values: &StringArray) -> Option<TimestampNanosecondArray> {
    let layout = guess_layout(values.iter(), false)
        .or_else(|| guess_layout(values.iter(), true))?;

    let mut parsed: Vec<Option<i64>> = Vec::with_capacity(values.len());
    for value in values.iter() {
        match value {
            None | Some("") => parsed.push(None),
            Some(text) => {
                let time = parse_layout(text, layout)?;
                parsed.push(Some(time.timestamp_nanos_opt()?));
            }
        }
    }

    Some(TimestampNanosecondArray::from(parsed).with_timezone("UTC"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array};

    fn string_batch(name: &str, values: &[Option<&str>]) -> RecordBatch {
        let array = StringArray::from(values.to_vec());
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new(name, DataType::Utf8, true)])),
            vec![Arc::new(array)],
        )
        .unwrap()
    }

    fn nanos(rfc3339: &str) -> i64 {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap()
    }

    #[test]
    fn consistent_iso_dates_become_time() {
        let batch = string_batch("ts", &[Some("2021-01-02"), Some("2021-03-04")]);
        let classified = classify_time_columns(&batch).unwrap();
        assert_eq!(classified.schema().field(0).data_type(), &time_data_type());

        let times = classified
            .column(0)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        assert_eq!(times.value(0), nanos("2021-01-02T00:00:00Z"));
    }

    #[test]
    fn invalid_under_both_hypotheses_stays_string() {
        // The second value has month 13, invalid either way.
        let batch = string_batch("ts", &[Some("2021-01-02"), Some("2021-13-02")]);
        let classified = classify_time_columns(&batch).unwrap();
        assert_eq!(classified.schema().field(0).data_type(), &DataType::Utf8);
    }

    #[test]
    fn ambiguous_dates_resolve_under_day_first_hypothesis() {
        let batch = string_batch("ts", &[Some("01-02-2021"), Some("03-04-2021")]);
        let classified = classify_time_columns(&batch).unwrap();
        assert_eq!(classified.schema().field(0).data_type(), &time_data_type());

        let times = classified
            .column(0)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        // Day-first wins: 01-02-2021 is the 1st of February.
        assert_eq!(times.value(0), nanos("2021-02-01T00:00:00Z"));
        assert_eq!(times.value(1), nanos("2021-04-03T00:00:00Z"));
    }

    #[test]
    fn month_first_hypothesis_used_only_when_day_first_fails() {
        // 02-13-2021 forces month-first; then both values must agree.
        let batch = string_batch("ts", &[Some("02-13-2021"), Some("03-04-2021")]);
        let classified = classify_time_columns(&batch).unwrap();
        assert_eq!(classified.schema().field(0).data_type(), &time_data_type());

        let times = classified
            .column(0)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        assert_eq!(times.value(0), nanos("2021-02-13T00:00:00Z"));
        assert_eq!(times.value(1), nanos("2021-03-04T00:00:00Z"));
    }

    #[test]
    fn mixed_layouts_stay_string() {
        let batch = string_batch("ts", &[Some("2021-01-02"), Some("2021/01/03")]);
        let classified = classify_time_columns(&batch).unwrap();
        assert_eq!(classified.schema().field(0).data_type(), &DataType::Utf8);
    }

    #[test]
    fn empty_cells_become_nulls_without_extra_slots() {
        let batch = string_batch(
            "ts",
            &[Some("2021-01-02"), Some(""), None, Some("2021-01-05")],
        );
        let classified = classify_time_columns(&batch).unwrap();
        assert_eq!(classified.num_rows(), 4);

        let times = classified
            .column(0)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        assert!(times.is_null(1));
        assert!(times.is_null(2));
        assert!(!times.is_null(3));
    }

    #[test]
    fn all_empty_column_stays_string() {
        let batch = string_batch("ts", &[Some(""), None]);
        let classified = classify_time_columns(&batch).unwrap();
        assert_eq!(classified.schema().field(0).data_type(), &DataType::Utf8);
    }

    #[test]
    fn non_string_columns_pass_through() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, true)])),
            vec![Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef],
        )
        .unwrap();
        let classified = classify_time_columns(&batch).unwrap();
        assert_eq!(classified.schema().field(0).data_type(), &DataType::Int64);
    }

    #[test]
    fn rfc3339_values_parse_with_offset() {
        let batch = string_batch(
            "ts",
            &[Some("2021-01-01T00:00:00Z"), Some("2021-01-01T02:00:00+02:00")],
        );
        let classified = classify_time_columns(&batch).unwrap();
        let times = classified
            .column(0)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        assert_eq!(times.value(0), times.value(1));
    }

    #[test]
    fn parse_single_prefers_named_hypothesis() {
        let day_first = parse_single("01-02-2021", false).unwrap();
        assert_eq!(day_first, Utc.with_ymd_and_hms(2021, 2, 1, 0, 0, 0).unwrap());

        let month_first = parse_single("01-02-2021", true).unwrap();
        assert_eq!(
            month_first,
            Utc.with_ymd_and_hms(2021, 1, 2, 0, 0, 0).unwrap()
        );

        assert!(parse_single("not a date", false).is_none());
    }
}
