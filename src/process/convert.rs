use arrow::{
    array::{
        temporal_conversions::as_datetime_with_timezone, timezone::Tz, Array, ArrayRef,
        StringArray, TimestampNanosecondBuilder,
    },
    compute::cast,
    datatypes::{DataType, Field, Schema, TimeUnit, TimestampNanosecondType},
    error::ArrowError,
    record_batch::RecordBatch,
};
use chrono::{DateTime, FixedOffset};
use std::{str::FromStr, sync::Arc};
use tracing::{debug, warn};

use crate::config::{CoercionPolicy, FeedConfig, DEFAULT_DATE_COLUMN, DEFAULT_DATE_SUFFIX};
use crate::error::{FeedError, Result};

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Selects the epoch-second columns: a name suffix plus a list of exact names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateColumnRule {
    pub suffix: String,
    pub exact: Vec<String>,
}

impl Default for DateColumnRule {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_DATE_SUFFIX.to_string(),
            exact: vec![DEFAULT_DATE_COLUMN.to_string()],
        }
    }
}

impl DateColumnRule {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            suffix: config.date_suffix.clone(),
            exact: config.date_columns.clone(),
        }
    }

    pub fn matches(&self, column: &str) -> bool {
        column.ends_with(&self.suffix) || self.exact.iter().any(|c| c == column)
    }

    /// Date-like column names of `schema`, in table order.
    pub fn detect(&self, schema: &Schema) -> Vec<String> {
        schema
            .fields()
            .iter()
            .map(|f| f.name())
            .filter(|n| self.matches(n))
            .cloned()
            .collect()
    }
}

/// A date-like value that could not be read as epoch seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedValue {
    pub column: String,
    pub row: usize,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    /// Columns now holding timestamps.
    pub converted: Vec<String>,
    /// Date-like columns kept as read because some value did not coerce.
    pub retained: Vec<String>,
    pub skipped: Vec<SkippedValue>,
}

impl ConversionReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Epoch seconds as text to nanoseconds since the epoch.
///
/// Integers are scaled exactly; floats keep their sub-second part rounded to
/// the nearest nanosecond. Anything else, or an out-of-range result, is `None`.
pub fn epoch_seconds_to_nanos(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return secs.checked_mul(NANOS_PER_SECOND);
    }
    let secs: f64 = s.parse().ok()?;
    if !secs.is_finite() {
        return None;
    }
    let nanos = (secs * NANOS_PER_SECOND as f64).round();
    if nanos < i64::MIN as f64 || nanos >= i64::MAX as f64 {
        return None;
    }
    Some(nanos as i64)
}

/// A converted value as wall-clock time in `timezone`.
pub fn local_time(nanos: i64, timezone: &str) -> Option<DateTime<FixedOffset>> {
    let tz = Tz::from_str(timezone).ok()?;
    as_datetime_with_timezone::<TimestampNanosecondType>(nanos, tz).map(|dt| dt.fixed_offset())
}

pub fn timestamp_type(timezone: &str) -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, Some(timezone.into()))
}

enum Outcome {
    Converted(ArrayRef),
    Failed(Vec<(usize, String)>),
}

fn convert_column(col: &ArrayRef, timezone: &str) -> Result<Outcome> {
    let text = match col.data_type() {
        DataType::Utf8 => col.clone(),
        _ => cast(col, &DataType::Utf8)?,
    };
    let strings = text
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| ArrowError::CastError("date column did not cast to text".into()))?;

    let mut builder = TimestampNanosecondBuilder::with_capacity(strings.len());
    let mut failures = Vec::new();
    for (row, value) in strings.iter().enumerate() {
        match value {
            None => builder.append_null(),
            Some(raw) => match epoch_seconds_to_nanos(raw) {
                Some(nanos) => builder.append_value(nanos),
                None => {
                    failures.push((row, raw.to_string()));
                    builder.append_null();
                }
            },
        }
    }

    if failures.is_empty() {
        let arr = builder.finish().with_timezone(timezone);
        Ok(Outcome::Converted(Arc::new(arr)))
    } else {
        Ok(Outcome::Failed(failures))
    }
}

/// Original values of a column that failed coercion, restored to the type
/// inference gave it when possible.
fn retain_column(col: &ArrayRef, inferred: &DataType) -> ArrayRef {
    if col.data_type() == inferred {
        return col.clone();
    }
    match cast(col, inferred) {
        Ok(restored) => restored,
        Err(e) => {
            debug!(error = %e, "keeping date column as text");
            col.clone()
        }
    }
}

/// Replace every date-like column of `batch` with a timezone-aware timestamp
/// column. Other columns, column order and row order are untouched.
///
/// `inferred` lists the types inference chose, positionally matching `batch`.
pub fn convert_date_columns(
    batch: &RecordBatch,
    inferred: &Schema,
    rule: &DateColumnRule,
    timezone: &str,
    policy: CoercionPolicy,
) -> Result<(RecordBatch, ConversionReport)> {
    let schema = batch.schema();
    let mut report = ConversionReport::default();
    let mut fields = Vec::with_capacity(schema.fields().len());
    let mut columns = Vec::with_capacity(batch.num_columns());

    for (i, (field, col)) in schema.fields().iter().zip(batch.columns()).enumerate() {
        if !rule.matches(field.name()) {
            fields.push(field.as_ref().clone());
            columns.push(col.clone());
            continue;
        }

        match convert_column(col, timezone)? {
            Outcome::Converted(arr) => {
                fields.push(Field::new(field.name(), timestamp_type(timezone), true));
                columns.push(arr);
                report.converted.push(field.name().clone());
            }
            Outcome::Failed(failures) => {
                if policy == CoercionPolicy::Strict {
                    return Err(FeedError::Coercion {
                        column: field.name().clone(),
                        failures: failures.len(),
                    });
                }
                warn!(
                    column = %field.name(),
                    skipped = failures.len(),
                    first = %failures[0].1,
                    "values are not epoch seconds; keeping column as read"
                );

                let inferred_type = inferred
                    .fields()
                    .get(i)
                    .map(|f| f.data_type().clone())
                    .unwrap_or_else(|| col.data_type().clone());
                let kept = retain_column(col, &inferred_type);
                fields.push(Field::new(field.name(), kept.data_type().clone(), true));
                columns.push(kept);

                report.retained.push(field.name().clone());
                report
                    .skipped
                    .extend(failures.into_iter().map(|(row, raw)| SkippedValue {
                        column: field.name().clone(),
                        row,
                        raw,
                    }));
            }
        }
    }

    let out_schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
    let out = RecordBatch::try_new(out_schema, columns)?;
    Ok((out, report))
}
