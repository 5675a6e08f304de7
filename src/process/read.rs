use arrow::{
    compute::concat_batches,
    csv::{reader::Format, ReaderBuilder},
    datatypes::{DataType, Field, Schema, SchemaRef},
    error::ArrowError,
    record_batch::RecordBatch,
};
use regex::Regex;
use std::{fs, io::Cursor, path::Path, sync::Arc};
use tracing::debug;

use crate::error::ReadFailure;
use crate::process::convert::DateColumnRule;

pub const DELIMITER: u8 = b';';

/// Field values read as missing, in addition to the empty field.
pub const NULL_MARKERS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Whole-field match of the empty string or any of `NULL_MARKERS`.
pub fn null_regex() -> Regex {
    let alternatives: Vec<String> = NULL_MARKERS.iter().map(|m| regex::escape(m)).collect();
    Regex::new(&format!("^(?:|{})$", alternatives.join("|")))
        .expect("null marker pattern is a valid regex")
}

/// A CSV loaded into a single batch.
#[derive(Debug, Clone)]
pub struct SourceTable {
    /// Date-like columns are kept as text here so values coerce one by one.
    pub batch: RecordBatch,
    /// Types inference produced for every column, date-like ones included.
    pub inferred: SchemaRef,
}

/// Read a `;`-delimited CSV with a header row, inferring column types.
pub fn read_source(path: &Path, rule: &DateColumnRule) -> Result<SourceTable, ReadFailure> {
    let bytes = fs::read(path).map_err(ReadFailure::from_io)?;
    parse_source(&bytes, rule).map_err(ReadFailure::Malformed)
}

/// Rows shorter than the header are padded with nulls; longer rows are malformed.
pub fn parse_source(bytes: &[u8], rule: &DateColumnRule) -> Result<SourceTable, ArrowError> {
    let nulls = null_regex();
    let format = Format::default()
        .with_header(true)
        .with_delimiter(DELIMITER)
        .with_null_regex(nulls.clone())
        .with_truncated_rows(true);
    let (inferred, records) = format.infer_schema(Cursor::new(bytes), None)?;
    if inferred.fields().is_empty() {
        return Err(ArrowError::CsvError("missing header row".into()));
    }
    debug!(columns = inferred.fields().len(), records, "inferred schema");

    let read_fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| {
            if rule.matches(f.name()) {
                Field::new(f.name(), DataType::Utf8, true)
            } else {
                f.as_ref().clone()
            }
        })
        .collect();
    let read_schema = Arc::new(Schema::new(read_fields));

    let reader = ReaderBuilder::new(read_schema.clone())
        .with_header(true)
        .with_delimiter(DELIMITER)
        .with_null_regex(nulls)
        .with_truncated_rows(true)
        .build(Cursor::new(bytes))?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let batch = concat_batches(&read_schema, &batches)?;

    Ok(SourceTable {
        batch,
        inferred: Arc::new(inferred),
    })
}
