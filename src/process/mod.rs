// src/process/mod.rs

use arrow::{array::TimestampNanosecondArray, record_batch::RecordBatch};
use chrono::{DateTime, FixedOffset};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::config::FeedConfig;
use crate::error::{FeedError, ReadFailure, Result};
use crate::fetch::Fetch;
use crate::layout::Layout;

pub mod convert;
pub mod name;
pub mod read;
pub mod write;

pub use convert::{convert_date_columns, ConversionReport, DateColumnRule, SkippedValue};
pub use name::DatasetName;
pub use read::{read_source, SourceTable};
pub use write::write_snapshot;

/// What a single feed run did.
#[derive(Debug, Clone)]
pub struct FeedReport {
    pub source: PathBuf,
    pub snapshot: PathBuf,
    pub rows: usize,
    pub columns: usize,
    pub snapshot_bytes: u64,
    /// Whether the fetch fallback ran before the data could be read.
    pub fetched: bool,
    pub conversion: ConversionReport,
}

fn banner(step: &str) -> String {
    format!("{:.^88}", format!("  Step 1: Data Feed {}  ", step))
}

/// First non-null value of the first converted column, as local wall-clock time.
fn first_local_time(
    batch: &RecordBatch,
    report: &ConversionReport,
    timezone: &str,
) -> Option<(String, DateTime<FixedOffset>)> {
    report.converted.iter().find_map(|column| {
        let ts = batch
            .column_by_name(column)?
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()?;
        let nanos = ts.iter().flatten().next()?;
        convert::local_time(nanos, timezone).map(|dt| (column.clone(), dt))
    })
}

/// Read `source`; on any failure run `fetcher` once and read exactly once more.
fn load_with_fallback(
    source: &Path,
    rule: &DateColumnRule,
    fetcher: &dyn Fetch,
) -> Result<(SourceTable, bool)> {
    let first = match read_source(source, rule) {
        Ok(table) => return Ok((table, false)),
        Err(failure) => failure,
    };

    match &first {
        ReadFailure::Missing(_) => {
            info!(path = %source.display(), "source not present locally, fetching")
        }
        ReadFailure::Io(e) => {
            warn!(path = %source.display(), error = %e, "source unreadable, fetching")
        }
        ReadFailure::Malformed(e) => {
            warn!(path = %source.display(), error = %e, "source malformed, fetching a fresh copy")
        }
    }

    if let Err(e) = fetcher.fetch() {
        warn!(error = %e, "fetch failed; retrying read anyway");
    }

    match read_source(source, rule) {
        Ok(table) => Ok((table, true)),
        Err(failure) => Err(FeedError::SourceUnavailable {
            path: source.to_path_buf(),
            failure,
        }),
    }
}

/// Load `<datasets>/<name>.csv`, convert its date-like columns and write
/// `<datasets/parquet>/<name>.parquet`.
///
/// Fails with `InvalidArgument` before touching the filesystem when no name
/// is given, and with `SourceUnavailable` when the source cannot be read even
/// after one fetch and one retry. No snapshot is written on failure.
#[instrument(level = "info", skip(layout, config, fetcher))]
pub fn load_and_convert(
    dataset_name: Option<&str>,
    layout: &Layout,
    config: &FeedConfig,
    fetcher: &dyn Fetch,
) -> Result<FeedReport> {
    info!("{}", banner("Started"));
    let name = DatasetName::parse(dataset_name)?;
    let rule = DateColumnRule::from_config(config);

    let source = layout.source_path(&name);
    let (table, fetched) = load_with_fallback(&source, &rule, fetcher)?;
    info!(path = %source.display(), rows = table.batch.num_rows(), "file loaded correctly");

    let date_columns = rule.detect(&table.batch.schema());
    debug!(?date_columns, "date-like columns");

    let (batch, conversion) = convert_date_columns(
        &table.batch,
        &table.inferred,
        &rule,
        &config.timezone,
        config.coercion,
    )?;
    if let Some((column, local)) = first_local_time(&batch, &conversion, &config.timezone) {
        info!(%column, first = %local.to_rfc3339(), timezone = %config.timezone, "dates converted");
    }
    if !conversion.is_clean() {
        warn!(
            skipped = conversion.skipped.len(),
            columns = ?conversion.retained,
            "some date-like values were kept unconverted"
        );
    }

    let snapshot = layout.snapshot_path(&name);
    let snapshot_bytes = write_snapshot(&batch, &snapshot, config.compression)?;
    info!(
        "file saved as {} in {}",
        name.snapshot_name(),
        layout.parquet_dir().display()
    );
    info!("{}", banner("Completed"));

    Ok(FeedReport {
        source,
        snapshot,
        rows: batch.num_rows(),
        columns: batch.num_columns(),
        snapshot_bytes,
        fetched,
        conversion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoercionPolicy;
    use crate::process::convert::{timestamp_type, NANOS_PER_SECOND};
    use anyhow::anyhow;
    use arrow::array::{Array, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::DataType;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::{cell::Cell, fs, fs::File};
    use tempfile::{tempdir, TempDir};
    use tracing_subscriber::{fmt, EnvFilter};

    const SAMPLE: &str = "mesa_id;created_at;amount;distrito;fecha_mesa_epoch\n\
                          1;1700000000;10.5;Cordoba;1690000000\n\
                          2;;7.25;;1690003600\n\
                          3;1700000060;3;Salta;1690007200\n";

    fn init_logging() {
        let _ = fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    }

    /// Counts calls and optionally drops a file into place, like a download would.
    struct StubFetcher {
        calls: Cell<usize>,
        deliver: Option<(PathBuf, &'static str)>,
        fail: bool,
    }

    impl StubFetcher {
        fn noop() -> Self {
            Self {
                calls: Cell::new(0),
                deliver: None,
                fail: false,
            }
        }

        fn delivering(path: PathBuf, content: &'static str) -> Self {
            Self {
                deliver: Some((path, content)),
                ..Self::noop()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::noop()
            }
        }
    }

    impl Fetch for StubFetcher {
        fn fetch(&self) -> anyhow::Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(anyhow!("remote unreachable"));
            }
            if let Some((path, content)) = &self.deliver {
                fs::write(path, content)?;
            }
            Ok(())
        }
    }

    fn setup() -> anyhow::Result<(TempDir, Layout)> {
        init_logging();
        let tmp = tempdir()?;
        let layout = Layout::new(tmp.path());
        layout.ensure()?;
        Ok((tmp, layout))
    }

    fn read_snapshot(path: &Path) -> anyhow::Result<RecordBatch> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(arrow::compute::concat_batches(&batches[0].schema(), &batches)?)
    }

    fn snapshot_files(layout: &Layout) -> anyhow::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(layout.parquet_dir())?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        files.sort();
        Ok(files)
    }

    #[test]
    fn test_writes_one_converted_snapshot() -> anyhow::Result<()> {
        let (_tmp, layout) = setup()?;
        fs::write(layout.datasets_dir().join("sample.csv"), SAMPLE)?;
        let fetcher = StubFetcher::noop();

        let report = load_and_convert(Some("sample"), &layout, &FeedConfig::default(), &fetcher)?;

        assert_eq!(fetcher.calls.get(), 0);
        assert!(!report.fetched);
        assert_eq!(report.rows, 3);
        assert_eq!(report.conversion.converted, vec!["created_at", "fecha_mesa_epoch"]);
        assert_eq!(
            snapshot_files(&layout)?,
            vec![layout.parquet_dir().join("sample.parquet")]
        );

        let out = read_snapshot(&report.snapshot)?;
        let schema = out.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            ["mesa_id", "created_at", "amount", "distrito", "fecha_mesa_epoch"]
        );

        let tz = "America/Buenos_Aires";
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &timestamp_type(tz));
        assert_eq!(schema.field(2).data_type(), &DataType::Float64);
        assert_eq!(schema.field(3).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(4).data_type(), &timestamp_type(tz));

        let created = out
            .column(1)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        assert_eq!(created.value(0), 1_700_000_000 * NANOS_PER_SECOND);
        assert!(created.is_null(1));
        assert_eq!(created.value(2), 1_700_000_060 * NANOS_PER_SECOND);
        assert_eq!(
            convert::local_time(created.value(0), tz).unwrap().to_rfc3339(),
            "2023-11-14T19:13:20-03:00"
        );

        // pass-through columns keep their values and row order
        let ids = out.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.iter().collect::<Vec<_>>(), vec![Some(1), Some(2), Some(3)]);
        let amounts = out.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(
            amounts.iter().collect::<Vec<_>>(),
            vec![Some(10.5), Some(7.25), Some(3.0)]
        );
        let distrito = out.column(3).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(
            distrito.iter().collect::<Vec<_>>(),
            vec![Some("Cordoba"), None, Some("Salta")]
        );
        Ok(())
    }

    #[test]
    fn test_rerun_gives_identical_data() -> anyhow::Result<()> {
        let (_tmp, layout) = setup()?;
        fs::write(layout.datasets_dir().join("sample.csv"), SAMPLE)?;
        let cfg = FeedConfig::default();

        let first = load_and_convert(Some("sample"), &layout, &cfg, &StubFetcher::noop())?;
        let a = read_snapshot(&first.snapshot)?;
        let second = load_and_convert(Some("sample.csv"), &layout, &cfg, &StubFetcher::noop())?;
        let b = read_snapshot(&second.snapshot)?;

        assert_eq!(first.snapshot, second.snapshot);
        assert_eq!(a.schema().fields(), b.schema().fields());
        assert_eq!(a.columns(), b.columns());
        assert_eq!(snapshot_files(&layout)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_name_does_no_io() -> anyhow::Result<()> {
        let (tmp, layout) = setup()?;
        fs::remove_dir_all(tmp.path().join("datasets"))?;
        let fetcher = StubFetcher::noop();

        let err = load_and_convert(None, &layout, &FeedConfig::default(), &fetcher).unwrap_err();
        assert!(matches!(err, FeedError::InvalidArgument(_)), "{err}");
        assert_eq!(fetcher.calls.get(), 0);
        assert!(!tmp.path().join("datasets").exists());
        Ok(())
    }

    #[test]
    fn test_fetches_missing_source_once() -> anyhow::Result<()> {
        let (_tmp, layout) = setup()?;
        let fetcher = StubFetcher::delivering(layout.datasets_dir().join("sample.csv"), SAMPLE);

        let report = load_and_convert(Some("sample"), &layout, &FeedConfig::default(), &fetcher)?;

        assert_eq!(fetcher.calls.get(), 1);
        assert!(report.fetched);
        assert!(report.snapshot.exists());
        Ok(())
    }

    #[test]
    fn test_refetches_malformed_source() -> anyhow::Result<()> {
        let (_tmp, layout) = setup()?;
        let source = layout.datasets_dir().join("sample.csv");
        fs::write(&source, "a;b\n1;2;3\n")?;
        let fetcher = StubFetcher::delivering(source, SAMPLE);

        let report = load_and_convert(Some("sample"), &layout, &FeedConfig::default(), &fetcher)?;
        assert_eq!(fetcher.calls.get(), 1);
        assert_eq!(report.rows, 3);
        Ok(())
    }

    #[test]
    fn test_unavailable_after_retry_writes_nothing() -> anyhow::Result<()> {
        let (_tmp, layout) = setup()?;

        for fetcher in [StubFetcher::noop(), StubFetcher::failing()] {
            let err = load_and_convert(Some("sample"), &layout, &FeedConfig::default(), &fetcher)
                .unwrap_err();
            assert_eq!(fetcher.calls.get(), 1, "exactly one fetch before the retry");
            match err {
                FeedError::SourceUnavailable { path, failure } => {
                    assert_eq!(path, layout.datasets_dir().join("sample.csv"));
                    assert!(matches!(failure, ReadFailure::Missing(_)));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        assert!(snapshot_files(&layout)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_lenient_and_strict_coercion() -> anyhow::Result<()> {
        let (_tmp, layout) = setup()?;
        fs::write(
            layout.datasets_dir().join("votos.csv"),
            "id;closed_at\n1;1700000000\n2;pending\n",
        )?;

        let report = load_and_convert(
            Some("votos"),
            &layout,
            &FeedConfig::default(),
            &StubFetcher::noop(),
        )?;
        assert_eq!(report.conversion.retained, vec!["closed_at"]);
        assert_eq!(
            report.conversion.skipped,
            vec![SkippedValue {
                column: "closed_at".into(),
                row: 1,
                raw: "pending".into()
            }]
        );
        let out = read_snapshot(&report.snapshot)?;
        let closed = out.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(closed.value(0), "1700000000");
        assert_eq!(closed.value(1), "pending");

        fs::remove_file(&report.snapshot)?;
        let strict = FeedConfig {
            coercion: CoercionPolicy::Strict,
            ..FeedConfig::default()
        };
        let err =
            load_and_convert(Some("votos"), &layout, &strict, &StubFetcher::noop()).unwrap_err();
        assert!(matches!(err, FeedError::Coercion { .. }), "{err}");
        assert!(snapshot_files(&layout)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_custom_rule_and_missing_exact_column() -> anyhow::Result<()> {
        let (_tmp, layout) = setup()?;
        fs::write(
            layout.datasets_dir().join("mesas.csv"),
            "id;opened_ts;created_at\n1;0;5\n",
        )?;
        let cfg = FeedConfig {
            date_suffix: "_ts".into(),
            date_columns: vec!["fecha_mesa_epoch".into()],
            ..FeedConfig::default()
        };

        let report = load_and_convert(Some("mesas"), &layout, &cfg, &StubFetcher::noop())?;
        // the exact-name column is absent, which is fine
        assert_eq!(report.conversion.converted, vec!["opened_ts"]);

        let out = read_snapshot(&report.snapshot)?;
        assert_eq!(out.schema().field(2).data_type(), &DataType::Int64);
        Ok(())
    }

    #[test]
    fn test_null_markers_and_short_rows_still_convert() -> anyhow::Result<()> {
        let (_tmp, layout) = setup()?;
        fs::write(
            layout.datasets_dir().join("mesas.csv"),
            "id;created_at;amount\n1;1700000000;1.5\n2;NULL;NaN\n3;NaN;2.5\n4;1700000060\n",
        )?;
        let strict = FeedConfig {
            coercion: CoercionPolicy::Strict,
            ..FeedConfig::default()
        };
        let fetcher = StubFetcher::noop();

        let report = load_and_convert(Some("mesas"), &layout, &strict, &fetcher)?;
        assert_eq!(fetcher.calls.get(), 0);
        assert_eq!(report.conversion.converted, vec!["created_at"]);
        assert!(report.conversion.is_clean());

        let out = read_snapshot(&report.snapshot)?;
        let created = out
            .column(1)
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .unwrap();
        assert_eq!(
            created.iter().collect::<Vec<_>>(),
            vec![
                Some(1_700_000_000 * NANOS_PER_SECOND),
                None,
                None,
                Some(1_700_000_060 * NANOS_PER_SECOND)
            ]
        );
        let amounts = out.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(
            amounts.iter().collect::<Vec<_>>(),
            vec![Some(1.5), None, Some(2.5), None]
        );
        Ok(())
    }

    #[test]
    fn test_first_local_time_skips_leading_nulls() -> anyhow::Result<()> {
        let table = read::parse_source(
            "id;created_at\n1;\n2;1700000000\n".as_bytes(),
            &DateColumnRule::default(),
        )?;
        let (batch, report) = convert_date_columns(
            &table.batch,
            &table.inferred,
            &DateColumnRule::default(),
            "America/Buenos_Aires",
            CoercionPolicy::Lenient,
        )?;

        let (column, local) = first_local_time(&batch, &report, "America/Buenos_Aires").unwrap();
        assert_eq!(column, "created_at");
        assert_eq!(local.to_rfc3339(), "2023-11-14T19:13:20-03:00");

        let empty = ConversionReport::default();
        assert!(first_local_time(&batch, &empty, "America/Buenos_Aires").is_none());
        Ok(())
    }

    #[test]
    fn test_banner_is_centered() {
        let b = banner("Started");
        assert_eq!(b.chars().count(), 88);
        assert!(b.starts_with("....") && b.ends_with("...."));
        assert!(b.contains("  Step 1: Data Feed Started  "));
    }
}
