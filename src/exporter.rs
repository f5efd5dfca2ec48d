//! Validate-and-split pipeline producing the valid/invalid CSV feeds.
//!
//! Both files are rendered in memory first, written to `<name>.tmp` siblings
//! and only then renamed over the published names. A failed run removes its
//! temporaries and leaves the previously published files untouched.
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::ExportError;
use crate::model::{ExportResult, InvalidRecord, Record};
use crate::source::ProductSource;
use crate::validator;

pub const MISSING_FIELDS_COLUMN: &str = "missingFields";
/// Joins list-valued cells, including the `missingFields` column.
pub const LIST_DELIMITER: &str = ",";

pub const DEFAULT_VALID_FILE: &str = "valid_products.csv";
pub const DEFAULT_INVALID_FILE: &str = "invalid_products.csv";

#[derive(Debug, Clone)]
pub struct Exporter {
    required_fields: Vec<String>,
    output_dir: PathBuf,
    valid_file: String,
    invalid_file: String,
    run_timeout: Option<Duration>,
}

impl Exporter {
    pub fn new(required_fields: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            required_fields,
            output_dir: output_dir.into(),
            valid_file: DEFAULT_VALID_FILE.to_string(),
            invalid_file: DEFAULT_INVALID_FILE.to_string(),
            run_timeout: None,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.export.required_fields.clone(), cfg.output_dir())
            .with_file_names(&cfg.export.valid_file, &cfg.export.invalid_file)
            .with_timeout(cfg.run_timeout())
    }

    pub fn with_file_names(mut self, valid: &str, invalid: &str) -> Self {
        self.valid_file = valid.to_string();
        self.invalid_file = invalid.to_string();
        self
    }

    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.run_timeout = Some(limit);
        self
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn valid_file(&self) -> &str {
        &self.valid_file
    }

    pub fn invalid_file(&self) -> &str {
        &self.invalid_file
    }

    pub fn valid_path(&self) -> PathBuf {
        self.output_dir.join(&self.valid_file)
    }

    pub fn invalid_path(&self) -> PathBuf {
        self.output_dir.join(&self.invalid_file)
    }

    /// Fetch, validate, partition and publish both CSV files.
    ///
    /// The run timeout bounds the fetch and render steps only. Once both files
    /// are rendered, publishing runs to completion so a deadline can never
    /// strand temporaries or leave a mismatched pair of files.
    #[instrument(skip_all)]
    pub async fn run(&self, source: &dyn ProductSource) -> Result<ExportResult, ExportError> {
        let rendered = match self.run_timeout {
            Some(limit) => tokio::time::timeout(limit, self.render(source))
                .await
                .map_err(|_| ExportError::TimedOut(limit))??,
            None => self.render(source).await?,
        };
        self.publish(rendered).await
    }

    async fn render(&self, source: &dyn ProductSource) -> Result<Rendered, ExportError> {
        let records = source.fetch().await?;
        let total = records.len();
        let (valid_records, invalid_records) = split(records, &self.required_fields);
        debug!(
            total,
            valid = valid_records.len(),
            invalid = invalid_records.len(),
            "partitioned records"
        );

        let valid_csv = render_valid(&valid_records, &self.required_fields)
            .map_err(|e| ExportError::sink(self.valid_path(), e.into()))?;
        let invalid_csv = render_invalid(&invalid_records, &self.required_fields)
            .map_err(|e| ExportError::sink(self.invalid_path(), e.into()))?;
        Ok(Rendered {
            valid_records,
            invalid_records,
            valid_csv,
            invalid_csv,
        })
    }

    async fn publish(&self, rendered: Rendered) -> Result<ExportResult, ExportError> {
        let valid_path = self.valid_path();
        let invalid_path = self.invalid_path();
        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| ExportError::sink(&self.output_dir, e))?;
        publish(&[
            (valid_path.as_path(), rendered.valid_csv.as_slice()),
            (invalid_path.as_path(), rendered.invalid_csv.as_slice()),
        ])
        .await?;

        info!(
            valid = rendered.valid_records.len(),
            invalid = rendered.invalid_records.len(),
            "csv feeds written"
        );
        Ok(ExportResult {
            valid_records: rendered.valid_records,
            invalid_records: rendered.invalid_records,
            valid_path,
            invalid_path,
        })
    }
}

/// Both feeds rendered in memory, not yet on disk.
struct Rendered {
    valid_records: Vec<Record>,
    invalid_records: Vec<InvalidRecord>,
    valid_csv: Vec<u8>,
    invalid_csv: Vec<u8>,
}

/// Partition records by validity, preserving input order on both sides.
pub fn split<S: AsRef<str>>(records: Vec<Record>, required_fields: &[S]) -> (Vec<Record>, Vec<InvalidRecord>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for record in records {
        let outcome = validator::validate(&record, required_fields);
        if outcome.is_valid {
            valid.push(record);
        } else {
            invalid.push(InvalidRecord {
                record,
                missing_fields: outcome.missing_fields,
            });
        }
    }
    (valid, invalid)
}

/// Header is exactly `required_fields`; other fields are dropped.
pub fn render_valid(records: &[Record], required_fields: &[String]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(required_fields)?;
    for record in records {
        writer.write_record(required_fields.iter().map(|f| cell(record.get(f))))?;
    }
    finish(writer)
}

/// Header is `required_fields` plus a trailing `missingFields` column.
pub fn render_invalid(records: &[InvalidRecord], required_fields: &[String]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(
        required_fields
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(MISSING_FIELDS_COLUMN)),
    )?;
    for invalid in records {
        let row = required_fields
            .iter()
            .map(|f| cell(invalid.record.get(f)))
            .chain(std::iter::once(invalid.missing_fields.join(LIST_DELIMITER)));
        writer.write_record(row)?;
    }
    finish(writer)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, csv::Error> {
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| cell(Some(item)))
            .collect::<Vec<_>>()
            .join(LIST_DELIMITER),
        Some(other) => other.to_string(),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Stage every file, then rename them into place.
async fn publish(files: &[(&Path, &[u8])]) -> Result<(), ExportError> {
    let mut staged: Vec<PathBuf> = Vec::with_capacity(files.len());
    for (path, bytes) in files {
        let tmp = temp_path(path);
        if let Err(e) = write_file(&tmp, bytes).await {
            staged.push(tmp);
            discard(&staged).await;
            return Err(ExportError::sink(*path, e));
        }
        staged.push(tmp);
    }
    for (i, (path, _)) in files.iter().enumerate() {
        if let Err(e) = fs::rename(&staged[i], path).await {
            discard(&staged[i..]).await;
            return Err(ExportError::sink(*path, e));
        }
    }
    Ok(())
}

async fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(?e, path = %path.display(), "failed to remove staged file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::tempdir;

    fn fields() -> Vec<String> {
        ["id", "title", "price"].iter().map(|s| s.to_string()).collect()
    }

    struct Fixed(Vec<Record>);

    #[async_trait]
    impl ProductSource for Fixed {
        async fn fetch(&self) -> Result<Vec<Record>, ExportError> {
            Ok(self.0.clone())
        }
    }

    struct Down;

    #[async_trait]
    impl ProductSource for Down {
        async fn fetch(&self) -> Result<Vec<Record>, ExportError> {
            Err(ExportError::SourceUnavailable("connection refused".into()))
        }
    }

    struct Stalled;

    #[async_trait]
    impl ProductSource for Stalled {
        async fn fetch(&self) -> Result<Vec<Record>, ExportError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn read_rows(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let header = reader.headers().unwrap().iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        (header, rows)
    }

    #[test]
    fn split_partitions_in_order() {
        let records = vec![
            Record::new().with("id", "1").with("title", "a").with("price", "1"),
            Record::new().with("id", "2"),
            Record::new().with("id", "3").with("title", "c").with("price", "3"),
            Record::new().with("title", " "),
        ];
        let (valid, invalid) = split(records, &fields());
        assert_eq!(valid.len() + invalid.len(), 4);
        assert_eq!(
            valid.iter().map(|r| r.id().unwrap()).collect::<Vec<_>>(),
            vec!["1", "3"]
        );
        assert_eq!(invalid[0].record.id(), Some("2"));
        assert_eq!(invalid[0].missing_fields, vec!["title", "price"]);
        assert_eq!(invalid[1].missing_fields, vec!["id", "title", "price"]);
    }

    #[test]
    fn render_invalid_joins_missing_fields() {
        let invalid = vec![InvalidRecord {
            record: Record::new().with("id", "7").with("title", "Hat, \"red\""),
            missing_fields: vec!["price".into(), "brand".into()],
        }];
        let bytes = render_invalid(&invalid, &fields()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "id,title,price,missingFields\n7,\"Hat, \"\"red\"\"\",,\"price,brand\"\n"
        );
    }

    #[test]
    fn cell_renders_non_strings() {
        assert_eq!(cell(None), "");
        assert_eq!(cell(Some(&Value::Null)), "");
        assert_eq!(cell(Some(&json!(9.5))), "9.5");
        assert_eq!(cell(Some(&json!(true))), "true");
        assert_eq!(cell(Some(&json!(["s", "m"]))), "s,m");
    }

    #[tokio::test]
    async fn run_writes_both_files() {
        let td = tempdir().unwrap();
        let out = td.path().join("output");
        let exporter = Exporter::new(fields(), &out);
        let source = Fixed(vec![
            Record::new()
                .with("id", "1")
                .with("title", "Shoe")
                .with("price", "9.99")
                .with("color", "red"),
            Record::new().with("id", "2").with("title", "   ").with("price", "5"),
        ]);

        let result = exporter.run(&source).await.unwrap();
        assert_eq!(result.valid_count(), 1);
        assert_eq!(result.invalid_count(), 1);
        assert_eq!(result.valid_path, out.join(DEFAULT_VALID_FILE));

        let (header, rows) = read_rows(&result.valid_path);
        assert_eq!(header, vec!["id", "title", "price"]);
        assert_eq!(rows, vec![vec!["1", "Shoe", "9.99"]]);

        let (header, rows) = read_rows(&result.invalid_path);
        assert_eq!(header, vec!["id", "title", "price", "missingFields"]);
        assert_eq!(rows, vec![vec!["2", "   ", "5", "title"]]);

        assert!(!temp_path(&result.valid_path).exists());
        assert!(!temp_path(&result.invalid_path).exists());
    }

    #[tokio::test]
    async fn valid_file_reads_back_identically() {
        let td = tempdir().unwrap();
        let exporter = Exporter::new(fields(), td.path());
        let records: Vec<Record> = (0..25)
            .map(|i| {
                Record::new()
                    .with("id", format!("sku-{i}"))
                    .with("title", format!("Item \"{i}\", deluxe\nedition"))
                    .with("price", format!("{i}.00 USD"))
            })
            .collect();
        let result = exporter.run(&Fixed(records.clone())).await.unwrap();

        let (_, rows) = read_rows(&result.valid_path);
        assert_eq!(rows.len(), records.len());
        for (row, record) in rows.iter().zip(&records) {
            let expected: Vec<String> = fields()
                .iter()
                .map(|f| record.get_str(f).unwrap().to_string())
                .collect();
            assert_eq!(row, &expected);
        }
    }

    #[tokio::test]
    async fn empty_source_writes_header_only() {
        let td = tempdir().unwrap();
        let exporter = Exporter::new(fields(), td.path());
        let result = exporter.run(&Fixed(Vec::new())).await.unwrap();
        let text = std::fs::read_to_string(&result.valid_path).unwrap();
        assert_eq!(text, "id,title,price\n");
        let text = std::fs::read_to_string(&result.invalid_path).unwrap();
        assert_eq!(text, "id,title,price,missingFields\n");
    }

    #[tokio::test]
    async fn source_failure_leaves_previous_output() {
        let td = tempdir().unwrap();
        let exporter = Exporter::new(fields(), td.path());
        let source = Fixed(vec![Record::new().with("id", "1").with("title", "a").with("price", "1")]);
        exporter.run(&source).await.unwrap();
        let before = std::fs::read_to_string(exporter.valid_path()).unwrap();

        let err = exporter.run(&Down).await.unwrap_err();
        assert!(matches!(err, ExportError::SourceUnavailable(_)));
        assert_eq!(std::fs::read_to_string(exporter.valid_path()).unwrap(), before);
    }

    #[tokio::test]
    async fn unwritable_destination_is_sink_failure() {
        let td = tempdir().unwrap();
        let blocker = td.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let exporter = Exporter::new(fields(), blocker.join("output"));
        let err = exporter.run(&Fixed(Vec::new())).await.unwrap_err();
        assert!(matches!(err, ExportError::SinkWriteFailed { .. }));
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_run_times_out() {
        let td = tempdir().unwrap();
        let exporter = Exporter::new(fields(), td.path()).with_timeout(Duration::from_secs(5));
        let err = exporter.run(&Stalled).await.unwrap_err();
        assert!(matches!(err, ExportError::TimedOut(d) if d == Duration::from_secs(5)));
        assert!(!exporter.valid_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_previous_pair_and_no_temporaries() {
        let td = tempdir().unwrap();
        let exporter = Exporter::new(fields(), td.path()).with_timeout(Duration::from_secs(5));
        let source = Fixed(vec![Record::new().with("id", "1").with("title", "a").with("price", "1")]);
        exporter.run(&source).await.unwrap();
        let valid_before = std::fs::read_to_string(exporter.valid_path()).unwrap();
        let invalid_before = std::fs::read_to_string(exporter.invalid_path()).unwrap();

        let err = exporter.run(&Stalled).await.unwrap_err();
        assert!(matches!(err, ExportError::TimedOut(_)));
        assert_eq!(std::fs::read_to_string(exporter.valid_path()).unwrap(), valid_before);
        assert_eq!(std::fs::read_to_string(exporter.invalid_path()).unwrap(), invalid_before);
        assert_eq!(
            dir_entries(td.path()),
            vec![DEFAULT_INVALID_FILE, DEFAULT_VALID_FILE]
        );
    }

    #[tokio::test]
    async fn deadline_does_not_interrupt_publishing() {
        // A zero limit expires as soon as any step yields. Fetch and render
        // finish on the first poll, so only the file writes could be cut off.
        let td = tempdir().unwrap();
        let exporter = Exporter::new(fields(), td.path()).with_timeout(Duration::ZERO);
        let source = Fixed(vec![
            Record::new().with("id", "1").with("title", "a").with("price", "1"),
            Record::new().with("id", "2"),
        ]);
        let result = exporter.run(&source).await.unwrap();
        assert_eq!(result.valid_count(), 1);
        assert_eq!(result.invalid_count(), 1);
        assert_eq!(
            dir_entries(td.path()),
            vec![DEFAULT_INVALID_FILE, DEFAULT_VALID_FILE]
        );
        let (_, rows) = read_rows(&result.invalid_path);
        assert_eq!(rows, vec![vec!["2", "", "", "title,price"]]);
    }
}
