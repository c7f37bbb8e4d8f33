//! Database and spreadsheet extractors, the Parquet writer and the metadata inventory.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, RecordBatch,
    RecordBatchOptions, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field as ArrowField, Schema, TimeUnit};
use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Timelike, Utc};
use lakeload_core::{ExtractPair, MetadataRecord, SpreadsheetBatch, Table, Value};
use parquet::arrow::ArrowWriter;
use sqlx::postgres::PgRow;
use sqlx::types::BigDecimal;
use sqlx::{Column, Connection, Executor, PgConnection, Row, Statement, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::{error, info, warn};
use walkdir::WalkDir;

pub const CRATE_NAME: &str = "lakeload-extract";

pub const DEFAULT_SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("column `{column}` has unsupported type {type_name}")]
    UnsupportedColumnType { column: String, type_name: String },
    #[error("{0} has no worksheet")]
    NoWorksheet(PathBuf),
    #[error("{0} has no header row")]
    EmptyWorksheet(PathBuf),
}

/// Anything that can answer a query with a fully materialised table.
#[async_trait]
pub trait TableSource: Send + Sync {
    async fn fetch_table(&self, query: &str) -> Result<Table>;
}

/// Opens a fresh connection for every fetch.
#[derive(Debug, Clone)]
pub struct PostgresSource {
    database_url: String,
}

impl PostgresSource {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl TableSource for PostgresSource {
    async fn fetch_table(&self, query: &str) -> Result<Table> {
        let mut conn = PgConnection::connect(&self.database_url)
            .await
            .context("connecting to source database")?;

        let columns = {
            let statement = (&mut conn)
                .prepare(query)
                .await
                .context("preparing extract query")?;
            statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect::<Vec<_>>()
        };

        let rows = sqlx::query(query)
            .fetch_all(&mut conn)
            .await
            .context("running extract query")?;

        let mut table = Table::new(columns);
        for row in &rows {
            let values = (0..row.len())
                .map(|index| decode_cell(row, index))
                .collect::<Result<Vec<_>>>()?;
            table.push_row(values);
        }

        if let Err(err) = conn.close().await {
            warn!("closing source database connection failed: {err}");
        }
        Ok(table)
    }
}

fn decode_cell(row: &PgRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(row.try_get(index)?),
        "INT2" => Value::Int(row.try_get::<i16, _>(index)?.into()),
        "INT4" => Value::Int(row.try_get::<i32, _>(index)?.into()),
        "INT8" => Value::Int(row.try_get(index)?),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(index)?.into()),
        "FLOAT8" => Value::Float(row.try_get(index)?),
        "NUMERIC" => {
            let decimal: BigDecimal = row.try_get(index)?;
            let text = decimal.to_string();
            Value::Float(
                text.parse()
                    .with_context(|| format!("converting numeric {text}"))?,
            )
        }
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get(index)?),
        "UUID" => Value::Text(row.try_get::<sqlx::types::Uuid, _>(index)?.to_string()),
        "DATE" => Value::Date(row.try_get(index)?),
        "TIMESTAMP" => Value::DateTime(row.try_get(index)?),
        "TIMESTAMPTZ" => Value::DateTime(row.try_get::<DateTime<Utc>, _>(index)?.naive_utc()),
        _ => {
            return Err(ExtractError::UnsupportedColumnType {
                column: row.column(index).name().to_string(),
                type_name,
            }
            .into())
        }
    };
    Ok(value)
}

/// Run `query`, then write `<table>_raw.parquet` and `<table>_clean.parquet` into
/// `output_dir`. Any failure is logged and yields `None`.
pub async fn extract_sql_table(
    source: &dyn TableSource,
    query: &str,
    table_name: &str,
    output_dir: &Path,
) -> Option<ExtractPair> {
    let result = async {
        let table = source.fetch_table(query).await?;
        let pair = ExtractPair::for_stem(output_dir, table_name);
        write_extract(&table, &pair)?;
        Ok::<_, anyhow::Error>((pair, table.num_rows()))
    }
    .await;

    match result {
        Ok((pair, rows)) => {
            info!(table = table_name, rows, "extracted SQL table");
            Some(pair)
        }
        Err(err) => {
            error!(table = table_name, "SQL extraction failed: {err:#}");
            None
        }
    }
}

/// Write the raw table and its clean variant. Both files share the schema
/// inferred from the raw rows.
pub fn write_extract(table: &Table, pair: &ExtractPair) -> Result<()> {
    let kinds = column_kinds(table);
    write_batch(&pair.raw, &record_batch_with_kinds(table, &kinds)?)?;
    write_batch(
        &pair.clean,
        &record_batch_with_kinds(&table.drop_missing(), &kinds)?,
    )
}

pub fn is_spreadsheet(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Process every spreadsheet directly inside `folder`, in file-name order. A file
/// that fails is logged and left out of the batch.
pub fn extract_spreadsheets(folder: &Path, extensions: &[String]) -> SpreadsheetBatch {
    let mut batch = SpreadsheetBatch::default();

    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(err) => {
            error!("cannot read spreadsheet folder {}: {err}", folder.display());
            return batch;
        }
    };

    let mut files = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_spreadsheet(path, extensions))
        .collect::<Vec<_>>();
    files.sort();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match extract_spreadsheet(&path) {
            Ok(pair) => {
                info!("processed spreadsheet {name}");
                batch.push(pair);
            }
            Err(err) => error!("failed to process spreadsheet {name}: {err:#}"),
        }
    }

    batch
}

/// Read one spreadsheet and write its raw/clean twins next to it.
pub fn extract_spreadsheet(path: &Path) -> Result<ExtractPair> {
    let table = read_spreadsheet(path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pair = ExtractPair::for_stem(dir, &stem);
    write_extract(&table, &pair)?;
    Ok(pair)
}

/// First worksheet, first row as header.
pub fn read_spreadsheet(path: &Path) -> Result<Table> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("opening {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ExtractError::NoWorksheet(path.to_path_buf()))?
        .with_context(|| format!("reading first worksheet of {}", path.display()))?;

    let mut rows = range.rows();
    let header = rows
        .next()
        .ok_or_else(|| ExtractError::EmptyWorksheet(path.to_path_buf()))?;

    let mut table = Table::new(header_names(header));
    for row in rows {
        table.push_row(row.iter().map(cell_value).collect());
    }
    Ok(table)
}

fn header_names(header: &[Data]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(header.len());
    for (index, cell) in header.iter().enumerate() {
        let base = match cell {
            Data::Empty => format!("Unnamed: {index}"),
            other => {
                let text = other.to_string();
                if text.trim().is_empty() {
                    format!("Unnamed: {index}")
                } else {
                    text
                }
            }
        };
        let mut name = base.clone();
        let mut suffix = 1;
        while names.contains(&name) {
            name = format!("{base}.{suffix}");
            suffix += 1;
        }
        names.push(name);
    }
    names
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(v) => Value::Int(*v),
        Data::Float(v) => Value::Float(*v),
        Data::Bool(v) => Value::Bool(*v),
        Data::String(v) => Value::Text(v.clone()),
        Data::DateTime(v) => v
            .as_datetime()
            .map(Value::DateTime)
            .unwrap_or_else(|| Value::Float(v.as_f64())),
        Data::DateTimeIso(v) => NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S%.f")
            .map(Value::DateTime)
            .or_else(|_| NaiveDate::parse_from_str(v, "%Y-%m-%d").map(Value::Date))
            .unwrap_or_else(|_| Value::Text(v.clone())),
        Data::DurationIso(v) => Value::Text(v.clone()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Date,
    DateTime,
}

impl ColumnKind {
    fn of(value: &Value) -> ColumnKind {
        match value {
            Value::Null => ColumnKind::Null,
            Value::Bool(_) => ColumnKind::Bool,
            Value::Int(_) => ColumnKind::Int,
            Value::Float(_) => ColumnKind::Float,
            Value::Text(_) => ColumnKind::Text,
            Value::Date(_) => ColumnKind::Date,
            Value::DateTime(_) => ColumnKind::DateTime,
        }
    }

    fn widen(self, other: ColumnKind) -> ColumnKind {
        use ColumnKind::*;
        match (self, other) {
            (Null, k) | (k, Null) => k,
            (a, b) if a == b => a,
            (Int, Float) | (Float, Int) => Float,
            (Date, DateTime) | (DateTime, Date) => DateTime,
            _ => Text,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            ColumnKind::Null | ColumnKind::Text => DataType::Utf8,
            ColumnKind::Bool => DataType::Boolean,
            ColumnKind::Int => DataType::Int64,
            ColumnKind::Float => DataType::Float64,
            ColumnKind::Date => DataType::Date32,
            ColumnKind::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }
}

fn column_kind(table: &Table, index: usize) -> ColumnKind {
    table
        .column(index)
        .fold(ColumnKind::Null, |kind, value| kind.widen(ColumnKind::of(value)))
}

pub fn column_kinds(table: &Table) -> Vec<ColumnKind> {
    (0..table.num_columns())
        .map(|index| column_kind(table, index))
        .collect()
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    (date - epoch).num_days() as i32
}

fn column_array(table: &Table, index: usize, kind: ColumnKind) -> ArrayRef {
    let values = table.column(index);
    match kind {
        ColumnKind::Null | ColumnKind::Text => Arc::new(StringArray::from(
            values.map(Value::render).collect::<Vec<_>>(),
        )),
        ColumnKind::Bool => Arc::new(BooleanArray::from(
            values
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Int => Arc::new(Int64Array::from(
            values
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Float => Arc::new(Float64Array::from(
            values
                .map(|v| match v {
                    Value::Int(i) => Some(*i as f64),
                    Value::Float(f) if !f.is_nan() => Some(*f),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::Date => Arc::new(Date32Array::from(
            values
                .map(|v| match v {
                    Value::Date(d) => Some(days_since_epoch(*d)),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
        ColumnKind::DateTime => Arc::new(TimestampMicrosecondArray::from(
            values
                .map(|v| match v {
                    Value::DateTime(dt) => Some(dt.and_utc().timestamp_micros()),
                    Value::Date(d) => Some(d.and_time(Default::default()).and_utc().timestamp_micros()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )),
    }
}

/// Column types are inferred from the non-null values; mixed columns fall back to text.
pub fn table_to_record_batch(table: &Table) -> Result<RecordBatch> {
    record_batch_with_kinds(table, &column_kinds(table))
}

pub fn record_batch_with_kinds(table: &Table, kinds: &[ColumnKind]) -> Result<RecordBatch> {
    if kinds.len() != table.num_columns() {
        anyhow::bail!(
            "{} column kinds for {} columns",
            kinds.len(),
            table.num_columns()
        );
    }

    let schema = Arc::new(Schema::new(
        table
            .columns
            .iter()
            .zip(kinds)
            .map(|(name, kind)| ArrowField::new(name, kind.data_type(), true))
            .collect::<Vec<_>>(),
    ));
    let arrays = kinds
        .iter()
        .enumerate()
        .map(|(index, kind)| column_array(table, index, *kind))
        .collect::<Vec<_>>();

    RecordBatch::try_new_with_options(
        schema,
        arrays,
        &RecordBatchOptions::new().with_row_count(Some(table.num_rows())),
    )
    .context("building record batch")
}

pub fn write_parquet(path: &Path, table: &Table) -> Result<()> {
    write_batch(path, &table_to_record_batch(table)?)
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataInventory {
    pub path: PathBuf,
    pub records: usize,
}

/// Every file below `root`, recursively, in path order.
pub fn scan_metadata(root: &Path) -> Result<Vec<MetadataRecord>> {
    let mut records = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry
            .metadata()
            .with_context(|| format!("reading metadata of {}", entry.path().display()))?;
        let modified = meta
            .modified()
            .with_context(|| format!("reading mtime of {}", entry.path().display()))?;
        let modified_at = DateTime::<Local>::from(modified).naive_local();

        records.push(MetadataRecord {
            file_name: entry.file_name().to_string_lossy().into_owned(),
            folder: entry
                .path()
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            size_bytes: meta.len(),
            modified_at: modified_at.with_nanosecond(0).unwrap_or(modified_at),
        });
    }
    Ok(records)
}

/// Scan `root` and write the inventory as `<metadata_dir>/<output_name>`.
pub fn record_metadata(
    root: &Path,
    metadata_dir: &Path,
    output_name: &str,
) -> Result<MetadataInventory> {
    let records = scan_metadata(root)?;

    std::fs::create_dir_all(metadata_dir)
        .with_context(|| format!("creating {}", metadata_dir.display()))?;
    let path = metadata_dir.join(output_name);

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(["file_name", "folder", "size_bytes", "modified_at"])
        .with_context(|| format!("writing header of {}", path.display()))?;
    for record in &records {
        writer
            .serialize(record)
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;

    info!(records = records.len(), "metadata inventory written to {}", path.display());
    Ok(MetadataInventory {
        path,
        records: records.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use rust_xlsxwriter::Workbook;
    use tempfile::tempdir;

    struct FixedSource(Table);

    #[async_trait]
    impl TableSource for FixedSource {
        async fn fetch_table(&self, _query: &str) -> Result<Table> {
            Ok(self.0.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl TableSource for DownSource {
        async fn fetch_table(&self, _query: &str) -> Result<Table> {
            anyhow::bail!("connection refused")
        }
    }

    fn parquet_rows(path: &Path) -> (usize, Arc<Schema>) {
        let file = File::open(path).expect("open parquet");
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).expect("reader builder");
        let schema = builder.schema().clone();
        let rows = builder
            .build()
            .expect("reader")
            .map(|batch| batch.expect("batch").num_rows())
            .sum();
        (rows, schema)
    }

    fn sample_table() -> Table {
        let mut table = Table::new(vec![
            "id".into(),
            "customer".into(),
            "amount".into(),
            "placed_on".into(),
        ]);
        let day = NaiveDate::from_ymd_opt(2026, 1, 15).expect("date");
        table.push_row(vec![
            Value::Int(1),
            Value::Text("ana".into()),
            Value::Float(10.5),
            Value::Date(day),
        ]);
        table.push_row(vec![Value::Int(2), Value::Null, Value::Int(3), Value::Date(day)]);
        table.push_row(vec![
            Value::Int(3),
            Value::Text("luis".into()),
            Value::Float(7.0),
            Value::Null,
        ]);
        table
    }

    fn write_workbook(path: &Path, rows: &[&[Option<&str>]]) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if let Some(text) = cell {
                    match text.parse::<f64>() {
                        Ok(n) => sheet.write_number(r as u32, c as u16, n).expect("number"),
                        Err(_) => sheet.write_string(r as u32, c as u16, *text).expect("string"),
                    };
                }
            }
        }
        workbook.save(path).expect("save workbook");
    }

    #[test]
    fn parquet_schema_follows_value_types() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("orders_raw.parquet");
        write_parquet(&path, &sample_table()).expect("write");

        let (rows, schema) = parquet_rows(&path);
        assert_eq!(rows, 3);
        assert_eq!(schema.field(0).data_type(), &DataType::Int64);
        assert_eq!(schema.field(1).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(2).data_type(), &DataType::Float64);
        assert_eq!(schema.field(3).data_type(), &DataType::Date32);
    }

    #[test]
    fn mixed_columns_fall_back_to_text() {
        let mut table = Table::new(vec!["code".into()]);
        table.push_row(vec![Value::Int(7)]);
        table.push_row(vec![Value::Text("A-7".into())]);
        let batch = table_to_record_batch(&table).expect("batch");
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Utf8);
    }

    #[test]
    fn empty_tables_still_write() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("empty_raw.parquet");
        write_parquet(&path, &Table::new(vec!["id".into()])).expect("write");
        assert_eq!(parquet_rows(&path).0, 0);
    }

    #[tokio::test]
    async fn sql_extract_writes_raw_and_clean() {
        let dir = tempdir().expect("tempdir");
        let source = FixedSource(sample_table());
        let pair = extract_sql_table(&source, "SELECT * FROM orders", "sql_table", dir.path())
            .await
            .expect("pair");

        assert_eq!(pair.raw, dir.path().join("sql_table_raw.parquet"));
        assert_eq!(parquet_rows(&pair.raw).0, 3);
        assert_eq!(parquet_rows(&pair.clean).0, 1);
    }

    fn parquet_batch(path: &Path) -> RecordBatch {
        let file = File::open(path).expect("open parquet");
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .expect("reader builder")
            .build()
            .expect("reader");
        let mut batches = reader.map(|b| b.expect("batch")).collect::<Vec<_>>();
        assert_eq!(batches.len(), 1, "small fixtures fit in one batch");
        batches.remove(0)
    }

    #[test]
    fn clean_keeps_the_raw_schema_when_widening_rows_are_dropped() {
        let dir = tempdir().expect("tempdir");
        let mut table = Table::new(vec!["code".into(), "qty".into(), "note".into()]);
        table.push_row(vec![
            Value::Int(7),
            Value::Int(5),
            Value::Text("ok".into()),
        ]);
        table.push_row(vec![
            Value::Text("A-7".into()),
            Value::Float(2.5),
            Value::Null,
        ]);
        let pair = ExtractPair::for_stem(dir.path(), "codes");
        write_extract(&table, &pair).expect("write");

        let raw = parquet_batch(&pair.raw);
        let clean = parquet_batch(&pair.clean);
        assert_eq!(raw.schema(), clean.schema());
        assert_eq!(raw.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(raw.schema().field(1).data_type(), &DataType::Float64);
        assert_eq!(clean.num_rows(), 1);

        let rows_of = |batch: &RecordBatch| {
            (0..batch.num_rows())
                .map(|row| {
                    batch
                        .columns()
                        .iter()
                        .map(|col| format!("{:?}", col.slice(row, 1)))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>()
        };
        let raw_rows = rows_of(&raw);
        for row in rows_of(&clean) {
            assert!(raw_rows.contains(&row), "clean row {row:?} missing from raw");
        }
    }

    #[test]
    fn kinds_must_cover_every_column() {
        let table = Table::new(vec!["a".into(), "b".into()]);
        assert!(record_batch_with_kinds(&table, &[ColumnKind::Int]).is_err());
    }

    #[tokio::test]
    async fn sql_extract_failure_is_soft() {
        let dir = tempdir().expect("tempdir");
        let pair = extract_sql_table(&DownSource, "SELECT 1", "sql_table", dir.path()).await;
        assert!(pair.is_none());
        assert!(!dir.path().join("sql_table_raw.parquet").exists());
    }

    #[test]
    fn spreadsheet_failures_do_not_block_other_files() {
        let dir = tempdir().expect("tempdir");
        write_workbook(
            &dir.path().join("ventas.xlsx"),
            &[
                &[Some("id"), Some("region")],
                &[Some("1"), Some("norte")],
                &[Some("2"), None],
            ],
        );
        write_workbook(
            &dir.path().join("stock.xlsx"),
            &[&[Some("sku"), Some("qty")], &[Some("A1"), Some("4")]],
        );
        std::fs::write(dir.path().join("broken.xlsx"), b"not a zip archive").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"ignored").expect("write");

        let extensions = DEFAULT_SPREADSHEET_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>();
        let batch = extract_spreadsheets(dir.path(), &extensions);

        assert_eq!(
            batch.raw,
            vec![
                dir.path().join("stock_raw.parquet"),
                dir.path().join("ventas_raw.parquet"),
            ]
        );
        assert_eq!(batch.clean.len(), 2);
        assert_eq!(parquet_rows(&dir.path().join("ventas_raw.parquet")).0, 2);
        assert_eq!(parquet_rows(&dir.path().join("ventas_clean.parquet")).0, 1);
        assert_eq!(parquet_rows(&dir.path().join("stock_clean.parquet")).0, 1);
        assert!(!dir.path().join("broken_raw.parquet").exists());
    }

    #[test]
    fn missing_folder_yields_empty_batch() {
        let dir = tempdir().expect("tempdir");
        let batch = extract_spreadsheets(&dir.path().join("nope"), &["xlsx".to_string()]);
        assert!(batch.is_empty());
    }

    #[test]
    fn spreadsheet_extension_match_is_case_insensitive() {
        let exts = vec!["xlsx".to_string(), "xls".to_string()];
        assert!(is_spreadsheet(Path::new("a/REPORT.XLSX"), &exts));
        assert!(is_spreadsheet(Path::new("old.xls"), &exts));
        assert!(!is_spreadsheet(Path::new("report_raw.parquet"), &exts));
        assert!(!is_spreadsheet(Path::new("xlsx"), &exts));
    }

    #[test]
    fn header_names_are_unique_and_never_blank() {
        let header = vec![
            Data::String("id".into()),
            Data::Empty,
            Data::String("id".into()),
            Data::String("id".into()),
        ];
        assert_eq!(
            header_names(&header),
            vec!["id", "Unnamed: 1", "id.1", "id.2"]
        );
    }

    #[test]
    fn metadata_inventory_counts_nested_files() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("excels");
        std::fs::create_dir_all(root.join("2026/01")).expect("mkdir");
        std::fs::write(root.join("a.xlsx"), b"a").expect("write");
        std::fs::write(root.join("a_raw.parquet"), b"raw").expect("write");
        std::fs::write(root.join("2026/01/b.xlsx"), b"bbbb").expect("write");

        let inventory = record_metadata(&root, &dir.path().join("metadata"), "metadata_x.csv")
            .expect("inventory");
        assert_eq!(inventory.records, 3);

        let mut reader = csv::Reader::from_path(&inventory.path).expect("csv");
        assert_eq!(
            reader.headers().expect("headers").iter().collect::<Vec<_>>(),
            vec!["file_name", "folder", "size_bytes", "modified_at"]
        );
        let rows = reader
            .deserialize::<MetadataRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .expect("rows");
        let nested = rows.iter().find(|r| r.file_name == "b.xlsx").expect("nested");
        assert_eq!(nested.size_bytes, 4);
        assert!(nested.folder.ends_with("01"));
    }

    #[test]
    fn metadata_of_empty_root_has_header_only() {
        let dir = tempdir().expect("tempdir");
        let inventory = record_metadata(dir.path(), &dir.path().join("out"), "m.csv")
            .expect("inventory");
        assert_eq!(inventory.records, 0);
        let text = std::fs::read_to_string(&inventory.path).expect("read");
        assert_eq!(text, "file_name,folder,size_bytes,modified_at\n");
    }
}
