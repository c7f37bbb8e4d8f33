//! Core tabular model and per-run records for lakeload.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "lakeload-core";

pub const PARQUET_EXTENSION: &str = "parquet";
pub const METADATA_EXTENSION: &str = "csv";
pub const METADATA_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// A single cell of an extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Nulls and NaN floats both count as missing.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            Value::DateTime(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        }
    }
}

/// In-memory extract: ordered column names plus ordered rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Rows are padded with nulls (or cut) to the column count.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[index])
    }

    /// The clean variant: every row holding at least one missing value is removed,
    /// nothing else changes.
    pub fn drop_missing(&self) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| !row.iter().any(Value::is_missing))
                .cloned()
                .collect(),
        }
    }
}

/// Local raw + clean files written for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractPair {
    pub raw: PathBuf,
    pub clean: PathBuf,
}

impl ExtractPair {
    /// `<dir>/<stem>_raw.parquet` and `<dir>/<stem>_clean.parquet`.
    pub fn for_stem(dir: &Path, stem: &str) -> Self {
        Self {
            raw: dir.join(raw_file_name(stem)),
            clean: dir.join(clean_file_name(stem)),
        }
    }
}

/// Outputs of one spreadsheet folder scan, one entry per processed file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpreadsheetBatch {
    pub raw: Vec<PathBuf>,
    pub clean: Vec<PathBuf>,
}

impl SpreadsheetBatch {
    pub fn push(&mut self, pair: ExtractPair) {
        self.raw.push(pair.raw);
        self.clean.push(pair.clean);
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

pub fn raw_file_name(stem: &str) -> String {
    format!("{stem}_raw.{PARQUET_EXTENSION}")
}

pub fn clean_file_name(stem: &str) -> String {
    format!("{stem}_clean.{PARQUET_EXTENSION}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Sql,
    Excel,
}

impl SourceKind {
    pub fn prefix(self) -> &'static str {
        match self {
            SourceKind::Sql => "sql",
            SourceKind::Excel => "excel",
        }
    }
}

/// One file headed for one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUnit {
    pub local_path: PathBuf,
    pub destination: String,
    pub container: String,
}

impl UploadUnit {
    /// Destination is `<kind prefix>/<local file name>`.
    pub fn for_file(kind: SourceKind, local_path: impl Into<PathBuf>, container: &str) -> Self {
        let local_path = local_path.into();
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            destination: format!("{}/{}", kind.prefix(), file_name),
            local_path,
            container: container.to_string(),
        }
    }
}

/// One row of the metadata inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub file_name: String,
    pub folder: String,
    pub size_bytes: u64,
    #[serde(with = "second_precision")]
    pub modified_at: NaiveDateTime,
}

mod second_precision {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let text = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&text, FORMAT).map_err(serde::de::Error::custom)
    }
}

/// `metadata_<YYYYMMDD_HHMMSS>.csv`
pub fn metadata_file_name<Tz: TimeZone>(generated_at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "metadata_{}.{METADATA_EXTENSION}",
        generated_at.format(METADATA_STAMP_FORMAT)
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}
