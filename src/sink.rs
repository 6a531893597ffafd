//! Record aggregation and JSON/CSV persistence
//!
//! Every flush rewrites both files from the in-memory result set. Files are
//! written to a temporary sibling and renamed into place, so a failed flush
//! leaves the previous one readable.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ScraperError;
use crate::record::ExtractedRecord;

/// Ordered (column, cell) pairs of the CSV view.
pub type FlatRow = Vec<(String, String)>;

fn postal_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{5})\s+(.+)").expect("valid postal line regex"))
}

/// Columns derived from the address field in the CSV view.
pub const ADDRESS_COLUMNS: [&str; 3] = ["street", "zipcode", "city"];

/// Street, zipcode and city parsed from address lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub street: String,
    pub zipcode: String,
    pub city: String,
}

/// Split address lines on a final "NNNNN City" line.
///
/// Returns empty parts when the last line carries no five-digit code.
pub fn split_address(lines: &[&str]) -> AddressParts {
    let Some((last, rest)) = lines.split_last() else {
        return AddressParts::default();
    };
    let Some(caps) = postal_line().captures(last) else {
        return AddressParts::default();
    };
    AddressParts {
        street: rest.join(", "),
        zipcode: caps[1].to_string(),
        city: caps[2].trim().to_string(),
    }
}

/// CSV view of one record.
pub fn flatten_record(record: &ExtractedRecord, address_field: Option<&str>) -> FlatRow {
    let mut row = Vec::with_capacity(record.fields().len() + 4);
    row.push(("url".to_string(), record.url.clone()));

    for (name, value) in record.fields() {
        if Some(name.as_str()) == address_field {
            let lines = value.lines();
            let parts = split_address(&lines);
            if parts.zipcode.is_empty() && !lines.is_empty() {
                debug!("No postal line in address of {}", record.url);
            }
            row.push((name.clone(), lines.join(", ")));
            let [street, zipcode, city] = ADDRESS_COLUMNS;
            row.push((street.to_string(), parts.street));
            row.push((zipcode.to_string(), parts.zipcode));
            row.push((city.to_string(), parts.city));
        } else {
            row.push((name.clone(), value.joined()));
        }
    }
    row
}

/// Serialize rows as CSV. The header is the union of all row keys in the
/// order they first appear; missing cells are empty.
pub fn rows_to_csv(rows: &[FlatRow]) -> Result<Vec<u8>, ScraperError> {
    let mut header: Vec<&str> = Vec::new();
    for row in rows {
        for (key, _) in row {
            if !header.contains(&key.as_str()) {
                header.push(key);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    if !header.is_empty() {
        writer
            .write_record(&header)
            .map_err(|e| ScraperError::SerializationFailed(e.to_string()))?;
    }
    for row in rows {
        let cells = header.iter().map(|column| {
            row.iter()
                .find(|(key, _)| key == column)
                .map(|(_, cell)| cell.as_str())
                .unwrap_or("")
        });
        writer
            .write_record(cells)
            .map_err(|e| ScraperError::SerializationFailed(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ScraperError::SerializationFailed(e.to_string()))
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> ScraperError + '_ {
    move |source| ScraperError::FileWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

/// Replace `path` with `contents` via a temporary sibling file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ScraperError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err(parent))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, contents).map_err(write_err(&tmp))?;
    std::fs::rename(&tmp, path).map_err(write_err(path))?;
    Ok(())
}

/// Serialize `value` as JSON and write it atomically.
pub fn write_json<T>(path: &Path, value: &T) -> Result<(), ScraperError>
where
    T: Serialize + ?Sized,
{
    let bytes =
        serde_json::to_vec(value).map_err(|e| ScraperError::SerializationFailed(e.to_string()))?;
    write_atomic(path, &bytes)
}

/// Persist the URL collection of a listing walk.
pub fn write_url_list(path: &Path, urls: &[String]) -> Result<(), ScraperError> {
    write_json(path, urls)?;
    debug!("Saved {} URLs to {}", urls.len(), path.display());
    Ok(())
}

/// What a flush wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistResult {
    pub records: usize,
    pub json_path: PathBuf,
    pub csv_path: PathBuf,
}

/// Owns the result set of a run and mirrors it to disk.
#[derive(Debug)]
pub struct RecordSink {
    json_path: PathBuf,
    csv_path: PathBuf,
    address_field: Option<String>,
    records: Vec<ExtractedRecord>,
    rows: Vec<FlatRow>,
}

impl RecordSink {
    /// Empty result set bound to its two output files.
    pub fn new(json_path: impl Into<PathBuf>, csv_path: impl Into<PathBuf>) -> Self {
        Self {
            json_path: json_path.into(),
            csv_path: csv_path.into(),
            address_field: None,
            records: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Field to split into street, zipcode and city in the CSV view.
    pub fn with_address_field(mut self, field: Option<String>) -> Self {
        self.address_field = field;
        self
    }

    pub fn records(&self) -> &[ExtractedRecord] {
        &self.records
    }

    pub fn rows(&self) -> &[FlatRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a record without touching the files.
    pub fn append(&mut self, record: ExtractedRecord) {
        let row = flatten_record(&record, self.address_field.as_deref());
        self.rows.push(row);
        self.records.push(record);
    }

    /// Rewrite both files from the current result set.
    pub fn flush(&self) -> Result<PersistResult, ScraperError> {
        let json = serde_json::to_vec(&self.records)
            .map_err(|e| ScraperError::SerializationFailed(e.to_string()))?;
        let csv = rows_to_csv(&self.rows)?;

        write_atomic(&self.json_path, &json)?;
        write_atomic(&self.csv_path, &csv)?;
        debug!(
            "Flushed {} records to {} and {}",
            self.records.len(),
            self.json_path.display(),
            self.csv_path.display()
        );

        Ok(PersistResult {
            records: self.records.len(),
            json_path: self.json_path.clone(),
            csv_path: self.csv_path.clone(),
        })
    }

    /// Append then flush.
    pub fn push(&mut self, record: ExtractedRecord) -> Result<PersistResult, ScraperError> {
        self.append(record);
        self.flush()
    }
}

fn json_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(json_cell)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Convert a JSON array of objects into CSV.
///
/// Without `output`, the CSV lands next to the input with a `.csv` extension.
pub fn convert_json_to_csv(input: &Path, output: Option<&Path>) -> Result<PathBuf, ScraperError> {
    let text = std::fs::read_to_string(input).map_err(|e| {
        ScraperError::InvalidInput(format!("cannot read {}: {}", input.display(), e))
    })?;
    let items: Vec<serde_json::Map<String, serde_json::Value>> = serde_json::from_str(&text)
        .map_err(|e| {
            ScraperError::InvalidInput(format!(
                "{} is not a JSON array of objects: {}",
                input.display(),
                e
            ))
        })?;

    let rows: Vec<FlatRow> = items
        .iter()
        .map(|item| {
            item.iter()
                .map(|(key, value)| (key.clone(), json_cell(value)))
                .collect()
        })
        .collect();

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension("csv"));
    write_atomic(&output, &rows_to_csv(&rows)?)?;
    info!("Converted {} rows to {}", rows.len(), output.display());
    Ok(output)
}
