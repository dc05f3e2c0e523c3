use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};
use crate::mail::MailDate;

/// Day zero of spreadsheet serial dates
fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// One typed cell of a written row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "UPPERCASE")]
pub enum CellValue {
    /// Days since 1899-12-30, fractional part is the time of day
    Date(f64),
    Number(f64),
    String(String),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::String(s.into())
    }

    pub fn blank() -> Self {
        CellValue::String(String::new())
    }

    /// Sheet date for a mail date; unknown dates are written blank
    pub fn date(date: &MailDate) -> Self {
        match date.as_datetime() {
            Some(dt) => CellValue::Date(to_serial(dt.naive_local())),
            None => CellValue::blank(),
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            CellValue::String(s) => s.clone(),
            CellValue::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Date(serial) => from_serial(*serial)
                .map(|d| d.format("%m/%d/%Y").to_string())
                .unwrap_or_default(),
        }
    }

    /// Whole number in the cell. Blank text reads as zero.
    pub fn as_count(&self) -> Option<i64> {
        match self {
            CellValue::Number(n) => Some(*n as i64),
            CellValue::String(s) if s.trim().is_empty() => Some(0),
            CellValue::String(s) => s.trim().parse().ok(),
            CellValue::Date(_) => None,
        }
    }

    pub fn as_date(&self, offset: FixedOffset) -> MailDate {
        match self {
            CellValue::Date(serial) | CellValue::Number(serial) => from_serial(*serial)
                .and_then(|naive| naive.and_local_timezone(offset).single())
                .map(MailDate::Known)
                .unwrap_or(MailDate::Unknown),
            CellValue::String(s) => MailDate::parse(s, offset),
        }
    }
}

pub fn to_serial(naive: NaiveDateTime) -> f64 {
    let delta = naive - epoch();
    delta.num_seconds() as f64 / 86_400.0
}

pub fn from_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let seconds = (serial * 86_400.0).round();
    if seconds.abs() >= i64::MAX as f64 {
        return None;
    }
    epoch().checked_add_signed(Duration::try_seconds(seconds as i64)?)
}

/// Spreadsheet the run reads reference data from and writes results to
pub trait SheetStore {
    /// Rows of a named range, or of a whole sheet when no range has that name
    fn read_range(&self, range: &str) -> Result<Vec<Vec<CellValue>>>;

    /// Insert `values` as a new column at `index`, one value per row
    fn insert_column(&mut self, sheet: &str, index: usize, values: &[CellValue]) -> Result<()>;

    /// Replace every row below the header and sort the new rows by name
    fn replace_rows(&mut self, sheet: &str, rows: Vec<Vec<CellValue>>) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkbookFile {
    #[serde(default)]
    sheets: BTreeMap<String, Vec<Vec<CellValue>>>,
    #[serde(default)]
    named_ranges: BTreeMap<String, Vec<Vec<CellValue>>>,
}

/// A workbook kept as a local JSON document. Every change is written
/// through to disk.
#[derive(Debug)]
pub struct JsonWorkbook {
    path: PathBuf,
    file: WorkbookFile,
}

impl JsonWorkbook {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| StatsError::store(path.display().to_string(), e))?;
        let file: WorkbookFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| StatsError::store(path.display().to_string(), e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Start an empty workbook at `path`; nothing is written until the first change
    pub fn create(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: WorkbookFile::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheet(&self, name: &str) -> Option<&[Vec<CellValue>]> {
        self.file.sheets.get(name).map(|rows| rows.as_slice())
    }

    pub fn set_sheet(&mut self, name: &str, rows: Vec<Vec<CellValue>>) -> Result<()> {
        self.file.sheets.insert(name.to_string(), rows);
        self.save()
    }

    pub fn set_named_range(&mut self, name: &str, rows: Vec<Vec<CellValue>>) -> Result<()> {
        self.file.named_ranges.insert(name.to_string(), rows);
        self.save()
    }

    fn store_name(&self) -> String {
        self.path.display().to_string()
    }

    fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| StatsError::store(self.store_name(), e))?;

        let tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| StatsError::store(self.store_name(), e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, &self.file)?;
            writer.flush()?;
        }
        tmp.persist(&self.path)
            .map_err(|e| StatsError::store(self.store_name(), e.error))?;
        Ok(())
    }
}

impl SheetStore for JsonWorkbook {
    fn read_range(&self, range: &str) -> Result<Vec<Vec<CellValue>>> {
        self.file
            .named_ranges
            .get(range)
            .or_else(|| self.file.sheets.get(range))
            .cloned()
            .ok_or_else(|| {
                StatsError::store(self.store_name(), format!("no sheet or range named '{range}'"))
            })
    }

    fn insert_column(&mut self, sheet: &str, index: usize, values: &[CellValue]) -> Result<()> {
        let rows = self.file.sheets.entry(sheet.to_string()).or_default();
        if rows.len() < values.len() {
            rows.resize_with(values.len(), Vec::new);
        }
        for (i, row) in rows.iter_mut().enumerate() {
            if row.len() < index {
                row.resize_with(index, CellValue::blank);
            }
            let value = values.get(i).cloned().unwrap_or_else(CellValue::blank);
            row.insert(index, value);
        }
        self.save()
    }

    fn replace_rows(&mut self, sheet: &str, mut rows: Vec<Vec<CellValue>>) -> Result<()> {
        let store = self.store_name();
        let existing = self
            .file
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| StatsError::store(store, format!("no sheet named '{sheet}'")))?;

        rows.sort_by_key(|row| row.first().map(|c| c.as_text().to_lowercase()).unwrap_or_default());
        existing.truncate(1);
        existing.extend(rows);
        self.save()
    }
}
