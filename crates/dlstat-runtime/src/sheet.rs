//! Reporting workbook backed by a directory of CSV worksheets.
//!
//! Each worksheet lives in `<workbook>/<sheet>.csv` and holds one row per
//! day, the date in the first cell. New rows are queued with
//! [`SheetWriter::append_row`] and reach the file only through
//! [`SheetWriter::stage`] and [`SheetWriter::commit`]; the commit replaces the
//! sheet in one rename, so a failed update leaves it untouched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use dlstat_core::error::{DlStatError, Result};
use dlstat_core::formatting::{row_cells, Column, ValueMap};
use tempfile::NamedTempFile;
use tracing::debug;

// ── SheetWriter ───────────────────────────────────────────────────────────────

/// A worksheet that daily rows are appended to.
pub trait SheetWriter {
    fn name(&self) -> &str;

    /// Date in the first cell of the last row.
    fn last_date(&self) -> Result<NaiveDate>;

    /// Queue one row, taking each cell from `values` by column name; blank
    /// for placeholders and unmapped names.
    fn append_row(&mut self, columns: &[Column], values: &ValueMap) -> Result<()>;

    /// Prepare the queued rows without touching the sheet itself.
    fn stage(&mut self) -> Result<()>;

    /// Make the staged rows part of the sheet.
    fn commit(&mut self) -> Result<()>;
}

// ── CsvWorkbook ───────────────────────────────────────────────────────────────

/// A directory of CSV worksheets.
#[derive(Debug, Clone)]
pub struct CsvWorkbook {
    dir: PathBuf,
}

impl CsvWorkbook {
    /// Open an existing workbook directory.
    pub fn open(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(DlStatError::Sheet(format!(
                "workbook {} is not a directory",
                dir.display()
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// The named worksheet, which must already exist.
    pub fn sheet(&self, name: &str) -> Result<CsvSheet> {
        let path = self.dir.join(format!("{}.csv", name));
        if !path.is_file() {
            return Err(DlStatError::Sheet(format!(
                "no worksheet named {} in {}",
                name,
                self.dir.display()
            )));
        }
        Ok(CsvSheet {
            name: name.to_string(),
            dir: self.dir.clone(),
            path,
            pending: Vec::new(),
            staged: None,
        })
    }
}

// ── CsvSheet ──────────────────────────────────────────────────────────────────

/// One CSV worksheet.
#[derive(Debug)]
pub struct CsvSheet {
    name: String,
    dir: PathBuf,
    path: PathBuf,
    pending: Vec<Vec<String>>,
    staged: Option<NamedTempFile>,
}

impl CsvSheet {
    fn write_error(&self, source: std::io::Error) -> DlStatError {
        DlStatError::FileWrite {
            path: self.path.clone(),
            source,
        }
    }

    /// Current content, newline-terminated unless empty.
    fn existing_content(&self) -> Result<Vec<u8>> {
        let mut content = fs::read(&self.path).map_err(|source| DlStatError::FileRead {
            path: self.path.clone(),
            source,
        })?;
        if !content.is_empty() && !content.ends_with(b"\n") {
            content.push(b'\n');
        }
        Ok(content)
    }
}

impl SheetWriter for CsvSheet {
    fn name(&self) -> &str {
        &self.name
    }

    fn last_date(&self) -> Result<NaiveDate> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| DlStatError::from(e).in_file(&self.path))?;

        let mut last = None;
        for record in reader.records() {
            let record = record.map_err(|e| DlStatError::from(e).in_file(&self.path))?;
            if record.iter().any(|cell| !cell.trim().is_empty()) {
                last = Some(record);
            }
        }
        let last = last
            .ok_or_else(|| DlStatError::Sheet(format!("worksheet {} has no rows", self.name)))?;

        let first_cell = last.get(0).unwrap_or_default();
        NaiveDate::parse_from_str(first_cell.trim(), "%Y-%m-%d").map_err(|_| {
            DlStatError::Sheet(format!(
                "last row of worksheet {} does not start with a date: {:?}",
                self.name, first_cell
            ))
        })
    }

    fn append_row(&mut self, columns: &[Column], values: &ValueMap) -> Result<()> {
        let cells = row_cells(columns, values);
        debug!("Queued for {}: {:?}", self.name, cells);
        self.pending.push(cells);
        self.staged = None;
        Ok(())
    }

    fn stage(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let content = self.existing_content()?;

        let mut staged = NamedTempFile::new_in(&self.dir).map_err(|e| self.write_error(e))?;
        staged.write_all(&content).map_err(|e| self.write_error(e))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(staged.as_file_mut());
            for row in &self.pending {
                writer
                    .write_record(row)
                    .map_err(|e| DlStatError::from(e).in_file(&self.path))?;
            }
            writer.flush().map_err(|e| self.write_error(e))?;
        }

        let permissions = fs::metadata(&self.path)
            .map_err(|e| self.write_error(e))?
            .permissions();
        fs::set_permissions(staged.path(), permissions).map_err(|e| self.write_error(e))?;

        self.staged = Some(staged);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.staged.is_none() {
            self.stage()?;
        }
        if let Some(staged) = self.staged.take() {
            staged.persist(&self.path).map_err(|e| self.write_error(e.error))?;
        }
        debug!("Wrote {} row(s) to {}", self.pending.len(), self.name);
        self.pending.clear();
        Ok(())
    }
}
