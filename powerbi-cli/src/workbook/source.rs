//! Read downloaded report exports
//!
//! A PowerBI export is a single-sheet workbook. Only its first sheet is used;
//! merged regions are expanded so every cell of a region carries the
//! top-left value before the column range is detected.

use std::collections::BTreeMap;
use std::io::Cursor;

use anyhow::{Context, Result};
use calamine::{Data, Reader, Xlsx};

use super::column::ColumnRange;

/// A cell value taken from a source report
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    /// Excel serial date
    DateTime(f64),
}

impl CellValue {
    /// Whitespace-only text counts as blank
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    fn from_data(data: &Data) -> Option<Self> {
        match data {
            Data::Empty => None,
            Data::Int(i) => Some(CellValue::Number(*i as f64)),
            Data::Float(f) => Some(CellValue::Number(*f)),
            Data::String(s) => Some(CellValue::Text(s.clone())),
            Data::Bool(b) => Some(CellValue::Bool(*b)),
            Data::DateTime(dt) => Some(CellValue::DateTime(dt.as_f64())),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
            Data::Error(e) => Some(CellValue::Text(e.to_string())),
        }
    }
}

/// First sheet of a downloaded report, as a sparse grid keyed by absolute (row, col)
#[derive(Debug, Clone, Default)]
pub struct SourceSheet {
    pub name: String,
    cells: BTreeMap<(u32, u32), CellValue>,
}

impl SourceSheet {
    /// Parse an xlsx byte stream and load its first sheet
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
            .context("Downloaded file is not a readable xlsx workbook")?;

        let name = workbook
            .sheet_names()
            .first()
            .context("Downloaded workbook has no sheets")?
            .clone();

        let range = workbook
            .worksheet_range(&name)
            .with_context(|| format!("Failed to read sheet: {}", name))?;

        let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
        let mut cells = BTreeMap::new();
        for (row, col, data) in range.used_cells() {
            if let Some(value) = CellValue::from_data(data) {
                cells.insert((row as u32 + row_offset, col as u32 + col_offset), value);
            }
        }

        let mut sheet = SourceSheet { name, cells };

        match workbook.worksheet_merge_cells(&sheet.name) {
            Some(Ok(merges)) => {
                for dims in merges {
                    sheet.unmerge(dims.start, dims.end);
                }
            }
            Some(Err(e)) => log::warn!("Could not read merged cells of '{}': {}", sheet.name, e),
            None => {}
        }

        log::debug!(
            "Loaded source sheet '{}' with {} cells",
            sheet.name,
            sheet.cells.len()
        );
        Ok(sheet)
    }

    /// Build a sheet directly from rows, starting at A1
    #[cfg(test)]
    pub fn from_rows<I, R>(name: impl Into<String>, rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = Option<CellValue>>,
    {
        let mut cells = BTreeMap::new();
        for (r, row) in rows.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                if let Some(value) = value {
                    cells.insert((r as u32, c as u32), value);
                }
            }
        }
        SourceSheet {
            name: name.into(),
            cells,
        }
    }

    /// Copy the top-left value of a merged region into every cell of it
    pub fn unmerge(&mut self, start: (u32, u32), end: (u32, u32)) {
        let Some(top_left) = self.cells.get(&start).cloned() else {
            return;
        };
        for row in start.0..=end.0 {
            for col in start.1..=end.1 {
                self.cells.insert((row, col), top_left.clone());
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cells.get(&(row, col))
    }

    /// Non-blank cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (u32, u32, &CellValue)> {
        self.cells
            .iter()
            .filter(|(_, v)| !v.is_blank())
            .map(|(&(r, c), v)| (r, c, v))
    }

    /// Contiguous column span covering every non-blank cell
    pub fn detect_column_range(&self) -> Option<ColumnRange> {
        let mut min_col: Option<u32> = None;
        let mut max_col: Option<u32> = None;

        for (_, col, _) in self.cells() {
            min_col = Some(min_col.map_or(col, |m| m.min(col)));
            max_col = Some(max_col.map_or(col, |m| m.max(col)));
        }

        Some(ColumnRange::new(min_col?, max_col?))
    }
}
