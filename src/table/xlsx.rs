use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Format, Workbook};

use super::{Cell, InvestorRecord, InvestorTable};
use crate::error::TableError;

/// Reads the first worksheet. Row one is the header; blank rows are dropped.
pub fn load(path: &Path) -> Result<InvestorTable, TableError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| TableError::Open {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| TableError::NoWorksheet(path.to_path_buf()))?
        .map_err(|e| TableError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let mut rows = range.rows();
    let columns: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(|c| to_cell(c).as_text()).collect(),
        None => Vec::new(),
    };

    let records = rows
        .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(|row| {
            let cells: HashMap<String, Cell> = columns
                .iter()
                .zip(row.iter())
                .filter(|(name, _)| !name.is_empty())
                .map(|(name, data)| (name.clone(), to_cell(data)))
                .collect();
            InvestorRecord::from_cells(cells)
        })
        .collect();

    tracing::debug!("Loaded investor table {:?} ({} columns)", path, columns.len());
    InvestorTable::new(columns, records)
}

/// Longest string a worksheet cell accepts.
const EXCEL_STRING_LIMIT: usize = 32_767;

/// Rewrites the whole workbook with a single sheet. Text longer than a cell
/// can hold is cut to fit so one oversized value cannot lose the whole save.
pub fn save(table: &InvestorTable, path: &Path) -> Result<(), TableError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let date = Format::new().set_num_format("yyyy-mm-dd");
    let date_time = Format::new().set_num_format("yyyy-mm-dd hh:mm:ss");

    for (col, name) in table.columns.iter().enumerate() {
        sheet.write_string(0, col as u16, name)?;
    }

    for (i, record) in table.rows.iter().enumerate() {
        let row = (i + 1) as u32;
        for (col, name) in table.columns.iter().enumerate() {
            let col = col as u16;
            match record.cell(name) {
                Cell::Empty => {}
                Cell::Text(s) => {
                    sheet.write_string(row, col, clamp(name, s))?;
                }
                Cell::Number(n) => {
                    sheet.write_number(row, col, n)?;
                }
                Cell::Bool(b) => {
                    sheet.write_boolean(row, col, b)?;
                }
                Cell::DateTime(serial) => {
                    let format = if serial.fract() == 0.0 { &date } else { &date_time };
                    sheet.write_number_with_format(row, col, serial, format)?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

fn clamp(column: &str, text: String) -> String {
    if text.chars().count() <= EXCEL_STRING_LIMIT {
        return text;
    }
    tracing::warn!("Truncating oversized value in column {}", column);
    text.chars().take(EXCEL_STRING_LIMIT).collect()
}

fn to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::text(s),
        Data::Float(n) => Cell::Number(*n),
        Data::Int(n) => Cell::Number(*n as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => Cell::DateTime(dt.as_f64()),
        other => Cell::text(&other.to_string()),
    }
}
