use std::io::Cursor;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::NaiveTime;
use thiserror::Error;
use tracing::debug;

use crate::models::{Cell, RawTable};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot open workbook {}: {source}", .path.display())]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("cannot parse csv {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{} has no non-empty sheet", .path.display())]
    NoData { path: PathBuf },
    #[error("unsupported file type for {} (expected xlsx, xls, xlsm, xlsb, ods or csv)", .path.display())]
    UnsupportedFormat { path: PathBuf },
}

/// The watch log plus the optional side sheets joined onto it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sources {
    pub watch: PathBuf,
    pub counts: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFormat {
    Workbook,
    Csv,
}

fn detect_format(path: &Path) -> Result<SourceFormat, LoadError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("xlsx" | "xlsm" | "xlsb" | "xls" | "ods") => Ok(SourceFormat::Workbook),
        Some("csv") => Ok(SourceFormat::Csv),
        _ => Err(LoadError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

/// Reads the whole file. A missing or unreadable file is a load failure.
pub fn read_source(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses file contents already in memory; `path` picks the format and
/// labels errors.
pub fn parse_raw_table(path: &Path, bytes: Vec<u8>) -> Result<RawTable, LoadError> {
    match detect_format(path)? {
        SourceFormat::Workbook => parse_workbook(path, bytes),
        SourceFormat::Csv => parse_csv(path, &bytes),
    }
}

fn parse_workbook(path: &Path, bytes: Vec<u8>) -> Result<RawTable, LoadError> {
    let workbook_error = |source| LoadError::Workbook {
        path: path.to_path_buf(),
        source,
    };
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(workbook_error)?;

    for sheet in workbook.sheet_names().to_vec() {
        let range = workbook.worksheet_range(&sheet).map_err(workbook_error)?;
        let mut rows = range.rows();
        let Some(header) = rows.next() else {
            continue;
        };
        if header.iter().all(|cell| convert_cell(cell) == Cell::Empty) {
            continue;
        }

        debug!(%sheet, rows = range.height().saturating_sub(1), "using sheet");
        let columns = header_names(header.iter().map(|cell| convert_cell(cell).text()));
        let rows = rows
            .map(|row| row.iter().map(convert_cell).collect())
            .collect();
        return Ok(RawTable::new(columns, rows));
    }

    Err(LoadError::NoData {
        path: path.to_path_buf(),
    })
}

fn parse_csv(path: &Path, bytes: &[u8]) -> Result<RawTable, LoadError> {
    let csv_error = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    // Legacy exports are often not UTF-8; bad bytes decode to U+FFFD instead
    // of failing the whole file.
    let headers = reader.byte_headers().map_err(csv_error)?.clone();
    let headers: Vec<String> = headers
        .iter()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect();
    if headers.iter().all(|name| name.trim().is_empty()) {
        return Err(LoadError::NoData {
            path: path.to_path_buf(),
        });
    }
    let columns = header_names(headers.into_iter().map(Some));

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(csv_error)?;
        rows.push(
            record
                .iter()
                .map(|value| {
                    let value = String::from_utf8_lossy(value);
                    if value.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(value.into_owned())
                    }
                })
                .collect(),
        );
    }
    Ok(RawTable::new(columns, rows))
}

/// Trims headers and names blank ones `column_<n>`.
fn header_names(headers: impl Iterator<Item = Option<String>>) -> Vec<String> {
    headers
        .enumerate()
        .map(|(idx, name)| {
            let name = name.map(|name| name.trim().to_string()).unwrap_or_default();
            if name.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                name
            }
        })
        .collect()
}

fn convert_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => Cell::Empty,
        Data::String(value) if value.trim().is_empty() => Cell::Empty,
        Data::String(value) => Cell::Text(value.clone()),
        Data::Float(value) => Cell::Number(*value),
        Data::Int(value) => Cell::Number(*value as f64),
        Data::Bool(value) => Cell::Bool(*value),
        // Serials below one day carry only a time of day.
        Data::DateTime(value) if value.as_f64() < 0.0 => Cell::Empty,
        Data::DateTime(value) if value.as_f64() < 1.0 => {
            let seconds = (value.as_f64() * 86_400.0).round() as u32;
            NaiveTime::from_num_seconds_from_midnight_opt(seconds % 86_400, 0)
                .map_or(Cell::Empty, Cell::Time)
        }
        Data::DateTime(_) => cell.as_datetime().map_or(Cell::Empty, Cell::DateTime),
        Data::DateTimeIso(value) | Data::DurationIso(value) => Cell::Text(value.clone()),
        Data::Error(_) => Cell::Empty,
    }
}
