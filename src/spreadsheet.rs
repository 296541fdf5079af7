//! Reading tabular input files into strings.
//!
//! Excel-family workbooks go through `calamine` (first worksheet only);
//! delimited text goes through `csv`. Either way the result is a header row
//! plus data rows padded to the header width.

use std::fs;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Index of the first header equal (ignoring case) to one of `names`.
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            self.headers
                .iter()
                .position(|header| header.trim().to_lowercase() == name.to_lowercase())
        })
    }

    /// Indices of every header containing one of `needles`, ignoring case.
    pub fn columns_containing(&self, needles: &[&str]) -> Vec<usize> {
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, header)| {
                let lower = header.to_lowercase();
                needles
                    .iter()
                    .any(|needle| lower.contains(&needle.to_lowercase()))
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn cell<'a>(&self, row: &'a [String], column: usize) -> &'a str {
        row.get(column).map(String::as_str).unwrap_or("")
    }
}

pub fn read_table(path: &Path) -> Result<Table> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    let mut table = match extension.as_str() {
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => read_workbook(path)?,
        "csv" => read_delimited(path, b',')?,
        "tsv" => read_delimited(path, b'\t')?,
        "txt" => read_delimited(path, sniff_delimiter(path)?)?,
        other => {
            return Err(Error::spreadsheet(
                path,
                format!("unsupported file extension '{other}'"),
            ))
        }
    };
    align_row_lengths(&mut table);
    Ok(table)
}

fn read_workbook(path: &Path) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| Error::spreadsheet(path, format!("open workbook: {err}")))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| Error::spreadsheet(path, "workbook has no worksheets"))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|err| Error::spreadsheet(path, format!("read worksheet '{sheet_name}': {err}")))?;

    let mut rows_iter = range.rows();
    let header_row = rows_iter
        .next()
        .ok_or_else(|| Error::spreadsheet(path, "worksheet is empty"))?;
    let headers = header_row
        .iter()
        .map(|cell| cell_to_string(cell).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for row in rows_iter {
        let values: Vec<String> = row
            .iter()
            .map(|cell| cell_to_string(cell).trim().to_string())
            .collect();
        if values.iter().all(|value| value.is_empty()) {
            continue;
        }
        rows.push(values);
    }
    Ok(Table { headers, rows })
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|err| Error::spreadsheet(path, format!("open: {err}")))?;

    let headers = reader
        .headers()
        .map_err(|err| Error::spreadsheet(path, format!("read headers: {err}")))?
        .iter()
        .map(|value| value.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| Error::spreadsheet(path, format!("read row: {err}")))?;
        let values: Vec<String> = record.iter().map(|value| value.trim().to_string()).collect();
        if values.iter().all(|value| value.is_empty()) {
            continue;
        }
        rows.push(values);
    }
    Ok(Table { headers, rows })
}

fn sniff_delimiter(path: &Path) -> Result<u8> {
    let raw = fs::read_to_string(path)?;
    let first_line = raw.lines().next().unwrap_or("");
    let tabs = first_line.matches('\t').count();
    let commas = first_line.matches(',').count();
    Ok(if tabs >= commas && tabs > 0 { b'\t' } else { b',' })
}

fn align_row_lengths(table: &mut Table) {
    let width = table
        .rows
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(table.headers.len()))
        .max()
        .unwrap_or(0);
    while table.headers.len() < width {
        table.headers.push(String::new());
    }
    for row in &mut table.rows {
        row.resize(width, String::new());
    }
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        Data::Int(value) => value.to_string(),
        Data::Float(value) => format_float(*value),
        Data::Bool(value) => value.to_string(),
        other => other.to_string(),
    }
}

/// Integral values are rendered without a fractional part, so a code cell
/// stored as `101.0` reads back as `101`.
fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_csv_and_skips_blank_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "labs.csv", "Name,Annotation 1\nOptics Lab,lasers\n,\nBio Lab,cells\n");
        let table = read_table(&path).unwrap();
        assert_eq!(table.headers, vec!["Name", "Annotation 1"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1], vec!["Bio Lab", "cells"]);
    }

    #[test]
    fn pads_short_rows_to_header_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "short.tsv", "a\tb\tc\n1\t2\n");
        let table = read_table(&path).unwrap();
        assert_eq!(table.rows[0], vec!["1", "2", ""]);
    }

    #[test]
    fn txt_files_sniff_tab_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "codes.txt", "a\tb\n1,5\t2\n");
        let table = read_table(&path).unwrap();
        assert_eq!(table.rows[0], vec!["1,5", "2"]);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "labs.pdf", "x");
        assert!(matches!(read_table(&path), Err(Error::Spreadsheet { .. })));
    }

    #[test]
    fn column_lookup_ignores_case() {
        let table = Table {
            headers: vec!["Lab Name".into(), "Annotation 1".into(), "ANNOTATION 2".into()],
            rows: Vec::new(),
        };
        assert_eq!(table.column(&["missing", "lab name"]), Some(0));
        assert_eq!(table.columns_containing(&["annotation"]), vec![1, 2]);
    }

    #[test]
    fn integral_floats_drop_fraction() {
        assert_eq!(format_float(101.0), "101");
        assert_eq!(format_float(1.25), "1.25");
    }
}
