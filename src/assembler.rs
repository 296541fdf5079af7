//! Turns pipeline output into `.xlsx` artifacts.
//!
//! Nothing is kept in memory after a workbook is saved; callers hand the
//! returned path to whoever delivers the file.

use std::fs;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook};

use crate::candidates::SummaryBatch;
use crate::dispatch::ProcessingMode;
use crate::error::Result;
use crate::resolver::ResultRow;
use crate::scholar::{AuthorProfile, Paper};

pub const AUTHOR_TAXONOMY_HEADERS: &[&str] = &[
    "S2 author ID",
    "Author name",
    "Paper title",
    "Citation count",
    "Level 1",
    "Level 2",
    "Level 3",
    "OECD / WoS code",
];

pub const LAB_TAXONOMY_HEADERS: &[&str] = &[
    "Structure",
    "Laboratory / center",
    "Annotation number",
    "Level 1",
    "Level 2",
    "Level 3",
    "OECD / WoS code",
];

pub const AUTHOR_SUMMARY_HEADERS: &[&str] =
    &["Author name", "Competencies / research interests of the author"];

pub const LAB_SUMMARY_HEADERS: &[&str] = &[
    "Laboratory / center",
    "Competencies / research interests of the laboratory",
];

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sheet {
    pub headers: &'static [&'static str],
    pub rows: Vec<Vec<Cell>>,
}

/// Taxonomy rows for one of an author's papers.
#[derive(Clone, Debug)]
pub struct PaperRows {
    pub paper: Paper,
    pub rows: Vec<ResultRow>,
}

/// Taxonomy rows for one laboratory annotation.
#[derive(Clone, Debug)]
pub struct AnnotationRows {
    pub structure: String,
    pub laboratory: String,
    pub annotation_number: usize,
    pub rows: Vec<ResultRow>,
}

fn level_cells(row: &ResultRow) -> [Cell; 4] {
    [
        row.level1.as_str().into(),
        row.level2.as_str().into(),
        row.level3.as_str().into(),
        row.code.to_string().into(),
    ]
}

pub fn author_taxonomy_sheet(profile: &AuthorProfile, papers: &[PaperRows]) -> Sheet {
    let mut rows = Vec::new();
    for paper in papers {
        for row in &paper.rows {
            let mut cells = vec![
                Cell::Text(profile.author_id.to_string()),
                profile.name.as_str().into(),
                paper.paper.title.as_str().into(),
                Cell::Number(paper.paper.citation_count as f64),
            ];
            cells.extend(level_cells(row));
            rows.push(cells);
        }
    }
    Sheet {
        headers: AUTHOR_TAXONOMY_HEADERS,
        rows,
    }
}

pub fn lab_taxonomy_sheet(annotations: &[AnnotationRows]) -> Sheet {
    let mut rows = Vec::new();
    for annotation in annotations {
        for row in &annotation.rows {
            let mut cells = vec![
                annotation.structure.as_str().into(),
                annotation.laboratory.as_str().into(),
                Cell::Number(annotation.annotation_number as f64),
            ];
            cells.extend(level_cells(row));
            rows.push(cells);
        }
    }
    Sheet {
        headers: LAB_TAXONOMY_HEADERS,
        rows,
    }
}

pub fn summary_sheet(headers: &'static [&'static str], batch: &SummaryBatch) -> Sheet {
    Sheet {
        headers,
        rows: batch
            .summaries
            .iter()
            .map(|summary| {
                vec![
                    summary.entity.as_str().into(),
                    format_competencies(&summary.summary).into(),
                ]
            })
            .collect(),
    }
}

/// Strips list punctuation from a summary and puts one competency per line.
pub fn format_competencies(summary: &str) -> String {
    summary
        .replace("\n\"", "")
        .replace(['"', '[', ']'], "")
        .split([',', '\n'])
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn author_artifact_path(
    files_dir: &Path,
    user_id: i64,
    author_id: u64,
    mode: ProcessingMode,
) -> PathBuf {
    files_dir.join(format!("{user_id}_{author_id}_{}.xlsx", mode.suffix()))
}

pub fn document_artifact_path(files_dir: &Path, document: &Path, mode: ProcessingMode) -> PathBuf {
    let stem = document
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("document");
    files_dir.join(format!("{stem}_{}_total.xlsx", mode.suffix()))
}

pub fn write_sheet(sheet: &Sheet, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let wrap_format = Format::new().set_text_wrap();
    let worksheet = workbook.add_worksheet();

    for (col, header) in sheet.headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &header_format)?;
        worksheet.set_column_width(col as u16, 24.0)?;
    }
    for (idx, row) in sheet.rows.iter().enumerate() {
        let row_num = (idx + 1) as u32;
        for (col, cell) in row.iter().enumerate() {
            match cell {
                Cell::Text(text) if text.contains('\n') => {
                    worksheet.write_string_with_format(row_num, col as u16, text, &wrap_format)?;
                }
                Cell::Text(text) => {
                    worksheet.write_string(row_num, col as u16, text)?;
                }
                Cell::Number(value) => {
                    worksheet.write_number(row_num, col as u16, *value)?;
                }
            }
        }
    }
    workbook.save(path)?;

    tracing::info!(
        component = "assembler",
        path = %path.display(),
        rows = sheet.rows.len(),
        "artifact written"
    );
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use calamine::{open_workbook_auto, Data, Reader};

    use super::*;
    use crate::candidates::EntitySummary;
    use crate::oracle::TokenUsage;
    use crate::taxonomy::FieldCode;

    fn row(level3: &str, code: FieldCode) -> ResultRow {
        ResultRow {
            level1: "Physics".into(),
            level2: "Optics".into(),
            level3: level3.into(),
            code,
        }
    }

    #[test]
    fn competencies_are_one_per_line() {
        assert_eq!(
            format_competencies("[\"laser physics\", \"optics\",\n\"photonics\"]"),
            "laser physics\noptics\nphotonics"
        );
        assert_eq!(format_competencies("a, b"), "a\nb");
    }

    #[test]
    fn line_separated_answers_are_accepted() {
        assert_eq!(
            format_competencies("laser physics\n\n  optics , photonics\n"),
            "laser physics\noptics\nphotonics"
        );
        assert_eq!(format_competencies("[]"), "");
    }

    #[test]
    fn paths_carry_identity_and_mode_suffix() {
        let dir = Path::new("files");
        assert_eq!(
            author_artifact_path(dir, 77, 42, ProcessingMode::TaxonomyResolution),
            PathBuf::from("files/77_42_oecd.xlsx")
        );
        assert_eq!(
            author_artifact_path(dir, 77, 42, ProcessingMode::CandidateSummary),
            PathBuf::from("files/77_42_gpt.xlsx")
        );
        assert_eq!(
            document_artifact_path(dir, Path::new("files/77_labs.xlsx"), ProcessingMode::CandidateSummary),
            PathBuf::from("files/77_labs_gpt_total.xlsx")
        );
    }

    #[test]
    fn lab_sheet_has_one_row_per_result() {
        let sheet = lab_taxonomy_sheet(&[AnnotationRows {
            structure: "Institute".into(),
            laboratory: "Laser Lab".into(),
            annotation_number: 2,
            rows: vec![
                row(
                    "Lasers",
                    FieldCode::Resolved {
                        primary: "1.03".into(),
                        secondary: "SY".into(),
                    },
                ),
                row("Quantum Foo", FieldCode::Unresolved),
            ],
        }]);
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.rows[0].len(), LAB_TAXONOMY_HEADERS.len());
        assert_eq!(sheet.rows[0][6], Cell::Text("1.03 SY".into()));
        assert_eq!(sheet.rows[1][6], Cell::Text("----".into()));
        assert_eq!(sheet.rows[1][2], Cell::Number(2.0));
    }

    #[test]
    fn writes_readable_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("summary.xlsx");
        let batch = SummaryBatch {
            summaries: vec![EntitySummary {
                entity: "Laser Lab".into(),
                summary: "[lasers, optics]".into(),
            }],
            usage: TokenUsage::default(),
        };
        let written = write_sheet(&summary_sheet(LAB_SUMMARY_HEADERS, &batch), &path).unwrap();
        assert_eq!(written, path);

        let mut workbook = open_workbook_auto(&path).unwrap();
        let sheet_name = workbook.sheet_names()[0].clone();
        let range = workbook.worksheet_range(&sheet_name).unwrap();
        let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Data::String(LAB_SUMMARY_HEADERS[0].to_string()));
        assert_eq!(rows[1][0], Data::String("Laser Lab".to_string()));
        assert_eq!(rows[1][1], Data::String("lasers\noptics".to_string()));
    }
}
