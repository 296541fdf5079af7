//! Laboratory annotation spreadsheets uploaded by users.

use std::path::Path;

use crate::candidates::EntityAnnotations;
use crate::error::{Error, Result};
use crate::spreadsheet::{read_table, Table};

const LAB_NAME_HEADERS: &[&str] = &["Название лаборатории / центра", "Laboratory", "Laboratory / center"];
const STRUCTURE_HEADERS: &[&str] = &[
    "Название структуры, к которой относится лаборатория",
    "Structure",
];
const ANNOTATION_MARKERS: &[&str] = &["аннотация", "annotation"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Annotation {
    /// 1-based position among the document's annotation columns.
    pub number: usize,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabRecord {
    pub structure: String,
    pub name: String,
    pub annotations: Vec<Annotation>,
}

impl LabRecord {
    pub fn to_entity(&self) -> EntityAnnotations {
        EntityAnnotations {
            entity: self.name.clone(),
            annotations: self.annotations.iter().map(|a| a.text.clone()).collect(),
        }
    }
}

pub fn read_lab_document(path: &Path) -> Result<Vec<LabRecord>> {
    let table = read_table(path)?;
    let labs = labs_from_table(&table).map_err(|message| Error::spreadsheet(path, message))?;
    if labs.is_empty() {
        return Err(Error::NothingToClassify(format!(
            "no annotation text in {}",
            path.display()
        )));
    }
    tracing::info!(
        component = "documents",
        path = %path.display(),
        laboratories = labs.len(),
        annotations = labs.iter().map(|lab| lab.annotations.len()).sum::<usize>(),
        "laboratory document parsed"
    );
    Ok(labs)
}

fn labs_from_table(table: &Table) -> std::result::Result<Vec<LabRecord>, String> {
    let name_column = table
        .column(LAB_NAME_HEADERS)
        .ok_or_else(|| format!("missing laboratory name column '{}'", LAB_NAME_HEADERS[0]))?;
    let structure_column = table.column(STRUCTURE_HEADERS);
    let annotation_columns = table.columns_containing(ANNOTATION_MARKERS);
    if annotation_columns.is_empty() {
        return Err("no annotation columns found".to_string());
    }

    let mut labs = Vec::new();
    for row in &table.rows {
        let name = table.cell(row, name_column);
        if name.is_empty() {
            tracing::warn!(component = "documents", "skipping row without laboratory name");
            continue;
        }
        let annotations: Vec<Annotation> = annotation_columns
            .iter()
            .enumerate()
            .filter_map(|(idx, column)| {
                let text = table.cell(row, *column);
                (!text.is_empty()).then(|| Annotation {
                    number: idx + 1,
                    text: text.to_string(),
                })
            })
            .collect();
        if annotations.is_empty() {
            tracing::warn!(component = "documents", laboratory = %name, "laboratory has no annotations");
            continue;
        }
        labs.push(LabRecord {
            structure: structure_column
                .map(|column| table.cell(row, column).to_string())
                .unwrap_or_default(),
            name: name.to_string(),
            annotations,
        });
    }
    Ok(labs)
}
