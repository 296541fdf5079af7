//! Three-level research field table with OECD / WoS code pairs.
//!
//! The table is read once at startup and only queried afterwards, so a
//! loaded [`TaxonomyStore`] can be shared between concurrent jobs without
//! locking.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::spreadsheet::{read_table, Table};

/// Written in place of a code when a narrow field name has no table match.
pub const UNRESOLVED_CODE: &str = "----";

const LEVEL1_HEADERS: &[&str] = &["1 уровень", "Level 1"];
const LEVEL2_HEADERS: &[&str] = &["2 уровень Русское наименование", "Level 2"];
const LEVEL3_HEADERS: &[&str] = &["3 уровень Русское наименование", "Level 3"];
const PRIMARY_CODE_HEADERS: &[&str] = &["Коды OECD", "OECD code", "OECD codes"];
const SECONDARY_CODE_HEADERS: &[&str] = &["Коды WoS", "WoS code", "WoS codes"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaxonomyRow {
    pub level1: String,
    pub level2: String,
    pub level3: String,
    pub code_primary: String,
    pub code_secondary: String,
}

impl TaxonomyRow {
    pub fn new(
        level1: &str,
        level2: &str,
        level3: &str,
        code_primary: &str,
        code_secondary: &str,
    ) -> Self {
        Self {
            level1: normalize_cell(level1),
            level2: normalize_cell(level2),
            level3: normalize_cell(level3),
            code_primary: normalize_cell(code_primary),
            code_secondary: normalize_cell(code_secondary),
        }
    }
}

/// One of the three nested strata of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaxonomyLevel {
    Broad,
    Sub,
    Narrow,
}

impl TaxonomyLevel {
    pub fn number(self) -> u8 {
        match self {
            Self::Broad => 1,
            Self::Sub => 2,
            Self::Narrow => 3,
        }
    }
}

impl fmt::Display for TaxonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {}", self.number())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldCode {
    Resolved { primary: String, secondary: String },
    Unresolved,
}

impl FieldCode {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }
}

impl fmt::Display for FieldCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved { primary, secondary } => {
                write!(f, "{}", format!("{primary} {secondary}").trim())
            }
            Self::Unresolved => f.write_str(UNRESOLVED_CODE),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TaxonomyStore {
    rows: Vec<TaxonomyRow>,
    /// Lowercased narrow name -> first matching row.
    code_index: HashMap<String, usize>,
}

impl TaxonomyStore {
    pub fn load(path: &Path) -> Result<Self> {
        let table = read_table(path).map_err(|err| {
            Error::Taxonomy(format!("read {}: {err}", path.display()))
        })?;
        let store = Self::from_table(&table)?;
        tracing::info!(
            component = "taxonomy",
            path = %path.display(),
            rows = store.rows.len(),
            broad_fields = store.level1_names().len(),
            "taxonomy loaded"
        );
        Ok(store)
    }

    pub fn from_table(table: &Table) -> Result<Self> {
        if table.headers.len() < 5 {
            return Err(Error::Taxonomy(format!(
                "expected at least 5 columns, found {}",
                table.headers.len()
            )));
        }
        let named = [
            LEVEL1_HEADERS,
            LEVEL2_HEADERS,
            LEVEL3_HEADERS,
            PRIMARY_CODE_HEADERS,
            SECONDARY_CODE_HEADERS,
        ]
        .map(|names| (names[0], table.column(names)));
        let columns: [usize; 5] = match named {
            [(_, Some(a)), (_, Some(b)), (_, Some(c)), (_, Some(d)), (_, Some(e))] => {
                [a, b, c, d, e]
            }
            _ if named.iter().all(|(_, column)| column.is_none()) => {
                tracing::debug!(
                    component = "taxonomy",
                    "taxonomy headers not recognised, using the first five columns"
                );
                [0, 1, 2, 3, 4]
            }
            _ => {
                let missing: Vec<&str> = named
                    .iter()
                    .filter(|(_, column)| column.is_none())
                    .map(|(name, _)| *name)
                    .collect();
                return Err(Error::Taxonomy(format!(
                    "missing column {}",
                    missing.join(", ")
                )));
            }
        };

        // Continuation rows may leave the broad column blank; they still
        // carry narrow names and codes.
        let rows: Vec<TaxonomyRow> = table
            .rows
            .iter()
            .map(|row| {
                TaxonomyRow::new(
                    table.cell(row, columns[0]),
                    table.cell(row, columns[1]),
                    table.cell(row, columns[2]),
                    table.cell(row, columns[3]),
                    table.cell(row, columns[4]),
                )
            })
            .filter(|row| !(row.level2.is_empty() && row.level3.is_empty()))
            .collect();
        if rows.is_empty() {
            return Err(Error::Taxonomy("taxonomy table has no data rows".to_string()));
        }
        Ok(Self::from_rows(rows))
    }

    pub fn from_rows(rows: Vec<TaxonomyRow>) -> Self {
        let mut code_index = HashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            if row.level3.is_empty() {
                continue;
            }
            code_index.entry(row.level3.to_lowercase()).or_insert(idx);
        }
        Self { rows, code_index }
    }

    pub fn rows(&self) -> &[TaxonomyRow] {
        &self.rows
    }

    /// Unique broad field names in table order.
    pub fn level1_names(&self) -> Vec<String> {
        unique_non_empty(self.rows.iter().map(|row| row.level1.as_str()))
    }

    /// Unique non-empty names one level below `parent_name`, in table order.
    ///
    /// `level` is the level of the parent. Narrow fields have no children.
    pub fn children_of(&self, level: TaxonomyLevel, parent_name: &str) -> Vec<String> {
        match level {
            TaxonomyLevel::Broad => unique_non_empty(
                self.rows
                    .iter()
                    .filter(|row| row.level1 == parent_name)
                    .map(|row| row.level2.as_str()),
            ),
            TaxonomyLevel::Sub => unique_non_empty(
                self.rows
                    .iter()
                    .filter(|row| row.level2 == parent_name)
                    .map(|row| row.level3.as_str()),
            ),
            TaxonomyLevel::Narrow => Vec::new(),
        }
    }

    /// Case-insensitive exact lookup of a narrow field's code pair.
    pub fn code_for(&self, level3_name: &str) -> FieldCode {
        let key = normalize_cell(level3_name).to_lowercase();
        match self.code_index.get(&key).and_then(|idx| self.rows.get(*idx)) {
            Some(row) => FieldCode::Resolved {
                primary: row.code_primary.clone(),
                secondary: row.code_secondary.clone(),
            },
            None => FieldCode::Unresolved,
        }
    }
}

/// Replaces embedded line breaks with single spaces so oracle output can be
/// matched against cells that were wrapped in the source workbook.
pub fn normalize_cell(value: &str) -> String {
    value
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}

fn unique_non_empty<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for name in names {
        if name.is_empty() || !seen.insert(name) {
            continue;
        }
        out.push(name.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TaxonomyStore {
        TaxonomyStore::from_rows(vec![
            TaxonomyRow::new("Natural sciences", "Physics", "Optics", "1.03", "SY"),
            TaxonomyRow::new("Natural sciences", "Physics", "Acoustics", "1.03", "AA"),
            TaxonomyRow::new("Natural sciences", "Chemistry", "Physical\nchemistry", "1.04", "EI"),
            TaxonomyRow::new("Engineering", "", "", "", ""),
            TaxonomyRow::new("Natural sciences", "Physics", "Optics", "9.99", "ZZ"),
        ])
    }

    #[test]
    fn level1_names_are_unique_in_table_order() {
        assert_eq!(store().level1_names(), vec!["Natural sciences", "Engineering"]);
    }

    #[test]
    fn children_are_unique_and_skip_empty_cells() {
        let store = store();
        assert_eq!(
            store.children_of(TaxonomyLevel::Broad, "Natural sciences"),
            vec!["Physics", "Chemistry"]
        );
        assert_eq!(
            store.children_of(TaxonomyLevel::Sub, "Physics"),
            vec!["Optics", "Acoustics"]
        );
        assert!(store.children_of(TaxonomyLevel::Broad, "Engineering").is_empty());
        assert!(store.children_of(TaxonomyLevel::Broad, "Unknown").is_empty());
        assert!(store.children_of(TaxonomyLevel::Narrow, "Optics").is_empty());
    }

    #[test]
    fn code_lookup_is_case_insensitive_and_idempotent() {
        let store = TaxonomyStore::from_rows(vec![TaxonomyRow::new(
            "Science", "Natural", "Physics", "OECD-1", "WOS-1",
        )]);
        let expected = store.code_for("Physics");
        assert_eq!(expected.to_string(), "OECD-1 WOS-1");
        assert_eq!(store.code_for("physics"), expected);
        assert_eq!(store.code_for("PHYSICS"), expected);
        assert_eq!(store.code_for("Physics"), expected);
    }

    #[test]
    fn first_matching_row_wins() {
        assert_eq!(store().code_for("optics").to_string(), "1.03 SY");
    }

    #[test]
    fn line_breaks_are_normalized_on_both_sides() {
        let store = store();
        assert_eq!(
            store.children_of(TaxonomyLevel::Sub, "Chemistry"),
            vec!["Physical chemistry"]
        );
        assert!(store.code_for("physical chemistry").is_resolved());
        assert!(store.code_for("Physical\nchemistry").is_resolved());
    }

    #[test]
    fn unknown_name_degrades_to_sentinel() {
        let code = store().code_for("Quantum Foo");
        assert_eq!(code, FieldCode::Unresolved);
        assert_eq!(code.to_string(), UNRESOLVED_CODE);
    }

    #[test]
    fn from_table_uses_named_columns() {
        let table = Table {
            headers: vec![
                "Коды WoS".into(),
                "Коды OECD".into(),
                "3 уровень Русское наименование".into(),
                "2 уровень Русское наименование".into(),
                "1 уровень".into(),
            ],
            rows: vec![vec![
                "WOS-1".into(),
                "OECD-1".into(),
                "Lasers".into(),
                "Optics".into(),
                "Physics".into(),
            ]],
        };
        let store = TaxonomyStore::from_table(&table).unwrap();
        assert_eq!(store.level1_names(), vec!["Physics"]);
        assert_eq!(store.code_for("lasers").to_string(), "OECD-1 WOS-1");
    }

    #[test]
    fn from_table_falls_back_to_positions() {
        let table = Table {
            headers: vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            rows: vec![vec![
                "Physics".into(),
                "Optics".into(),
                "Lasers".into(),
                "OECD-1".into(),
                "WOS-1".into(),
            ]],
        };
        let store = TaxonomyStore::from_table(&table).unwrap();
        assert_eq!(store.children_of(TaxonomyLevel::Broad, "Physics"), vec!["Optics"]);
    }

    #[test]
    fn malformed_tables_are_fatal() {
        let narrow = Table {
            headers: vec!["a".into(), "b".into()],
            rows: vec![vec!["x".into(), "y".into()]],
        };
        assert!(matches!(TaxonomyStore::from_table(&narrow), Err(Error::Taxonomy(_))));

        let empty = Table {
            headers: vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            rows: Vec::new(),
        };
        assert!(matches!(TaxonomyStore::from_table(&empty), Err(Error::Taxonomy(_))));
    }

    #[test]
    fn blank_broad_cell_keeps_continuation_row() {
        let table = Table {
            headers: vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
            rows: vec![
                vec!["Physics".into(), "Optics".into(), "Lasers".into(), "1.03".into(), "SY".into()],
                vec!["".into(), "Optics".into(), "Holography".into(), "1.03".into(), "SZ".into()],
            ],
        };
        let store = TaxonomyStore::from_table(&table).unwrap();
        assert_eq!(store.level1_names(), vec!["Physics"]);
        assert_eq!(
            store.children_of(TaxonomyLevel::Sub, "Optics"),
            vec!["Lasers", "Holography"]
        );
        assert_eq!(store.code_for("holography").to_string(), "1.03 SZ");
    }

    #[test]
    fn partially_recognised_headers_are_fatal() {
        let table = Table {
            headers: vec![
                "Коды WoS (2020)".into(),
                "Коды OECD".into(),
                "3 уровень Русское наименование".into(),
                "2 уровень Русское наименование".into(),
                "1 уровень".into(),
            ],
            rows: vec![vec![
                "SY".into(),
                "1.03".into(),
                "Lasers".into(),
                "Optics".into(),
                "Physics".into(),
            ]],
        };
        let err = TaxonomyStore::from_table(&table).unwrap_err();
        assert!(matches!(err, Error::Taxonomy(message) if message.contains("Коды WoS")));
    }

    #[test]
    fn missing_file_is_fatal() {
        let err = TaxonomyStore::load(Path::new("/nonexistent/kody.xlsx")).unwrap_err();
        assert!(matches!(err, Error::Taxonomy(_)));
    }
}
