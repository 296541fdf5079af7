use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use calamine::{open_workbook_auto, Data, Reader};
use tempfile::TempDir;

use research_fields_bot::oracle::{Oracle, OracleRequest, OracleResponse, TokenUsage};
use research_fields_bot::prompts::PromptSet;
use research_fields_bot::scholar::{AuthorProfile, PaperSource};
use research_fields_bot::taxonomy::TaxonomyStore;
use research_fields_bot::{run_job, Error, InputSource, Job, ProcessingMode, Services};

const TAXONOMY_CSV: &str = "\
Level 1,Level 2,Level 3,OECD code,WoS code
Natural sciences,Physical sciences,Optics,1.03,SY
Natural sciences,Physical sciences,Acoustics,1.03,AA
Natural sciences,Biological sciences,Cell biology,1.06,DR
Engineering,Mechanical engineering,Robotics,2.03,IQ
";

const LABS_CSV: &str = "\
Structure,Laboratory,Annotation 1,Annotation 2
Institute of Physics,Laser Lab,We build laser systems.,Quantum laser cooling.
Institute of Biology,Cell Lab,We study cell division.,
";

/// Field names each keyword leads to, broad to narrow.
const KEYWORDS: &[(&str, &[&str])] = &[
    ("laser", &["Natural sciences", "Physical sciences", "Optics"]),
    ("cell", &["Natural sciences", "Biological sciences", "Cell biology"]),
];

/// Classifies by keyword and answers the competency prompts from the text.
struct KeywordOracle {
    prompts: PromptSet,
    calls: AtomicUsize,
}

impl KeywordOracle {
    fn new() -> Self {
        Self {
            prompts: PromptSet::default(),
            calls: AtomicUsize::new(0),
        }
    }

    fn classify(&self, vocabulary: &str, text: &str) -> String {
        let text = text.to_lowercase();
        let vocabulary: Vec<&str> = vocabulary.lines().collect();
        let mut chosen: Vec<&str> = Vec::new();
        for (keyword, names) in KEYWORDS {
            if !text.contains(keyword) {
                continue;
            }
            for name in names.iter().copied().filter(|name| vocabulary.contains(name)) {
                if !chosen.contains(&name) {
                    chosen.push(name);
                }
            }
        }
        // A narrow name the table does not know.
        if text.contains("quantum") && vocabulary.contains(&"Optics") {
            chosen.push("Quantum optics");
        }
        chosen.join(", ")
    }
}

impl Oracle for KeywordOracle {
    fn complete(&self, request: &OracleRequest) -> research_fields_bot::Result<OracleResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = if let Some((_, vocabulary)) = request.system.split_once("Fields:\n") {
            self.classify(vocabulary, &request.user)
        } else if request.system == self.prompts.candidates {
            request.user.trim_end_matches('.').to_lowercase()
        } else {
            format!("[{}]", request.user.replace('\n', ", "))
        };
        Ok(OracleResponse {
            text,
            usage: TokenUsage::new(5, 1),
        })
    }
}

struct NoPapers;

impl PaperSource for NoPapers {
    fn author_profile(&self, author_id: u64) -> research_fields_bot::Result<AuthorProfile> {
        Ok(AuthorProfile::empty(author_id))
    }
}

struct Fixture {
    dir: TempDir,
    oracle: Arc<KeywordOracle>,
    services: Services,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let taxonomy_path = dir.path().join("taxonomy.csv");
        fs::write(&taxonomy_path, TAXONOMY_CSV).unwrap();
        let oracle = Arc::new(KeywordOracle::new());
        let services = Services {
            taxonomy: Arc::new(TaxonomyStore::load(&taxonomy_path).unwrap()),
            oracle: oracle.clone(),
            papers: Arc::new(NoPapers),
            prompts: PromptSet::default(),
            files_dir: dir.path().join("files"),
        };
        Self {
            dir,
            oracle,
            services,
        }
    }

    fn document(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn run(&self, source: InputSource, mode: ProcessingMode) -> research_fields_bot::Result<PathBuf> {
        run_job(
            &self.services,
            &Job {
                user_id: 7,
                source,
                mode,
            },
        )
    }
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut workbook = open_workbook_auto(path).unwrap();
    let sheet = workbook.sheet_names()[0].clone();
    let range = workbook.worksheet_range(&sheet).unwrap();
    range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::String(value) => value.clone(),
                    Data::Float(value) => value.to_string(),
                    Data::Int(value) => value.to_string(),
                    Data::Empty => String::new(),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect()
}

#[test]
fn lab_taxonomy_workbook_has_one_row_per_resolved_field() {
    let fixture = Fixture::new();
    let document = fixture.document("7_labs.csv", LABS_CSV);

    let path = fixture
        .run(InputSource::Document(document), ProcessingMode::TaxonomyResolution)
        .unwrap();
    assert_eq!(path, fixture.dir.path().join("files").join("7_labs_oecd_total.xlsx"));

    let rows = read_rows(&path);
    assert_eq!(
        rows[0],
        vec![
            "Structure",
            "Laboratory / center",
            "Annotation number",
            "Level 1",
            "Level 2",
            "Level 3",
            "OECD / WoS code"
        ]
    );
    let body: Vec<Vec<&str>> = rows[1..]
        .iter()
        .map(|row| row.iter().map(String::as_str).collect())
        .collect();
    assert_eq!(
        body,
        vec![
            vec!["Institute of Physics", "Laser Lab", "1", "Natural sciences", "Physical sciences", "Optics", "1.03 SY"],
            vec!["Institute of Physics", "Laser Lab", "2", "Natural sciences", "Physical sciences", "Optics", "1.03 SY"],
            vec!["Institute of Physics", "Laser Lab", "2", "Natural sciences", "Physical sciences", "Quantum optics", "----"],
            vec!["Institute of Biology", "Cell Lab", "1", "Natural sciences", "Biological sciences", "Cell biology", "1.06 DR"],
        ]
    );
    // Three rounds per annotation, one branch each.
    assert_eq!(fixture.oracle.calls.load(Ordering::SeqCst), 3 * 3);
}

#[test]
fn lab_summary_workbook_lists_competencies_per_laboratory() {
    let fixture = Fixture::new();
    let document = fixture.document("7_labs.csv", LABS_CSV);

    let path = fixture
        .run(InputSource::Document(document), ProcessingMode::CandidateSummary)
        .unwrap();
    assert_eq!(path, fixture.dir.path().join("files").join("7_labs_gpt_total.xlsx"));

    let rows = read_rows(&path);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1][0], "Laser Lab");
    assert_eq!(rows[1][1], "we build laser systems\nquantum laser cooling");
    assert_eq!(rows[2][0], "Cell Lab");
    assert_eq!(rows[2][1], "we study cell division");
    // Three annotations plus one summary per laboratory.
    assert_eq!(fixture.oracle.calls.load(Ordering::SeqCst), 3 + 2);
}

#[test]
fn document_without_annotations_fails_without_artifact() {
    let fixture = Fixture::new();
    let document = fixture.document("7_empty.csv", "Laboratory,Annotation 1\nLaser Lab,\n");

    for mode in ProcessingMode::ALL {
        let result = fixture.run(InputSource::Document(document.clone()), mode);
        assert!(matches!(result, Err(Error::NothingToClassify(_))));
    }
    assert_eq!(fixture.oracle.calls.load(Ordering::SeqCst), 0);
    assert!(!fixture.dir.path().join("files").exists());
}

#[test]
fn author_without_papers_fails_without_oracle_calls() {
    let fixture = Fixture::new();
    let result = fixture.run(InputSource::Identifier(42), ProcessingMode::TaxonomyResolution);
    assert!(matches!(result, Err(Error::NothingToClassify(_))));
    assert_eq!(fixture.oracle.calls.load(Ordering::SeqCst), 0);
}
