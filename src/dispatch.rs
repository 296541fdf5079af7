//! Routes a job to one of the four pipelines.
//!
//! A job is an input source (author identifier or uploaded laboratory
//! document) crossed with a processing mode (taxonomy resolution or
//! competency summary). Each combination has exactly one entry point.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::assembler::{
    author_artifact_path, author_taxonomy_sheet, document_artifact_path, lab_taxonomy_sheet,
    summary_sheet, write_sheet, AnnotationRows, PaperRows, AUTHOR_SUMMARY_HEADERS,
    LAB_SUMMARY_HEADERS,
};
use crate::candidates::CandidatePipeline;
use crate::config::{OracleSettings, PathSettings, ScholarSettings};
use crate::documents::read_lab_document;
use crate::error::{Error, Result};
use crate::oracle::{OpenAiOracle, Oracle, TokenUsage};
use crate::prompts::PromptSet;
use crate::resolver::HierarchicalResolver;
use crate::scholar::{AuthorProfile, PaperSource, ScholarClient};
use crate::taxonomy::TaxonomyStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSource {
    Identifier(u64),
    Document(PathBuf),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum ProcessingMode {
    /// Three-level OECD field classification with codes.
    #[value(name = "taxonomy", alias = "oecd")]
    TaxonomyResolution,
    /// Competency list merged from per-annotation candidates.
    #[value(name = "candidates", alias = "gpt")]
    CandidateSummary,
}

impl ProcessingMode {
    pub const ALL: [ProcessingMode; 2] = [Self::CandidateSummary, Self::TaxonomyResolution];

    /// File name suffix of the mode's artifact.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::TaxonomyResolution => "oecd",
            Self::CandidateSummary => "gpt",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::TaxonomyResolution => "OECD field codes",
            Self::CandidateSummary => "Competency summary",
        }
    }

    pub fn callback_data(self) -> &'static str {
        match self {
            Self::TaxonomyResolution => "mode:taxonomy",
            Self::CandidateSummary => "mode:candidates",
        }
    }

    pub fn from_callback_data(data: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.callback_data() == data)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub user_id: i64,
    pub source: InputSource,
    pub mode: ProcessingMode,
}

/// Shared, read-only collaborators of every pipeline.
pub struct Services {
    pub taxonomy: Arc<TaxonomyStore>,
    pub oracle: Arc<dyn Oracle>,
    pub papers: Arc<dyn PaperSource>,
    pub prompts: PromptSet,
    pub files_dir: PathBuf,
}

impl Services {
    pub fn from_settings(
        paths: &PathSettings,
        oracle: &OracleSettings,
        scholar: &ScholarSettings,
    ) -> Result<Self> {
        let taxonomy = TaxonomyStore::load(&paths.taxonomy_path)?;
        let prompts = PromptSet::load(paths.prompts_path.as_deref())?;
        Ok(Self {
            taxonomy: Arc::new(taxonomy),
            oracle: Arc::new(OpenAiOracle::new(oracle)?),
            papers: Arc::new(ScholarClient::new(scholar)?),
            prompts,
            files_dir: paths.files_dir.clone(),
        })
    }
}

/// Runs the pipeline selected by the job and returns the artifact path.
pub fn run_job(services: &Services, job: &Job) -> Result<PathBuf> {
    let span = tracing::info_span!("job", user_id = job.user_id, mode = job.mode.suffix());
    let _entered = span.enter();
    let started = Instant::now();

    let path = match (&job.source, job.mode) {
        (InputSource::Identifier(author_id), ProcessingMode::TaxonomyResolution) => {
            author_taxonomy(services, job.user_id, *author_id)
        }
        (InputSource::Identifier(author_id), ProcessingMode::CandidateSummary) => {
            author_candidates(services, job.user_id, *author_id)
        }
        (InputSource::Document(path), ProcessingMode::TaxonomyResolution) => {
            document_taxonomy(services, path)
        }
        (InputSource::Document(path), ProcessingMode::CandidateSummary) => {
            document_candidates(services, path)
        }
    }?;

    tracing::info!(
        component = "dispatch",
        path = %path.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "job finished"
    );
    Ok(path)
}

fn fetch_author(services: &Services, author_id: u64) -> Result<AuthorProfile> {
    let profile = services.papers.author_profile(author_id)?;
    if !profile.has_text() {
        return Err(Error::NothingToClassify(format!(
            "author {author_id} has no papers with abstracts"
        )));
    }
    Ok(profile)
}

fn log_usage(phase: &str, usage: TokenUsage) {
    tracing::info!(
        component = "dispatch",
        phase,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        "oracle usage"
    );
}

fn author_taxonomy(services: &Services, user_id: i64, author_id: u64) -> Result<PathBuf> {
    let profile = fetch_author(services, author_id)?;
    let resolver =
        HierarchicalResolver::new(&services.taxonomy, services.oracle.as_ref(), &services.prompts);

    let mut usage = TokenUsage::default();
    let mut papers = Vec::with_capacity(profile.papers.len());
    for paper in &profile.papers {
        tracing::info!(component = "dispatch", paper_id = %paper.paper_id, "classifying paper");
        let resolved = resolver.resolve_to_rows(&paper.classification_text())?;
        usage += resolved.usage;
        papers.push(PaperRows {
            paper: paper.clone(),
            rows: resolved.rows,
        });
    }
    log_usage("taxonomy", usage);

    let path = author_artifact_path(
        &services.files_dir,
        user_id,
        author_id,
        ProcessingMode::TaxonomyResolution,
    );
    write_sheet(&author_taxonomy_sheet(&profile, &papers), &path)
}

fn author_candidates(services: &Services, user_id: i64, author_id: u64) -> Result<PathBuf> {
    let profile = fetch_author(services, author_id)?;
    let pipeline = CandidatePipeline::new(services.oracle.as_ref(), &services.prompts);
    let summaries = pipeline.run(&[profile.to_entity()])?;
    log_usage("candidates", summaries.usage);

    let path = author_artifact_path(
        &services.files_dir,
        user_id,
        author_id,
        ProcessingMode::CandidateSummary,
    );
    write_sheet(&summary_sheet(AUTHOR_SUMMARY_HEADERS, &summaries), &path)
}

fn document_taxonomy(services: &Services, document: &Path) -> Result<PathBuf> {
    let labs = read_lab_document(document)?;
    let resolver =
        HierarchicalResolver::new(&services.taxonomy, services.oracle.as_ref(), &services.prompts);

    let mut usage = TokenUsage::default();
    let mut annotations = Vec::new();
    for lab in &labs {
        tracing::info!(component = "dispatch", laboratory = %lab.name, "classifying laboratory");
        for annotation in &lab.annotations {
            let resolved = resolver.resolve_to_rows(&annotation.text)?;
            usage += resolved.usage;
            annotations.push(AnnotationRows {
                structure: lab.structure.clone(),
                laboratory: lab.name.clone(),
                annotation_number: annotation.number,
                rows: resolved.rows,
            });
        }
    }
    log_usage("taxonomy", usage);

    let path = document_artifact_path(
        &services.files_dir,
        document,
        ProcessingMode::TaxonomyResolution,
    );
    write_sheet(&lab_taxonomy_sheet(&annotations), &path)
}

fn document_candidates(services: &Services, document: &Path) -> Result<PathBuf> {
    let labs = read_lab_document(document)?;
    let entities: Vec<_> = labs.iter().map(|lab| lab.to_entity()).collect();
    let pipeline = CandidatePipeline::new(services.oracle.as_ref(), &services.prompts);
    let summaries = pipeline.run(&entities)?;
    log_usage("candidates", summaries.usage);

    let path = document_artifact_path(
        &services.files_dir,
        document,
        ProcessingMode::CandidateSummary,
    );
    write_sheet(&summary_sheet(LAB_SUMMARY_HEADERS, &summaries), &path)
}
