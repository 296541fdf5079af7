//! Semantic Scholar author lookups.
//!
//! Only the author's most cited papers that carry an abstract are kept; the
//! title and abstract of each become the text that gets classified.

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::candidates::EntityAnnotations;
use crate::config::ScholarSettings;
use crate::error::{Error, Result};
use crate::retry::{RetryDecision, RetryError, RetryPolicy};

#[derive(Debug, Default, Deserialize)]
struct PapersResponse {
    #[serde(default)]
    data: Vec<PaperData>,
}

#[derive(Debug, Clone, Deserialize)]
struct PaperData {
    #[serde(rename = "paperId", default)]
    paper_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(rename = "citationCount", default)]
    citation_count: Option<u64>,
    #[serde(default)]
    authors: Vec<AuthorRef>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthorRef {
    #[serde(rename = "authorId", default)]
    author_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paper {
    pub paper_id: String,
    pub title: String,
    pub abstract_text: String,
    pub citation_count: u64,
}

impl Paper {
    /// Title followed by abstract.
    pub fn classification_text(&self) -> String {
        format!("{}\n{}", self.title, self.abstract_text)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorProfile {
    pub author_id: u64,
    pub name: String,
    pub papers: Vec<Paper>,
}

impl AuthorProfile {
    pub fn empty(author_id: u64) -> Self {
        Self {
            author_id,
            name: author_id.to_string(),
            papers: Vec::new(),
        }
    }

    pub fn has_text(&self) -> bool {
        !self.papers.is_empty()
    }

    /// The author's abstracts as annotations for the candidate pipeline.
    pub fn to_entity(&self) -> EntityAnnotations {
        EntityAnnotations {
            entity: self.name.clone(),
            annotations: self
                .papers
                .iter()
                .map(|paper| paper.abstract_text.clone())
                .collect(),
        }
    }
}

/// Source of an author's papers; an unreachable service yields an empty profile.
pub trait PaperSource: Send + Sync {
    fn author_profile(&self, author_id: u64) -> Result<AuthorProfile>;
}

#[derive(Debug)]
enum FetchError {
    Transport(reqwest::Error),
    Status(StatusCode),
    Decode(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Status(status) => write!(f, "status {status}"),
            Self::Decode(message) => write!(f, "decode error: {message}"),
        }
    }
}

fn classify_fetch_error(err: &FetchError) -> RetryDecision {
    match err {
        FetchError::Transport(_) => RetryDecision::Retry,
        FetchError::Status(status)
            if *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() =>
        {
            RetryDecision::Retry
        }
        FetchError::Status(_) | FetchError::Decode(_) => RetryDecision::Stop,
    }
}

pub struct ScholarClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    search_limit: usize,
    top_papers: usize,
    retry: RetryPolicy,
}

impl ScholarClient {
    pub fn new(settings: &ScholarSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent("research-fields-bot/0.1")
            .timeout(settings.timeout)
            .build()
            .map_err(|err| Error::Scholar(format!("build http client: {err}")))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            search_limit: settings.search_limit.max(1),
            top_papers: settings.top_papers.max(1),
            retry: settings.retry,
        })
    }

    fn papers_url(&self, author_id: u64) -> String {
        format!(
            "{}/author/{}/papers?fields=title,authors,citationCount,abstract&limit={}",
            self.base_url, author_id, self.search_limit
        )
    }

    fn fetch_once(&self, url: &str) -> std::result::Result<PapersResponse, FetchError> {
        let mut request = self.client.get(url);
        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key);
        }
        let response = request.send().map_err(FetchError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let body = response.text().map_err(FetchError::Transport)?;
        serde_json::from_str(&body).map_err(|err| FetchError::Decode(err.to_string()))
    }
}

impl PaperSource for ScholarClient {
    fn author_profile(&self, author_id: u64) -> Result<AuthorProfile> {
        let url = self.papers_url(author_id);
        let response = match self
            .retry
            .run("semantic_scholar", |_| self.fetch_once(&url), classify_fetch_error)
        {
            Ok(response) => response,
            Err(err) => {
                let attempts = err.attempts();
                let reason = match err {
                    RetryError::Exhausted { last, .. } => last.to_string(),
                    RetryError::Permanent(err) => err.to_string(),
                };
                tracing::error!(
                    component = "scholar",
                    author_id,
                    attempts,
                    error = %reason,
                    "author papers unavailable"
                );
                return Ok(AuthorProfile::empty(author_id));
            }
        };
        let profile = build_profile(author_id, response.data, self.top_papers);
        tracing::info!(
            component = "scholar",
            author_id,
            author = %profile.name,
            papers = profile.papers.len(),
            "author papers fetched"
        );
        Ok(profile)
    }
}

fn build_profile(author_id: u64, papers: Vec<PaperData>, top_papers: usize) -> AuthorProfile {
    let id = author_id.to_string();
    let name = papers
        .iter()
        .flat_map(|paper| paper.authors.iter())
        .find(|author| author.author_id.as_deref() == Some(id.as_str()))
        .and_then(|author| author.name.clone())
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| id.clone());

    let mut selected: Vec<Paper> = papers
        .into_iter()
        .filter_map(|paper| {
            let abstract_text = paper.abstract_text?.trim().to_string();
            if abstract_text.is_empty() {
                return None;
            }
            Some(Paper {
                paper_id: paper.paper_id.unwrap_or_default(),
                title: paper.title.unwrap_or_default().trim().to_string(),
                abstract_text,
                citation_count: paper.citation_count.unwrap_or(0),
            })
        })
        .collect();
    selected.sort_by(|a, b| b.citation_count.cmp(&a.citation_count));
    selected.truncate(top_papers);

    AuthorProfile {
        author_id,
        name,
        papers: selected,
    }
}
