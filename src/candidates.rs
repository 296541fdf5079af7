//! Competency extraction: one candidate per annotation, then one merged
//! summary per entity.

use std::time::Instant;

use crate::error::Result;
use crate::oracle::{Oracle, OracleRequest, TokenUsage};
use crate::prompts::PromptSet;

/// Annotation texts belonging to one laboratory or author.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityAnnotations {
    pub entity: String,
    pub annotations: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityCandidates {
    pub entity: String,
    pub candidates: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CandidateBatch {
    pub entities: Vec<EntityCandidates>,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitySummary {
    pub entity: String,
    pub summary: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SummaryBatch {
    pub summaries: Vec<EntitySummary>,
    /// Running total including the extraction phase.
    pub usage: TokenUsage,
}

pub struct CandidatePipeline<'a, O: ?Sized> {
    oracle: &'a O,
    prompts: &'a PromptSet,
}

impl<'a, O: Oracle + ?Sized> CandidatePipeline<'a, O> {
    pub fn new(oracle: &'a O, prompts: &'a PromptSet) -> Self {
        Self { oracle, prompts }
    }

    /// One oracle call per annotation; candidates keep annotation order.
    pub fn extract_candidates(&self, entities: &[EntityAnnotations]) -> Result<CandidateBatch> {
        let started = Instant::now();
        let mut usage = TokenUsage::default();
        let mut out = Vec::with_capacity(entities.len());

        for entity in entities {
            tracing::info!(
                component = "candidates",
                entity = %entity.entity,
                annotations = entity.annotations.len(),
                "extracting candidates"
            );
            let mut candidates = Vec::with_capacity(entity.annotations.len());
            for (idx, annotation) in entity.annotations.iter().enumerate() {
                tracing::debug!(
                    component = "candidates",
                    entity = %entity.entity,
                    annotation = idx + 1,
                    total = entity.annotations.len(),
                    "annotation"
                );
                let request = OracleRequest::new(self.prompts.candidates.as_str(), annotation.as_str());
                let response = self.oracle.complete(&request)?;
                usage += response.usage;
                candidates.push(response.text);
            }
            out.push(EntityCandidates {
                entity: entity.entity.clone(),
                candidates,
            });
        }

        tracing::info!(
            component = "candidates",
            entities = out.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "candidate extraction finished"
        );
        Ok(CandidateBatch {
            entities: out,
            usage,
        })
    }

    /// One oracle call per entity over its newline-joined candidates.
    pub fn summarize(&self, batch: &CandidateBatch) -> Result<SummaryBatch> {
        let started = Instant::now();
        let mut usage = batch.usage;
        let mut summaries = Vec::with_capacity(batch.entities.len());

        for entity in &batch.entities {
            tracing::info!(component = "candidates", entity = %entity.entity, "summarizing");
            let request = OracleRequest::new(self.prompts.summary.as_str(), entity.candidates.join("\n"));
            let response = self.oracle.complete(&request)?;
            usage += response.usage;
            summaries.push(EntitySummary {
                entity: entity.entity.clone(),
                summary: response.text,
            });
        }

        tracing::info!(
            component = "candidates",
            entities = summaries.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "summaries finished"
        );
        Ok(SummaryBatch { summaries, usage })
    }

    pub fn run(&self, entities: &[EntityAnnotations]) -> Result<SummaryBatch> {
        let batch = self.extract_candidates(entities)?;
        self.summarize(&batch)
    }
}
