//! Closed-vocabulary field classification with one oracle call.

use crate::error::Result;
use crate::oracle::{Oracle, OracleRequest, TokenUsage};
use crate::prompts::PromptSet;

/// Separator the oracle is asked to use between chosen names.
pub const LIST_SEPARATOR: &str = ", ";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Names as returned by the oracle, in answer order, without duplicates.
    pub names: Vec<String>,
    /// Returned names that are not in the supplied vocabulary.
    pub out_of_vocabulary: Vec<String>,
    pub usage: TokenUsage,
}

pub struct FieldClassifier<'a, O: ?Sized> {
    oracle: &'a O,
    prompts: &'a PromptSet,
}

impl<'a, O: Oracle + ?Sized> FieldClassifier<'a, O> {
    pub fn new(oracle: &'a O, prompts: &'a PromptSet) -> Self {
        Self { oracle, prompts }
    }

    /// Asks the oracle which of `candidate_names` apply to `text`.
    ///
    /// An empty vocabulary yields an empty classification without calling
    /// the oracle. Names outside the vocabulary are logged and passed
    /// through unchanged.
    pub fn classify(&self, text: &str, candidate_names: &[String]) -> Result<Classification> {
        if candidate_names.is_empty() {
            tracing::debug!(component = "classifier", "empty vocabulary, skipping oracle call");
            return Ok(Classification::default());
        }

        let request = OracleRequest::new(self.prompts.classify_instruction(candidate_names), text);
        let response = self.oracle.complete(&request)?;
        let names = parse_name_list(&response.text);
        let out_of_vocabulary: Vec<String> = names
            .iter()
            .filter(|name| !candidate_names.contains(name))
            .cloned()
            .collect();
        if !out_of_vocabulary.is_empty() {
            tracing::warn!(
                component = "classifier",
                names = ?out_of_vocabulary,
                vocabulary_size = candidate_names.len(),
                "oracle answered outside the supplied vocabulary"
            );
        }
        tracing::debug!(
            component = "classifier",
            chosen = names.len(),
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "classified"
        );
        Ok(Classification {
            names,
            out_of_vocabulary,
            usage: response.usage,
        })
    }
}

/// Splits a comma-separated answer, dropping blanks and repeated names.
pub fn parse_name_list(answer: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for part in answer.split(LIST_SEPARATOR) {
        let name = part.trim();
        if name.is_empty() || names.iter().any(|seen| seen == name) {
            continue;
        }
        names.push(name.to_string());
    }
    names
}
