//! Instruction texts sent to the oracle.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_CLASSIFY: &str = "Determine which of the research fields listed below the given \
scientific annotation belongs to. Choose only from the following names and do not invent any. \
Answer with a comma-separated list of the chosen names only, using the exact wording of the list.\n\
Fields:\n{fields}";

const DEFAULT_CANDIDATES: &str = "You read one annotation of a research project. \
Name the research competencies and areas of scientific interest it demonstrates. \
Answer with a short comma-separated list of competencies and nothing else.";

const DEFAULT_SUMMARY: &str = "You receive lists of competencies extracted from several \
annotations of the same research group or author, one list per line. Merge them into a single \
deduplicated list of competencies and areas of scientific interest. \
Answer with a comma-separated list and nothing else.";

/// Placeholder substituted with the newline-joined candidate names.
pub const FIELDS_PLACEHOLDER: &str = "{fields}";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSet {
    pub classify: String,
    pub candidates: String,
    pub summary: String,
}

#[derive(Debug, Default, Deserialize)]
struct PromptOverrides {
    classify: Option<String>,
    candidates: Option<String>,
    summary: Option<String>,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            classify: DEFAULT_CLASSIFY.to_string(),
            candidates: DEFAULT_CANDIDATES.to_string(),
            summary: DEFAULT_SUMMARY.to_string(),
        }
    }
}

impl PromptSet {
    /// Built-in prompts with any fields present in the YAML file replacing them.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let overrides: PromptOverrides = serde_yaml::from_str(raw)
            .map_err(|err| Error::Config(format!("parse prompts yaml: {err}")))?;
        let mut prompts = Self::default();
        if let Some(classify) = overrides.classify {
            if !classify.contains(FIELDS_PLACEHOLDER) {
                return Err(Error::Config(format!(
                    "classify prompt must contain {FIELDS_PLACEHOLDER}"
                )));
            }
            prompts.classify = classify;
        }
        if let Some(candidates) = overrides.candidates {
            prompts.candidates = candidates;
        }
        if let Some(summary) = overrides.summary {
            prompts.summary = summary;
        }
        Ok(prompts)
    }

    pub fn classify_instruction(&self, names: &[String]) -> String {
        self.classify.replace(FIELDS_PLACEHOLDER, &names.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_instruction_lists_names_one_per_line() {
        let prompts = PromptSet::default();
        let instruction =
            prompts.classify_instruction(&["Physics".to_string(), "Chemistry".to_string()]);
        assert!(instruction.ends_with("Fields:\nPhysics\nChemistry"));
        assert!(instruction.contains("do not invent any"));
    }

    #[test]
    fn yaml_overrides_only_given_fields() {
        let prompts = PromptSet::from_yaml("summary: merge everything\n").unwrap();
        assert_eq!(prompts.summary, "merge everything");
        assert_eq!(prompts.classify, PromptSet::default().classify);
    }

    #[test]
    fn classify_override_requires_placeholder() {
        let err = PromptSet::from_yaml("classify: pick something\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
