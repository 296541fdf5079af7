//! Three-round narrowing from broad fields to narrow fields.
//!
//! Classifying against the few hundred narrow fields at once would overflow
//! the prompt and degrade accuracy, so the text is classified against the
//! broad fields first, then against the sub-fields of each chosen broad
//! field, then against the narrow fields of each chosen sub-field. Each
//! call only ever sees one parent's children.

use crate::classifier::FieldClassifier;
use crate::error::Result;
use crate::oracle::{Oracle, TokenUsage};
use crate::prompts::PromptSet;
use crate::taxonomy::{FieldCode, TaxonomyLevel, TaxonomyStore};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassificationResult {
    pub fields: Vec<BroadField>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BroadField {
    pub name: String,
    pub subfields: Vec<SubField>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubField {
    pub name: String,
    pub narrow: Vec<String>,
}

impl ClassificationResult {
    pub fn get(&self, level1_name: &str) -> Option<&BroadField> {
        self.fields.iter().find(|field| field.name == level1_name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every (broad, sub, narrow) path, in classification order.
    pub fn leaves(&self) -> impl Iterator<Item = (&str, &str, &str)> + '_ {
        self.fields.iter().flat_map(|broad| {
            broad.subfields.iter().flat_map(move |sub| {
                sub.narrow
                    .iter()
                    .map(move |narrow| (broad.name.as_str(), sub.name.as_str(), narrow.as_str()))
            })
        })
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }
}

/// One narrow-field assignment with its resolved code pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultRow {
    pub level1: String,
    pub level2: String,
    pub level3: String,
    pub code: FieldCode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub result: ClassificationResult,
    pub usage: TokenUsage,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedRows {
    pub rows: Vec<ResultRow>,
    pub usage: TokenUsage,
}

pub struct HierarchicalResolver<'a, O: ?Sized> {
    taxonomy: &'a TaxonomyStore,
    classifier: FieldClassifier<'a, O>,
}

impl<'a, O: Oracle + ?Sized> HierarchicalResolver<'a, O> {
    pub fn new(taxonomy: &'a TaxonomyStore, oracle: &'a O, prompts: &'a PromptSet) -> Self {
        Self {
            taxonomy,
            classifier: FieldClassifier::new(oracle, prompts),
        }
    }

    pub fn resolve(&self, text: &str) -> Result<Resolution> {
        let mut usage = TokenUsage::default();

        let broad = self.classifier.classify(text, &self.taxonomy.level1_names())?;
        usage += broad.usage;
        tracing::debug!(component = "resolver", level = 1, chosen = ?broad.names, "round complete");

        let mut fields = Vec::with_capacity(broad.names.len());
        for broad_name in broad.names {
            let children = self.taxonomy.children_of(TaxonomyLevel::Broad, &broad_name);
            let subfields = if children.is_empty() {
                tracing::debug!(component = "resolver", field = %broad_name, "no sub-fields in taxonomy");
                Vec::new()
            } else {
                let sub = self.classifier.classify(text, &children)?;
                usage += sub.usage;
                sub.names
                    .into_iter()
                    .map(|name| SubField {
                        name,
                        narrow: Vec::new(),
                    })
                    .collect()
            };
            fields.push(BroadField {
                name: broad_name,
                subfields,
            });
        }
        tracing::debug!(component = "resolver", level = 2, broad_fields = fields.len(), "round complete");

        for broad_field in &mut fields {
            for sub in &mut broad_field.subfields {
                let children = self.taxonomy.children_of(TaxonomyLevel::Sub, &sub.name);
                if children.is_empty() {
                    tracing::debug!(component = "resolver", field = %sub.name, "no narrow fields in taxonomy");
                    continue;
                }
                let narrow = self.classifier.classify(text, &children)?;
                usage += narrow.usage;
                sub.narrow = narrow.names;
            }
        }

        let result = ClassificationResult { fields };
        tracing::debug!(
            component = "resolver",
            level = 3,
            leaves = result.leaf_count(),
            "round complete"
        );
        Ok(Resolution { result, usage })
    }

    /// Resolves `text` and flattens the result into one row per narrow field.
    pub fn resolve_to_rows(&self, text: &str) -> Result<ResolvedRows> {
        let resolution = self.resolve(text)?;
        Ok(ResolvedRows {
            rows: self.flatten(&resolution.result),
            usage: resolution.usage,
        })
    }

    pub fn flatten(&self, result: &ClassificationResult) -> Vec<ResultRow> {
        flatten(self.taxonomy, result)
    }
}

pub fn flatten(taxonomy: &TaxonomyStore, result: &ClassificationResult) -> Vec<ResultRow> {
    result
        .leaves()
        .map(|(level1, level2, level3)| {
            let code = taxonomy.code_for(level3);
            if !code.is_resolved() {
                tracing::warn!(component = "resolver", field = %level3, "no code for narrow field");
            }
            ResultRow {
                level1: level1.to_string(),
                level2: level2.to_string(),
                level3: level3.to_string(),
                code,
            }
        })
        .collect()
}
