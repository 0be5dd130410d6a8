//! Knowledge base loaded from a JSON passage file.
//!
//! The file is an array of `{ "document_id", "page", "text" }` objects.
//! A passage scores the fraction of distinct query terms it contains, so
//! scores stay in [0, 1] and compare directly with the grounding threshold.

use anyhow::{Context, Result};
use async_trait::async_trait;
use helpdesk_core::{RetrievalError, RetrievedPassage, Retriever};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Terms too common to signal relevance
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "you", "your", "what", "how", "can", "does", "with", "this",
    "that", "from", "have", "was", "will", "about", "when", "where", "which", "there",
];

#[derive(Debug, Clone, Deserialize)]
struct PassageRecord {
    document_id: String,
    #[serde(default)]
    page: u32,
    text: String,
}

struct IndexedPassage {
    record: PassageRecord,
    terms: HashSet<String>,
}

pub struct PassageFileRetriever {
    passages: Vec<IndexedPassage>,
}

impl PassageFileRetriever {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading passage file {}", path.display()))?;
        let records: Vec<PassageRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing passage file {}", path.display()))?;
        let retriever = Self::from_records(records);
        info!(path = %path.display(), passages = retriever.len(), "Knowledge base loaded");
        Ok(retriever)
    }

    fn from_records(records: Vec<PassageRecord>) -> Self {
        let passages = records
            .into_iter()
            .map(|record| IndexedPassage {
                terms: terms(&record.text),
                record,
            })
            .collect();
        Self { passages }
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3 && !STOP_WORDS.contains(t))
        .map(String::from)
        .collect()
}

#[async_trait]
impl Retriever for PassageFileRetriever {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<RetrievedPassage> = self
            .passages
            .iter()
            .filter_map(|p| {
                let hits = query_terms.intersection(&p.terms).count();
                (hits > 0).then(|| RetrievedPassage {
                    document_id: p.record.document_id.clone(),
                    page: p.record.page,
                    text: p.record.text.clone(),
                    score: hits as f32 / query_terms.len() as f32,
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}
