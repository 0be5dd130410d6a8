//! Retrieval-Augmented Answering Orchestrator
//!
//! ```text
//! question ──► Retriever::search (timeout)
//!                ├─ error / timeout ─────────────► InsufficientEvidence
//!                ├─ no passage ≥ threshold ──────► InsufficientEvidence
//!                └─ qualifying passages
//!                      └─► Generator::generate (timeout)
//!                            ├─ text ────────────► Grounded { text, sources }
//!                            └─ error / timeout ─► Failed
//! ```
//!
//! Generation is never invoked without at least one passage at or above the
//! grounding threshold, and only qualifying passages reach the prompt.

use crate::collaborators::{Generator, Retriever};
use crate::error::{GenerationError, RetrievalError};
use crate::escalation::AnswerSignal;
use crate::memory::ConversationContext;
use crate::types::{RetrievedPassage, SourceRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Reply given when no passage clears the grounding threshold
pub const INSUFFICIENT_EVIDENCE_REPLY: &str =
    "I couldn't find that in our documentation. Could you rephrase, or ask about something else?";

/// Reply given when generation fails after grounding succeeded
pub const ANSWER_FAILED_REPLY: &str =
    "I'm having trouble answering right now. Please try again in a moment.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerConfig {
    /// Minimum passage score admitted into the prompt
    pub grounding_threshold: f32,
    pub top_k: usize,
    pub retrieval_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            grounding_threshold: 0.35,
            top_k: 3,
            retrieval_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(30),
        }
    }
}

/// Why the orchestrator declined to answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum EvidenceGap {
    /// Best score below the threshold (None when nothing was returned)
    BelowThreshold { best_score: Option<f32> },
    RetrievalFailed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// Answer composed from qualifying passages only
    Grounded { text: String, sources: Vec<SourceRef> },
    InsufficientEvidence(EvidenceGap),
    /// Grounding succeeded but generation did not
    Failed { error: String },
}

impl AnswerOutcome {
    pub fn signal(&self) -> AnswerSignal {
        match self {
            Self::Grounded { .. } => AnswerSignal::Success,
            Self::InsufficientEvidence(_) | Self::Failed { .. } => AnswerSignal::Failure,
        }
    }

    /// Text shown to the user
    pub fn reply_text(&self) -> &str {
        match self {
            Self::Grounded { text, .. } => text,
            Self::InsufficientEvidence(_) => INSUFFICIENT_EVIDENCE_REPLY,
            Self::Failed { .. } => ANSWER_FAILED_REPLY,
        }
    }

    pub fn sources(&self) -> &[SourceRef] {
        match self {
            Self::Grounded { sources, .. } => sources,
            _ => &[],
        }
    }
}

/// Sequences retrieval, grounding check and answer composition
#[derive(Clone)]
pub struct AnswerOrchestrator {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    config: AnswerConfig,
}

impl AnswerOrchestrator {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        config: AnswerConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &AnswerConfig {
        &self.config
    }

    pub async fn answer(&self, question: &str, context: &ConversationContext) -> AnswerOutcome {
        let passages = match self.retrieve(question).await {
            Ok(passages) => passages,
            Err(e) => {
                warn!(error = %e, "Retrieval failed");
                return AnswerOutcome::InsufficientEvidence(EvidenceGap::RetrievalFailed {
                    error: e.to_string(),
                });
            }
        };

        let best_score = passages
            .iter()
            .map(|p| p.score)
            .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));

        let grounded: Vec<RetrievedPassage> = passages
            .into_iter()
            .filter(|p| p.score >= self.config.grounding_threshold)
            .collect();

        if grounded.is_empty() {
            debug!(
                best_score = ?best_score,
                threshold = self.config.grounding_threshold,
                "No passage clears the grounding threshold"
            );
            return AnswerOutcome::InsufficientEvidence(EvidenceGap::BelowThreshold { best_score });
        }

        let prompt = build_prompt(question, context, &grounded);
        match self.generate(&prompt, &grounded).await {
            Ok(text) => AnswerOutcome::Grounded {
                text,
                sources: grounded.iter().map(RetrievedPassage::source).collect(),
            },
            Err(e) => {
                warn!(error = %e, "Generation failed");
                AnswerOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let timeout = self.config.retrieval_timeout;
        match tokio::time::timeout(timeout, self.retriever.search(question, self.config.top_k)).await
        {
            Ok(result) => result,
            Err(_) => Err(RetrievalError::Timeout(timeout.as_millis() as u64)),
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        passages: &[RetrievedPassage],
    ) -> Result<String, GenerationError> {
        let timeout = self.config.generation_timeout;
        let text = match tokio::time::timeout(timeout, self.generator.generate(prompt, passages)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(GenerationError::Timeout(timeout.as_millis() as u64)),
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::Backend("empty response".into()));
        }
        Ok(text.to_string())
    }
}

/// Prompt restricted to the supplied passages
pub fn build_prompt(
    question: &str,
    context: &ConversationContext,
    passages: &[RetrievedPassage],
) -> String {
    let mut prompt = String::from(
        "You are a customer support assistant.\n\
         Answer ONLY from the documentation excerpts below. If they do not contain \
         the answer, say you don't know. Do not invent policies, prices or dates.\n\n",
    );

    let history = context.render();
    if !history.is_empty() {
        prompt.push_str(&history);
        prompt.push('\n');
    }

    prompt.push_str("Documentation excerpts:\n");
    for passage in passages {
        prompt.push_str(&format!(
            "[{} p.{}] {}\n",
            passage.document_id, passage.page, passage.text
        ));
    }

    prompt.push_str(&format!("\nQuestion: {}\nAnswer:", question));
    prompt
}
