//! Capability interfaces the desk consumes.
//!
//! Retrieval and generation are opaque: the desk only relies on the shapes
//! below. Implementations may block on network or model latency; the desk
//! bounds every call with a timeout.

use crate::error::{GenerationError, RetrievalError};
use crate::types::RetrievedPassage;
use async_trait::async_trait;

/// Knowledge-base search
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Up to `top_k` passages, scores comparable across calls (higher = more relevant).
    ///
    /// Scores need not lie in [0, 1]; the desk's grounding threshold is set
    /// on the same scale the retriever reports.
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError>;
}

/// Text generation model
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for `prompt`, grounded on `context_passages` when non-empty
    async fn generate(
        &self,
        prompt: &str,
        context_passages: &[RetrievedPassage],
    ) -> Result<String, GenerationError>;
}

/// Retriever for deployments without a knowledge base; every search is empty.
pub struct EmptyRetriever;

#[async_trait]
impl Retriever for EmptyRetriever {
    async fn search(
        &self,
        _query: &str,
        _top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// Generator that is never reachable
pub struct UnavailableGenerator;

#[async_trait]
impl Generator for UnavailableGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _context_passages: &[RetrievedPassage],
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable("no generator configured".into()))
    }
}
