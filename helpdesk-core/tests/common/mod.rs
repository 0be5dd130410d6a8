//! Shared fakes for integration tests.
//!
//! Each fake records its calls behind a `Mutex` so tests can assert on
//! what the desk asked of its collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use helpdesk_core::{
    ConversationContext, GenerationError, Generator, Intent, IntentModel, MemoryPersistence,
    Persistence, PersistenceError, RetrievalError, RetrievedPassage, Retriever, WriteOp,
};
use helpdesk_core::ClassifierError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Retriever returning a fixed passage list
pub struct MockRetriever {
    passages: Vec<RetrievedPassage>,
    pub queries: Mutex<Vec<String>>,
}

impl MockRetriever {
    pub fn new(passages: Vec<RetrievedPassage>) -> Self {
        Self {
            passages,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// One strong passage about returns
    pub fn grounded() -> Self {
        Self::new(vec![passage("returns-policy.pdf", 2, 0.82)])
    }

    /// Only passages below the default grounding threshold
    pub fn weak() -> Self {
        Self::new(vec![passage("misc.pdf", 9, 0.12)])
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.passages.iter().take(top_k).cloned().collect())
    }
}

/// Generator returning a fixed answer
pub struct MockGenerator {
    reply: String,
    pub prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new("Items can be returned within 30 days of delivery.")
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _context_passages: &[RetrievedPassage],
    ) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// Intent model that is always down
pub struct DownIntentModel {
    pub calls: AtomicUsize,
}

impl DownIntentModel {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IntentModel for DownIntentModel {
    async fn classify(
        &self,
        _text: &str,
        _context: &ConversationContext,
    ) -> Result<Intent, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ClassifierError::Unavailable("model offline".into()))
    }
}

/// In-memory persistence that rejects a configurable number of batches
pub struct FlakyPersistence {
    inner: MemoryPersistence,
    failures_left: Mutex<usize>,
    pub rejected: AtomicUsize,
}

impl FlakyPersistence {
    /// Reject the next `n` batches, then behave
    pub fn failing(n: usize) -> Self {
        Self {
            inner: MemoryPersistence::new(),
            failures_left: Mutex::new(n),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn healthy() -> Self {
        Self::failing(0)
    }

    pub fn fail_next(&self, n: usize) {
        *self.failures_left.lock().unwrap() = n;
    }

    pub fn stored(&self) -> usize {
        self.inner.len()
    }
}

impl Persistence for FlakyPersistence {
    fn write_batch(&self, ops: &[WriteOp]) -> Result<(), PersistenceError> {
        let mut left = self.failures_left.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(PersistenceError::Unavailable("disk full".into()));
        }
        self.inner.write_batch(ops)
    }

    fn get(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        self.inner.get(namespace, key)
    }

    fn list(&self, namespace: &str) -> Result<Vec<(String, serde_json::Value)>, PersistenceError> {
        self.inner.list(namespace)
    }
}

pub fn passage(doc: &str, page: u32, score: f32) -> RetrievedPassage {
    RetrievedPassage {
        document_id: doc.to_string(),
        page,
        text: format!("Excerpt from {} page {}", doc, page),
        score,
    }
}
