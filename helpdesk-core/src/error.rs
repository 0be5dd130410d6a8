//! Error taxonomy for the support desk.
//!
//! Collaborator failures (classification, retrieval, generation) are typed so
//! the desk can absorb them into escalation signals. Only [`DeskError`] is
//! ever returned to a consumer of the desk API.

use thiserror::Error;

/// Result type alias for desk operations
pub type DeskResult<T> = Result<T, DeskError>;

/// Errors surfaced by the public desk API
#[derive(Debug, Error)]
pub enum DeskError {
    /// Durable write failed; the request was aborted and nothing was committed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("ticket not found: {0}")]
    TicketNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A ticket or session transition that the lifecycle does not allow.
    #[error("invalid transition for {subject}: {from} -> {to}")]
    InvalidTransition {
        subject: String,
        from: String,
        to: String,
    },

    /// Reopening would leave the session with two non-resolved tickets.
    #[error("session {session_id} already has active ticket {active_ticket}")]
    TicketConflict {
        session_id: String,
        active_ticket: String,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DeskError {
    pub(crate) fn transition(
        subject: impl Into<String>,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            subject: subject.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Errors from the persistence capability
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Errors from the retrieval capability
#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("retrieval timed out after {0} ms")]
    Timeout(u64),
}

/// Errors from the generation capability
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),

    #[error("generation timed out after {0} ms")]
    Timeout(u64),

    #[error("generation backend error: {0}")]
    Backend(String),
}

/// Errors from the semantic intent classifier
#[derive(Debug, Clone, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier returned an unknown label: {0}")]
    UnknownLabel(String),
}

/// Invalid configuration values
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    Read(String),

    #[error("failed to parse config file: {0}")]
    Parse(String),
}
