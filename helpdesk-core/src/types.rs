//! Core data model: sessions, turns, sources and long-term facts

use crate::classifier::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type SessionId = String;
pub type UserId = String;
pub type TicketId = String;

/// Who is currently answering the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionMode {
    /// Automated answering path is live
    AiActive,
    /// A human operator owns the conversation
    HumanTakeover,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AiActive => write!(f, "AI_ACTIVE"),
            Self::HumanTakeover => write!(f, "HUMAN_TAKEOVER"),
        }
    }
}

/// A conversation between one end user and the desk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub mode: SessionMode,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<SessionId>, user_id: Option<UserId>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            mode: SessionMode::AiActive,
            created_at: Utc::now(),
        }
    }

    /// Key under which per-user state (facts, counters) is stored.
    ///
    /// Anonymous sessions get a session-scoped key, so their facts do not
    /// outlive the session.
    pub fn owner_key(&self) -> String {
        owner_key(&self.session_id, self.user_id.as_deref())
    }
}

pub fn owner_key(session_id: &str, user_id: Option<&str>) -> String {
    match user_id {
        Some(user) => format!("user:{}", user),
        None => format!("session:{}", session_id),
    }
}

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// Provenance of a grounded answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    pub page: u32,
    pub score: f32,
}

/// One passage returned by the retrieval capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub document_id: String,
    pub page: u32,
    pub text: String,
    /// Similarity score; higher is more relevant
    pub score: f32,
}

impl RetrievedPassage {
    pub fn source(&self) -> SourceRef {
        SourceRef {
            document_id: self.document_id.clone(),
            page: self.page,
            score: self.score,
        }
    }
}

/// A single exchange in a session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Monotonic per-session sequence number, assigned by the memory store
    pub turn_id: u64,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_intent: Option<Intent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retrieved_sources: Vec<SourceRef>,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            turn_id: 0,
            role,
            text: text.into(),
            timestamp: Utc::now(),
            detected_intent: None,
            retrieved_sources: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>, intent: Intent) -> Self {
        Self {
            detected_intent: Some(intent),
            ..Self::new(Role::User, text)
        }
    }

    pub fn assistant(text: impl Into<String>, sources: Vec<SourceRef>) -> Self {
        Self {
            retrieved_sources: sources,
            ..Self::new(Role::Assistant, text)
        }
    }

    pub fn admin(text: impl Into<String>) -> Self {
        Self::new(Role::Admin, text)
    }

    /// `ROLE: text` line used in prompts and transcripts
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role.to_string().to_uppercase(), self.text)
    }
}

/// Durable per-user datum, unique per (owner, key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongTermFact {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl LongTermFact {
    /// A fact stamped with the current time
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_key_prefers_user() {
        let named = Session::new("s-1", Some("u-9".into()));
        let anon = Session::new("s-2", None);
        assert_eq!(named.owner_key(), "user:u-9");
        assert_eq!(anon.owner_key(), "session:s-2");
    }

    #[test]
    fn test_new_session_is_ai_active() {
        let session = Session::new("s-1", None);
        assert_eq!(session.mode, SessionMode::AiActive);
    }

    #[test]
    fn test_mode_serializes_screaming_case() {
        let json = serde_json::to_string(&SessionMode::HumanTakeover).unwrap();
        assert_eq!(json, "\"HUMAN_TAKEOVER\"");
        assert_eq!(SessionMode::AiActive.to_string(), "AI_ACTIVE");
    }

    #[test]
    fn test_transcript_line() {
        let turn = Turn::admin("We are on it");
        assert_eq!(turn.transcript_line(), "ADMIN: We are on it");
        assert_eq!(turn.detected_intent, None);
    }
}
