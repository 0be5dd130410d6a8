//! Desk configuration
//!
//! Loaded from an optional TOML file, then overridden by `HELPDESK_*`
//! environment variables.

use crate::error::ConfigError;
use crate::escalation::EscalationConfig;
use crate::orchestrator::AnswerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a [`SupportDesk`](crate::desk::SupportDesk)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    /// Turns kept per session before the oldest is evicted
    pub short_term_capacity: usize,
    /// Turns handed to classifier and generation as context
    pub context_window: usize,
    /// Size of the recent-intent window kept per user
    pub intent_window: usize,
    /// Consecutive REFUND/COMPLAINT messages that escalate
    pub complaint_threshold: u32,
    /// Consecutive answering failures that escalate
    pub failure_threshold: u32,
    /// Minimum passage score required to ground an answer, on the
    /// retriever's own scale (cosine similarity, BM25, ...)
    pub grounding_threshold: f32,
    /// Passages requested per retrieval
    pub top_k: usize,
    pub retrieval_timeout_ms: u64,
    pub generation_timeout_ms: u64,
    pub classifier_timeout_ms: u64,
    /// Idle time after which a user's escalation counters expire (None = never)
    pub escalation_state_ttl_secs: Option<u64>,
    /// Age after which an unresolved ticket counts as overdue
    pub ticket_sla_secs: u64,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 20,
            context_window: 6,
            intent_window: 10,
            complaint_threshold: 3,
            failure_threshold: 3,
            grounding_threshold: 0.35,
            top_k: 3,
            retrieval_timeout_ms: 10_000,
            generation_timeout_ms: 30_000,
            classifier_timeout_ms: 5_000,
            escalation_state_ttl_secs: None,
            ticket_sla_secs: 1800,
        }
    }
}

impl DeskConfig {
    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML config file; missing keys fall back to defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Read(format!("{}: {}", path.as_ref().display(), e)))?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// File (if given) then env overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        env_parse("HELPDESK_SHORT_TERM_CAPACITY", &mut self.short_term_capacity);
        env_parse("HELPDESK_CONTEXT_WINDOW", &mut self.context_window);
        env_parse("HELPDESK_INTENT_WINDOW", &mut self.intent_window);
        env_parse("HELPDESK_COMPLAINT_THRESHOLD", &mut self.complaint_threshold);
        env_parse("HELPDESK_FAILURE_THRESHOLD", &mut self.failure_threshold);
        env_parse("HELPDESK_GROUNDING_THRESHOLD", &mut self.grounding_threshold);
        env_parse("HELPDESK_TOP_K", &mut self.top_k);
        env_parse("HELPDESK_RETRIEVAL_TIMEOUT_MS", &mut self.retrieval_timeout_ms);
        env_parse("HELPDESK_GENERATION_TIMEOUT_MS", &mut self.generation_timeout_ms);
        env_parse("HELPDESK_CLASSIFIER_TIMEOUT_MS", &mut self.classifier_timeout_ms);
        env_parse("HELPDESK_TICKET_SLA_SECS", &mut self.ticket_sla_secs);
        if let Ok(val) = std::env::var("HELPDESK_ESCALATION_STATE_TTL_SECS") {
            self.escalation_state_ttl_secs = val.parse().ok().filter(|n| *n > 0);
        }
    }

    /// Reject values that would make the policy meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.complaint_threshold == 0 {
            return Err(invalid("complaint_threshold", "must be at least 1"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be at least 1"));
        }
        if !self.grounding_threshold.is_finite() || self.grounding_threshold < 0.0 {
            return Err(invalid(
                "grounding_threshold",
                format!("{} is not a finite non-negative score", self.grounding_threshold),
            ));
        }
        if self.top_k == 0 {
            return Err(invalid("top_k", "must be at least 1"));
        }
        if self.short_term_capacity == 0 {
            return Err(invalid("short_term_capacity", "must be at least 1"));
        }
        if self.intent_window == 0 {
            return Err(invalid("intent_window", "must be at least 1"));
        }
        Ok(())
    }

    pub fn escalation(&self) -> EscalationConfig {
        EscalationConfig {
            complaint_threshold: self.complaint_threshold,
            failure_threshold: self.failure_threshold,
            intent_window: self.intent_window,
            state_ttl: self.escalation_state_ttl_secs.map(Duration::from_secs),
        }
    }

    pub fn answering(&self) -> AnswerConfig {
        AnswerConfig {
            grounding_threshold: self.grounding_threshold,
            top_k: self.top_k,
            retrieval_timeout: Duration::from_millis(self.retrieval_timeout_ms),
            generation_timeout: Duration::from_millis(self.generation_timeout_ms),
        }
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }

    pub fn ticket_sla(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ticket_sla_secs.min(i64::MAX as u64) as i64)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(val) = std::env::var(key) {
        if let Ok(parsed) = val.trim().parse() {
            *slot = parsed;
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
