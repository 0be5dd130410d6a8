//! Escalation State: per-user counters and recent-intent window

use crate::classifier::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Why a conversation was handed to a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationReason {
    /// Complaint/refund streak reached the threshold
    RepeatedComplaint,
    /// Security, fraud or legal request; never answered automatically
    SensitiveRequest,
    /// The user asked for a human
    ExplicitRequest,
    /// Answering failed repeatedly
    AiFailure,
    /// Unrecoverable internal error while handling a message
    SystemError,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RepeatedComplaint => write!(f, "REPEATED_COMPLAINT"),
            Self::SensitiveRequest => write!(f, "SENSITIVE_REQUEST"),
            Self::ExplicitRequest => write!(f, "EXPLICIT_REQUEST"),
            Self::AiFailure => write!(f, "AI_FAILURE"),
            Self::SystemError => write!(f, "SYSTEM_ERROR"),
        }
    }
}

/// Ticket urgency. Ordered: `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
}

impl TicketPriority {
    pub const ALL: [TicketPriority; 3] = [Self::Low, Self::Medium, Self::High];
}

impl std::fmt::Display for TicketPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// Counters for one user (or anonymous session), keyed by owner key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationState {
    pub owner: String,
    pub consecutive_complaint_count: u32,
    pub consecutive_failure_count: u32,
    /// Most recent intents, oldest first
    pub last_intents: VecDeque<Intent>,
    pub last_activity: DateTime<Utc>,
}

impl EscalationState {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            consecutive_complaint_count: 0,
            consecutive_failure_count: 0,
            last_intents: VecDeque::new(),
            last_activity: Utc::now(),
        }
    }

    /// Push an intent into the bounded window
    pub fn record_intent(&mut self, intent: Intent, window: usize) {
        self.last_intents.push_back(intent);
        while self.last_intents.len() > window.max(1) {
            self.last_intents.pop_front();
        }
        self.last_activity = Utc::now();
    }

    /// Zero both counters and forget recent intents
    pub fn reset(&mut self) {
        self.consecutive_complaint_count = 0;
        self.consecutive_failure_count = 0;
        self.last_intents.clear();
        self.last_activity = Utc::now();
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Option<Duration>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        let idle = now.signed_duration_since(self.last_activity);
        idle.to_std().map(|idle| idle > ttl).unwrap_or(false)
    }

    pub fn is_clean(&self) -> bool {
        self.consecutive_complaint_count == 0
            && self.consecutive_failure_count == 0
            && self.last_intents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(TicketPriority::Low < TicketPriority::Medium);
        assert!(TicketPriority::Medium < TicketPriority::High);
        assert_eq!(
            TicketPriority::Low.max(TicketPriority::High),
            TicketPriority::High
        );
    }

    #[test]
    fn test_intent_window_is_bounded() {
        let mut state = EscalationState::new("user:u1");
        for _ in 0..5 {
            state.record_intent(Intent::General, 3);
        }
        state.record_intent(Intent::Refund, 3);
        assert_eq!(state.last_intents.len(), 3);
        assert_eq!(state.last_intents.back(), Some(&Intent::Refund));
    }

    #[test]
    fn test_expiry_only_with_ttl() {
        let mut state = EscalationState::new("user:u1");
        state.last_activity = Utc::now() - chrono::Duration::hours(2);
        assert!(!state.is_expired(Utc::now(), None));
        assert!(state.is_expired(Utc::now(), Some(Duration::from_secs(60))));
        assert!(!state.is_expired(Utc::now(), Some(Duration::from_secs(3 * 3600))));
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(
            EscalationReason::RepeatedComplaint.to_string(),
            "REPEATED_COMPLAINT"
        );
        assert_eq!(EscalationReason::SystemError.to_string(), "SYSTEM_ERROR");
    }
}
