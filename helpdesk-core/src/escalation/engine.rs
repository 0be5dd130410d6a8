//! Escalation Engine: deterministic escalate/no-escalate decisions
//!
//! Consumes classified intents and answering outcomes, mutates the caller's
//! [`EscalationState`] and emits at most one [`Escalation`] per observation.
//! No model calls in this module.

use super::state::{EscalationReason, EscalationState, TicketPriority};
use crate::classifier::Intent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// An ESCALATE emission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub reason: EscalationReason,
    pub priority: TicketPriority,
}

impl Escalation {
    pub fn new(reason: EscalationReason, priority: TicketPriority) -> Self {
        Self { reason, priority }
    }

    /// Unrecoverable internal error
    pub fn system_error() -> Self {
        Self::new(EscalationReason::SystemError, TicketPriority::Medium)
    }
}

/// Answering outcome as seen by the failure streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSignal {
    /// Grounded answer delivered
    Success,
    /// Insufficient evidence, retrieval failure, generation error or timeout
    Failure,
}

/// Configuration for the Escalation Engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Consecutive REFUND/COMPLAINT intents that escalate
    pub complaint_threshold: u32,
    /// Consecutive answering failures that escalate
    pub failure_threshold: u32,
    /// Recent intents retained per user
    pub intent_window: usize,
    /// Idle time after which counters are dropped (None = never)
    pub state_ttl: Option<Duration>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            complaint_threshold: 3,
            failure_threshold: 3,
            intent_window: 10,
            state_ttl: None,
        }
    }
}

/// The Escalation Engine: per-user policy state machine
#[derive(Debug, Clone, Default)]
pub struct EscalationEngine {
    config: EscalationConfig,
}

impl EscalationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Drop expired counters. Returns true when the state was reset.
    pub fn refresh(&self, state: &mut EscalationState, now: DateTime<Utc>) -> bool {
        if state.is_expired(now, self.config.state_ttl) {
            debug!(owner = %state.owner, "Escalation state expired");
            state.reset();
            return true;
        }
        false
    }

    /// Apply a classified intent.
    ///
    /// - REFUND / COMPLAINT: complaint streak +1, escalate MEDIUM at threshold
    /// - SENSITIVE: escalate HIGH immediately
    /// - HUMAN_REQUEST: escalate LOW immediately
    /// - anything but REFUND / COMPLAINT clears the complaint streak
    pub fn observe_intent(&self, state: &mut EscalationState, intent: Intent) -> Option<Escalation> {
        state.record_intent(intent, self.config.intent_window);

        if intent.is_complaint() {
            state.consecutive_complaint_count = state.consecutive_complaint_count.saturating_add(1);
            debug!(
                owner = %state.owner,
                count = state.consecutive_complaint_count,
                threshold = self.config.complaint_threshold,
                "Complaint streak"
            );
            if state.consecutive_complaint_count >= self.config.complaint_threshold {
                return Some(Escalation::new(
                    EscalationReason::RepeatedComplaint,
                    TicketPriority::Medium,
                ));
            }
            return None;
        }

        state.consecutive_complaint_count = 0;

        match intent {
            Intent::Sensitive => Some(Escalation::new(
                EscalationReason::SensitiveRequest,
                TicketPriority::High,
            )),
            Intent::HumanRequest => Some(Escalation::new(
                EscalationReason::ExplicitRequest,
                TicketPriority::Low,
            )),
            _ => None,
        }
    }

    /// Apply an answering outcome.
    ///
    /// A grounded success clears the failure streak; a failure extends it and
    /// escalates MEDIUM at threshold.
    pub fn observe_answer(&self, state: &mut EscalationState, signal: AnswerSignal) -> Option<Escalation> {
        state.last_activity = Utc::now();
        match signal {
            AnswerSignal::Success => {
                state.consecutive_failure_count = 0;
                None
            }
            AnswerSignal::Failure => {
                state.consecutive_failure_count = state.consecutive_failure_count.saturating_add(1);
                debug!(
                    owner = %state.owner,
                    count = state.consecutive_failure_count,
                    threshold = self.config.failure_threshold,
                    "Answer failure streak"
                );
                (state.consecutive_failure_count >= self.config.failure_threshold).then(|| {
                    Escalation::new(EscalationReason::AiFailure, TicketPriority::Medium)
                })
            }
        }
    }
}
