//! Escalation Policy Engine
//!
//! Per-user state machine that decides when a conversation leaves the
//! automated path:
//!
//! ```text
//! SENSITIVE ─────────────────────────────► ESCALATE(SENSITIVE_REQUEST, HIGH)
//! HUMAN_REQUEST ─────────────────────────► ESCALATE(EXPLICIT_REQUEST, LOW)
//! REFUND | COMPLAINT ── streak ≥ N ──────► ESCALATE(REPEATED_COMPLAINT, MEDIUM)
//! answer failure ────── streak ≥ M ──────► ESCALATE(AI_FAILURE, MEDIUM)
//! unrecoverable error ───────────────────► ESCALATE(SYSTEM_ERROR, MEDIUM)
//! ```
//!
//! Streaks are consecutive: any other intent clears the complaint streak and
//! any grounded answer clears the failure streak. Both are cleared when a
//! ticket is resolved or the optional TTL expires.

pub mod engine;
pub mod state;

pub use engine::{AnswerSignal, Escalation, EscalationConfig, EscalationEngine};
pub use state::{EscalationReason, EscalationState, TicketPriority};
