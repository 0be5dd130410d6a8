//! Ticket record and its forward-only status lifecycle

use crate::error::{DeskError, DeskResult};
use crate::escalation::{Escalation, EscalationReason, TicketPriority};
use crate::types::{SessionId, TicketId, Turn, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 3] = [Self::Open, Self::InProgress, Self::Resolved];

    pub fn is_active(self) -> bool {
        !matches!(self, Self::Resolved)
    }

    /// Forward moves only. RESOLVED → OPEN is a reopen, not a transition.
    pub fn valid_transitions(self) -> &'static [TicketStatus] {
        match self {
            Self::Open => &[Self::InProgress, Self::Resolved],
            Self::InProgress => &[Self::Resolved],
            Self::Resolved => &[],
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|status| status.to_string() == normalized)
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// One ESCALATE event absorbed by a ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub reason: EscalationReason,
    pub priority: TicketPriority,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: TicketStatus,
    pub to: TicketStatus,
    pub at: DateTime<Utc>,
    pub note: String,
}

/// Handoff record created when a session leaves the automated path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: TicketId,
    pub session_id: SessionId,
    pub user_id: Option<UserId>,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub reason: EscalationReason,
    /// Session turns at escalation time
    pub conversation_snapshot: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub reopen_count: u32,
    #[serde(default)]
    pub escalations: Vec<EscalationRecord>,
    #[serde(default)]
    pub transitions: Vec<StatusTransition>,
    /// User messages received while a human owns the session, oldest first
    #[serde(default)]
    pub messages: Vec<Turn>,
    /// Operator replies, oldest first
    #[serde(default)]
    pub replies: Vec<Turn>,
}

impl Ticket {
    pub fn open(
        session_id: impl Into<SessionId>,
        user_id: Option<UserId>,
        escalation: Escalation,
        conversation_snapshot: Vec<Turn>,
    ) -> Self {
        let now = Utc::now();
        Self {
            ticket_id: new_ticket_id(),
            session_id: session_id.into(),
            user_id,
            priority: escalation.priority,
            status: TicketStatus::Open,
            reason: escalation.reason,
            conversation_snapshot,
            created_at: now,
            updated_at: now,
            reopen_count: 0,
            escalations: vec![EscalationRecord {
                reason: escalation.reason,
                priority: escalation.priority,
                at: now,
            }],
            transitions: Vec::new(),
            messages: Vec::new(),
            replies: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Move the status forward
    pub fn transition(&mut self, to: TicketStatus, note: &str) -> DeskResult<()> {
        if !self.status.valid_transitions().contains(&to) {
            return Err(DeskError::transition(
                format!("ticket {}", self.ticket_id),
                self.status,
                to,
            ));
        }
        let now = Utc::now();
        self.transitions.push(StatusTransition {
            from: self.status,
            to,
            at: now,
            note: note.to_string(),
        });
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Merge a further escalation into this ticket.
    ///
    /// Priority is only ever raised. The reason is replaced when the new
    /// priority is at least the current one. Returns true if the priority rose.
    pub fn absorb(&mut self, escalation: Escalation) -> bool {
        let now = Utc::now();
        let raised = escalation.priority > self.priority;
        if escalation.priority >= self.priority {
            self.reason = escalation.reason;
            self.priority = escalation.priority;
        }
        self.escalations.push(EscalationRecord {
            reason: escalation.reason,
            priority: escalation.priority,
            at: now,
        });
        self.updated_at = now;
        raised
    }

    /// RESOLVED → OPEN, keeping the ticket id
    pub fn reopen(&mut self, note: &str) -> DeskResult<()> {
        if self.status != TicketStatus::Resolved {
            return Err(DeskError::transition(
                format!("ticket {}", self.ticket_id),
                self.status,
                TicketStatus::Open,
            ));
        }
        let now = Utc::now();
        self.transitions.push(StatusTransition {
            from: TicketStatus::Resolved,
            to: TicketStatus::Open,
            at: now,
            note: note.to_string(),
        });
        self.status = TicketStatus::Open;
        self.reopen_count = self.reopen_count.saturating_add(1);
        self.updated_at = now;
        Ok(())
    }

    /// Queue a user turn for the operator
    pub fn add_message(&mut self, message: Turn) {
        self.updated_at = message.timestamp;
        self.messages.push(message);
    }

    pub fn add_reply(&mut self, reply: Turn) {
        self.updated_at = reply.timestamp;
        self.replies.push(reply);
    }

    /// Unresolved for longer than `sla`
    pub fn is_overdue(&self, now: DateTime<Utc>, sla: chrono::Duration) -> bool {
        self.is_active() && now.signed_duration_since(self.created_at) > sla
    }

    /// One-line listing for admin views
    pub fn summary_line(&self) -> String {
        format!(
            "{} [{}] {} {} session={} updated={}",
            self.ticket_id,
            self.status,
            self.priority,
            self.reason,
            self.session_id,
            self.updated_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn new_ticket_id() -> TicketId {
    format!("TICKET-{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket(priority: TicketPriority) -> Ticket {
        Ticket::open(
            "s-1",
            Some("u-1".into()),
            Escalation::new(EscalationReason::ExplicitRequest, priority),
            Vec::new(),
        )
    }

    #[test]
    fn test_new_ticket_is_open_with_unique_id() {
        let a = ticket(TicketPriority::Low);
        let b = ticket(TicketPriority::Low);
        assert_eq!(a.status, TicketStatus::Open);
        assert!(a.ticket_id.starts_with("TICKET-"));
        assert_ne!(a.ticket_id, b.ticket_id);
        assert_eq!(a.escalations.len(), 1);
    }

    #[test]
    fn test_forward_transitions_only() {
        let mut t = ticket(TicketPriority::Low);
        t.transition(TicketStatus::InProgress, "picked up").unwrap();
        assert!(t.transition(TicketStatus::Open, "back").is_err());
        t.transition(TicketStatus::Resolved, "done").unwrap();
        let err = t.transition(TicketStatus::InProgress, "again").unwrap_err();
        assert!(matches!(err, DeskError::InvalidTransition { .. }));
        assert_eq!(t.transitions.len(), 2);
    }

    #[test]
    fn test_open_may_resolve_directly() {
        let mut t = ticket(TicketPriority::Low);
        assert!(t.transition(TicketStatus::Resolved, "quick fix").is_ok());
    }

    #[test]
    fn test_absorb_never_lowers_priority() {
        let mut t = ticket(TicketPriority::Medium);

        let raised = t.absorb(Escalation::new(
            EscalationReason::ExplicitRequest,
            TicketPriority::Low,
        ));
        assert!(!raised);
        assert_eq!(t.priority, TicketPriority::Medium);
        assert_eq!(t.escalations.len(), 2);

        let raised = t.absorb(Escalation::new(
            EscalationReason::SensitiveRequest,
            TicketPriority::High,
        ));
        assert!(raised);
        assert_eq!(t.priority, TicketPriority::High);
        assert_eq!(t.reason, EscalationReason::SensitiveRequest);
    }

    #[test]
    fn test_absorb_equal_priority_replaces_reason() {
        let mut t = Ticket::open(
            "s-1",
            None,
            Escalation::new(EscalationReason::RepeatedComplaint, TicketPriority::Medium),
            Vec::new(),
        );
        t.absorb(Escalation::system_error());
        assert_eq!(t.reason, EscalationReason::SystemError);
        assert_eq!(t.priority, TicketPriority::Medium);
    }

    #[test]
    fn test_reopen_keeps_id_and_counts() {
        let mut t = ticket(TicketPriority::Low);
        let id = t.ticket_id.clone();
        assert!(t.reopen("not resolved").is_err());

        t.transition(TicketStatus::Resolved, "done").unwrap();
        t.reopen("customer came back").unwrap();
        assert_eq!(t.ticket_id, id);
        assert_eq!(t.status, TicketStatus::Open);
        assert_eq!(t.reopen_count, 1);
    }

    #[test]
    fn test_overdue_only_while_active() {
        let mut t = ticket(TicketPriority::Low);
        t.created_at = Utc::now() - chrono::Duration::hours(1);
        let sla = chrono::Duration::minutes(30);
        assert!(t.is_overdue(Utc::now(), sla));
        t.transition(TicketStatus::Resolved, "done").unwrap();
        assert!(!t.is_overdue(Utc::now(), sla));
    }

    #[test]
    fn test_messages_and_replies_keep_separate_threads() {
        let mut t = ticket(TicketPriority::Low);
        t.add_message(Turn::user("order number is 5", crate::classifier::Intent::General));
        t.add_reply(Turn::admin("Thanks, checking"));
        t.add_message(Turn::user("any news?", crate::classifier::Intent::General));

        let texts: Vec<_> = t.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["order number is 5", "any news?"]);
        assert_eq!(t.replies.len(), 1);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(TicketStatus::parse("in progress"), Some(TicketStatus::InProgress));
        assert_eq!(TicketStatus::parse("resolved"), Some(TicketStatus::Resolved));
        assert_eq!(TicketStatus::parse("closed"), None);
    }
}
