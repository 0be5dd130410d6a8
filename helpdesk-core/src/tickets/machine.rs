//! Ticket/Session state machine
//!
//! ```text
//!              escalate (opens ticket)
//! AI_ACTIVE ───────────────────────────► HUMAN_TAKEOVER
//!     ▲                                     │  escalate again → absorb into
//!     │            resolve                  │  the active ticket
//!     └─────────────────────────────────────┘
//!                  reopen (same ticket id) ─► HUMAN_TAKEOVER
//! ```
//!
//! Every function takes the session and its ticket together and changes them
//! as a pair, so mode and ticket status cannot drift apart.

use super::model::{Ticket, TicketStatus};
use crate::error::{DeskError, DeskResult};
use crate::escalation::{Escalation, TicketPriority};
use crate::types::{Session, SessionId, SessionMode, TicketId, Turn};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Result of routing an escalation through the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Takeover {
    /// AI_ACTIVE → HUMAN_TAKEOVER with a new ticket
    Opened(Ticket),
    /// Already in takeover; the active ticket absorbed the escalation
    Updated {
        ticket: Ticket,
        previous_priority: TicketPriority,
    },
}

impl Takeover {
    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::Opened(ticket) | Self::Updated { ticket, .. } => ticket,
        }
    }

    pub fn into_ticket(self) -> Ticket {
        match self {
            Self::Opened(ticket) | Self::Updated { ticket, .. } => ticket,
        }
    }
}

/// Route an escalation. `active` is the session's non-resolved ticket, if any.
pub fn escalate(
    session: &mut Session,
    active: Option<Ticket>,
    escalation: Escalation,
    snapshot: Vec<Turn>,
) -> Takeover {
    match active {
        Some(mut ticket) => {
            let previous_priority = ticket.priority;
            ticket.absorb(escalation);
            session.mode = SessionMode::HumanTakeover;
            Takeover::Updated {
                ticket,
                previous_priority,
            }
        }
        None => {
            let ticket = Ticket::open(
                session.session_id.clone(),
                session.user_id.clone(),
                escalation,
                snapshot,
            );
            session.mode = SessionMode::HumanTakeover;
            Takeover::Opened(ticket)
        }
    }
}

/// Resolve the ticket and hand the session back to the automated path
pub fn resolve(session: &mut Session, ticket: &mut Ticket, note: &str) -> DeskResult<()> {
    ticket.transition(TicketStatus::Resolved, note)?;
    session.mode = SessionMode::AiActive;
    Ok(())
}

/// Reopen a resolved ticket under its existing id.
///
/// Refused when the session already has another non-resolved ticket.
pub fn reopen(
    session: &mut Session,
    ticket: &mut Ticket,
    active: Option<&Ticket>,
    note: &str,
) -> DeskResult<()> {
    if let Some(other) = active.filter(|t| t.ticket_id != ticket.ticket_id) {
        return Err(DeskError::TicketConflict {
            session_id: session.session_id.clone(),
            active_ticket: other.ticket_id.clone(),
        });
    }
    ticket.reopen(note)?;
    session.mode = SessionMode::HumanTakeover;
    Ok(())
}

/// Ticket store keyed by id, with a per-session index of the active ticket
#[derive(Debug, Clone, Default)]
pub struct TicketBook {
    tickets: HashMap<TicketId, Ticket>,
    active: HashMap<SessionId, TicketId>,
}

impl TicketBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tickets(tickets: impl IntoIterator<Item = Ticket>) -> Self {
        let mut book = Self::new();
        for ticket in tickets {
            book.upsert(ticket);
        }
        book
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn get(&self, ticket_id: &str) -> Option<&Ticket> {
        self.tickets.get(ticket_id)
    }

    /// The session's non-resolved ticket
    pub fn active_for(&self, session_id: &str) -> Option<&Ticket> {
        self.active
            .get(session_id)
            .and_then(|id| self.tickets.get(id))
    }

    /// Insert or replace a ticket, keeping the active index in step
    pub fn upsert(&mut self, ticket: Ticket) {
        if ticket.is_active() {
            self.active
                .insert(ticket.session_id.clone(), ticket.ticket_id.clone());
        } else if self.active.get(&ticket.session_id) == Some(&ticket.ticket_id) {
            self.active.remove(&ticket.session_id);
        }
        self.tickets.insert(ticket.ticket_id.clone(), ticket);
    }

    /// Snapshot, newest first, optionally filtered by status
    pub fn list(&self, status: Option<TicketStatus>) -> Vec<Ticket> {
        let mut out: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.ticket_id.cmp(&a.ticket_id))
        });
        out
    }

    pub fn for_session(&self, session_id: &str) -> Vec<Ticket> {
        let mut out: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// Every status present, zero-filled
    pub fn count_by_status(&self) -> BTreeMap<TicketStatus, usize> {
        let mut counts: BTreeMap<TicketStatus, usize> =
            TicketStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for ticket in self.tickets.values() {
            *counts.entry(ticket.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_by_priority(&self) -> BTreeMap<TicketPriority, usize> {
        let mut counts: BTreeMap<TicketPriority, usize> =
            TicketPriority::ALL.into_iter().map(|p| (p, 0)).collect();
        for ticket in self.tickets.values() {
            *counts.entry(ticket.priority).or_insert(0) += 1;
        }
        counts
    }

    /// Active tickets older than `sla`, oldest first
    pub fn overdue(&self, now: DateTime<Utc>, sla: chrono::Duration) -> Vec<Ticket> {
        let mut out: Vec<Ticket> = self
            .tickets
            .values()
            .filter(|t| t.is_overdue(now, sla))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::EscalationReason;

    fn explicit() -> Escalation {
        Escalation::new(EscalationReason::ExplicitRequest, TicketPriority::Low)
    }

    #[test]
    fn test_first_escalation_opens_ticket_and_flips_mode() {
        let mut session = Session::new("s-1", Some("u-1".into()));
        let takeover = escalate(&mut session, None, explicit(), vec![Turn::admin("x")]);

        assert!(matches!(takeover, Takeover::Opened(_)));
        assert_eq!(session.mode, SessionMode::HumanTakeover);
        assert_eq!(takeover.ticket().conversation_snapshot.len(), 1);
        assert_eq!(takeover.ticket().user_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn test_second_escalation_updates_existing_ticket() {
        let mut session = Session::new("s-1", None);
        let first = escalate(&mut session, None, explicit(), vec![]).into_ticket();

        let second = escalate(
            &mut session,
            Some(first.clone()),
            Escalation::new(EscalationReason::SensitiveRequest, TicketPriority::High),
            vec![],
        );
        match second {
            Takeover::Updated {
                ticket,
                previous_priority,
            } => {
                assert_eq!(ticket.ticket_id, first.ticket_id);
                assert_eq!(previous_priority, TicketPriority::Low);
                assert_eq!(ticket.priority, TicketPriority::High);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_returns_to_ai_active() {
        let mut session = Session::new("s-1", None);
        let mut ticket = escalate(&mut session, None, explicit(), vec![]).into_ticket();
        resolve(&mut session, &mut ticket, "fixed").unwrap();
        assert_eq!(session.mode, SessionMode::AiActive);
        assert_eq!(ticket.status, TicketStatus::Resolved);

        // resolving twice is a transition error and leaves the mode alone
        assert!(resolve(&mut session, &mut ticket, "again").is_err());
        assert_eq!(session.mode, SessionMode::AiActive);
    }

    #[test]
    fn test_reopen_conflicts_with_other_active_ticket() {
        let mut session = Session::new("s-1", None);
        let mut old = escalate(&mut session, None, explicit(), vec![]).into_ticket();
        resolve(&mut session, &mut old, "fixed").unwrap();
        let newer = escalate(&mut session, None, explicit(), vec![]).into_ticket();

        let err = reopen(&mut session, &mut old, Some(&newer), "again").unwrap_err();
        assert!(matches!(err, DeskError::TicketConflict { .. }));
        assert_eq!(old.status, TicketStatus::Resolved);
    }

    #[test]
    fn test_book_tracks_active_ticket() {
        let mut session = Session::new("s-1", None);
        let mut ticket = escalate(&mut session, None, explicit(), vec![]).into_ticket();
        let mut book = TicketBook::new();
        book.upsert(ticket.clone());
        assert_eq!(
            book.active_for("s-1").map(|t| t.ticket_id.clone()),
            Some(ticket.ticket_id.clone())
        );

        resolve(&mut session, &mut ticket, "done").unwrap();
        book.upsert(ticket);
        assert!(book.active_for("s-1").is_none());
        assert_eq!(book.count_by_status()[&TicketStatus::Resolved], 1);
        assert_eq!(book.count_by_status()[&TicketStatus::Open], 0);
    }

    #[test]
    fn test_list_is_newest_first_and_filtered() {
        let mut a = Ticket::open("s-a", None, explicit(), vec![]);
        a.created_at = Utc::now() - chrono::Duration::minutes(10);
        let b = Ticket::open("s-b", None, explicit(), vec![]);
        let mut c = Ticket::open("s-c", None, explicit(), vec![]);
        c.transition(TicketStatus::Resolved, "done").unwrap();
        c.created_at = Utc::now() - chrono::Duration::minutes(5);

        let book = TicketBook::from_tickets([a.clone(), b.clone(), c.clone()]);
        let all: Vec<_> = book.list(None).into_iter().map(|t| t.session_id).collect();
        assert_eq!(all, vec!["s-b", "s-c", "s-a"]);

        let open = book.list(Some(TicketStatus::Open));
        assert_eq!(open.len(), 2);
        assert_eq!(book.count_by_priority()[&TicketPriority::Low], 3);
    }

    #[test]
    fn test_overdue_lists_only_old_active_tickets() {
        let mut old = Ticket::open("s-a", None, explicit(), vec![]);
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        let fresh = Ticket::open("s-b", None, explicit(), vec![]);
        let book = TicketBook::from_tickets([old.clone(), fresh]);

        let overdue = book.overdue(Utc::now(), chrono::Duration::minutes(30));
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].ticket_id, old.ticket_id);
    }
}
