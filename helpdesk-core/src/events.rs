//! Desk event bus
//!
//! Ticket and mode changes are broadcast after they are committed, so a
//! subscriber never observes a change that was rolled back. Publishing with
//! no subscribers is not an error.

use crate::classifier::Intent;
use crate::escalation::{EscalationReason, TicketPriority};
use crate::tickets::TicketStatus;
use crate::types::{SessionId, SessionMode, TicketId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    TicketOpened {
        ticket_id: TicketId,
        session_id: SessionId,
        reason: EscalationReason,
        priority: TicketPriority,
        timestamp: DateTime<Utc>,
    },
    /// A further escalation was absorbed by an active ticket
    TicketUpdated {
        ticket_id: TicketId,
        reason: EscalationReason,
        priority: TicketPriority,
        previous_priority: TicketPriority,
        timestamp: DateTime<Utc>,
    },
    TicketStatusChanged {
        ticket_id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
        timestamp: DateTime<Utc>,
    },
    TicketReopened {
        ticket_id: TicketId,
        session_id: SessionId,
        reopen_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// A user message arrived during takeover and was queued on the ticket
    UserMessageQueued {
        ticket_id: TicketId,
        session_id: SessionId,
        turn_id: u64,
        intent: Intent,
        timestamp: DateTime<Utc>,
    },
    AdminReplied {
        ticket_id: TicketId,
        session_id: SessionId,
        turn_id: u64,
        timestamp: DateTime<Utc>,
    },
    ModeChanged {
        session_id: SessionId,
        from: SessionMode,
        to: SessionMode,
        timestamp: DateTime<Utc>,
    },
}

impl DeskEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TicketOpened { .. } => "ticket_opened",
            Self::TicketUpdated { .. } => "ticket_updated",
            Self::TicketStatusChanged { .. } => "ticket_status_changed",
            Self::TicketReopened { .. } => "ticket_reopened",
            Self::UserMessageQueued { .. } => "user_message_queued",
            Self::AdminReplied { .. } => "admin_replied",
            Self::ModeChanged { .. } => "mode_changed",
        }
    }

    pub fn ticket_id(&self) -> Option<&str> {
        match self {
            Self::TicketOpened { ticket_id, .. }
            | Self::TicketUpdated { ticket_id, .. }
            | Self::TicketStatusChanged { ticket_id, .. }
            | Self::TicketReopened { ticket_id, .. }
            | Self::UserMessageQueued { ticket_id, .. }
            | Self::AdminReplied { ticket_id, .. } => Some(ticket_id),
            Self::ModeChanged { .. } => None,
        }
    }
}

/// Broadcast channel for [`DeskEvent`]s. Clones share the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeskEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: DeskEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => debug!(event_type, receivers = count, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = DeskEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeskEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
