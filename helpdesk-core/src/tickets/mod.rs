//! Tickets and the session takeover lifecycle

pub mod machine;
pub mod model;

pub use machine::{escalate, reopen, resolve, Takeover, TicketBook};
pub use model::{EscalationRecord, StatusTransition, Ticket, TicketStatus};
