//! Canned user-facing texts

use crate::tickets::Ticket;

/// Shown when a message could not be processed safely
pub const SUPPORT_HANDOFF_REPLY: &str =
    "I'm sorry, something went wrong on our side. Let me connect you with support.";

pub fn greeting(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("Hi {}! How can I help you today?", name),
        None => "Hi! I'm your support assistant. I can help with questions about our \
                 products, documents and support tickets."
            .to_string(),
    }
}

pub fn name_stored(name: &str) -> String {
    format!("Nice to meet you, {}! How can I help you today?", name)
}

pub fn name_recalled(name: &str) -> String {
    format!("Yes, I remember you. Your name is {}.", name)
}

pub fn name_unknown() -> String {
    "I don't know your name yet. You can tell me by saying \"My name is ...\".".to_string()
}

/// Reply sent when a conversation is handed to a human
pub fn escalation_notice(ticket: &Ticket) -> String {
    format!(
        "This issue needs a human support agent, so I've created a ticket for you.\n\
         Reason: {}\nPriority: {}\nTicket ID: {}\n\
         An agent will reply in this conversation.",
        ticket.reason, ticket.priority, ticket.ticket_id
    )
}

/// Reply to user messages while a human owns the session
pub fn takeover_notice(ticket: &Ticket) -> String {
    format!(
        "A support agent is handling your ticket {} ({}). \
         Your message has been added to it.",
        ticket.ticket_id, ticket.status
    )
}
