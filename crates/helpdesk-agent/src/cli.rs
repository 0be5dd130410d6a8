//! Command-line surface: one chat REPL plus operator sub-commands.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use helpdesk_core::{MessageOutcome, SupportDesk, TicketStatus};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Support desk agent backed by Ollama
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML file with desk policy (thresholds, windows, timeouts)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding sessions, tickets and facts (overrides HELPDESK_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// JSON passage file used as the knowledge base (overrides HELPDESK_PASSAGES)
    #[arg(long, global = true)]
    pub passages: Option<PathBuf>,

    /// Ollama model name (overrides HELPDESK_MODEL)
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Let the model label messages no rule matched
    #[arg(long, global = true, default_value_t = false)]
    pub generative_intents: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive conversation; lines starting with `/` are operator commands
    Chat {
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long)]
        user: Option<String>,
    },
    /// Send one message and print the outcome as JSON
    Ask {
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long)]
        user: Option<String>,
        text: String,
    },
    /// Ticket administration
    Tickets {
        #[command(subcommand)]
        command: TicketsCommand,
    },
    /// Ticket counts by status and priority
    Stats,
    /// Print a session's retained turns
    Transcript { session: String },
}

#[derive(Subcommand, Debug)]
pub enum TicketsCommand {
    /// Newest first
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<TicketStatus>,
    },
    Show {
        ticket_id: String,
    },
    /// Reply to the user as an operator
    Reply {
        ticket_id: String,
        text: String,
    },
    Resolve {
        ticket_id: String,
    },
    Reopen {
        ticket_id: String,
    },
    /// Move a ticket forward (IN_PROGRESS or RESOLVED)
    Status {
        ticket_id: String,
        #[arg(value_parser = parse_status)]
        status: TicketStatus,
    },
}

fn parse_status(raw: &str) -> Result<TicketStatus, String> {
    TicketStatus::parse(raw)
        .ok_or_else(|| format!("unknown status '{}' (expected OPEN, IN_PROGRESS or RESOLVED)", raw))
}

/// Run a non-interactive command, writing its output to `out`
pub async fn run(desk: &SupportDesk, command: Command, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Chat { session, user } => chat(desk, &session, user.as_deref()).await,
        Command::Ask {
            session,
            user,
            text,
        } => {
            let outcome = desk.handle_message(&session, user.as_deref(), &text).await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&outcome)?)?;
            Ok(())
        }
        Command::Tickets { command } => tickets(desk, command, out).await,
        Command::Stats => {
            let stats = desk.stats(Utc::now());
            writeln!(out, "sessions: {}", stats.sessions)?;
            for (status, count) in &stats.by_status {
                writeln!(out, "{:<12} {}", status, count)?;
            }
            for (priority, count) in &stats.by_priority {
                writeln!(out, "{:<12} {}", priority, count)?;
            }
            writeln!(out, "overdue: {}", stats.overdue)?;
            Ok(())
        }
        Command::Transcript { session } => {
            for turn in desk.transcript(&session) {
                writeln!(out, "{}", turn.transcript_line())?;
            }
            Ok(())
        }
    }
}

async fn tickets(desk: &SupportDesk, command: TicketsCommand, out: &mut impl Write) -> Result<()> {
    match command {
        TicketsCommand::List { status } => {
            let list = desk.list_tickets(status);
            if list.is_empty() {
                writeln!(out, "no tickets")?;
            }
            for ticket in list {
                writeln!(out, "{}", ticket.summary_line())?;
            }
        }
        TicketsCommand::Show { ticket_id } => {
            let ticket = desk
                .get_ticket(&ticket_id)
                .with_context(|| format!("ticket {} not found", ticket_id))?;
            writeln!(out, "{}", serde_json::to_string_pretty(&ticket)?)?;
        }
        TicketsCommand::Reply { ticket_id, text } => {
            let turn = desk.admin_reply(&ticket_id, &text).await?;
            writeln!(out, "{}", turn.transcript_line())?;
        }
        TicketsCommand::Resolve { ticket_id } => {
            let ticket = desk.resolve_ticket(&ticket_id).await?;
            writeln!(out, "{}", ticket.summary_line())?;
        }
        TicketsCommand::Reopen { ticket_id } => {
            let ticket = desk.reopen_ticket(&ticket_id).await?;
            writeln!(out, "{}", ticket.summary_line())?;
        }
        TicketsCommand::Status { ticket_id, status } => {
            let ticket = desk.update_ticket_status(&ticket_id, status).await?;
            writeln!(out, "{}", ticket.summary_line())?;
        }
    }
    Ok(())
}

fn render_outcome(outcome: &MessageOutcome, out: &mut impl Write) -> Result<()> {
    if let Some(text) = &outcome.answer_text {
        writeln!(out, "assistant: {}", text)?;
    }
    for source in &outcome.sources {
        writeln!(
            out,
            "  source: {} p.{} ({:.2})",
            source.document_id, source.page, source.score
        )?;
    }
    if let Some(notice) = &outcome.notice {
        writeln!(out, "assistant: {}", notice)?;
    }
    Ok(())
}

/// Operator command typed inside the chat REPL
async fn chat_command(desk: &SupportDesk, line: &str, out: &mut impl Write) -> Result<()> {
    let mut parts = line.splitn(3, ' ');
    let name = parts.next().unwrap_or_default();
    let command = match (name, parts.next(), parts.next()) {
        ("/tickets", _, _) => TicketsCommand::List { status: None },
        ("/show", Some(id), _) => TicketsCommand::Show {
            ticket_id: id.to_string(),
        },
        ("/reply", Some(id), Some(text)) => TicketsCommand::Reply {
            ticket_id: id.to_string(),
            text: text.to_string(),
        },
        ("/resolve", Some(id), _) => TicketsCommand::Resolve {
            ticket_id: id.to_string(),
        },
        ("/reopen", Some(id), _) => TicketsCommand::Reopen {
            ticket_id: id.to_string(),
        },
        _ => bail!("unknown command: {} (try /tickets, /show, /reply, /resolve, /reopen, /quit)", line),
    };
    tickets(desk, command, out).await
}

async fn chat(desk: &SupportDesk, session_id: &str, user_id: Option<&str>) -> Result<()> {
    let session = desk.open_session(session_id, user_id).await?;
    info!(session_id, mode = %session.mode, "Chat started");

    let mut events = desk.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    info!(event = event.event_type(), ticket_id = ?event.ticket_id(), "Desk event")
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event watcher lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    loop {
        write!(stdout, "you: ")?;
        stdout.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let result = if line.starts_with('/') {
            chat_command(desk, line, &mut stdout).await
        } else {
            match desk.handle_message(session_id, user_id, line).await {
                Ok(outcome) => render_outcome(&outcome, &mut stdout),
                Err(e) => Err(e.into()),
            }
        };
        if let Err(e) = result {
            writeln!(stdout, "error: {:#}", e)?;
        }
    }

    watcher.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use helpdesk_core::{Route, SessionMode};

    fn desk() -> SupportDesk {
        SupportDesk::builder().build().unwrap()
    }

    fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_parses_ticket_status_subcommand() {
        let cli = Cli::try_parse_from([
            "helpdesk-agent",
            "--data-dir",
            "/tmp/desk",
            "tickets",
            "status",
            "TICKET-1",
            "in-progress",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/desk")));
        match cli.command {
            Command::Tickets {
                command: TicketsCommand::Status { ticket_id, status },
            } => {
                assert_eq!(ticket_id, "TICKET-1");
                assert_eq!(status, TicketStatus::InProgress);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_status() {
        assert!(Cli::try_parse_from(["helpdesk-agent", "tickets", "list", "--status", "closed"]).is_err());
    }

    #[tokio::test]
    async fn test_ask_prints_outcome_json() {
        let desk = desk();
        let mut buf = Vec::new();
        run(
            &desk,
            Command::Ask {
                session: "s-1".into(),
                user: None,
                text: "I want to talk to a human".into(),
            },
            &mut buf,
        )
        .await
        .unwrap();

        let outcome: MessageOutcome = serde_json::from_str(&output(buf)).unwrap();
        assert_eq!(outcome.route, Route::Escalated);
        assert_eq!(outcome.session_mode, SessionMode::HumanTakeover);
    }

    #[tokio::test]
    async fn test_operator_flow_through_commands() {
        let desk = desk();
        let outcome = desk
            .handle_message("s-1", None, "connect me to support")
            .await
            .unwrap();
        let id = outcome.ticket.unwrap().ticket_id;

        let mut buf = Vec::new();
        chat_command(&desk, &format!("/reply {} On it!", id), &mut buf)
            .await
            .unwrap();
        chat_command(&desk, &format!("/resolve {}", id), &mut buf)
            .await
            .unwrap();
        run(&desk, Command::Stats, &mut buf).await.unwrap();

        let text = output(buf);
        assert!(text.contains("On it!"));
        assert!(text.contains("RESOLVED"));
        assert!(text.contains("overdue: 0"));
    }

    #[tokio::test]
    async fn test_unknown_chat_command_is_an_error() {
        let desk = desk();
        let mut buf = Vec::new();
        assert!(chat_command(&desk, "/frobnicate", &mut buf).await.is_err());
    }
}
