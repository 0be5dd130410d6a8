//! Support desk: the per-message decision pipeline and its admin surface
//!
//! # Message flow
//!
//! ```text
//! handle_message(session, user, text)
//!   │  lock session, then owner (single-flight)
//!   ├─ stage: session, turn log, facts, escalation state, active ticket
//!   ├─ classify (rules → optional model)
//!   ├─ append user turn, record identity / reported-issue facts
//!   ├─ escalation engine: observe intent
//!   ├─ HUMAN_TAKEOVER? ── absorb escalation, queue message on the ticket,
//!   │                     no answer, notice
//!   ├─ ESCALATE? ──────── open ticket + flip mode, notice
//!   ├─ identity / greeting fast-paths
//!   └─ orchestrator answer ─► observe outcome ─► maybe ESCALATE(AI_FAILURE)
//!   commit staged changes (persist, then apply)
//!     └─ failed? ─► recovery commit: ESCALATE(SYSTEM_ERROR), handoff reply
//! ```

mod ledger;
pub mod replies;

use crate::classifier::{
    is_greeting, GenerativeIntentModel, IdentityClaim, Intent, IntentClassifier, IntentModel,
};
use crate::collaborators::{EmptyRetriever, Generator, Retriever, UnavailableGenerator};
use crate::config::DeskConfig;
use crate::error::{DeskError, DeskResult};
use crate::escalation::{Escalation, EscalationEngine, EscalationState, TicketPriority};
use crate::events::DeskEvent;
use crate::locks::KeyedLocks;
use crate::memory::{ConversationContext, MemoryStore};
use crate::orchestrator::{AnswerOrchestrator, AnswerOutcome};
use crate::persistence::{MemoryPersistence, Persistence};
use crate::tickets::{self, Takeover, Ticket, TicketStatus};
use crate::types::{owner_key, LongTermFact, Session, SessionMode, SourceRef, Turn};
use chrono::{DateTime, Utc};
use ledger::{Changeset, DeskState, Ledger};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Fact key holding the user's stated name
pub const NAME_FACT: &str = "name";
/// Fact key holding the last refund/complaint/human-request message
pub const LAST_REPORTED_ISSUE_FACT: &str = "last_reported_issue";

/// How a message was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Grounded answer from the knowledge base
    Answered,
    InsufficientEvidence,
    /// Generation failed after grounding
    AnswerFailed,
    Greeting,
    /// Name stored or recalled
    Identity,
    /// This message opened or updated a ticket
    Escalated,
    /// Session already owned by a human; no automated answer
    HumanTakeover,
    /// Processing failed and the session was handed to support
    SystemError,
}

/// Result of [`SupportDesk::handle_message`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageOutcome {
    pub session_id: String,
    pub intent: Intent,
    pub route: Route,
    /// None whenever the session ends up in HUMAN_TAKEOVER
    pub answer_text: Option<String>,
    pub sources: Vec<SourceRef>,
    pub session_mode: SessionMode,
    /// The session's active ticket, if any
    pub ticket: Option<Ticket>,
    /// Escalation or takeover message for the user
    pub notice: Option<String>,
}

/// Ticket counts for admin dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeskStats {
    pub sessions: usize,
    pub by_status: BTreeMap<TicketStatus, usize>,
    pub by_priority: BTreeMap<TicketPriority, usize>,
    pub overdue: usize,
}

/// Working copy of everything one message may change
#[derive(Debug, Clone)]
struct Work {
    session: Session,
    owner: String,
    /// Staged view: this session's log and the owner's facts
    memory: MemoryStore,
    escalation: EscalationState,
    active: Option<Ticket>,
    facts_dirty: bool,
    ticket_dirty: bool,
    events: Vec<DeskEvent>,
}

impl Work {
    fn append(&mut self, turn: Turn) -> Turn {
        self.memory.append_turn(&self.session.session_id, turn)
    }

    fn set_fact(&mut self, key: &str, value: &str) {
        self.memory.set_fact(&self.owner, key, value);
        self.facts_dirty = true;
    }

    fn fact(&self, key: &str) -> Option<&str> {
        self.memory
            .get_fact(&self.owner, key)
            .map(|f| f.value.as_str())
    }

    fn into_changeset(self) -> Changeset {
        let mut changes = Changeset::new();
        let session_id = self.session.session_id.clone();
        if let Some(log) = self.memory.session_log(&session_id) {
            changes.put_log(&session_id, log.clone());
        }
        if self.facts_dirty {
            changes.put_facts(&self.owner, self.memory.owner_facts(&self.owner));
        }
        changes
            .put_session(self.session)
            .put_escalation(self.escalation);
        if self.ticket_dirty {
            if let Some(ticket) = self.active {
                changes.put_ticket(ticket);
            }
        }
        for event in self.events {
            changes.event(event);
        }
        changes
    }
}

/// Builder for [`SupportDesk`]
#[derive(Default)]
pub struct SupportDeskBuilder {
    config: DeskConfig,
    retriever: Option<Arc<dyn Retriever>>,
    generator: Option<Arc<dyn Generator>>,
    intent_model: Option<Arc<dyn IntentModel>>,
    generative_intents: bool,
    persistence: Option<Arc<dyn Persistence>>,
}

impl SupportDeskBuilder {
    pub fn config(mut self, config: DeskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn intent_model(mut self, model: Arc<dyn IntentModel>) -> Self {
        self.intent_model = Some(model);
        self
    }

    /// Classify rule-less messages with the configured generator
    pub fn generative_intents(mut self, enabled: bool) -> Self {
        self.generative_intents = enabled;
        self
    }

    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Start with empty state
    pub fn build(self) -> DeskResult<SupportDesk> {
        let capacity = self.config.short_term_capacity;
        self.assemble(|_| Ok(DeskState::new(capacity)))
    }

    /// Rebuild state from the persistence backend
    pub fn restore(self) -> DeskResult<SupportDesk> {
        let capacity = self.config.short_term_capacity;
        self.assemble(|p| Ok(DeskState::load(p, capacity)?))
    }

    fn assemble(
        self,
        state: impl FnOnce(&dyn Persistence) -> DeskResult<DeskState>,
    ) -> DeskResult<SupportDesk> {
        self.config.validate()?;

        let retriever = self
            .retriever
            .unwrap_or_else(|| Arc::new(EmptyRetriever));
        let generator = self
            .generator
            .unwrap_or_else(|| Arc::new(UnavailableGenerator));
        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(MemoryPersistence::new()));

        let model = match self.intent_model {
            Some(model) => Some(model),
            None if self.generative_intents => {
                Some(Arc::new(GenerativeIntentModel::new(generator.clone())) as Arc<dyn IntentModel>)
            }
            None => None,
        };
        let classifier = match model {
            Some(model) => IntentClassifier::with_model(model, self.config.classifier_timeout()),
            None => IntentClassifier::rules_only(),
        };

        let state = state(persistence.as_ref())?;
        Ok(SupportDesk {
            engine: EscalationEngine::with_config(self.config.escalation()),
            orchestrator: AnswerOrchestrator::new(retriever, generator, self.config.answering()),
            classifier,
            ledger: Ledger::new(state, persistence),
            session_locks: KeyedLocks::new(),
            owner_locks: KeyedLocks::new(),
            config: self.config,
        })
    }
}

/// The decision core
pub struct SupportDesk {
    config: DeskConfig,
    classifier: IntentClassifier,
    engine: EscalationEngine,
    orchestrator: AnswerOrchestrator,
    ledger: Ledger,
    session_locks: KeyedLocks,
    owner_locks: KeyedLocks,
}

impl SupportDesk {
    pub fn builder() -> SupportDeskBuilder {
        SupportDeskBuilder::default()
    }

    pub fn new(
        config: DeskConfig,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        intent_model: Option<Arc<dyn IntentModel>>,
        persistence: Arc<dyn Persistence>,
    ) -> DeskResult<Self> {
        Self::configure(config, retriever, generator, intent_model, persistence).build()
    }

    /// Like [`SupportDesk::new`], but loads committed state from `persistence`
    pub fn restore(
        config: DeskConfig,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        intent_model: Option<Arc<dyn IntentModel>>,
        persistence: Arc<dyn Persistence>,
    ) -> DeskResult<Self> {
        Self::configure(config, retriever, generator, intent_model, persistence).restore()
    }

    fn configure(
        config: DeskConfig,
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        intent_model: Option<Arc<dyn IntentModel>>,
        persistence: Arc<dyn Persistence>,
    ) -> SupportDeskBuilder {
        let mut builder = Self::builder()
            .config(config)
            .retriever(retriever)
            .generator(generator)
            .persistence(persistence);
        if let Some(model) = intent_model {
            builder = builder.intent_model(model);
        }
        builder
    }

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeskEvent> {
        self.ledger.events().subscribe()
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Process one user message end to end.
    ///
    /// Messages of one session are handled strictly one at a time, in
    /// arrival order. Only a persistence failure that also defeats the
    /// SYSTEM_ERROR handoff is returned as an error.
    pub async fn handle_message(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        text: &str,
    ) -> DeskResult<MessageOutcome> {
        let _session_guard = self.session_locks.acquire(session_id).await;
        let session = self.resolve_session(session_id, user_id);
        let owner = session.owner_key();
        let _owner_guard = self.owner_locks.acquire(&owner).await;

        let base = self.stage(session);
        let (work, outcome) = self.process(base.clone(), text).await;
        let intent = outcome.intent;

        let err = match self.ledger.commit(work.into_changeset()).await {
            Ok(()) => {
                info!(
                    session_id,
                    intent = %outcome.intent,
                    route = ?outcome.route,
                    mode = %outcome.session_mode,
                    "Message handled"
                );
                return Ok(outcome);
            }
            Err(e) => e,
        };

        warn!(session_id, error = %err, "Commit failed; handing session to support");
        let (work, outcome) = self.recover(base, text, intent);
        match self.ledger.commit(work.into_changeset()).await {
            Ok(()) => Ok(outcome),
            Err(recovery_err) => {
                warn!(session_id, error = %recovery_err, "Recovery commit failed; message aborted");
                Err(err.into())
            }
        }
    }

    /// Existing session, binding `user_id` if the session was anonymous
    fn resolve_session(&self, session_id: &str, user_id: Option<&str>) -> Session {
        let existing = self.ledger.read(|s| s.sessions.get(session_id).cloned());
        match existing {
            None => Session::new(session_id, user_id.map(String::from)),
            Some(mut session) => {
                match (session.user_id.as_deref(), user_id) {
                    (None, Some(user)) => session.user_id = Some(user.to_string()),
                    (Some(bound), Some(user)) if bound != user => {
                        warn!(session_id, bound, user, "Session already bound to another user");
                    }
                    _ => {}
                }
                session
            }
        }
    }

    fn stage(&self, mut session: Session) -> Work {
        let owner = session.owner_key();
        let session_id = session.session_id.clone();
        let (memory, escalation, active) = self.ledger.read(|s| {
            (
                s.memory.stage(&owner, Some(session_id.as_str())),
                s.escalation.get(&owner).cloned(),
                s.tickets.active_for(&session_id).cloned(),
            )
        });

        // The ticket book is authoritative for the mode
        let mode = if active.is_some() {
            SessionMode::HumanTakeover
        } else {
            SessionMode::AiActive
        };
        if session.mode != mode {
            warn!(session_id = %session_id, stored = %session.mode, derived = %mode, "Session mode out of step with tickets");
            session.mode = mode;
        }

        Work {
            session,
            escalation: escalation.unwrap_or_else(|| EscalationState::new(owner.clone())),
            owner,
            memory,
            active,
            facts_dirty: false,
            ticket_dirty: false,
            events: Vec::new(),
        }
    }

    async fn process(&self, mut work: Work, text: &str) -> (Work, MessageOutcome) {
        self.engine.refresh(&mut work.escalation, Utc::now());

        let history = work
            .memory
            .get_context(&work.session.session_id, self.config.context_window);
        let classification = self.classifier.classify(text, &history).await;
        let intent = classification.intent;
        let user_turn = work.append(Turn::user(text, intent));

        if let Some(IdentityClaim::Assert { key, value }) = &classification.identity {
            work.set_fact(key, value);
        }
        if matches!(
            intent,
            Intent::Refund | Intent::Complaint | Intent::HumanRequest
        ) {
            work.set_fact(LAST_REPORTED_ISSUE_FACT, text);
        }

        let escalation = self.engine.observe_intent(&mut work.escalation, intent);

        if work.session.mode == SessionMode::HumanTakeover {
            if let Some(e) = escalation {
                self.route_escalation(&mut work, e);
            }
            self.queue_for_operator(&mut work, user_turn, intent);
            let notice = work.active.as_ref().map(replies::takeover_notice);
            let outcome = self.outcome(&work, intent, Route::HumanTakeover, None, Vec::new(), notice);
            return (work, outcome);
        }

        if let Some(e) = escalation {
            return self.escalated(work, intent, e);
        }

        if let Some(claim) = &classification.identity {
            let reply = match claim {
                IdentityClaim::Assert { value, .. } => replies::name_stored(value),
                IdentityClaim::Query { key } => match work.fact(key) {
                    Some(name) => replies::name_recalled(name),
                    None => replies::name_unknown(),
                },
            };
            return self.reply(work, intent, Route::Identity, reply, Vec::new());
        }

        if intent == Intent::General && is_greeting(text) {
            let reply = replies::greeting(work.fact(NAME_FACT));
            return self.reply(work, intent, Route::Greeting, reply, Vec::new());
        }

        let context = ConversationContext {
            facts: work.memory.facts(&work.owner),
            turns: history.turns,
        };
        let answer = self.orchestrator.answer(text, &context).await;
        if let Some(e) = self.engine.observe_answer(&mut work.escalation, answer.signal()) {
            return self.escalated(work, intent, e);
        }

        let route = match &answer {
            AnswerOutcome::Grounded { .. } => Route::Answered,
            AnswerOutcome::InsufficientEvidence(_) => Route::InsufficientEvidence,
            AnswerOutcome::Failed { .. } => Route::AnswerFailed,
        };
        let reply = answer.reply_text().to_string();
        let sources = answer.sources().to_vec();
        self.reply(work, intent, route, reply, sources)
    }

    /// SYSTEM_ERROR handoff built on the pre-message state
    fn recover(&self, mut work: Work, text: &str, intent: Intent) -> (Work, MessageOutcome) {
        let was_takeover = work.session.mode == SessionMode::HumanTakeover;
        let user_turn = work.append(Turn::user(text, intent));
        self.route_escalation(&mut work, Escalation::system_error());
        if was_takeover {
            self.queue_for_operator(&mut work, user_turn, intent);
        }
        work.append(Turn::assistant(replies::SUPPORT_HANDOFF_REPLY, Vec::new()));
        let outcome = self.outcome(
            &work,
            intent,
            Route::SystemError,
            None,
            Vec::new(),
            Some(replies::SUPPORT_HANDOFF_REPLY.to_string()),
        );
        (work, outcome)
    }

    fn escalated(&self, mut work: Work, intent: Intent, escalation: Escalation) -> (Work, MessageOutcome) {
        self.route_escalation(&mut work, escalation);
        let notice = work.active.as_ref().map(replies::escalation_notice);
        if let Some(notice) = &notice {
            work.append(Turn::assistant(notice.clone(), Vec::new()));
        }
        let outcome = self.outcome(&work, intent, Route::Escalated, None, Vec::new(), notice);
        (work, outcome)
    }

    fn reply(
        &self,
        mut work: Work,
        intent: Intent,
        route: Route,
        text: String,
        sources: Vec<SourceRef>,
    ) -> (Work, MessageOutcome) {
        work.append(Turn::assistant(text.clone(), sources.clone()));
        let outcome = self.outcome(&work, intent, route, Some(text), sources, None);
        (work, outcome)
    }

    fn outcome(
        &self,
        work: &Work,
        intent: Intent,
        route: Route,
        answer_text: Option<String>,
        sources: Vec<SourceRef>,
        notice: Option<String>,
    ) -> MessageOutcome {
        MessageOutcome {
            session_id: work.session.session_id.clone(),
            intent,
            route,
            answer_text,
            sources,
            session_mode: work.session.mode,
            ticket: work.active.clone(),
            notice,
        }
    }

    /// Attach a takeover-period user turn to the active ticket
    fn queue_for_operator(&self, work: &mut Work, turn: Turn, intent: Intent) {
        let Some(ticket) = work.active.as_mut() else {
            return;
        };
        info!(
            ticket_id = %ticket.ticket_id,
            turn_id = turn.turn_id,
            intent = %intent,
            "User message queued for operator"
        );
        work.events.push(DeskEvent::UserMessageQueued {
            ticket_id: ticket.ticket_id.clone(),
            session_id: ticket.session_id.clone(),
            turn_id: turn.turn_id,
            intent,
            timestamp: turn.timestamp,
        });
        ticket.add_message(turn);
        work.ticket_dirty = true;
    }

    /// Open a ticket or fold the escalation into the active one
    fn route_escalation(&self, work: &mut Work, escalation: Escalation) {
        let from = work.session.mode;
        let snapshot = work.memory.turns(&work.session.session_id);
        let takeover = tickets::escalate(&mut work.session, work.active.take(), escalation, snapshot);
        let now = Utc::now();

        match &takeover {
            Takeover::Opened(ticket) => {
                info!(
                    session_id = %ticket.session_id,
                    ticket_id = %ticket.ticket_id,
                    reason = %ticket.reason,
                    priority = %ticket.priority,
                    "Ticket opened"
                );
                work.events.push(DeskEvent::TicketOpened {
                    ticket_id: ticket.ticket_id.clone(),
                    session_id: ticket.session_id.clone(),
                    reason: ticket.reason,
                    priority: ticket.priority,
                    timestamp: now,
                });
            }
            Takeover::Updated {
                ticket,
                previous_priority,
            } => {
                info!(
                    ticket_id = %ticket.ticket_id,
                    reason = %escalation.reason,
                    priority = %ticket.priority,
                    "Escalation absorbed by active ticket"
                );
                work.events.push(DeskEvent::TicketUpdated {
                    ticket_id: ticket.ticket_id.clone(),
                    reason: ticket.reason,
                    priority: ticket.priority,
                    previous_priority: *previous_priority,
                    timestamp: now,
                });
            }
        }

        if from != work.session.mode {
            work.events.push(DeskEvent::ModeChanged {
                session_id: work.session.session_id.clone(),
                from,
                to: work.session.mode,
                timestamp: now,
            });
        }
        work.active = Some(takeover.into_ticket());
        work.ticket_dirty = true;
    }

    // ------------------------------------------------------------------
    // Tickets
    // ------------------------------------------------------------------

    pub fn get_ticket(&self, ticket_id: &str) -> Option<Ticket> {
        self.ledger.read(|s| s.tickets.get(ticket_id).cloned())
    }

    fn ticket_or_err(&self, ticket_id: &str) -> DeskResult<Ticket> {
        self.get_ticket(ticket_id)
            .ok_or_else(|| DeskError::TicketNotFound(ticket_id.to_string()))
    }

    fn committed_session(&self, session_id: &str) -> DeskResult<Session> {
        self.session(session_id)
            .ok_or_else(|| DeskError::SessionNotFound(session_id.to_string()))
    }

    /// Newest first
    pub fn list_tickets(&self, status: Option<TicketStatus>) -> Vec<Ticket> {
        self.ledger.read(|s| s.tickets.list(status))
    }

    pub fn active_ticket(&self, session_id: &str) -> Option<Ticket> {
        self.ledger.read(|s| s.tickets.active_for(session_id).cloned())
    }

    /// Operator reply: appended to the session as an admin turn.
    ///
    /// The first reply moves an OPEN ticket to IN_PROGRESS. Replies to a
    /// RESOLVED ticket are rejected.
    pub async fn admin_reply(&self, ticket_id: &str, text: &str) -> DeskResult<Turn> {
        let session_id = self.ticket_or_err(ticket_id)?.session_id;
        let _session_guard = self.session_locks.acquire(&session_id).await;

        let mut ticket = self.ticket_or_err(ticket_id)?;
        if !ticket.is_active() {
            return Err(DeskError::transition(
                format!("ticket {}", ticket_id),
                ticket.status,
                "ADMIN_REPLY",
            ));
        }

        let mut changes = Changeset::new();
        let now = Utc::now();
        if ticket.status == TicketStatus::Open {
            ticket.transition(TicketStatus::InProgress, "operator replied")?;
            changes.event(DeskEvent::TicketStatusChanged {
                ticket_id: ticket.ticket_id.clone(),
                from: TicketStatus::Open,
                to: TicketStatus::InProgress,
                timestamp: now,
            });
        }

        let owner = self
            .session(&session_id)
            .map(|s| s.owner_key())
            .unwrap_or_else(|| owner_key(&session_id, ticket.user_id.as_deref()));
        let mut memory = self.ledger.read(|s| s.memory.stage(&owner, Some(session_id.as_str())));
        let turn = memory.append_turn(&session_id, Turn::admin(text));
        ticket.add_reply(turn.clone());

        if let Some(log) = memory.session_log(&session_id) {
            changes.put_log(&session_id, log.clone());
        }
        changes
            .put_ticket(ticket)
            .event(DeskEvent::AdminReplied {
                ticket_id: ticket_id.to_string(),
                session_id: session_id.clone(),
                turn_id: turn.turn_id,
                timestamp: now,
            });
        self.ledger.commit(changes).await?;

        info!(ticket_id, session_id = %session_id, turn_id = turn.turn_id, "Operator replied");
        Ok(turn)
    }

    /// RESOLVED, session back to AI_ACTIVE, user's escalation counters cleared
    pub async fn resolve_ticket(&self, ticket_id: &str) -> DeskResult<Ticket> {
        let session_id = self.ticket_or_err(ticket_id)?.session_id;
        let _session_guard = self.session_locks.acquire(&session_id).await;

        let mut ticket = self.ticket_or_err(ticket_id)?;
        let mut session = self.committed_session(&session_id)?;
        let owner = session.owner_key();
        let _owner_guard = self.owner_locks.acquire(&owner).await;

        let from_status = ticket.status;
        let from_mode = session.mode;
        tickets::resolve(&mut session, &mut ticket, "resolved by operator")?;

        let mut escalation = self
            .ledger
            .read(|s| s.escalation.get(&owner).cloned())
            .unwrap_or_else(|| EscalationState::new(owner.clone()));
        escalation.reset();

        let now = Utc::now();
        let mut changes = Changeset::new();
        changes
            .put_escalation(escalation)
            .event(DeskEvent::TicketStatusChanged {
                ticket_id: ticket.ticket_id.clone(),
                from: from_status,
                to: TicketStatus::Resolved,
                timestamp: now,
            });
        if from_mode != session.mode {
            changes.event(DeskEvent::ModeChanged {
                session_id: session_id.clone(),
                from: from_mode,
                to: session.mode,
                timestamp: now,
            });
        }
        changes.put_session(session).put_ticket(ticket.clone());
        self.ledger.commit(changes).await?;

        info!(ticket_id, session_id = %session_id, "Ticket resolved");
        Ok(ticket)
    }

    /// Forward-only status change. RESOLVED goes through [`Self::resolve_ticket`].
    pub async fn update_ticket_status(
        &self,
        ticket_id: &str,
        status: TicketStatus,
    ) -> DeskResult<Ticket> {
        if status == TicketStatus::Resolved {
            return self.resolve_ticket(ticket_id).await;
        }

        let session_id = self.ticket_or_err(ticket_id)?.session_id;
        let _session_guard = self.session_locks.acquire(&session_id).await;

        let mut ticket = self.ticket_or_err(ticket_id)?;
        let from = ticket.status;
        ticket.transition(status, "status updated by operator")?;

        let mut changes = Changeset::new();
        changes
            .put_ticket(ticket.clone())
            .event(DeskEvent::TicketStatusChanged {
                ticket_id: ticket.ticket_id.clone(),
                from,
                to: status,
                timestamp: Utc::now(),
            });
        self.ledger.commit(changes).await?;
        Ok(ticket)
    }

    /// RESOLVED → OPEN under the same ticket id; the session re-enters
    /// HUMAN_TAKEOVER. Fails with [`DeskError::TicketConflict`] if the
    /// session already has another active ticket.
    pub async fn reopen_ticket(&self, ticket_id: &str) -> DeskResult<Ticket> {
        let session_id = self.ticket_or_err(ticket_id)?.session_id;
        let _session_guard = self.session_locks.acquire(&session_id).await;

        let mut ticket = self.ticket_or_err(ticket_id)?;
        let mut session = self.committed_session(&session_id)?;
        let active = self.active_ticket(&session_id);

        let from_mode = session.mode;
        tickets::reopen(&mut session, &mut ticket, active.as_ref(), "reopened by operator")?;

        let now = Utc::now();
        let mut changes = Changeset::new();
        changes
            .event(DeskEvent::TicketReopened {
                ticket_id: ticket.ticket_id.clone(),
                session_id: session_id.clone(),
                reopen_count: ticket.reopen_count,
                timestamp: now,
            })
            .event(DeskEvent::TicketStatusChanged {
                ticket_id: ticket.ticket_id.clone(),
                from: TicketStatus::Resolved,
                to: TicketStatus::Open,
                timestamp: now,
            });
        if from_mode != session.mode {
            changes.event(DeskEvent::ModeChanged {
                session_id: session_id.clone(),
                from: from_mode,
                to: session.mode,
                timestamp: now,
            });
        }
        changes.put_session(session).put_ticket(ticket.clone());
        self.ledger.commit(changes).await?;

        info!(ticket_id, session_id = %session_id, reopen_count = ticket.reopen_count, "Ticket reopened");
        Ok(ticket)
    }

    pub fn count_by_status(&self) -> BTreeMap<TicketStatus, usize> {
        self.ledger.read(|s| s.tickets.count_by_status())
    }

    pub fn count_by_priority(&self) -> BTreeMap<TicketPriority, usize> {
        self.ledger.read(|s| s.tickets.count_by_priority())
    }

    /// Active tickets older than the configured SLA, oldest first
    pub fn overdue_tickets(&self, now: DateTime<Utc>) -> Vec<Ticket> {
        let sla = self.config.ticket_sla();
        self.ledger.read(|s| s.tickets.overdue(now, sla))
    }

    pub fn stats(&self, now: DateTime<Utc>) -> DeskStats {
        let sla = self.config.ticket_sla();
        self.ledger.read(|s| DeskStats {
            sessions: s.sessions.len(),
            by_status: s.tickets.count_by_status(),
            by_priority: s.tickets.count_by_priority(),
            overdue: s.tickets.overdue(now, sla).len(),
        })
    }

    // ------------------------------------------------------------------
    // Sessions and memory
    // ------------------------------------------------------------------

    /// Create a session, or return the existing one
    pub async fn open_session(&self, session_id: &str, user_id: Option<&str>) -> DeskResult<Session> {
        let _session_guard = self.session_locks.acquire(session_id).await;
        let existing = self.session(session_id);
        let session = self.resolve_session(session_id, user_id);
        if existing.as_ref() == Some(&session) {
            return Ok(session);
        }

        let mut changes = Changeset::new();
        changes.put_session(session.clone());
        self.ledger.commit(changes).await?;
        info!(session_id, owner = %session.owner_key(), "Session opened");
        Ok(session)
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.ledger.read(|s| s.sessions.get(session_id).cloned())
    }

    /// Destroy a session: turns dropped, escalation counters reset.
    ///
    /// Facts of a named user survive; an anonymous session's facts go with
    /// it. Refused while the session has an active ticket.
    pub async fn clear_session(&self, session_id: &str) -> DeskResult<()> {
        let _session_guard = self.session_locks.acquire(session_id).await;
        let session = self.committed_session(session_id)?;
        let owner = session.owner_key();
        let _owner_guard = self.owner_locks.acquire(&owner).await;

        if let Some(active) = self.active_ticket(session_id) {
            return Err(DeskError::TicketConflict {
                session_id: session_id.to_string(),
                active_ticket: active.ticket_id,
            });
        }

        let mut changes = Changeset::new();
        changes
            .remove_session(session_id)
            .put_escalation(EscalationState::new(owner.clone()));
        if session.user_id.is_none() {
            changes.put_facts(&owner, BTreeMap::new());
        }
        self.ledger.commit(changes).await?;
        info!(session_id, "Session cleared");
        Ok(())
    }

    /// Store a durable fact for a named user
    pub async fn set_fact(&self, user_id: &str, key: &str, value: &str) -> DeskResult<LongTermFact> {
        let owner = owner_key("", Some(user_id));
        let _owner_guard = self.owner_locks.acquire(&owner).await;

        let mut memory = self.ledger.read(|s| s.memory.stage(&owner, None));
        let fact = memory.set_fact(&owner, key, value);

        let mut changes = Changeset::new();
        changes.put_facts(&owner, memory.owner_facts(&owner));
        self.ledger.commit(changes).await?;
        Ok(fact)
    }

    /// None when the user never asserted `key`
    pub fn get_fact(&self, user_id: &str, key: &str) -> Option<LongTermFact> {
        let owner = owner_key("", Some(user_id));
        self.ledger
            .read(|s| s.memory.get_fact(&owner, key).cloned())
    }

    /// Facts first, then the last `window` turns
    pub fn context(&self, session_id: &str, window: usize) -> ConversationContext {
        self.ledger.read(|s| s.memory.get_context(session_id, window))
    }

    /// All retained turns, oldest first
    pub fn transcript(&self, session_id: &str) -> Vec<Turn> {
        self.ledger.read(|s| s.memory.turns(session_id))
    }

    /// Counters of the session's owner
    pub fn escalation_state(&self, session_id: &str) -> Option<EscalationState> {
        let owner = self
            .session(session_id)
            .map(|s| s.owner_key())
            .unwrap_or_else(|| owner_key(session_id, None));
        self.ledger.read(|s| s.escalation.get(&owner).cloned())
    }
}
