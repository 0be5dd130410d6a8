//! Committed desk state and the write path into it.
//!
//! Request handlers never mutate [`DeskState`] directly. They stage whole
//! records in a [`Changeset`]; [`Ledger::commit`] persists the batch and
//! only then applies it in memory. Commits are serialized by a writer lock
//! held on the blocking pool. A failed batch changes nothing, which keeps
//! ticket creation and the mode flip together.

use crate::error::PersistenceError;
use crate::escalation::EscalationState;
use crate::events::{DeskEvent, EventBus};
use crate::memory::{MemoryStore, SessionLog};
use crate::persistence::{ns, Persistence, WriteOp};
use crate::tickets::{Ticket, TicketBook};
use crate::types::{LongTermFact, Session, SessionId};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Everything the desk knows, as last committed
#[derive(Debug, Clone)]
pub(crate) struct DeskState {
    pub sessions: HashMap<SessionId, Session>,
    pub memory: MemoryStore,
    /// Keyed by owner key
    pub escalation: HashMap<String, EscalationState>,
    pub tickets: TicketBook,
}

impl DeskState {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            memory: MemoryStore::new(capacity),
            escalation: HashMap::new(),
            tickets: TicketBook::new(),
        }
    }

    /// Rebuild from every namespace of a persistence backend
    pub fn load(persistence: &dyn Persistence, capacity: usize) -> Result<Self, PersistenceError> {
        let mut state = Self::new(capacity);

        for (id, session) in load_all::<Session>(persistence, ns::SESSIONS)? {
            state.sessions.insert(id, session);
        }
        for (id, log) in load_all::<SessionLog>(persistence, ns::TURNS)? {
            state.memory.put_session_log(&id, log);
        }
        for (owner, facts) in load_all::<BTreeMap<String, LongTermFact>>(persistence, ns::FACTS)? {
            state.memory.put_facts(&owner, facts);
        }
        for (owner, esc) in load_all::<EscalationState>(persistence, ns::ESCALATION)? {
            state.escalation.insert(owner, esc);
        }
        state.tickets =
            TicketBook::from_tickets(load_all::<Ticket>(persistence, ns::TICKETS)?.into_iter().map(|(_, t)| t));

        info!(
            sessions = state.sessions.len(),
            tickets = state.tickets.len(),
            "Desk state restored"
        );
        Ok(state)
    }
}

fn load_all<T: DeserializeOwned>(
    persistence: &dyn Persistence,
    namespace: &str,
) -> Result<Vec<(String, T)>, PersistenceError> {
    persistence
        .list(namespace)?
        .into_iter()
        .map(|(key, value)| Ok((key, serde_json::from_value(value)?)))
        .collect()
}

/// Whole-record replacements staged by one request
#[derive(Debug, Default)]
pub(crate) struct Changeset {
    sessions: Vec<Session>,
    logs: Vec<(SessionId, SessionLog)>,
    facts: Vec<(String, BTreeMap<String, LongTermFact>)>,
    escalation: Vec<EscalationState>,
    tickets: Vec<Ticket>,
    removed_sessions: Vec<SessionId>,
    events: Vec<DeskEvent>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_session(&mut self, session: Session) -> &mut Self {
        self.sessions.push(session);
        self
    }

    pub fn put_log(&mut self, session_id: &str, log: SessionLog) -> &mut Self {
        self.logs.push((session_id.to_string(), log));
        self
    }

    /// An empty map deletes the owner's facts
    pub fn put_facts(&mut self, owner: &str, facts: BTreeMap<String, LongTermFact>) -> &mut Self {
        self.facts.push((owner.to_string(), facts));
        self
    }

    pub fn put_escalation(&mut self, state: EscalationState) -> &mut Self {
        self.escalation.push(state);
        self
    }

    pub fn put_ticket(&mut self, ticket: Ticket) -> &mut Self {
        self.tickets.push(ticket);
        self
    }

    /// Drop a session record and its turn log
    pub fn remove_session(&mut self, session_id: &str) -> &mut Self {
        self.removed_sessions.push(session_id.to_string());
        self
    }

    pub fn event(&mut self, event: DeskEvent) -> &mut Self {
        self.events.push(event);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
            && self.logs.is_empty()
            && self.facts.is_empty()
            && self.escalation.is_empty()
            && self.tickets.is_empty()
            && self.removed_sessions.is_empty()
    }

    fn to_ops(&self) -> Result<Vec<WriteOp>, PersistenceError> {
        let mut ops = Vec::new();
        for id in &self.removed_sessions {
            ops.push(WriteOp::delete(ns::SESSIONS, id));
            ops.push(WriteOp::delete(ns::TURNS, id));
        }
        for session in &self.sessions {
            ops.push(WriteOp::put(ns::SESSIONS, &session.session_id, session)?);
        }
        for (id, log) in &self.logs {
            ops.push(WriteOp::put(ns::TURNS, id, log)?);
        }
        for (owner, facts) in &self.facts {
            if facts.is_empty() {
                ops.push(WriteOp::delete(ns::FACTS, owner));
            } else {
                ops.push(WriteOp::put(ns::FACTS, owner, facts)?);
            }
        }
        for esc in &self.escalation {
            ops.push(WriteOp::put(ns::ESCALATION, &esc.owner, esc)?);
        }
        for ticket in &self.tickets {
            ops.push(WriteOp::put(ns::TICKETS, &ticket.ticket_id, ticket)?);
        }
        Ok(ops)
    }

    fn apply(self, state: &mut DeskState) -> Vec<DeskEvent> {
        for id in self.removed_sessions {
            state.sessions.remove(&id);
            state.memory.clear_session(&id);
        }
        for session in self.sessions {
            state.sessions.insert(session.session_id.clone(), session);
        }
        for (id, log) in self.logs {
            state.memory.put_session_log(&id, log);
        }
        for (owner, facts) in self.facts {
            state.memory.put_facts(&owner, facts);
        }
        for esc in self.escalation {
            state.escalation.insert(esc.owner.clone(), esc);
        }
        for ticket in self.tickets {
            state.tickets.upsert(ticket);
        }
        self.events
    }
}

/// Committed state plus the backend that makes it durable
pub(crate) struct Ledger {
    state: Arc<Mutex<DeskState>>,
    persistence: Arc<dyn Persistence>,
    /// Held across write and apply so batches land in commit order
    writer: Arc<Mutex<()>>,
    events: EventBus,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoned locks are recovered
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Ledger {
    pub fn new(state: DeskState, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            persistence,
            writer: Arc::new(Mutex::new(())),
            events: EventBus::new(),
        }
    }

    /// Run a read against committed state
    pub fn read<R>(&self, f: impl FnOnce(&DeskState) -> R) -> R {
        f(&lock(&self.state))
    }

    /// Persist then apply. On error nothing is applied and no event is sent.
    ///
    /// The batch is written on the blocking pool; the state lock is only
    /// taken to apply it, so reads never wait on disk. The write task runs
    /// to completion even if the caller is dropped, and a written batch is
    /// always applied and announced.
    pub async fn commit(&self, changes: Changeset) -> Result<(), PersistenceError> {
        if changes.is_empty() && changes.events.is_empty() {
            return Ok(());
        }
        let ops = changes.to_ops()?;

        let state = self.state.clone();
        let persistence = self.persistence.clone();
        let writer = self.writer.clone();
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || {
            let _writer = lock(&writer);
            if let Err(e) = persistence.write_batch(&ops) {
                warn!(error = %e, ops = ops.len(), "Batch rejected; changes rolled back");
                return Err(e);
            }
            let published = changes.apply(&mut lock(&state));
            debug!(ops = ops.len(), events = published.len(), "Changeset committed");
            events.publish_all(published);
            Ok(())
        })
        .await
        .map_err(|e| PersistenceError::Unavailable(format!("commit task failed: {}", e)))?
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    struct RejectingPersistence;

    impl Persistence for RejectingPersistence {
        fn write_batch(&self, _ops: &[WriteOp]) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("read-only".into()))
        }
        fn get(&self, _: &str, _: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
            Ok(None)
        }
        fn list(&self, _: &str) -> Result<Vec<(String, serde_json::Value)>, PersistenceError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_commit_applies_after_persisting() {
        let backend = Arc::new(MemoryPersistence::new());
        let ledger = Ledger::new(DeskState::new(10), backend.clone());

        let mut changes = Changeset::new();
        changes
            .put_session(Session::new("s-1", Some("u-1".into())))
            .put_escalation(EscalationState::new("user:u-1"));
        ledger.commit(changes).await.unwrap();

        assert!(ledger.read(|s| s.sessions.contains_key("s-1")));
        assert_eq!(backend.len(), 2);

        let restored = DeskState::load(backend.as_ref(), 10).unwrap();
        assert!(restored.sessions.contains_key("s-1"));
        assert!(restored.escalation.contains_key("user:u-1"));
    }

    #[tokio::test]
    async fn test_rejected_batch_changes_nothing() {
        let ledger = Ledger::new(DeskState::new(10), Arc::new(RejectingPersistence));
        let mut rx = ledger.events().subscribe();

        let mut changes = Changeset::new();
        changes.put_session(Session::new("s-1", None)).event(DeskEvent::ModeChanged {
            session_id: "s-1".into(),
            from: crate::types::SessionMode::AiActive,
            to: crate::types::SessionMode::HumanTakeover,
            timestamp: chrono::Utc::now(),
        });
        assert!(ledger.commit(changes).await.is_err());

        assert!(ledger.read(|s| s.sessions.is_empty()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_facts_delete_owner() {
        let backend = Arc::new(MemoryPersistence::new());
        let ledger = Ledger::new(DeskState::new(10), backend.clone());

        let mut facts = BTreeMap::new();
        facts.insert("name".to_string(), LongTermFact::new("name", "Ana"));
        let mut changes = Changeset::new();
        changes.put_facts("session:s-1", facts);
        ledger.commit(changes).await.unwrap();
        assert_eq!(backend.len(), 1);

        let mut changes = Changeset::new();
        changes.put_facts("session:s-1", BTreeMap::new());
        ledger.commit(changes).await.unwrap();
        assert!(backend.is_empty());
        assert!(ledger.read(|s| s.memory.facts("session:s-1").is_empty()));
    }

    /// Holds every batch until the test releases it
    struct GatedPersistence {
        release: Mutex<std::sync::mpsc::Receiver<()>>,
        inner: MemoryPersistence,
    }

    impl Persistence for GatedPersistence {
        fn write_batch(&self, ops: &[WriteOp]) -> Result<(), PersistenceError> {
            let _ = self.release.lock().unwrap().recv();
            self.inner.write_batch(ops)
        }
        fn get(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
            self.inner.get(namespace, key)
        }
        fn list(&self, namespace: &str) -> Result<Vec<(String, serde_json::Value)>, PersistenceError> {
            self.inner.list(namespace)
        }
    }

    #[tokio::test]
    async fn test_reads_proceed_while_a_write_is_blocked() {
        let (release, gate) = std::sync::mpsc::channel();
        let ledger = Arc::new(Ledger::new(
            DeskState::new(10),
            Arc::new(GatedPersistence {
                release: Mutex::new(gate),
                inner: MemoryPersistence::new(),
            }),
        ));

        let pending = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                let mut changes = Changeset::new();
                changes.put_session(Session::new("s-1", None));
                ledger.commit(changes).await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // The stalled write neither blocks the runtime nor leaks into state
        assert!(ledger.read(|s| s.sessions.is_empty()));

        release.send(()).unwrap();
        pending.await.unwrap().unwrap();
        assert!(ledger.read(|s| s.sessions.contains_key("s-1")));
    }
}
