//! In-memory conversation store.
//!
//! Turns are kept in arrival order and never reordered. Each session keeps
//! at most `capacity` turns; the oldest turn is dropped first. Writes are
//! visible to the next read immediately.

use crate::types::{owner_key, LongTermFact, SessionId, Turn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Ordered turn log of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    /// Owner key whose facts are merged into this session's context
    pub owner: String,
    /// Next turn id to assign (ids start at 1)
    pub next_turn_id: u64,
    /// Retained turns, oldest first
    pub turns: VecDeque<Turn>,
    /// Number of turns evicted by the window policy
    pub evicted: u64,
}

impl SessionLog {
    pub(crate) fn new(owner: String) -> Self {
        Self {
            owner,
            next_turn_id: 1,
            turns: VecDeque::new(),
            evicted: 0,
        }
    }

    /// Append with FIFO eviction beyond `capacity`; assigns the turn id
    pub(crate) fn push(&mut self, mut turn: Turn, capacity: usize) -> Turn {
        turn.turn_id = self.next_turn_id;
        self.next_turn_id += 1;
        self.turns.push_back(turn.clone());

        while self.turns.len() > capacity.max(1) {
            self.turns.pop_front();
            self.evicted += 1;
        }
        turn
    }

    /// The most recent `window` turns, oldest first
    pub fn recent(&self, window: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(window);
        self.turns.iter().skip(skip).cloned().collect()
    }
}

/// Context handed to the classifier and the answering path.
///
/// Long-term facts come first (sorted by key), then turns in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub facts: Vec<LongTermFact>,
    pub turns: Vec<Turn>,
}

impl ConversationContext {
    /// Render the context as prompt text
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.facts.is_empty() {
            out.push_str("Known information about this user:\n");
            for fact in &self.facts {
                out.push_str(&format!("- {}: {}\n", fact.key, fact.value));
            }
            out.push('\n');
        }
        if !self.turns.is_empty() {
            out.push_str("Conversation history:\n");
            for turn in &self.turns {
                out.push_str(&turn.transcript_line());
                out.push('\n');
            }
        }
        out
    }

    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }
}

/// Short-term turn history plus long-term facts
#[derive(Debug, Clone)]
pub struct MemoryStore {
    capacity: usize,
    sessions: HashMap<SessionId, SessionLog>,
    facts: HashMap<String, BTreeMap<String, LongTermFact>>,
}

impl MemoryStore {
    /// Create a store keeping at most `capacity` turns per session
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sessions: HashMap::new(),
            facts: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register the owner whose facts belong to a session.
    ///
    /// Existing turns are kept; only the owner binding changes.
    pub fn bind_session(&mut self, session_id: &str, owner: &str) {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog::new(owner.to_string()))
            .owner = owner.to_string();
    }

    /// Append a turn, assigning its id. Returns the stored turn.
    pub fn append_turn(&mut self, session_id: &str, turn: Turn) -> Turn {
        let capacity = self.capacity;
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog::new(owner_key(session_id, None)))
            .push(turn, capacity)
    }

    /// All retained turns of a session, oldest first
    pub fn turns(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .get(session_id)
            .map(|log| log.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent `window` turns, oldest first
    pub fn recent_turns(&self, session_id: &str, window: usize) -> Vec<Turn> {
        self.sessions
            .get(session_id)
            .map(|log| log.recent(window))
            .unwrap_or_default()
    }

    /// Recent turns merged with the owner's long-term facts
    pub fn get_context(&self, session_id: &str, window: usize) -> ConversationContext {
        let owner = self
            .sessions
            .get(session_id)
            .map(|log| log.owner.clone())
            .unwrap_or_else(|| owner_key(session_id, None));

        ConversationContext {
            facts: self.facts(&owner),
            turns: self.recent_turns(session_id, window),
        }
    }

    /// Insert or overwrite a fact
    pub fn set_fact(&mut self, owner: &str, key: &str, value: &str) -> LongTermFact {
        let fact = LongTermFact::new(key, value);
        self.facts
            .entry(owner.to_string())
            .or_default()
            .insert(key.to_string(), fact.clone());
        fact
    }

    /// `None` means the owner never asserted this key
    pub fn get_fact(&self, owner: &str, key: &str) -> Option<&LongTermFact> {
        self.facts.get(owner).and_then(|facts| facts.get(key))
    }

    /// All facts of an owner, sorted by key
    pub fn facts(&self, owner: &str) -> Vec<LongTermFact> {
        self.facts
            .get(owner)
            .map(|facts| facts.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_log(&self, session_id: &str) -> Option<&SessionLog> {
        self.sessions.get(session_id)
    }

    /// Drop a session's turn log. Facts are untouched.
    pub fn clear_session(&mut self, session_id: &str) -> Option<SessionLog> {
        self.sessions.remove(session_id)
    }

    /// Scratch store holding one owner's facts and, if given, one session's
    /// log bound to that owner. Writes to it stay private until its parts
    /// are committed back.
    pub(crate) fn stage(&self, owner: &str, session_id: Option<&str>) -> MemoryStore {
        let mut staged = MemoryStore::new(self.capacity);
        staged.put_facts(owner, self.owner_facts(owner));
        if let Some(session_id) = session_id {
            if let Some(log) = self.sessions.get(session_id) {
                staged.put_session_log(session_id, log.clone());
            }
            staged.bind_session(session_id, owner);
        }
        staged
    }

    pub(crate) fn put_session_log(&mut self, session_id: &str, log: SessionLog) {
        self.sessions.insert(session_id.to_string(), log);
    }

    pub(crate) fn put_facts(&mut self, owner: &str, facts: BTreeMap<String, LongTermFact>) {
        if facts.is_empty() {
            self.facts.remove(owner);
        } else {
            self.facts.insert(owner.to_string(), facts);
        }
    }

    pub(crate) fn owner_facts(&self, owner: &str) -> BTreeMap<String, LongTermFact> {
        self.facts.get(owner).cloned().unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Intent;

    fn user(text: &str) -> Turn {
        Turn::user(text, Intent::General)
    }

    #[test]
    fn test_append_assigns_monotonic_ids() {
        let mut store = MemoryStore::new(10);
        let a = store.append_turn("s", user("a"));
        let b = store.append_turn("s", user("b"));
        assert_eq!(a.turn_id, 1);
        assert_eq!(b.turn_id, 2);
        assert_eq!(store.turns("s").len(), 2);
    }

    #[test]
    fn test_fifo_eviction_drops_oldest() {
        let mut store = MemoryStore::new(3);
        for text in ["1", "2", "3", "4", "5"] {
            store.append_turn("s", user(text));
        }
        let texts: Vec<_> = store.turns("s").into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["3", "4", "5"]);
        assert_eq!(store.session_log("s").unwrap().evicted, 2);
        // ids keep counting after eviction
        let next = store.append_turn("s", user("6"));
        assert_eq!(next.turn_id, 6);
    }

    #[test]
    fn test_recent_turns_window() {
        let mut store = MemoryStore::new(10);
        for text in ["a", "b", "c", "d"] {
            store.append_turn("s", user(text));
        }
        let texts: Vec<_> = store
            .recent_turns("s", 2)
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(texts, vec!["c", "d"]);
        assert_eq!(store.recent_turns("s", 50).len(), 4);
        assert!(store.recent_turns("missing", 5).is_empty());
    }

    #[test]
    fn test_context_puts_facts_first_then_turns() {
        let mut store = MemoryStore::new(10);
        store.bind_session("s", "user:u1");
        store.set_fact("user:u1", "name", "Shuvo");
        store.set_fact("user:u1", "last_reported_issue", "late delivery");
        store.append_turn("s", user("hello"));

        let ctx = store.get_context("s", 6);
        let keys: Vec<_> = ctx.facts.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["last_reported_issue", "name"]);
        assert_eq!(ctx.turns.len(), 1);
        assert_eq!(ctx.fact("name"), Some("Shuvo"));

        let rendered = ctx.render();
        let facts_at = rendered.find("name: Shuvo").unwrap();
        let turn_at = rendered.find("USER: hello").unwrap();
        assert!(facts_at < turn_at);
    }

    #[test]
    fn test_fact_overwrite_and_not_found() {
        let mut store = MemoryStore::new(10);
        assert!(store.get_fact("user:u1", "name").is_none());
        store.set_fact("user:u1", "name", "Ana");
        store.set_fact("user:u1", "name", "Shuvo");
        assert_eq!(store.get_fact("user:u1", "name").unwrap().value, "Shuvo");
        assert_eq!(store.facts("user:u1").len(), 1);
    }

    #[test]
    fn test_facts_survive_across_sessions_of_same_owner() {
        let mut store = MemoryStore::new(10);
        store.bind_session("s1", "user:u1");
        store.set_fact("user:u1", "name", "Shuvo");
        store.clear_session("s1");

        store.bind_session("s2", "user:u1");
        assert_eq!(store.get_context("s2", 5).fact("name"), Some("Shuvo"));
    }

    #[test]
    fn test_staged_writes_stay_out_of_the_source_store() {
        let mut store = MemoryStore::new(3);
        store.bind_session("s", "user:u1");
        store.set_fact("user:u1", "name", "Ana");
        store.append_turn("s", user("first"));

        let mut staged = store.stage("user:u1", Some("s"));
        let turn = staged.append_turn("s", user("second"));
        staged.set_fact("user:u1", "name", "Shuvo");

        assert_eq!(turn.turn_id, 2);
        assert_eq!(staged.get_context("s", 5).fact("name"), Some("Shuvo"));
        assert_eq!(staged.capacity(), 3);
        assert_eq!(store.turns("s").len(), 1);
        assert_eq!(store.get_fact("user:u1", "name").unwrap().value, "Ana");
    }

    #[test]
    fn test_stage_rebinds_an_anonymous_log() {
        let mut store = MemoryStore::new(5);
        store.append_turn("s", user("hi"));
        let staged = store.stage("user:u7", Some("s"));
        assert_eq!(staged.session_log("s").unwrap().owner, "user:u7");
        assert_eq!(staged.turns("s").len(), 1);
    }

    #[test]
    fn test_unbound_session_uses_session_scoped_owner() {
        let mut store = MemoryStore::new(10);
        store.append_turn("anon", user("hi"));
        assert_eq!(store.session_log("anon").unwrap().owner, "session:anon");
    }
}
