//! Helpdesk decision core
//!
//! For every incoming support message the desk decides:
//! - what the user wants (intent & identity classification)
//! - whether the knowledge base can ground an answer
//! - whether the conversation must go to a human (escalation + tickets)
//! - how conversation memory and escalation state evolve
//!
//! Retrieval, generation and storage are supplied through the
//! [`Retriever`], [`Generator`] and [`Persistence`] traits.
//!
//! # Usage
//!
//! ```rust,ignore
//! use helpdesk_core::{DeskConfig, SupportDesk};
//!
//! let desk = SupportDesk::builder()
//!     .config(DeskConfig::from_env())
//!     .retriever(retriever)
//!     .generator(generator)
//!     .persistence(persistence)
//!     .restore()?;
//!
//! let outcome = desk.handle_message("session-1", Some("user-1"), "I want a refund").await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod desk;
pub mod error;
pub mod escalation;
pub mod events;
pub mod locks;
pub mod memory;
pub mod orchestrator;
pub mod persistence;
pub mod tickets;
pub mod types;

pub use classifier::{
    Classification, ClassificationSource, GenerativeIntentModel, IdentityClaim, Intent,
    IntentClassifier, IntentModel,
};
pub use collaborators::{EmptyRetriever, Generator, Retriever, UnavailableGenerator};
pub use config::DeskConfig;
pub use desk::{DeskStats, MessageOutcome, Route, SupportDesk, SupportDeskBuilder};
pub use error::{
    ClassifierError, ConfigError, DeskError, DeskResult, GenerationError, PersistenceError,
    RetrievalError,
};
pub use escalation::{
    AnswerSignal, Escalation, EscalationConfig, EscalationEngine, EscalationReason,
    EscalationState, TicketPriority,
};
pub use events::{DeskEvent, EventBus};
pub use memory::{ConversationContext, MemoryStore, SessionLog};
pub use orchestrator::{AnswerConfig, AnswerOrchestrator, AnswerOutcome, EvidenceGap};
pub use persistence::{JsonDirPersistence, MemoryPersistence, Persistence, WriteOp};
pub use tickets::{Ticket, TicketStatus};
pub use types::{
    LongTermFact, RetrievedPassage, Role, Session, SessionMode, SourceRef, Turn,
};
