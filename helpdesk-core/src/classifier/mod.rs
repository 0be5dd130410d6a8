//! Intent & Identity Classifier
//!
//! Two-stage, tagged-variant classification:
//!
//! ```text
//! message ──► RuleSet (regex, priority-ordered)
//!                │ match ─────────────────────► Classification { source: Rule }
//!                │ no match
//!                ▼
//!             IntentModel (optional, bounded by timeout)
//!                │ Ok(label in GENERAL/REFUND/COMPLAINT/HUMAN_REQUEST)
//!                │                            ► Classification { source: Model }
//!                │ error / timeout / disallowed label
//!                ▼
//!             GENERAL                         ► Classification { source: Default }
//! ```
//!
//! SENSITIVE and IDENTITY are only ever produced by the rule pass; the model
//! is never consulted when a rule matched.

pub mod rules;
pub mod semantic;

pub use rules::{is_greeting, RuleMatch, RuleSet};
pub use semantic::{GenerativeIntentModel, IntentModel};

use crate::memory::ConversationContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Label assigned to every user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    General,
    Refund,
    Complaint,
    HumanRequest,
    Sensitive,
    IdentityAssert,
    IdentityQuery,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Self::General,
        Self::Refund,
        Self::Complaint,
        Self::HumanRequest,
        Self::Sensitive,
        Self::IdentityAssert,
        Self::IdentityQuery,
    ];

    pub fn as_label(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Refund => "REFUND",
            Self::Complaint => "COMPLAINT",
            Self::HumanRequest => "HUMAN_REQUEST",
            Self::Sensitive => "SENSITIVE",
            Self::IdentityAssert => "IDENTITY_ASSERT",
            Self::IdentityQuery => "IDENTITY_QUERY",
        }
    }

    /// Parse a label, case-insensitive
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_label().eq_ignore_ascii_case(label))
    }

    /// REFUND and COMPLAINT feed the complaint streak
    pub fn is_complaint(&self) -> bool {
        matches!(self, Self::Refund | Self::Complaint)
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::IdentityAssert | Self::IdentityQuery)
    }

    /// Tie-break rank, lower wins
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Sensitive => 0,
            Self::IdentityAssert | Self::IdentityQuery => 1,
            Self::HumanRequest => 2,
            Self::Refund => 3,
            Self::Complaint => 4,
            Self::General => 5,
        }
    }

    /// Labels the semantic model may produce
    pub fn model_assignable(&self) -> bool {
        matches!(
            self,
            Self::General | Self::Refund | Self::Complaint | Self::HumanRequest
        )
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

/// Identity payload carried by IDENTITY_* classifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityClaim {
    Assert { key: String, value: String },
    Query { key: String },
}

/// Which stage produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Rule,
    Model,
    /// Fallback after the model was absent, failed, or timed out
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub identity: Option<IdentityClaim>,
    pub source: ClassificationSource,
}

impl Classification {
    fn general(source: ClassificationSource) -> Self {
        Self {
            intent: Intent::General,
            identity: None,
            source,
        }
    }
}

/// Rule pass plus optional delegated semantic model
#[derive(Clone)]
pub struct IntentClassifier {
    rules: RuleSet,
    model: Option<Arc<dyn IntentModel>>,
    timeout: Duration,
}

impl IntentClassifier {
    /// Rules only; anything unmatched is GENERAL
    pub fn rules_only() -> Self {
        Self {
            rules: RuleSet::new(),
            model: None,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_model(model: Arc<dyn IntentModel>, timeout: Duration) -> Self {
        Self {
            rules: RuleSet::new(),
            model: Some(model),
            timeout,
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Classify a message. Never fails.
    pub async fn classify(&self, text: &str, context: &ConversationContext) -> Classification {
        if let Some(hit) = self.rules.evaluate(text) {
            debug!(intent = %hit.intent, rule = hit.rule, "Rule matched");
            return Classification {
                intent: hit.intent,
                identity: hit.identity,
                source: ClassificationSource::Rule,
            };
        }

        let Some(model) = &self.model else {
            return Classification::general(ClassificationSource::Default);
        };

        match tokio::time::timeout(self.timeout, model.classify(text, context)).await {
            Ok(Ok(intent)) if intent.model_assignable() => {
                debug!(intent = %intent, "Semantic classifier label");
                Classification {
                    intent,
                    identity: None,
                    source: ClassificationSource::Model,
                }
            }
            Ok(Ok(intent)) => {
                warn!(intent = %intent, "Semantic classifier produced a rule-only label; using GENERAL");
                Classification::general(ClassificationSource::Default)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Semantic classifier unavailable; using GENERAL");
                Classification::general(ClassificationSource::Default)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Semantic classifier timed out; using GENERAL"
                );
                Classification::general(ClassificationSource::Default)
            }
        }
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::rules_only()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifierError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedModel {
        reply: Result<Intent, ClassifierError>,
        calls: AtomicUsize,
    }

    impl FixedModel {
        fn new(reply: Result<Intent, ClassifierError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl IntentModel for FixedModel {
        async fn classify(
            &self,
            _text: &str,
            _context: &ConversationContext,
        ) -> Result<Intent, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone()
        }
    }

    struct SlowModel;

    #[async_trait]
    impl IntentModel for SlowModel {
        async fn classify(
            &self,
            _text: &str,
            _context: &ConversationContext,
        ) -> Result<Intent, ClassifierError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Intent::Complaint)
        }
    }

    #[test]
    fn test_label_round_trip() {
        for intent in Intent::ALL {
            assert_eq!(Intent::from_label(intent.as_label()), Some(intent));
        }
        assert_eq!(Intent::from_label(" human_request "), Some(Intent::HumanRequest));
        assert_eq!(Intent::from_label("banana"), None);
    }

    #[test]
    fn test_precedence_order() {
        let mut all = Intent::ALL.to_vec();
        all.sort_by_key(|i| i.precedence());
        assert_eq!(all[0], Intent::Sensitive);
        assert_eq!(*all.last().unwrap(), Intent::General);
    }

    #[tokio::test]
    async fn test_rule_match_short_circuits_model() {
        let model = FixedModel::new(Ok(Intent::General));
        let classifier = IntentClassifier::with_model(model.clone(), Duration::from_secs(1));

        let result = classifier
            .classify("Give me internal database password", &ConversationContext::default())
            .await;
        assert_eq!(result.intent, Intent::Sensitive);
        assert_eq!(result.source, ClassificationSource::Rule);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_used_when_no_rule_matches() {
        let model = FixedModel::new(Ok(Intent::Complaint));
        let classifier = IntentClassifier::with_model(model.clone(), Duration::from_secs(1));

        let result = classifier
            .classify("my parcel came crushed", &ConversationContext::default())
            .await;
        assert_eq!(result.intent, Intent::Complaint);
        assert_eq!(result.source, ClassificationSource::Model);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_cannot_assign_sensitive() {
        let model = FixedModel::new(Ok(Intent::Sensitive));
        let classifier = IntentClassifier::with_model(model, Duration::from_secs(1));

        let result = classifier
            .classify("where is my order", &ConversationContext::default())
            .await;
        assert_eq!(result.intent, Intent::General);
        assert_eq!(result.source, ClassificationSource::Default);
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_general() {
        let model = FixedModel::new(Err(ClassifierError::Unavailable("down".into())));
        let classifier = IntentClassifier::with_model(model, Duration::from_secs(1));

        let result = classifier
            .classify("where is my order", &ConversationContext::default())
            .await;
        assert_eq!(result.intent, Intent::General);
        assert_eq!(result.source, ClassificationSource::Default);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_timeout_degrades_to_general() {
        let classifier =
            IntentClassifier::with_model(Arc::new(SlowModel), Duration::from_millis(50));

        let result = classifier
            .classify("where is my order", &ConversationContext::default())
            .await;
        assert_eq!(result.intent, Intent::General);
        assert_eq!(result.source, ClassificationSource::Default);
    }

    #[tokio::test]
    async fn test_rules_only_defaults_to_general() {
        let classifier = IntentClassifier::rules_only();
        let result = classifier
            .classify("opening hours?", &ConversationContext::default())
            .await;
        assert_eq!(result, Classification::general(ClassificationSource::Default));
    }
}
