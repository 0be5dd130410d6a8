//! Delegated semantic classification
//!
//! Only consulted when no deterministic rule matched.

use super::Intent;
use crate::collaborators::Generator;
use crate::error::{ClassifierError, GenerationError};
use crate::memory::ConversationContext;
use async_trait::async_trait;
use std::sync::Arc;

/// Probabilistic intent model
#[async_trait]
pub trait IntentModel: Send + Sync {
    async fn classify(
        &self,
        text: &str,
        context: &ConversationContext,
    ) -> Result<Intent, ClassifierError>;
}

/// Labels offered to the model
const MODEL_LABELS: [Intent; 4] = [
    Intent::General,
    Intent::Refund,
    Intent::Complaint,
    Intent::HumanRequest,
];

/// Intent model backed by the generation capability.
///
/// Asks the generator to answer with exactly one label and takes the first
/// allowed label found in the reply.
pub struct GenerativeIntentModel {
    generator: Arc<dyn Generator>,
}

impl GenerativeIntentModel {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    fn build_prompt(text: &str, context: &ConversationContext) -> String {
        let labels = MODEL_LABELS
            .iter()
            .map(|i| i.as_label())
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "You label customer support messages.\n\
             Reply with exactly one label from: {labels}.\n\
             REFUND: the customer demands money back.\n\
             COMPLAINT: the customer is dissatisfied with a product or service.\n\
             HUMAN_REQUEST: the customer asks for a human operator.\n\
             GENERAL: anything else.\n\n\
             {history}\
             Message: {text}\n\
             Label:",
            history = context.render(),
        )
    }

    /// First allowed label mentioned in the reply
    pub fn parse_label(reply: &str) -> Result<Intent, ClassifierError> {
        let upper = reply.to_uppercase().replace([' ', '-'], "_");
        MODEL_LABELS
            .iter()
            .filter_map(|intent| upper.find(intent.as_label()).map(|pos| (pos, *intent)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, intent)| intent)
            .ok_or_else(|| ClassifierError::UnknownLabel(reply.trim().to_string()))
    }
}

#[async_trait]
impl IntentModel for GenerativeIntentModel {
    async fn classify(
        &self,
        text: &str,
        context: &ConversationContext,
    ) -> Result<Intent, ClassifierError> {
        let prompt = Self::build_prompt(text, context);
        let reply = self
            .generator
            .generate(&prompt, &[])
            .await
            .map_err(|e| match e {
                GenerationError::Unavailable(msg) | GenerationError::Backend(msg) => {
                    ClassifierError::Unavailable(msg)
                }
                GenerationError::Timeout(ms) => {
                    ClassifierError::Unavailable(format!("timed out after {} ms", ms))
                }
            })?;
        Self::parse_label(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RetrievedPassage;
    use std::sync::Mutex;

    struct ScriptedGenerator {
        reply: Result<String, GenerationError>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _context_passages: &[RetrievedPassage],
        ) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn model(reply: Result<String, GenerationError>) -> (GenerativeIntentModel, Arc<ScriptedGenerator>) {
        let generator = Arc::new(ScriptedGenerator {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        (GenerativeIntentModel::new(generator.clone()), generator)
    }

    #[test]
    fn test_parse_label_variants() {
        assert_eq!(
            GenerativeIntentModel::parse_label("COMPLAINT").unwrap(),
            Intent::Complaint
        );
        assert_eq!(
            GenerativeIntentModel::parse_label("Label: human request.").unwrap(),
            Intent::HumanRequest
        );
        assert_eq!(
            GenerativeIntentModel::parse_label("refund, not complaint").unwrap(),
            Intent::Refund
        );
        assert!(matches!(
            GenerativeIntentModel::parse_label("SENSITIVE"),
            Err(ClassifierError::UnknownLabel(_))
        ));
    }

    #[tokio::test]
    async fn test_prompt_carries_message_and_labels() {
        let (model, generator) = model(Ok("GENERAL".into()));
        let intent = model
            .classify("where is my parcel", &ConversationContext::default())
            .await
            .unwrap();
        assert_eq!(intent, Intent::General);

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("Message: where is my parcel"));
        assert!(prompts[0].contains("HUMAN_REQUEST"));
        assert!(!prompts[0].contains("SENSITIVE"));
    }

    #[tokio::test]
    async fn test_generation_failure_maps_to_unavailable() {
        let (model, _) = model(Err(GenerationError::Timeout(500)));
        let err = model
            .classify("hello?", &ConversationContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Unavailable(_)));
    }
}
