use std::path::PathBuf;

/// Runtime wiring for the agent binary.
///
/// Desk policy lives in [`helpdesk_core::DeskConfig`]; this only says where
/// the collaborators are.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Ollama server, e.g. `http://localhost:11434`
    pub ollama_url: String,
    pub model: String,
    /// Root of the JSON document store
    pub data_dir: PathBuf,
    /// JSON array of knowledge-base passages (None = no knowledge base)
    pub passages: Option<PathBuf>,
    /// Ask the model to label messages no rule matched
    pub generative_intents: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ollama_url: std::env::var("HELPDESK_OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".into()),
            model: std::env::var("HELPDESK_MODEL").unwrap_or_else(|_| "llama3.1:8b".into()),
            data_dir: std::env::var("HELPDESK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./helpdesk-data")),
            passages: std::env::var("HELPDESK_PASSAGES").ok().map(PathBuf::from),
            generative_intents: std::env::var("HELPDESK_GENERATIVE_INTENTS")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }
}
