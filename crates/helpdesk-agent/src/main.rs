//! helpdesk-agent: the decision core wired to Ollama, a passage file and a
//! JSON data directory.
//!
//! ```bash
//! helpdesk-agent --passages kb.json chat --user alice
//! helpdesk-agent tickets list --status open
//! helpdesk-agent tickets reply TICKET-1a2b... "Looking into it now"
//! ```
//!
//! The data directory belongs to one process at a time.

mod agent_config;
mod cli;
mod ollama;
mod passages;

use agent_config::AgentConfig;
use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use helpdesk_core::{DeskConfig, EmptyRetriever, JsonDirPersistence, Retriever, SupportDesk};
use ollama::OllamaGenerator;
use passages::PassageFileRetriever;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let agent = agent_config(&args);
    let desk_config = DeskConfig::load(args.config.as_deref()).context("loading desk config")?;
    let desk = build_desk(&agent, desk_config)?;

    cli::run(&desk, args.command, &mut std::io::stdout()).await
}

fn agent_config(args: &Cli) -> AgentConfig {
    let mut agent = AgentConfig::default();
    if let Some(dir) = &args.data_dir {
        agent.data_dir = dir.clone();
    }
    if let Some(path) = &args.passages {
        agent.passages = Some(path.clone());
    }
    if let Some(model) = &args.model {
        agent.model = model.clone();
    }
    agent.generative_intents |= args.generative_intents;
    agent
}

fn build_desk(agent: &AgentConfig, config: DeskConfig) -> Result<SupportDesk> {
    let persistence = JsonDirPersistence::open(&agent.data_dir)
        .with_context(|| format!("opening data dir {}", agent.data_dir.display()))?;

    let retriever: Arc<dyn Retriever> = match &agent.passages {
        Some(path) => {
            let kb = PassageFileRetriever::load(path)?;
            if kb.is_empty() {
                warn!(path = %path.display(), "Passage file is empty");
            }
            Arc::new(kb)
        }
        None => {
            warn!("No passage file configured; every question will lack evidence");
            Arc::new(EmptyRetriever)
        }
    };
    let generator = Arc::new(OllamaGenerator::new(&agent.ollama_url, &agent.model));

    info!(
        endpoint = generator.endpoint(),
        model = %agent.model,
        data_dir = %agent.data_dir.display(),
        generative_intents = agent.generative_intents,
        "Support desk starting"
    );

    SupportDesk::builder()
        .config(config)
        .retriever(retriever)
        .generator(generator)
        .generative_intents(agent.generative_intents)
        .persistence(Arc::new(persistence))
        .restore()
        .context("restoring desk state")
}
