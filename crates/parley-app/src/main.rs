//! Parley application binary - composition root.
//!
//! Ties the crates together into a single executable:
//! 1. Load configuration from TOML
//! 2. Build the knowledge store and retrieval engine
//! 3. Ingest any articles given on the command line
//! 4. Start a conversation session and drive it from stdin
//!
//! Each stdin line is treated as one spoken utterance: the loop emits
//! the same speech-start / speech-end / transcript events a live audio
//! transport would, so barge-in and phase behavior match production.

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use parley_agent::{AgentOutput, SessionEvent, SessionOrchestrator};
use parley_core::config::{Credentials, ParleyConfig};
use parley_knowledge::{KnowledgeBuilder, KnowledgeStore, RetrievalEngine};
use parley_providers::{
    ArticleSource, DynLanguageModel, ExtractedArticle, MockLanguageModel, MockSpeechSynthesizer,
    ProviderError,
};

use cli::CliArgs;

/// Article source that reads local files, used by the offline demo.
///
/// The "URL" is a filesystem path; the title is derived from the file
/// name.
struct FileArticleSource;

impl ArticleSource for FileArticleSource {
    async fn fetch(&self, url: &str) -> Result<ExtractedArticle, ProviderError> {
        let path = Path::new(url);
        let raw_text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProviderError::Network(format!("Failed to read {}: {}", url, e)))?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['-', '_'], " "))
            .unwrap_or_else(|| url.to_string());
        Ok(ExtractedArticle {
            url: url.to_string(),
            title,
            raw_text,
            author: None,
            published_at: None,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config first so the CLI can override its log level.
    let config_file = args.resolve_config_path();
    let config = ParleyConfig::load_or_default(&config_file);
    let log_level = args.resolve_log_level(&config.general.log_level);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    if args.live {
        // Credentials come from the environment only, never the config
        // file. Missing variables are fatal before any session starts.
        let credentials = Credentials::from_env()?;
        for (name, masked) in credentials.mask_sensitive() {
            tracing::info!(credential = name, value = %masked, "Credential loaded");
        }
        tracing::warn!("Live provider adapters are not bundled; continuing with offline mocks");
    }

    // Providers. The mock model backs both completion and embeddings.
    let model: Arc<dyn DynLanguageModel> = Arc::new(MockLanguageModel::new());
    let synthesizer = Arc::new(MockSpeechSynthesizer::new());

    // Knowledge.
    let store = Arc::new(KnowledgeStore::new());
    let builder = KnowledgeBuilder::new(
        Arc::new(MockLanguageModel::new()),
        Arc::clone(&store),
        config.knowledge.clone(),
    );
    if !args.urls.is_empty() {
        let report = builder.ingest_urls(&FileArticleSource, &args.urls).await;
        tracing::info!(
            stored = report.stored,
            skipped = report.skipped,
            "Startup ingestion finished"
        );
    }
    let retrieval = Arc::new(RetrievalEngine::new(Arc::clone(&store), Arc::clone(&model)));

    // Session.
    let orchestrator = SessionOrchestrator::new(
        model,
        synthesizer,
        retrieval,
        config.session.clone(),
        config.retrieval.clone(),
        config.providers.synthesis_voice.clone(),
    );
    let (handle, mut outputs) = orchestrator.spawn_session();
    tracing::info!(session_id = %handle.id(), "Session ready, type to talk (/quit to exit)");

    // Print agent turns; audio frames are counted but not played, so
    // playback is acknowledged as soon as the stream for a turn ends.
    let acks = handle.events();
    let printer = tokio::spawn(async move {
        let mut frames: u64 = 0;
        while let Some(output) = outputs.recv().await {
            match output {
                AgentOutput::AgentTurn { text } => println!("agent> {}", text),
                AgentOutput::Audio(_) => frames += 1,
                AgentOutput::SpeechComplete => {
                    let _ = acks.send(SessionEvent::PlaybackComplete).await;
                }
            }
        }
        tracing::debug!(frames, "Output stream closed");
    });

    // Each stdin line is one utterance.
    use tokio::io::AsyncBufReadExt;
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        handle
            .send(SessionEvent::SpeechStart {
                timestamp: chrono::Utc::now(),
            })
            .await?;
        handle
            .send(SessionEvent::SpeechEnd {
                timestamp: chrono::Utc::now(),
            })
            .await?;
        handle.send(SessionEvent::TranscriptFinal { text: line }).await?;
    }

    handle.shutdown().await;
    let _ = printer.await;
    tracing::info!("Parley stopped");
    Ok(())
}
