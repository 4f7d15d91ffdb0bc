//! Knowledge builder: turns extracted articles into stored, searchable
//! knowledge.
//!
//! For each article: summarize via the language model, chunk the body,
//! embed each chunk, then upsert atomically. Transient provider failures
//! are retried with exponential backoff. A failed summary degrades to an
//! empty one as long as chunks exist; an article with no usable chunks
//! is skipped.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_core::{
    article_id_for_url, ArticleRecord, KnowledgeChunk, KnowledgeConfig, Result,
};
use parley_providers::{ArticleSource, ExtractedArticle, LanguageModel, Prompt, ProviderError};
use uuid::Uuid;

use crate::chunker::chunk_text;
use crate::store::KnowledgeStore;

/// Character cap on article text sent to the summarizer.
const SUMMARY_INPUT_CAP: usize = 12_000;

const SUMMARIZE_SYSTEM: &str = "You are an article analyst. Respond with a JSON object \
containing: \"summary\" (2-3 sentences), \"key_points\" (array of strings), and \
\"topics\" (array of short lowercase tags). Respond with JSON only, no prose.";

/// What happened to one article during ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Stored with summary, key points, and topics.
    Stored { article_id: Uuid, chunk_count: usize },
    /// Stored, but summarization failed after retries.
    StoredWithoutSummary { article_id: Uuid, chunk_count: usize },
    /// Dropped entirely.
    Skipped { url: String, reason: String },
}

/// Aggregate result of a multi-URL ingest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub stored: usize,
    pub skipped: usize,
}

/// Builds knowledge base entries from extracted articles.
pub struct KnowledgeBuilder<L: LanguageModel> {
    model: Arc<L>,
    store: Arc<KnowledgeStore>,
    config: KnowledgeConfig,
}

impl<L: LanguageModel> KnowledgeBuilder<L> {
    pub fn new(model: Arc<L>, store: Arc<KnowledgeStore>, config: KnowledgeConfig) -> Self {
        Self {
            model,
            store,
            config,
        }
    }

    /// Ingest a batch of URLs, skipping failures so one bad URL never
    /// aborts the rest.
    pub async fn ingest_urls<S: ArticleSource>(&self, source: &S, urls: &[String]) -> IngestReport {
        let mut report = IngestReport::default();
        for url in urls {
            let article = match source.fetch(url).await {
                Ok(article) => article,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Fetch failed, skipping URL");
                    report.skipped += 1;
                    continue;
                }
            };
            match self.build_article(article).await {
                Ok(IngestOutcome::Skipped { url, reason }) => {
                    tracing::warn!(url = %url, reason = %reason, "Article skipped");
                    report.skipped += 1;
                }
                Ok(_) => report.stored += 1,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Ingest failed, skipping URL");
                    report.skipped += 1;
                }
            }
        }
        tracing::info!(
            stored = report.stored,
            skipped = report.skipped,
            "Ingest batch complete"
        );
        report
    }

    /// Summarize, chunk, embed, and store one extracted article.
    pub async fn build_article(&self, article: ExtractedArticle) -> Result<IngestOutcome> {
        let texts = chunk_text(
            &article.raw_text,
            self.config.chunk_size,
            self.config.chunk_overlap,
        );
        if texts.is_empty() {
            return Ok(IngestOutcome::Skipped {
                url: article.url,
                reason: "No usable chunks after cleaning".to_string(),
            });
        }

        let summary = match self
            .with_retries("summarize", || self.summarize(&article))
            .await
        {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(url = %article.url, error = %e, "Summarization failed, storing without summary");
                None
            }
        };

        let article_id = article_id_for_url(&article.url);
        let mut chunks = Vec::with_capacity(texts.len());
        for (position, text) in texts.into_iter().enumerate() {
            match self.with_retries("embed", || self.model.embed(&text)).await {
                Ok(embedding) => chunks.push(KnowledgeChunk {
                    id: Uuid::new_v4(),
                    article_id,
                    text,
                    embedding,
                    position,
                }),
                Err(e) => {
                    tracing::warn!(url = %article.url, position, error = %e, "Chunk embedding failed, dropping chunk");
                }
            }
        }
        if chunks.is_empty() {
            return Ok(IngestOutcome::Skipped {
                url: article.url,
                reason: "Embedding failed for every chunk".to_string(),
            });
        }
        let chunk_count = chunks.len();

        let has_summary = summary.is_some();
        let payload = summary.unwrap_or_default();
        let record = ArticleRecord {
            id: article_id,
            url: article.url,
            title: article.title,
            raw_text: article.raw_text,
            summary: payload.summary,
            key_points: payload.key_points,
            topics: payload.topics.into_iter().collect::<BTreeSet<_>>(),
            ingested_at: Utc::now(),
        };
        self.store.upsert(record, chunks)?;

        Ok(if has_summary {
            IngestOutcome::Stored {
                article_id,
                chunk_count,
            }
        } else {
            IngestOutcome::StoredWithoutSummary {
                article_id,
                chunk_count,
            }
        })
    }

    async fn summarize(&self, article: &ExtractedArticle) -> std::result::Result<SummaryPayload, ProviderError> {
        let body: String = article.raw_text.chars().take(SUMMARY_INPUT_CAP).collect();
        let prompt = Prompt {
            system: SUMMARIZE_SYSTEM.to_string(),
            history: Vec::new(),
            user: format!("Title: {}\n\n{}", article.title, body),
        };
        let raw = self.model.complete(&prompt).await?;
        parse_summary_json(&raw).ok_or_else(|| {
            ProviderError::InvalidResponse("Summarizer did not return valid JSON".to_string())
        })
    }

    /// Run `op` with exponential backoff on transient errors.
    async fn with_retries<T, F, Fut>(&self, op: &str, mut f: F) -> std::result::Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.config.max_attempts.max(1) => {
                    let delay =
                        Duration::from_millis(self.config.retry_base_delay_ms << attempt.min(10));
                    tracing::debug!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct SummaryPayload {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    topics: Vec<String>,
}

/// Extract the JSON object from a model response, tolerating markdown
/// fences and surrounding prose.
fn parse_summary_json(raw: &str) -> Option<SummaryPayload> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

// ====== Tests ======
