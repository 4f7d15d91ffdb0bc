//! Cosine retrieval and the conversation-facing corpus digest.

use std::cmp::Ordering;
use std::sync::Arc;

use parley_core::{KnowledgeChunk, ParleyError, Result};
use parley_providers::DynLanguageModel;

use crate::store::{KnowledgeStore, StoreSnapshot};

/// Reply used when the corpus is empty.
pub const NO_KNOWLEDGE_DIGEST: &str =
    "No articles have been loaded into the knowledge base yet.";

/// One retrieved chunk with its similarity score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: KnowledgeChunk,
    /// Article title, for prompt attribution.
    pub title: String,
    /// Cosine similarity in [-1.0, 1.0].
    pub score: f64,
}

/// Search over the knowledge store using a shared embedding backend.
pub struct RetrievalEngine {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn DynLanguageModel>,
}

impl RetrievalEngine {
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<dyn DynLanguageModel>) -> Self {
        Self { store, embedder }
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// Find the `top_k` chunks most similar to `query`.
    ///
    /// Runs against one snapshot, so results are consistent even if an
    /// ingest lands mid-search. An empty corpus yields empty results.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let snapshot = self.store.snapshot();
        if snapshot.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self
            .embedder
            .embed_boxed(query)
            .await
            .map_err(|e| ParleyError::Retrieval(format!("Query embedding failed: {}", e)))?;

        let mut scored: Vec<SearchResult> = snapshot
            .chunks()
            .iter()
            .map(|chunk| {
                let title = snapshot
                    .article(chunk.article_id)
                    .map(|a| a.title.clone())
                    .unwrap_or_default();
                SearchResult {
                    score: cosine_similarity(&query_vec, &chunk.embedding),
                    title,
                    chunk: chunk.clone(),
                }
            })
            .collect();

        // Ties break toward the most recently ingested article, then the
        // earliest chunk within it.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    let ta = snapshot.article(a.chunk.article_id).map(|r| r.ingested_at);
                    let tb = snapshot.article(b.chunk.article_id).map(|r| r.ingested_at);
                    tb.cmp(&ta)
                })
                .then_with(|| a.chunk.position.cmp(&b.chunk.position))
        });
        scored.truncate(top_k);

        tracing::debug!(
            query_chars = query.len(),
            results = scored.len(),
            "Retrieval complete"
        );
        Ok(scored)
    }

    /// Human-readable digest of the corpus for the system prompt.
    ///
    /// Lists title, summary, and topics per article. When the digest
    /// would exceed `budget_chars`, oldest articles are dropped first so
    /// the newest knowledge always survives truncation.
    pub fn digest(&self, budget_chars: usize) -> String {
        digest_of(&self.store.snapshot(), budget_chars)
    }
}

/// Build the digest from an explicit snapshot.
pub fn digest_of(snapshot: &StoreSnapshot, budget_chars: usize) -> String {
    if snapshot.is_empty() {
        return NO_KNOWLEDGE_DIGEST.to_string();
    }

    let header = "You have knowledge of the following articles:\n";
    let mut sections: Vec<String> = Vec::new();
    let mut used = header.chars().count();

    // Walk newest-first so truncation sheds the oldest articles.
    for article in snapshot.articles().iter().rev() {
        let mut section = format!("- \"{}\"", article.title);
        if !article.summary.is_empty() {
            section.push_str(&format!(": {}", article.summary));
        }
        if !article.topics.is_empty() {
            let topics: Vec<&str> = article.topics.iter().map(String::as_str).collect();
            section.push_str(&format!(" [topics: {}]", topics.join(", ")));
        }
        section.push('\n');

        let section_len = section.chars().count();
        if used + section_len > budget_chars && !sections.is_empty() {
            break;
        }
        used += section_len;
        sections.push(section);
    }

    sections.reverse();
    format!("{header}{}", sections.concat())
}

/// Cosine similarity between two vectors, 0.0 on length mismatch or
/// zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

// ====== Tests ======
