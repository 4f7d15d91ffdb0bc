//! Copy-on-write knowledge store.
//!
//! Readers take an `Arc` snapshot and never block or observe a write in
//! progress. Writers build a complete replacement snapshot and swap it
//! in, so a retrieval that started before an upsert finishes against
//! the old corpus.

use std::sync::{Arc, OnceLock, RwLock};

use parley_core::{ArticleRecord, KnowledgeChunk, ParleyError, Result};
use uuid::Uuid;

/// An immutable view of the corpus at one point in time.
#[derive(Debug, Default, Clone)]
pub struct StoreSnapshot {
    articles: Vec<ArticleRecord>,
    chunks: Vec<KnowledgeChunk>,
}

impl StoreSnapshot {
    /// Articles in ingestion order, oldest first.
    pub fn articles(&self) -> &[ArticleRecord] {
        &self.articles
    }

    pub fn chunks(&self) -> &[KnowledgeChunk] {
        &self.chunks
    }

    pub fn article(&self, id: Uuid) -> Option<&ArticleRecord> {
        self.articles.iter().find(|a| a.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn article_count(&self) -> usize {
        self.articles.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Thread-safe store with snapshot reads and atomic whole-article upserts.
///
/// Embedding dimensionality is pinned by the first stored chunk and
/// enforced for the life of the process.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    current: RwLock<Arc<StoreSnapshot>>,
    dimensions: OnceLock<usize>,
}

impl KnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        Arc::clone(&self.current.read().expect("store lock poisoned"))
    }

    /// Embedding dimensionality pinned by the first upsert, if any.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    /// Insert or replace an article together with all of its chunks.
    ///
    /// Replacement is atomic: re-ingesting a URL swaps the article's old
    /// chunks out and the new ones in within a single snapshot change.
    pub fn upsert(&self, article: ArticleRecord, chunks: Vec<KnowledgeChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Err(ParleyError::Store(format!(
                "Refusing to store article '{}' with no chunks",
                article.title
            )));
        }
        for chunk in &chunks {
            if chunk.article_id != article.id {
                return Err(ParleyError::Store(format!(
                    "Chunk {} does not belong to article {}",
                    chunk.id, article.id
                )));
            }
        }

        let dims = chunks[0].embedding.len();
        if dims == 0 {
            return Err(ParleyError::Store("Chunk has an empty embedding".to_string()));
        }
        // Validate the whole batch before pinning, so a rejected first
        // upsert cannot fix the store's dimensionality.
        if chunks.iter().any(|c| c.embedding.len() != dims) {
            return Err(ParleyError::Store(
                "Mixed embedding dimensions within one article".to_string(),
            ));
        }
        let pinned = *self.dimensions.get_or_init(|| dims);
        if dims != pinned {
            return Err(ParleyError::Store(format!(
                "Embedding dimension mismatch: store holds {}-dim vectors",
                pinned
            )));
        }

        let mut guard = self.current.write().expect("store lock poisoned");
        let old = guard.as_ref();
        let replacing = old.articles.iter().any(|a| a.id == article.id);

        let mut articles: Vec<ArticleRecord> = old
            .articles
            .iter()
            .filter(|a| a.id != article.id)
            .cloned()
            .collect();
        let mut new_chunks: Vec<KnowledgeChunk> = old
            .chunks
            .iter()
            .filter(|c| c.article_id != article.id)
            .cloned()
            .collect();

        tracing::info!(
            article_id = %article.id,
            title = %article.title,
            chunks = chunks.len(),
            replacing,
            "Storing article"
        );

        articles.push(article);
        new_chunks.extend(chunks);

        *guard = Arc::new(StoreSnapshot {
            articles,
            chunks: new_chunks,
        });
        Ok(())
    }
}

// ====== Tests ======
