use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The human on the other end of the call.
    User,
    /// The voice agent.
    Agent,
}

impl std::fmt::Display for TurnRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Agent => write!(f, "agent"),
        }
    }
}

// =============================================================================
// Knowledge types
// =============================================================================

/// A processed article held by the knowledge store.
///
/// Created by the builder, immutable after creation. Re-ingesting the same
/// URL replaces the whole record (and its chunks) atomically.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Stable ID derived from the source URL (same URL, same ID).
    pub id: Uuid,
    /// Source URL, unique within the store.
    pub url: String,
    /// Article title from the extractor.
    pub title: String,
    /// Raw article body text.
    pub raw_text: String,
    /// Model-generated summary. May be empty when summarization failed but
    /// chunking succeeded.
    pub summary: String,
    /// Key points extracted alongside the summary, in model order.
    pub key_points: Vec<String>,
    /// Topics covered by the article.
    pub topics: BTreeSet<String>,
    /// When the article entered the store.
    pub ingested_at: DateTime<Utc>,
}

/// One embedded slice of an article, the unit of retrieval.
///
/// Chunks live and die with their article; they are never replaced
/// independently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: Uuid,
    /// Back-reference to the owning article.
    pub article_id: Uuid,
    /// Chunk text, a window over the article body.
    pub text: String,
    /// Embedding vector; every chunk in the store shares one dimensionality.
    pub embedding: Vec<f32>,
    /// Ordinal of this chunk within its article.
    pub position: usize,
}

// =============================================================================
// Conversation types
// =============================================================================

/// One utterance in a session's ordered history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Rough token estimate used for history budgeting (chars / 4).
    pub fn estimated_tokens(&self) -> usize {
        self.text.chars().count().div_ceil(4)
    }
}

// =============================================================================
// ID derivation
// =============================================================================

/// Derive a stable article ID from its source URL.
///
/// `DefaultHasher::new()` is keyed with constants, so the mapping is stable
/// for the process lifetime and across runs of the same build, which is all
/// the in-memory store needs.
pub fn article_id_for_url(url: &str) -> Uuid {
    let mut hasher = DefaultHasher::new();
    url.hash(&mut hasher);
    let high = hasher.finish();
    0xb0u8.hash(&mut hasher);
    let low = hasher.finish();
    Uuid::from_u64_pair(high, low)
}
