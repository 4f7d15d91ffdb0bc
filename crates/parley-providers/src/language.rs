//! Language model trait and implementations.
//!
//! - `LanguageModel` covers both text completion (conversation replies,
//!   article summarization) and embedding generation, since hosted model
//!   APIs expose both behind one credential.
//! - `MockLanguageModel` provides deterministic completions and hash-based
//!   vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use parley_core::ConversationTurn;

use crate::error::ProviderError;

/// Dimensionality of mock embedding vectors.
pub const MOCK_DIMENSIONS: usize = 384;

/// A fully assembled request for a text completion.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    /// Standing instructions plus knowledge digest.
    pub system: String,
    /// Prior conversation turns, oldest first.
    pub history: Vec<ConversationTurn>,
    /// The current user utterance, with any retrieved excerpts appended.
    pub user: String,
}

/// Service for text completion and embedding generation.
pub trait LanguageModel: Send + Sync {
    /// Generate a completion for the given prompt.
    fn complete(
        &self,
        prompt: &Prompt,
    ) -> impl std::future::Future<Output = Result<String, ProviderError>> + Send;

    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, ProviderError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Object-safe version of [`LanguageModel`] for dynamic dispatch.
///
/// Because the trait methods return `impl Future` the trait itself is not
/// object-safe. This twin uses boxed futures so `Arc<dyn DynLanguageModel>`
/// can be stored in structs without generics.
///
/// A blanket implementation is provided so that every `LanguageModel`
/// automatically implements `DynLanguageModel`.
pub trait DynLanguageModel: Send + Sync {
    /// Generate a completion for the given prompt (boxed future).
    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a Prompt,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<String, ProviderError>> + Send + 'a>,
    >;

    /// Generate an embedding vector for the given text (boxed future).
    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, ProviderError>> + Send + 'a>,
    >;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

/// Blanket impl: any `LanguageModel` automatically implements `DynLanguageModel`.
impl<T: LanguageModel> DynLanguageModel for T {
    fn complete_boxed<'a>(
        &'a self,
        prompt: &'a Prompt,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<String, ProviderError>> + Send + 'a>,
    > {
        Box::pin(self.complete(prompt))
    }

    fn embed_boxed<'a>(
        &'a self,
        text: &'a str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<f32>, ProviderError>> + Send + 'a>,
    > {
        Box::pin(self.embed(text))
    }

    fn dimensions(&self) -> usize {
        LanguageModel::dimensions(self)
    }
}

// ---------------------------------------------------------------------------
// MockLanguageModel - deterministic completions and vectors for testing
// ---------------------------------------------------------------------------

/// Mock language model with deterministic behavior.
///
/// Embeddings are derived from a hash of the input text, so identical inputs
/// always produce identical unit vectors. Completions come from a scripted
/// queue when one is loaded, otherwise from a deterministic echo of the
/// prompt. Latency and transient failures can be injected to exercise
/// timeout, retry, and cancellation paths.
#[derive(Debug, Default)]
pub struct MockLanguageModel {
    scripted: Mutex<VecDeque<String>>,
    latency: Option<Duration>,
    fail_remaining: AtomicU32,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by the given duration before responding.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `count` calls with `RateLimited` before succeeding.
    pub fn failing_times(self, count: u32) -> Self {
        self.fail_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Queue an exact response to return from the next unscripted call.
    pub fn push_response(&self, response: impl Into<String>) {
        self.scripted.lock().unwrap().push_back(response.into());
    }

    fn take_failure(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(MOCK_DIMENSIONS);
        for dim in 0..MOCK_DIMENSIONS {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            dim.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // L2-normalize so cosine similarity behaves like the real backend.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }

    fn default_completion(prompt: &Prompt) -> String {
        // Summarization prompts ask for JSON; honor that so ingestion
        // succeeds against the mock without scripting.
        if prompt.system.to_ascii_lowercase().contains("json") {
            let first_sentence = prompt
                .user
                .split(['.', '!', '?'])
                .next()
                .unwrap_or("")
                .trim();
            return serde_json::json!({
                "summary": first_sentence,
                "key_points": [first_sentence],
                "topics": ["general"],
            })
            .to_string();
        }
        format!("You said: {}", prompt.user)
    }
}

impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure() {
            return Err(ProviderError::RateLimited);
        }
        if let Some(scripted) = self.scripted.lock().unwrap().pop_front() {
            return Ok(scripted);
        }
        Ok(Self::default_completion(prompt))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure() {
            return Err(ProviderError::RateLimited);
        }
        if text.is_empty() {
            return Err(ProviderError::InvalidInput("Empty text".to_string()));
        }
        Ok(Self::hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }
}

// ====== Tests ======
