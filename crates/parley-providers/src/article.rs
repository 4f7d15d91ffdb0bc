//! Article extraction trait and mock source.
//!
//! An `ArticleSource` fetches a URL and strips it down to readable text.
//! The mock serves pre-registered articles and scripted failures so
//! ingestion can be exercised without a network.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::ProviderError;

/// Readable content extracted from a web page.
#[derive(Debug, Clone)]
pub struct ExtractedArticle {
    pub url: String,
    pub title: String,
    /// Full readable body text, boilerplate stripped.
    pub raw_text: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Service for fetching and extracting article content from URLs.
pub trait ArticleSource: Send + Sync {
    /// Fetch the page at `url` and extract its readable content.
    fn fetch(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<ExtractedArticle, ProviderError>> + Send;
}

/// Mock source backed by an in-memory URL map.
#[derive(Debug, Default)]
pub struct MockArticleSource {
    articles: Mutex<HashMap<String, ExtractedArticle>>,
    failing: Mutex<HashSet<String>>,
}

impl MockArticleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an article served for its own URL.
    pub fn add(&self, article: ExtractedArticle) {
        self.articles
            .lock()
            .unwrap()
            .insert(article.url.clone(), article);
    }

    /// Register a URL that fails with a network error when fetched.
    pub fn fail_url(&self, url: impl Into<String>) {
        self.failing.lock().unwrap().insert(url.into());
    }

    /// Convenience constructor for a plain-text article.
    pub fn article(url: &str, title: &str, raw_text: &str) -> ExtractedArticle {
        ExtractedArticle {
            url: url.to_string(),
            title: title.to_string(),
            raw_text: raw_text.to_string(),
            author: None,
            published_at: None,
        }
    }
}

impl ArticleSource for MockArticleSource {
    async fn fetch(&self, url: &str) -> Result<ExtractedArticle, ProviderError> {
        if self.failing.lock().unwrap().contains(url) {
            return Err(ProviderError::Network(format!(
                "Failed to fetch {}: connection refused",
                url
            )));
        }
        self.articles
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| ProviderError::InvalidInput(format!("No content at {}", url)))
    }
}

// ====== Tests ======
