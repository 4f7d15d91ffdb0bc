//! Provider boundary for Parley.
//!
//! - Trait definitions for the external services the agent talks to:
//!   language models, speech recognition, speech synthesis, voice
//!   activity detection, and article extraction.
//! - Deterministic mock implementations for offline development and
//!   tests. Production adapters plug in behind the same traits.

pub mod article;
pub mod error;
pub mod language;
pub mod speech;
pub mod vad;

pub use article::{ArticleSource, ExtractedArticle, MockArticleSource};
pub use error::ProviderError;
pub use language::{DynLanguageModel, LanguageModel, MockLanguageModel, Prompt};
pub use speech::{
    AudioFrame, MockSpeechRecognizer, MockSpeechSynthesizer, SpeechRecognizer, SpeechSynthesizer,
    Transcript,
};
pub use vad::{ThresholdVad, VadEvent, VoiceActivityDetector};
