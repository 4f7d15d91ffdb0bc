//! Speech recognition and synthesis traits with mock implementations.
//!
//! - `SpeechRecognizer` turns one captured utterance into a finalized
//!   transcript.
//! - `SpeechSynthesizer` streams synthesized audio frames into a channel
//!   sink; dropping the receiver stops synthesis promptly, which is how
//!   barge-in cancellation reaches the provider.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::ProviderError;

/// A chunk of synthesized PCM audio.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples as f32 values in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// The finalized result of recognizing one utterance.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Full recognized text.
    pub text: String,
    /// Model confidence (0.0 to 1.0).
    pub confidence: f32,
}

/// Service for transcribing a captured utterance to text.
pub trait SpeechRecognizer: Send + Sync {
    /// Recognize one complete utterance.
    ///
    /// `audio` holds PCM samples in [-1.0, 1.0] at `sample_rate` Hz,
    /// covering the span between detected speech start and speech end.
    fn recognize(
        &self,
        audio: &[f32],
        sample_rate: u32,
    ) -> impl Future<Output = Result<Transcript, ProviderError>> + Send;
}

/// Service for synthesizing text into streamed audio.
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in the given voice, delivering frames on `sink`.
    ///
    /// Resolves once the full utterance has been delivered. If the
    /// receiving half of `sink` is dropped mid-stream, implementations
    /// must stop synthesizing and return promptly.
    fn synthesize(
        &self,
        text: &str,
        voice: &str,
        sink: mpsc::Sender<AudioFrame>,
    ) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

// ---------------------------------------------------------------------------
// MockSpeechRecognizer
// ---------------------------------------------------------------------------

/// Mock recognizer that replays scripted transcripts.
///
/// Each call pops the next scripted transcript; with an empty queue it
/// returns a low-confidence placeholder. Basic input validation matches
/// what a real backend would reject.
#[derive(Debug, Default)]
pub struct MockSpeechRecognizer {
    scripted: Mutex<VecDeque<String>>,
    fail_remaining: AtomicU32,
}

impl MockSpeechRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the transcript returned by the next call.
    pub fn push_transcript(&self, text: impl Into<String>) {
        self.scripted.lock().unwrap().push_back(text.into());
    }

    /// Fail the next `count` calls with a network error.
    pub fn failing_times(self, count: u32) -> Self {
        self.fail_remaining.store(count, Ordering::SeqCst);
        self
    }
}

impl SpeechRecognizer for MockSpeechRecognizer {
    async fn recognize(&self, audio: &[f32], sample_rate: u32) -> Result<Transcript, ProviderError> {
        if audio.is_empty() {
            return Err(ProviderError::InvalidInput(
                "Cannot recognize empty audio".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(ProviderError::InvalidInput(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Network("Recognition stream reset".to_string()));
        }

        let duration_secs = audio.len() as f32 / sample_rate as f32;
        match self.scripted.lock().unwrap().pop_front() {
            Some(text) => {
                tracing::debug!(duration_secs, text = %text, "Mock recognition finalized");
                Ok(Transcript {
                    text,
                    confidence: 0.95,
                })
            }
            None => Ok(Transcript {
                text: String::new(),
                confidence: 0.0,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MockSpeechSynthesizer
// ---------------------------------------------------------------------------

/// Sample rate of mock synthesized audio.
pub const MOCK_SYNTH_SAMPLE_RATE: u32 = 24_000;

/// Mock synthesizer that emits one silent frame per word.
///
/// An optional per-frame delay makes the stream take real time, which is
/// what barge-in and timeout tests need. Delivery stops as soon as the
/// sink is closed.
#[derive(Debug, Default)]
pub struct MockSpeechSynthesizer {
    frame_delay: Option<Duration>,
    fail_remaining: AtomicU32,
}

impl MockSpeechSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before each emitted frame.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = Some(delay);
        self
    }

    /// Fail the next `count` calls before emitting any audio.
    pub fn failing_times(self, count: u32) -> Self {
        self.fail_remaining.store(count, Ordering::SeqCst);
        self
    }
}

impl SpeechSynthesizer for MockSpeechSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: &str,
        sink: mpsc::Sender<AudioFrame>,
    ) -> Result<(), ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidInput(
                "Cannot synthesize empty text".to_string(),
            ));
        }
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ProviderError::Unavailable("Synthesis backend down".to_string()));
        }

        let words = text.split_whitespace().count().max(1);
        tracing::debug!(words, voice = %voice, "Mock synthesis started");
        for _ in 0..words {
            if let Some(delay) = self.frame_delay {
                tokio::time::sleep(delay).await;
            }
            let frame = AudioFrame {
                samples: vec![0.0; (MOCK_SYNTH_SAMPLE_RATE / 10) as usize],
                sample_rate: MOCK_SYNTH_SAMPLE_RATE,
            };
            if sink.send(frame).await.is_err() {
                // Receiver dropped: playback was cancelled.
                tracing::debug!("Mock synthesis sink closed, stopping");
                return Ok(());
            }
        }
        Ok(())
    }
}

// ====== Tests ======
