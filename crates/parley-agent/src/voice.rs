//! Bridges raw audio into session events.
//!
//! `VoiceLink` feeds microphone frames through a voice activity
//! detector, buffers the utterance between the speech edges, runs
//! recognition on the captured span, and forwards the resulting events
//! to a session's event channel.

use std::sync::Arc;

use parley_providers::{SpeechRecognizer, VadEvent, VoiceActivityDetector};
use tokio::sync::mpsc;

use crate::error::AgentError;
use crate::events::SessionEvent;

/// Captured utterances longer than this are truncated.
const MAX_CAPTURE_SECS: u32 = 60;

pub struct VoiceLink<V: VoiceActivityDetector, R: SpeechRecognizer> {
    vad: V,
    recognizer: Arc<R>,
    events: mpsc::Sender<SessionEvent>,
    sample_rate: u32,
    buffer: Vec<f32>,
    capturing: bool,
}

impl<V: VoiceActivityDetector, R: SpeechRecognizer> VoiceLink<V, R> {
    pub fn new(
        vad: V,
        recognizer: Arc<R>,
        events: mpsc::Sender<SessionEvent>,
        sample_rate: u32,
    ) -> Self {
        Self {
            vad,
            recognizer,
            events,
            sample_rate,
            buffer: Vec::new(),
            capturing: false,
        }
    }

    /// Process one audio frame from the capture device.
    pub async fn push_frame(&mut self, frame: &[f32]) -> Result<(), AgentError> {
        match self.vad.push_frame(frame) {
            Some(VadEvent::SpeechStart { timestamp }) => {
                self.capturing = true;
                self.buffer.clear();
                self.buffer.extend_from_slice(frame);
                self.send(SessionEvent::SpeechStart { timestamp }).await?;
            }
            Some(VadEvent::SpeechEnd { timestamp }) => {
                self.buffer.extend_from_slice(frame);
                self.send(SessionEvent::SpeechEnd { timestamp }).await?;
                self.finalize_utterance().await?;
            }
            None => {
                if self.capturing {
                    let cap = (self.sample_rate * MAX_CAPTURE_SECS) as usize;
                    if self.buffer.len() < cap {
                        self.buffer.extend_from_slice(frame);
                    }
                }
            }
        }
        Ok(())
    }

    async fn finalize_utterance(&mut self) -> Result<(), AgentError> {
        let audio = std::mem::take(&mut self.buffer);
        self.capturing = false;

        match self.recognizer.recognize(&audio, self.sample_rate).await {
            Ok(transcript) => {
                tracing::debug!(
                    chars = transcript.text.len(),
                    confidence = transcript.confidence,
                    "Utterance recognized"
                );
                self.send(SessionEvent::TranscriptFinal {
                    text: transcript.text,
                })
                .await
            }
            Err(e) => {
                self.send(SessionEvent::RecognitionFailed {
                    reason: e.to_string(),
                })
                .await
            }
        }
    }

    async fn send(&self, event: SessionEvent) -> Result<(), AgentError> {
        self.events
            .send(event)
            .await
            .map_err(|_| AgentError::SessionClosed)
    }
}

// ====== Tests ======

#[cfg(test)]
mod tests {
    use super::*;
    use parley_providers::{MockSpeechRecognizer, ThresholdVad};

    fn speech() -> Vec<f32> {
        vec![0.5; 160]
    }

    fn silence() -> Vec<f32> {
        vec![0.0; 160]
    }

    async fn drive_utterance(link: &mut VoiceLink<ThresholdVad, MockSpeechRecognizer>) {
        link.push_frame(&speech()).await.unwrap();
        link.push_frame(&speech()).await.unwrap();
        link.push_frame(&silence()).await.unwrap();
        link.push_frame(&silence()).await.unwrap();
    }

    #[tokio::test]
    async fn utterance_produces_start_end_transcript() {
        let recognizer = Arc::new(MockSpeechRecognizer::new());
        recognizer.push_transcript("hello agent");
        let (tx, mut rx) = mpsc::channel(16);
        let mut link = VoiceLink::new(ThresholdVad::new(0.1, 2), recognizer, tx, 16_000);

        drive_utterance(&mut link).await;

        assert!(matches!(rx.recv().await, Some(SessionEvent::SpeechStart { .. })));
        assert!(matches!(rx.recv().await, Some(SessionEvent::SpeechEnd { .. })));
        match rx.recv().await {
            Some(SessionEvent::TranscriptFinal { text }) => assert_eq!(text, "hello agent"),
            other => panic!("expected final transcript, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recognition_error_becomes_failure_event() {
        let recognizer = Arc::new(MockSpeechRecognizer::new().failing_times(1));
        let (tx, mut rx) = mpsc::channel(16);
        let mut link = VoiceLink::new(ThresholdVad::new(0.1, 2), recognizer, tx, 16_000);

        drive_utterance(&mut link).await;

        let _ = rx.recv().await; // SpeechStart
        let _ = rx.recv().await; // SpeechEnd
        assert!(matches!(
            rx.recv().await,
            Some(SessionEvent::RecognitionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn captured_audio_spans_the_utterance() {
        let recognizer = Arc::new(MockSpeechRecognizer::new());
        recognizer.push_transcript("spanned");
        let (tx, mut rx) = mpsc::channel(16);
        let mut link = VoiceLink::new(ThresholdVad::new(0.1, 1), recognizer, tx, 16_000);

        link.push_frame(&speech()).await.unwrap();
        link.push_frame(&speech()).await.unwrap();
        link.push_frame(&speech()).await.unwrap();
        link.push_frame(&silence()).await.unwrap();

        // Start + End + Transcript, and a fresh utterance works after.
        let mut events = 0;
        while let Ok(Some(_)) =
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await
        {
            events += 1;
        }
        assert_eq!(events, 3);
    }

    #[tokio::test]
    async fn second_utterance_gets_its_own_events() {
        let recognizer = Arc::new(MockSpeechRecognizer::new());
        recognizer.push_transcript("first");
        recognizer.push_transcript("second");
        let (tx, mut rx) = mpsc::channel(16);
        let mut link = VoiceLink::new(ThresholdVad::new(0.1, 1), recognizer, tx, 16_000);

        link.push_frame(&speech()).await.unwrap();
        link.push_frame(&silence()).await.unwrap();
        link.push_frame(&speech()).await.unwrap();
        link.push_frame(&silence()).await.unwrap();

        let mut transcripts = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await
        {
            if let SessionEvent::TranscriptFinal { text } = event {
                transcripts.push(text);
            }
        }
        assert_eq!(transcripts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn closed_session_surfaces_error() {
        let recognizer = Arc::new(MockSpeechRecognizer::new());
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let mut link = VoiceLink::new(ThresholdVad::new(0.1, 2), recognizer, tx, 16_000);
        let err = link.push_frame(&speech()).await.unwrap_err();
        assert!(matches!(err, AgentError::SessionClosed));
    }
}
