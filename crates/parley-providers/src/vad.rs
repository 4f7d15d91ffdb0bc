//! Voice activity detection.
//!
//! Detectors consume raw audio frames and emit edge events: one
//! `SpeechStart` when an utterance begins, one `SpeechEnd` when it has
//! been followed by enough silence. The session loop reacts to these
//! edges, not to per-frame classifications.

use chrono::{DateTime, Utc};

/// Edge event emitted when the speaking state changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadEvent {
    /// The user started speaking.
    SpeechStart { timestamp: DateTime<Utc> },
    /// The user stopped speaking (silence hangover elapsed).
    SpeechEnd { timestamp: DateTime<Utc> },
}

/// Stateful detector of speech edges in a PCM frame stream.
pub trait VoiceActivityDetector: Send {
    /// Feed one audio frame; returns an event when the speaking state flips.
    fn push_frame(&mut self, frame: &[f32]) -> Option<VadEvent>;
}

/// Amplitude-threshold detector with a silence hangover.
///
/// A frame counts as speech if any sample exceeds the threshold.
/// `SpeechEnd` fires only after `hangover_frames` consecutive silent
/// frames, so short pauses inside an utterance do not split it.
#[derive(Debug)]
pub struct ThresholdVad {
    threshold: f32,
    hangover_frames: u32,
    speaking: bool,
    silent_run: u32,
}

impl ThresholdVad {
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            speaking: false,
            silent_run: 0,
        }
    }

    fn frame_has_speech(&self, frame: &[f32]) -> bool {
        frame.iter().any(|s| s.abs() > self.threshold)
    }
}

impl VoiceActivityDetector for ThresholdVad {
    fn push_frame(&mut self, frame: &[f32]) -> Option<VadEvent> {
        if frame.is_empty() {
            return None;
        }
        let has_speech = self.frame_has_speech(frame);
        if has_speech {
            self.silent_run = 0;
            if !self.speaking {
                self.speaking = true;
                return Some(VadEvent::SpeechStart {
                    timestamp: Utc::now(),
                });
            }
            return None;
        }
        if self.speaking {
            self.silent_run += 1;
            if self.silent_run >= self.hangover_frames {
                self.speaking = false;
                self.silent_run = 0;
                return Some(VadEvent::SpeechEnd {
                    timestamp: Utc::now(),
                });
            }
        }
        None
    }
}

// ====== Tests ======
