//! Session input events and agent outputs.

use chrono::{DateTime, Utc};
use parley_providers::AudioFrame;

/// Inputs delivered to a session's event loop, in arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The user started speaking.
    SpeechStart { timestamp: DateTime<Utc> },
    /// The user stopped speaking; a final transcript will follow.
    SpeechEnd { timestamp: DateTime<Utc> },
    /// The finalized transcript of the captured utterance.
    TranscriptFinal { text: String },
    /// Recognition of the captured utterance failed.
    RecognitionFailed { reason: String },
    /// The transport finished playing the agent's audio.
    PlaybackComplete,
    /// Close the session gracefully.
    Shutdown,
}

/// Outputs emitted by a session toward the transport.
#[derive(Debug, Clone)]
pub enum AgentOutput {
    /// A completed agent turn (including fallback apologies).
    AgentTurn { text: String },
    /// A frame of synthesized speech.
    Audio(AudioFrame),
    /// All audio for the current turn has been queued. The transport
    /// answers with [`SessionEvent::PlaybackComplete`] once it has
    /// actually finished playing.
    SpeechComplete,
}
