//! Conversation agent for Parley.
//!
//! - `phase`: per-session phase machine (Idle/Listening/Thinking/Speaking).
//! - `history`: rolling conversation history with a turn or token budget.
//! - `events`: session input events and agent outputs.
//! - `orchestrator`: the per-session event loop with barge-in handling.
//! - `voice`: bridges VAD and speech recognition into session events.

pub mod error;
pub mod events;
pub mod history;
pub mod orchestrator;
pub mod phase;
pub mod voice;

pub use error::AgentError;
pub use events::{AgentOutput, SessionEvent};
pub use history::ConversationHistory;
pub use orchestrator::{SessionHandle, SessionOrchestrator};
pub use phase::{PhaseMachine, SessionPhase};
pub use voice::VoiceLink;
