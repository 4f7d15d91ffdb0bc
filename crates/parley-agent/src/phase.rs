//! Session phase machine with thread-safe transitions.
//!
//! Enforces the conversation lifecycle:
//! - Idle -> Listening (speech detected)
//! - Listening -> Thinking (final transcript accepted)
//! - Thinking -> Speaking (reply generated, synthesis started)
//! - Speaking -> Idle (playback finished)
//! - Speaking -> Listening (barge-in: user interrupts playback)
//! - Thinking -> Listening (barge-in: user interrupts generation)
//! - Thinking -> Idle (generation failed)
//! - Listening -> Idle (utterance produced no usable transcript)
//! - Idle -> Speaking (agent-initiated speech, e.g. the session greeting)

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::AgentError;

/// Conversational state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Waiting for the user to speak.
    Idle,
    /// Capturing an in-progress user utterance.
    Listening,
    /// Retrieving knowledge and generating a reply.
    Thinking,
    /// Streaming synthesized audio back to the user.
    Speaking,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "Idle"),
            SessionPhase::Listening => write!(f, "Listening"),
            SessionPhase::Thinking => write!(f, "Thinking"),
            SessionPhase::Speaking => write!(f, "Speaking"),
        }
    }
}

impl SessionPhase {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &SessionPhase) -> bool {
        matches!(
            (self, target),
            (SessionPhase::Idle, SessionPhase::Listening)
                | (SessionPhase::Listening, SessionPhase::Thinking)
                | (SessionPhase::Thinking, SessionPhase::Speaking)
                | (SessionPhase::Speaking, SessionPhase::Idle)
                // Agent-initiated speech (session greeting)
                | (SessionPhase::Idle, SessionPhase::Speaking)
                // Barge-in transitions
                | (SessionPhase::Speaking, SessionPhase::Listening)
                | (SessionPhase::Thinking, SessionPhase::Listening)
                // Abandon transitions
                | (SessionPhase::Thinking, SessionPhase::Idle)
                | (SessionPhase::Listening, SessionPhase::Idle)
        )
    }
}

/// Thread-safe phase machine shared between the session loop and its
/// handle.
///
/// All transitions are validated before being applied; an invalid
/// transition indicates an event arrived in a phase that must not act
/// on it.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: Arc<Mutex<SessionPhase>>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    /// Create a new phase machine initialized to `Idle`.
    pub fn new() -> Self {
        Self {
            phase: Arc::new(Mutex::new(SessionPhase::Idle)),
        }
    }

    /// Returns the current phase.
    pub fn current(&self) -> SessionPhase {
        *self.phase.lock().expect("phase mutex poisoned")
    }

    /// Attempt to transition to the target phase.
    pub fn transition(&self, target: SessionPhase) -> Result<(), AgentError> {
        let mut phase = self.phase.lock().expect("phase mutex poisoned");
        if phase.can_transition_to(&target) {
            tracing::debug!("Session phase: {} -> {}", *phase, target);
            *phase = target;
            Ok(())
        } else {
            Err(AgentError::InvalidPhase(format!("{} -> {}", *phase, target)))
        }
    }

    /// Force the phase back to Idle (error recovery).
    pub fn reset(&self) {
        let mut phase = self.phase.lock().expect("phase mutex poisoned");
        if *phase != SessionPhase::Idle {
            tracing::warn!("Session phase reset to Idle from {}", *phase);
        }
        *phase = SessionPhase::Idle;
    }
}

// ====== Tests ======
