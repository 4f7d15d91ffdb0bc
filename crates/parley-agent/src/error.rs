//! Agent-level error type.

use parley_core::ParleyError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AgentError {
    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid phase transition: {0}")]
    InvalidPhase(String),

    #[error(transparent)]
    Core(#[from] ParleyError),
}

// ====== Tests ======
