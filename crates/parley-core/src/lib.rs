//! Core types shared across the Parley workspace.
//!
//! - `config`: TOML configuration and environment credentials.
//! - `error`: the workspace error enum and `Result` alias.
//! - `types`: conversation turns, article records, knowledge chunks.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    Credentials, GeneralConfig, HistoryUnit, KnowledgeConfig, ParleyConfig, ProvidersConfig,
    RetrievalConfig, SessionConfig,
};
pub use error::{ParleyError, Result};
pub use types::*;
