//! dyscreen-providers — AI gateways, diagnostic scorers and configuration.
//!
//! Implements the `AiGateway` trait for Gemini and OpenAI-compatible
//! endpoints, the `DiagnosticScorer` trait for an HTTP scoring service, and
//! the TOML configuration that wires them together.

pub mod config;
pub mod error;
pub mod gemini;
pub mod identity;
pub mod mock;
pub mod openai;
pub mod scorer;

pub use config::{
    create_gateway, load_config, load_config_from, DyscreenConfig, ProviderConfig,
    CONFIG_FILE_NAME,
};
pub use error::ProviderError;
