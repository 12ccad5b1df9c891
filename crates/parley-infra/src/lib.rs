//! Infrastructure layer for Parley.
//!
//! Contains implementations of the ports defined in `parley-core`: SQLite
//! storage, the AES-256-GCM credential vault, and the OpenAI-compatible
//! streaming provider. Also loads the process configuration.

pub mod config;
pub mod crypto;
pub mod llm;
pub mod sqlite;
