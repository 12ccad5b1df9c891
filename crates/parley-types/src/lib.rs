//! Shared domain types for Parley.
//!
//! This crate contains the domain types used across the workspace:
//! channel configuration, conversation turns, usage records, LLM stream
//! events, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod channel;
pub mod chat;
pub mod config;
pub mod credential;
pub mod error;
pub mod llm;
pub mod usage;
