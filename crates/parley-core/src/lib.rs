//! Business logic and repository trait definitions for Parley.
//!
//! This crate defines the "ports" (repository, sink, and provider traits)
//! that the infrastructure layer implements, plus the streaming chat
//! coordinator that ties them together. It depends only on `parley-types`
//! -- never on `parley-infra` or any database/IO crate.

pub mod chat;
pub mod llm;
pub mod repository;
pub mod service;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;
