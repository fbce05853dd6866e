//! Matchday API Library Crate
//!
//! The trusted backend of the voice assistant: it holds the upstream provider
//! key and exposes token exchange and speech synthesis routes to clients. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod upstream;
