//! Gemini Relay
//!
//! An OpenAI-compatible `/v1/chat/completions` endpoint backed by a single
//! browser-extension agent attached over WebSocket. Each HTTP request is
//! translated into one command/reply round trip on the agent link.

pub mod api;
pub mod config;
pub mod db;
pub mod history;
pub mod tasks;
pub mod ws;
