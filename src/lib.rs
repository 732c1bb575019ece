//! porquienvotar API library
//!
//! Backend for a conversational assistant that interviews a citizen about
//! political priorities, forwards the conversation to a hosted LLM provider and
//! returns candidate-affinity recommendations.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Domain models, errors and the incremental answer parser.
//! - `data`: Counter store, analytics sink and database pool.
//! - `integrations`: LLM provider gateway.
//! - `analytics`: Hidden-analysis sink and dashboard aggregates.
//! - `chat_session`: Client-side conversation state.
//! - `circuit_breaker`: Breaker guarding the counter store.
//! - `config`: Configuration management.
//! - `db`: Database connection and schema bootstrap.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `llm_gateway`: Provider selection, blocking and streaming completions.
//! - `models`: Request, response and analytics data shapes.
//! - `partial_json`: Extraction of the visible message from a partial stream.
//! - `prompt`: System prompt and response schema.
//! - `rate_limit`: Daily per-IP quota.
//! - `routes`: Router assembly and middleware.
//! - `sse`: Server-sent events decoding.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

pub mod analytics;
pub mod chat_session;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod llm_gateway;
pub mod models;
pub mod partial_json;
pub mod prompt;
pub mod rate_limit;
pub mod routes;
pub mod sse;
