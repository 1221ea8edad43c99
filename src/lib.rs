//! # Advisory Chat
//!
//! An LLM-backed advisory chat service for small and medium enterprises.
//!
//! A visitor converses with a staged assistant; each turn is persisted,
//! compressed to fit a token budget, optionally grounded with knowledge-base
//! excerpts, and streamed back with follow-up suggestions. Business profiles
//! can be assessed against a catalog of AI opportunities and matched to
//! advisory services. Every API route is rate limited and validation and
//! rate-limit failures feed a security monitor.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Rate limiter │──▶│  Validation  │──▶│ Chat pipeline  │
//! │ memory/SQLite│   │  + security  │   │ stage+compress │
//! └──────────────┘   └──────────────┘   └───────┬────────┘
//!                                               │
//!                       ┌───────────────────────┼───────────────┐
//!                       ▼                       ▼               ▼
//!                ┌─────────────┐        ┌────────────┐  ┌──────────────┐
//!                │  Retrieval  │        │ Chat model │  │ Conversation │
//!                │ cache+index │        │ (limited)  │  │ log (SQLite) │
//!                └─────────────┘        └────────────┘  └──────────────┘
//! ```
//!
//! Pure domain logic (stages, compression, scoring, service matching,
//! rate-limit windows, chunking) lives in the `advisory-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! advisor init
//! advisor ingest ./kb/agriculture --industry agriculture
//! advisor chat "We grow wheat and want to cut water use" --industry agriculture
//! advisor serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Typed errors callers must tell apart |
//! | [`db`] | Database connection |
//! | [`migrate`] | Table creation |
//! | [`llm`] | Chat-completion providers and the concurrency cap |
//! | [`embedding`] | Embedding providers |
//! | [`vector`] | Vector index providers |
//! | [`cache`] | TTL caches |
//! | [`knowledge`] | Knowledge-base retrieval |
//! | [`retrieval`] | Cached retrieval with timeouts and degradation |
//! | [`orchestrator`] | Stage, compression, and system prompt placement |
//! | [`conversation_store`] | Persisted conversations and messages |
//! | [`chat`] | The chat turn pipeline and event-stream framing |
//! | [`assessment`] | Opportunity assessment and service recommendation |
//! | [`validation`] | Request payload validation |
//! | [`security`] | Security events, scrubbing, and alert thresholds |
//! | [`ratelimit`] | SQLite window store, limiter, and middleware |
//! | [`ingest`] | Knowledge-base ingestion |
//! | [`stats`] | Service statistics |
//! | [`server`] | HTTP API server |

pub mod assessment;
pub mod cache;
pub mod chat;
pub mod config;
pub mod conversation_store;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod knowledge;
pub mod llm;
pub mod migrate;
pub mod orchestrator;
pub mod ratelimit;
pub mod retrieval;
pub mod security;
pub mod server;
pub mod stats;
pub mod validation;
pub mod vector;
