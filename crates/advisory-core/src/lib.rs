//! # Advisory Core
//!
//! Pure logic for the advisory chat service: data models, conversation
//! stage detection, context compression, opportunity scoring, service
//! matching, retrieval merging, knowledge-base chunking, and the
//! sliding-window rate-limit algorithm.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! External effects (model calls, state storage, rate-limit windows) are
//! reached through the async traits defined here and implemented by the
//! `advisory-chat` crate.

pub mod chunk;
pub mod compress;
pub mod models;
pub mod ratelimit;
pub mod retrieval;
pub mod scoring;
pub mod services;
pub mod stage;
pub mod store;
