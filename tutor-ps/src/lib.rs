//! # Tutor Problem Service Library (tutor-ps)
//!
//! Adaptive math problem pipeline with bank-backed caching.
//!
//! **Purpose:** Run the staged problem pipeline (direction analysis,
//! bank-or-generate acquisition, walkthrough, error analysis), stream
//! per-session progress over SSE, enforce single-flight execution per
//! session, and grade submitted answers.
//!
//! **Architecture:** tokio task per pipeline run; axum HTTP/SSE control
//! surface; SQLite problem bank and history via sqlx.

pub mod api;
pub mod bank;
pub mod channel;
pub mod config;
pub mod error;
pub mod generator;
pub mod grading;
pub mod pipeline;
pub mod registry;

pub use error::{Error, Result};
