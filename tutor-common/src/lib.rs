//! # Tutor Common Library (tutor-common)
//!
//! Shared types and storage layer for the adaptive math tutor services.
//!
//! **Purpose:** Error types, curriculum catalog, progress event model,
//! and the SQLite schema/queries used by the problem service.

pub mod curriculum;
pub mod db;
pub mod error;
pub mod events;

pub use curriculum::CurriculumStyle;
pub use error::{Error, Result};
