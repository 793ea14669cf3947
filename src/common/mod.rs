//! Common utilities and shared functionality
//!
//! This module contains identifiers, helpers and the collaborator seams
//! shared across the engine.

pub mod types;
pub mod traits;
