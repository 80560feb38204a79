//! Utility functions and helpers
//!
//! ## Modules
//!
//! - [`retry`] - Retry policies for connections and transient network failures

pub mod retry;
