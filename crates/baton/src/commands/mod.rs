//! Commands module for the baton CLI
//!
//! Provides command implementations for the build election and the operation queue.

pub mod build;
pub mod queue;
