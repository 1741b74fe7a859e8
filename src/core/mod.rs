//! Core domain models
//!
//! This module defines the pipeline graph, its steps, run state and the
//! predicate language used for conditional routing.

pub mod condition;
pub mod config;
pub mod pipeline;
pub mod state;
pub mod step;

pub use pipeline::*;
pub use state::*;
pub use step::*;
