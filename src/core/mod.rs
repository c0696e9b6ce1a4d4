//! Core domain models for pipelines
//!
//! Declaration-time structures and their YAML form, plus the records
//! produced when a pipeline runs.

pub mod binding;
pub mod config;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod stage;
pub mod state;
pub mod step;

pub use binding::*;
pub use error::*;
pub use graph::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
pub use step::*;
