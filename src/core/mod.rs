//! Core domain models for pipelines
//!
//! This module defines pipelines, task contracts and resources, the
//! dependency graph derived from a pipeline, and the validation that gates
//! every task launch.

pub mod config;
pub mod dag;
pub mod list;
pub mod pipeline;
pub mod resource;
pub mod state;
pub mod task;
pub mod validate;

pub use config::{Catalog, Manifest, RunIssue};
pub use dag::{DependencyGraph, GraphError};
pub use pipeline::*;
pub use resource::*;
pub use state::*;
pub use task::*;
pub use validate::{ContractError, Direction, ResolveError, ResolvedTaskResources};
