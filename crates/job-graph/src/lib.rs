//! Job dependency graph and execution-order solver for certbox.
//!
//! This crate turns a flat list of job descriptors into a dependency graph
//! (using petgraph) and computes a deterministic execution order for a
//! requested subset of jobs, pulling in everything they transitively require.
//!
//! Three kinds of relationships are understood:
//!
//! - **direct**: the job names other jobs in its `depends` field
//! - **resource**: the job's `requires` program reads records produced by
//!   resource jobs
//! - **ordering**: `before`/`after` only constrain the relative order of jobs
//!   that both end up in the run
//!
//! # Key Types
//!
//! - [`JobNodeData`]: Trait that job types must implement to be solved
//! - [`JobGraph`]: The dependency graph built over a whole job universe
//! - [`DependencySolver`]: Depth-first topological ordering with cycle diagnostics
//! - [`DependencyError`]: The typed failures (duplicate, missing, cycle, unknown)
//!
//! # Example
//!
//! ```ignore
//! use certbox_job_graph::{DependencySolver, JobNodeData};
//!
//! #[derive(Clone, Debug)]
//! struct Job {
//!     id: String,
//!     depends: Vec<String>,
//! }
//!
//! impl JobNodeData for Job {
//!     fn id(&self) -> &str {
//!         &self.id
//!     }
//!
//!     fn direct_dependencies(&self) -> impl Iterator<Item = &str> {
//!         self.depends.iter().map(String::as_str)
//!     }
//! }
//!
//! let order = DependencySolver::resolve_dependencies(&jobs, None)?;
//! ```

mod error;
mod graph;
mod solver;
mod validation;

pub use error::{DependencyError, DependencyKind, Result};
pub use graph::{DependencyEdge, JobGraph, build_job_map};
pub use solver::DependencySolver;
pub use validation::ValidationResult;

/// Trait for job data that can be placed in a [`JobGraph`].
///
/// All dependency accessors return job ids in the order they were written;
/// the solver relies on that order for deterministic tie-breaking.
pub trait JobNodeData: Clone + std::fmt::Debug {
    /// Returns the unique id of this job.
    fn id(&self) -> &str;

    /// Returns the ids of jobs this job directly depends on.
    fn direct_dependencies(&self) -> impl Iterator<Item = &str>;

    /// Returns the ids of resource jobs referenced by this job's requirements.
    fn resource_dependencies(&self) -> impl Iterator<Item = &str> {
        std::iter::empty()
    }

    /// Returns the ids of jobs this job must be ordered after, if both run.
    fn after_dependencies(&self) -> impl Iterator<Item = &str> {
        std::iter::empty()
    }

    /// Returns the ids of jobs this job must be ordered before, if both run.
    fn before_dependencies(&self) -> impl Iterator<Item = &str> {
        std::iter::empty()
    }
}
