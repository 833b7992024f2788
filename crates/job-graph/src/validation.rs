//! Validation utilities for job graphs.
//!
//! Unlike the solver, validation does not stop at the first problem.

use crate::{DependencyError, JobGraph, JobNodeData, solver};

/// Result of graph validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult<J: JobNodeData> {
    /// Whether the graph is valid (no duplicates, dangling references or cycles).
    pub is_valid: bool,
    /// List of validation errors, if any.
    pub errors: Vec<DependencyError<J>>,
}

impl<J: JobNodeData> ValidationResult<J> {
    /// Create a valid result.
    #[must_use]
    pub const fn valid() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
        }
    }

    /// Create an invalid result with errors.
    #[must_use]
    pub const fn invalid(errors: Vec<DependencyError<J>>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }
}

impl<J: JobNodeData> JobGraph<'_, J> {
    /// Validate the graph structure.
    ///
    /// Checks for:
    /// - References to ids that are not in the graph, in job order
    /// - A cycle in the dependency graph, with ordering edges counted
    #[must_use]
    pub fn validate(&self) -> ValidationResult<J> {
        let mut errors: Vec<DependencyError<J>> = self
            .jobs()
            .flat_map(|job| {
                self.missing_references(job.id())
                    .into_iter()
                    .map(move |(kind, missing)| DependencyError::Missing {
                        job: job.clone(),
                        missing_job_id: missing.to_string(),
                        kind,
                    })
            })
            .collect();

        if let Some(cycle) = solver::find_cycle(self) {
            errors.push(cycle);
        }

        if errors.is_empty() {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(errors)
        }
    }
}
