//! Error types for dependency resolution.

use crate::JobNodeData;
use miette::Diagnostic;
use std::fmt;
use thiserror::Error;

/// Result type for dependency resolution, generic over the job type.
pub type Result<T, J> = std::result::Result<T, DependencyError<J>>;

/// Kind of relationship between two jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKind {
    /// Listed in `depends`; the other job must run first.
    Direct,
    /// Referenced by a `requires` program; the resource job must run first.
    Resource,
    /// Derived from `before`/`after`; only constrains relative order.
    Ordering,
}

impl DependencyKind {
    /// Whether this kind of edge pulls the target job into the run.
    #[must_use]
    pub const fn is_hard(self) -> bool {
        matches!(self, Self::Direct | Self::Resource)
    }

    /// Stable lowercase name used in diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Resource => "resource",
            Self::Ordering => "ordering",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural problems found while resolving job dependencies.
///
/// Each variant carries the job objects involved so callers (for example an
/// interactive session) can act on them, not just print them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DependencyError<J: JobNodeData> {
    /// Two jobs share one id.
    #[error("duplicate job id: '{}'", .job.id())]
    Duplicate {
        /// The job seen first.
        job: J,
        /// The later job with the same id.
        duplicate_job: J,
    },

    /// A job references an id that does not exist in the job list.
    #[error("missing dependency: '{missing_job_id}' ({kind})")]
    Missing {
        /// The job holding the dangling reference.
        job: J,
        /// The id that could not be found.
        missing_job_id: String,
        /// How the id was referenced.
        kind: DependencyKind,
    },

    /// A dependency chain returns to a job that is still being visited.
    ///
    /// `job_list[n]` depends on `job_list[n + 1]` and the first job is
    /// repeated at the end.
    #[error("dependency cycle detected: {}", format_cycle(.job_list))]
    Cycle {
        /// The jobs forming the cycle, first job repeated at the end.
        job_list: Vec<J>,
    },

    /// A job on the visit list is not part of the job list.
    #[error("unknown job referenced: '{}'", .job.id())]
    Unknown {
        /// The job that was asked for.
        job: J,
    },
}

fn format_cycle<J: JobNodeData>(job_list: &[J]) -> String {
    job_list
        .iter()
        .map(JobNodeData::id)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl<J: JobNodeData> DependencyError<J> {
    /// The job that is affected by this problem.
    ///
    /// Removing this job from a selection makes the problem go away.
    #[must_use]
    pub fn affected_job(&self) -> &J {
        match self {
            Self::Duplicate { job, .. } | Self::Missing { job, .. } | Self::Unknown { job } => job,
            Self::Cycle { job_list } => &job_list[0],
        }
    }

    /// The job that is causing the problem, if it exists at all.
    #[must_use]
    pub fn affecting_job(&self) -> Option<&J> {
        match self {
            Self::Duplicate { duplicate_job, .. } => Some(duplicate_job),
            Self::Cycle { job_list } => job_list.first(),
            Self::Missing { .. } | Self::Unknown { .. } => None,
        }
    }

    /// Ids of the jobs forming a cycle, empty for other variants.
    #[must_use]
    pub fn cycle_ids(&self) -> Vec<&str> {
        match self {
            Self::Cycle { job_list } => job_list.iter().map(JobNodeData::id).collect(),
            _ => Vec::new(),
        }
    }
}

impl<J: JobNodeData> Diagnostic for DependencyError<J> {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let code = match self {
            Self::Duplicate { .. } => "certbox::job_graph::duplicate",
            Self::Missing { .. } => "certbox::job_graph::missing",
            Self::Cycle { .. } => "certbox::job_graph::cycle",
            Self::Unknown { .. } => "certbox::job_graph::unknown",
        };
        Some(Box::new(code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        let help = match self {
            Self::Duplicate { .. } => {
                "Job ids must be unique; rename or remove one of the definitions".to_string()
            }
            Self::Missing { job, kind, .. } => format!(
                "Job '{}' has a {kind} reference to a job that is not loaded",
                job.id()
            ),
            Self::Cycle { .. } => {
                "Break the cycle by removing one of the dependencies".to_string()
            }
            Self::Unknown { .. } => {
                "Only jobs from the loaded job list can be selected".to_string()
            }
        };
        Some(Box::new(help))
    }
}
