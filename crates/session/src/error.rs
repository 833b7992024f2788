//! Error types for job loading and session operations.

use crate::job::JobDefinition;
use crate::resource::ResourceProgramError;
use certbox_job_graph::DependencyError;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading jobs or operating on a session.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A job unit file is not valid RFC822 text.
    #[error(
        "Syntax error{} at line {line}: {message}",
        path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default()
    )]
    #[diagnostic(
        code(certbox::session::rfc822_syntax),
        help(
            "Records are 'key: value' lines separated by blank lines; continuation lines start with a space"
        )
    )]
    Rfc822Syntax {
        /// File the text came from, if known.
        path: Option<PathBuf>,
        /// One-based line number of the offending line.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A record could not be turned into a job definition.
    #[error("Invalid job definition at {origin}: {message}")]
    #[diagnostic(
        code(certbox::session::invalid_job),
        help("Every job needs an 'id' and a 'plugin' field (or the 'simple' flag)")
    )]
    InvalidJob {
        /// Where the record came from.
        origin: String,
        /// Description of what is invalid.
        message: String,
    },

    /// A `requires` or `imports` field could not be analysed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    ResourceProgram(#[from] ResourceProgramError),

    /// A job selection pattern is not a valid regular expression.
    #[error("Invalid job pattern '{pattern}': {source}")]
    #[diagnostic(
        code(certbox::session::invalid_pattern),
        help("Patterns are regular expressions matched against the whole job id")
    )]
    InvalidPattern {
        /// The pattern as given.
        pattern: String,
        /// The regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// Jobs selected for removal are still going to run.
    #[error("cannot remove jobs that are on the run list: {}", ids.join(", "))]
    #[diagnostic(
        code(certbox::session::run_list_removal),
        help("Update the desired job list so these jobs are no longer selected, then trim again")
    )]
    RunListRemoval {
        /// Ids of the jobs that could not be removed, sorted.
        ids: Vec<String>,
    },

    /// No job with the given id is known to the session.
    #[error("Job '{id}' is not part of this session")]
    #[diagnostic(code(certbox::session::job_not_found))]
    JobNotFound {
        /// The id that was asked for.
        id: String,
    },

    /// The job list is structurally broken.
    #[error(transparent)]
    #[diagnostic(
        code(certbox::session::dependency),
        help("Fix or remove the conflicting job definitions")
    )]
    Dependency(Box<DependencyError<JobDefinition>>),

    /// I/O error occurred.
    #[error(
        "I/O error during {operation}{}: {source}",
        path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default()
    )]
    #[diagnostic(
        code(certbox::session::io_error),
        help("Check that the job unit files exist and are readable")
    )]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
        /// Optional path where the error occurred.
        path: Option<PathBuf>,
        /// Description of the operation being performed.
        operation: String,
    },
}

impl From<DependencyError<JobDefinition>> for Error {
    fn from(err: DependencyError<JobDefinition>) -> Self {
        Self::Dependency(Box::new(err))
    }
}

impl Error {
    /// Create a syntax error for a line of RFC822 text.
    #[must_use]
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Rfc822Syntax {
            path: None,
            line,
            message: message.into(),
        }
    }

    /// Create an invalid job error.
    #[must_use]
    pub fn invalid_job(origin: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidJob {
            origin: origin.to_string(),
            message: message.into(),
        }
    }

    /// Create an I/O error with context.
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
            operation: operation.into(),
        }
    }

    /// Attach a file path to a syntax error that does not have one yet.
    #[must_use]
    pub fn with_path(self, file: impl Into<PathBuf>) -> Self {
        match self {
            Self::Rfc822Syntax {
                path: None,
                line,
                message,
            } => Self::Rfc822Syntax {
                path: Some(file.into()),
                line,
                message,
            },
            other => other,
        }
    }
}
