//! Command implementations.
//!
//! Commands write their results to `out` and problem reports to `err`, and
//! return whether problems were found. Hard failures are returned as
//! [`CliError`].

mod list;
mod resolve;
mod validate;

pub use resolve::ResolveOptions;

use crate::cli::{CliError, EXIT_OK, EXIT_PROBLEMS, OutputFormat};
use certbox_job_graph::DependencyError;
use certbox_session::{JobDefinition, load_job_file};
use miette::{Diagnostic, Report};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// A parsed command, ready to run.
#[derive(Debug, Clone)]
pub enum Command {
    /// Compute a run list.
    Resolve(ResolveOptions),
    /// Check job units for structural problems.
    Validate {
        /// Job unit files to load.
        files: Vec<PathBuf>,
        /// Output format.
        format: OutputFormat,
    },
    /// List the loaded jobs.
    List {
        /// Job unit files to load.
        files: Vec<PathBuf>,
        /// Output format.
        format: OutputFormat,
    },
}

/// Settings shared by every command.
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Namespace used to qualify partial job ids.
    pub namespace: Option<String>,
}

/// How a command that ran to completion went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to report.
    Clean,
    /// Dependency problems were reported.
    Problems,
}

impl Outcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Clean => EXIT_OK,
            Self::Problems => EXIT_PROBLEMS,
        }
    }

    const fn from_problem_count(count: usize) -> Self {
        if count == 0 {
            Self::Clean
        } else {
            Self::Problems
        }
    }
}

impl Command {
    /// Name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve",
            Self::Validate { .. } => "validate",
            Self::List { .. } => "list",
        }
    }

    /// Run the command.
    ///
    /// # Errors
    ///
    /// Returns a [`CliError`] if the job units cannot be loaded, the session
    /// cannot be built or the output cannot be written.
    pub fn execute(
        self,
        ctx: &CommandContext,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Outcome, CliError> {
        let span = crate::command_span!(self.name());
        let _guard = span.enter();
        match self {
            Self::Resolve(options) => resolve::execute(&options, ctx, out, err),
            Self::Validate { files, format } => validate::execute(&files, format, ctx, out, err),
            Self::List { files, format } => list::execute(&files, format, ctx, out),
        }
    }
}

/// Load every job from the given unit files, in order.
fn load_units(files: &[PathBuf], namespace: Option<&str>) -> Result<Vec<JobDefinition>, CliError> {
    let mut jobs = Vec::new();
    for file in files {
        jobs.extend(load_job_file(file, namespace)?);
    }
    debug!(files = files.len(), jobs = jobs.len(), "Loaded job units");
    Ok(jobs)
}

/// A dependency problem as reported in JSON output.
#[derive(Debug, Serialize)]
struct ProblemReport {
    code: String,
    job: String,
    message: String,
}

impl From<&DependencyError<JobDefinition>> for ProblemReport {
    fn from(problem: &DependencyError<JobDefinition>) -> Self {
        Self {
            code: problem.code().map(|c| c.to_string()).unwrap_or_default(),
            job: problem.affected_job().id().to_string(),
            message: problem.to_string(),
        }
    }
}

fn write_problems(
    err: &mut dyn Write,
    problems: &[DependencyError<JobDefinition>],
) -> Result<(), CliError> {
    for problem in problems {
        writeln!(err, "{:?}", Report::new(problem.clone()))?;
    }
    Ok(())
}

fn write_json(out: &mut dyn Write, value: &impl Serialize) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
