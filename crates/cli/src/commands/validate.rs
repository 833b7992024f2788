use super::{CommandContext, Outcome, ProblemReport, load_units, write_json, write_problems};
use crate::cli::{CliError, OutputFormat};
use certbox_job_graph::DependencySolver;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Serialize)]
struct ValidateReport {
    jobs: usize,
    is_valid: bool,
    errors: Vec<ProblemReport>,
}

pub(super) fn execute(
    files: &[PathBuf],
    format: OutputFormat,
    ctx: &CommandContext,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<Outcome, CliError> {
    let jobs = load_units(files, ctx.namespace.as_deref())?;
    let result = DependencySolver::validate(&jobs);
    info!(jobs = jobs.len(), errors = result.errors.len(), "Validated job units");

    match format {
        OutputFormat::Text => {
            if result.is_valid {
                writeln!(out, "{} jobs, no problems found", jobs.len())?;
            } else {
                write_problems(err, &result.errors)?;
            }
        }
        OutputFormat::Json => {
            let report = ValidateReport {
                jobs: jobs.len(),
                is_valid: result.is_valid,
                errors: result.errors.iter().map(ProblemReport::from).collect(),
            };
            write_json(out, &report)?;
        }
    }

    Ok(Outcome::from_problem_count(result.errors.len()))
}
