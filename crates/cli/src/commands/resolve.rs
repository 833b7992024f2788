use super::{CommandContext, Outcome, ProblemReport, load_units, write_json, write_problems};
use crate::cli::{CliError, OutputFormat};
use certbox_session::{
    DurationEstimate, JobQualifier, RegexQualifier, SessionConfig, SessionState, resources_first,
    select_jobs,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Options of the `resolve` command.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Job unit files to load.
    pub files: Vec<PathBuf>,
    /// Patterns selecting desired jobs; empty selects every job.
    pub include: Vec<String>,
    /// Patterns of jobs never to select.
    pub exclude: Vec<String>,
    /// Patterns selecting mandatory jobs.
    pub mandatory: Vec<String>,
    /// Output format.
    pub format: OutputFormat,
    /// Move resource jobs to the front of the run list.
    pub resources_first: bool,
    /// Seconds added to each manual job in duration estimates.
    pub manual_overhead: f64,
}

#[derive(Serialize)]
struct ResolveReport<'a> {
    run_list: Vec<&'a str>,
    problems: Vec<ProblemReport>,
    estimated_duration: DurationEstimate,
}

fn qualifiers(
    include: &[String],
    exclude: &[String],
) -> Result<Vec<Box<dyn JobQualifier>>, CliError> {
    let mut qualifiers: Vec<Box<dyn JobQualifier>> = Vec::new();
    if include.is_empty() {
        qualifiers.push(Box::new(RegexQualifier::new(".*", true)?));
    }
    for pattern in include {
        qualifiers.push(Box::new(RegexQualifier::new(pattern, true)?));
    }
    for pattern in exclude {
        qualifiers.push(Box::new(RegexQualifier::new(pattern, false)?));
    }
    Ok(qualifiers)
}

pub(super) fn execute(
    options: &ResolveOptions,
    ctx: &CommandContext,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<Outcome, CliError> {
    let jobs = load_units(&options.files, ctx.namespace.as_deref())?;

    let desired = select_jobs(&jobs, &qualifiers(&options.include, &options.exclude)?);
    let mandatory = if options.mandatory.is_empty() {
        Vec::new()
    } else {
        select_jobs(&jobs, &qualifiers(&options.mandatory, &[])?)
    };

    let config = SessionConfig {
        manual_overhead: options.manual_overhead,
        ..SessionConfig::default()
    };
    let mut session = SessionState::new(jobs, config)?;
    session.update_mandatory_job_list(mandatory);
    let problems = session.update_desired_job_list(&desired);

    let run_list = if options.resources_first {
        resources_first(session.run_list())
    } else {
        session.run_list().to_vec()
    };
    let estimate = session.estimated_duration();
    info!(
        desired = desired.len(),
        run = run_list.len(),
        problems = problems.len(),
        automated_seconds = ?estimate.automated,
        manual_seconds = ?estimate.manual,
        "Resolved run list"
    );

    match options.format {
        OutputFormat::Text => {
            for job in &run_list {
                writeln!(out, "{}", job.id())?;
            }
            write_problems(err, &problems)?;
        }
        OutputFormat::Json => {
            let report = ResolveReport {
                run_list: run_list.iter().map(|job| job.id()).collect(),
                problems: problems.iter().map(ProblemReport::from).collect(),
                estimated_duration: estimate,
            };
            write_json(out, &report)?;
        }
    }

    Ok(Outcome::from_problem_count(problems.len()))
}
