use super::{CommandContext, Outcome, load_units, write_json};
use crate::cli::{CliError, OutputFormat};
use std::io::Write;
use std::path::PathBuf;

pub(super) fn execute(
    files: &[PathBuf],
    format: OutputFormat,
    ctx: &CommandContext,
    out: &mut dyn Write,
) -> Result<Outcome, CliError> {
    let jobs = load_units(files, ctx.namespace.as_deref())?;
    match format {
        OutputFormat::Text => {
            for job in &jobs {
                writeln!(out, "{}\t{}", job.id(), job.plugin())?;
            }
        }
        OutputFormat::Json => write_json(out, &jobs)?,
    }
    Ok(Outcome::Clean)
}
