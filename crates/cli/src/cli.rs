use crate::commands::{Command, ResolveOptions};
use crate::tracing::{LogLevel, TracingFormat};
use clap::{Parser, Subcommand, ValueEnum};
use miette::{Diagnostic, Report};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Exit code when everything went fine
pub const EXIT_OK: u8 = 0;
/// Exit code when the command ran but found dependency problems
pub const EXIT_PROBLEMS: u8 = 1;
/// Exit code when the command could not run at all
pub const EXIT_ERROR: u8 = 2;

/// CLI-specific error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Loading units or building the session failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] certbox_session::Error),

    /// Writing command output failed.
    #[error("Failed to write output: {source}")]
    #[diagnostic(code(certbox::cli::output))]
    Output {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Serializing a JSON document failed.
    #[error("Failed to serialize output: {source}")]
    #[diagnostic(code(certbox::cli::serialize))]
    Serialize {
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The tracing subscriber could not be installed.
    #[error("Tracing initialization failed: {message}")]
    #[diagnostic(
        code(certbox::cli::tracing),
        help("Check the RUST_LOG environment variable")
    )]
    Tracing {
        /// Description of the failure.
        message: String,
    },
}

impl CliError {
    /// Create a tracing error
    #[must_use]
    pub fn tracing(message: impl Into<String>) -> Self {
        Self::Tracing {
            message: message.into(),
        }
    }
}

impl From<io::Error> for CliError {
    fn from(source: io::Error) -> Self {
        Self::Output { source }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(source: serde_json::Error) -> Self {
        Self::Serialize { source }
    }
}

/// Render an error to stderr using miette
#[allow(clippy::print_stderr)]
pub fn render_error(err: CliError) {
    let report = Report::new(err);
    eprintln!("{report:?}");
    let _ = io::stderr().flush();
}

/// Output format for command results
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text, one item per line
    #[default]
    Text,
    /// A single JSON document
    Json,
}

/// Resolve and check certification job units.
#[derive(Parser, Debug)]
#[command(name = "certbox")]
#[command(about = "Resolve the run order of certification test jobs")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Logging verbosity level.
    #[arg(
        short = 'l',
        long,
        global = true,
        env = "CERTBOX_LOG_LEVEL",
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log line format.
    #[arg(
        long,
        global = true,
        help = "Log line format",
        default_value = "compact",
        value_enum
    )]
    pub log_format: TracingFormat,

    /// Shorthand for `--log-format json`.
    #[arg(long, global = true, help = "Output logs in JSON format")]
    pub json_logs: bool,

    /// Namespace used to qualify partial job ids.
    #[arg(
        short = 'n',
        long,
        global = true,
        env = "CERTBOX_NAMESPACE",
        help = "Namespace used to qualify partial job ids"
    )]
    pub namespace: Option<String>,
}

impl Cli {
    /// The log format after applying `--json-logs`.
    #[must_use]
    pub const fn tracing_format(&self) -> TracingFormat {
        if self.json_logs {
            TracingFormat::Json
        } else {
            self.log_format
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the run list for a selection of jobs.
    #[command(about = "Compute the run list for a selection of jobs")]
    Resolve {
        /// Job unit files to load.
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Select jobs whose id matches this pattern (repeatable, default: all jobs).
        #[arg(
            short = 'i',
            long = "include",
            action = clap::ArgAction::Append,
            value_name = "PATTERN"
        )]
        include: Vec<String>,
        /// Never select jobs whose id matches this pattern (repeatable).
        #[arg(
            short = 'x',
            long = "exclude",
            action = clap::ArgAction::Append,
            value_name = "PATTERN"
        )]
        exclude: Vec<String>,
        /// Jobs that always run, ahead of the selection (repeatable).
        #[arg(
            short = 'm',
            long = "mandatory",
            action = clap::ArgAction::Append,
            value_name = "PATTERN"
        )]
        mandatory: Vec<String>,
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Move resource jobs to the front of the run list.
        #[arg(long)]
        resources_first: bool,
        /// Seconds added to each manual job in duration estimates.
        #[arg(long, default_value_t = 30.0, value_name = "SECONDS")]
        manual_overhead: f64,
    },
    /// Check job units for structural problems.
    #[command(about = "Check job units for structural problems")]
    Validate {
        /// Job unit files to load.
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List the jobs defined in job units.
    #[command(about = "List the jobs defined in job units")]
    List {
        /// Job unit files to load.
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

impl From<Commands> for Command {
    fn from(cmd: Commands) -> Self {
        match cmd {
            Commands::Resolve {
                files,
                include,
                exclude,
                mandatory,
                format,
                resources_first,
                manual_overhead,
            } => Self::Resolve(ResolveOptions {
                files,
                include,
                exclude,
                mandatory,
                format,
                resources_first,
                manual_overhead,
            }),
            Commands::Validate { files, format } => Self::Validate { files, format },
            Commands::List { files, format } => Self::List { files, format },
        }
    }
}

/// Parse the process arguments.
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
