//! certbox command line front end.
//!
//! Loads RFC822 job units, selects jobs with regular expressions and prints
//! the resolved run list, structural problems or the loaded jobs. The
//! binary in `main.rs` only parses arguments, installs tracing and maps the
//! command outcome to an exit code.

/// CLI argument parsing, errors and exit codes.
pub mod cli;
/// Command implementations (resolve, validate, list).
pub mod commands;
/// Tracing and logging configuration.
pub mod tracing;

pub use cli::{CliError, EXIT_ERROR, EXIT_OK, EXIT_PROBLEMS};
pub use commands::{Command, CommandContext, Outcome};
