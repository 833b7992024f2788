//! certbox binary entry point.

use certbox_cli::cli::{self, EXIT_ERROR, render_error};
use certbox_cli::commands::{Command, CommandContext};
use certbox_cli::tracing::{TracingConfig, init_tracing};
use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Tracing may be unusable during a panic, so report it directly.
    #[allow(clippy::print_stderr)]
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    let tracing_config = TracingConfig {
        format: cli.tracing_format(),
        level: cli.level.into(),
        ..TracingConfig::default()
    };
    if let Err(err) = init_tracing(tracing_config) {
        render_error(err);
        return ExitCode::from(EXIT_ERROR);
    }

    let ctx = CommandContext {
        namespace: cli.namespace,
    };
    let command: Command = cli.command.into();

    match command.execute(&ctx, &mut io::stdout(), &mut io::stderr()) {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            render_error(err);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
