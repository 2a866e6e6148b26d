use clap::Parser;
use cli::{CommandLine, parse_args};
use disk_image_builder::{BuildContext, CommandBuilder};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Parse command line options before we configure logging so we can set the
    // default level
    let command_line = CommandLine::parse();

    // Stdout is reserved for the result, so log to stderr
    let default_filter = if command_line.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let request = match parse_args(&command_line) {
        Ok(request) => request,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let builder = CommandBuilder::new(&command_line.builder_program)
        .args(command_line.builder_args.iter().cloned());
    debug!(program = %builder.program().display(), "Using builder program");

    match cli::generate::run(
        &builder,
        &BuildContext::background(),
        request,
        &mut std::io::stdout(),
    )
    .await
    {
        Err(err) => {
            error!(error = ?err, "Failed to build disk image");
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    }
}
