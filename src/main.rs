mod cli;
mod jq_exec;

use std::process::ExitCode;

use colored::Colorize;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // diagnostics go to stderr so normalized output can be piped
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let command_line_interface = cli::CommandLineInterface::load();
    match command_line_interface.run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{} {error:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
