// traitlist - trait shortlist builds and cross-engine verification

mod pipeline;
mod verify;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use traitlist_cli::exit_codes::{
    recon_exit_code, EXIT_CONFIG, EXIT_IO, EXIT_SCHEMA, EXIT_SUCCESS, EXIT_USAGE,
};
use traitlist_recon::ReconError;

#[derive(Parser)]
#[command(name = "traitlist")]
#[command(about = "Deterministic taxon union, trait shortlist and quantile builds, with cross-engine verification")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Suppress logs and the human summary on stderr
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the union, shortlist, occurrence and quantile tables from a config
    #[command(subcommand)]
    Pipeline(pipeline::PipelineCommands),

    /// Compare tables produced by two engines (exit 0 = reproducible, exit 1 = divergent)
    #[command(subcommand)]
    Verify(verify::VerifyCommands),
}

fn long_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\nengine:  traitlist-recon ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   debug",
            "\ntarget:  ", env!("TARGET"),
            "\ncontract_version(verify): 1",
        )
    } else {
        concat!(
            env!("CARGO_PKG_VERSION"),
            " (", env!("GIT_COMMIT_HASH"), ")",
            "\nengine:  traitlist-recon ", env!("CARGO_PKG_VERSION"),
            "\nbuild:   release",
            "\ntarget:  ", env!("TARGET"),
            "\ncontract_version(verify): 1",
        )
    }
}

/// Logs go to stderr; stdout is reserved for `--json`.
fn init_tracing(quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("traitlist=info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let result = match cli.command {
        Commands::Pipeline(cmd) => pipeline::cmd_pipeline(cmd, cli.quiet),
        Commands::Verify(cmd) => verify::cmd_verify(cmd, cli.quiet),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self { code: EXIT_SCHEMA, message: msg.into(), hint: None }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self { code: EXIT_CONFIG, message: msg.into(), hint: None }
    }

    /// Exit with `code` and nothing further on stderr; the caller already
    /// printed its report.
    pub fn silent(code: u8) -> Self {
        Self { code, message: String::new(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<ReconError> for CliError {
    fn from(err: ReconError) -> Self {
        let code = recon_exit_code(&err);
        let hint = match &err {
            ReconError::MissingColumn { .. } => {
                Some("check the column names in the config against the input header".to_string())
            }
            e if e.is_invariant() => {
                Some("this indicates a reconciliation bug, not messy input data".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }
}
