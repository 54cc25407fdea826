use std::path::PathBuf;

use clap::{ArgAction, Parser};
use vault_import::commands::run::{self, RunOptions};
use vault_import::logging;
use vault_import::output::Format;

#[derive(Parser)]
#[command(
    name = "vault-import",
    version,
    about = "Migrate an exported note tree into a vault layout"
)]
struct Cli {
    /// Root of the exported tree
    directory: PathBuf,
    /// Rule file (defaults to vault-import.yaml in the working directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value = "pretty")]
    format: Format,
    /// Execute without asking for confirmation
    #[arg(long, short = 'y')]
    yes: bool,
    /// Scan and report only; never touch the tree
    #[arg(long, conflicts_with = "yes")]
    dry_run: bool,
    /// Abort the batch at the first failing task
    #[arg(long)]
    stop_on_error: bool,
    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Write log records to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Truncate the log file before writing
    #[arg(long, requires = "log_file")]
    reset_log: bool,
}

fn execute(cli: Cli) -> vault_import::error::Result<()> {
    logging::init(cli.verbose, cli.log_file.as_deref(), cli.reset_log)?;

    let opts = RunOptions {
        root: cli.directory,
        config: run::config_path(cli.config.as_deref()),
        format: cli.format,
        yes: cli.yes,
        dry_run: cli.dry_run,
        stop_on_error: cli.stop_on_error,
        report: cli.report,
    };
    run::run(&opts)
}

fn main() {
    let cli = Cli::parse();
    let format = cli.format;
    if let Err(e) = execute(cli) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            Format::Pretty => eprintln!("error: {e}"),
        }
        std::process::exit(1);
    }
}
