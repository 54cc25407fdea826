use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::config::Config;
use crate::error::{ImportError, Result};
use crate::exec::{ExecutionSummary, Executor};
use crate::output::{self, Format, RunReport};
use crate::plan::{ScanOutcome, scan_directory};
use crate::store::fs::FsEffects;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub config: PathBuf,
    pub format: Format,
    pub yes: bool,
    pub dry_run: bool,
    pub stop_on_error: bool,
    pub report: Option<PathBuf>,
}

/// Scan, confirm, execute, report.
pub fn run(opts: &RunOptions) -> Result<()> {
    if !opts.root.is_dir() {
        return Err(ImportError::DirectoryNotFound(opts.root.clone()));
    }
    let config = Config::load(&opts.config)?;
    log::info!("loaded configuration from {}", opts.config.display());

    let mut outcome = scan_directory(&opts.root, &config)?;
    output::print_statistics(&outcome, opts.format)?;

    if opts.dry_run {
        log::info!("dry run: nothing executed");
        return finish(opts, &outcome, None);
    }
    if outcome.tasks.is_empty() {
        notice(opts.format, "Nothing to do.");
        return finish(opts, &outcome, None);
    }
    if !opts.yes {
        let stdin = io::stdin();
        let prompt = format!("Execute {} tasks? [y/N] ", outcome.tasks.len());
        if !confirm(&mut stdin.lock(), &mut io::stderr(), &prompt)? {
            notice(opts.format, "Cancelled.");
            return finish(opts, &outcome, None);
        }
    }

    let stop_on_error = opts.stop_on_error || config.stop_on_error;
    let executor = Executor::new(FsEffects::new()).stop_on_error(stop_on_error);
    match executor.run(&mut outcome.tasks) {
        Ok(summary) => {
            output::print_execution(&summary, &outcome.tasks, opts.format)?;
            finish(opts, &outcome, Some(summary))
        }
        Err(err) => {
            // Keep the per-task record of how far the run got.
            finish(opts, &outcome, None)?;
            Err(err)
        }
    }
}

fn finish(
    opts: &RunOptions,
    outcome: &ScanOutcome,
    summary: Option<ExecutionSummary>,
) -> Result<()> {
    if let Some(path) = &opts.report {
        output::write_report(path, &RunReport::new(outcome, summary))?;
    }
    Ok(())
}

fn notice(format: Format, message: &str) {
    if format == Format::Pretty {
        println!("{}", message.dimmed());
    }
}

/// Ask on `output`, read one line from `input`. Only `y`/`yes` proceed.
pub fn confirm<R, W>(input: &mut R, output: &mut W, prompt: &str) -> Result<bool>
where
    R: BufRead,
    W: Write,
{
    write!(output, "{prompt}")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Resolve the configuration path: an explicit one wins, otherwise the
/// default file name in the working directory.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(crate::config::DEFAULT_CONFIG_FILE))
}
