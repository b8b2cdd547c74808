//! Psellos dist-run importer CLI
//!
//! Imports one compiled dist-run into the published artifact directory. The
//! JSON run report is printed to stdout and written to `--report`; logs and
//! the short status line go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use psellos_distrun::pipeline::{DEFAULT_OUT_DIR, DEFAULT_REPORT_PATH};
use psellos_distrun::{run_import, ImportOptions, RunMode, RunReport};
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod logger;

#[derive(Parser, Debug)]
#[command(name = "psellos-import")]
#[command(
    author,
    version,
    about = "Import a compiled dist-run into deterministic Psellos artifacts"
)]
struct Cli {
    /// Compiled dist-run root (contains `machine/` and `entities/`).
    #[arg(long, value_name = "PATH")]
    dist_run: PathBuf,

    /// Artifact output directory.
    #[arg(long, value_name = "DIR", default_value = DEFAULT_OUT_DIR)]
    out: PathBuf,

    /// Fail when optional dist-run entries are missing.
    #[arg(long)]
    strict: bool,

    /// Build and report without touching the output directory.
    #[arg(long)]
    dry_run: bool,

    /// Run report path; the conflict report is written next to it.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_REPORT_PATH)]
    report: PathBuf,

    /// JSON object of score weights (`scalar_field`, `source`, `layer`,
    /// `temporal`, `raw`).
    #[arg(long, value_name = "PATH")]
    score_config: Option<PathBuf>,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

impl Cli {
    fn into_options(self) -> Result<ImportOptions> {
        let cwd = env::current_dir().context("failed to read working directory")?;
        let mut options = ImportOptions::new(absolute(&cwd, &self.dist_run))
            .with_out_dir(absolute(&cwd, &self.out))
            .with_report_path(absolute(&cwd, &self.report))
            .strict(self.strict)
            .dry_run(self.dry_run);
        if let Some(path) = &self.score_config {
            options = options.with_score_config(absolute(&cwd, path));
        }
        Ok(options)
    }
}

fn print_status(report: &RunReport) {
    let verb = match report.mode {
        RunMode::Apply => "imported".green().bold(),
        RunMode::DryRun => "dry-run".yellow().bold(),
    };
    eprintln!(
        "{} {} persons, {} assertions, {} layers ({} conflict ids, {} warnings)",
        verb,
        report.counts.persons,
        report.counts.assertions,
        report.counts.layers,
        report.counts.conflict_ids,
        report.warnings.len()
    );
}

fn run(cli: Cli) -> Result<()> {
    logger::init(&cli.log_level)?;
    let options = cli.into_options()?;
    let report = run_import(&options)
        .with_context(|| format!("import of {} failed", options.dist_run.display()))?;
    println!("{}", report.to_json()?.trim_end());
    print_status(&report);
    Ok(())
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
