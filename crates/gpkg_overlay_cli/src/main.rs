//! Command-line front end.
//!
//! # Responsibility
//! - Check core linkage (`ping`, `version`).
//! - Run read-only session commands against a dataset: list plans, print
//!   status rows, export a plan's merged table.

use clap::{Parser, Subcommand};
use gpkg_overlay_core::{
    init_logging, CancelToken, ExportFormat, ExportScope, GpkgDataset, LogTarget, Session,
    SessionConfig,
};
use log::error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Attribute overlay editor for GeoPackage layers
#[derive(Debug, Parser)]
#[command(name = "gpkg-overlay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Side store (default: <dataset>_data.sqlite)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Dataset layer (default: first layer)
    #[arg(long, global = true)]
    layer: Option<String>,

    /// Stderr log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check that the core library is linked
    Ping,

    /// Print the core library version
    Version,

    /// List the plans stored for a dataset
    Plans { dataset: PathBuf },

    /// Print the status rows of a plan
    Status { dataset: PathBuf, plan: String },

    /// Export a plan's merged table to .csv or .gpkg
    Export {
        dataset: PathBuf,
        plan: String,
        out: PathBuf,

        /// Export every dataset feature instead of the plan's features
        #[arg(long)]
        all: bool,
    },
}

impl Cli {
    fn open_session(&self, dataset: &Path) -> Result<Session<GpkgDataset>, String> {
        let mut config = SessionConfig::for_dataset(dataset);
        if let Some(store) = &self.store {
            config = config.with_store_path(store);
        }
        if let Some(layer) = &self.layer {
            config = config.with_layer(layer);
        }
        let session = Session::open(&config).map_err(|err| err.to_string())?;
        for problem in session.store_corruption() {
            eprintln!("warning: {problem}");
        }
        Ok(session)
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Ping => println!("gpkg_overlay_core ping={}", gpkg_overlay_core::ping()),
        Commands::Version => println!(
            "gpkg_overlay_core version={}",
            gpkg_overlay_core::core_version()
        ),
        Commands::Plans { dataset } => {
            let session = cli.open_session(dataset)?;
            for name in session.list_plans().map_err(|err| err.to_string())? {
                println!("{name}");
            }
        }
        Commands::Status { dataset, plan } => {
            let mut session = cli.open_session(dataset)?;
            session.select_plan(plan).map_err(|err| err.to_string())?;
            for status in session.status_values().map_err(|err| err.to_string())? {
                println!("{}\t{}", status.label, status.display());
            }
        }
        Commands::Export {
            dataset,
            plan,
            out,
            all,
        } => {
            let format = ExportFormat::from_path(out).ok_or_else(|| {
                format!("cannot infer export format from `{}`", out.display())
            })?;
            let scope = if *all {
                ExportScope::Dataset
            } else {
                ExportScope::Plan
            };
            let mut session = cli.open_session(dataset)?;
            session.select_plan(plan).map_err(|err| err.to_string())?;
            for issue in session.working_table().map_err(|err| err.to_string())?.issues() {
                eprintln!("warning: {issue}");
            }
            let summary = session
                .begin_export(scope)
                .and_then(|job| job.write_to_path(format, out, &CancelToken::new()))
                .map_err(|err| err.to_string())?;
            println!(
                "exported {} rows as {} ({})",
                summary.rows,
                summary.format,
                scope.as_str()
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli.log_level, LogTarget::Stderr) {
        eprintln!("{err}");
        return ExitCode::from(2);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli_command module=cli status=error");
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}
