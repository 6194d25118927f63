use std::{
    io,
    path::{Path, PathBuf},
};

use clap::{Args, Parser, Subcommand};
use config::Config;
use deliver::Deliver;
use directory::{CsvExport, Directory, HttpDirectory};
use run::{run, Reporting, Source};
use snapshot::Snapshot;

mod config;
mod data;
mod deliver;
mod diff;
mod directory;
mod logging;
mod read;
mod report;
mod run;
mod snapshot;
mod write;

/// Week-over-week account directory report.
#[derive(Parser)]
#[command(name = "account-report", version, about)]
struct Cli {
    /// Configuration file [default: account-report.toml, if present]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the directory and save it as a snapshot
    Fetch {
        /// Where to write the snapshot
        out: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Compare two saved snapshots and deliver the report
    Diff {
        /// Baseline snapshot
        old: PathBuf,
        /// Snapshot to compare against the baseline
        new: PathBuf,
        #[command(flatten)]
        report: ReportArgs,
    },
    /// Fetch, compare against OLD, deliver, then save the fetched snapshot as NEW
    Run {
        /// Baseline snapshot
        old: PathBuf,
        /// Where to write the fetched snapshot once the report is delivered
        new: PathBuf,
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        report: ReportArgs,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Read a CSV directory export instead of querying the directory service
    #[arg(long)]
    export: Option<PathBuf>,
    /// Snapshot label [default: the output file name]
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args)]
struct ReportArgs {
    /// Report recipient, repeatable [default: delivery.recipients]
    #[arg(long = "to", value_name = "ADDRESS")]
    recipients: Vec<String>,
    /// Also write the identifiers behind each count to this CSV file
    #[arg(long)]
    audit: Option<PathBuf>,
    /// Print the report to stdout instead of delivering it
    #[arg(long)]
    dry_run: bool,
}

fn source_name(source: &SourceArgs, out: &Path) -> String {
    source.name.clone().unwrap_or_else(|| {
        out.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".into())
    })
}

fn directory(config: &Config, source: &SourceArgs) -> Result<Box<dyn Directory>, anyhow::Error> {
    Ok(match &source.export {
        Some(path) => Box::new(CsvExport { path: path.clone() }),
        None => Box::new(HttpDirectory::new(&config.directory)?),
    })
}

fn reporting<'a>(
    config: &Config,
    args: &ReportArgs,
    deliverer: &'a dyn Deliver,
) -> Result<Reporting<'a>, anyhow::Error> {
    let recipients = if args.recipients.is_empty() {
        config.delivery.recipients.clone()
    } else {
        args.recipients.clone()
    };
    Ok(Reporting {
        filter: config.groups.filter()?,
        deliverer,
        recipients,
        audit: args.audit.clone(),
        dry_run: args.dry_run,
    })
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = match &cli.config {
        Some(path) => Config::load(path, true)?,
        None => Config::load(Path::new("account-report.toml"), false)?,
    };
    let deliverer = config.delivery.deliverer();
    match &cli.command {
        Command::Fetch { out, source } => {
            let directory = directory(&config, source)?;
            Source {
                directory: directory.as_ref(),
                max_malformed: config.directory.max_malformed,
                name: source_name(source, out),
            }
            .fetch()?
            .save(out)?;
        }
        Command::Diff { old, new, report } => {
            let old = Snapshot::load(old)?;
            let new = Snapshot::load(new)?;
            reporting(&config, report, deliverer.as_ref())?.report(
                &old,
                &new,
                io::stdout().lock(),
            )?;
        }
        Command::Run {
            old,
            new,
            source,
            report,
        } => {
            let directory = directory(&config, source)?;
            let source = Source {
                directory: directory.as_ref(),
                max_malformed: config.directory.max_malformed,
                name: source_name(source, new),
            };
            let reporting = reporting(&config, report, deliverer.as_ref())?;
            run(old, new, &source, &reporting, io::stdout().lock())?;
        }
    }
    Ok(())
}
