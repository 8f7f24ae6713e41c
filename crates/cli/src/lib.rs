//! Operator commands over a checkpoint directory.
//!
//! Every command reads ledgers only; processing runs are driven by the
//! service embedding `summarizer-infra`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use summarizer_core::{ContainerId, JobKey};
use summarizer_infra::checkpoint::{
    consolidate, FsLedgerStore, Ledger, LedgerHandle, LedgerStatusReport, LedgerStore,
};
use summarizer_infra::config::DEFAULT_CHECKPOINT_DIR;

/// Inspect and export checkpoint ledgers of batch summarization jobs
#[derive(Debug, Parser)]
#[command(name = "summarizer")]
#[command(version)]
#[command(
    about = "Inspect and export checkpoint ledgers of batch summarization jobs",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding checkpoint_<job>_<timestamp>.json ledgers
    #[arg(
        short,
        long,
        value_name = "DIR",
        global = true,
        env = "CHECKPOINT_DIR",
        default_value = DEFAULT_CHECKPOINT_DIR
    )]
    pub dir: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List every ledger in the checkpoint directory
    List,
    /// Show progress of one job, or of all jobs when none is given
    Status {
        /// Job key, container id, or folder URL
        job: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the failed items of a job with their latest error
    Failed {
        /// Job key, container id, or folder URL
        job: String,
    },
    /// Write deduplicated descriptions of a job's results
    Export {
        /// Job key, container id, or folder URL
        job: String,
        /// Output file (stdout when omitted)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Resolve whatever the operator typed into the job key it maps to.
pub fn resolve_job_key(input: &str) -> Result<JobKey> {
    let container = ContainerId::parse(input).with_context(|| format!("invalid job {input:?}"))?;
    Ok(JobKey::for_container(&container))
}

pub fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let store = FsLedgerStore::new(&cli.dir);
    debug!(dir = %cli.dir.display(), "using checkpoint directory");

    match cli.command {
        Command::List => list(&store, out),
        Command::Status { job: Some(job), json } => status(&store, &job, json, out),
        Command::Status { job: None, json } => status_all(&store, json, out),
        Command::Failed { job } => failed(&store, &job, out),
        Command::Export { job, output } => export(&store, &job, output.as_deref(), out),
    }
}

fn open(store: &FsLedgerStore, job: &str) -> Result<(LedgerHandle, Ledger)> {
    let key = resolve_job_key(job)?;
    let handle = store
        .find_existing(&key)?
        .with_context(|| format!("no ledger for job {key} in {}", store.dir().display()))?;
    let ledger = store
        .load(&handle)
        .with_context(|| format!("failed to read {}", handle.path.display()))?;
    Ok((handle, ledger))
}

fn list(store: &FsLedgerStore, out: &mut impl Write) -> Result<()> {
    let handles = store.list()?;
    if handles.is_empty() {
        writeln!(out, "no ledgers in {}", store.dir().display())?;
    }
    for handle in handles {
        writeln!(out, "{}\t{}", handle.job_key, handle.path.display())?;
    }
    Ok(())
}

fn status(store: &FsLedgerStore, job: &str, json: bool, out: &mut impl Write) -> Result<()> {
    let (handle, ledger) = open(store, job)?;
    let report = LedgerStatusReport::new(&handle, &ledger);
    if json {
        serde_json::to_writer_pretty(&mut *out, &report)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out, "{}", report.summary_line())?;
    writeln!(out, "  ledger:       {}", report.ledger_path.display())?;
    writeln!(out, "  started:      {}", report.started_at.to_rfc3339())?;
    writeln!(out, "  last updated: {}", report.last_updated.to_rfc3339())?;
    if let Some(done) = report.completed_at {
        writeln!(out, "  completed:    {}", done.to_rfc3339())?;
    }
    if let Some(run_id) = report.last_run_id {
        writeln!(out, "  last run:     {run_id}")?;
    }
    Ok(())
}

fn status_all(store: &FsLedgerStore, json: bool, out: &mut impl Write) -> Result<()> {
    let mut reports = Vec::new();
    for handle in store.list()? {
        // One unreadable ledger should not hide the others.
        match store.load(&handle) {
            Ok(ledger) => reports.push(LedgerStatusReport::new(&handle, &ledger)),
            Err(e) => writeln!(out, "{}: {e}", handle.path.display())?,
        }
    }
    if json {
        serde_json::to_writer_pretty(&mut *out, &reports)?;
        writeln!(out)?;
    } else {
        for report in &reports {
            writeln!(out, "{}", report.summary_line())?;
        }
    }
    Ok(())
}

fn failed(store: &FsLedgerStore, job: &str, out: &mut impl Write) -> Result<()> {
    let (_, ledger) = open(store, job)?;
    if ledger.failed.is_empty() {
        writeln!(out, "no failed items")?;
    }
    for f in &ledger.failed {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            f.item_id,
            f.item_name,
            f.failed_at.to_rfc3339(),
            f.error
        )?;
    }
    Ok(())
}

fn export(
    store: &FsLedgerStore,
    job: &str,
    output: Option<&Path>,
    out: &mut impl Write,
) -> Result<()> {
    let (_, ledger) = open(store, job)?;
    let consolidated = consolidate(&ledger.results);
    let json = serde_json::to_string_pretty(&consolidated)?;
    match output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
            writeln!(
                out,
                "wrote {} descriptions ({} duplicates removed) to {}",
                consolidated.total_documents,
                consolidated.duplicates_removed,
                path.display()
            )?;
        }
        None => writeln!(out, "{json}")?,
    }
    Ok(())
}
