use crate::asn_db::{AcquireOutcome, DatabaseManager, DatabaseSource, DisabledSource, HttpSource};
use crate::config::Config;
use crate::link_filter::LinkFilter;
use crate::origin::{DenyList, OriginClassifier, OriginVerdict};
use crate::output::{self, RunReport};
use crate::pipeline::{CheckMode, PartitionSet, Pipeline};
use crate::{paths, source};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Run,
  DbStatus,
  DbUpdate,
  Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
  pub command: Command,
  pub mode: Option<CheckMode>,
  pub input: Option<PathBuf>,
  pub dry_run: bool,
}

impl Options {
  pub fn parse(args: &[String]) -> anyhow::Result<Self> {
    let mut opts = Options {
      command: Command::Run,
      mode: None,
      input: None,
      dry_run: false,
    };

    let mut it = args.iter().skip(1);
    while let Some(arg) = it.next() {
      match arg.as_str() {
        "--help" | "-h" => opts.command = Command::Help,
        "--dry-run" => opts.dry_run = true,
        "--mode" => {
          let raw = it
            .next()
            .ok_or_else(|| anyhow::anyhow!("`--mode` expects off|local-db|rate-limited-external"))?;
          let mode = CheckMode::parse(raw).ok_or_else(|| anyhow::anyhow!("unknown mode `{raw}`"))?;
          opts.mode = Some(mode);
        }
        "--input" => {
          let raw = it
            .next()
            .ok_or_else(|| anyhow::anyhow!("`--input` expects a file path"))?;
          opts.input = Some(PathBuf::from(raw));
        }
        "--db" => {
          let sub = it.next().map(|s| s.as_str()).unwrap_or("");
          opts.command = match sub {
            "status" => Command::DbStatus,
            "update" => Command::DbUpdate,
            _ => anyhow::bail!("unknown `--db` subcommand. Expected: status|update"),
          };
        }
        other => anyhow::bail!("unknown argument `{other}` (see --help)"),
      }
    }

    Ok(opts)
  }
}

pub fn run_command(cfg: &Config, base: &Path, opts: &Options) -> anyhow::Result<()> {
  match opts.command {
    Command::Help => {
      print_help();
      Ok(())
    }
    Command::DbStatus => {
      let manager = database_manager(cfg, base, true);
      println!("ASN database: {}", manager.path().display());
      println!("State: {}", manager.evaluate());
      Ok(())
    }
    Command::DbUpdate => {
      let manager = database_manager(cfg, base, opts.dry_run);
      match manager.acquire() {
        AcquireOutcome::AlreadyValid => println!("ASN database already valid; nothing to do."),
        AcquireOutcome::Downloaded { size } => {
          println!("ASN database downloaded ({size} bytes) to {}", manager.path().display())
        }
        AcquireOutcome::Failed { reason } => anyhow::bail!("ASN database update failed: {reason}"),
      }
      Ok(())
    }
    Command::Run => run_sieve(cfg, base, opts),
  }
}

fn run_sieve(cfg: &Config, base: &Path, opts: &Options) -> anyhow::Result<()> {
  let links = match &opts.input {
    Some(path) => source::read_links(path)?,
    None => source::fetch_links(&cfg.source).context("failed to download link list")?,
  };
  println!("Received {} links", links.len());

  let mode = opts.mode.unwrap_or(cfg.origin.mode);
  let pipeline = Pipeline::new(
    LinkFilter::new(&cfg.filter),
    mode,
    Duration::from_millis(cfg.origin.check_delay_ms),
  );

  let mut classifier = OriginClassifier::new(
    database_manager(cfg, base, opts.dry_run),
    DenyList::new(cfg.origin.deny_keywords.as_slice()),
    cfg.database.auto_download && !opts.dry_run,
  );

  if mode.checks_origin() {
    println!("Starting IP check using the ASN database...");
    if !classifier.prepare() {
      tracing::warn!("ASN database unavailable; affected links will be marked suspect");
    }
  }

  let parts = pipeline.run(&links, &mut classifier);

  println!();
  println!("{}", "=".repeat(60));
  println!();

  if opts.dry_run {
    tracing::warn!("DRY-RUN: output files not written");
  } else {
    let out_dir = paths::output_dir(base);
    for saved in output::write_partitions(&out_dir, &parts) {
      match saved.error {
        None => println!("Saved: {} -> {} links", saved.bucket.file_name(), saved.count),
        Some(e) => println!("Error saving {}: {e}", saved.bucket.file_name()),
      }
    }

    if cfg.output.write_report {
      let report = RunReport::new(mode, &parts.stats, classifier.stats());
      if let Err(e) = output::write_report(&paths::report_path(base), &report) {
        tracing::error!(error = ?e, "failed to write run report (continuing)");
      }
    }
  }

  print_summary(&parts, mode, &classifier);
  Ok(())
}

fn database_manager(cfg: &Config, base: &Path, offline: bool) -> DatabaseManager {
  let source: Box<dyn DatabaseSource> = if offline {
    Box::new(DisabledSource)
  } else {
    match HttpSource::from_config(&cfg.database) {
      Ok(s) => Box::new(s),
      Err(e) => {
        tracing::warn!(error = %e, "database source invalid; downloads disabled");
        Box::new(DisabledSource)
      }
    }
  };

  DatabaseManager::new(
    paths::database_path(base, &cfg.database.file_name),
    &cfg.database,
    source,
  )
}

fn print_summary(parts: &PartitionSet, mode: CheckMode, classifier: &OriginClassifier) {
  println!();
  println!("Summary:");
  println!("  - Stage 1 passed: {}", parts.stats.stage1_pass);
  println!("  - Ready to use (clean): {}", parts.stats.final_clean);
  println!("  - Suspicious ISP/datacenter: {}", parts.stats.isp_problem);
  println!("  - Rejected at stage 1: {}", parts.stats.rejected);

  if !mode.checks_origin() {
    return;
  }

  println!("  - No IPv4 host: {}", parts.stats.no_ipv4);
  for verdict in OriginVerdict::ALL {
    let n = parts.stats.verdicts.get(verdict.as_str()).copied().unwrap_or(0);
    if n > 0 {
      println!("  - Verdict {verdict}: {n}");
    }
  }
  let lookups = classifier.stats();
  println!(
    "  - Database reads: {} (cache hits: {})",
    lookups.db_reads, lookups.cache_hits
  );
}

fn print_help() {
  println!(
    r#"sieve-core {}

Classifies VLESS server links into clean / suspect / invalid buckets.

USAGE:
  sieve-core [--mode off|local-db|rate-limited-external] [--input FILE] [--dry-run]
  sieve-core --db status
  sieve-core --db update
  sieve-core --version | --help

Outputs go to output/, the ASN database to data/, logs to logs/.
Set SIEVE_HOME to change the base directory (default: current directory)."#,
    env!("CARGO_PKG_VERSION")
  );
}
