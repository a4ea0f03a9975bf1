use crate::link_filter::Link;
use crate::origin::LookupStats;
use crate::paths;
use crate::pipeline::{CheckMode, PartitionSet, RunStats};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Output buckets, numbered so file browsers sort them by usefulness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
  FinalClean,
  Stage1Pass,
  IspProblem,
  Rejected,
}

impl Bucket {
  pub const ALL: [Bucket; 4] = [
    Bucket::Stage1Pass,
    Bucket::FinalClean,
    Bucket::IspProblem,
    Bucket::Rejected,
  ];

  pub fn file_name(self) -> &'static str {
    match self {
      Bucket::FinalClean => "1-valid_clean.txt",
      Bucket::Stage1Pass => "2-reality_ok.txt",
      Bucket::IspProblem => "3-isp_suspect.txt",
      Bucket::Rejected => "4-invalid.txt",
    }
  }

  fn links(self, parts: &PartitionSet) -> &[Link] {
    match self {
      Bucket::FinalClean => &parts.final_clean,
      Bucket::Stage1Pass => &parts.stage1_pass,
      Bucket::IspProblem => &parts.isp_problem,
      Bucket::Rejected => &parts.rejected,
    }
  }
}

#[derive(Debug, Clone)]
pub struct SaveResult {
  pub bucket: Bucket,
  pub path: PathBuf,
  pub count: usize,
  pub error: Option<String>,
}

/// Writes one file per bucket. Failures are reported per file and never
/// affect the partitions themselves.
pub fn write_partitions(dir: &Path, parts: &PartitionSet) -> Vec<SaveResult> {
  Bucket::ALL
    .iter()
    .map(|&bucket| {
      let path = dir.join(bucket.file_name());
      let links = bucket.links(parts);
      let error = write_links(&path, links).err().map(|e| format!("{e:#}"));

      match &error {
        None => tracing::info!(file = bucket.file_name(), count = links.len(), "saved"),
        Some(e) => tracing::error!(file = bucket.file_name(), error = %e, "failed to save"),
      }

      SaveResult {
        bucket,
        path,
        count: links.len(),
        error,
      }
    })
    .collect()
}

fn write_links(path: &Path, links: &[Link]) -> anyhow::Result<()> {
  let mut contents = String::new();
  for link in links {
    contents.push_str(link.as_str());
    contents.push('\n');
  }
  paths::write_atomic(path, contents.as_bytes())
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
  pub run_id: String,
  pub created_at_unix_s: u64,
  pub mode: CheckMode,
  pub stats: RunStats,
  pub db_reads: u64,
  pub cache_hits: u64,
}

impl RunReport {
  pub fn new(mode: CheckMode, stats: &RunStats, lookups: LookupStats) -> Self {
    Self {
      run_id: uuid::Uuid::new_v4().to_string(),
      created_at_unix_s: now_unix_s(),
      mode,
      stats: stats.clone(),
      db_reads: lookups.db_reads,
      cache_hits: lookups.cache_hits,
    }
  }
}

pub fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
  let bytes = serde_json::to_vec_pretty(report).context("serialize run report")?;
  paths::write_atomic(path, &bytes)
}

fn now_unix_s() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;

  fn parts() -> PartitionSet {
    let a = Link::new("vless://a@1.2.3.4:443?security=reality");
    let b = Link::new("vless://b@5.6.7.8:443?security=reality");
    PartitionSet {
      stage1_pass: vec![a.clone(), b.clone()],
      final_clean: vec![a],
      isp_problem: vec![b],
      rejected: vec![Link::new("junk")],
      stats: RunStats::default(),
    }
  }

  #[test]
  fn writes_one_link_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let results = write_partitions(dir.path(), &parts());

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.error.is_none()));

    let stage1 = fs::read_to_string(dir.path().join("2-reality_ok.txt")).unwrap();
    assert_eq!(
      stage1,
      "vless://a@1.2.3.4:443?security=reality\nvless://b@5.6.7.8:443?security=reality\n"
    );
    let rejected = fs::read_to_string(dir.path().join("4-invalid.txt")).unwrap();
    assert_eq!(rejected, "junk\n");
  }

  #[test]
  fn empty_bucket_writes_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = parts();
    p.isp_problem.clear();
    write_partitions(dir.path(), &p);
    assert_eq!(fs::read_to_string(dir.path().join("3-isp_suspect.txt")).unwrap(), "");
  }

  #[test]
  fn sink_failure_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("out");
    fs::write(&blocker, "not a directory").unwrap();

    let p = parts();
    let results = write_partitions(&blocker, &p);
    assert!(results.iter().all(|r| r.error.is_some()));
    assert_eq!(p.final_clean.len(), 1);
  }

  #[test]
  fn report_is_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run-report.json");
    let stats = RunStats {
      input: 3,
      rejected: 2,
      ..RunStats::default()
    };
    let report = RunReport::new(CheckMode::Off, &stats, LookupStats::default());
    write_report(&path, &report).unwrap();

    let v: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(v["mode"], "off");
    assert_eq!(v["stats"]["input"], 3);
    assert_eq!(v["run_id"].as_str().map(str::len), Some(36));
  }
}
