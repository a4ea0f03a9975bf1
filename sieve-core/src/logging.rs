use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_PREFIX: &str = "sieve.log";

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Stderr always; a daily-rolling file under `log_dir` unless `log_dir` is `None`
/// (dry runs must not create files).
pub fn init(log_dir: Option<&Path>, level: &str, retention_days: u64) -> anyhow::Result<()> {
  let (subscriber, guard) = build_subscriber(log_dir, level, retention_days)?;
  if let Some(guard) = guard {
    let _ = FILE_GUARD.set(guard);
  }
  subscriber.init();
  Ok(())
}

/// The returned guard flushes the file writer when dropped; it is `None` when
/// no file layer was built.
fn build_subscriber(
  log_dir: Option<&Path>,
  level: &str,
  retention_days: u64,
) -> anyhow::Result<(impl tracing::Subscriber + Send + Sync + 'static, Option<WorkerGuard>)> {
  let filter = tracing_subscriber::EnvFilter::try_new(level)
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  let (file_layer, guard) = match log_dir {
    Some(dir) => {
      fs::create_dir_all(dir)?;
      cleanup_old_logs(dir, retention_days);

      let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
      let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
      let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_target(true);
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_ansi(false)
    .with_writer(std::io::stderr)
    .with_target(false);

  let subscriber = tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer);

  Ok((subscriber, guard))
}

fn cleanup_old_logs(log_dir: &Path, retention_days: u64) -> usize {
  if retention_days == 0 {
    return 0;
  }

  let cutoff = SystemTime::now()
    .checked_sub(Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60)))
    .unwrap_or(SystemTime::UNIX_EPOCH);

  let Ok(entries) = fs::read_dir(log_dir) else {
    return 0;
  };

  let mut removed = 0;
  for entry in entries.flatten() {
    if !is_sieve_log_file(&entry.path()) {
      continue;
    }

    let modified = match entry.metadata().and_then(|m| m.modified()) {
      Ok(t) => t,
      Err(_) => continue,
    };

    if modified < cutoff && fs::remove_file(entry.path()).is_ok() {
      removed += 1;
    }
  }

  removed
}

fn is_sieve_log_file(path: &Path) -> bool {
  let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
    return false;
  };

  name == LOG_FILE_PREFIX || name.starts_with("sieve.log.")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_own_log_files_are_recognized() {
    assert!(is_sieve_log_file(Path::new("/x/logs/sieve.log")));
    assert!(is_sieve_log_file(Path::new("/x/logs/sieve.log.2026-01-01")));
    assert!(!is_sieve_log_file(Path::new("/x/logs/other.log")));
    assert!(!is_sieve_log_file(Path::new("/x/logs/sieve.logger")));
  }

  #[test]
  fn zero_retention_keeps_everything() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sieve.log.2020-01-01"), "old").unwrap();
    assert_eq!(cleanup_old_logs(dir.path(), 0), 0);
    assert!(dir.path().join("sieve.log.2020-01-01").exists());
  }

  #[test]
  fn fresh_logs_survive_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("sieve.log.2026-10-18"), "today").unwrap();
    fs::write(dir.path().join("notes.txt"), "keep").unwrap();
    assert_eq!(cleanup_old_logs(dir.path(), 14), 0);
    assert!(dir.path().join("notes.txt").exists());
  }

  #[test]
  fn file_subscriber_writes_rolling_log() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("logs");

    let (subscriber, guard) = build_subscriber(Some(&log_dir), "info", 14).unwrap();
    assert!(guard.is_some());
    tracing::subscriber::with_default(subscriber, || {
      tracing::info!("partitions written");
      tracing::debug!("filtered out");
    });
    drop(guard);

    let logged: Vec<String> = fs::read_dir(&log_dir)
      .unwrap()
      .flatten()
      .map(|e| e.path())
      .filter(|p| is_sieve_log_file(p))
      .map(|p| fs::read_to_string(p).unwrap())
      .collect();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("partitions written"));
    assert!(!logged[0].contains("filtered out"));
  }

  #[test]
  fn stderr_only_subscriber_creates_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let before = fs::read_dir(dir.path()).unwrap().count();

    let (subscriber, guard) = build_subscriber(None, "not a filter ===", 14).unwrap();
    assert!(guard.is_none());
    tracing::subscriber::with_default(subscriber, || tracing::warn!("DRY-RUN: output files not written"));

    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), before);
  }
}
