use crate::config::DatabaseConfig;
use crate::error::DbError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub mod fetch;

pub use fetch::{DatabaseSource, DisabledSource, HttpSource};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// State of the local reference database, derived from filesystem metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
  Missing,
  Corrupt { size: u64 },
  Stale { size: u64, age_days: u64 },
  Fresh { size: u64, age_days: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbAction {
  Acquire,
  AdvisoryOnly,
  NoOp,
}

impl DbState {
  /// Staleness never forces a download; the old file stays in use.
  pub fn action(&self) -> DbAction {
    match self {
      DbState::Missing | DbState::Corrupt { .. } => DbAction::Acquire,
      DbState::Stale { .. } => DbAction::AdvisoryOnly,
      DbState::Fresh { .. } => DbAction::NoOp,
    }
  }

  pub fn is_usable(&self) -> bool {
    matches!(self, DbState::Stale { .. } | DbState::Fresh { .. })
  }
}

impl fmt::Display for DbState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DbState::Missing => write!(f, "missing"),
      DbState::Corrupt { size } => write!(f, "corrupt ({size} bytes)"),
      DbState::Stale { size, age_days } => {
        write!(f, "stale ({age_days} days old, {size} bytes; manual update recommended)")
      }
      DbState::Fresh { size, age_days } => write!(f, "ok ({age_days} days old, {size} bytes)"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
  AlreadyValid,
  Downloaded { size: u64 },
  Failed { reason: String },
}

impl AcquireOutcome {
  pub fn is_success(&self) -> bool {
    match self {
      AcquireOutcome::AlreadyValid | AcquireOutcome::Downloaded { .. } => true,
      AcquireOutcome::Failed { .. } => false,
    }
  }
}

pub struct DatabaseManager {
  path: PathBuf,
  min_size_bytes: u64,
  max_age: Duration,
  source: Box<dyn DatabaseSource>,
}

impl DatabaseManager {
  pub fn new(path: PathBuf, cfg: &DatabaseConfig, source: Box<dyn DatabaseSource>) -> Self {
    Self {
      path,
      min_size_bytes: cfg.min_size_bytes,
      max_age: Duration::from_secs(cfg.max_age_days.saturating_mul(SECS_PER_DAY)),
      source,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn evaluate(&self) -> DbState {
    self.evaluate_at(SystemTime::now())
  }

  pub fn evaluate_at(&self, now: SystemTime) -> DbState {
    let Ok(md) = fs::metadata(&self.path) else {
      return DbState::Missing;
    };
    if !md.is_file() {
      return DbState::Missing;
    }

    let size = md.len();
    if size < self.min_size_bytes {
      return DbState::Corrupt { size };
    }

    let age = md
      .modified()
      .ok()
      .and_then(|m| now.duration_since(m).ok())
      .unwrap_or_default();
    let age_days = age.as_secs() / SECS_PER_DAY;

    if age > self.max_age {
      DbState::Stale { size, age_days }
    } else {
      DbState::Fresh { size, age_days }
    }
  }

  pub fn needs_acquisition(&self) -> bool {
    let state = self.evaluate();
    match state {
      DbState::Missing => {
        tracing::info!(path = %self.path.display(), "ASN database not found");
      }
      DbState::Corrupt { size } => {
        tracing::warn!(
          path = %self.path.display(),
          size,
          min_size = self.min_size_bytes,
          "existing ASN database too small; will re-download"
        );
      }
      DbState::Stale { size, age_days } => {
        tracing::warn!(
          path = %self.path.display(),
          size,
          age_days,
          "ASN database is old; manual update recommended"
        );
      }
      DbState::Fresh { size, age_days } => {
        tracing::info!(path = %self.path.display(), size, age_days, "ASN database found");
      }
    }

    state.action() == DbAction::Acquire
  }

  /// Downloads the database when it is missing or corrupt. Never returns an
  /// error: every fault is logged and reported as `AcquireOutcome::Failed`.
  pub fn acquire(&self) -> AcquireOutcome {
    if !self.needs_acquisition() {
      return AcquireOutcome::AlreadyValid;
    }

    tracing::info!(path = %self.path.display(), "downloading ASN database");
    match self.download() {
      Ok(size) => {
        tracing::info!(path = %self.path.display(), size, "ASN database download successful");
        AcquireOutcome::Downloaded { size }
      }
      Err(e) => {
        tracing::warn!(path = %self.path.display(), error = %e, "ASN database download failed");
        AcquireOutcome::Failed {
          reason: e.to_string(),
        }
      }
    }
  }

  fn download(&self) -> Result<u64, DbError> {
    if let Some(dir) = self.path.parent() {
      fs::create_dir_all(dir)?;
    }

    let tmp = tmp_path(&self.path);
    let _ = fs::remove_file(&tmp);

    let result = self.fetch_and_validate(&tmp);
    if result.is_err() {
      let _ = fs::remove_file(&tmp);
      // An undersized file at the target is never worth keeping.
      if let DbState::Corrupt { .. } = self.evaluate() {
        let _ = fs::remove_file(&self.path);
      }
    }
    result
  }

  fn fetch_and_validate(&self, tmp: &Path) -> Result<u64, DbError> {
    self.source.fetch_to(tmp)?;

    let size = fs::metadata(tmp)?.len();
    if size < self.min_size_bytes {
      return Err(DbError::Undersized {
        size,
        min: self.min_size_bytes,
      });
    }

    fs::rename(tmp, &self.path)?;
    Ok(size)
  }
}

fn tmp_path(dst: &Path) -> PathBuf {
  let name = dst.file_name().and_then(|s| s.to_str()).unwrap_or("asn-db");
  dst.with_file_name(format!(".{name}.download"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;

  const MIN: u64 = 64;

  struct FakeSource {
    bytes: usize,
    fail: bool,
    calls: Cell<u32>,
  }

  impl FakeSource {
    fn ok(bytes: usize) -> Self {
      Self {
        bytes,
        fail: false,
        calls: Cell::new(0),
      }
    }

    fn failing() -> Self {
      Self {
        bytes: 10,
        fail: true,
        calls: Cell::new(0),
      }
    }
  }

  impl DatabaseSource for std::rc::Rc<FakeSource> {
    fn fetch_to(&self, dst: &Path) -> Result<u64, DbError> {
      self.calls.set(self.calls.get() + 1);
      fs::write(dst, vec![7u8; self.bytes])?;
      if self.fail {
        return Err(DbError::Transport("connection reset".to_string()));
      }
      Ok(self.bytes as u64)
    }
  }

  fn cfg() -> DatabaseConfig {
    DatabaseConfig {
      min_size_bytes: MIN,
      max_age_days: 30,
      ..DatabaseConfig::default()
    }
  }

  fn manager(dir: &Path, source: std::rc::Rc<FakeSource>) -> DatabaseManager {
    DatabaseManager::new(dir.join("data").join("asn.mmdb"), &cfg(), Box::new(source))
  }

  #[test]
  fn missing_database_is_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    let src = std::rc::Rc::new(FakeSource::ok(128));
    let mgr = manager(dir.path(), src.clone());

    assert_eq!(mgr.evaluate(), DbState::Missing);
    assert!(mgr.needs_acquisition());
    assert_eq!(mgr.acquire(), AcquireOutcome::Downloaded { size: 128 });
    assert!(matches!(mgr.evaluate(), DbState::Fresh { size: 128, .. }));
    assert!(!tmp_path(mgr.path()).exists());
  }

  #[test]
  fn valid_database_performs_no_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let src = std::rc::Rc::new(FakeSource::ok(128));
    let mgr = manager(dir.path(), src.clone());

    assert!(mgr.acquire().is_success());
    assert_eq!(mgr.acquire(), AcquireOutcome::AlreadyValid);
    assert_eq!(mgr.acquire(), AcquireOutcome::AlreadyValid);
    assert_eq!(src.calls.get(), 1);
  }

  #[test]
  fn undersized_file_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let src = std::rc::Rc::new(FakeSource::ok(256));
    let mgr = manager(dir.path(), src.clone());
    fs::create_dir_all(mgr.path().parent().unwrap()).unwrap();
    fs::write(mgr.path(), b"tiny").unwrap();

    assert_eq!(mgr.evaluate(), DbState::Corrupt { size: 4 });
    assert!(mgr.needs_acquisition());
    assert!(mgr.acquire().is_success());
    assert!(fs::metadata(mgr.path()).unwrap().len() >= MIN);
  }

  #[test]
  fn undersized_download_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let src = std::rc::Rc::new(FakeSource::ok(10));
    let mgr = manager(dir.path(), src.clone());

    let out = mgr.acquire();
    assert!(!out.is_success());
    assert!(!mgr.path().exists());
    assert!(!tmp_path(mgr.path()).exists());
  }

  #[test]
  fn transport_failure_cleans_up_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let src = std::rc::Rc::new(FakeSource::failing());
    let mgr = manager(dir.path(), src.clone());
    fs::create_dir_all(mgr.path().parent().unwrap()).unwrap();
    fs::write(mgr.path(), b"tiny").unwrap();

    match mgr.acquire() {
      AcquireOutcome::Failed { reason } => assert!(reason.contains("connection reset")),
      other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!mgr.path().exists());
    assert!(!tmp_path(mgr.path()).exists());
  }

  #[test]
  fn stale_database_is_advisory_only() {
    let dir = tempfile::tempdir().unwrap();
    let src = std::rc::Rc::new(FakeSource::ok(128));
    let mgr = manager(dir.path(), src.clone());
    assert!(mgr.acquire().is_success());

    let later = SystemTime::now() + Duration::from_secs(45 * SECS_PER_DAY);
    let state = mgr.evaluate_at(later);
    assert!(matches!(state, DbState::Stale { size: 128, age_days } if age_days >= 44));
    assert_eq!(state.action(), DbAction::AdvisoryOnly);
    assert!(state.is_usable());
  }

  #[test]
  fn directory_at_path_counts_as_missing() {
    let dir = tempfile::tempdir().unwrap();
    let src = std::rc::Rc::new(FakeSource::ok(128));
    let mgr = manager(dir.path(), src);
    fs::create_dir_all(mgr.path()).unwrap();
    assert_eq!(mgr.evaluate(), DbState::Missing);
  }
}
