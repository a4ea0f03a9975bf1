use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(home) = std::env::var("SIEVE_HOME") {
    if !home.trim().is_empty() {
      return Ok(PathBuf::from(home));
    }
  }
  Ok(std::env::current_dir()?)
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn data_dir(base: &Path) -> PathBuf {
  base.join("data")
}

pub fn output_dir(base: &Path) -> PathBuf {
  base.join("output")
}

pub fn database_path(base: &Path, file_name: &str) -> PathBuf {
  data_dir(base).join(file_name)
}

pub fn report_path(base: &Path) -> PathBuf {
  output_dir(base).join("run-report.json")
}

/// Writes through a dot-prefixed sibling and renames it over `dst`, creating
/// the parent directory first.
pub fn write_atomic(dst: &Path, bytes: &[u8]) -> anyhow::Result<()> {
  let dir = dst
    .parent()
    .ok_or_else(|| anyhow::anyhow!("destination has no parent directory"))?;
  fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

  let name = dst.file_name().and_then(|s| s.to_str()).unwrap_or("tmp");
  let tmp = dst.with_file_name(format!(".{name}.tmp"));
  fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
  fs::rename(&tmp, dst).with_context(|| format!("rename {} -> {}", tmp.display(), dst.display()))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn atomic_write_creates_parent_and_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let dst = output_dir(dir.path()).join("1-valid_clean.txt");

    write_atomic(&dst, b"first\n").unwrap();
    write_atomic(&dst, b"second\n").unwrap();

    assert_eq!(fs::read_to_string(&dst).unwrap(), "second\n");
    let names: Vec<String> = fs::read_dir(output_dir(dir.path()))
      .unwrap()
      .flatten()
      .map(|e| e.file_name().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, vec!["1-valid_clean.txt".to_string()]);
  }
}
