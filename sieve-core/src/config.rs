use crate::paths;
use crate::pipeline::CheckMode;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub source: SourceConfig,
  pub filter: FilterConfig,
  pub origin: OriginConfig,
  pub database: DatabaseConfig,
  pub output: OutputConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
  #[serde(default = "default_source_url")]
  pub url: String,

  #[serde(default = "default_source_timeout_seconds")]
  pub timeout_seconds: u64,
}

impl Default for SourceConfig {
  fn default() -> Self {
    Self {
      url: default_source_url(),
      timeout_seconds: default_source_timeout_seconds(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
  #[serde(default = "default_scheme")]
  pub scheme: String,

  #[serde(default = "default_security")]
  pub security: String,

  #[serde(default = "default_rejected_transports")]
  pub rejected_transports: Vec<String>,
}

impl Default for FilterConfig {
  fn default() -> Self {
    Self {
      scheme: default_scheme(),
      security: default_security(),
      rejected_transports: default_rejected_transports(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
  #[serde(default = "default_mode")]
  pub mode: CheckMode,

  #[serde(default = "default_check_delay_ms")]
  pub check_delay_ms: u64,

  #[serde(default = "default_deny_keywords")]
  pub deny_keywords: Vec<String>,
}

impl Default for OriginConfig {
  fn default() -> Self {
    Self {
      mode: default_mode(),
      check_delay_ms: default_check_delay_ms(),
      deny_keywords: default_deny_keywords(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
  #[serde(default = "default_db_file_name")]
  pub file_name: String,

  #[serde(default = "default_db_url")]
  pub url: String,

  #[serde(default = "default_true")]
  pub auto_download: bool,

  #[serde(default = "default_min_size_bytes")]
  pub min_size_bytes: u64,

  #[serde(default = "default_max_age_days")]
  pub max_age_days: u64,

  /// Connect timeout for the download.
  #[serde(default = "default_db_timeout_seconds")]
  pub timeout_seconds: u64,

  /// Upper bound for the whole transfer, body included.
  #[serde(default = "default_db_transfer_timeout_seconds")]
  pub transfer_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
  fn default() -> Self {
    Self {
      file_name: default_db_file_name(),
      url: default_db_url(),
      auto_download: true,
      min_size_bytes: default_min_size_bytes(),
      max_age_days: default_max_age_days(),
      timeout_seconds: default_db_timeout_seconds(),
      transfer_timeout_seconds: default_db_transfer_timeout_seconds(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
  #[serde(default = "default_true")]
  pub write_report: bool,
}

impl Default for OutputConfig {
  fn default() -> Self {
    Self { write_report: true }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_source_url() -> String {
  "https://raw.githubusercontent.com/x45fh56/tgs/refs/heads/main/Servers/Protocols/Categorized_Servers/1_VLESS_REALITY_TCP.txt".to_string()
}

fn default_source_timeout_seconds() -> u64 {
  15
}

fn default_scheme() -> String {
  "vless".to_string()
}

fn default_security() -> String {
  "reality".to_string()
}

fn default_rejected_transports() -> Vec<String> {
  vec!["ws".to_string()]
}

fn default_mode() -> CheckMode {
  CheckMode::LocalDb
}

fn default_check_delay_ms() -> u64 {
  700
}

fn default_deny_keywords() -> Vec<String> {
  [
    "cloudflare",
    "fastly",
    "akamai",
    "cdn",
    "hetzner",
    "ovh",
    "digitalocean",
    "vultr",
    "linode",
    "contabo",
    "ionos",
    "scaleway",
    "oracle",
    "amazon aws",
    "google cloud",
    "microsoft azure",
  ]
  .iter()
  .map(|s| s.to_string())
  .collect()
}

fn default_db_file_name() -> String {
  "GeoLite2-ASN.mmdb".to_string()
}

fn default_db_url() -> String {
  "https://raw.githubusercontent.com/P3TERX/GeoLite.mmdb/download/GeoLite2-ASN.mmdb".to_string()
}

fn default_min_size_bytes() -> u64 {
  1_500_000
}

fn default_max_age_days() -> u64 {
  30
}

fn default_db_timeout_seconds() -> u64 {
  60
}

fn default_db_transfer_timeout_seconds() -> u64 {
  600
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub source: Option<SourceConfig>,

  #[serde(default)]
  pub filter: Option<FilterConfig>,

  #[serde(default)]
  pub origin: Option<OriginConfig>,

  #[serde(default)]
  pub database: Option<DatabaseConfig>,

  #[serde(default)]
  pub output: Option<OutputConfig>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(s) = self.source {
      cfg.source = s;
    }
    if let Some(f) = self.filter {
      cfg.filter = f;
    }
    if let Some(o) = self.origin {
      cfg.origin = o;
    }
    if let Some(d) = self.database {
      cfg.database = d;
    }
    if let Some(o) = self.output {
      cfg.output = o;
    }
    if let Some(l) = self.logging {
      cfg.logging = l;
    }

    cfg
      .origin
      .deny_keywords
      .retain(|kw| !kw.trim().is_empty());

    if let Some(reason) = validate_database_config(&cfg.database) {
      cfg.database.auto_download = false;
      tracing::warn!(
        reason = %reason,
        "database config invalid; auto download disabled"
      );
    }

    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.source.is_none()
      || self.filter.is_none()
      || self.origin.is_none()
      || self.database.is_none()
      || self.output.is_none()
      || self.logging.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, true)
}

pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Config> {
  load_impl(path, false)
}

/// What a config path held when it was read.
enum OnDisk {
  Absent,
  Current(Config),
  Outdated(Config),
  Unreadable(String),
}

fn read_on_disk(path: &Path) -> anyhow::Result<OnDisk> {
  if !path.exists() {
    return Ok(OnDisk::Absent);
  }

  let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
  Ok(match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) if file.needs_upgrade() => OnDisk::Outdated(file.normalize()),
    Ok(file) => OnDisk::Current(file.normalize()),
    Err(e) => OnDisk::Unreadable(e.to_string()),
  })
}

// Runs before logging is up, so notices go straight to stderr.
fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Config> {
  match (read_on_disk(path)?, allow_writes) {
    (OnDisk::Current(cfg), _) | (OnDisk::Outdated(cfg), false) => Ok(cfg),
    (OnDisk::Absent, false) => Ok(Config::default()),
    (OnDisk::Unreadable(err), false) => {
      eprintln!(
        "sieve: invalid config at {}; using defaults in read-only mode: {err}",
        path.display()
      );
      Ok(Config::default())
    }
    (OnDisk::Absent, true) => {
      let cfg = Config::default();
      save(path, &cfg)?;
      Ok(cfg)
    }
    (OnDisk::Outdated(cfg), true) => {
      let backup = set_aside(path, "bak", true);
      match save(path, &cfg) {
        Ok(()) => eprintln!(
          "sieve: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup_label(backup.as_deref())
        ),
        Err(e) => eprintln!("sieve: could not write upgraded config to {}: {e:#}", path.display()),
      }
      Ok(cfg)
    }
    (OnDisk::Unreadable(err), true) => {
      let backup = set_aside(path, "bad", false);
      let cfg = Config::default();
      save(path, &cfg)?;
      eprintln!(
        "sieve: invalid config at {} (backed up to {}): {err}",
        path.display(),
        backup_label(backup.as_deref())
      );
      Ok(cfg)
    }
  }
}

/// Copies (`keep_original`) or moves the file to `<name>.<tag>-<unix seconds>`
/// beside it. `None` when that failed.
fn set_aside(path: &Path, tag: &str, keep_original: bool) -> Option<PathBuf> {
  let name = path.file_name()?.to_string_lossy().into_owned();
  let backup = path.with_file_name(format!("{name}.{tag}-{}", now_unix_s()));
  let done = if keep_original {
    fs::copy(path, &backup).map(|_| ())
  } else {
    fs::rename(path, &backup)
  };
  done.ok().map(|_| backup)
}

fn backup_label(backup: Option<&Path>) -> String {
  backup
    .map(|p| p.display().to_string())
    .unwrap_or_else(|| "none".to_string())
}

fn save(path: &Path, cfg: &Config) -> anyhow::Result<()> {
  let body = toml::to_string_pretty(&ConfigFile::from(cfg)).context("serialize config")?;
  paths::write_atomic(path, body.as_bytes())
}

impl From<&Config> for ConfigFile {
  fn from(cfg: &Config) -> Self {
    Self {
      source: Some(cfg.source.clone()),
      filter: Some(cfg.filter.clone()),
      origin: Some(cfg.origin.clone()),
      database: Some(cfg.database.clone()),
      output: Some(cfg.output.clone()),
      logging: Some(cfg.logging.clone()),
    }
  }
}

fn validate_database_config(cfg: &DatabaseConfig) -> Option<String> {
  if cfg.min_size_bytes == 0 {
    return Some("min_size_bytes must be > 0".to_string());
  }
  if cfg.timeout_seconds == 0 {
    return Some("timeout_seconds must be > 0".to_string());
  }
  if cfg.transfer_timeout_seconds < cfg.timeout_seconds {
    return Some("transfer_timeout_seconds must be >= timeout_seconds".to_string());
  }
  if cfg.file_name.trim().is_empty() {
    return Some("file_name must not be empty".to_string());
  }

  let Ok(url) = reqwest::Url::parse(&cfg.url) else {
    return Some(format!("invalid database URL: {}", cfg.url));
  };
  if url.scheme() != "https" && url.scheme() != "http" {
    return Some(format!("database URL must use http(s): {}", cfg.url));
  }
  if url.host_str().is_none() {
    return Some(format!("database URL has no host: {}", cfg.url));
  }

  None
}

fn now_unix_s() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}
