use crate::config::DatabaseConfig;
use crate::error::DbError;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// Remote origin of the reference database. Implementations stream the
/// artifact into `dst` and report how many bytes were written.
pub trait DatabaseSource {
  fn fetch_to(&self, dst: &Path) -> Result<u64, DbError>;
}

pub struct DisabledSource;

impl DatabaseSource for DisabledSource {
  fn fetch_to(&self, _dst: &Path) -> Result<u64, DbError> {
    Err(DbError::Transport("database download is disabled".to_string()))
  }
}

/// `connect_timeout` bounds reaching the server; `transfer_timeout` bounds the
/// whole request so a slow but live body stream can still finish.
pub struct HttpSource {
  url: Url,
  connect_timeout: Duration,
  transfer_timeout: Duration,
}

impl HttpSource {
  pub fn from_config(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
    let url = Url::parse(&cfg.url).map_err(|e| anyhow::anyhow!("invalid database URL {}: {e}", cfg.url))?;
    if cfg.timeout_seconds == 0 {
      anyhow::bail!("database timeout_seconds must be > 0");
    }
    let transfer_seconds = cfg.transfer_timeout_seconds.max(cfg.timeout_seconds);
    Ok(Self {
      url,
      connect_timeout: Duration::from_secs(cfg.timeout_seconds),
      transfer_timeout: Duration::from_secs(transfer_seconds),
    })
  }
}

impl DatabaseSource for HttpSource {
  fn fetch_to(&self, dst: &Path) -> Result<u64, DbError> {
    let client = Client::builder()
      .connect_timeout(self.connect_timeout)
      .timeout(self.transfer_timeout)
      .build()
      .map_err(|e| DbError::Transport(format!("build HTTP client: {e}")))?;

    let mut response = client
      .get(self.url.clone())
      .header(USER_AGENT, format!("sieve/{}", env!("CARGO_PKG_VERSION")))
      .send()
      .map_err(|e| DbError::Transport(format!("GET {}: {e}", safe_url_label(&self.url))))?;

    if !response.status().is_success() {
      return Err(DbError::HttpStatus(response.status().as_u16()));
    }

    let mut file = File::create(dst)?;
    let written = io::copy(&mut response, &mut file)
      .map_err(|e| DbError::Transport(format!("read response body: {e}")))?;
    file.flush()?;
    file.sync_all()?;
    Ok(written)
  }
}

fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  let mut path = url.path().to_string();
  if path.is_empty() {
    path = "/".to_string();
  }
  format!("{host}{path}")
}
