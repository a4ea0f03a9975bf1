use crate::config::SourceConfig;
use crate::link_filter::Link;
use anyhow::Context;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub fn fetch_links(cfg: &SourceConfig) -> anyhow::Result<Vec<Link>> {
  if cfg.timeout_seconds == 0 {
    anyhow::bail!("source timeout_seconds must be > 0");
  }

  let client = Client::builder()
    .timeout(Duration::from_secs(cfg.timeout_seconds))
    .build()
    .context("build HTTP client")?;

  let response = client
    .get(&cfg.url)
    .header(USER_AGENT, format!("sieve/{}", env!("CARGO_PKG_VERSION")))
    .send()
    .with_context(|| format!("GET {}", cfg.url))?;

  if !response.status().is_success() {
    anyhow::bail!("unexpected HTTP status {} for link list", response.status().as_u16());
  }

  let body = response.text().context("read link list body")?;
  Ok(parse_lines(&body))
}

pub fn read_links(path: &Path) -> anyhow::Result<Vec<Link>> {
  let body = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
  Ok(parse_lines(&body))
}

/// Trimmed, non-empty lines that are not `#` comments, in input order.
pub fn parse_lines(body: &str) -> Vec<Link> {
  body
    .lines()
    .map(str::trim)
    .filter(|l| !l.is_empty() && !l.starts_with('#'))
    .map(Link::new)
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn blank_and_comment_lines_are_dropped() {
    let body = "# header\n\n  vless://a@1.2.3.4:443?security=reality  \r\n#vless://skip\nnot-a-link\n";
    let links = parse_lines(body);
    assert_eq!(
      links,
      vec![
        Link::new("vless://a@1.2.3.4:443?security=reality"),
        Link::new("not-a-link"),
      ]
    );
  }

  #[test]
  fn reads_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("links.txt");
    fs::write(&path, "vless://a@1.2.3.4:443\n# c\nvless://b@5.6.7.8:443\n").unwrap();
    assert_eq!(read_links(&path).unwrap().len(), 2);
    assert!(read_links(&dir.path().join("missing.txt")).is_err());
  }
}
