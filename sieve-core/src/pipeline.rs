use crate::link_filter::{extract_ipv4, Ipv4Literal, Link, LinkFilter};
use crate::origin::OriginVerdict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckMode {
  Off,
  #[serde(alias = "geo")]
  LocalDb,
  #[serde(alias = "api")]
  RateLimitedExternal,
}

impl CheckMode {
  pub fn parse(raw: &str) -> Option<Self> {
    match raw.trim().to_ascii_lowercase().as_str() {
      "off" | "none" => Some(Self::Off),
      "local-db" | "geo" => Some(Self::LocalDb),
      "rate-limited-external" | "api" => Some(Self::RateLimitedExternal),
      _ => None,
    }
  }

  pub fn checks_origin(self) -> bool {
    match self {
      CheckMode::Off => false,
      CheckMode::LocalDb | CheckMode::RateLimitedExternal => true,
    }
  }
}

/// Source of origin verdicts for stage 2.
pub trait OriginCheck {
  fn check(&mut self, ip: &Ipv4Literal) -> OriginVerdict;
}

/// Four disjoint outputs. `stage1_pass` overlaps `final_clean` and
/// `isp_problem`; the other three cover the input exactly once.
#[derive(Debug, Clone, Default)]
pub struct PartitionSet {
  pub stage1_pass: Vec<Link>,
  pub final_clean: Vec<Link>,
  pub isp_problem: Vec<Link>,
  pub rejected: Vec<Link>,
  pub stats: RunStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
  pub input: usize,
  pub stage1_pass: usize,
  pub final_clean: usize,
  pub isp_problem: usize,
  pub rejected: usize,
  pub no_ipv4: usize,
  pub origin_checked: bool,
  pub verdicts: BTreeMap<String, usize>,
}

pub struct Pipeline {
  filter: LinkFilter,
  mode: CheckMode,
  check_delay: Duration,
}

impl Pipeline {
  pub fn new(filter: LinkFilter, mode: CheckMode, check_delay: Duration) -> Self {
    Self {
      filter,
      mode,
      check_delay,
    }
  }

  pub fn mode(&self) -> CheckMode {
    self.mode
  }

  pub fn run<C: OriginCheck>(&self, links: &[Link], origin: &mut C) -> PartitionSet {
    let mut out = PartitionSet::default();

    for link in links {
      if self.filter.stage1_eligible(link) {
        out.stage1_pass.push(link.clone());
      } else {
        out.rejected.push(link.clone());
      }
    }
    tracing::info!(passed = out.stage1_pass.len(), "stage 1 (reality, no ws) complete");

    if self.mode.checks_origin() {
      self.stage2(origin, &mut out);
    } else {
      tracing::info!("origin checking disabled; only stage 1 applied");
      out.final_clean = out.stage1_pass.clone();
    }

    out.stats.input = links.len();
    out.stats.stage1_pass = out.stage1_pass.len();
    out.stats.final_clean = out.final_clean.len();
    out.stats.isp_problem = out.isp_problem.len();
    out.stats.rejected = out.rejected.len();
    out.stats.origin_checked = self.mode.checks_origin();
    out
  }

  fn stage2<C: OriginCheck>(&self, origin: &mut C, out: &mut PartitionSet) {
    let rate_limited = self.mode == CheckMode::RateLimitedExternal && !self.check_delay.is_zero();

    for link in &out.stage1_pass {
      let Some(ip) = extract_ipv4(link) else {
        tracing::debug!(link = %link, "no IPv4 host; routed to suspect bucket");
        out.stats.no_ipv4 += 1;
        out.isp_problem.push(link.clone());
        continue;
      };

      let verdict = origin.check(&ip);
      *out
        .stats
        .verdicts
        .entry(verdict.as_str().to_string())
        .or_default() += 1;

      if verdict.is_clean() {
        tracing::info!(ip = %ip, "OK");
        out.final_clean.push(link.clone());
      } else {
        tracing::info!(ip = %ip, verdict = %verdict, "suspect");
        out.isp_problem.push(link.clone());
      }

      if rate_limited {
        std::thread::sleep(self.check_delay);
      }
    }
  }
}
