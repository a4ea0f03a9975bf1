use crate::asn_db::DatabaseManager;
use crate::error::LookupFault;
use crate::link_filter::Ipv4Literal;
use crate::pipeline::OriginCheck;
use maxminddb::{geoip2, MaxMindDBError, Reader};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginVerdict {
  Clean,
  Bad,
  Unknown,
  NoDb,
  Error,
}

impl OriginVerdict {
  pub const ALL: [OriginVerdict; 5] = [
    OriginVerdict::Clean,
    OriginVerdict::Bad,
    OriginVerdict::Unknown,
    OriginVerdict::NoDb,
    OriginVerdict::Error,
  ];

  pub fn is_clean(self) -> bool {
    match self {
      OriginVerdict::Clean => true,
      OriginVerdict::Bad | OriginVerdict::Unknown | OriginVerdict::NoDb | OriginVerdict::Error => {
        false
      }
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      OriginVerdict::Clean => "clean",
      OriginVerdict::Bad => "bad",
      OriginVerdict::Unknown => "unknown",
      OriginVerdict::NoDb => "no_db",
      OriginVerdict::Error => "error",
    }
  }
}

impl fmt::Display for OriginVerdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AsnRecord {
  pub number: Option<u32>,
  pub organization: Option<String>,
}

pub trait AsnDatabase {
  fn lookup(&self, ip: Ipv4Addr) -> Result<AsnRecord, LookupFault>;
}

pub type DatabaseOpener = Box<dyn Fn(&Path) -> Result<Box<dyn AsnDatabase>, LookupFault>>;

/// GeoLite2-ASN style MaxMind database, read fully into memory once.
pub struct MmdbDatabase {
  reader: Reader<Vec<u8>>,
}

impl MmdbDatabase {
  pub fn open(path: &Path) -> Result<Self, LookupFault> {
    let reader = Reader::open_readfile(path).map_err(|e| LookupFault::Open(e.to_string()))?;
    Ok(Self { reader })
  }

  pub fn open_boxed(path: &Path) -> Result<Box<dyn AsnDatabase>, LookupFault> {
    Ok(Box::new(Self::open(path)?))
  }
}

impl AsnDatabase for MmdbDatabase {
  fn lookup(&self, ip: Ipv4Addr) -> Result<AsnRecord, LookupFault> {
    match self.reader.lookup::<geoip2::Asn>(IpAddr::V4(ip)) {
      Ok(asn) => Ok(AsnRecord {
        number: asn.autonomous_system_number,
        organization: asn.autonomous_system_organization.map(str::to_string),
      }),
      Err(MaxMindDBError::AddressNotFoundError(_)) => Err(LookupFault::NotFound),
      Err(e) => Err(LookupFault::Corrupt(e.to_string())),
    }
  }
}

/// Case-insensitive substrings that mark an organization as a CDN or generic hoster.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
  keywords: Vec<String>,
}

impl DenyList {
  pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
    Self {
      keywords: keywords
        .iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect(),
    }
  }

  pub fn matches(&self, record: &AsnRecord) -> bool {
    let org = record
      .organization
      .as_deref()
      .unwrap_or("")
      .to_lowercase();
    let number = record.number.map(|n| n.to_string()).unwrap_or_default();

    self
      .keywords
      .iter()
      .any(|kw| org.contains(kw.as_str()) || number.contains(kw.as_str()))
  }
}

/// Maps a raw lookup result to a verdict. Anything that is not a clean
/// organization match is not `Clean`.
pub fn verdict_for(result: &Result<AsnRecord, LookupFault>, deny: &DenyList) -> OriginVerdict {
  match result {
    Ok(record) if deny.matches(record) => OriginVerdict::Bad,
    Ok(_) => OriginVerdict::Clean,
    Err(LookupFault::NotFound) => OriginVerdict::Unknown,
    Err(LookupFault::InvalidAddress(_) | LookupFault::Corrupt(_) | LookupFault::Open(_)) => {
      OriginVerdict::Error
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
  pub db_reads: u64,
  pub cache_hits: u64,
}

/// Per-run classifier. The address cache is write-once: the first verdict
/// computed for an address is returned for the rest of the run.
pub struct OriginClassifier {
  manager: DatabaseManager,
  opener: DatabaseOpener,
  deny: DenyList,
  auto_acquire: bool,
  db: Option<Box<dyn AsnDatabase>>,
  cache: HashMap<Ipv4Literal, OriginVerdict>,
  stats: LookupStats,
}

impl OriginClassifier {
  pub fn new(manager: DatabaseManager, deny: DenyList, auto_acquire: bool) -> Self {
    Self::with_opener(manager, deny, auto_acquire, Box::new(MmdbDatabase::open_boxed))
  }

  pub fn with_opener(
    manager: DatabaseManager,
    deny: DenyList,
    auto_acquire: bool,
    opener: DatabaseOpener,
  ) -> Self {
    Self {
      manager,
      opener,
      deny,
      auto_acquire,
      db: None,
      cache: HashMap::new(),
      stats: LookupStats::default(),
    }
  }

  pub fn manager(&self) -> &DatabaseManager {
    &self.manager
  }

  pub fn stats(&self) -> LookupStats {
    self.stats
  }

  /// Acquires the database up front so no download happens mid-run.
  pub fn prepare(&self) -> bool {
    if !self.auto_acquire {
      let usable = self.manager.evaluate().is_usable();
      if !usable {
        tracing::warn!(
          path = %self.manager.path().display(),
          "ASN database unavailable and auto download disabled"
        );
      }
      return usable;
    }
    self.manager.acquire().is_success()
  }

  pub fn classify(&mut self, ip: &Ipv4Literal) -> OriginVerdict {
    if let Some(verdict) = self.cache.get(ip) {
      self.stats.cache_hits += 1;
      return *verdict;
    }

    let verdict = self.compute(ip);
    self.cache.insert(ip.clone(), verdict);
    verdict
  }

  fn compute(&mut self, ip: &Ipv4Literal) -> OriginVerdict {
    if let Err(verdict) = self.ensure_open() {
      return verdict;
    }
    let Some(db) = self.db.as_ref() else {
      return OriginVerdict::Error;
    };

    let result = match ip.to_ipv4() {
      Some(addr) => {
        self.stats.db_reads += 1;
        db.lookup(addr)
      }
      None => Err(LookupFault::InvalidAddress(ip.to_string())),
    };

    if let Err(fault) = &result {
      if *fault != LookupFault::NotFound {
        tracing::warn!(ip = %ip, error = %fault, "ASN lookup failed");
      }
    }

    verdict_for(&result, &self.deny)
  }

  fn ensure_open(&mut self) -> Result<(), OriginVerdict> {
    if self.db.is_some() {
      return Ok(());
    }

    if !self.manager.evaluate().is_usable() {
      if !self.auto_acquire {
        return Err(OriginVerdict::NoDb);
      }
      if !self.manager.acquire().is_success() {
        return Err(OriginVerdict::Error);
      }
    }

    match (self.opener)(self.manager.path()) {
      Ok(db) => {
        self.db = Some(db);
        Ok(())
      }
      Err(e) => {
        tracing::warn!(
          path = %self.manager.path().display(),
          error = %e,
          "cannot open ASN database"
        );
        Err(OriginVerdict::Error)
      }
    }
  }
}

impl OriginCheck for OriginClassifier {
  fn check(&mut self, ip: &Ipv4Literal) -> OriginVerdict {
    self.classify(ip)
  }
}
