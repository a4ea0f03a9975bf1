use sieve_core::asn_db::{DatabaseManager, DisabledSource};
use sieve_core::config::{self, Config};
use sieve_core::link_filter::{extract_ipv4, Ipv4Literal, Link, LinkFilter};
use sieve_core::origin::{verdict_for, AsnDatabase, AsnRecord, DenyList, MmdbDatabase, OriginVerdict};
use sieve_core::paths;

/// One argument resolved to the address that will be looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  Address(Ipv4Literal),
  Link {
    stage1: bool,
    ip: Option<Ipv4Literal>,
  },
  Invalid,
}

pub fn resolve_target(filter: &LinkFilter, arg: &str) -> Target {
  if arg.contains("://") {
    let link = Link::new(arg);
    return Target::Link {
      stage1: filter.stage1_eligible(&link),
      ip: extract_ipv4(&link),
    };
  }
  match Ipv4Literal::parse(arg.trim()) {
    Some(ip) => Target::Address(ip),
    None => Target::Invalid,
  }
}

pub fn format_line(ip: &Ipv4Literal, verdict: OriginVerdict, record: Option<&AsnRecord>) -> String {
  let asn = record
    .and_then(|r| r.number)
    .map(|n| format!("AS{n}"))
    .unwrap_or_else(|| "-".to_string());
  let org = record
    .and_then(|r| r.organization.as_deref())
    .unwrap_or("-");
  format!("{ip}\t{verdict}\t{asn}\t{org}")
}

pub fn run(targets: &[String]) -> anyhow::Result<()> {
  if targets.is_empty() {
    anyhow::bail!("usage: sieve-probe <ip-or-link>...");
  }

  tracing_subscriber::fmt()
    .with_ansi(false)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  let base = paths::base_dir()?;
  let cfg: Config = config::load_or_default_readonly(&paths::config_path(&base))?;
  let filter = LinkFilter::new(&cfg.filter);
  let deny = DenyList::new(cfg.origin.deny_keywords.as_slice());

  let manager = DatabaseManager::new(
    paths::database_path(&base, &cfg.database.file_name),
    &cfg.database,
    Box::new(DisabledSource),
  );
  let state = manager.evaluate();
  let db = if state.is_usable() {
    match MmdbDatabase::open(manager.path()) {
      Ok(db) => Some(db),
      Err(e) => {
        tracing::warn!(error = %e, "cannot open ASN database");
        None
      }
    }
  } else {
    tracing::warn!(path = %manager.path().display(), state = %state, "ASN database not usable");
    None
  };

  for arg in targets {
    let ip = match resolve_target(&filter, arg) {
      Target::Address(ip) => ip,
      Target::Link { stage1, ip } => {
        println!("{arg}\tstage1={}", if stage1 { "pass" } else { "reject" });
        match ip {
          Some(ip) => ip,
          None => {
            println!("-\tno IPv4 host");
            continue;
          }
        }
      }
      Target::Invalid => {
        println!("{arg}\tnot an IPv4 address or link");
        continue;
      }
    };

    let (verdict, record) = match (&db, ip.to_ipv4()) {
      (None, _) if state.is_usable() => (OriginVerdict::Error, None),
      (None, _) => (OriginVerdict::NoDb, None),
      (Some(db), Some(addr)) => {
        let result = db.lookup(addr);
        (verdict_for(&result, &deny), result.ok())
      }
      (Some(_), None) => (OriginVerdict::Error, None),
    };
    println!("{}", format_line(&ip, verdict, record.as_ref()));
  }

  Ok(())
}
