use crate::config::FilterConfig;
use std::fmt;
use std::net::Ipv4Addr;

/// A raw server descriptor line, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link(String);

impl Link {
  pub fn new(raw: impl Into<String>) -> Self {
    Self(raw.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  fn scheme(&self) -> Option<&str> {
    self.0.split_once("://").map(|(scheme, _)| scheme)
  }

  fn query_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
    let before_fragment = self.0.split('#').next().unwrap_or("");
    let query = before_fragment.split_once('?').map(|(_, q)| q).unwrap_or("");

    query
      .split('&')
      .filter(|pair| !pair.is_empty())
      .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
  }

  fn query_value(&self, key: &str) -> Option<&str> {
    self
      .query_pairs()
      .find(|(k, _)| k.eq_ignore_ascii_case(key))
      .map(|(_, v)| v)
  }
}

impl fmt::Display for Link {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Dotted-quad host token as it appeared in a link. Octet ranges are not
/// checked here; `to_ipv4` is where out-of-range literals fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ipv4Literal(String);

impl Ipv4Literal {
  pub fn parse(token: &str) -> Option<Self> {
    let octets: Vec<&str> = token.split('.').collect();
    let well_formed = octets.len() == 4
      && octets
        .iter()
        .all(|o| (1..=3).contains(&o.len()) && o.bytes().all(|b| b.is_ascii_digit()));

    well_formed.then(|| Self(token.to_string()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn to_ipv4(&self) -> Option<Ipv4Addr> {
    self.0.parse().ok()
  }
}

impl fmt::Display for Ipv4Literal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone)]
pub struct LinkFilter {
  scheme: String,
  security: String,
  rejected_transports: Vec<String>,
}

impl LinkFilter {
  pub fn new(cfg: &FilterConfig) -> Self {
    Self {
      scheme: cfg.scheme.trim().to_ascii_lowercase(),
      security: cfg.security.trim().to_ascii_lowercase(),
      rejected_transports: cfg
        .rejected_transports
        .iter()
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect(),
    }
  }

  /// Stage 1: protocol, security mode and transport checks. Pure string work.
  pub fn stage1_eligible(&self, link: &Link) -> bool {
    let Some(scheme) = link.scheme() else {
      return false;
    };
    if !scheme.eq_ignore_ascii_case(&self.scheme) {
      return false;
    }

    let security_ok = link
      .query_value("security")
      .map(|v| v.eq_ignore_ascii_case(&self.security))
      .unwrap_or(false);
    if !security_ok {
      return false;
    }

    !link.query_pairs().any(|(k, v)| {
      k.eq_ignore_ascii_case("type")
        && self
          .rejected_transports
          .iter()
          .any(|t| v.eq_ignore_ascii_case(t))
    })
  }
}

/// Host token between the credential separator and the next port/path/query/fragment
/// delimiter, only when it is a bare IPv4 literal.
pub fn extract_ipv4(link: &Link) -> Option<Ipv4Literal> {
  let (_, rest) = link.as_str().split_once("://")?;
  let (userinfo, authority) = rest.split_once('@')?;
  if userinfo.is_empty() {
    return None;
  }

  let host = authority
    .split(|c| matches!(c, ':' | '/' | '?' | '#'))
    .next()
    .unwrap_or("");

  Ipv4Literal::parse(host)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn filter() -> LinkFilter {
    LinkFilter::new(&FilterConfig::default())
  }

  #[test]
  fn reality_tcp_link_is_eligible() {
    let link = Link::new("vless://u@93.184.216.34:443?security=reality");
    assert!(filter().stage1_eligible(&link));
  }

  #[test]
  fn websocket_transport_is_rejected() {
    let link = Link::new("vless://u@1.1.1.1:443?security=reality&type=ws");
    assert!(!filter().stage1_eligible(&link));

    let grpc = Link::new("vless://u@1.1.1.1:443?security=reality&type=grpc");
    assert!(filter().stage1_eligible(&grpc));
  }

  #[test]
  fn scheme_and_keys_are_case_insensitive() {
    let link = Link::new("VLESS://u@example.com:443?Security=REALITY&sni=a.b#tag");
    assert!(filter().stage1_eligible(&link));

    let ws = Link::new("vless://u@example.com:443?security=reality&TYPE=WS");
    assert!(!filter().stage1_eligible(&ws));
  }

  #[test]
  fn wrong_scheme_or_security_is_rejected() {
    let f = filter();
    assert!(!f.stage1_eligible(&Link::new("not-a-link")));
    assert!(!f.stage1_eligible(&Link::new("vmess://u@1.2.3.4:443?security=reality")));
    assert!(!f.stage1_eligible(&Link::new("vless://u@1.2.3.4:443?security=tls")));
    assert!(!f.stage1_eligible(&Link::new("vless://u@1.2.3.4:443")));
    // security only in the fragment does not count
    assert!(!f.stage1_eligible(&Link::new("vless://u@1.2.3.4:443?type=tcp#security=reality")));
  }

  #[test]
  fn query_after_fragment_is_ignored() {
    let f = filter();
    assert!(!f.stage1_eligible(&Link::new("vless://u@1.2.3.4:443#name?security=reality")));
    assert!(f.stage1_eligible(&Link::new("vless://u@1.2.3.4:443?security=reality#name?type=ws")));
  }

  #[test]
  fn stage1_is_stable_across_calls() {
    let f = filter();
    let link = Link::new("vless://u@5.6.7.8:8443?security=reality&flow=xtls-rprx-vision");
    let first = f.stage1_eligible(&link);
    assert_eq!(first, f.stage1_eligible(&link));
    assert!(first);
  }

  #[test]
  fn extracts_bare_ipv4_host() {
    let ip = extract_ipv4(&Link::new("vless://uuid@93.184.216.34:443?security=reality"));
    assert_eq!(ip.as_ref().map(|i| i.as_str()), Some("93.184.216.34"));

    let no_port = extract_ipv4(&Link::new("vless://uuid@10.0.0.1?security=reality"));
    assert_eq!(no_port.as_ref().map(|i| i.as_str()), Some("10.0.0.1"));

    let fragment = extract_ipv4(&Link::new("vless://uuid@10.0.0.2#name"));
    assert_eq!(fragment.as_ref().map(|i| i.as_str()), Some("10.0.0.2"));
  }

  #[test]
  fn hostnames_ipv6_and_malformed_yield_none() {
    assert!(extract_ipv4(&Link::new("vless://u@example.com:443?security=reality")).is_none());
    assert!(extract_ipv4(&Link::new("vless://u@[2001:db8::1]:443?security=reality")).is_none());
    assert!(extract_ipv4(&Link::new("vless://1.2.3.4:443?security=reality")).is_none());
    assert!(extract_ipv4(&Link::new("vless://@1.2.3.4:443")).is_none());
    assert!(extract_ipv4(&Link::new("vless://u@1.2.3:443")).is_none());
    assert!(extract_ipv4(&Link::new("vless://u@1.2.3.4.5:443")).is_none());
    assert!(extract_ipv4(&Link::new("not-a-link")).is_none());
  }

  #[test]
  fn out_of_range_literal_extracts_but_does_not_convert() {
    let ip = extract_ipv4(&Link::new("vless://u@300.1.1.1:443")).unwrap();
    assert_eq!(ip.as_str(), "300.1.1.1");
    assert!(ip.to_ipv4().is_none());
  }
}
