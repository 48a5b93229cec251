use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::system_conf;
use hickory_resolver::Resolver;
use thiserror::Error;

use crate::engine::PublishedIpSource;

/// Why a record's presently-published IP could not be determined.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveFailure {
    /// The whole label hierarchy was exhausted without finding an NS record.
    #[error("no authoritative name server found for {0}")]
    AuthorityNotFound(Box<str>),

    /// An authority was found but did not produce an answer: the nameserver
    /// host would not resolve, the query timed out, or the answer carried no
    /// A record.
    #[error("authoritative query for {0} failed: {1}")]
    QueryFailed(Box<str>, Box<str>),
}

/// The individual DNS questions the walk asks. [`SystemProbe`] answers them
/// against the real world; tests script them.
pub trait DnsProbe {
    /// The NS record set published at `zone`, if any.
    fn ns_records(&self, zone: &str) -> Result<Vec<Box<str>>, ProbeError>;

    /// Resolves a nameserver host name to an address, via standard
    /// resolution.
    fn host_address(&self, host: &str) -> Result<IpAddr, ProbeError>;

    /// A-record query for `name`, directed at `server` alone, recursion
    /// disabled.
    fn query_a_at(&self, server: IpAddr, name: &str) -> Result<Box<str>, ProbeError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("no records")]
    NoRecords,

    #[error("{0}")]
    Network(Box<str>),
}

/// Walks up the label hierarchy of `record_name` until a zone publishing an
/// NS record is found, then asks that zone's own nameserver for the A record
/// of the full name. Caching resolvers never get to answer, so their
/// propagation lag cannot mask what the provider actually publishes.
///
/// An NS probe that errors is treated the same as a zone without NS records:
/// the walk keeps shortening. Once an authority has been found, though, any
/// further failure is definite for this record.
pub fn authoritative_ip(probe: &dyn DnsProbe, record_name: &str) -> Result<Box<str>, ResolveFailure> {
    let name = record_name.trim_end_matches('.');
    let labels: Vec<&str> = name.split('.').collect();

    for cut in 0..labels.len() {
        let zone = labels[cut..].join(".");

        let servers = match probe.ns_records(&zone) {
            Ok(servers) => servers,
            Err(ProbeError::NoRecords) => continue,
            Err(ProbeError::Network(reason)) => {
                log::debug!("NS probe for {} failed ({}), shortening", zone, reason);
                continue;
            }
        };

        let Some(server) = servers.into_iter().next() else {
            continue;
        };

        let address = probe
            .host_address(&server)
            .map_err(|e| query_failed(record_name, e))?;

        return probe
            .query_a_at(address, record_name)
            .map_err(|e| query_failed(record_name, e));
    }

    Err(ResolveFailure::AuthorityNotFound(record_name.into()))
}

fn query_failed(name: &str, e: ProbeError) -> ResolveFailure {
    ResolveFailure::QueryFailed(name.into(), e.to_string().into())
}

/// Live probe on top of hickory's blocking resolver. NS probes and
/// nameserver-host resolution go through the system configuration; the
/// pinned A query builds a one-shot resolver around the authority's address.
pub struct SystemProbe {
    system: Resolver,
    timeout: Duration,
}

impl SystemProbe {
    /// Falls back to the library's default resolver configuration when the
    /// system one cannot be read.
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let (config, mut opts) = system_conf::read_system_conf()
            .unwrap_or_else(|_| (ResolverConfig::default(), ResolverOpts::default()));
        opts.timeout = timeout;

        let system = Resolver::new(config, opts)
            .map_err(|e| ProbeError::Network(e.to_string().into()))?;

        Ok(Self { system, timeout })
    }
}

fn classify(e: ResolveError) -> ProbeError {
    match e.kind() {
        ResolveErrorKind::NoRecordsFound { .. } => ProbeError::NoRecords,
        _ => ProbeError::Network(e.to_string().into()),
    }
}

impl DnsProbe for SystemProbe {
    fn ns_records(&self, zone: &str) -> Result<Vec<Box<str>>, ProbeError> {
        // Trailing dot keeps search domains out of the question.
        let fqdn = format!("{}.", zone.trim_end_matches('.'));
        let lookup = self.system.lookup(fqdn.as_str(), RecordType::NS).map_err(classify)?;

        let servers: Vec<Box<str>> = lookup
            .iter()
            .filter_map(|rdata| rdata.as_ns())
            .map(|ns| ns.0.to_utf8().into())
            .collect();

        if servers.is_empty() {
            return Err(ProbeError::NoRecords);
        }

        Ok(servers)
    }

    fn host_address(&self, host: &str) -> Result<IpAddr, ProbeError> {
        let lookup = self.system.lookup_ip(host).map_err(classify)?;
        lookup.iter().next().ok_or(ProbeError::NoRecords)
    }

    fn query_a_at(&self, server: IpAddr, name: &str) -> Result<Box<str>, ProbeError> {
        let group = NameServerConfigGroup::from_ips_clear(&[server], 53, true);
        let config = ResolverConfig::from_parts(None, Vec::new(), group);

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.recursion_desired = false;
        opts.use_hosts_file = false;

        let pinned = Resolver::new(config, opts)
            .map_err(|e| ProbeError::Network(e.to_string().into()))?;

        let fqdn = format!("{}.", name.trim_end_matches('.'));
        let lookup = pinned.ipv4_lookup(fqdn.as_str()).map_err(classify)?;

        let first = lookup.iter().next().ok_or(ProbeError::NoRecords)?;
        Ok(first.to_string().into())
    }
}

/// Live [`PublishedIpSource`] over any probe.
pub struct AuthorityResolver<P> {
    probe: P,
}

impl<P: DnsProbe> AuthorityResolver<P> {
    pub fn new(probe: P) -> Self {
        Self { probe }
    }
}

impl<P: DnsProbe> PublishedIpSource for AuthorityResolver<P> {
    fn published_ip(&self, record_name: &str) -> Result<Box<str>, ResolveFailure> {
        authoritative_ip(&self.probe, record_name)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    use super::*;

    /// Scripted probe: NS answers per zone, one nameserver host, one pinned
    /// answer. Records the zones probed, in order.
    struct Scripted {
        zones: HashMap<Box<str>, Result<Vec<Box<str>>, ProbeError>>,
        host: Result<IpAddr, ProbeError>,
        answer: Result<Box<str>, ProbeError>,
        ns_probes: RefCell<Vec<Box<str>>>,
        pinned_queries: RefCell<Vec<(IpAddr, Box<str>)>>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                zones: HashMap::new(),
                host: Ok(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 53))),
                answer: Ok("198.51.100.1".into()),
                ns_probes: RefCell::new(Vec::new()),
                pinned_queries: RefCell::new(Vec::new()),
            }
        }

        fn with_ns(mut self, zone: &str, servers: &[&str]) -> Self {
            let servers = servers.iter().map(|s| Box::from(*s)).collect();
            self.zones.insert(zone.into(), Ok(servers));
            self
        }

        fn with_ns_error(mut self, zone: &str, error: ProbeError) -> Self {
            self.zones.insert(zone.into(), Err(error));
            self
        }

        fn probed_zones(&self) -> Vec<Box<str>> {
            self.ns_probes.borrow().clone()
        }
    }

    impl DnsProbe for Scripted {
        fn ns_records(&self, zone: &str) -> Result<Vec<Box<str>>, ProbeError> {
            self.ns_probes.borrow_mut().push(zone.into());
            self.zones
                .get(zone)
                .cloned()
                .unwrap_or(Err(ProbeError::NoRecords))
        }

        fn host_address(&self, _host: &str) -> Result<IpAddr, ProbeError> {
            self.host.clone()
        }

        fn query_a_at(&self, server: IpAddr, name: &str) -> Result<Box<str>, ProbeError> {
            self.pinned_queries.borrow_mut().push((server, name.into()));
            self.answer.clone()
        }
    }

    #[test]
    fn walk_tries_suffixes_leftmost_first() {
        let probe = Scripted::new().with_ns("example.com", &["ns1.example.com."]);

        let ip = authoritative_ip(&probe, "a.b.example.com").unwrap();

        assert_eq!(&*ip, "198.51.100.1");
        assert_eq!(
            probe.probed_zones(),
            vec![
                Box::from("a.b.example.com"),
                Box::from("b.example.com"),
                Box::from("example.com"),
            ]
        );
    }

    #[test]
    fn pinned_query_uses_the_original_name() {
        let probe = Scripted::new().with_ns("example.com", &["ns1.example.com."]);

        authoritative_ip(&probe, "a.b.example.com").unwrap();

        let pinned = probe.pinned_queries.borrow();
        assert_eq!(pinned.len(), 1);
        assert_eq!(pinned[0].0, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 53)));
        assert_eq!(&*pinned[0].1, "a.b.example.com");
    }

    #[test]
    fn ns_probe_errors_do_not_stop_the_walk() {
        let probe = Scripted::new()
            .with_ns_error(
                "b.example.com",
                ProbeError::Network("lame delegation".into()),
            )
            .with_ns("example.com", &["ns1.example.com."]);

        let ip = authoritative_ip(&probe, "a.b.example.com").unwrap();

        assert_eq!(&*ip, "198.51.100.1");
        assert_eq!(probe.probed_zones().len(), 3);
    }

    #[test]
    fn exhausting_every_suffix_is_authority_not_found() {
        let probe = Scripted::new();

        let err = authoritative_ip(&probe, "a.b.example.com").unwrap_err();

        assert_eq!(err, ResolveFailure::AuthorityNotFound("a.b.example.com".into()));
        // a.b.example.com, b.example.com, example.com, com
        assert_eq!(probe.probed_zones().len(), 4);
        assert!(probe.pinned_queries.borrow().is_empty());
    }

    #[test]
    fn single_label_name_without_ns_is_authority_not_found() {
        let probe = Scripted::new();

        let err = authoritative_ip(&probe, "localhost").unwrap_err();

        assert_eq!(err, ResolveFailure::AuthorityNotFound("localhost".into()));
        assert_eq!(probe.probed_zones(), vec![Box::from("localhost")]);
    }

    #[test]
    fn failures_after_finding_an_authority_are_definite() {
        let mut probe = Scripted::new().with_ns("example.com", &["ns1.example.com."]);
        probe.host = Err(ProbeError::Network("refused".into()));

        let err = authoritative_ip(&probe, "a.example.com").unwrap_err();

        assert!(matches!(err, ResolveFailure::QueryFailed(_, _)));
    }

    #[test]
    fn empty_answer_from_the_authority_is_definite() {
        let mut probe = Scripted::new().with_ns("example.com", &["ns1.example.com."]);
        probe.answer = Err(ProbeError::NoRecords);

        let err = authoritative_ip(&probe, "a.example.com").unwrap_err();

        assert!(matches!(err, ResolveFailure::QueryFailed(_, _)));
    }

    #[test]
    fn trailing_dot_is_accepted() {
        let probe = Scripted::new().with_ns("example.com", &["ns1.example.com."]);

        let ip = authoritative_ip(&probe, "a.example.com.").unwrap();

        assert_eq!(&*ip, "198.51.100.1");
        assert_eq!(
            probe.probed_zones(),
            vec![Box::from("a.example.com"), Box::from("example.com")]
        );
    }
}
