//! Candidate discovery via naming-scheme fan-out and name resolution
//!
//! Discovery is split into a pure half (naming schemes expanded into an
//! ordered candidate-name list) and an effectful half (resolving each name
//! on the private network). Resolution failures are not errors; they mean
//! no worker occupies that slot.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::lookup_host;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::types::NodeCandidate;

/// One accepted worker naming pattern, e.g. `worker-{N}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingScheme {
    prefix: &'static str,
    separator: &'static str,
}

impl NamingScheme {
    pub const fn new(prefix: &'static str, separator: &'static str) -> Self {
        Self { prefix, separator }
    }

    /// Logical name for the given worker index.
    pub fn name(&self, index: u32) -> String {
        format!("{}{}{}", self.prefix, self.separator, index)
    }
}

/// The fixed set of accepted naming schemes, in fan-out order.
pub fn default_schemes() -> Vec<NamingScheme> {
    vec![
        NamingScheme::new("worker", ""),
        NamingScheme::new("worker", "-"),
        NamingScheme::new("citus-worker", ""),
        NamingScheme::new("citus-worker", "-"),
    ]
}

/// Expand naming schemes into an ordered, deduplicated candidate-name list.
///
/// Order is scheme-major then index-ascending over `[1, max_index]`; a name
/// already produced by an earlier scheme is skipped. Pure function, no
/// network activity.
pub fn candidate_names(schemes: &[NamingScheme], max_index: u32) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for scheme in schemes {
        for index in 1..=max_index {
            let name = scheme.name(index);
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
    }
    names
}

/// Resolves a hostname on the private network, or determines it does not
/// exist. Implementations must be read-only.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> Option<IpAddr>;
}

/// Production resolver combining two independent strategies.
///
/// The primary strategy is the system resolver via `tokio::net::lookup_host`.
/// When that fails, the output of an external `nslookup` invocation is
/// scanned for an address token *regardless of its exit status*: the
/// private-network name service sometimes reports a nominal failure while
/// still printing a usable answer, and treating the status as authoritative
/// would silently drop valid workers.
#[derive(Debug, Clone)]
pub struct DnsResolver {
    lookup_timeout: Duration,
}

impl DnsResolver {
    pub fn new(lookup_timeout: Duration) -> Self {
        Self { lookup_timeout }
    }

    async fn lookup_direct(&self, host: &str, port: u16) -> Option<IpAddr> {
        let lookup = lookup_host((host, port));
        match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(mut addrs)) => addrs.next().map(|a| a.ip()),
            Ok(Err(e)) => {
                trace!(host, error = %e, "direct lookup failed");
                None
            }
            Err(_) => {
                trace!(host, "direct lookup timed out");
                None
            }
        }
    }

    async fn lookup_fallback(&self, host: &str) -> Option<IpAddr> {
        let output = tokio::time::timeout(
            self.lookup_timeout,
            Command::new("nslookup").arg(host).output(),
        )
        .await
        .ok()?
        .ok()?;

        // Exit status deliberately ignored; only the printed answer counts.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let addr = parse_lookup_output(&stdout);
        if addr.is_some() && !output.status.success() {
            debug!(host, "fallback lookup answered despite non-zero status");
        }
        addr
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Option<IpAddr> {
        if let Some(addr) = self.lookup_direct(host, port).await {
            return Some(addr);
        }
        self.lookup_fallback(host).await
    }
}

/// Extract the answer address from `nslookup`-style output.
///
/// The first `Address` line names the DNS server itself (with a `#port`
/// suffix) and is skipped; the answer is the last address token without one.
/// Falls back to scanning every whitespace token when the output does not
/// follow the `Address:` layout.
pub fn parse_lookup_output(output: &str) -> Option<IpAddr> {
    let mut answer = None;
    let mut saw_address_line = false;
    for line in output.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed
            .strip_prefix("Address:")
            .or_else(|| trimmed.strip_prefix("Addresses:"))
        {
            saw_address_line = true;
            let token = rest.trim();
            if token.contains('#') {
                continue; // server line, e.g. "10.0.0.2#53"
            }
            if let Ok(addr) = token.trim_end_matches('.').parse::<IpAddr>() {
                answer = Some(addr);
            }
        }
    }
    // An output structured with `Address:` lines is authoritative: when the
    // only such line was the server's own (skipped above), there is no
    // answer, and scanning the rest would pick up the `Server:` header IP.
    if saw_address_line {
        return answer;
    }

    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("Server"))
        .flat_map(str::split_whitespace)
        .filter(|token| !token.contains('#'))
        .filter_map(|token| token.trim_end_matches('.').parse::<IpAddr>().ok())
        .last()
}

/// Discovers worker candidates by expanding naming schemes and resolving
/// each name against the private network.
pub struct WorkerResolver {
    resolver: Arc<dyn NameResolver>,
    schemes: Vec<NamingScheme>,
    max_index: u32,
    domain_suffix: String,
    worker_port: u16,
}

impl WorkerResolver {
    pub fn new(
        resolver: Arc<dyn NameResolver>,
        schemes: Vec<NamingScheme>,
        max_index: u32,
        domain_suffix: impl Into<String>,
        worker_port: u16,
    ) -> Self {
        Self {
            resolver,
            schemes,
            max_index,
            domain_suffix: domain_suffix.into(),
            worker_port,
        }
    }

    /// Fully-qualified address for a logical name.
    fn fqdn(&self, name: &str) -> String {
        format!("{}.{}", name, self.domain_suffix)
    }

    /// Produce the candidate set for this run.
    ///
    /// Names are resolved concurrently and reassembled in fan-out order, so
    /// output order equals discovery order (scheme-major, index-ascending)
    /// regardless of lookup latency. Cannot fail: an unresolvable name
    /// simply yields no candidate, and an empty result is a legitimate
    /// outcome.
    pub async fn discover(&self) -> Vec<NodeCandidate> {
        let mut lookups: JoinSet<(usize, String, String, Option<IpAddr>)> = JoinSet::new();
        for (slot, name) in candidate_names(&self.schemes, self.max_index)
            .into_iter()
            .enumerate()
        {
            let address = self.fqdn(&name);
            let resolver = Arc::clone(&self.resolver);
            let port = self.worker_port;
            lookups.spawn(async move {
                let ip = resolver.resolve(&address, port).await;
                (slot, name, address, ip)
            });
        }

        let mut resolved = Vec::new();
        while let Some(result) = lookups.join_next().await {
            if let Ok(entry) = result {
                resolved.push(entry);
            }
        }
        resolved.sort_by_key(|(slot, ..)| *slot);

        let mut candidates = Vec::new();
        for (_, name, address, ip) in resolved {
            match ip {
                Some(ip) => {
                    debug!(%name, %address, %ip, "resolved worker candidate");
                    candidates.push(NodeCandidate::new(name, address, self.worker_port));
                }
                None => trace!(%name, %address, "no candidate at this slot"),
            }
        }
        candidates
    }
}
