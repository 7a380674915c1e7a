//! DNS resolution for `/dnsaddr/` multiaddrs.
//!
//! `/dnsaddr/<domain>` is resolved by reading every `dnsaddr=<multiaddr>` TXT
//! record at `_dnsaddr.<domain>`. Records may themselves be `/dnsaddr`
//! addresses, so resolution recurses (bounded, with loop detection). When the
//! input ends in `/p2p/<id>`, only records for that same peer are kept.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use peerscope_identity::multiaddr::Protocol;
use peerscope_identity::{Multiaddr, PeerId, split_p2p};
use tracing::{debug, warn};

const MAX_DNS_RECURSION_DEPTH: usize = 10;
const TXT_PREFIX: &str = "dnsaddr=";

/// Errors from dnsaddr resolution.
#[derive(Debug, thiserror::Error)]
pub enum DnsaddrResolveError {
    #[error("DNS lookup failed: {0}")]
    DnsLookup(String),

    #[error("maximum DNS recursion depth exceeded")]
    MaxRecursionDepth,
}

/// Source of TXT records.
#[async_trait]
pub trait TxtLookup: Send + Sync + 'static {
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsaddrResolveError>;
}

/// TXT lookups through the system resolver configuration.
pub struct HickoryTxtLookup {
    resolver: TokioResolver,
}

impl HickoryTxtLookup {
    pub fn new() -> Self {
        Self {
            resolver: TokioResolver::builder_with_config(
                ResolverConfig::default(),
                TokioConnectionProvider::default(),
            )
            .with_options(ResolverOpts::default())
            .build(),
        }
    }
}

impl Default for HickoryTxtLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxtLookup for HickoryTxtLookup {
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsaddrResolveError> {
        let records = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|e| DnsaddrResolveError::DnsLookup(format!("Failed to lookup {name}: {e}")))?;

        Ok(records
            .iter()
            .flat_map(|record| record.txt_data().iter())
            .map(|txt| String::from_utf8_lossy(txt).into_owned())
            .collect())
    }
}

/// Resolves `/dnsaddr` seeds, reusing one resolver across lookups.
#[derive(Clone)]
pub struct DnsaddrResolver {
    lookup: Arc<dyn TxtLookup>,
}

impl Default for DnsaddrResolver {
    fn default() -> Self {
        Self::new(Arc::new(HickoryTxtLookup::new()))
    }
}

impl DnsaddrResolver {
    pub fn new(lookup: Arc<dyn TxtLookup>) -> Self {
        Self { lookup }
    }

    /// Resolve one address. Non-dnsaddr inputs are returned unchanged.
    pub async fn resolve(&self, addr: &Multiaddr) -> Result<Vec<Multiaddr>, DnsaddrResolveError> {
        let mut seen = HashSet::new();
        self.resolve_recursive(addr, &mut seen, 0).await
    }

    /// Resolve many addresses. Non-dnsaddr inputs pass through; failures keep
    /// the original address.
    pub async fn resolve_all(&self, addrs: impl IntoIterator<Item = &Multiaddr>) -> Vec<Multiaddr> {
        let mut resolved = Vec::new();

        for addr in addrs {
            if !is_dnsaddr(addr) {
                resolved.push(addr.clone());
                continue;
            }

            match self.resolve(addr).await {
                Ok(addrs) => {
                    debug!(%addr, resolved_count = addrs.len(), "Resolved dnsaddr");
                    resolved.extend(addrs);
                }
                Err(e) => {
                    warn!(%addr, error = %e, "Failed to resolve dnsaddr");
                    resolved.push(addr.clone());
                }
            }
        }

        resolved
    }

    fn resolve_recursive<'a>(
        &'a self,
        addr: &'a Multiaddr,
        seen: &'a mut HashSet<String>,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Multiaddr>, DnsaddrResolveError>> + Send + 'a>>
    {
        Box::pin(async move {
            if depth > MAX_DNS_RECURSION_DEPTH {
                return Err(DnsaddrResolveError::MaxRecursionDepth);
            }

            let Some(domain) = extract_dnsaddr_domain(addr) else {
                return Ok(vec![addr.clone()]);
            };
            let (_, wanted_peer) = split_p2p(addr);

            let txt_name = format!("_dnsaddr.{domain}");
            if !seen.insert(txt_name.clone()) {
                debug!(%domain, "Skipping already-seen dnsaddr domain");
                return Ok(vec![]);
            }

            debug!(name = %txt_name, "Querying DNS TXT records");
            let records = self.lookup.txt(&txt_name).await?;

            let mut results = Vec::new();
            for value in records.iter().filter_map(|r| r.strip_prefix(TXT_PREFIX)) {
                let record = match value.parse::<Multiaddr>() {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(%value, error = %e, "Failed to parse multiaddr from TXT record");
                        continue;
                    }
                };
                if !matches_peer(&record, wanted_peer) {
                    continue;
                }
                let nested = self.resolve_recursive(&record, seen, depth + 1).await?;
                results.extend(nested);
            }

            Ok(results)
        })
    }
}

/// A record matches when no peer was requested or it ends in that peer's id.
fn matches_peer(record: &Multiaddr, wanted: Option<PeerId>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => split_p2p(record).1 == Some(wanted),
    }
}

/// Check if a multiaddr is a `/dnsaddr/` address.
pub fn is_dnsaddr(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::Dnsaddr(_)))
}

/// Extract domain from `/dnsaddr/{domain}`.
pub fn extract_dnsaddr_domain(addr: &Multiaddr) -> Option<String> {
    addr.iter().find_map(|proto| match proto {
        Protocol::Dnsaddr(domain) => Some(domain.to_string()),
        _ => None,
    })
}
