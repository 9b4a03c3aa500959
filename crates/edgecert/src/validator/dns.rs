//! DNS authority check.
//!
//! A domain is only worth a certificate request once its address records
//! point at this server; otherwise the HTTP-01 challenge would be answered
//! by someone else and fail.

use std::net::IpAddr;
use std::time::Duration;

use hickory_resolver::config::{LookupIpStrategy, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::{ProbeError, SetupError};

/// Resolves domains and compares the answer with the server's address.
pub struct DnsAuthority {
    resolver: TokioAsyncResolver,
    server_ip: IpAddr,
    timeout: Duration,
}

impl DnsAuthority {
    /// Build a resolver from the host's resolver configuration
    /// (`/etc/resolv.conf` on Unix).
    pub fn from_system_conf(server_ip: IpAddr, lookup_timeout: Duration) -> Result<Self, SetupError> {
        let (config, opts) = hickory_resolver::system_conf::read_system_conf()
            .map_err(|e| SetupError::Resolver(e.to_string()))?;
        Ok(Self::with_config(config, opts, server_ip, lookup_timeout))
    }

    /// Build a resolver from an explicit configuration.
    pub fn with_config(
        config: ResolverConfig,
        mut opts: ResolverOpts,
        server_ip: IpAddr,
        lookup_timeout: Duration,
    ) -> Self {
        opts.timeout = lookup_timeout;
        // Only ask for the address family the server IP belongs to
        opts.ip_strategy = match server_ip {
            IpAddr::V4(_) => LookupIpStrategy::Ipv4Only,
            IpAddr::V6(_) => LookupIpStrategy::Ipv6Only,
        };

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
            server_ip,
            timeout: lookup_timeout,
        }
    }

    pub fn server_ip(&self) -> IpAddr {
        self.server_ip
    }

    /// Resolve the addresses of `domain`.
    pub async fn resolve(&self, domain: &str) -> Result<Vec<IpAddr>, ProbeError> {
        let lookup = timeout(self.timeout, self.resolver.lookup_ip(domain))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(|e| ProbeError::Resolve(e.to_string()))?;

        let addrs: Vec<IpAddr> = lookup.iter().collect();
        trace!(domain = %domain, addresses = ?addrs, "Resolved domain");
        Ok(addrs)
    }

    /// Whether `domain` currently resolves to this server.
    ///
    /// Resolution failures are an expected state for domains that are not
    /// provisioned yet and yield `false`.
    pub async fn resolves_to_self(&self, domain: &str) -> bool {
        match self.resolve(domain).await {
            Ok(addrs) => {
                let points_here = addresses_match(&addrs, self.server_ip);
                if !points_here {
                    debug!(
                        domain = %domain,
                        addresses = ?addrs,
                        server_ip = %self.server_ip,
                        "Domain does not resolve to this server"
                    );
                }
                points_here
            }
            Err(e) => {
                debug!(domain = %domain, error = %e, "Domain does not resolve");
                false
            }
        }
    }
}

impl std::fmt::Debug for DnsAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsAuthority")
            .field("server_ip", &self.server_ip)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// True iff the answer is non-empty and every address is `server_ip`.
///
/// A round-robin record that also lists another host would let the
/// certificate authority validate against that host, so partial matches
/// do not count.
pub fn addresses_match(addrs: &[IpAddr], server_ip: IpAddr) -> bool {
    !addrs.is_empty() && addrs.iter().all(|ip| *ip == server_ip)
}
