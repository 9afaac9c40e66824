//! AC candidate registry.
//!
//! Holds the configured and preferred AC lists. Hostnames are kept unresolved
//! until discovery needs them; a lookup that fails is skipped for that round
//! and tried again on the next one.

use crate::config::DiscoveryConfig;
use crate::error::ConfigError;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use wtp_transport::CAPWAP_CONTROL_PORT;

/// How a candidate became known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AcOrigin {
    /// Static configuration
    Configured,
    /// Preferred list; outranks everything else at equal priority
    Preferred,
    /// Answered a broadcast or multicast Discovery Request
    Discovered,
}

/// Candidate address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcAddress {
    /// Literal or already resolved
    Resolved(SocketAddr),
    /// Hostname awaiting resolution
    Pending {
        /// Hostname
        host: String,
        /// Port
        port: u16,
    },
}

/// An AC the WTP may try to join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcCandidate {
    /// Address
    pub address: AcAddress,
    /// Origin
    pub origin: AcOrigin,
}

/// Name resolution used for pending candidates.
pub trait HostResolver: Send + Sync {
    /// Resolve `host` to socket addresses on `port`.
    ///
    /// # Errors
    ///
    /// Returns the resolver's I/O error.
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// Blocking OS resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok((host, port).to_socket_addrs()?.collect())
    }
}

/// Parse `host`, `host:port`, an IP literal or `[v6]:port`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidHost` for empty hosts, bad ports and
/// malformed brackets.
pub fn parse_host(entry: &str) -> Result<AcAddress, ConfigError> {
    let invalid = || ConfigError::InvalidHost(entry.to_string());
    let entry_trimmed = entry.trim();
    if entry_trimmed.is_empty() {
        return Err(invalid());
    }

    if let Ok(addr) = entry_trimmed.parse::<SocketAddr>() {
        return Ok(AcAddress::Resolved(addr));
    }
    if let Ok(ip) = entry_trimmed.parse::<IpAddr>() {
        return Ok(AcAddress::Resolved(SocketAddr::new(ip, CAPWAP_CONTROL_PORT)));
    }
    if entry_trimmed.starts_with('[') {
        // Bracketed but not a valid v6 socket address
        let ip = entry_trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .and_then(|s| s.parse::<Ipv6Addr>().ok())
            .ok_or_else(invalid)?;
        return Ok(AcAddress::Resolved(SocketAddr::new(
            IpAddr::V6(ip),
            CAPWAP_CONTROL_PORT,
        )));
    }

    let (host, port) = match entry_trimmed.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (entry_trimmed, CAPWAP_CONTROL_PORT),
    };
    let valid_label = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_';
    if host.is_empty() || port == 0 || !host.chars().all(valid_label) {
        return Err(invalid());
    }
    Ok(AcAddress::Pending {
        host: host.to_string(),
        port,
    })
}

/// Configured and preferred AC lists.
#[derive(Debug, Clone, Default)]
pub struct AcRegistry {
    configured: Vec<AcAddress>,
    preferred: Vec<AcAddress>,
    fallback: bool,
}

impl AcRegistry {
    /// Build from configuration, seeding the standard discovery addresses when
    /// no AC is configured.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidHost` for a malformed entry.
    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for host in &config.static_hosts {
            registry.add(AcOrigin::Configured, parse_host(host)?);
        }
        for host in &config.preferred_hosts {
            registry.add(AcOrigin::Preferred, parse_host(host)?);
        }

        if !registry.has_any() {
            tracing::debug!("No AC configured, using standard discovery addresses");
            for addr in Self::standard_addresses() {
                registry.add(AcOrigin::Configured, AcAddress::Resolved(addr));
            }
            registry.fallback = true;
        }
        Ok(registry)
    }

    /// IPv4 broadcast, IPv4 CAPWAP multicast, IPv6 CAPWAP multicast.
    #[must_use]
    pub fn standard_addresses() -> [SocketAddr; 3] {
        [
            SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), CAPWAP_CONTROL_PORT),
            SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(224, 0, 1, 140)),
                CAPWAP_CONTROL_PORT,
            ),
            SocketAddr::new(
                IpAddr::V6(Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x18c)),
                CAPWAP_CONTROL_PORT,
            ),
        ]
    }

    /// Add a candidate. Duplicates within one list are ignored.
    pub fn add(&mut self, origin: AcOrigin, address: AcAddress) {
        let list = match origin {
            AcOrigin::Preferred => &mut self.preferred,
            AcOrigin::Configured | AcOrigin::Discovered => &mut self.configured,
        };
        if !list.contains(&address) {
            list.push(address);
        }
    }

    /// Whether any candidate is known.
    #[must_use]
    pub fn has_any(&self) -> bool {
        !self.configured.is_empty() || !self.preferred.is_empty()
    }

    /// Whether the registry only holds the standard addresses.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// All candidates, preferred first.
    #[must_use]
    pub fn candidates(&self) -> Vec<AcCandidate> {
        self.preferred
            .iter()
            .map(|a| (a, AcOrigin::Preferred))
            .chain(self.configured.iter().map(|a| (a, AcOrigin::Configured)))
            .map(|(address, origin)| AcCandidate {
                address: address.clone(),
                origin,
            })
            .collect()
    }

    /// Resolve pending hostnames and return every usable address.
    ///
    /// Successful lookups replace the pending entry. Failures are logged and
    /// skipped.
    pub fn resolved_candidates(
        &mut self,
        resolver: &dyn HostResolver,
    ) -> Vec<(SocketAddr, AcOrigin)> {
        let mut out = Vec::new();
        for (list, origin) in [
            (&mut self.preferred, AcOrigin::Preferred),
            (&mut self.configured, AcOrigin::Configured),
        ] {
            let mut resolved_list = Vec::with_capacity(list.len());
            for address in list.drain(..) {
                match address {
                    AcAddress::Resolved(addr) => {
                        out.push((addr, origin));
                        resolved_list.push(AcAddress::Resolved(addr));
                    }
                    AcAddress::Pending { host, port } => match resolver.resolve(&host, port) {
                        Ok(addrs) if !addrs.is_empty() => {
                            tracing::debug!("Resolved {} to {:?}", host, addrs);
                            for addr in addrs {
                                out.push((addr, origin));
                                let entry = AcAddress::Resolved(addr);
                                if !resolved_list.contains(&entry) {
                                    resolved_list.push(entry);
                                }
                            }
                        }
                        Ok(_) => {
                            tracing::debug!("No addresses for {}", host);
                            resolved_list.push(AcAddress::Pending { host, port });
                        }
                        Err(e) => {
                            tracing::debug!("Failed to resolve {}: {}", host, e);
                            resolved_list.push(AcAddress::Pending { host, port });
                        }
                    },
                }
            }
            *list = resolved_list;
        }
        out
    }

    /// Origin of a resolved address, if it is listed.
    #[must_use]
    pub fn origin_of(&self, addr: SocketAddr) -> Option<AcOrigin> {
        let target = AcAddress::Resolved(addr);
        if self.preferred.contains(&target) {
            Some(AcOrigin::Preferred)
        } else if self.configured.contains(&target) && !self.fallback {
            Some(AcOrigin::Configured)
        } else {
            None
        }
    }
}
