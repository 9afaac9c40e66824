//! WTP configuration
//!
//! An immutable snapshot handed to [`crate::Wtp`] at construction. Values the
//! AC may override at runtime (echo interval) are copied into session state
//! and never written back here.

use crate::error::ConfigError;
use crate::message::{BoardData, BoardItemKind, MAX_SUBELEMENT_LEN, WtpDescriptor};
use crate::registry;
use std::time::Duration;
use wtp_crypto::DataChannelPolicy;
use wtp_transport::TransportKind;

/// Smallest MTU that leaves room for framing, encryption and some payload.
pub const MIN_MTU: usize = 576;

/// Largest MTU accepted (jumbo frames).
pub const MAX_MTU: usize = 9000;

/// WTP configuration
#[derive(Debug, Clone, Default)]
pub struct WtpConfig {
    /// Identity reported to the AC
    pub identity: IdentityConfig,

    /// AC discovery configuration
    pub discovery: DiscoveryConfig,

    /// Protocol timers
    pub timers: TimerConfig,

    /// Security bootstrap configuration
    pub security: SecurityConfig,

    /// Control channel network settings
    pub network: NetworkConfig,
}

impl WtpConfig {
    /// Check the configuration for values the control plane cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.name.is_empty() {
            return Err(ConfigError::invalid("identity.name", "must not be empty"));
        }
        if self.identity.name.len() > 512 {
            return Err(ConfigError::invalid("identity.name", "longer than 512 bytes"));
        }
        self.identity.validate()?;
        for host in self
            .discovery
            .static_hosts
            .iter()
            .chain(&self.discovery.preferred_hosts)
        {
            registry::parse_host(host)?;
        }
        if self.discovery.max_rounds == 0 {
            return Err(ConfigError::invalid("discovery.max_rounds", "must be at least 1"));
        }
        if self.discovery.interval.is_zero() {
            return Err(ConfigError::invalid("discovery.interval", "must be non-zero"));
        }
        if self.timers.echo.is_zero() || self.timers.retransmit.is_zero() {
            return Err(ConfigError::invalid("timers", "echo and retransmit must be non-zero"));
        }
        if self.timers.keepalive_dead <= self.timers.keepalive {
            return Err(ConfigError::invalid(
                "timers.keepalive_dead",
                "must exceed the keep-alive interval",
            ));
        }
        if self.security.max_handshake_failures == 0 {
            return Err(ConfigError::invalid(
                "security.max_handshake_failures",
                "must be at least 1",
            ));
        }
        if self.security.policy.is_empty() {
            return Err(ConfigError::invalid(
                "security.policy",
                "at least one data channel mode required",
            ));
        }
        if !(MIN_MTU..=MAX_MTU).contains(&self.network.mtu) {
            return Err(ConfigError::invalid(
                "network.mtu",
                format!("{} outside {MIN_MTU}..={MAX_MTU}", self.network.mtu),
            ));
        }
        Ok(())
    }
}

/// Identity reported in Discovery and Join requests
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// WTP name
    pub name: String,

    /// Physical location description
    pub location: String,

    /// Vendor and board sub-elements
    pub board: BoardData,

    /// Radio counts, encryption capabilities and versions
    pub descriptor: WtpDescriptor,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            name: "wtp".to_string(),
            location: String::new(),
            board: BoardData::default(),
            descriptor: WtpDescriptor::default(),
        }
    }
}

impl IdentityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for item in &self.board.items {
            if item.value.len() >= MAX_SUBELEMENT_LEN {
                return Err(ConfigError::invalid(
                    "identity.board",
                    format!("sub-element {} longer than {MAX_SUBELEMENT_LEN} bytes", item.kind.0),
                ));
            }
            if item.kind == BoardItemKind::MAC_ADDRESS && !matches!(item.value.len(), 6 | 8) {
                return Err(ConfigError::invalid(
                    "identity.board",
                    "MAC address must be EUI-48 or EUI-64",
                ));
            }
        }

        let descriptor = &self.descriptor;
        if descriptor.encryption.is_empty() {
            return Err(ConfigError::invalid(
                "identity.descriptor.encryption",
                "at least one wireless binding required",
            ));
        }
        if descriptor.encryption.len() > usize::from(u8::MAX) {
            return Err(ConfigError::invalid(
                "identity.descriptor.encryption",
                "more than 255 bindings",
            ));
        }
        if descriptor.radios_in_use > descriptor.max_radios {
            return Err(ConfigError::invalid(
                "identity.descriptor.radios_in_use",
                "exceeds max_radios",
            ));
        }
        if let Some(info) = descriptor
            .info
            .iter()
            .find(|info| info.value.len() >= MAX_SUBELEMENT_LEN)
        {
            return Err(ConfigError::invalid(
                "identity.descriptor.info",
                format!("version {:?} longer than {MAX_SUBELEMENT_LEN} bytes", info.kind),
            ));
        }
        Ok(())
    }
}

/// How to order equal-priority responders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Earliest response wins
    #[default]
    FirstSeen,

    /// Most free WTP capacity wins, then earliest
    Capacity,
}

/// AC discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Also search the standard broadcast/multicast addresses
    pub search: bool,

    /// Configured AC hosts (`host[:port]`)
    pub static_hosts: Vec<String>,

    /// Preferred AC hosts (`host[:port]`)
    pub preferred_hosts: Vec<String>,

    /// Time to collect responses per round
    pub interval: Duration,

    /// Rounds without a usable AC before sulking
    pub max_rounds: u32,

    /// Back-off before discovery restarts after sulking
    pub silent_interval: Duration,

    /// Ordering of equal-priority responders
    pub tie_break: TieBreak,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            search: true,
            static_hosts: Vec::new(),
            preferred_hosts: Vec::new(),
            interval: Duration::from_secs(20),
            max_rounds: 10,
            silent_interval: Duration::from_secs(30),
            tie_break: TieBreak::FirstSeen,
        }
    }
}

/// Protocol timers
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Echo request interval in Run
    pub echo: Duration,

    /// Fixed retransmission interval
    pub retransmit: Duration,

    /// Retransmissions after the first send
    pub max_retransmit: u8,

    /// Keep-alive interval in Run
    pub keepalive: Duration,

    /// Silence from the AC after which the session is dead
    pub keepalive_dead: Duration,

    /// WTP event (statistics) interval
    pub statistics: Duration,

    /// Upper bound on a single handshake attempt
    pub security_session: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            echo: Duration::from_secs(30),
            retransmit: Duration::from_secs(3),
            max_retransmit: 5,
            keepalive: Duration::from_secs(30),
            keepalive_dead: Duration::from_secs(60),
            statistics: Duration::from_secs(120),
            security_session: Duration::from_secs(60),
        }
    }
}

/// Security bootstrap configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Data channel modes this WTP accepts
    pub policy: DataChannelPolicy,

    /// Handshake failures against one AC before it is discarded
    pub max_handshake_failures: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            policy: DataChannelPolicy::BOTH,
            max_handshake_failures: 3,
        }
    }
}

/// Explicit congestion notification support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EcnSupport {
    /// ECN bits limited to the outer header
    #[default]
    Limited,

    /// Full ECN support
    Full,
}

impl EcnSupport {
    /// CAPWAP ECN Support element value.
    #[must_use]
    pub const fn wire_value(self) -> u8 {
        match self {
            Self::Limited => 0,
            Self::Full => 1,
        }
    }
}

/// Control channel network settings
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Path MTU for control datagrams
    pub mtu: usize,

    /// Datagram protocol
    pub transport: TransportKind,

    /// ECN capability reported in Join
    pub ecn: EcnSupport,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mtu: 1400,
            transport: TransportKind::Udp,
            ecn: EcnSupport::Limited,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WtpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.discovery.interval, Duration::from_secs(20));
        assert_eq!(config.timers.max_retransmit, 5);
        assert_eq!(config.security.max_handshake_failures, 3);
    }

    #[test]
    fn test_invalid_host_rejected() {
        let mut config = WtpConfig::default();
        config.discovery.static_hosts.push("ac.example:notaport".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHost(_))
        ));
    }

    #[test]
    fn test_mtu_bounds() {
        let mut config = WtpConfig::default();
        config.network.mtu = 100;
        assert!(config.validate().is_err());
        config.network.mtu = MIN_MTU;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_policy_rejected() {
        let mut config = WtpConfig::default();
        config.security.policy = DataChannelPolicy::NONE;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_board_data_limits() {
        use crate::message::BoardItem;

        let mut config = WtpConfig::default();
        config.identity.board.items.push(BoardItem {
            kind: BoardItemKind::MAC_ADDRESS,
            value: vec![0x02, 0, 0, 1, 2, 3],
        });
        assert!(config.validate().is_ok());

        config.identity.board.items[0].value.push(4);
        assert!(config.validate().is_err());

        config.identity.board.items[0] = BoardItem {
            kind: BoardItemKind::SERIAL,
            value: vec![b'x'; MAX_SUBELEMENT_LEN],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_descriptor_requires_binding() {
        let mut config = WtpConfig::default();
        config.identity.descriptor.encryption.clear();
        assert!(config.validate().is_err());

        let mut config = WtpConfig::default();
        config.identity.descriptor.radios_in_use = 1;
        assert!(config.validate().is_err());
        config.identity.descriptor.max_radios = 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_keepalive_ordering() {
        let mut config = WtpConfig::default();
        config.timers.keepalive_dead = config.timers.keepalive;
        assert!(config.validate().is_err());
    }
}
