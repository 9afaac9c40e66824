//! Configuration file for the `wtp` daemon.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use wtp_core::config::{
    DiscoveryConfig as CoreDiscovery, EcnSupport, IdentityConfig, NetworkConfig as CoreNetwork,
    SecurityConfig as CoreSecurity, TieBreak, TimerConfig,
};
use wtp_core::message::{
    BoardData, BoardItem, BoardItemKind, EncryptionCapability, VersionInfo, VersionKind,
    WBID_IEEE80211, WtpDescriptor,
};
use wtp_core::WtpConfig;
use wtp_crypto::{ClearSecurityService, DataChannelPolicy, Psk, PskSecurityService, SecurityService};
use wtp_transport::{TransportConfig, TransportKind};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/capwap/wtp.toml";

/// Shortest accepted pre-shared key, in bytes.
const MIN_PSK_LEN: usize = 16;

/// WTP daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// WTP identity
    pub wtp: WtpSection,
    /// AC discovery
    pub discovery: DiscoverySection,
    /// Protocol timers
    pub timers: TimersSection,
    /// Control channel security
    pub security: SecuritySection,
    /// Socket settings
    pub network: NetworkSection,
    /// Logging
    pub logging: LoggingSection,
}

/// WTP identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WtpSection {
    /// Name reported to the AC
    pub name: String,
    /// Location reported to the AC
    pub location: String,
    /// WTP Board Data
    pub board: BoardSection,
    /// WTP Descriptor
    pub descriptor: DescriptorSection,
}

/// WTP Board Data
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BoardSection {
    /// IANA enterprise number
    pub vendor: u32,
    /// Board sub-elements
    pub element: Vec<BoardElementSetting>,
}

/// One board sub-element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardElementSetting {
    /// Sub-element name
    pub name: BoardItemName,
    /// Text value; `macaddress` takes `aa:bb:cc:dd:ee:ff`
    pub value: String,
}

/// Board sub-element names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardItemName {
    /// Model number
    Model,
    /// Serial number
    Serial,
    /// Board identifier
    Id,
    /// Board revision
    Revision,
    /// Base MAC address
    MacAddress,
}

/// WTP Descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorSection {
    /// Radios the WTP supports
    pub max_radios: u8,
    /// Radios in use
    pub radios_in_use: u8,
    /// Supported encryption suites
    pub encryption: Vec<EncryptionSetting>,
    /// Version strings
    pub info: Vec<VersionSetting>,
}

/// IEEE 802.11 encryption suites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionSetting {
    /// CCMP
    #[serde(rename = "802.11_AES")]
    Aes,
    /// TKIP
    #[serde(rename = "802.11_TKIP")]
    Tkip,
}

/// One version sub-element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSetting {
    /// IANA enterprise number
    pub vendor: u32,
    /// "hardware", "software", "boot" or "other"
    #[serde(rename = "type")]
    pub kind: VersionSettingKind,
    /// Version text
    pub value: String,
}

/// Version sub-element types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSettingKind {
    /// Hardware version
    Hardware,
    /// Software version
    Software,
    /// Boot loader version
    Boot,
    /// Anything else
    Other,
}

/// AC discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    /// Also search the standard broadcast and multicast addresses
    pub search: bool,
    /// Configured ACs (`host[:port]`)
    pub static_hosts: Vec<String>,
    /// Preferred ACs (`host[:port]`)
    pub preferred_hosts: Vec<String>,
    /// Seconds to collect responses per round
    pub interval_secs: u64,
    /// Rounds before sulking
    pub max_rounds: u32,
    /// Seconds to sulk
    pub silent_interval_secs: u64,
    /// Equal-priority tie break: "first-seen" or "capacity"
    pub tie_break: TieBreakSetting,
}

/// Equal-priority tie break
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreakSetting {
    /// Earliest response
    #[default]
    FirstSeen,
    /// Most free capacity
    Capacity,
}

/// Protocol timers, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimersSection {
    /// Echo interval
    pub echo_secs: u64,
    /// Retransmission interval
    pub retransmit_secs: u64,
    /// Retransmissions after the first send
    pub max_retransmit: u8,
    /// Keep-alive interval
    pub keepalive_secs: u64,
    /// Keep-alive silence before reset
    pub keepalive_dead_secs: u64,
    /// Statistics event interval
    pub statistics_secs: u64,
    /// Handshake bound
    pub security_session_secs: u64,
}

/// Security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Cleartext control channel
    None,
    /// Pre-shared key handshake
    #[default]
    Psk,
}

/// Data channel policy setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicySetting {
    /// Clear only
    Clear,
    /// Encrypted only
    Encrypted,
    /// Either
    #[default]
    Both,
}

/// Control channel security
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// "none" or "psk"
    pub mode: SecurityMode,
    /// PSK identity (defaults to the WTP name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Pre-shared key, hex
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psk: Option<String>,
    /// Accepted data channel modes
    pub policy: PolicySetting,
    /// Handshake failures before an AC is dropped
    pub max_handshake_failures: u32,
}

/// Datagram protocol setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportSetting {
    /// UDP
    #[default]
    Udp,
    /// UDP-Lite
    UdpLite,
}

/// ECN setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EcnSetting {
    /// Limited
    #[default]
    Limited,
    /// Full
    Full,
}

/// Socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    /// Local bind address
    pub bind: String,
    /// Path MTU
    pub mtu: usize,
    /// "udp" or "udplite"
    pub transport: TransportSetting,
    /// "limited" or "full"
    pub ecn: EcnSetting,
}

/// Logging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level
    pub level: String,
}

impl Default for WtpSection {
    fn default() -> Self {
        let identity = IdentityConfig::default();
        Self {
            name: identity.name,
            location: identity.location,
            board: BoardSection::default(),
            descriptor: DescriptorSection::default(),
        }
    }
}

impl Default for DescriptorSection {
    fn default() -> Self {
        Self {
            max_radios: 0,
            radios_in_use: 0,
            encryption: vec![EncryptionSetting::Aes],
            info: Vec::new(),
        }
    }
}

/// Parse `aa:bb:cc:dd:ee:ff` (or `-` separated) into 6 or 8 bytes.
fn parse_mac(text: &str) -> anyhow::Result<Vec<u8>> {
    let digits: String = text.split([':', '-']).collect();
    let bytes = hex::decode(&digits).with_context(|| format!("invalid MAC address {text:?}"))?;
    if bytes.len() != 6 && bytes.len() != 8 {
        anyhow::bail!("MAC address {text:?} must be EUI-48 or EUI-64");
    }
    Ok(bytes)
}

impl BoardSection {
    fn to_board_data(&self) -> anyhow::Result<BoardData> {
        let items = self
            .element
            .iter()
            .map(|element| -> anyhow::Result<BoardItem> {
                let kind = match element.name {
                    BoardItemName::Model => BoardItemKind::MODEL,
                    BoardItemName::Serial => BoardItemKind::SERIAL,
                    BoardItemName::Id => BoardItemKind::BOARD_ID,
                    BoardItemName::Revision => BoardItemKind::REVISION,
                    BoardItemName::MacAddress => BoardItemKind::MAC_ADDRESS,
                };
                let value = if element.name == BoardItemName::MacAddress {
                    parse_mac(&element.value)?
                } else {
                    element.value.clone().into_bytes()
                };
                Ok(BoardItem { kind, value })
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(BoardData {
            vendor: self.vendor,
            items,
        })
    }
}

impl DescriptorSection {
    fn to_descriptor(&self) -> WtpDescriptor {
        // Both suites advertise the same IEEE 802.11 binding entry
        let encryption = if self.encryption.is_empty() {
            Vec::new()
        } else {
            vec![EncryptionCapability {
                wbid: WBID_IEEE80211,
                capabilities: 0,
            }]
        };
        let info = self
            .info
            .iter()
            .map(|version| VersionInfo {
                vendor: version.vendor,
                kind: match version.kind {
                    VersionSettingKind::Hardware => VersionKind::HARDWARE,
                    VersionSettingKind::Software => VersionKind::SOFTWARE,
                    VersionSettingKind::Boot => VersionKind::BOOT,
                    VersionSettingKind::Other => VersionKind::OTHER,
                },
                value: version.value.clone(),
            })
            .collect();
        WtpDescriptor {
            max_radios: self.max_radios,
            radios_in_use: self.radios_in_use,
            encryption,
            info,
        }
    }
}

impl Default for DiscoverySection {
    fn default() -> Self {
        let core = CoreDiscovery::default();
        Self {
            search: core.search,
            static_hosts: Vec::new(),
            preferred_hosts: Vec::new(),
            interval_secs: core.interval.as_secs(),
            max_rounds: core.max_rounds,
            silent_interval_secs: core.silent_interval.as_secs(),
            tie_break: TieBreakSetting::FirstSeen,
        }
    }
}

impl Default for TimersSection {
    fn default() -> Self {
        let core = TimerConfig::default();
        Self {
            echo_secs: core.echo.as_secs(),
            retransmit_secs: core.retransmit.as_secs(),
            max_retransmit: core.max_retransmit,
            keepalive_secs: core.keepalive.as_secs(),
            keepalive_dead_secs: core.keepalive_dead.as_secs(),
            statistics_secs: core.statistics.as_secs(),
            security_session_secs: core.security_session.as_secs(),
        }
    }
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            mode: SecurityMode::Psk,
            identity: None,
            psk: None,
            policy: PolicySetting::Both,
            max_handshake_failures: CoreSecurity::default().max_handshake_failures,
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:0".to_string(),
            mtu: CoreNetwork::default().mtu,
            transport: TransportSetting::Udp,
            ecn: EcnSetting::Limited,
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("cannot parse {}", path.display()))
    }

    /// Parse the bind address
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.network
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", self.network.bind))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.security.mode == SecurityMode::Psk {
            self.psk()?;
            if self.psk_identity().is_empty() {
                anyhow::bail!("security.identity must not be empty");
            }
        }

        self.to_wtp_config()?
            .validate()
            .context("invalid WTP configuration")?;
        Ok(())
    }

    fn psk(&self) -> anyhow::Result<Psk> {
        let Some(encoded) = self.security.psk.as_deref() else {
            anyhow::bail!("security.psk is required when security.mode = \"psk\"");
        };
        let bytes = hex::decode(encoded.trim()).context("security.psk is not valid hex")?;
        if bytes.len() < MIN_PSK_LEN {
            anyhow::bail!(
                "security.psk is {} bytes, at least {} required",
                bytes.len(),
                MIN_PSK_LEN
            );
        }
        Ok(Psk::new(bytes)?)
    }

    fn psk_identity(&self) -> &str {
        self.security.identity.as_deref().unwrap_or(&self.wtp.name)
    }

    /// Build the security service selected by `security.mode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the PSK settings are invalid.
    pub fn security_service(&self) -> anyhow::Result<Box<dyn SecurityService>> {
        Ok(match self.security.mode {
            SecurityMode::None => Box::new(ClearSecurityService::new(self.policy())),
            SecurityMode::Psk => Box::new(PskSecurityService::new(self.psk_identity(), self.psk()?)),
        })
    }

    fn policy(&self) -> DataChannelPolicy {
        match self.security.policy {
            PolicySetting::Clear => DataChannelPolicy::CLEAR,
            PolicySetting::Encrypted => DataChannelPolicy::ENCRYPTED,
            PolicySetting::Both => DataChannelPolicy::BOTH,
        }
    }

    fn transport_kind(&self) -> TransportKind {
        match self.network.transport {
            TransportSetting::Udp => TransportKind::Udp,
            TransportSetting::UdpLite => TransportKind::UdpLite,
        }
    }

    /// Socket options for the control socket.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            kind: self.transport_kind(),
            ..TransportConfig::default()
        }
    }

    /// Convert into the control plane configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a board MAC address cannot be parsed.
    pub fn to_wtp_config(&self) -> anyhow::Result<WtpConfig> {
        let d = &self.discovery;
        let t = &self.timers;
        Ok(WtpConfig {
            identity: IdentityConfig {
                name: self.wtp.name.clone(),
                location: self.wtp.location.clone(),
                board: self.wtp.board.to_board_data()?,
                descriptor: self.wtp.descriptor.to_descriptor(),
            },
            discovery: CoreDiscovery {
                search: d.search,
                static_hosts: d.static_hosts.clone(),
                preferred_hosts: d.preferred_hosts.clone(),
                interval: Duration::from_secs(d.interval_secs),
                max_rounds: d.max_rounds,
                silent_interval: Duration::from_secs(d.silent_interval_secs),
                tie_break: match d.tie_break {
                    TieBreakSetting::FirstSeen => TieBreak::FirstSeen,
                    TieBreakSetting::Capacity => TieBreak::Capacity,
                },
            },
            timers: TimerConfig {
                echo: Duration::from_secs(t.echo_secs),
                retransmit: Duration::from_secs(t.retransmit_secs),
                max_retransmit: t.max_retransmit,
                keepalive: Duration::from_secs(t.keepalive_secs),
                keepalive_dead: Duration::from_secs(t.keepalive_dead_secs),
                statistics: Duration::from_secs(t.statistics_secs),
                security_session: Duration::from_secs(t.security_session_secs),
            },
            security: CoreSecurity {
                policy: self.policy(),
                max_handshake_failures: self.security.max_handshake_failures,
            },
            network: CoreNetwork {
                mtu: self.network.mtu,
                transport: self.transport_kind(),
                ecn: match self.network.ecn {
                    EcnSetting::Limited => EcnSupport::Limited,
                    EcnSetting::Full => EcnSupport::Full,
                },
            },
        })
    }
}
