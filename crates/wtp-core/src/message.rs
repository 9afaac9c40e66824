//! Control message model and the default wire codec.
//!
//! The state machine works on [`Message`] values; how they become bytes is
//! behind [`MessageCodec`]. The default [`TlvCodec`] writes a 16-bit message
//! type followed by type/length/value elements, all big-endian.

use crate::error::CodecError;
use crate::session::SessionId;

/// Control message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Discovery Request
    DiscoveryRequest,
    /// Discovery Response
    DiscoveryResponse,
    /// Join Request
    JoinRequest,
    /// Join Response
    JoinResponse,
    /// Configuration Status Request
    ConfigurationStatusRequest,
    /// Configuration Status Response
    ConfigurationStatusResponse,
    /// Configuration Update Request
    ConfigurationUpdateRequest,
    /// Configuration Update Response
    ConfigurationUpdateResponse,
    /// WTP Event Request
    WtpEventRequest,
    /// WTP Event Response
    WtpEventResponse,
    /// Change State Event Request
    ChangeStateEventRequest,
    /// Change State Event Response
    ChangeStateEventResponse,
    /// Echo Request
    EchoRequest,
    /// Echo Response
    EchoResponse,
    /// Reset Request
    ResetRequest,
    /// Reset Response
    ResetResponse,
    /// Clear Configuration Request
    ClearConfigurationRequest,
    /// Clear Configuration Response
    ClearConfigurationResponse,
    /// Any type this WTP does not implement
    Other(u16),
}

impl MessageType {
    /// Decode a wire value.
    #[must_use]
    pub const fn from_u16(value: u16) -> Self {
        match value {
            1 => Self::DiscoveryRequest,
            2 => Self::DiscoveryResponse,
            3 => Self::JoinRequest,
            4 => Self::JoinResponse,
            5 => Self::ConfigurationStatusRequest,
            6 => Self::ConfigurationStatusResponse,
            7 => Self::ConfigurationUpdateRequest,
            8 => Self::ConfigurationUpdateResponse,
            9 => Self::WtpEventRequest,
            10 => Self::WtpEventResponse,
            11 => Self::ChangeStateEventRequest,
            12 => Self::ChangeStateEventResponse,
            13 => Self::EchoRequest,
            14 => Self::EchoResponse,
            17 => Self::ResetRequest,
            18 => Self::ResetResponse,
            23 => Self::ClearConfigurationRequest,
            24 => Self::ClearConfigurationResponse,
            other => Self::Other(other),
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::DiscoveryRequest => 1,
            Self::DiscoveryResponse => 2,
            Self::JoinRequest => 3,
            Self::JoinResponse => 4,
            Self::ConfigurationStatusRequest => 5,
            Self::ConfigurationStatusResponse => 6,
            Self::ConfigurationUpdateRequest => 7,
            Self::ConfigurationUpdateResponse => 8,
            Self::WtpEventRequest => 9,
            Self::WtpEventResponse => 10,
            Self::ChangeStateEventRequest => 11,
            Self::ChangeStateEventResponse => 12,
            Self::EchoRequest => 13,
            Self::EchoResponse => 14,
            Self::ResetRequest => 17,
            Self::ResetResponse => 18,
            Self::ClearConfigurationRequest => 23,
            Self::ClearConfigurationResponse => 24,
            Self::Other(value) => value,
        }
    }

    /// Requests have odd type numbers.
    #[must_use]
    pub const fn is_request(self) -> bool {
        self.as_u16() % 2 == 1
    }

    /// Response type matching this request type.
    #[must_use]
    pub const fn response(self) -> Self {
        Self::from_u16(self.as_u16().wrapping_add(1))
    }
}

/// Result code carried in responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    /// Success
    pub const SUCCESS: Self = Self(0);
    /// Failure, AC list present
    pub const FAILURE_AC_LIST: Self = Self(1);
    /// Success, NAT detected
    pub const SUCCESS_NAT: Self = Self(2);
    /// Join failure, unspecified
    pub const JOIN_FAILURE: Self = Self(3);
    /// Join failure, resource depletion
    pub const JOIN_RESOURCE_DEPLETION: Self = Self(4);
    /// Join failure, unknown source
    pub const JOIN_UNKNOWN_SOURCE: Self = Self(5);
    /// Configuration could not be applied, service not provided
    pub const CONFIGURATION_FAILURE: Self = Self(13);
    /// Message invalid in the current state
    pub const INVALID_IN_CURRENT_STATE: Self = Self(18);
    /// Request type not recognized
    pub const UNRECOGNIZED_REQUEST: Self = Self(19);

    /// Whether the code reports success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self.0, 0 | 2)
    }
}

/// Element type numbers
pub mod element_type {
    /// AC Descriptor
    pub const AC_DESCRIPTOR: u16 = 1;
    /// AC Name
    pub const AC_NAME: u16 = 4;
    /// AC Name with Priority
    pub const AC_NAME_WITH_PRIORITY: u16 = 5;
    /// CAPWAP Timers
    pub const TIMERS: u16 = 12;
    /// Discovery Type
    pub const DISCOVERY_TYPE: u16 = 20;
    /// Location Data
    pub const LOCATION: u16 = 28;
    /// Maximum Message Length
    pub const MAXIMUM_MESSAGE_LENGTH: u16 = 29;
    /// Result Code
    pub const RESULT_CODE: u16 = 33;
    /// Session ID
    pub const SESSION_ID: u16 = 35;
    /// Statistics Timer
    pub const STATISTICS_TIMER: u16 = 36;
    /// WTP Board Data
    pub const WTP_BOARD_DATA: u16 = 38;
    /// WTP Descriptor
    pub const WTP_DESCRIPTOR: u16 = 39;
    /// WTP Name
    pub const WTP_NAME: u16 = 45;
    /// CAPWAP Transport Protocol
    pub const TRANSPORT_PROTOCOL: u16 = 51;
    /// ECN Support
    pub const ECN_SUPPORT: u16 = 53;
    /// Control transport counters (private range)
    pub const TRANSPORT_STATISTICS: u16 = 1024;
}

/// AC capacity advertised in discovery responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcDescriptor {
    /// Stations currently served
    pub stations: u16,
    /// Station limit
    pub station_limit: u16,
    /// WTPs currently joined
    pub active_wtps: u16,
    /// WTP limit
    pub max_wtps: u16,
    /// Security capability flags
    pub security: u8,
}

impl AcDescriptor {
    /// Free WTP slots.
    #[must_use]
    pub const fn free_capacity(&self) -> u16 {
        self.max_wtps.saturating_sub(self.active_wtps)
    }
}

/// Longest board or descriptor sub-element value.
pub const MAX_SUBELEMENT_LEN: usize = 1024;

/// WTP Board Data sub-element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardItemKind(pub u16);

impl BoardItemKind {
    /// Model number
    pub const MODEL: Self = Self(0);
    /// Serial number
    pub const SERIAL: Self = Self(1);
    /// Board identifier
    pub const BOARD_ID: Self = Self(2);
    /// Board revision
    pub const REVISION: Self = Self(3);
    /// Base MAC address
    pub const MAC_ADDRESS: Self = Self(4);
}

/// One board sub-element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardItem {
    /// Sub-element type
    pub kind: BoardItemKind,
    /// Raw value
    pub value: Vec<u8>,
}

/// Hardware identity of the WTP
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoardData {
    /// IANA enterprise number of the vendor
    pub vendor: u32,
    /// Sub-elements in configuration order
    pub items: Vec<BoardItem>,
}

/// WTP Descriptor version sub-element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionKind(pub u16);

impl VersionKind {
    /// Hardware version
    pub const HARDWARE: Self = Self(0);
    /// Active software version
    pub const SOFTWARE: Self = Self(1);
    /// Boot loader version
    pub const BOOT: Self = Self(2);
    /// Other software version
    pub const OTHER: Self = Self(3);
}

/// Vendor-scoped version string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    /// IANA enterprise number of the vendor
    pub vendor: u32,
    /// What the version describes
    pub kind: VersionKind,
    /// Version text
    pub value: String,
}

/// Encryption capabilities for one wireless binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionCapability {
    /// Wireless binding identifier
    pub wbid: u8,
    /// Capability bits
    pub capabilities: u16,
}

/// IEEE 802.11 wireless binding identifier.
pub const WBID_IEEE80211: u8 = 1;

/// Radio and software description of the WTP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WtpDescriptor {
    /// Radios the WTP supports
    pub max_radios: u8,
    /// Radios currently in use
    pub radios_in_use: u8,
    /// Encryption capabilities per binding
    pub encryption: Vec<EncryptionCapability>,
    /// Version strings
    pub info: Vec<VersionInfo>,
}

impl Default for WtpDescriptor {
    fn default() -> Self {
        Self {
            max_radios: 0,
            radios_in_use: 0,
            encryption: vec![EncryptionCapability {
                wbid: WBID_IEEE80211,
                capabilities: 0,
            }],
            info: Vec::new(),
        }
    }
}

/// Control transport counters reported in WTP events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportCounters {
    /// Requests sent
    pub requests: u32,
    /// Retransmissions
    pub retransmissions: u32,
    /// Datagrams discarded
    pub discarded: u32,
}

/// Typed message elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageElement {
    /// AC Descriptor
    AcDescriptor(AcDescriptor),
    /// AC Name
    AcName(String),
    /// AC Name with Priority
    AcNameWithPriority {
        /// Priority, higher is preferred
        priority: u8,
        /// AC name
        name: String,
    },
    /// CAPWAP Timers, in seconds
    Timers {
        /// Discovery interval
        discovery: u8,
        /// Echo interval
        echo: u8,
    },
    /// Discovery Type
    DiscoveryType(u8),
    /// Location Data
    Location(String),
    /// Maximum Message Length
    MaximumMessageLength(u16),
    /// Result Code
    ResultCode(ResultCode),
    /// Session ID
    SessionId(SessionId),
    /// Statistics Timer, in seconds
    StatisticsTimer(u16),
    /// WTP Name
    WtpName(String),
    /// WTP Board Data
    BoardData(BoardData),
    /// WTP Descriptor
    WtpDescriptor(WtpDescriptor),
    /// CAPWAP Transport Protocol
    TransportProtocol(u8),
    /// ECN Support
    EcnSupport(u8),
    /// Control transport counters
    TransportStatistics(TransportCounters),
    /// Element this codec does not interpret
    Raw {
        /// Element type
        element_type: u16,
        /// Value bytes
        value: Vec<u8>,
    },
}

impl MessageElement {
    /// Element type number.
    #[must_use]
    pub fn element_type(&self) -> u16 {
        use crate::message::element_type as t;
        match self {
            Self::AcDescriptor(_) => t::AC_DESCRIPTOR,
            Self::AcName(_) => t::AC_NAME,
            Self::AcNameWithPriority { .. } => t::AC_NAME_WITH_PRIORITY,
            Self::Timers { .. } => t::TIMERS,
            Self::DiscoveryType(_) => t::DISCOVERY_TYPE,
            Self::Location(_) => t::LOCATION,
            Self::MaximumMessageLength(_) => t::MAXIMUM_MESSAGE_LENGTH,
            Self::ResultCode(_) => t::RESULT_CODE,
            Self::SessionId(_) => t::SESSION_ID,
            Self::StatisticsTimer(_) => t::STATISTICS_TIMER,
            Self::WtpName(_) => t::WTP_NAME,
            Self::BoardData(_) => t::WTP_BOARD_DATA,
            Self::WtpDescriptor(_) => t::WTP_DESCRIPTOR,
            Self::TransportProtocol(_) => t::TRANSPORT_PROTOCOL,
            Self::EcnSupport(_) => t::ECN_SUPPORT,
            Self::TransportStatistics(_) => t::TRANSPORT_STATISTICS,
            Self::Raw { element_type, .. } => *element_type,
        }
    }
}

/// A control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type
    pub message_type: MessageType,
    /// Elements in wire order
    pub elements: Vec<MessageElement>,
}

impl Message {
    /// Create a message with no elements.
    #[must_use]
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            elements: Vec::new(),
        }
    }

    /// Append an element.
    #[must_use]
    pub fn with(mut self, element: MessageElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Response to `request` carrying only a result code.
    #[must_use]
    pub fn response_to(request: MessageType, code: ResultCode) -> Self {
        Self::new(request.response()).with(MessageElement::ResultCode(code))
    }

    /// Result code element, if present.
    #[must_use]
    pub fn result_code(&self) -> Option<ResultCode> {
        self.elements.iter().find_map(|e| match e {
            MessageElement::ResultCode(code) => Some(*code),
            _ => None,
        })
    }

    /// CAPWAP Timers element as (discovery, echo) seconds.
    #[must_use]
    pub fn timers(&self) -> Option<(u8, u8)> {
        self.elements.iter().find_map(|e| match e {
            MessageElement::Timers { discovery, echo } => Some((*discovery, *echo)),
            _ => None,
        })
    }

    /// AC Name with Priority element.
    #[must_use]
    pub fn ac_priority(&self) -> Option<(u8, &str)> {
        self.elements.iter().find_map(|e| match e {
            MessageElement::AcNameWithPriority { priority, name } => {
                Some((*priority, name.as_str()))
            }
            _ => None,
        })
    }

    /// AC Name, from either name element.
    #[must_use]
    pub fn ac_name(&self) -> Option<&str> {
        self.elements.iter().find_map(|e| match e {
            MessageElement::AcName(name) | MessageElement::AcNameWithPriority { name, .. } => {
                Some(name.as_str())
            }
            _ => None,
        })
    }

    /// AC Descriptor element.
    #[must_use]
    pub fn ac_descriptor(&self) -> Option<AcDescriptor> {
        self.elements.iter().find_map(|e| match e {
            MessageElement::AcDescriptor(d) => Some(*d),
            _ => None,
        })
    }

    /// WTP Board Data element.
    #[must_use]
    pub fn board_data(&self) -> Option<&BoardData> {
        self.elements.iter().find_map(|e| match e {
            MessageElement::BoardData(board) => Some(board),
            _ => None,
        })
    }

    /// WTP Descriptor element.
    #[must_use]
    pub fn wtp_descriptor(&self) -> Option<&WtpDescriptor> {
        self.elements.iter().find_map(|e| match e {
            MessageElement::WtpDescriptor(d) => Some(d),
            _ => None,
        })
    }
}

/// Converts messages to and from bytes.
pub trait MessageCodec: Send + Sync {
    /// Encode a message.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if an element cannot be represented.
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError>;

    /// Decode a message.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` for truncated or inconsistent input.
    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}

/// Type/length/value codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlvCodec;

const MESSAGE_HEADER_SIZE: usize = 2;
const ELEMENT_HEADER_SIZE: usize = 4;

impl TlvCodec {
    fn encode_value(element: &MessageElement) -> Vec<u8> {
        match element {
            MessageElement::AcDescriptor(d) => {
                let mut v = Vec::with_capacity(9);
                v.extend_from_slice(&d.stations.to_be_bytes());
                v.extend_from_slice(&d.station_limit.to_be_bytes());
                v.extend_from_slice(&d.active_wtps.to_be_bytes());
                v.extend_from_slice(&d.max_wtps.to_be_bytes());
                v.push(d.security);
                v
            }
            MessageElement::AcName(s)
            | MessageElement::Location(s)
            | MessageElement::WtpName(s) => s.as_bytes().to_vec(),
            MessageElement::AcNameWithPriority { priority, name } => {
                let mut v = Vec::with_capacity(1 + name.len());
                v.push(*priority);
                v.extend_from_slice(name.as_bytes());
                v
            }
            MessageElement::Timers { discovery, echo } => vec![*discovery, *echo],
            MessageElement::DiscoveryType(v)
            | MessageElement::TransportProtocol(v)
            | MessageElement::EcnSupport(v) => vec![*v],
            MessageElement::MaximumMessageLength(v) | MessageElement::StatisticsTimer(v) => {
                v.to_be_bytes().to_vec()
            }
            MessageElement::ResultCode(code) => code.0.to_be_bytes().to_vec(),
            MessageElement::SessionId(id) => id.as_bytes().to_vec(),
            MessageElement::TransportStatistics(c) => {
                let mut v = Vec::with_capacity(12);
                v.extend_from_slice(&c.requests.to_be_bytes());
                v.extend_from_slice(&c.retransmissions.to_be_bytes());
                v.extend_from_slice(&c.discarded.to_be_bytes());
                v
            }
            MessageElement::BoardData(board) => {
                let mut v = board.vendor.to_be_bytes().to_vec();
                for item in &board.items {
                    put_subelement(&mut v, item.kind.0, &item.value);
                }
                v
            }
            MessageElement::WtpDescriptor(d) => {
                let mut v = vec![d.max_radios, d.radios_in_use, d.encryption.len() as u8];
                for cap in &d.encryption {
                    v.push(cap.wbid & 0x1F);
                    v.extend_from_slice(&cap.capabilities.to_be_bytes());
                }
                for info in &d.info {
                    v.extend_from_slice(&info.vendor.to_be_bytes());
                    put_subelement(&mut v, info.kind.0, info.value.as_bytes());
                }
                v
            }
            MessageElement::Raw { value, .. } => value.clone(),
        }
    }

    fn decode_value(element_type: u16, value: &[u8]) -> Result<MessageElement, CodecError> {
        use crate::message::element_type as t;

        let invalid = |reason| CodecError::InvalidElement {
            element_type,
            reason,
        };
        let text = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec()).map_err(|_| invalid("not valid UTF-8"))
        };
        let exact = |len: usize| {
            if value.len() == len {
                Ok(value)
            } else {
                Err(invalid("unexpected length"))
            }
        };
        let be16 = |b: &[u8]| u16::from_be_bytes([b[0], b[1]]);
        let be32 = |b: &[u8]| u32::from_be_bytes([b[0], b[1], b[2], b[3]]);

        Ok(match element_type {
            t::AC_DESCRIPTOR => {
                let v = exact(9)?;
                MessageElement::AcDescriptor(AcDescriptor {
                    stations: be16(&v[0..2]),
                    station_limit: be16(&v[2..4]),
                    active_wtps: be16(&v[4..6]),
                    max_wtps: be16(&v[6..8]),
                    security: v[8],
                })
            }
            t::AC_NAME => MessageElement::AcName(text(value)?),
            t::AC_NAME_WITH_PRIORITY => {
                let (&priority, name) = value.split_first().ok_or(invalid("missing priority"))?;
                MessageElement::AcNameWithPriority {
                    priority,
                    name: text(name)?,
                }
            }
            t::TIMERS => {
                let v = exact(2)?;
                MessageElement::Timers {
                    discovery: v[0],
                    echo: v[1],
                }
            }
            t::DISCOVERY_TYPE => MessageElement::DiscoveryType(exact(1)?[0]),
            t::LOCATION => MessageElement::Location(text(value)?),
            t::MAXIMUM_MESSAGE_LENGTH => MessageElement::MaximumMessageLength(be16(exact(2)?)),
            t::RESULT_CODE => MessageElement::ResultCode(ResultCode(be32(exact(4)?))),
            t::SESSION_ID => {
                let mut id = [0u8; 16];
                id.copy_from_slice(exact(16)?);
                MessageElement::SessionId(SessionId::from_bytes(id))
            }
            t::STATISTICS_TIMER => MessageElement::StatisticsTimer(be16(exact(2)?)),
            t::WTP_NAME => MessageElement::WtpName(text(value)?),
            t::TRANSPORT_PROTOCOL => MessageElement::TransportProtocol(exact(1)?[0]),
            t::ECN_SUPPORT => MessageElement::EcnSupport(exact(1)?[0]),
            t::WTP_BOARD_DATA => {
                if value.len() < 4 {
                    return Err(invalid("missing vendor"));
                }
                let mut items = Vec::new();
                let mut rest = &value[4..];
                while !rest.is_empty() {
                    let (kind, data, tail) = take_subelement(rest).ok_or(invalid("truncated sub-element"))?;
                    items.push(BoardItem {
                        kind: BoardItemKind(kind),
                        value: data.to_vec(),
                    });
                    rest = tail;
                }
                MessageElement::BoardData(BoardData {
                    vendor: be32(value),
                    items,
                })
            }
            t::WTP_DESCRIPTOR => {
                let (header, mut rest) = value
                    .split_at_checked(3)
                    .ok_or(invalid("missing radio counts"))?;
                let mut encryption = Vec::with_capacity(header[2] as usize);
                for _ in 0..header[2] {
                    let (cap, tail) = rest
                        .split_at_checked(3)
                        .ok_or(invalid("truncated encryption sub-element"))?;
                    encryption.push(EncryptionCapability {
                        wbid: cap[0] & 0x1F,
                        capabilities: be16(&cap[1..3]),
                    });
                    rest = tail;
                }
                let mut info = Vec::new();
                while !rest.is_empty() {
                    let (vendor, tail) = rest
                        .split_at_checked(4)
                        .ok_or(invalid("truncated version sub-element"))?;
                    let (kind, data, tail) =
                        take_subelement(tail).ok_or(invalid("truncated version sub-element"))?;
                    info.push(VersionInfo {
                        vendor: be32(vendor),
                        kind: VersionKind(kind),
                        value: text(data)?,
                    });
                    rest = tail;
                }
                MessageElement::WtpDescriptor(WtpDescriptor {
                    max_radios: header[0],
                    radios_in_use: header[1],
                    encryption,
                    info,
                })
            }
            t::TRANSPORT_STATISTICS => {
                let v = exact(12)?;
                MessageElement::TransportStatistics(TransportCounters {
                    requests: be32(&v[0..4]),
                    retransmissions: be32(&v[4..8]),
                    discarded: be32(&v[8..12]),
                })
            }
            _ => MessageElement::Raw {
                element_type,
                value: value.to_vec(),
            },
        })
    }
}

/// Append a `type(2) length(2) data` sub-element.
fn put_subelement(out: &mut Vec<u8>, kind: u16, data: &[u8]) {
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
}

/// Split one `type(2) length(2) data` sub-element off `bytes`.
fn take_subelement(bytes: &[u8]) -> Option<(u16, &[u8], &[u8])> {
    let (header, rest) = bytes.split_at_checked(4)?;
    let kind = u16::from_be_bytes([header[0], header[1]]);
    let len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let (data, rest) = rest.split_at_checked(len)?;
    Some((kind, data, rest))
}

impl MessageCodec for TlvCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&message.message_type.as_u16().to_be_bytes());

        for element in &message.elements {
            let element_type = element.element_type();
            let value = Self::encode_value(element);
            let len = u16::try_from(value.len()).map_err(|_| CodecError::ElementTooLong {
                element_type,
                len: value.len(),
            })?;
            out.extend_from_slice(&element_type.to_be_bytes());
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&value);
        }
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: MESSAGE_HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        let message_type = MessageType::from_u16(u16::from_be_bytes([bytes[0], bytes[1]]));

        let mut elements = Vec::new();
        let mut rest = &bytes[MESSAGE_HEADER_SIZE..];
        while !rest.is_empty() {
            if rest.len() < ELEMENT_HEADER_SIZE {
                return Err(CodecError::TooShort {
                    expected: ELEMENT_HEADER_SIZE,
                    actual: rest.len(),
                });
            }
            let element_type = u16::from_be_bytes([rest[0], rest[1]]);
            let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            let body = &rest[ELEMENT_HEADER_SIZE..];
            if body.len() < len {
                return Err(CodecError::ElementOverrun {
                    element_type,
                    declared: len,
                    remaining: body.len(),
                });
            }
            elements.push(Self::decode_value(element_type, &body[..len])?);
            rest = &body[len..];
        }

        Ok(Message {
            message_type,
            elements,
        })
    }
}
