//! Datagram framing for the control channel.
//!
//! Every datagram starts with a one-byte preamble that says how to read the
//! rest:
//!
//! ```text
//! Clear      | 0x00 | round seq | discovery message ...            |
//! Control    | 0x01 | protected( fragment header | payload )       |
//! Handshake  | 0x02 | security handshake message ...              |
//! Keepalive  | 0x03 | protected( session id )                      |
//! ```
//!
//! The fragment header lives inside the channel protection, so it is only
//! parsed after decryption:
//!
//! ```text
//! +-------+-----+----------+---------------------+----------+---------+
//! | flags | seq | reserved |   session id (16)   | offset   | length  |
//! |  u8   | u8  |   u16    |                     |  u32 BE  | u16 BE  |
//! +-------+-----+----------+---------------------+----------+---------+
//! ```
//!
//! All multi-byte fields are big-endian.

use crate::error::FragmentError;
use crate::session::SessionId;

/// Fragment header size in bytes.
pub const HEADER_SIZE: usize = 26;

/// Preamble size in bytes.
pub const PREAMBLE_SIZE: usize = 1;

/// Datagram preamble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Preamble {
    /// Unprotected discovery traffic
    Clear = 0x00,
    /// Protected control fragment
    Control = 0x01,
    /// Security handshake
    Handshake = 0x02,
    /// Protected keep-alive
    Keepalive = 0x03,
}

impl TryFrom<u8> for Preamble {
    type Error = FragmentError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Clear),
            0x01 => Ok(Self::Control),
            0x02 => Ok(Self::Handshake),
            0x03 => Ok(Self::Keepalive),
            other => Err(FragmentError::UnknownPreamble(other)),
        }
    }
}

/// Split a datagram into its preamble and body.
///
/// # Errors
///
/// Returns `FragmentError` for empty datagrams or unknown preambles.
pub fn split_preamble(datagram: &[u8]) -> Result<(Preamble, &[u8]), FragmentError> {
    let (&first, body) = datagram.split_first().ok_or(FragmentError::TooShort {
        expected: PREAMBLE_SIZE,
        actual: 0,
    })?;
    Ok((Preamble::try_from(first)?, body))
}

/// Prefix `body` with `preamble`.
#[must_use]
pub fn with_preamble(preamble: Preamble, body: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(PREAMBLE_SIZE + body.len());
    datagram.push(preamble as u8);
    datagram.extend_from_slice(body);
    datagram
}

/// Fragment flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentFlags(u8);

impl FragmentFlags {
    /// Last fragment of the message
    pub const LAST: u8 = 0b0000_0001;
    /// Fragment of a response rather than a request
    pub const RESPONSE: u8 = 0b0000_0010;

    /// Create new empty flags
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Set LAST flag
    #[must_use]
    pub const fn with_last(self) -> Self {
        Self(self.0 | Self::LAST)
    }

    /// Set RESPONSE flag
    #[must_use]
    pub const fn with_response(self) -> Self {
        Self(self.0 | Self::RESPONSE)
    }

    /// Check if LAST flag is set
    #[must_use]
    pub const fn is_last(self) -> bool {
        self.0 & Self::LAST != 0
    }

    /// Check if RESPONSE flag is set
    #[must_use]
    pub const fn is_response(self) -> bool {
        self.0 & Self::RESPONSE != 0
    }

    /// Get raw value
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

/// Fragment header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Flags
    pub flags: FragmentFlags,
    /// Message sequence number
    pub sequence: u8,
    /// Control session
    pub session_id: SessionId,
    /// Byte offset of this fragment in the message
    pub offset: u32,
}

/// Parsed fragment borrowing its payload from the datagram.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    /// Header
    pub header: FragmentHeader,
    /// Payload bytes
    pub payload: &'a [u8],
}

impl<'a> Fragment<'a> {
    /// Parse a fragment from decrypted bytes.
    ///
    /// # Errors
    ///
    /// Returns `FragmentError` if the buffer is shorter than the header or the
    /// declared payload length does not match.
    pub fn parse(data: &'a [u8]) -> Result<Self, FragmentError> {
        if data.len() < HEADER_SIZE {
            return Err(FragmentError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let flags = FragmentFlags(data[0]);
        let sequence = data[1];
        let mut session = [0u8; 16];
        session.copy_from_slice(&data[4..20]);
        let offset = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let length = u16::from_be_bytes([data[24], data[25]]) as usize;

        let payload = &data[HEADER_SIZE..];
        if payload.len() != length {
            return Err(FragmentError::LengthMismatch {
                declared: length,
                actual: payload.len(),
            });
        }

        Ok(Self {
            header: FragmentHeader {
                flags,
                sequence,
                session_id: SessionId::from_bytes(session),
                offset,
            },
            payload,
        })
    }
}

impl FragmentHeader {
    /// Serialize the header followed by `payload`.
    #[must_use]
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.push(self.flags.as_u8());
        buf.push(self.sequence);
        buf.extend_from_slice(&[0, 0]);
        buf.extend_from_slice(self.session_id.as_bytes());
        buf.extend_from_slice(&self.offset.to_be_bytes());
        buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }
}

/// Split a message into encoded fragments carrying at most `max_payload` bytes.
///
/// An empty message still produces one (empty, last) fragment.
#[must_use]
pub fn split(
    session_id: SessionId,
    sequence: u8,
    response: bool,
    message: &[u8],
    max_payload: usize,
) -> Vec<Vec<u8>> {
    let max_payload = max_payload.clamp(1, u16::MAX as usize);
    let count = message.len().div_ceil(max_payload).max(1);

    (0..count)
        .map(|i| {
            let start = i * max_payload;
            let end = (start + max_payload).min(message.len());
            let mut flags = FragmentFlags::new();
            if response {
                flags = flags.with_response();
            }
            if i + 1 == count {
                flags = flags.with_last();
            }
            FragmentHeader {
                flags,
                sequence,
                session_id,
                offset: start as u32,
            }
            .encode(&message[start..end])
        })
        .collect()
}
