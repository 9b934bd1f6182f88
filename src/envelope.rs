//! Binary envelope codec.
//!
//! Every data frame exchanged with a participant carries exactly one
//! [`Envelope`]:
//!
//! ```text
//! ┌─────────┬─────────┬──────────────────┬──────────────┐
//! │ version │  type   │ payload length   │ payload      │
//! │  1 byte │ 1 byte  │ 2 bytes (BE u16) │ N bytes      │
//! └─────────┴─────────┴──────────────────┴──────────────┘
//! ```
//!
//! Only bit 0 of the version byte and bits 0–1 of the type byte are
//! significant; every other bit is reserved and must be zero. The length
//! field is authoritative: a frame whose trailing byte count differs from
//! the declared length is rejected rather than silently re-framed.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed envelope header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload an envelope can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Largest encoded envelope (header plus maximum payload).
pub const MAX_FRAME_LEN: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

const VERSION_RESERVED: u8 = 0xFE;
const TYPE_RESERVED: u8 = 0xFC;

/// Errors produced while encoding or decoding an envelope.
///
/// Any of these on an inbound frame is fatal for the connection that
/// sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is shorter than the 4-byte header.
    #[error("missing header")]
    MissingHeader,

    /// A reserved bit of the version byte is set.
    #[error("unsupported version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// A reserved bit of the type byte is set.
    #[error("unsupported type: {0:#04x}")]
    UnsupportedType(u8),

    /// Payload exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload too big: {0} bytes")]
    PayloadTooBig(usize),

    /// Fewer payload bytes than the header declares.
    #[error("truncated payload: declared {declared} bytes, got {actual}")]
    Truncated {
        /// Length from the header.
        declared: usize,
        /// Bytes actually present after the header.
        actual: usize,
    },

    /// More payload bytes than the header declares.
    #[error("trailing bytes: declared {declared} bytes, got {actual}")]
    TrailingBytes {
        /// Length from the header.
        declared: usize,
        /// Bytes actually present after the header.
        actual: usize,
    },
}

/// Envelope protocol version (one significant bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Version {
    /// Version 0.
    V0 = 0,
    /// Version 1, the current protocol.
    #[default]
    V1 = 1,
}

impl Version {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Version {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::V0),
            1 => Ok(Self::V1),
            other => Err(ProtocolError::UnsupportedVersion(other)),
        }
    }
}

/// Payload type carried by an envelope (two significant bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Type value 0; passes validation but carries no declared meaning.
    Unspecified = 0,
    /// Opaque binary payload.
    Binary = 1,
    /// UTF-8 text payload.
    Text = 2,
    /// JSON document payload.
    Json = 3,
}

impl MessageType {
    /// Returns the wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unspecified),
            1 => Ok(Self::Binary),
            2 => Ok(Self::Text),
            3 => Ok(Self::Json),
            other => Err(ProtocolError::UnsupportedType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "unspecified",
            Self::Binary => "binary",
            Self::Text => "text",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// One application message: header fields plus payload.
///
/// Immutable once built. The payload is a [`Bytes`] so decoding a frame
/// does not copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    version: Version,
    kind: MessageType,
    payload: Bytes,
}

impl Envelope {
    /// Builds an envelope, checking the payload size.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::PayloadTooBig`] if `payload` is longer
    /// than [`MAX_PAYLOAD_LEN`].
    pub fn new(
        version: Version,
        kind: MessageType,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooBig(payload.len()));
        }
        Ok(Self {
            version,
            kind,
            payload,
        })
    }

    /// Protocol version.
    #[must_use]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Payload type.
    #[must_use]
    pub const fn kind(&self) -> MessageType {
        self.kind
    }

    /// Payload bytes.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Encoded size: header plus payload.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serializes the envelope into a single frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.version.as_u8());
        buf.put_u8(self.kind.as_u8());
        // Length fits: enforced by `new` and `decode`.
        buf.put_u16(u16::try_from(self.payload.len()).unwrap_or(u16::MAX));
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Encodes a payload with the given header fields.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooBig`] if `payload` is longer than
/// [`MAX_PAYLOAD_LEN`].
pub fn encode(version: Version, kind: MessageType, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    Envelope::new(version, kind, Bytes::copy_from_slice(payload)).map(|env| env.encode())
}

/// Decodes one frame into an [`Envelope`].
///
/// The frame must contain exactly one envelope: the header followed by
/// precisely the declared number of payload bytes.
///
/// # Errors
///
/// Returns a [`ProtocolError`] describing the first check that failed,
/// in this order: missing header, payload too big, unsupported version,
/// unsupported type, length mismatch.
pub fn decode(frame: Bytes) -> Result<Envelope, ProtocolError> {
    let [version, kind, len_hi, len_lo, rest @ ..] = frame.as_ref() else {
        return Err(ProtocolError::MissingHeader);
    };
    let (version, kind, actual) = (*version, *kind, rest.len());
    let declared = usize::from(u16::from_be_bytes([*len_hi, *len_lo]));

    if actual > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooBig(actual));
    }
    if version & VERSION_RESERVED != 0 {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    if kind & TYPE_RESERVED != 0 {
        return Err(ProtocolError::UnsupportedType(kind));
    }
    if actual < declared {
        return Err(ProtocolError::Truncated { declared, actual });
    }
    if actual > declared {
        return Err(ProtocolError::TrailingBytes { declared, actual });
    }

    Ok(Envelope {
        version: Version::try_from(version)?,
        kind: MessageType::try_from(kind)?,
        payload: frame.slice(HEADER_LEN..),
    })
}
