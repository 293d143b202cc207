//! Network-layer packet format and codec.
//!
//! Every node in one simulated network agrees on a [`HeaderLayout`]: the
//! decimal width of each header field. The header is ASCII, zero-padded,
//! with no delimiters; the payload follows as raw bytes.
//!
//! # Packet Format
//!
//! ```text
//! +----------------------+
//! | id (W1 digits)       |  message identifier, per sender
//! +----------------------+
//! | offset (W2 digits)   |  byte position of payload in the message
//! +----------------------+
//! | more_fragments (1)   |  "1" on every fragment but the last
//! +----------------------+
//! | destination (W3)     |  final host address
//! +----------------------+
//! | payload              |  remaining bytes
//! | (variable)           |
//! +----------------------+
//! ```
//!
//! # MTU Constraint
//!
//! Encoded size = `header_len() + payload.len()` and must not exceed the
//! MTU of the interface it leaves on.

use crate::error::{Error, PacketError, Result};

/// Width of the more-fragments flag field
pub const FLAG_WIDTH: usize = 1;

/// Largest width accepted for `id` and `destination` (fits a `u32`)
const MAX_ADDR_WIDTH: usize = 9;

/// Largest width accepted for `offset`
const MAX_OFFSET_WIDTH: usize = 18;

/// Field widths shared by every node of a network.
///
/// Changing any width changes the wire format; nodes built with different
/// layouts cannot talk to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    id_width: usize,
    offset_width: usize,
    destination_width: usize,
}

impl HeaderLayout {
    /// Create a layout, rejecting zero-width or oversized fields.
    pub fn new(id_width: usize, offset_width: usize, destination_width: usize) -> Result<Self> {
        for (name, width, max) in [
            ("id", id_width, MAX_ADDR_WIDTH),
            ("offset", offset_width, MAX_OFFSET_WIDTH),
            ("destination", destination_width, MAX_ADDR_WIDTH),
        ] {
            if width == 0 || width > max {
                return Err(Error::Config(format!(
                    "{name} width must be in 1..={max}, got {width}"
                )));
            }
        }

        Ok(Self {
            id_width,
            offset_width,
            destination_width,
        })
    }

    pub fn id_width(&self) -> usize {
        self.id_width
    }

    pub fn offset_width(&self) -> usize {
        self.offset_width
    }

    pub fn destination_width(&self) -> usize {
        self.destination_width
    }

    /// Total header length in bytes.
    pub fn header_len(&self) -> usize {
        self.id_width + self.offset_width + FLAG_WIDTH + self.destination_width
    }

    /// Largest id that fits the id field.
    pub fn max_id(&self) -> u32 {
        max_for_width(self.id_width) as u32
    }

    /// Largest offset that fits the offset field.
    pub fn max_offset(&self) -> usize {
        max_for_width(self.offset_width) as usize
    }

    /// Largest address that fits the destination field.
    pub fn max_destination(&self) -> u32 {
        max_for_width(self.destination_width) as u32
    }
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self {
            id_width: 2,
            offset_width: 4,
            destination_width: 5,
        }
    }
}

fn max_for_width(width: usize) -> u64 {
    10u64.pow(width as u32) - 1
}

/// A network-layer packet: one fragment of a message, or a whole message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message identifier assigned by the sending host
    pub id: u32,

    /// Byte position of `payload` within the original message
    pub offset: usize,

    /// False only on the fragment that ends the message
    pub more_fragments: bool,

    /// Address of the final host
    pub destination: u32,

    /// This fragment's slice of the message
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(
        id: u32,
        offset: usize,
        more_fragments: bool,
        destination: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id,
            offset,
            more_fragments,
            destination,
            payload,
        }
    }

    /// Size of this packet once encoded with `layout`.
    pub fn encoded_len(&self, layout: &HeaderLayout) -> usize {
        layout.header_len() + self.payload.len()
    }

    /// Offset one past the last payload byte.
    pub fn end(&self) -> usize {
        self.offset + self.payload.len()
    }

    /// Serialize this packet into bytes for transmission.
    ///
    /// # Errors
    /// `PacketError::FieldOverflow` if any header value is wider than its
    /// field. Nothing is ever truncated.
    pub fn encode(&self, layout: &HeaderLayout) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.encoded_len(layout));

        push_field(&mut bytes, "id", self.id as u64, layout.id_width)?;
        push_field(&mut bytes, "offset", self.offset as u64, layout.offset_width)?;
        bytes.push(if self.more_fragments { b'1' } else { b'0' });
        push_field(
            &mut bytes,
            "destination",
            self.destination as u64,
            layout.destination_width,
        )?;

        bytes.extend_from_slice(&self.payload);

        Ok(bytes)
    }

    /// Deserialize a packet from bytes.
    ///
    /// # Errors
    /// - `PacketError::TooShort` if the buffer cannot hold the header
    /// - `PacketError::InvalidField` if a numeric field is not all digits
    /// - `PacketError::InvalidFlag` if the flag is not `0` or `1`
    pub fn decode(bytes: &[u8], layout: &HeaderLayout) -> Result<Self> {
        let header_len = layout.header_len();
        if bytes.len() < header_len {
            return Err(PacketError::TooShort {
                required: header_len,
                actual: bytes.len(),
            }
            .into());
        }

        let mut pos = 0;
        let id = parse_field(bytes, &mut pos, "id", layout.id_width)? as u32;
        let offset = parse_field(bytes, &mut pos, "offset", layout.offset_width)? as usize;

        let more_fragments = match bytes[pos] {
            b'0' => false,
            b'1' => true,
            other => return Err(PacketError::InvalidFlag(other).into()),
        };
        pos += FLAG_WIDTH;

        let destination =
            parse_field(bytes, &mut pos, "destination", layout.destination_width)? as u32;

        Ok(Self {
            id,
            offset,
            more_fragments,
            destination,
            payload: bytes[pos..].to_vec(),
        })
    }
}

fn push_field(out: &mut Vec<u8>, field: &'static str, value: u64, width: usize) -> Result<()> {
    if value > max_for_width(width) {
        return Err(PacketError::FieldOverflow {
            field,
            value,
            width,
        }
        .into());
    }
    out.extend_from_slice(format!("{value:0width$}").as_bytes());
    Ok(())
}

fn parse_field(bytes: &[u8], pos: &mut usize, field: &'static str, width: usize) -> Result<u64> {
    let raw = &bytes[*pos..*pos + width];
    *pos += width;

    if !raw.iter().all(u8::is_ascii_digit) {
        return Err(PacketError::InvalidField {
            field,
            raw: String::from_utf8_lossy(raw).into_owned(),
        }
        .into());
    }

    // All digits and at most 18 wide, so this always fits a u64.
    Ok(raw
        .iter()
        .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0')))
}
