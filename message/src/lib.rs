//! Message format of the datagram messaging core.
//!
//! A message is a fixed header followed by an opaque payload. The header
//! carries everything the receive path needs to route a delivery: the
//! sequence number for duplicate suppression and acknowledgment
//! bookkeeping, the payload length, the source and destination ports and a
//! flag byte.
//!
//! Header:
//!
//! ```text
//! 0       8       16      24      32
//! +-------+-------+-------+-------+
//! | sequence number               |
//! |                               |
//! +-------+-------+-------+-------+
//! | length                        |
//! +-------+-------+-------+-------+
//! | source port   | dest port     |
//! +-------+-------+-------+-------+
//! | flags | reserved              |
//! +-------+-------+-------+-------+
//! ```
//!
//! Messages are shared: the sender's retransmit queue holds one reference
//! for the lifetime of the send, delivery wrappers take their own. Cloning
//! the `Arc` the message is handed around in is the only copy that ever
//! happens; the payload itself is never duplicated or mutated in transit.
#![deny(missing_docs)]
#![deny(warnings)]
#![allow(non_local_definitions)]
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use failure::Fail;

/// The length of sequence numbers is chosen so that they never wrap for
/// the lifetime of a connection.
pub type SequenceNumber = u64;

/// Length of the message header in bytes.
pub const HEADER_LEN: usize = 20;

/// Maximum length of a payload.
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

/// The message is a congestion map update, not application data.
pub const FLAG_CONG_BITMAP: u8 = 0x01;

/// Message parse error.
#[derive(Debug, Eq, Fail, PartialEq)]
pub enum MessageError {
    /// Buffer is shorter than a header.
    #[fail(display = "truncated message")]
    Truncated,
    /// Header length field disagrees with the payload.
    #[fail(display = "length mismatch")]
    LengthMismatch,
}

/// Routing header of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    /// Sequence number assigned by the sender.
    pub sequence: SequenceNumber,
    /// Payload length in bytes.
    pub len: u32,
    /// Port of the sending socket.
    pub sport: u16,
    /// Port of the destination socket.
    pub dport: u16,
    /// Flag byte.
    pub flags: u8,
}

impl Header {
    /// Returns true if the message carries a congestion map update.
    pub fn is_cong_update(&self) -> bool {
        self.flags & FLAG_CONG_BITMAP != 0
    }

    /// Appends the wire form of the header to a buffer.
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u64_be(self.sequence);
        buf.put_u32_be(self.len);
        buf.put_u16_be(self.sport);
        buf.put_u16_be(self.dport);
        buf.put_u8(self.flags);
        buf.put_slice(&[0; 3]);
    }

    /// Parses a header from the front of a buffer.
    pub fn read_from(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < HEADER_LEN {
            return Err(MessageError::Truncated);
        }
        Ok(Self {
            sequence: BigEndian::read_u64(&buf[0..8]),
            len: BigEndian::read_u32(&buf[8..12]),
            sport: BigEndian::read_u16(&buf[12..14]),
            dport: BigEndian::read_u16(&buf[14..16]),
            flags: buf[16],
        })
    }
}

/// A reference counted message. Immutable once constructed.
pub struct Message {
    header: Header,
    payload: BytesMut,
}

impl Message {
    /// Creates a data message. The length field is derived from the
    /// payload.
    pub fn new(sequence: SequenceNumber, sport: u16, dport: u16, payload: BytesMut) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        let header = Header {
            sequence,
            len: payload.len() as u32,
            sport,
            dport,
            flags: 0,
        };
        Self { header, payload }
    }

    /// Creates a congestion map update. Carries no payload; the map itself
    /// travels out of band on the transport.
    pub fn cong_update() -> Self {
        let header = Header {
            sequence: 0,
            len: 0,
            sport: 0,
            dport: 0,
            flags: FLAG_CONG_BITMAP,
        };
        Self {
            header,
            payload: BytesMut::new(),
        }
    }

    /// Returns the header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the sequence number.
    pub fn sequence(&self) -> SequenceNumber {
        self.header.sequence
    }

    /// Returns true if the message carries a congestion map update.
    pub fn is_cong_update(&self) -> bool {
        self.header.is_cong_update()
    }

    /// Returns the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encodes the message for a wire transport.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.header.write_to(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    /// Parses a message arriving from a wire transport.
    pub fn parse(mut bytes: BytesMut) -> Result<Self, MessageError> {
        let header = Header::read_from(&bytes)?;
        let payload = bytes.split_off(HEADER_LEN);
        if header.len as usize != payload.len() {
            return Err(MessageError::LengthMismatch);
        }
        Ok(Self { header, payload })
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.debug_struct("Message")
            .field("sequence", &self.header.sequence)
            .field("sport", &self.header.sport)
            .field("dport", &self.header.dport)
            .field("flags", &self.header.flags)
            .field("payload", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_form() {
        let msg = Message::new(7, 4000, 4001, BytesMut::from(&b"ping"[..]));
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        let msg2 = Message::parse(bytes).unwrap();
        assert_eq!(msg2.header(), msg.header());
        assert_eq!(msg2.payload(), b"ping");
    }

    #[test]
    fn test_cong_update() {
        let msg = Message::cong_update();
        assert!(msg.is_cong_update());
        assert_eq!(msg.payload().len(), 0);
        let msg = Message::new(1, 2, 3, BytesMut::from(&b"x"[..]));
        assert!(!msg.is_cong_update());
    }

    #[test]
    fn test_invalid() {
        assert_eq!(
            Message::parse(BytesMut::from(&[0u8; 4][..])).unwrap_err(),
            MessageError::Truncated
        );
        let mut msg = Message::new(1, 2, 3, BytesMut::from(&b"ping"[..])).to_bytes();
        msg.truncate(HEADER_LEN + 2);
        assert_eq!(Message::parse(msg).unwrap_err(), MessageError::LengthMismatch);
    }
}
