//! UDP discovery: the probe clients broadcast and the fixed-size reply.

/// Every discovery probe starts with these bytes.
pub const DISCOVERY_MAGIC: &[u8] = b"www.usr";

/// Size of a discovery reply.
pub const REPLY_LEN: usize = 0xC4;

const NAME_OFFSET: usize = 0x00;
const SERIAL_OFFSET: usize = 0x92;
const FIELD_LEN: usize = 32;

/// Whether a datagram is a discovery probe.
pub fn is_discovery_request(datagram: &[u8]) -> bool {
    datagram.starts_with(DISCOVERY_MAGIC)
}

/// The identity carried in a discovery reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    /// Printer name.
    pub name: String,
    /// Serial number.
    pub serial_number: String,
}

impl DiscoveryReply {
    /// Encode into the 196-byte reply. Fields are ASCII, null padded, and
    /// truncated to 32 bytes; other characters become `?`.
    pub fn encode(&self) -> [u8; REPLY_LEN] {
        let mut buf = [0u8; REPLY_LEN];
        write_field(&mut buf[NAME_OFFSET..NAME_OFFSET + FIELD_LEN], &self.name);
        write_field(&mut buf[SERIAL_OFFSET..SERIAL_OFFSET + FIELD_LEN], &self.serial_number);
        buf
    }

    /// Decode a reply, as a client would.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < REPLY_LEN {
            return None;
        }

        Some(DiscoveryReply {
            name: read_field(&buf[NAME_OFFSET..NAME_OFFSET + FIELD_LEN]),
            serial_number: read_field(&buf[SERIAL_OFFSET..SERIAL_OFFSET + FIELD_LEN]),
        })
    }
}

fn write_field(dst: &mut [u8], value: &str) {
    for (slot, c) in dst.iter_mut().zip(value.chars()) {
        *slot = if c.is_ascii() { c as u8 } else { b'?' };
    }
}

fn read_field(src: &[u8]) -> String {
    let end = src.iter().position(|b| *b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_reply_layout() {
        let reply = DiscoveryReply {
            name: "Adventurer 5X".to_string(),
            serial_number: "SNMOMC9900728".to_string(),
        };
        let buf = reply.encode();

        assert_eq!(buf.len(), 196);
        assert_eq!(&buf[..13], b"Adventurer 5X");
        assert_eq!(buf[13], 0);
        assert_eq!(&buf[0x92..0x92 + 13], b"SNMOMC9900728");
        assert_eq!(DiscoveryReply::decode(&buf), Some(reply));
    }

    #[test]
    fn test_long_and_non_ascii_fields() {
        let reply = DiscoveryReply {
            name: "Drücker".repeat(10),
            serial_number: "S".to_string(),
        };
        let decoded = DiscoveryReply::decode(&reply.encode()).unwrap();

        assert_eq!(decoded.name.len(), 32);
        assert!(decoded.name.starts_with("Dr?cker"));
    }

    #[test]
    fn test_request_predicate() {
        assert!(is_discovery_request(b"www.usr\x00\x01"));
        assert!(!is_discovery_request(b"www.us"));
        assert!(!is_discovery_request(b"hello"));
    }

    #[test]
    fn test_short_reply() {
        assert_eq!(DiscoveryReply::decode(&[0u8; 10]), None);
    }
}
