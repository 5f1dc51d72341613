use bytes::{Buf, Bytes};

use wisp_core::addr::NetAddr;

use crate::addr_block::AddrBlock;
use crate::error::ParseError;
use crate::tlv::{self, Tlv};

/* message flag bits (high nibble of the flags/addr-length byte) */
const HAS_ORIG: u8 = 0x80;
const HAS_HOP_LIMIT: u8 = 0x40;
const HAS_HOP_COUNT: u8 = 0x20;
const HAS_SEQNO: u8 = 0x10;

/// One decoded RFC 5444 message.
///
/// `raw` keeps the undecoded bytes so a message selected for forwarding
/// can be re-emitted without a re-encode; only the hop fields are patched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: u8,
    pub addr_len: u8,
    pub originator: Option<NetAddr>,
    pub hop_limit: Option<u8>,
    pub hop_count: Option<u8>,
    pub seqno: Option<u16>,
    pub tlvs: Vec<Tlv>,
    pub addr_blocks: Vec<AddrBlock>,
    pub raw: Bytes,
}

impl Message {
    /// Decode one message from the front of `buf`. Consumes exactly the
    /// number of bytes announced in the message size field.
    pub fn decode(buf: &mut Bytes) -> Result<Message, ParseError> {
        if buf.remaining() < 4 {
            return Err(ParseError::Truncated);
        }
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if size < 4 || size > buf.remaining() {
            return Err(ParseError::BadMessageSize {
                size,
                remaining: buf.remaining(),
            });
        }
        let raw = buf.split_to(size);
        let mut body = raw.clone();

        let msg_type = body.get_u8();
        let flags_addrlen = body.get_u8();
        body.advance(2); // size, already read

        let flags = flags_addrlen & 0xf0;
        let addr_len = (flags_addrlen & 0x0f) + 1;
        if !matches!(addr_len, 4 | 6 | 8 | 16) {
            return Err(ParseError::BadAddressLength(addr_len));
        }

        let originator = if flags & HAS_ORIG != 0 {
            if body.remaining() < addr_len as usize {
                return Err(ParseError::Truncated);
            }
            let mut bin = [0u8; 16];
            body.copy_to_slice(&mut bin[..addr_len as usize]);
            Some(
                NetAddr::from_binary(&bin[..addr_len as usize])
                    .map_err(|_| ParseError::BadAddressLength(addr_len))?,
            )
        } else {
            None
        };

        let hop_limit = if flags & HAS_HOP_LIMIT != 0 {
            if body.remaining() < 1 {
                return Err(ParseError::Truncated);
            }
            Some(body.get_u8())
        } else {
            None
        };

        let hop_count = if flags & HAS_HOP_COUNT != 0 {
            if body.remaining() < 1 {
                return Err(ParseError::Truncated);
            }
            Some(body.get_u8())
        } else {
            None
        };

        let seqno = if flags & HAS_SEQNO != 0 {
            if body.remaining() < 2 {
                return Err(ParseError::Truncated);
            }
            Some(body.get_u16())
        } else {
            None
        };

        let tlvs = tlv::decode_block(&mut body)?;

        let mut addr_blocks = Vec::new();
        while body.has_remaining() {
            addr_blocks.push(AddrBlock::decode(&mut body, addr_len as usize)?);
        }

        Ok(Message {
            msg_type,
            addr_len,
            originator,
            hop_limit,
            hop_count,
            seqno,
            tlvs,
            addr_blocks,
            raw,
        })
    }

    /// Find a message TLV by type (and extension, when given).
    pub fn find_tlv(&self, typ: u8, ext: Option<u8>) -> Option<&Tlv> {
        self.tlvs
            .iter()
            .find(|t| t.typ == typ && ext.map(|e| t.ext == e).unwrap_or(true))
    }

    /// Produce the forwarded form of this message: hop limit decremented,
    /// hop count incremented, everything else byte-identical. Returns
    /// `None` when the hop limit forbids another hop.
    pub fn forwarded_raw(&self) -> Option<Vec<u8>> {
        if let Some(limit) = self.hop_limit {
            if limit <= 1 {
                return None;
            }
        }

        let mut out = self.raw.to_vec();
        let flags = out[1] & 0xf0;
        let mut offset = 4usize;
        if flags & HAS_ORIG != 0 {
            offset += self.addr_len as usize;
        }
        if flags & HAS_HOP_LIMIT != 0 {
            out[offset] -= 1;
            offset += 1;
        }
        if flags & HAS_HOP_COUNT != 0 {
            out[offset] = out[offset].saturating_add(1);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::MessageBuilder;

    #[test]
    fn forwarding_patches_hop_fields() {
        let mut builder = MessageBuilder::new(1, 4);
        builder.set_originator("10.0.0.9".parse().unwrap());
        builder.set_hop_limit(255);
        builder.set_hop_count(0);
        builder.set_seqno(42);
        builder.add_address("10.0.0.1".parse().unwrap());
        let raw = builder.finish().unwrap();

        let msg = Message::decode(&mut Bytes::from(raw)).unwrap();
        let fwd = msg.forwarded_raw().unwrap();
        let fwd_msg = Message::decode(&mut Bytes::from(fwd)).unwrap();

        assert_eq!(fwd_msg.hop_limit, Some(254));
        assert_eq!(fwd_msg.hop_count, Some(1));
        assert_eq!(fwd_msg.seqno, Some(42));
        assert_eq!(fwd_msg.originator, msg.originator);
        assert_eq!(fwd_msg.addr_blocks, msg.addr_blocks);
    }

    #[test]
    fn exhausted_hop_limit_stops_forwarding() {
        let mut builder = MessageBuilder::new(1, 4);
        builder.set_hop_limit(1);
        builder.add_address("10.0.0.1".parse().unwrap());
        let raw = builder.finish().unwrap();

        let msg = Message::decode(&mut Bytes::from(raw)).unwrap();
        assert!(msg.forwarded_raw().is_none());
    }
}
