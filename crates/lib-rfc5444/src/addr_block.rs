use bytes::{Buf, BufMut, Bytes};

use wisp_core::addr::NetAddr;

use crate::error::{EncodeError, ParseError};
use crate::tlv::{self, Tlv};

/* address block flag bits */
const HAS_HEAD: u8 = 0x80;
const HAS_FULL_TAIL: u8 = 0x40;
const HAS_ZERO_TAIL: u8 = 0x20;
const HAS_SINGLE_PRELEN: u8 = 0x10;
const HAS_MULTI_PRELEN: u8 = 0x08;

/// One decoded address block with the TLV block that follows it.
///
/// The on-wire head/tail/mid compression is resolved during decode; the
/// addresses carry their per-address prefix length (full length when the
/// block had no prefix vector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrBlock {
    pub addrs: Vec<NetAddr>,
    pub tlvs: Vec<Tlv>,
}

impl AddrBlock {
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn decode(buf: &mut Bytes, addr_len: usize) -> Result<AddrBlock, ParseError> {
        if buf.remaining() < 2 {
            return Err(ParseError::Truncated);
        }
        let num_addr = buf.get_u8() as usize;
        let flags = buf.get_u8();
        if num_addr == 0 {
            return Err(ParseError::BadAddressBlock("empty address block"));
        }
        if flags & HAS_FULL_TAIL != 0 && flags & HAS_ZERO_TAIL != 0 {
            return Err(ParseError::BadAddressBlock("both tail flags set"));
        }

        let head_len = if flags & HAS_HEAD != 0 {
            if buf.remaining() < 1 {
                return Err(ParseError::Truncated);
            }
            buf.get_u8() as usize
        } else {
            0
        };
        let mut head = [0u8; 16];
        if head_len > 0 {
            if head_len >= addr_len {
                return Err(ParseError::BadAddressBlock("head covers whole address"));
            }
            if buf.remaining() < head_len {
                return Err(ParseError::Truncated);
            }
            buf.copy_to_slice(&mut head[..head_len]);
        }

        let (tail_len, tail) = if flags & (HAS_FULL_TAIL | HAS_ZERO_TAIL) != 0 {
            if buf.remaining() < 1 {
                return Err(ParseError::Truncated);
            }
            let tail_len = buf.get_u8() as usize;
            if head_len + tail_len >= addr_len {
                return Err(ParseError::BadAddressBlock("head and tail overlap"));
            }
            let mut tail = [0u8; 16];
            if flags & HAS_FULL_TAIL != 0 && tail_len > 0 {
                if buf.remaining() < tail_len {
                    return Err(ParseError::Truncated);
                }
                buf.copy_to_slice(&mut tail[..tail_len]);
            }
            (tail_len, tail)
        } else {
            (0, [0u8; 16])
        };

        let mid_len = addr_len - head_len - tail_len;
        if buf.remaining() < num_addr * mid_len {
            return Err(ParseError::Truncated);
        }

        let mut raw_addrs = Vec::with_capacity(num_addr);
        for _ in 0..num_addr {
            let mut bytes = [0u8; 16];
            bytes[..head_len].copy_from_slice(&head[..head_len]);
            buf.copy_to_slice(&mut bytes[head_len..head_len + mid_len]);
            bytes[head_len + mid_len..addr_len].copy_from_slice(&tail[..tail_len]);
            raw_addrs.push(bytes);
        }

        let full_prefix = (addr_len * 8) as u8;
        let prefixes: Vec<u8> = if flags & HAS_MULTI_PRELEN != 0 {
            if buf.remaining() < num_addr {
                return Err(ParseError::Truncated);
            }
            (0..num_addr).map(|_| buf.get_u8()).collect()
        } else if flags & HAS_SINGLE_PRELEN != 0 {
            if buf.remaining() < 1 {
                return Err(ParseError::Truncated);
            }
            vec![buf.get_u8(); num_addr]
        } else {
            vec![full_prefix; num_addr]
        };

        let mut addrs = Vec::with_capacity(num_addr);
        for (bytes, prefix) in raw_addrs.iter().zip(&prefixes) {
            let addr = NetAddr::from_binary(&bytes[..addr_len])
                .map_err(|_| ParseError::BadAddressLength(addr_len as u8))?
                .with_prefix(*prefix)
                .map_err(|_| ParseError::BadAddressBlock("prefix length out of range"))?;
            addrs.push(addr);
        }

        let tlvs = tlv::decode_block(buf)?;
        Ok(AddrBlock { addrs, tlvs })
    }

    /// Encode the block with head/tail compression. Addresses must be
    /// sorted and of equal family matching `addr_len`.
    pub fn encode(&self, addr_len: usize, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        if self.addrs.is_empty() {
            return Err(EncodeError::NoAddresses);
        }
        if self.addrs.len() > 255 {
            return Err(EncodeError::MessageTooLarge);
        }
        for addr in &self.addrs {
            if addr.family().addr_len() != addr_len {
                return Err(EncodeError::AddressFamilyMismatch);
            }
        }

        let first = self.addrs[0].octets();
        let (head_len, mut tail_len) = if self.addrs.len() == 1 {
            (0, 0)
        } else {
            let mut head = addr_len - 1;
            let mut tail = addr_len - 1;
            for addr in &self.addrs[1..] {
                let octets = addr.octets();
                head = head.min(common_prefix(first, octets));
                tail = tail.min(common_suffix(first, octets));
            }
            (head, tail)
        };
        if head_len + tail_len >= addr_len {
            // all addresses identical up to one byte; keep one mid byte
            tail_len = addr_len - head_len - 1;
        }
        let tail_len = tail_len;

        let tail_is_zero = first[addr_len - tail_len..].iter().all(|b| *b == 0);

        let full_prefix = (addr_len * 8) as u8;
        let all_full = self.addrs.iter().all(|a| a.prefix_len() == full_prefix);
        let all_same = self
            .addrs
            .iter()
            .all(|a| a.prefix_len() == self.addrs[0].prefix_len());

        let mut flags = 0u8;
        if head_len > 0 {
            flags |= HAS_HEAD;
        }
        if tail_len > 0 {
            flags |= if tail_is_zero {
                HAS_ZERO_TAIL
            } else {
                HAS_FULL_TAIL
            };
        }
        if !all_full {
            flags |= if all_same {
                HAS_SINGLE_PRELEN
            } else {
                HAS_MULTI_PRELEN
            };
        }

        out.put_u8(self.addrs.len() as u8);
        out.put_u8(flags);
        if head_len > 0 {
            out.put_u8(head_len as u8);
            out.put_slice(&first[..head_len]);
        }
        if tail_len > 0 {
            out.put_u8(tail_len as u8);
            if !tail_is_zero {
                out.put_slice(&first[addr_len - tail_len..]);
            }
        }
        for addr in &self.addrs {
            out.put_slice(&addr.octets()[head_len..addr_len - tail_len]);
        }
        if !all_full {
            if all_same {
                out.put_u8(self.addrs[0].prefix_len());
            } else {
                for addr in &self.addrs {
                    out.put_u8(addr.prefix_len());
                }
            }
        }

        tlv::encode_block(&self.tlvs, out)
    }
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn common_suffix(a: &[u8], b: &[u8]) -> usize {
    a.iter()
        .rev()
        .zip(b.iter().rev())
        .take_while(|(x, y)| x == y)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(addrs: &[&str]) -> AddrBlock {
        AddrBlock {
            addrs: addrs.iter().map(|a| a.parse().unwrap()).collect(),
            tlvs: Vec::new(),
        }
    }

    fn roundtrip(block: &AddrBlock, addr_len: usize) -> AddrBlock {
        let mut out = Vec::new();
        block.encode(addr_len, &mut out).unwrap();
        let mut buf = Bytes::from(out);
        let decoded = AddrBlock::decode(&mut buf, addr_len).unwrap();
        assert!(!buf.has_remaining());
        decoded
    }

    #[test]
    fn shared_head_is_compressed() {
        let b = block(&["10.0.0.1", "10.0.0.2", "10.0.0.9"]);
        let mut out = Vec::new();
        b.encode(4, &mut out).unwrap();
        // 2 bytes header + head_len byte + 3 head bytes + 3 mids + empty tlv block
        assert_eq!(out.len(), 2 + 1 + 3 + 3 + 2);
        assert_eq!(roundtrip(&b, 4), b);
    }

    #[test]
    fn single_address_roundtrip() {
        let b = block(&["192.168.1.1"]);
        assert_eq!(roundtrip(&b, 4), b);
    }

    #[test]
    fn prefixes_roundtrip() {
        let b = block(&["10.0.0.0/8", "10.1.0.0/16", "10.2.3.0/24"]);
        assert_eq!(roundtrip(&b, 4), b);

        let same = block(&["10.1.0.0/16", "10.2.0.0/16"]);
        assert_eq!(roundtrip(&same, 4), same);
    }

    #[test]
    fn ipv6_roundtrip() {
        let b = block(&["fe80::1", "fe80::2:3", "fe80::ff:1"]);
        assert_eq!(roundtrip(&b, 16), b);
    }

    #[test]
    fn identical_addresses_keep_one_mid_byte() {
        let b = block(&["10.0.0.1", "10.0.0.1"]);
        assert_eq!(roundtrip(&b, 4), b);
    }

    #[test]
    fn family_mismatch_rejected() {
        let b = block(&["10.0.0.1", "10.0.0.2"]);
        let mut out = Vec::new();
        assert_eq!(
            b.encode(16, &mut out),
            Err(EncodeError::AddressFamilyMismatch)
        );
    }

    #[test]
    fn truncated_mid_rejected() {
        let b = block(&["10.0.0.1", "10.0.0.2"]);
        let mut out = Vec::new();
        b.encode(4, &mut out).unwrap();
        out.truncate(out.len() - 3);
        assert!(AddrBlock::decode(&mut Bytes::from(out), 4).is_err());
    }
}
