use bytes::{Buf, BufMut, Bytes};

use crate::error::{EncodeError, ParseError};

/* TLV flag bits */
const HAS_TYPE_EXT: u8 = 0x80;
const HAS_SINGLE_INDEX: u8 = 0x40;
const HAS_MULTI_INDEX: u8 = 0x20;
const HAS_VALUE: u8 = 0x10;
const HAS_EXT_LEN: u8 = 0x08;
const IS_MULTIVALUE: u8 = 0x04;

/// One decoded TLV.
///
/// For address TLVs the index range selects the addresses of the
/// containing block the TLV applies to; `None` means the whole block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub typ: u8,
    pub ext: u8,
    pub index_start: Option<u8>,
    pub index_stop: Option<u8>,
    pub value: Bytes,
    pub multivalue: bool,
}

impl Tlv {
    pub fn new(typ: u8, ext: u8, value: &[u8]) -> Tlv {
        Tlv {
            typ,
            ext,
            index_start: None,
            index_stop: None,
            value: Bytes::copy_from_slice(value),
            multivalue: false,
        }
    }

    pub fn with_index_range(mut self, start: u8, stop: u8) -> Tlv {
        self.index_start = Some(start);
        self.index_stop = Some(stop);
        self
    }

    /// Resolved index range within a block of `block_len` addresses.
    fn range(&self, block_len: usize) -> (usize, usize) {
        let start = self.index_start.map(usize::from).unwrap_or(0);
        let stop = self
            .index_stop
            .map(usize::from)
            .unwrap_or_else(|| block_len.saturating_sub(1));
        (start, stop)
    }

    pub fn applies_to(&self, index: usize, block_len: usize) -> bool {
        let (start, stop) = self.range(block_len);
        index >= start && index <= stop
    }

    /// The value applicable to one address of the containing block. For a
    /// multivalue TLV this is the per-address slice, otherwise the whole
    /// value.
    pub fn value_for(&self, index: usize, block_len: usize) -> Option<&[u8]> {
        if !self.applies_to(index, block_len) {
            return None;
        }
        if !self.multivalue {
            return Some(&self.value);
        }
        let (start, stop) = self.range(block_len);
        let count = stop - start + 1;
        if count == 0 || self.value.len() % count != 0 {
            return None;
        }
        let chunk = self.value.len() / count;
        let offset = (index - start) * chunk;
        Some(&self.value[offset..offset + chunk])
    }

    fn decode(buf: &mut Bytes) -> Result<Tlv, ParseError> {
        if buf.remaining() < 2 {
            return Err(ParseError::Truncated);
        }
        let typ = buf.get_u8();
        let flags = buf.get_u8();

        let ext = if flags & HAS_TYPE_EXT != 0 {
            if buf.remaining() < 1 {
                return Err(ParseError::Truncated);
            }
            buf.get_u8()
        } else {
            0
        };

        let (index_start, index_stop) = if flags & HAS_MULTI_INDEX != 0 {
            if buf.remaining() < 2 {
                return Err(ParseError::Truncated);
            }
            let start = buf.get_u8();
            let stop = buf.get_u8();
            if stop < start {
                return Err(ParseError::BadTlv("index range inverted"));
            }
            (Some(start), Some(stop))
        } else if flags & HAS_SINGLE_INDEX != 0 {
            if buf.remaining() < 1 {
                return Err(ParseError::Truncated);
            }
            let index = buf.get_u8();
            (Some(index), Some(index))
        } else {
            (None, None)
        };

        let value = if flags & HAS_VALUE != 0 {
            let length = if flags & HAS_EXT_LEN != 0 {
                if buf.remaining() < 2 {
                    return Err(ParseError::Truncated);
                }
                buf.get_u16() as usize
            } else {
                if buf.remaining() < 1 {
                    return Err(ParseError::Truncated);
                }
                buf.get_u8() as usize
            };
            if buf.remaining() < length {
                return Err(ParseError::Truncated);
            }
            buf.split_to(length)
        } else {
            Bytes::new()
        };

        let multivalue = flags & IS_MULTIVALUE != 0;
        if multivalue && index_start.is_none() {
            return Err(ParseError::BadTlv("multivalue without index range"));
        }

        Ok(Tlv {
            typ,
            ext,
            index_start,
            index_stop,
            value,
            multivalue,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let mut flags = 0u8;
        if self.ext != 0 {
            flags |= HAS_TYPE_EXT;
        }
        match (self.index_start, self.index_stop) {
            (Some(a), Some(b)) if a == b => flags |= HAS_SINGLE_INDEX,
            (Some(_), Some(_)) => flags |= HAS_MULTI_INDEX,
            _ => {}
        }
        if !self.value.is_empty() {
            flags |= HAS_VALUE;
            if self.value.len() > 0xffff {
                return Err(EncodeError::TlvValueTooLarge);
            }
            if self.value.len() > 0xff {
                flags |= HAS_EXT_LEN;
            }
        }
        if self.multivalue {
            flags |= IS_MULTIVALUE;
        }

        out.put_u8(self.typ);
        out.put_u8(flags);
        if flags & HAS_TYPE_EXT != 0 {
            out.put_u8(self.ext);
        }
        if flags & HAS_MULTI_INDEX != 0 {
            out.put_u8(self.index_start.unwrap());
            out.put_u8(self.index_stop.unwrap());
        } else if flags & HAS_SINGLE_INDEX != 0 {
            out.put_u8(self.index_start.unwrap());
        }
        if flags & HAS_VALUE != 0 {
            if flags & HAS_EXT_LEN != 0 {
                out.put_u16(self.value.len() as u16);
            } else {
                out.put_u8(self.value.len() as u8);
            }
            out.put_slice(&self.value);
        }
        Ok(())
    }
}

/// Parse a `<tlv-block>`: a 16-bit byte count followed by TLVs.
pub fn decode_block(buf: &mut Bytes) -> Result<Vec<Tlv>, ParseError> {
    if buf.remaining() < 2 {
        return Err(ParseError::Truncated);
    }
    let length = buf.get_u16() as usize;
    if buf.remaining() < length {
        return Err(ParseError::BadTlvBlockLength { length });
    }
    let mut block = buf.split_to(length);
    let mut tlvs = Vec::new();
    while block.has_remaining() {
        tlvs.push(Tlv::decode(&mut block)?);
    }
    Ok(tlvs)
}

pub fn encode_block(tlvs: &[Tlv], out: &mut Vec<u8>) -> Result<(), EncodeError> {
    let mut body = Vec::new();
    for tlv in tlvs {
        tlv.encode(&mut body)?;
    }
    if body.len() > 0xffff {
        return Err(EncodeError::MessageTooLarge);
    }
    out.put_u16(body.len() as u16);
    out.put_slice(&body);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(tlvs: &[Tlv]) -> Vec<Tlv> {
        let mut out = Vec::new();
        encode_block(tlvs, &mut out).unwrap();
        let mut buf = Bytes::from(out);
        let decoded = decode_block(&mut buf).unwrap();
        assert!(!buf.has_remaining());
        decoded
    }

    #[test]
    fn plain_tlv_roundtrip() {
        let tlvs = vec![Tlv::new(1, 0, &[0x42])];
        assert_eq!(roundtrip(&tlvs), tlvs);
    }

    #[test]
    fn ext_and_index_roundtrip() {
        let tlvs = vec![
            Tlv::new(7, 3, &[0x10, 0x20]).with_index_range(1, 4),
            Tlv::new(2, 0, &[]).with_index_range(2, 2),
        ];
        assert_eq!(roundtrip(&tlvs), tlvs);
    }

    #[test]
    fn long_value_uses_extended_length() {
        let value = vec![0xabu8; 300];
        let tlvs = vec![Tlv::new(9, 0, &value)];
        let decoded = roundtrip(&tlvs);
        assert_eq!(decoded[0].value.len(), 300);
    }

    #[test]
    fn multivalue_slicing() {
        let mut tlv = Tlv::new(3, 0, &[1, 2, 3]).with_index_range(2, 4);
        tlv.multivalue = true;
        assert_eq!(tlv.value_for(2, 6), Some(&[1u8][..]));
        assert_eq!(tlv.value_for(4, 6), Some(&[3u8][..]));
        assert_eq!(tlv.value_for(1, 6), None);
    }

    #[test]
    fn truncated_block_rejected() {
        let mut out = Vec::new();
        encode_block(&[Tlv::new(1, 0, &[1, 2, 3])], &mut out).unwrap();
        out.truncate(out.len() - 1);
        // block length now exceeds the remaining bytes
        assert!(decode_block(&mut Bytes::from(out)).is_err());
    }

    #[test]
    fn inverted_index_range_rejected() {
        // type 1, flags multi-index, start 5 stop 2
        let raw: &[u8] = &[0x00, 0x05, 0x01, HAS_MULTI_INDEX, 5, 2];
        assert_eq!(
            decode_block(&mut Bytes::copy_from_slice(raw)),
            Err(ParseError::BadTlv("index range inverted"))
        );
    }
}
