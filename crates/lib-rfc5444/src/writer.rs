use std::collections::BTreeMap;

use bytes::BufMut;

use wisp_core::addr::NetAddr;

use crate::addr_block::AddrBlock;
use crate::error::EncodeError;
use crate::packet;
use crate::tlv::{self, Tlv};

/* message flag bits, shared layout with the decoder */
const HAS_ORIG: u8 = 0x80;
const HAS_HOP_LIMIT: u8 = 0x40;
const HAS_HOP_COUNT: u8 = 0x20;
const HAS_SEQNO: u8 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingTlv {
    typ: u8,
    ext: u8,
    value: Vec<u8>,
}

/// Composes one RFC 5444 message.
///
/// Content providers add message TLVs, addresses, and per-address TLV
/// values in any order; `finish` sorts the addresses, merges runs of
/// identical per-address values into ranged TLVs and performs the
/// head/tail address compression.
pub struct MessageBuilder {
    msg_type: u8,
    addr_len: u8,
    originator: Option<NetAddr>,
    hop_limit: Option<u8>,
    hop_count: Option<u8>,
    seqno: Option<u16>,
    tlvs: Vec<Tlv>,
    addrs: BTreeMap<NetAddr, Vec<PendingTlv>>,
}

impl MessageBuilder {
    pub fn new(msg_type: u8, addr_len: u8) -> MessageBuilder {
        MessageBuilder {
            msg_type,
            addr_len,
            originator: None,
            hop_limit: None,
            hop_count: None,
            seqno: None,
            tlvs: Vec::new(),
            addrs: BTreeMap::new(),
        }
    }

    pub fn addr_len(&self) -> u8 {
        self.addr_len
    }

    pub fn set_originator(&mut self, originator: NetAddr) {
        self.originator = Some(originator);
    }

    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.hop_limit = Some(hop_limit);
    }

    pub fn set_hop_count(&mut self, hop_count: u8) {
        self.hop_count = Some(hop_count);
    }

    pub fn set_seqno(&mut self, seqno: u16) {
        self.seqno = Some(seqno);
    }

    pub fn add_message_tlv(&mut self, typ: u8, ext: u8, value: &[u8]) {
        self.tlvs.push(Tlv::new(typ, ext, value));
    }

    /// Register an address; embeds IPv4 into the compatible IPv6 form
    /// when the message is IPv6-sized.
    pub fn add_address(&mut self, addr: NetAddr) -> NetAddr {
        let addr = self.convert(addr);
        self.addrs.entry(addr).or_default();
        addr
    }

    pub fn add_address_tlv(&mut self, addr: NetAddr, typ: u8, ext: u8, value: &[u8]) {
        let addr = self.convert(addr);
        self.addrs.entry(addr).or_default().push(PendingTlv {
            typ,
            ext,
            value: value.to_vec(),
        });
    }

    fn convert(&self, addr: NetAddr) -> NetAddr {
        if self.addr_len == 16 && addr.family().addr_len() == 4 {
            addr.embed_ipv4_compatible()
        } else {
            addr
        }
    }

    pub fn has_addresses(&self) -> bool {
        !self.addrs.is_empty()
    }

    pub fn finish(self) -> Result<Vec<u8>, EncodeError> {
        let addr_len = self.addr_len as usize;

        let mut flags = 0u8;
        if self.originator.is_some() {
            flags |= HAS_ORIG;
        }
        if self.hop_limit.is_some() {
            flags |= HAS_HOP_LIMIT;
        }
        if self.hop_count.is_some() {
            flags |= HAS_HOP_COUNT;
        }
        if self.seqno.is_some() {
            flags |= HAS_SEQNO;
        }

        let mut out = Vec::new();
        out.put_u8(self.msg_type);
        out.put_u8(flags | (self.addr_len - 1));
        out.put_u16(0); // size, patched below

        if let Some(originator) = self.originator {
            let originator = self.convert(originator);
            if originator.family().addr_len() != addr_len {
                return Err(EncodeError::AddressFamilyMismatch);
            }
            out.put_slice(originator.octets());
        }
        if let Some(hop_limit) = self.hop_limit {
            out.put_u8(hop_limit);
        }
        if let Some(hop_count) = self.hop_count {
            out.put_u8(hop_count);
        }
        if let Some(seqno) = self.seqno {
            out.put_u16(seqno);
        }

        tlv::encode_block(&self.tlvs, &mut out)?;

        // the BTreeMap already holds the canonical address order
        let addrs: Vec<NetAddr> = self.addrs.keys().copied().collect();
        for chunk_start in (0..addrs.len()).step_by(255) {
            let chunk = &addrs[chunk_start..(chunk_start + 255).min(addrs.len())];
            let mut block = AddrBlock {
                addrs: chunk.to_vec(),
                tlvs: Vec::new(),
            };
            block.tlvs = merge_address_tlvs(&self.addrs, chunk);
            block.encode(addr_len, &mut out)?;
        }

        if out.len() > 0xffff {
            return Err(EncodeError::MessageTooLarge);
        }
        let size = (out.len() as u16).to_be_bytes();
        out[2] = size[0];
        out[3] = size[1];
        Ok(out)
    }
}

/// Merge per-address TLV values into block TLVs: a run of consecutive
/// addresses sharing the same (type, ext, value) becomes one TLV with an
/// index range.
fn merge_address_tlvs(addrs: &BTreeMap<NetAddr, Vec<PendingTlv>>, chunk: &[NetAddr]) -> Vec<Tlv> {
    struct Run {
        tlv: PendingTlv,
        start: u8,
        stop: u8,
    }

    fn close(run: Run) -> Tlv {
        Tlv::new(run.tlv.typ, run.tlv.ext, &run.tlv.value).with_index_range(run.start, run.stop)
    }

    let mut tlvs: Vec<Tlv> = Vec::new();
    let mut open: Vec<Run> = Vec::new();

    for (index, addr) in chunk.iter().enumerate() {
        let index = index as u8;
        let pending = &addrs[addr];

        // runs not continued by this address are closed
        let mut continued = Vec::new();
        for mut run in open.drain(..) {
            if pending.contains(&run.tlv) {
                run.stop = index;
                continued.push(run);
            } else {
                tlvs.push(close(run));
            }
        }
        open = continued;

        for tlv in pending {
            if !open.iter().any(|run| run.tlv == *tlv && run.stop == index) {
                open.push(Run {
                    tlv: tlv.clone(),
                    start: index,
                    stop: index,
                });
            }
        }
    }

    tlvs.extend(open.into_iter().map(close));
    tlvs.sort_by(|a, b| {
        (a.typ, a.ext, a.index_start)
            .cmp(&(b.typ, b.ext, b.index_start))
    });
    tlvs
}

/// Composes one packet out of finished messages.
pub struct PacketBuilder {
    seqno: Option<u16>,
    messages: Vec<Vec<u8>>,
}

impl Default for PacketBuilder {
    fn default() -> Self {
        PacketBuilder::new()
    }
}

impl PacketBuilder {
    pub fn new() -> PacketBuilder {
        PacketBuilder {
            seqno: None,
            messages: Vec::new(),
        }
    }

    pub fn set_seqno(&mut self, seqno: u16) {
        self.seqno = Some(seqno);
    }

    pub fn add_message(&mut self, raw: Vec<u8>) {
        self.messages.push(raw);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut header = 0u8;
        if self.seqno.is_some() {
            header |= packet::HAS_SEQNO;
        }
        out.put_u8(header);
        if let Some(seqno) = self.seqno {
            out.put_u16(seqno);
        }
        for msg in self.messages {
            out.put_slice(&msg);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::Message;
    use bytes::Bytes;

    #[test]
    fn identical_values_merge_into_one_ranged_tlv() {
        let mut builder = MessageBuilder::new(0, 4);
        for addr in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            builder.add_address_tlv(addr.parse().unwrap(), 3, 0, &[1]);
        }
        builder.add_address_tlv("10.0.0.4".parse().unwrap(), 3, 0, &[2]);

        let raw = builder.finish().unwrap();
        let msg = Message::decode(&mut Bytes::from(raw)).unwrap();
        let block = &msg.addr_blocks[0];

        assert_eq!(block.addrs.len(), 4);
        assert_eq!(block.tlvs.len(), 2);
        assert_eq!(block.tlvs[0].index_start, Some(0));
        assert_eq!(block.tlvs[0].index_stop, Some(2));
        assert_eq!(&block.tlvs[0].value[..], &[1]);
        assert_eq!(block.tlvs[1].index_start, Some(3));
        assert_eq!(&block.tlvs[1].value[..], &[2]);
    }

    #[test]
    fn v4_addresses_embed_into_v6_messages() {
        let mut builder = MessageBuilder::new(0, 16);
        builder.add_address("10.0.0.1".parse().unwrap());
        builder.add_address("fe80::1".parse().unwrap());

        let raw = builder.finish().unwrap();
        let msg = Message::decode(&mut Bytes::from(raw)).unwrap();
        let addrs = &msg.addr_blocks[0].addrs;
        assert_eq!(addrs.len(), 2);
        assert!(addrs[0].is_ipv4_compatible());
        assert_eq!(
            addrs[0].extract_ipv4_compatible(),
            "10.0.0.1".parse().unwrap()
        );
    }

    #[test]
    fn reencode_is_byte_identical() {
        let mut builder = MessageBuilder::new(0, 4);
        builder.set_originator("10.0.0.9".parse().unwrap());
        builder.set_seqno(77);
        builder.add_message_tlv(1, 0, &[0x68]);
        builder.add_address_tlv("10.0.0.1".parse().unwrap(), 2, 0, &[0]);
        builder.add_address_tlv("10.0.0.2".parse().unwrap(), 3, 0, &[1]);
        builder.add_address_tlv("10.0.0.2".parse().unwrap(), 7, 1, &[0x10, 0x01]);
        let raw = builder.finish().unwrap();

        // feed the decoded form back through a builder
        let msg = Message::decode(&mut Bytes::copy_from_slice(&raw)).unwrap();
        let mut again = MessageBuilder::new(msg.msg_type, msg.addr_len);
        if let Some(orig) = msg.originator {
            again.set_originator(orig);
        }
        if let Some(seqno) = msg.seqno {
            again.set_seqno(seqno);
        }
        for tlv in &msg.tlvs {
            again.add_message_tlv(tlv.typ, tlv.ext, &tlv.value);
        }
        for block in &msg.addr_blocks {
            for (index, addr) in block.addrs.iter().enumerate() {
                again.add_address(*addr);
                for tlv in &block.tlvs {
                    if let Some(value) = tlv.value_for(index, block.addrs.len()) {
                        again.add_address_tlv(*addr, tlv.typ, tlv.ext, value);
                    }
                }
            }
        }

        assert_eq!(again.finish().unwrap(), raw);
    }
}
