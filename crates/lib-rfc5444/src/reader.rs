use wisp_core::addr::NetAddr;

use crate::error::ParseError;
use crate::msg::Message;
use crate::packet::{Packet, PacketMeta};
use crate::tlv::Tlv;

/// What a consumer wants done with the surrounding structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Okay,
    /// Skip the rest of this address, keep the message.
    DropAddress,
    /// Drop the message; consumers that already ran get their end
    /// callback with `dropped = true` so they can undo partial state.
    DropMessage,
    /// Drop the message and ignore the rest of the packet.
    DropPacket,
}

/// One row of a consumer's TLV table: which TLV to resolve into the
/// consumer's [`TlvSet`] slot and the constraints on it.
#[derive(Debug, Clone)]
pub struct TlvSpec {
    pub typ: u8,
    /// Only match this type extension; `None` matches every extension.
    pub ext: Option<u8>,
    pub min_length: usize,
    pub max_length: usize,
    pub mandatory: bool,
}

impl TlvSpec {
    pub fn exact(typ: u8, length: usize) -> TlvSpec {
        TlvSpec {
            typ,
            ext: None,
            min_length: length,
            max_length: length,
            mandatory: false,
        }
    }

    pub fn mandatory(mut self) -> TlvSpec {
        self.mandatory = true;
        self
    }

    pub fn with_ext(mut self, ext: u8) -> TlvSpec {
        self.ext = Some(ext);
        self
    }

    fn matches(&self, tlv: &Tlv) -> bool {
        self.typ == tlv.typ && self.ext.map(|e| e == tlv.ext).unwrap_or(true)
    }
}

/// One TLV resolved for a consumer: the extension it carried and the
/// value applicable in the current context.
#[derive(Debug, Clone, Copy)]
pub struct TlvMatch<'a> {
    pub ext: u8,
    pub value: &'a [u8],
}

/// The resolved TLV table of one consumer, parallel to its spec slice.
/// Slots hold every matching TLV so multi-extension types (LINK_METRIC
/// per domain) are all visible.
#[derive(Debug, Default)]
pub struct TlvSet<'a> {
    slots: Vec<Vec<TlvMatch<'a>>>,
}

impl<'a> TlvSet<'a> {
    /// All matches of slot `i`.
    pub fn all(&self, i: usize) -> &[TlvMatch<'a>] {
        self.slots.get(i).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// First match of slot `i`.
    pub fn get(&self, i: usize) -> Option<&TlvMatch<'a>> {
        self.slots.get(i).and_then(|v| v.first())
    }

    /// Single-byte value of slot `i`, the common case for status TLVs.
    pub fn byte(&self, i: usize) -> Option<u8> {
        self.get(i).and_then(|m| m.value.first().copied())
    }

    /// Big-endian u16 value of slot `i`.
    pub fn u16(&self, i: usize) -> Option<u16> {
        self.get(i)
            .filter(|m| m.value.len() >= 2)
            .map(|m| u16::from_be_bytes([m.value[0], m.value[1]]))
    }
}

/// Message context handed to every callback.
pub struct MessageContext<'a> {
    pub msg: &'a Message,
    pub meta: &'a PacketMeta,
}

/// Address context handed to address callbacks.
#[derive(Debug, Clone, Copy)]
pub struct AddressContext {
    pub addr: NetAddr,
    pub block: usize,
    pub index: usize,
}

/// A prioritized consumer of decoded messages.
///
/// Consumers are stateless with respect to the dispatcher; all protocol
/// state lives in the context type `C` threaded through the callbacks.
pub trait Consumer<C> {
    /// Consumers run in ascending order; message callbacks of one order
    /// run before address callbacks of the same order.
    fn order(&self) -> u32;

    /// Restrict to one message type; `None` consumes everything.
    fn msg_type(&self) -> Option<u8>;

    /// True to receive per-address callbacks instead of the message
    /// callback.
    fn address_consumer(&self) -> bool {
        false
    }

    fn specs(&self) -> Vec<TlvSpec> {
        Vec::new()
    }

    fn on_message(&self, _cx: &mut C, _ctx: &MessageContext<'_>, _tlvs: &TlvSet<'_>) -> Verdict {
        Verdict::Okay
    }

    fn on_address(
        &self,
        _cx: &mut C,
        _ctx: &MessageContext<'_>,
        _actx: &AddressContext,
        _tlvs: &TlvSet<'_>,
    ) -> Verdict {
        Verdict::Okay
    }

    /// Runs for every consumer that was visited, in reverse priority
    /// order, once the message is complete or dropped.
    fn on_message_end(&self, _cx: &mut C, _ctx: &MessageContext<'_>, _dropped: bool) {}
}

/// Decode a packet and run every message through the consumer chain.
///
/// Returns the decoded packet so the caller can feed packet-level
/// observers (sequence number sampling) after dispatch.
pub fn process_packet<C>(
    cx: &mut C,
    consumers: &[&dyn Consumer<C>],
    raw: &[u8],
    meta: &PacketMeta,
) -> Result<Packet, ParseError> {
    let packet = Packet::decode(raw)?;

    let mut order: Vec<usize> = (0..consumers.len()).collect();
    order.sort_by_key(|&i| (consumers[i].order(), consumers[i].address_consumer()));

    'messages: for msg in &packet.messages {
        let selected: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| {
                consumers[i]
                    .msg_type()
                    .map(|t| t == msg.msg_type)
                    .unwrap_or(true)
            })
            .collect();

        let ctx = MessageContext { msg, meta };
        let mut visited = 0usize;
        let mut dropped = false;
        let mut drop_packet = false;

        'consumers: for (position, &ci) in selected.iter().enumerate() {
            visited = position + 1;
            let consumer = consumers[ci];
            let specs = consumer.specs();

            if !consumer.address_consumer() {
                let tlvs = match resolve(&specs, &msg.tlvs, None, 0) {
                    Some(tlvs) => tlvs,
                    None => {
                        // mandatory TLV missing or length constraint hit
                        dropped = true;
                        break 'consumers;
                    }
                };
                match consumer.on_message(cx, &ctx, &tlvs) {
                    Verdict::Okay => {}
                    Verdict::DropAddress => {}
                    Verdict::DropMessage => {
                        dropped = true;
                        break 'consumers;
                    }
                    Verdict::DropPacket => {
                        dropped = true;
                        drop_packet = true;
                        break 'consumers;
                    }
                }
            } else {
                for (block_index, block) in msg.addr_blocks.iter().enumerate() {
                    for (addr_index, addr) in block.addrs.iter().enumerate() {
                        let tlvs =
                            match resolve(&specs, &block.tlvs, Some(addr_index), block.len()) {
                                Some(tlvs) => tlvs,
                                None => {
                                    dropped = true;
                                    break 'consumers;
                                }
                            };
                        let actx = AddressContext {
                            addr: *addr,
                            block: block_index,
                            index: addr_index,
                        };
                        match consumer.on_address(cx, &ctx, &actx, &tlvs) {
                            Verdict::Okay => {}
                            Verdict::DropAddress => continue,
                            Verdict::DropMessage => {
                                dropped = true;
                                break 'consumers;
                            }
                            Verdict::DropPacket => {
                                dropped = true;
                                drop_packet = true;
                                break 'consumers;
                            }
                        }
                    }
                }
            }
        }

        for &ci in selected[..visited].iter().rev() {
            consumers[ci].on_message_end(cx, &ctx, dropped);
        }

        if drop_packet {
            break 'messages;
        }
    }

    Ok(packet)
}

/// Fill a consumer's TLV slots from a TLV block. Returns `None` when a
/// mandatory TLV is missing or a matching TLV violates its length
/// constraints (both drop the message).
fn resolve<'a>(
    specs: &[TlvSpec],
    tlvs: &'a [Tlv],
    addr_index: Option<usize>,
    block_len: usize,
) -> Option<TlvSet<'a>> {
    let mut set = TlvSet {
        slots: Vec::with_capacity(specs.len()),
    };

    for spec in specs {
        let mut matches = Vec::new();
        for tlv in tlvs.iter().filter(|t| spec.matches(t)) {
            let value = match addr_index {
                Some(index) => match tlv.value_for(index, block_len) {
                    Some(value) => value,
                    None => continue,
                },
                None => &tlv.value[..],
            };
            if value.len() < spec.min_length || value.len() > spec.max_length {
                return None;
            }
            matches.push(TlvMatch {
                ext: tlv.ext,
                value,
            });
        }
        if spec.mandatory && matches.is_empty() {
            return None;
        }
        set.slots.push(matches);
    }
    Some(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{MessageBuilder, PacketBuilder};
    use std::cell::RefCell;

    #[derive(Default)]
    struct Log {
        events: RefCell<Vec<String>>,
    }

    struct Recorder {
        name: &'static str,
        order: u32,
        addresses: bool,
        verdict: Verdict,
    }

    impl Consumer<Log> for Recorder {
        fn order(&self) -> u32 {
            self.order
        }
        fn msg_type(&self) -> Option<u8> {
            Some(0)
        }
        fn address_consumer(&self) -> bool {
            self.addresses
        }
        fn on_message(&self, cx: &mut Log, _: &MessageContext<'_>, _: &TlvSet<'_>) -> Verdict {
            cx.events.borrow_mut().push(format!("{}:msg", self.name));
            self.verdict
        }
        fn on_address(
            &self,
            cx: &mut Log,
            _: &MessageContext<'_>,
            actx: &AddressContext,
            _: &TlvSet<'_>,
        ) -> Verdict {
            cx.events
                .borrow_mut()
                .push(format!("{}:addr{}", self.name, actx.index));
            self.verdict
        }
        fn on_message_end(&self, cx: &mut Log, _: &MessageContext<'_>, dropped: bool) {
            cx.events
                .borrow_mut()
                .push(format!("{}:end({})", self.name, dropped));
        }
    }

    fn meta() -> PacketMeta {
        PacketMeta {
            if_index: 1,
            source: "10.0.0.2".parse().unwrap(),
            is_multicast: true,
            pkt_seqno: None,
        }
    }

    fn hello_packet() -> Vec<u8> {
        let mut msg = MessageBuilder::new(0, 4);
        msg.add_address("10.0.0.1".parse().unwrap());
        msg.add_address("10.0.0.2".parse().unwrap());
        let mut pkt = PacketBuilder::new();
        pkt.add_message(msg.finish().unwrap());
        pkt.finish()
    }

    #[test]
    fn consumer_ordering_and_reverse_end() {
        let mut log = Log::default();
        let pass1_msg = Recorder {
            name: "p1m",
            order: 0,
            addresses: false,
            verdict: Verdict::Okay,
        };
        let pass1_addr = Recorder {
            name: "p1a",
            order: 0,
            addresses: true,
            verdict: Verdict::Okay,
        };
        let pass2_msg = Recorder {
            name: "p2m",
            order: 1,
            addresses: false,
            verdict: Verdict::Okay,
        };
        let consumers: [&dyn Consumer<Log>; 3] = [&pass2_msg, &pass1_addr, &pass1_msg];

        process_packet(&mut log, &consumers, &hello_packet(), &meta()).unwrap();

        assert_eq!(
            log.events.into_inner(),
            vec![
                "p1m:msg",
                "p1a:addr0",
                "p1a:addr1",
                "p2m:msg",
                "p2m:end(false)",
                "p1a:end(false)",
                "p1m:end(false)",
            ]
        );
    }

    #[test]
    fn drop_message_notifies_earlier_consumers() {
        let mut log = Log::default();
        let pass1 = Recorder {
            name: "p1",
            order: 0,
            addresses: false,
            verdict: Verdict::Okay,
        };
        let dropper = Recorder {
            name: "p2",
            order: 1,
            addresses: false,
            verdict: Verdict::DropMessage,
        };
        let never = Recorder {
            name: "p3",
            order: 2,
            addresses: false,
            verdict: Verdict::Okay,
        };
        let consumers: [&dyn Consumer<Log>; 3] = [&pass1, &dropper, &never];

        process_packet(&mut log, &consumers, &hello_packet(), &meta()).unwrap();

        assert_eq!(
            log.events.into_inner(),
            vec!["p1:msg", "p2:msg", "p2:end(true)", "p1:end(true)"]
        );
    }

    #[test]
    fn mandatory_tlv_missing_drops_message() {
        struct Strict;
        impl Consumer<Log> for Strict {
            fn order(&self) -> u32 {
                0
            }
            fn msg_type(&self) -> Option<u8> {
                Some(0)
            }
            fn specs(&self) -> Vec<TlvSpec> {
                vec![TlvSpec::exact(1, 1).mandatory()]
            }
            fn on_message(
                &self,
                cx: &mut Log,
                _: &MessageContext<'_>,
                _: &TlvSet<'_>,
            ) -> Verdict {
                cx.events.borrow_mut().push("ran".into());
                Verdict::Okay
            }
            fn on_message_end(&self, cx: &mut Log, _: &MessageContext<'_>, dropped: bool) {
                cx.events.borrow_mut().push(format!("end({})", dropped));
            }
        }

        let mut log = Log::default();
        let strict = Strict;
        let consumers: [&dyn Consumer<Log>; 1] = [&strict];
        process_packet(&mut log, &consumers, &hello_packet(), &meta()).unwrap();

        assert_eq!(log.events.into_inner(), vec!["end(true)"]);
    }
}
