use bytes::{Buf, Bytes};

use wisp_core::addr::NetAddr;

use crate::error::ParseError;
use crate::msg::Message;
use crate::tlv::{self, Tlv};

/* packet flag bits (low nibble of the version/flags byte) */
pub(crate) const HAS_SEQNO: u8 = 0x08;
pub(crate) const HAS_TLV: u8 = 0x04;

/// Where a packet came from. Filled by the socket layer, consulted by the
/// protocol consumers (multicast checks, previous-hop resolution) and the
/// packet-sequence-number listeners of the metric plug-ins.
#[derive(Debug, Clone)]
pub struct PacketMeta {
    pub if_index: u32,
    pub source: NetAddr,
    pub is_multicast: bool,
    pub pkt_seqno: Option<u16>,
}

/// A decoded packet: optional sequence number, optional packet TLVs, and
/// the messages that survived decoding.
///
/// A malformed message is dropped on its own; the remaining messages of
/// the packet are still delivered. Only damage to the framing itself
/// (bad version, impossible message size) fails the whole packet.
#[derive(Debug, PartialEq, Eq)]
pub struct Packet {
    pub seqno: Option<u16>,
    pub tlvs: Vec<Tlv>,
    pub messages: Vec<Message>,
}

impl Packet {
    pub fn decode(raw: &[u8]) -> Result<Packet, ParseError> {
        let mut buf = Bytes::copy_from_slice(raw);
        if buf.remaining() < 1 {
            return Err(ParseError::Truncated);
        }

        let header = buf.get_u8();
        let version = header >> 4;
        if version != 0 {
            return Err(ParseError::BadVersion(version));
        }

        let seqno = if header & HAS_SEQNO != 0 {
            if buf.remaining() < 2 {
                return Err(ParseError::Truncated);
            }
            Some(buf.get_u16())
        } else {
            None
        };

        let tlvs = if header & HAS_TLV != 0 {
            tlv::decode_block(&mut buf)?
        } else {
            Vec::new()
        };

        let mut messages = Vec::new();
        while buf.has_remaining() {
            match Message::decode(&mut buf) {
                Ok(msg) => messages.push(msg),
                Err(err @ ParseError::BadMessageSize { .. }) => {
                    // framing is gone, nothing else in this packet is
                    // trustworthy
                    return Err(err);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "dropping malformed message");
                    // skip: Message::decode consumed the sized slice
                    // before failing, unless the header itself was short
                    if buf.remaining() < 4 {
                        break;
                    }
                }
            }
        }

        Ok(Packet {
            seqno,
            tlvs,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{MessageBuilder, PacketBuilder};

    #[test]
    fn packet_roundtrip() {
        let mut msg = MessageBuilder::new(0, 4);
        msg.add_address("10.0.0.1".parse().unwrap());

        let mut pkt = PacketBuilder::new();
        pkt.set_seqno(0x1234);
        pkt.add_message(msg.finish().unwrap());
        let raw = pkt.finish();

        let decoded = Packet::decode(&raw).unwrap();
        assert_eq!(decoded.seqno, Some(0x1234));
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.messages[0].msg_type, 0);
    }

    #[test]
    fn bad_version_rejected() {
        assert_eq!(Packet::decode(&[0x30]), Err(ParseError::BadVersion(3)));
    }

    #[test]
    fn malformed_message_does_not_take_packet_down() {
        let mut good = MessageBuilder::new(1, 4);
        good.add_address("10.0.0.2".parse().unwrap());
        let good_raw = good.finish().unwrap();

        // hand-build a sized message whose TLV block length lies
        let mut raw = vec![0u8]; // packet header, no seqno, no tlvs
        raw.extend_from_slice(&[0u8, 0x03, 0, 8, 0, 99, 0, 0]);
        raw.extend_from_slice(&good_raw);

        let decoded = Packet::decode(&raw).unwrap();
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.messages[0].msg_type, 1);
    }
}
