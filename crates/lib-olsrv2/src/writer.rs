//! TC emission: our advertised neighborhood and attached networks.

use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_nhdp::Nhdp;
use wisp_rfc5444::iana;
use wisp_rfc5444::metric;
use wisp_rfc5444::time_tlv;
use wisp_rfc5444::writer::MessageBuilder;
use wisp_rfc5444::EncodeError;

use crate::Olsrv2;

/// Default hop limit of generated TCs.
const TC_HOP_LIMIT: u8 = 255;

/// Build the TC message for one address family. Returns `None` when no
/// originator of that family is configured. An empty TC (no neighbors,
/// no attached networks) is still emitted: it flushes remote state.
pub fn build_tc(
    olsrv2: &mut Olsrv2,
    nhdp: &Nhdp,
    family: AddrFamily,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let originator = *olsrv2.originators.get(family);
    if originator.is_unspec() {
        return Ok(None);
    }

    let addr_len = family.addr_len() as u8;
    let mut builder = MessageBuilder::new(iana::MSGTYPE_TC, addr_len);
    builder.set_originator(originator);
    builder.set_hop_limit(TC_HOP_LIMIT);
    builder.set_hop_count(0);
    builder.set_seqno(olsrv2.next_msg_seqno());

    builder.add_message_tlv(
        iana::MSGTLV_INTERVAL_TIME,
        0,
        &[time_tlv::encode(olsrv2.config.tc_interval)],
    );
    builder.add_message_tlv(
        iana::MSGTLV_VALIDITY_TIME,
        0,
        &[time_tlv::encode(olsrv2.config.tc_validity)],
    );
    builder.add_message_tlv(
        iana::MSGTLV_CONT_SEQ_NUM,
        0,
        &olsrv2.ansn.to_be_bytes(),
    );

    let carries = |addr: &NetAddr| {
        addr.family() == family || (family == AddrFamily::Ipv6 && addr.family() == AddrFamily::Ipv4)
    };

    // advertised neighbors: every symmetric neighbor's originator and
    // routable addresses
    for (_, neighbor) in nhdp.db.neighbors.iter() {
        if neighbor.symmetric == 0 {
            continue;
        }

        let metric_tlvs: Vec<(u8, [u8; 2])> = nhdp
            .domains
            .iter()
            .filter_map(|domain| {
                let cost = neighbor.domains[domain.index].metric_out;
                if cost >= metric::LINK_COST_INFINITE {
                    return None;
                }
                let value = iana::LINKMETRIC_OUTGOING_NEIGH | metric::encode(cost);
                Some((domain.ext, value.to_be_bytes()))
            })
            .collect();

        if !neighbor.originator.is_unspec() && carries(&neighbor.originator) {
            let routable = olsrv2.config.routable.check(&neighbor.originator);
            let value = if routable {
                iana::NBR_ADDR_TYPE_ROUTABLE_ORIG
            } else {
                iana::NBR_ADDR_TYPE_ORIGINATOR
            };
            builder.add_address_tlv(
                neighbor.originator,
                iana::ADDRTLV_NBR_ADDR_TYPE,
                0,
                &[value],
            );
            for (ext, bytes) in &metric_tlvs {
                builder.add_address_tlv(
                    neighbor.originator,
                    iana::ADDRTLV_LINK_METRIC,
                    *ext,
                    bytes,
                );
            }
        }

        for addr in neighbor.addresses.keys() {
            if *addr == neighbor.originator || !carries(addr) {
                continue;
            }
            if !olsrv2.config.routable.check(addr) {
                continue;
            }
            builder.add_address_tlv(*addr, iana::ADDRTLV_NBR_ADDR_TYPE, 0, &[
                iana::NBR_ADDR_TYPE_ROUTABLE,
            ]);
            for (ext, bytes) in &metric_tlvs {
                builder.add_address_tlv(*addr, iana::ADDRTLV_LINK_METRIC, *ext, bytes);
            }
        }
    }

    // locally attached networks
    for (prefix, entry) in olsrv2.lans.iter() {
        if !carries(prefix) {
            continue;
        }
        let Some(first_active) = entry.data.iter().position(|d| d.active) else {
            continue;
        };
        builder.add_address_tlv(*prefix, iana::ADDRTLV_GATEWAY, 0, &[
            entry.data[first_active].distance,
        ]);
        for domain in nhdp.domains.iter() {
            let data = &entry.data[domain.index];
            if !data.active {
                continue;
            }
            let value = iana::LINKMETRIC_OUTGOING_NEIGH | metric::encode(data.outgoing_metric);
            builder.add_address_tlv(
                *prefix,
                iana::ADDRTLV_LINK_METRIC,
                domain.ext,
                &value.to_be_bytes(),
            );
        }
    }

    builder.finish().map(Some)
}
