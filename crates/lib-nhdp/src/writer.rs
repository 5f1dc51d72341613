//! HELLO emission, one message per interface and address family.

use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_core::timer::TimerWheel;
use wisp_rfc5444::iana;
use wisp_rfc5444::metric;
use wisp_rfc5444::time_tlv;
use wisp_rfc5444::writer::MessageBuilder;
use wisp_rfc5444::EncodeError;

use crate::db::{LinkStatus, NaddrId};
use crate::interfaces::{IfaceId, IfaceMode};
use crate::Nhdp;

/// Which families one interface emits HELLOs for.
pub fn hello_families(mode: IfaceMode) -> &'static [AddrFamily] {
    match mode {
        IfaceMode::Ipv4 => &[AddrFamily::Ipv4],
        IfaceMode::Ipv6 => &[AddrFamily::Ipv6],
        IfaceMode::Dual => &[AddrFamily::Ipv4, AddrFamily::Ipv6],
    }
}

/// Build the HELLO for one interface and message family.
///
/// An IPv6 message of a dual-stack interface carries the IPv4 addresses
/// embedded; an IPv4 message never carries IPv6. Returns `None` when the
/// interface has nothing to say in this family.
pub fn build_hello(
    nhdp: &Nhdp,
    wheel: &TimerWheel,
    iface_id: IfaceId,
    family: AddrFamily,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let iface = nhdp.interfaces.index(iface_id);
    let timers = nhdp.timers;

    let addr_len = family.addr_len() as u8;
    let mut builder = MessageBuilder::new(iana::MSGTYPE_HELLO, addr_len);

    // family the message cannot carry
    let blocked = match (iface.mode, family) {
        (IfaceMode::Ipv4, _) | (_, AddrFamily::Ipv4) => Some(AddrFamily::Ipv6),
        (IfaceMode::Ipv6, _) => Some(AddrFamily::Ipv4),
        _ => None,
    };
    let carries = |addr: &NetAddr| Some(addr.family()) != blocked;

    let originator = nhdp.originator(family);
    if !originator.is_unspec() {
        builder.set_originator(*originator);
    } else if family == AddrFamily::Ipv6 && !nhdp.originator_v4.is_unspec() && blocked.is_none() {
        builder.set_originator(nhdp.originator_v4.embed_ipv4_compatible());
    }

    builder.add_message_tlv(
        iana::MSGTLV_INTERVAL_TIME,
        0,
        &[time_tlv::encode(iface.timing.refresh_interval)],
    );
    builder.add_message_tlv(
        iana::MSGTLV_VALIDITY_TIME,
        0,
        &[time_tlv::encode(iface.timing.h_hold)],
    );
    builder.add_message_tlv(iana::MSGTLV_MPR_WILLING, 0, &[iface.willingness & 0x0f]);

    // local interface addresses, ours first
    for (check_id, check_iface) in nhdp.interfaces.iter() {
        for (addr, &ifaddr_id) in &check_iface.addresses {
            if !carries(addr) {
                continue;
            }
            if nhdp.interfaces.ifaddrs.index(ifaddr_id).removed {
                continue;
            }
            let value = if check_id == iface_id {
                iana::LOCALIF_THIS_IF
            } else {
                iana::LOCALIF_OTHER_IF
            };
            builder.add_address_tlv(*addr, iana::ADDRTLV_LOCAL_IF, 0, &[value]);
        }
    }

    // neighbor addresses with their status
    let naddr_ids: Vec<(NetAddr, NaddrId)> = nhdp
        .db
        .naddr_index
        .iter()
        .map(|(addr, id)| (*addr, *id))
        .collect();
    for (addr, naddr_id) in naddr_ids {
        if !carries(&addr) {
            continue;
        }
        let naddr = nhdp.db.naddrs.index(naddr_id);
        let neighbor = nhdp.db.neighbors.index(naddr.neighbor);
        let lost = nhdp.db.naddr_is_lost(wheel, &timers, naddr_id);

        let laddr = nhdp.interfaces.laddr_lookup(iface_id, &addr);
        let mut link_status: Option<u8> = None;
        let mut other_neigh: Option<u8> = None;

        if lost {
            other_neigh = Some(iana::OTHERNEIGHB_LOST);
        } else {
            if let Some(laddr_id) = laddr {
                let link = nhdp.db.links.index(nhdp.db.laddrs.index(laddr_id).link);
                if link.interface == iface_id {
                    link_status = link.status.tlv_value();
                }
            }
            if neighbor.symmetric > 0 && link_status != Some(iana::LINKSTATUS_SYMMETRIC) {
                other_neigh = Some(iana::OTHERNEIGHB_SYMMETRIC);
            }
        }

        builder.add_address(addr);
        if let Some(value) = link_status {
            builder.add_address_tlv(addr, iana::ADDRTLV_LINK_STATUS, 0, &[value]);
        }
        if let Some(value) = other_neigh {
            builder.add_address_tlv(addr, iana::ADDRTLV_OTHER_NEIGHB, 0, &[value]);
        }

        if let Some(laddr_id) = laddr {
            let link_id = nhdp.db.laddrs.index(laddr_id).link;
            let link = nhdp.db.links.index(link_id);

            // our MPR selection rides on the link addresses
            let flooding = link.flooding_mpr;
            let routing = link.domains.iter().any(|d| d.routing_mpr);
            if flooding || routing {
                let value = match (flooding, routing) {
                    (true, true) => iana::MPR_FLOOD_ROUTE,
                    (true, false) => iana::MPR_FLOODING,
                    _ => iana::MPR_ROUTING,
                };
                builder.add_address_tlv(addr, iana::ADDRTLV_MPR, 0, &[value]);
            }

            // link metrics, compressed: equal encoded costs share a TLV
            for domain in nhdp.domains.iter() {
                let link_usable =
                    matches!(link.status, LinkStatus::Heard | LinkStatus::Symmetric);
                let neigh_usable = neighbor.symmetric > 0
                    && (link_status == Some(iana::LINKSTATUS_SYMMETRIC)
                        || other_neigh == Some(iana::OTHERNEIGHB_SYMMETRIC));

                let data = &link.domains[domain.index];
                let neigh_data = &neighbor.domains[domain.index];
                let direction_flags = [
                    iana::LINKMETRIC_INCOMING_LINK,
                    iana::LINKMETRIC_OUTGOING_LINK,
                    iana::LINKMETRIC_INCOMING_NEIGH,
                    iana::LINKMETRIC_OUTGOING_NEIGH,
                ];
                let costs = [
                    link_usable.then_some(data.metric_in),
                    link_usable.then_some(data.metric_out),
                    neigh_usable.then_some(neigh_data.metric_in),
                    neigh_usable.then_some(neigh_data.metric_out),
                ];

                let mut unsent: Vec<Option<u16>> = costs
                    .iter()
                    .map(|c| c.filter(|c| *c < metric::LINK_COST_INFINITE).map(metric::encode))
                    .collect();

                for i in 0..4 {
                    let Some(encoded) = unsent[i] else {
                        continue;
                    };
                    let mut tlv_value = encoded;
                    for (j, flag) in direction_flags.iter().enumerate().skip(i) {
                        if unsent[j] == Some(encoded) {
                            tlv_value |= *flag;
                            unsent[j] = None;
                        }
                    }
                    builder.add_address_tlv(
                        addr,
                        iana::ADDRTLV_LINK_METRIC,
                        domain.ext,
                        &tlv_value.to_be_bytes(),
                    );
                }
            }
        }
    }

    if !builder.has_addresses() {
        return Ok(None);
    }
    builder.finish().map(Some)
}
