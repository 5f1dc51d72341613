//! Two-pass HELLO ingest.
//!
//! Pass 1 classifies: it walks the LOCAL_IF and LINK_STATUS TLVs to find
//! out which existing link and neighbor this HELLO belongs to, detecting
//! conflicts (one HELLO merging previously separate neighbors). Pass 2
//! binds or creates the link/neighbor, updates addresses, 2-hop entries,
//! MPR selector state and link metrics, and finally applies the RFC 6130
//! section 12.5.4 timer rules. A message dropped halfway leaves no new
//! objects behind.

use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_rfc5444::iana;
use wisp_rfc5444::reader::{AddressContext, Consumer, MessageContext, TlvSet, TlvSpec, Verdict};
use wisp_rfc5444::time_tlv;

use crate::db::{LaddrId, LinkId, LinkStatus, NaddrId, NeighborId};
use crate::domain::split_metric_tlv;
use crate::interfaces::{IfaceId, IfaceMode};
use crate::{Nhdp, NhdpContext, NhdpEvent};

/* pass 1 message TLV slots */
const IDX_TLV_ITIME: usize = 0;
const IDX_TLV_VTIME: usize = 1;

/* pass 1 address TLV slots */
const IDX_ADDRTLV1_LOCAL_IF: usize = 0;
const IDX_ADDRTLV1_LINK_STATUS: usize = 1;

/* pass 2 message TLV slots */
const IDX_TLV2_WILLINGNESS: usize = 0;

/* pass 2 address TLV slots */
const IDX_ADDRTLV2_LOCAL_IF: usize = 0;
const IDX_ADDRTLV2_LINK_STATUS: usize = 1;
const IDX_ADDRTLV2_OTHER_NEIGHB: usize = 2;
const IDX_ADDRTLV2_MPR: usize = 3;
const IDX_ADDRTLV2_LINK_METRIC: usize = 4;

/// State of the HELLO currently in flight between the passes.
#[derive(Debug)]
pub(crate) struct HelloCurrent {
    pub iface: IfaceId,
    pub neighbor: Option<NeighborId>,
    pub link: Option<LinkId>,
    pub created_neighbor: bool,
    pub created_link: bool,
    /// Neighbors this HELLO revealed to be the same router as the bound
    /// one; pass 2 merges them onto it.
    pub join: Vec<NeighborId>,
    pub laddr_conflict: bool,
    pub link_heard: bool,
    pub link_lost: bool,
    pub has_thisif: bool,
    pub has_ipv4: bool,
    pub has_ipv6: bool,
    pub vtime: u64,
    pub itime: u64,
}

/// The four HELLO consumers in registration form.
pub struct HelloReader {
    pub pass1_msg: HelloPass1Msg,
    pub pass1_addr: HelloPass1Addr,
    pub pass2_msg: HelloPass2Msg,
    pub pass2_addr: HelloPass2Addr,
}

impl Default for HelloReader {
    fn default() -> Self {
        HelloReader::new()
    }
}

impl HelloReader {
    pub fn new() -> HelloReader {
        HelloReader {
            pass1_msg: HelloPass1Msg,
            pass1_addr: HelloPass1Addr,
            pass2_msg: HelloPass2Msg,
            pass2_addr: HelloPass2Addr,
        }
    }

    pub fn consumers<'a, C: NhdpContext>(&'a self) -> [&'a dyn Consumer<C>; 4] {
        [
            &self.pass1_msg,
            &self.pass1_addr,
            &self.pass2_msg,
            &self.pass2_addr,
        ]
    }
}

/// Translate a HELLO address into the form the database holds: embedded
/// IPv4 extracted, families the interface does not speak filtered out.
fn parse_hello_addr(mode: IfaceMode, addr: NetAddr) -> Option<NetAddr> {
    if addr.is_ipv4_compatible() {
        if mode == IfaceMode::Ipv6 {
            return None;
        }
        return Some(addr.extract_ipv4_compatible());
    }
    if !mode.accepts(addr.family()) {
        return None;
    }
    Some(addr)
}

/// Remove the partially built link/neighbor after a mid-message drop.
fn rollback(nhdp: &mut Nhdp, wheel: &mut wisp_core::timer::TimerWheel, now: u64) {
    let Some(current) = nhdp.current.take() else {
        return;
    };
    let timers = nhdp.timers;
    if current.created_link {
        if let Some(link) = current.link {
            if nhdp.db.links.contains(link) {
                nhdp.db
                    .link_remove(wheel, &timers, &mut nhdp.interfaces, now, link);
                nhdp.events.push(NhdpEvent::LinkRemoved(link));
            }
        }
    }
    if current.created_neighbor {
        if let Some(neighbor) = current.neighbor {
            if nhdp.db.neighbors.contains(neighbor) {
                nhdp.db
                    .neighbor_remove(wheel, &timers, &mut nhdp.interfaces, now, neighbor);
            }
        }
    }
}

pub struct HelloPass1Msg;

impl<C: NhdpContext> Consumer<C> for HelloPass1Msg {
    fn order(&self) -> u32 {
        0
    }

    fn msg_type(&self) -> Option<u8> {
        Some(iana::MSGTYPE_HELLO)
    }

    fn specs(&self) -> Vec<TlvSpec> {
        vec![
            TlvSpec::exact(iana::MSGTLV_INTERVAL_TIME, 1)
                .with_ext(0)
                .mandatory(),
            TlvSpec::exact(iana::MSGTLV_VALIDITY_TIME, 1)
                .with_ext(0)
                .mandatory(),
        ]
    }

    fn on_message(&self, cx: &mut C, ctx: &MessageContext<'_>, tlvs: &TlvSet<'_>) -> Verdict {
        let (nhdp, _) = cx.nhdp_split();

        // HELLOs only arrive by multicast
        if !ctx.meta.is_multicast {
            return Verdict::DropMessage;
        }

        let Some(iface_id) = nhdp.interfaces.by_os_index(ctx.meta.if_index) else {
            tracing::debug!(if_index = ctx.meta.if_index, "HELLO on unknown interface");
            return Verdict::DropMessage;
        };
        let iface = nhdp.interfaces.index(iface_id);

        if !iface.ifaddr_filter.check(&ctx.meta.source) {
            return Verdict::DropMessage;
        }

        // address length must fit the interface mode
        if (ctx.msg.addr_len == 4 && iface.mode == IfaceMode::Ipv6)
            || (ctx.msg.addr_len == 16 && iface.mode == IfaceMode::Ipv4)
        {
            return Verdict::DropMessage;
        }

        let itime = time_tlv::decode(tlvs.byte(IDX_TLV_ITIME).unwrap_or(0));
        let vtime = time_tlv::decode(tlvs.byte(IDX_TLV_VTIME).unwrap_or(0));

        // scratch counters for the conflict resolution of this message
        let neighbor_ids = nhdp.db.neighbors.ids();
        for id in neighbor_ids {
            nhdp.db.neighbors.index_mut(id).process_count = 0;
        }
        let link_ids = nhdp.interfaces.index(iface_id).links.clone();
        for id in link_ids {
            nhdp.db.links.index_mut(id).process_count = 0;
        }

        nhdp.current = Some(HelloCurrent {
            iface: iface_id,
            neighbor: None,
            link: None,
            created_neighbor: false,
            created_link: false,
            join: Vec::new(),
            laddr_conflict: false,
            link_heard: false,
            link_lost: false,
            has_thisif: false,
            has_ipv4: false,
            has_ipv6: false,
            vtime,
            itime,
        });

        Verdict::Okay
    }

    fn on_message_end(&self, cx: &mut C, _ctx: &MessageContext<'_>, dropped: bool) {
        let now = cx.now();
        let (nhdp, wheel) = cx.nhdp_split();
        if dropped {
            rollback(nhdp, wheel, now);
        }
        // on success pass 2 already consumed the scratch state
        nhdp.current = None;
    }
}

pub struct HelloPass1Addr;

impl<C: NhdpContext> Consumer<C> for HelloPass1Addr {
    fn order(&self) -> u32 {
        0
    }

    fn msg_type(&self) -> Option<u8> {
        Some(iana::MSGTYPE_HELLO)
    }

    fn address_consumer(&self) -> bool {
        true
    }

    fn specs(&self) -> Vec<TlvSpec> {
        vec![
            TlvSpec::exact(iana::ADDRTLV_LOCAL_IF, 1),
            TlvSpec::exact(iana::ADDRTLV_LINK_STATUS, 1),
        ]
    }

    fn on_address(
        &self,
        cx: &mut C,
        _ctx: &MessageContext<'_>,
        actx: &AddressContext,
        tlvs: &TlvSet<'_>,
    ) -> Verdict {
        let (nhdp, _) = cx.nhdp_split();
        let Some(current) = nhdp.current.as_ref() else {
            return Verdict::DropMessage;
        };
        let iface_id = current.iface;
        let mode = nhdp.interfaces.index(iface_id).mode;

        let Some(addr) = parse_hello_addr(mode, actx.addr) else {
            return Verdict::Okay;
        };

        let local_if = tlvs.byte(IDX_ADDRTLV1_LOCAL_IF);
        let link_status = tlvs.byte(IDX_ADDRTLV1_LINK_STATUS);

        {
            let current = nhdp.current.as_mut().unwrap();
            current.has_ipv4 |= addr.family() == AddrFamily::Ipv4;
            current.has_ipv6 |= addr.family() == AddrFamily::Ipv6;
        }

        if matches!(
            local_if,
            Some(iana::LOCALIF_THIS_IF) | Some(iana::LOCALIF_OTHER_IF)
        ) {
            if let Some(naddr_id) = nhdp.db.naddr_get(&addr) {
                let owner = nhdp.db.naddrs.index(naddr_id).neighbor;
                nhdp.db.neighbors.index_mut(owner).process_count += 1;

                let current = nhdp.current.as_mut().unwrap();
                match current.neighbor {
                    None => current.neighbor = Some(owner),
                    Some(existing) if existing != owner => {
                        // one HELLO naming addresses of two separate
                        // neighbors: they are the same router
                        if !current.join.contains(&owner) {
                            current.join.push(owner);
                        }
                    }
                    _ => {}
                }
            }
        }

        if local_if == Some(iana::LOCALIF_THIS_IF) {
            if let Some(laddr_id) = nhdp.interfaces.laddr_lookup(iface_id, &addr) {
                let owner = nhdp.db.laddrs.index(laddr_id).link;
                nhdp.db.links.index_mut(owner).process_count += 1;

                let current = nhdp.current.as_mut().unwrap();
                if !current.laddr_conflict {
                    match current.link {
                        None => current.link = Some(owner),
                        Some(existing) if existing != owner => {
                            current.link = None;
                            current.laddr_conflict = true;
                        }
                        _ => {}
                    }
                }
            }
            nhdp.current.as_mut().unwrap().has_thisif = true;
        }

        // does the neighbor hear us?
        if link_status.is_some() && nhdp.interfaces.addr_on_iface(iface_id, &addr) {
            let current = nhdp.current.as_mut().unwrap();
            if link_status == Some(iana::LINKSTATUS_LOST) {
                current.link_lost = true;
            } else {
                current.link_heard = true;
            }
        }

        Verdict::Okay
    }
}

pub struct HelloPass2Msg;

impl HelloPass2Msg {
    /// Bind the message to a link and neighbor, creating them when pass
    /// 1 found none, and prepare the mark-and-sweep over their known
    /// addresses.
    fn bind<C: NhdpContext>(&self, cx: &mut C, ctx: &MessageContext<'_>) -> Verdict {
        let now = cx.now();
        let (nhdp, wheel) = cx.nhdp_split();
        let timers = nhdp.timers;

        let Some(current) = nhdp.current.as_ref() else {
            return Verdict::DropMessage;
        };
        let iface_id = current.iface;

        if current.neighbor.is_none() {
            let id = nhdp.db.neighbor_add();
            let current = nhdp.current.as_mut().unwrap();
            current.neighbor = Some(id);
            current.created_neighbor = true;
        }

        // collapse the conflicting owners of pass 1 onto the bound
        // neighbor; their links and addresses move over
        let join = std::mem::take(&mut nhdp.current.as_mut().unwrap().join);
        if !join.is_empty() {
            let kept = nhdp.current.as_ref().unwrap().neighbor.unwrap();
            for src in join {
                if nhdp.db.neighbors.contains(src) {
                    nhdp.db
                        .neighbor_join(wheel, &timers, &mut nhdp.interfaces, now, kept, src);
                }
            }
        }

        if nhdp.current.as_ref().unwrap().link.is_none() {
            let neighbor = nhdp.current.as_ref().unwrap().neighbor.unwrap();
            let id = nhdp
                .db
                .link_add(&mut nhdp.interfaces, &nhdp.domains, neighbor, iface_id);
            nhdp.events.push(NhdpEvent::LinkAdded(id));
            let current = nhdp.current.as_mut().unwrap();
            current.link = Some(id);
            current.created_link = true;
        }

        let current = nhdp.current.as_ref().unwrap();
        let neighbor_id = current.neighbor.unwrap();
        let link_id = current.link.unwrap();
        let (has_ipv4, has_ipv6) = (current.has_ipv4, current.has_ipv6);
        let (vtime, itime) = (current.vtime, current.itime);

        // mark addresses; pass 2 unmarks what the HELLO still carries
        let naddr_ids: Vec<NaddrId> = nhdp
            .db
            .neighbors
            .index(neighbor_id)
            .addresses
            .iter()
            .filter(|(addr, _)| {
                (addr.family() == AddrFamily::Ipv4 && has_ipv4)
                    || (addr.family() == AddrFamily::Ipv6 && has_ipv6)
            })
            .map(|(_, id)| *id)
            .collect();
        for id in naddr_ids {
            nhdp.db.naddrs.index_mut(id).might_be_removed = true;
        }
        let laddr_ids: Vec<LaddrId> = nhdp
            .db
            .links
            .index(link_id)
            .addresses
            .values()
            .copied()
            .collect();
        for id in laddr_ids {
            nhdp.db.laddrs.index_mut(id).might_be_removed = true;
        }

        // a HELLO without any THIS_IF address still tells us the sender
        // interface: its source address
        if !nhdp.current.as_ref().unwrap().has_thisif {
            let mode = nhdp.interfaces.index(iface_id).mode;
            let Some(addr) = parse_hello_addr(mode, ctx.meta.source) else {
                return Verdict::DropMessage;
            };
            process_localif(nhdp, wheel, now, addr, iana::LOCALIF_THIS_IF);
        }

        let link = nhdp.db.links.index_mut(link_id);
        link.vtime_value = vtime;
        link.itime_value = itime;

        // originator binding for the TC previous-hop lookup
        if let Some(originator) = ctx.msg.originator {
            let originator = if originator.is_ipv4_compatible() {
                originator.extract_ipv4_compatible()
            } else {
                originator
            };
            let old = nhdp.db.neighbors.index(neighbor_id).originator;
            if old != originator {
                nhdp.db.neighbors.index_mut(neighbor_id).originator = originator;
                nhdp.interfaces
                    .set_link_originator(iface_id, &old, &originator, link_id);
            }
        }

        // hysteresis verdict for this HELLO
        let link = nhdp.db.links.index_mut(link_id);
        nhdp.hysteresis.update(link_id, link, vtime, itime, false);

        nhdp.events.push(NhdpEvent::LinkChanged(link_id));
        Verdict::Okay
    }
}

impl<C: NhdpContext> Consumer<C> for HelloPass2Msg {
    fn order(&self) -> u32 {
        1
    }

    fn msg_type(&self) -> Option<u8> {
        Some(iana::MSGTYPE_HELLO)
    }

    fn specs(&self) -> Vec<TlvSpec> {
        vec![TlvSpec::exact(iana::MSGTLV_MPR_WILLING, 1)]
    }

    fn on_message(&self, cx: &mut C, ctx: &MessageContext<'_>, tlvs: &TlvSet<'_>) -> Verdict {
        let verdict = self.bind(cx, ctx);
        if verdict != Verdict::Okay {
            return verdict;
        }

        if let Some(willingness) = tlvs.byte(IDX_TLV2_WILLINGNESS) {
            let (nhdp, _) = cx.nhdp_split();
            let neighbor = nhdp.current.as_ref().unwrap().neighbor.unwrap();
            for data in nhdp.db.neighbors.index_mut(neighbor).domains.iter_mut() {
                data.willingness = willingness & 0x0f;
            }
        }
        Verdict::Okay
    }

    fn on_message_end(&self, cx: &mut C, _ctx: &MessageContext<'_>, dropped: bool) {
        let now = cx.now();
        let (nhdp, wheel) = cx.nhdp_split();
        let timers = nhdp.timers;

        if dropped {
            rollback(nhdp, wheel, now);
            return;
        }

        let Some(current) = nhdp.current.take() else {
            return;
        };
        let neighbor_id = current.neighbor.expect("pass 2 bound a neighbor");
        let link_id = current.link.expect("pass 2 bound a link");
        let iface_id = current.iface;
        let (l_hold, n_hold) = {
            let iface = nhdp.interfaces.index(iface_id);
            (iface.timing.l_hold, iface.timing.n_hold)
        };

        // family validity of the neighbor
        if current.has_ipv4 {
            wheel.set(now, timers.neigh_vtime_v4, neighbor_id.to_token(), current.vtime);
        }
        if current.has_ipv6 {
            wheel.set(now, timers.neigh_vtime_v6, neighbor_id.to_token(), current.vtime);
        }

        // sweep addresses the HELLO no longer carries
        let leftover_laddrs: Vec<LaddrId> = nhdp
            .db
            .links
            .index(link_id)
            .addresses
            .values()
            .copied()
            .filter(|id| nhdp.db.laddrs.index(*id).might_be_removed)
            .collect();
        for id in leftover_laddrs {
            nhdp.db.laddr_remove(&mut nhdp.interfaces, id);
        }

        let leftover_naddrs: Vec<NaddrId> = nhdp
            .db
            .neighbors
            .index(neighbor_id)
            .addresses
            .values()
            .copied()
            .filter(|id| nhdp.db.naddrs.index(*id).might_be_removed)
            .collect();
        for id in leftover_naddrs {
            let addr = nhdp.db.naddrs.index(id).addr;
            nhdp.db.naddr_set_lost(wheel, &timers, now, id, n_hold);
            // section 12.6.1: drop matching 2-hop entries as well
            if let Some(twohop) = nhdp.db.twohop_get(link_id, &addr) {
                nhdp.db.twohop_remove(wheel, &timers, twohop);
            }
        }

        // RFC 6130 section 12.5.4 link timer update
        let token = link_id.to_token();
        if current.link_heard {
            // 12.5.4.1.1: the other side hears us
            wheel.set(now, timers.link_sym, token, current.vtime);
        } else if current.link_lost {
            // 12.5.4.1.2
            if wheel.is_active(timers.link_sym, token) {
                wheel.stop(timers.link_sym, token);
                if nhdp.db.calculate_status(wheel, &timers, link_id) == LinkStatus::Heard {
                    wheel.set(now, timers.link_vtime, token, l_hold);
                }
            }
        }

        // 12.5.4.3: heard time covers at least the symmetric time
        let mut deadline = now + current.vtime;
        if let Some(sym_deadline) = wheel.deadline(timers.link_sym, token) {
            deadline = deadline.max(sym_deadline);
        }
        wheel.set(now, timers.link_heard, token, deadline - now);

        // 12.5.4.4: pending links do not take the L_HOLD extension
        if nhdp.db.links.index(link_id).status != LinkStatus::Pending {
            deadline += l_hold;
        }

        // 12.5.4.5: validity only ever extends
        let extend = match wheel.deadline(timers.link_vtime, token) {
            Some(existing) => deadline > existing,
            None => true,
        };
        if extend {
            wheel.set(now, timers.link_vtime, token, deadline - now);
        }

        // fold fresh link metrics into the neighbor aggregate
        nhdp.db
            .calculate_neighbor_metric(&mut nhdp.domains, neighbor_id);

        // status transition bookkeeping
        nhdp.db.update_status(wheel, &timers, now, n_hold, link_id);

        nhdp.update_mprs();
        nhdp.neighborhood_changed = true;
    }
}

pub struct HelloPass2Addr;

impl<C: NhdpContext> Consumer<C> for HelloPass2Addr {
    fn order(&self) -> u32 {
        1
    }

    fn msg_type(&self) -> Option<u8> {
        Some(iana::MSGTYPE_HELLO)
    }

    fn address_consumer(&self) -> bool {
        true
    }

    fn specs(&self) -> Vec<TlvSpec> {
        vec![
            TlvSpec::exact(iana::ADDRTLV_LOCAL_IF, 1),
            TlvSpec::exact(iana::ADDRTLV_LINK_STATUS, 1),
            TlvSpec::exact(iana::ADDRTLV_OTHER_NEIGHB, 1),
            TlvSpec::exact(iana::ADDRTLV_MPR, 1),
            TlvSpec::exact(iana::ADDRTLV_LINK_METRIC, 2),
        ]
    }

    fn on_address(
        &self,
        cx: &mut C,
        _ctx: &MessageContext<'_>,
        actx: &AddressContext,
        tlvs: &TlvSet<'_>,
    ) -> Verdict {
        let now = cx.now();
        let (nhdp, wheel) = cx.nhdp_split();
        let timers = nhdp.timers;

        let Some(current) = nhdp.current.as_ref() else {
            return Verdict::DropMessage;
        };
        let iface_id = current.iface;
        let link_id = current.link.expect("pass 2 bound a link");
        let neighbor_id = current.neighbor.expect("pass 2 bound a neighbor");
        let vtime = current.vtime;

        let mode = nhdp.interfaces.index(iface_id).mode;
        let Some(addr) = parse_hello_addr(mode, actx.addr) else {
            return Verdict::Okay;
        };

        let local_if = tlvs.byte(IDX_ADDRTLV2_LOCAL_IF);
        let link_status = tlvs.byte(IDX_ADDRTLV2_LINK_STATUS);
        let other_neigh = tlvs.byte(IDX_ADDRTLV2_OTHER_NEIGHB);
        let mpr = tlvs.byte(IDX_ADDRTLV2_MPR);

        if matches!(
            local_if,
            Some(iana::LOCALIF_THIS_IF) | Some(iana::LOCALIF_OTHER_IF)
        ) {
            process_localif(nhdp, wheel, now, addr, local_if.unwrap());
        }

        if link_status.is_none() && other_neigh.is_none() {
            return Verdict::Okay;
        }

        if nhdp.interfaces.addr_on_iface(iface_id, &addr) {
            // our own address: MPR selection and link metrics flow back
            let flooding = matches!(mpr, Some(iana::MPR_FLOODING) | Some(iana::MPR_FLOOD_ROUTE));
            let routing = matches!(mpr, Some(iana::MPR_ROUTING) | Some(iana::MPR_FLOOD_ROUTE));
            let neighbor = nhdp.db.neighbors.index_mut(neighbor_id);
            neighbor.local_is_flooding_mpr = flooding;
            for data in neighbor.domains.iter_mut() {
                data.local_is_mpr = routing;
            }

            // reset advertised costs to their starting point, then apply
            // what the HELLO carries; directions reverse on ingest
            for domain in nhdp.domains.iter() {
                let link = nhdp.db.links.index_mut(link_id);
                link.domains[domain.index].metric_out = domain.metric.outgoing_start;
                let neighbor = nhdp.db.neighbors.index_mut(neighbor_id);
                neighbor.domains[domain.index].metric_out = domain.metric.outgoing_start;
            }
            for m in tlvs.all(IDX_ADDRTLV2_LINK_METRIC) {
                let Some(domain) = nhdp.domains.get_by_ext(m.ext) else {
                    continue;
                };
                let index = domain.index;
                let value = u16::from_be_bytes([m.value[0], m.value[1]]);
                let (flags, cost) = split_metric_tlv(value);

                if flags & iana::LINKMETRIC_INCOMING_LINK != 0 {
                    nhdp.db.links.index_mut(link_id).domains[index].metric_out = cost;
                }
                if flags & iana::LINKMETRIC_OUTGOING_LINK != 0 {
                    nhdp.db.links.index_mut(link_id).domains[index].metric_in = cost;
                }
                if flags & iana::LINKMETRIC_INCOMING_NEIGH != 0 {
                    nhdp.db.neighbors.index_mut(neighbor_id).domains[index].metric_out = cost;
                }
                if flags & iana::LINKMETRIC_OUTGOING_NEIGH != 0 {
                    nhdp.db.neighbors.index_mut(neighbor_id).domains[index].metric_in = cost;
                }
            }
        } else if nhdp.interfaces.addr_global(&addr).is_some() {
            // an address of one of our other interfaces; nothing to learn
        } else if link_status == Some(iana::LINKSTATUS_SYMMETRIC)
            || other_neigh == Some(iana::OTHERNEIGHB_SYMMETRIC)
        {
            // a 2-hop neighbor reachable through this link
            let twohop_id = nhdp.db.twohop_add(&nhdp.domains, link_id, addr);
            wheel.set(now, timers.twohop_vtime, twohop_id.to_token(), vtime);

            for domain in nhdp.domains.iter() {
                let twohop = nhdp.db.two_hops.index_mut(twohop_id);
                twohop.domains[domain.index].metric_in = domain.metric.incoming_start;
                twohop.domains[domain.index].metric_out = domain.metric.outgoing_start;
            }
            for m in tlvs.all(IDX_ADDRTLV2_LINK_METRIC) {
                let Some(domain) = nhdp.domains.get_by_ext(m.ext) else {
                    continue;
                };
                let index = domain.index;
                let value = u16::from_be_bytes([m.value[0], m.value[1]]);
                let (flags, cost) = split_metric_tlv(value);
                let twohop = nhdp.db.two_hops.index_mut(twohop_id);
                // no direction reversal: these describe the 2-hop edge
                if flags & iana::LINKMETRIC_INCOMING_NEIGH != 0 {
                    twohop.domains[index].metric_in = cost;
                }
                if flags & iana::LINKMETRIC_OUTGOING_NEIGH != 0 {
                    twohop.domains[index].metric_out = cost;
                }
            }
        } else if let Some(twohop) = nhdp.db.twohop_get(link_id, &addr) {
            // advertised as heard/lost: no longer a usable 2-hop
            nhdp.db.twohop_remove(wheel, &timers, twohop);
        }

        Verdict::Okay
    }
}

/// Shared LOCAL_IF handling of pass 2: put the link address on the right
/// link and the neighbor address on the right neighbor, migrating and
/// garbage collecting conflicting owners.
fn process_localif(
    nhdp: &mut Nhdp,
    wheel: &mut wisp_core::timer::TimerWheel,
    now: u64,
    addr: NetAddr,
    local_if: u8,
) {
    let timers = nhdp.timers;
    let current = nhdp.current.as_ref().expect("inside HELLO processing");
    let iface_id = current.iface;
    let link_id = current.link.expect("pass 2 bound a link");
    let neighbor_id = current.neighbor.expect("pass 2 bound a neighbor");
    let vtime = current.vtime;

    if local_if == iana::LOCALIF_THIS_IF {
        match nhdp.interfaces.laddr_lookup(iface_id, &addr) {
            None => {
                nhdp.db.laddr_add(&mut nhdp.interfaces, link_id, addr);
            }
            Some(laddr_id) => {
                let owner = nhdp.db.laddrs.index(laddr_id).link;
                nhdp.db.links.index_mut(owner).process_count -= 1;

                if owner != link_id {
                    nhdp.db.laddr_move(&mut nhdp.interfaces, link_id, laddr_id);
                    if nhdp.db.links.index(owner).process_count == 0 {
                        // all of its addresses moved away in this HELLO
                        nhdp.db
                            .link_remove(wheel, &timers, &mut nhdp.interfaces, now, owner);
                        nhdp.events.push(NhdpEvent::LinkRemoved(owner));
                        nhdp.hysteresis.link_removed(owner);
                    }
                }
                nhdp.db.laddrs.index_mut(laddr_id).might_be_removed = false;
            }
        }
    }

    match nhdp.db.naddr_get(&addr) {
        None => {
            nhdp.db.naddr_add(neighbor_id, addr);
        }
        Some(naddr_id) => {
            let owner = nhdp.db.naddrs.index(naddr_id).neighbor;
            nhdp.db.neighbors.index_mut(owner).process_count -= 1;

            if owner != neighbor_id {
                nhdp.db.naddr_move(neighbor_id, naddr_id);
                if nhdp.db.neighbors.index(owner).process_count == 0 {
                    nhdp.db
                        .neighbor_remove(wheel, &timers, &mut nhdp.interfaces, now, owner);
                }
            }
            let naddr = nhdp.db.naddrs.index_mut(naddr_id);
            naddr.might_be_removed = false;
            nhdp.db.naddr_not_lost(wheel, &timers, naddr_id);
        }
    }

    // seeing a family refreshes the neighbor's validity for it
    match addr.family() {
        AddrFamily::Ipv4 => wheel.set(now, timers.neigh_vtime_v4, neighbor_id.to_token(), vtime),
        AddrFamily::Ipv6 => wheel.set(now, timers.neigh_vtime_v6, neighbor_id.to_token(), vtime),
        _ => {}
    }
}
