//! TC ingest: the processing and forwarding decisions, then the
//! replacement of the originator's advertised edges and endpoints.

use wisp_core::addr::NetAddr;
use wisp_rfc5444::iana;
use wisp_rfc5444::reader::{AddressContext, Consumer, MessageContext, TlvSet, TlvSpec, Verdict};
use wisp_rfc5444::time_tlv;

use crate::tc::{ansn_is_newer, TcNodeId};
use crate::Olsrv2Context;

/* message TLV slots; slot 0 is the interval time, validated but unread */
const IDX_TLV_VTIME: usize = 1;
const IDX_TLV_CONT_SEQ_NUM: usize = 2;

/* address TLV slots */
const IDX_ADDRTLV_LINK_METRIC: usize = 0;
const IDX_ADDRTLV_NBR_ADDR_TYPE: usize = 1;
const IDX_ADDRTLV_GATEWAY: usize = 2;

/// Scratch state of the TC currently being applied.
#[derive(Debug)]
pub(crate) struct TcCurrent {
    pub node: TcNodeId,
}

pub struct TcReader {
    pub msg: TcMsgConsumer,
    pub addr: TcAddrConsumer,
}

impl Default for TcReader {
    fn default() -> Self {
        TcReader::new()
    }
}

impl TcReader {
    pub fn new() -> TcReader {
        TcReader {
            msg: TcMsgConsumer,
            addr: TcAddrConsumer,
        }
    }

    pub fn consumers<'a, C: Olsrv2Context>(&'a self) -> [&'a dyn Consumer<C>; 2] {
        [&self.msg, &self.addr]
    }
}

fn normalize(addr: NetAddr) -> NetAddr {
    if addr.is_ipv4_compatible() {
        addr.extract_ipv4_compatible()
    } else {
        addr
    }
}

pub struct TcMsgConsumer;

impl<C: Olsrv2Context> Consumer<C> for TcMsgConsumer {
    fn order(&self) -> u32 {
        0
    }

    fn msg_type(&self) -> Option<u8> {
        Some(iana::MSGTYPE_TC)
    }

    fn specs(&self) -> Vec<TlvSpec> {
        vec![
            TlvSpec::exact(iana::MSGTLV_INTERVAL_TIME, 1)
                .with_ext(0)
                .mandatory(),
            TlvSpec::exact(iana::MSGTLV_VALIDITY_TIME, 1)
                .with_ext(0)
                .mandatory(),
            TlvSpec::exact(iana::MSGTLV_CONT_SEQ_NUM, 2).mandatory(),
        ]
    }

    fn on_message(&self, cx: &mut C, ctx: &MessageContext<'_>, tlvs: &TlvSet<'_>) -> Verdict {
        let now = cx.now();
        let (olsrv2, nhdp, wheel) = cx.olsrv2_split();
        let timers = olsrv2.timers;

        // a TC without identity cannot be processed or forwarded
        let (Some(originator), Some(seqno)) = (ctx.msg.originator, ctx.msg.seqno) else {
            tracing::debug!("TC without originator or sequence number");
            return Verdict::DropMessage;
        };
        let originator = normalize(originator);

        // our own former identity fades out of the network silently
        if olsrv2.originators.is_local(&originator) || olsrv2.originators.is_former(&originator) {
            return Verdict::DropMessage;
        }

        let vtime = time_tlv::decode(tlvs.byte(IDX_TLV_VTIME).unwrap_or(0));
        let ansn = tlvs.u16(IDX_TLV_CONT_SEQ_NUM).unwrap_or(0);

        // forwarding decision: fresh in the forwarded set AND the
        // previous hop picked us as flooding MPR
        let fresh_forward = olsrv2
            .forwarded_set
            .insert(
                now,
                iana::MSGTYPE_TC,
                originator,
                seqno,
                vtime + olsrv2.config.forward_hold_time,
            )
            .is_fresh();
        if fresh_forward && prev_hop_is_mpr_selector(nhdp, ctx) {
            if let Some(raw) = ctx.msg.forwarded_raw() {
                olsrv2.flood_queue.push(raw);
            }
        }

        // processing decision
        let fresh_process = olsrv2
            .processed_set
            .insert(
                now,
                iana::MSGTYPE_TC,
                originator,
                seqno,
                vtime + olsrv2.config.processing_hold_time,
            )
            .is_fresh();
        if !fresh_process {
            return Verdict::DropMessage;
        }

        // stale ANSN of a live node: the network has seen newer
        if let Some(node) = olsrv2.tc.node_get(&originator) {
            if !olsrv2.tc.node_is_virtual(wheel, &timers, node)
                && !ansn_is_newer(ansn, olsrv2.tc.nodes.index(node).ansn)
            {
                return Verdict::DropMessage;
            }
        }

        let node = olsrv2
            .tc
            .node_add(wheel, &timers, now, originator, vtime, ansn);

        // mark the advertised content; pass 2 unmarks what the message
        // still carries and the end callback sweeps the rest
        let edge_ids: Vec<_> = olsrv2.tc.nodes.index(node).edges.values().copied().collect();
        for edge_id in edge_ids {
            let edge = olsrv2.tc.edges.index_mut(edge_id);
            if !edge.virtual_ {
                edge.marked = true;
            }
        }
        let attachment_ids: Vec<_> = olsrv2
            .tc
            .nodes
            .index(node)
            .attachments
            .values()
            .copied()
            .collect();
        for attachment_id in attachment_ids {
            olsrv2.tc.attachments.index_mut(attachment_id).marked = true;
        }

        olsrv2.current_tc = Some(TcCurrent { node });
        Verdict::Okay
    }

    fn on_message_end(&self, cx: &mut C, _ctx: &MessageContext<'_>, dropped: bool) {
        let now = cx.now();
        let (olsrv2, _, wheel) = cx.olsrv2_split();
        let timers = olsrv2.timers;

        let Some(current) = olsrv2.current_tc.take() else {
            return;
        };
        if dropped {
            return;
        }

        // sweep edges and endpoints the TC no longer advertises
        let edge_ids: Vec<_> = olsrv2
            .tc
            .nodes
            .index(current.node)
            .edges
            .values()
            .copied()
            .collect();
        for edge_id in edge_ids {
            if olsrv2
                .tc
                .edges
                .get(edge_id)
                .map(|e| e.marked)
                .unwrap_or(false)
            {
                olsrv2.tc.edge_remove(wheel, &timers, edge_id);
            }
        }
        let attachment_ids: Vec<_> = olsrv2
            .tc
            .nodes
            .index(current.node)
            .attachments
            .values()
            .copied()
            .collect();
        for attachment_id in attachment_ids {
            if olsrv2
                .tc
                .attachments
                .get(attachment_id)
                .map(|a| a.marked)
                .unwrap_or(false)
            {
                olsrv2.tc.endpoint_remove(attachment_id);
            }
        }

        olsrv2.trigger_dijkstra(wheel, now);
    }
}

/// Did the previous hop (identified by the packet source address on the
/// input interface) select us as flooding MPR?
fn prev_hop_is_mpr_selector(nhdp: &wisp_nhdp::Nhdp, ctx: &MessageContext<'_>) -> bool {
    let Some(iface) = nhdp.interfaces.by_os_index(ctx.meta.if_index) else {
        tracing::debug!("TC from interface NHDP does not handle");
        return false;
    };

    // link addresses first, then the originator index for peers whose
    // HELLOs came from a different source address
    let link = match nhdp.interfaces.laddr_lookup(iface, &ctx.meta.source) {
        Some(laddr) => nhdp.db.laddrs.index(laddr).link,
        None => match nhdp.interfaces.link_by_originator(iface, &ctx.meta.source) {
            Some(link) => link,
            None => {
                tracing::debug!(source = %ctx.meta.source, "TC from a non-neighbor");
                return false;
            }
        },
    };
    let neighbor = nhdp.db.neighbors.index(nhdp.db.links.index(link).neighbor);
    neighbor.symmetric > 0 && neighbor.local_is_flooding_mpr
}

pub struct TcAddrConsumer;

impl<C: Olsrv2Context> Consumer<C> for TcAddrConsumer {
    fn order(&self) -> u32 {
        0
    }

    fn msg_type(&self) -> Option<u8> {
        Some(iana::MSGTYPE_TC)
    }

    fn address_consumer(&self) -> bool {
        true
    }

    fn specs(&self) -> Vec<TlvSpec> {
        vec![
            TlvSpec::exact(iana::ADDRTLV_LINK_METRIC, 2),
            TlvSpec::exact(iana::ADDRTLV_NBR_ADDR_TYPE, 1),
            TlvSpec::exact(iana::ADDRTLV_GATEWAY, 1),
        ]
    }

    fn on_address(
        &self,
        cx: &mut C,
        _ctx: &MessageContext<'_>,
        actx: &AddressContext,
        tlvs: &TlvSet<'_>,
    ) -> Verdict {
        let (olsrv2, nhdp, _) = cx.olsrv2_split();

        let Some(current) = olsrv2.current_tc.as_ref() else {
            return Verdict::DropMessage;
        };
        let node = current.node;
        let addr = normalize(actx.addr);

        // never build edges towards ourselves
        if olsrv2.originators.is_local(&addr) || nhdp.interfaces.addr_global(&addr).is_some() {
            return Verdict::Okay;
        }

        let nbr_type = tlvs.byte(IDX_ADDRTLV_NBR_ADDR_TYPE);
        let gateway = tlvs.byte(IDX_ADDRTLV_GATEWAY);

        if matches!(
            nbr_type,
            Some(iana::NBR_ADDR_TYPE_ORIGINATOR) | Some(iana::NBR_ADDR_TYPE_ROUTABLE_ORIG)
        ) {
            let edge_id = olsrv2.tc.edge_add(node, addr);
            olsrv2.tc.edges.index_mut(edge_id).marked = false;
            for m in tlvs.all(IDX_ADDRTLV_LINK_METRIC) {
                let Some(domain) = nhdp.domains.get_by_ext(m.ext) else {
                    continue;
                };
                let value = u16::from_be_bytes([m.value[0], m.value[1]]);
                if value & iana::LINKMETRIC_OUTGOING_NEIGH != 0 {
                    let cost =
                        wisp_rfc5444::metric::decode(value & iana::LINKMETRIC_COST_MASK);
                    olsrv2.tc.edges.index_mut(edge_id).cost[domain.index] = cost;
                }
            }
        }

        if matches!(
            nbr_type,
            Some(iana::NBR_ADDR_TYPE_ROUTABLE) | Some(iana::NBR_ADDR_TYPE_ROUTABLE_ORIG)
        ) {
            let attachment = olsrv2.tc.endpoint_add(node, addr, true);
            olsrv2.tc.attachments.index_mut(attachment).marked = false;
            apply_endpoint_metrics(olsrv2, nhdp, attachment, tlvs, None);
        }

        if let Some(distance) = gateway {
            let attachment = olsrv2.tc.endpoint_add(node, addr, false);
            olsrv2.tc.attachments.index_mut(attachment).marked = false;
            apply_endpoint_metrics(olsrv2, nhdp, attachment, tlvs, Some(distance));
        }

        Verdict::Okay
    }
}

fn apply_endpoint_metrics(
    olsrv2: &mut crate::Olsrv2,
    nhdp: &wisp_nhdp::Nhdp,
    attachment: crate::tc::TcAttachmentId,
    tlvs: &TlvSet<'_>,
    distance: Option<u8>,
) {
    for m in tlvs.all(IDX_ADDRTLV_LINK_METRIC) {
        let Some(domain) = nhdp.domains.get_by_ext(m.ext) else {
            continue;
        };
        let value = u16::from_be_bytes([m.value[0], m.value[1]]);
        if value & iana::LINKMETRIC_OUTGOING_NEIGH != 0 {
            let cost = wisp_rfc5444::metric::decode(value & iana::LINKMETRIC_COST_MASK);
            olsrv2.tc.attachments.index_mut(attachment).cost[domain.index] = cost;
        }
    }
    if let Some(distance) = distance {
        olsrv2.tc.attachments.index_mut(attachment).distance = [distance; wisp_nhdp::MAX_DOMAINS];
    }
}
