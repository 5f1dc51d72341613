//! TC flooding, topology updates and route computation end to end.

use wisp_core::acl::AddrAcl;
use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_core::timer::TimerWheel;
use wisp_nhdp::db::{LinkId, LinkStatus, NeighborId};
use wisp_nhdp::domain::MetricParams;
use wisp_nhdp::interfaces::{IfaceId, IfaceMode, IfaceTiming};
use wisp_nhdp::{Nhdp, NhdpContext};
use async_trait::async_trait;

use wisp_olsrv2::reader::TcReader;
use wisp_olsrv2::writer::build_tc;
use wisp_olsrv2::{
    Olsrv2, Olsrv2Config, Olsrv2Context, RouteBackend, RouteError, RouteRequest,
};
use wisp_rfc5444::iana;
use wisp_rfc5444::reader::process_packet;
use wisp_rfc5444::writer::{MessageBuilder, PacketBuilder};
use wisp_rfc5444::{Packet, PacketMeta};

struct Ctx {
    nhdp: Nhdp,
    olsrv2: Olsrv2,
    wheel: TimerWheel,
    now: u64,
    iface: IfaceId,
}

impl NhdpContext for Ctx {
    fn nhdp_split(&mut self) -> (&mut Nhdp, &mut TimerWheel) {
        (&mut self.nhdp, &mut self.wheel)
    }
    fn now(&self) -> u64 {
        self.now
    }
}

impl Olsrv2Context for Ctx {
    fn olsrv2_split(&mut self) -> (&mut Olsrv2, &mut Nhdp, &mut TimerWheel) {
        (&mut self.olsrv2, &mut self.nhdp, &mut self.wheel)
    }
}

fn addr(s: &str) -> NetAddr {
    s.parse().unwrap()
}

fn ctx() -> Ctx {
    let mut wheel = TimerWheel::new();
    let mut nhdp = Nhdp::new(&mut wheel);
    nhdp.domains.add(0, "test", MetricParams::default()).unwrap();
    let iface = nhdp
        .interfaces
        .add(
            "if0",
            1,
            IfaceMode::Ipv4,
            IfaceTiming::default(),
            AddrAcl::accept_all(),
        )
        .unwrap();
    let timers = nhdp.timers;
    nhdp.interfaces
        .addr_add(&mut wheel, &timers, iface, addr("10.0.0.1"));

    let mut olsrv2 = Olsrv2::new(&mut wheel, Olsrv2Config::default(), 7);
    olsrv2.set_originator(&mut wheel, 0, addr("10.0.0.1"));
    nhdp.set_originator(addr("10.0.0.1"));

    Ctx {
        nhdp,
        olsrv2,
        wheel,
        now: 0,
        iface,
    }
}

/// Fabricate a symmetric neighbor with one link and one address.
fn add_sym_neighbor(ctx: &mut Ctx, addr_s: &str, orig_s: &str, cost: u32) -> (NeighborId, LinkId) {
    let address = addr(addr_s);
    let originator = addr(orig_s);

    let neighbor = ctx.nhdp.db.neighbor_add();
    let link = ctx.nhdp.db.link_add(
        &mut ctx.nhdp.interfaces,
        &ctx.nhdp.domains,
        neighbor,
        ctx.iface,
    );
    ctx.nhdp.db.laddr_add(&mut ctx.nhdp.interfaces, link, address);
    ctx.nhdp.db.naddr_add(neighbor, address);

    {
        let l = ctx.nhdp.db.links.index_mut(link);
        l.status = LinkStatus::Symmetric;
        l.domains[0].metric_out = cost;
        l.domains[0].metric_in = cost;
    }
    {
        let n = ctx.nhdp.db.neighbors.index_mut(neighbor);
        n.symmetric = 1;
        n.originator = originator;
        n.domains[0].metric_out = cost;
        n.domains[0].metric_in = cost;
        n.domains[0].best_link = Some(link);
    }
    ctx.nhdp
        .interfaces
        .set_link_originator(ctx.iface, &NetAddr::UNSPEC, &originator, link);

    (neighbor, link)
}

/// Build a TC from a remote router.
fn build_remote_tc(originator: &str, seqno: u16, ansn: u16, neighbors: &[(&str, u32)]) -> Vec<u8> {
    let mut msg = MessageBuilder::new(iana::MSGTYPE_TC, 4);
    msg.set_originator(addr(originator));
    msg.set_hop_limit(255);
    msg.set_hop_count(0);
    msg.set_seqno(seqno);
    msg.add_message_tlv(
        iana::MSGTLV_INTERVAL_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(5_000)],
    );
    msg.add_message_tlv(
        iana::MSGTLV_VALIDITY_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(15_000)],
    );
    msg.add_message_tlv(iana::MSGTLV_CONT_SEQ_NUM, 0, &ansn.to_be_bytes());

    for (neighbor, cost) in neighbors {
        let a = addr(neighbor);
        msg.add_address_tlv(a, iana::ADDRTLV_NBR_ADDR_TYPE, 0, &[
            iana::NBR_ADDR_TYPE_ROUTABLE_ORIG,
        ]);
        let value = iana::LINKMETRIC_OUTGOING_NEIGH | wisp_rfc5444::metric::encode(*cost);
        msg.add_address_tlv(a, iana::ADDRTLV_LINK_METRIC, 0, &value.to_be_bytes());
    }
    msg.finish().unwrap()
}

fn deliver_tc(ctx: &mut Ctx, raw_msg: Vec<u8>, source: &str) {
    let mut pkt = PacketBuilder::new();
    pkt.add_message(raw_msg);
    let raw = pkt.finish();
    let meta = PacketMeta {
        if_index: 1,
        source: addr(source),
        is_multicast: true,
        pkt_seqno: None,
    };
    let reader = TcReader::new();
    process_packet(ctx, &reader.consumers::<Ctx>(), &raw, &meta).unwrap();
}

/// Scenario: TC flood gated on the flooding-MPR selection.
#[test]
fn tc_forwarded_only_for_mpr_selectors() {
    let mut ctx = ctx();
    let (neighbor, _) = add_sym_neighbor(&mut ctx, "10.0.0.8", "10.0.0.8", 1024);

    // X selected us as flooding MPR
    ctx.nhdp
        .db
        .neighbors
        .index_mut(neighbor)
        .local_is_flooding_mpr = true;

    let tc = build_remote_tc("10.0.0.9", 42, 1, &[("10.0.0.33", 1024)]);
    deliver_tc(&mut ctx, tc, "10.0.0.8");

    // processed: the topology knows the originator now
    assert!(ctx.olsrv2.tc.node_get(&addr("10.0.0.9")).is_some());
    // forwarded: one copy waits for re-emission
    let flood = ctx.olsrv2.take_flood_queue();
    assert_eq!(flood.len(), 1);

    // same TC from a neighbor that did NOT select us
    let mut ctx = self::ctx();
    add_sym_neighbor(&mut ctx, "10.0.0.8", "10.0.0.8", 1024);
    let tc = build_remote_tc("10.0.0.9", 42, 1, &[("10.0.0.33", 1024)]);
    deliver_tc(&mut ctx, tc, "10.0.0.8");

    assert!(ctx.olsrv2.tc.node_get(&addr("10.0.0.9")).is_some());
    assert!(ctx.olsrv2.take_flood_queue().is_empty());
}

/// Applying the same TC twice changes nothing; a newer ANSN replaces
/// the advertised set.
#[test]
fn tc_idempotence_and_replacement() {
    let mut ctx = ctx();
    add_sym_neighbor(&mut ctx, "10.0.0.2", "10.0.0.2", 512);

    let tc = build_remote_tc(
        "10.0.0.2",
        1,
        10,
        &[("10.0.0.3", 512), ("10.0.0.4", 512)],
    );
    deliver_tc(&mut ctx, tc.clone(), "10.0.0.2");

    let node = ctx.olsrv2.tc.node_get(&addr("10.0.0.2")).unwrap();
    let edges_before = ctx.olsrv2.tc.nodes.index(node).edges.len();
    assert_eq!(edges_before, 2);

    // exact duplicate: suppressed by the processing set
    deliver_tc(&mut ctx, tc, "10.0.0.2");
    assert_eq!(ctx.olsrv2.tc.nodes.index(node).edges.len(), 2);

    // stale ANSN: ignored
    let stale = build_remote_tc("10.0.0.2", 2, 9, &[("10.0.0.5", 512)]);
    deliver_tc(&mut ctx, stale, "10.0.0.2");
    assert_eq!(ctx.olsrv2.tc.nodes.index(node).edges.len(), 2);
    assert_eq!(ctx.olsrv2.tc.nodes.index(node).ansn, 10);

    // newer ANSN with a smaller set: the vanished edge is swept
    let newer = build_remote_tc("10.0.0.2", 3, 11, &[("10.0.0.3", 512)]);
    deliver_tc(&mut ctx, newer, "10.0.0.2");
    let node = ctx.olsrv2.tc.node_get(&addr("10.0.0.2")).unwrap();
    assert_eq!(ctx.olsrv2.tc.nodes.index(node).ansn, 11);
    let real_edges = ctx
        .olsrv2
        .tc
        .nodes
        .index(node)
        .edges
        .values()
        .filter(|e| !ctx.olsrv2.tc.edges.index(**e).virtual_)
        .count();
    assert_eq!(real_edges, 1);
}

/// ANSN wraps like a sequence number.
#[test]
fn ansn_wraparound_accepted() {
    let mut ctx = ctx();
    add_sym_neighbor(&mut ctx, "10.0.0.2", "10.0.0.2", 512);

    let tc = build_remote_tc("10.0.0.2", 1, 0xffff, &[("10.0.0.3", 512)]);
    deliver_tc(&mut ctx, tc, "10.0.0.2");
    let node = ctx.olsrv2.tc.node_get(&addr("10.0.0.2")).unwrap();
    assert_eq!(ctx.olsrv2.tc.nodes.index(node).ansn, 0xffff);

    let wrapped = build_remote_tc("10.0.0.2", 2, 0x0000, &[("10.0.0.3", 512)]);
    deliver_tc(&mut ctx, wrapped, "10.0.0.2");
    assert_eq!(ctx.olsrv2.tc.nodes.index(node).ansn, 0x0000);
}

/// TCs from one of our former originator addresses are ignored.
#[test]
fn former_originator_tc_ignored() {
    let mut ctx = ctx();
    add_sym_neighbor(&mut ctx, "10.0.0.2", "10.0.0.2", 512);

    // switch identity: 10.0.0.1 becomes a former originator
    ctx.olsrv2.set_originator(&mut ctx.wheel, 0, addr("10.0.0.99"));

    let tc = build_remote_tc("10.0.0.1", 5, 3, &[("10.0.0.3", 512)]);
    deliver_tc(&mut ctx, tc, "10.0.0.2");
    assert!(ctx.olsrv2.tc.node_get(&addr("10.0.0.1")).is_none());
}

/// Scenario: route convergence over A–B–C with a more expensive direct
/// link, and retraction ordering when the relay is lost.
#[test]
fn route_convergence_and_retraction() {
    let mut ctx = ctx();

    // B: symmetric neighbor, cost 512; C: direct but expensive
    let (neighbor_b, link_b) = add_sym_neighbor(&mut ctx, "10.0.0.2", "10.0.0.2", 512);
    add_sym_neighbor(&mut ctx, "10.0.0.3", "10.0.0.3", 2048);

    // B advertises its symmetric neighbor C with cost 512
    let tc = build_remote_tc("10.0.0.2", 1, 1, &[("10.0.0.3", 512)]);
    deliver_tc(&mut ctx, tc, "10.0.0.2");
    // C itself advertises B back so the edge is bidirectional
    let tc = build_remote_tc("10.0.0.3", 1, 1, &[("10.0.0.2", 512)]);
    deliver_tc(&mut ctx, tc, "10.0.0.3");

    assert!(ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, ctx.now, true));

    let entry_b = ctx.olsrv2.routing.entries[0]
        .get(&addr("10.0.0.2"))
        .expect("route to B");
    assert!(entry_b.set);
    assert_eq!(entry_b.cost, 512);
    assert_eq!(entry_b.gateway, None);

    let entry_c = ctx.olsrv2.routing.entries[0]
        .get(&addr("10.0.0.3"))
        .expect("route to C");
    assert!(entry_c.set);
    // via B beats the direct 2048 link: dijkstra wins over the
    // one-hop override
    assert_eq!(entry_c.cost, 1024);
    assert_eq!(entry_c.gateway, Some(addr("10.0.0.2")));

    // kernel ordering on install: single-hop before multi-hop
    let ops = ctx.olsrv2.routing.take_kernel_queue();
    let adds: Vec<&NetAddr> = ops.iter().filter(|o| o.add).map(|o| &o.request.dst).collect();
    let pos_b = adds.iter().position(|a| **a == addr("10.0.0.2")).unwrap();
    let pos_c = adds.iter().position(|a| **a == addr("10.0.0.3")).unwrap();
    assert!(pos_b < pos_c);
    for op in &ops {
        ctx.olsrv2
            .routing
            .route_finished(op.domain, &op.request.dst, Ok(()));
    }

    // a run without input change produces an empty diff
    assert!(ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, ctx.now, true));
    assert!(ctx.olsrv2.routing.take_kernel_queue().is_empty());

    // link to B is lost: both routes are retracted, multi-hop first
    {
        let l = ctx.nhdp.db.links.index_mut(link_b);
        l.status = LinkStatus::Lost;
        let n = ctx.nhdp.db.neighbors.index_mut(neighbor_b);
        n.symmetric = 0;
    }
    // drop the expensive direct path too so C has no fallback
    let tc_nodes: Vec<_> = ctx.olsrv2.tc.nodes.ids();
    let timers = ctx.olsrv2.timers;
    for node in tc_nodes {
        ctx.olsrv2.tc.node_remove(&mut ctx.wheel, &timers, node);
    }
    {
        // also lose the direct C neighbor
        let c_addr = addr("10.0.0.3");
        let naddr = ctx.nhdp.db.naddr_get(&c_addr).unwrap();
        let neighbor_c = ctx.nhdp.db.naddrs.index(naddr).neighbor;
        let n = ctx.nhdp.db.neighbors.index_mut(neighbor_c);
        n.symmetric = 0;
    }

    assert!(ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, ctx.now, true));
    let ops = ctx.olsrv2.routing.take_kernel_queue();
    let removals: Vec<&NetAddr> = ops
        .iter()
        .filter(|o| !o.add)
        .map(|o| &o.request.dst)
        .collect();
    assert_eq!(removals.len(), 2);
    // multi-hop C goes before single-hop B
    assert_eq!(*removals[0], addr("10.0.0.3"));
    assert_eq!(*removals[1], addr("10.0.0.2"));
}

/// The ANSN advances on neighborhood and metric changes, and only then.
#[test]
fn ansn_advances_on_change() {
    let mut ctx = ctx();

    let first = ctx.olsrv2.update_ansn(&mut ctx.nhdp);
    assert_eq!(ctx.olsrv2.update_ansn(&mut ctx.nhdp), first);

    ctx.olsrv2.mark_neighborhood_changed();
    assert_eq!(ctx.olsrv2.update_ansn(&mut ctx.nhdp), first.wrapping_add(1));

    ctx.nhdp.domains.iter_mut().next().unwrap().metric_changed = true;
    assert_eq!(ctx.olsrv2.update_ansn(&mut ctx.nhdp), first.wrapping_add(2));
    assert_eq!(ctx.olsrv2.update_ansn(&mut ctx.nhdp), first.wrapping_add(2));
}

/// An emitted TC carries the advertised neighborhood and the locally
/// attached networks.
#[test]
fn tc_emission_carries_neighbors_and_lans() {
    let mut ctx = ctx();
    add_sym_neighbor(&mut ctx, "10.0.0.2", "10.0.0.2", 512);
    ctx.olsrv2.lans.add(0, addr("192.168.1.0/24"), 0, 2);

    let raw = build_tc(&mut ctx.olsrv2, &ctx.nhdp, AddrFamily::Ipv4)
        .unwrap()
        .expect("originator configured");

    let mut pkt = PacketBuilder::new();
    pkt.add_message(raw);
    let decoded = Packet::decode(&pkt.finish()).unwrap();
    let msg = &decoded.messages[0];

    assert_eq!(msg.msg_type, iana::MSGTYPE_TC);
    assert_eq!(msg.originator, Some(addr("10.0.0.1")));
    assert!(msg.find_tlv(iana::MSGTLV_CONT_SEQ_NUM, None).is_some());
    assert!(msg.find_tlv(iana::MSGTLV_VALIDITY_TIME, None).is_some());

    let addrs: Vec<NetAddr> = msg
        .addr_blocks
        .iter()
        .flat_map(|block| block.addrs.iter().copied())
        .collect();
    assert!(addrs.contains(&addr("10.0.0.2")));
    assert!(addrs.contains(&addr("192.168.1.0/24")));

    let tlv_types: Vec<u8> = msg
        .addr_blocks
        .iter()
        .flat_map(|block| block.tlvs.iter().map(|t| t.typ))
        .collect();
    assert!(tlv_types.contains(&iana::ADDRTLV_NBR_ADDR_TYPE));
    assert!(tlv_types.contains(&iana::ADDRTLV_GATEWAY));
    assert!(tlv_types.contains(&iana::ADDRTLV_LINK_METRIC));
}

/// A kernel request interrupted by a newer run reverts silently and is
/// retried by the next computation.
#[tokio::test]
async fn cancelled_kernel_request_reverts_and_retries() {
    struct CancellingBackend;

    #[async_trait]
    impl RouteBackend for CancellingBackend {
        async fn set_route(&mut self, _request: &RouteRequest) -> Result<(), RouteError> {
            Ok(())
        }
        async fn delete_route(&mut self, _request: &RouteRequest) -> Result<(), RouteError> {
            Err(RouteError::Cancelled)
        }
        async fn query(
            &mut self,
            _family: AddrFamily,
        ) -> Result<Vec<RouteRequest>, RouteError> {
            Ok(Vec::new())
        }
    }

    let mut ctx = ctx();
    let (neighbor_b, link_b) = add_sym_neighbor(&mut ctx, "10.0.0.2", "10.0.0.2", 512);
    let mut backend = CancellingBackend;

    assert!(ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, 0, true));
    for op in ctx.olsrv2.routing.take_kernel_queue() {
        assert!(op.add);
        let result = backend.set_route(&op.request).await;
        ctx.olsrv2
            .routing
            .route_finished(op.domain, &op.request.dst, result);
    }

    // the neighbor disappears, the route gets queued for removal
    ctx.nhdp.db.links.index_mut(link_b).status = LinkStatus::Lost;
    ctx.nhdp.db.neighbors.index_mut(neighbor_b).symmetric = 0;
    assert!(ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, 300, true));
    let ops = ctx.olsrv2.routing.take_kernel_queue();
    assert_eq!(ops.len(), 1);
    assert!(!ops[0].add);

    // the delete is interrupted mid-flight: the entry reverts to
    // installed instead of vanishing
    let result = backend.delete_route(&ops[0].request).await;
    ctx.olsrv2
        .routing
        .route_finished(ops[0].domain, &ops[0].request.dst, result);
    let entry = ctx.olsrv2.routing.entries[0]
        .get(&addr("10.0.0.2"))
        .expect("entry survives the cancellation");
    assert!(entry.set);
    assert!(!entry.in_processing);

    // the next run picks the removal up again
    assert!(ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, 600, true));
    let retry = ctx.olsrv2.routing.take_kernel_queue();
    assert_eq!(retry.len(), 1);
    assert!(!retry[0].add);
}

/// The rate limiter collapses triggers and a forced run bypasses it.
#[test]
fn dijkstra_rate_limiting() {
    let mut ctx = ctx();
    add_sym_neighbor(&mut ctx, "10.0.0.2", "10.0.0.2", 512);

    assert!(ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, 0, false));
    // inside the rate window a non-forced run is refused
    assert!(!ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, 10, false));
    assert!(ctx.olsrv2.routing.take_trigger());
    // forced runs go through
    assert!(ctx
        .olsrv2
        .run_dijkstra(&mut ctx.nhdp, &mut ctx.wheel, 20, true));
}
