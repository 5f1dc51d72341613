//! Two-node HELLO exchange scenarios driven through the full codec:
//! messages are built with the writer of one node and ingested through
//! the reader of the other.

use wisp_core::acl::AddrAcl;
use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_core::timer::TimerWheel;
use wisp_nhdp::db::LinkStatus;
use wisp_nhdp::domain::MetricParams;
use wisp_nhdp::interfaces::{IfaceMode, IfaceTiming};
use wisp_nhdp::reader::HelloReader;
use wisp_nhdp::writer::build_hello;
use wisp_nhdp::{IfaceId, Nhdp, NhdpContext};
use wisp_rfc5444::iana;
use wisp_rfc5444::reader::process_packet;
use wisp_rfc5444::writer::MessageBuilder;
use wisp_rfc5444::{PacketBuilder, PacketMeta};

struct Node {
    nhdp: Nhdp,
    wheel: TimerWheel,
    now: u64,
    iface: IfaceId,
}

impl NhdpContext for Node {
    fn nhdp_split(&mut self) -> (&mut Nhdp, &mut TimerWheel) {
        (&mut self.nhdp, &mut self.wheel)
    }
    fn now(&self) -> u64 {
        self.now
    }
}

fn addr(s: &str) -> NetAddr {
    s.parse().unwrap()
}

fn node(own_addr: &str) -> Node {
    let mut wheel = TimerWheel::new();
    let mut nhdp = Nhdp::new(&mut wheel);
    nhdp.domains.add(0, "test", MetricParams::default()).unwrap();

    let timing = IfaceTiming {
        refresh_interval: 2_000,
        h_hold: 6_000,
        l_hold: 6_000,
        n_hold: 6_000,
        i_hold: 6_000,
    };
    let iface = nhdp
        .interfaces
        .add("if0", 1, IfaceMode::Ipv4, timing, AddrAcl::accept_all())
        .unwrap();
    let timers = nhdp.timers;
    nhdp.interfaces
        .addr_add(&mut wheel, &timers, iface, addr(own_addr));

    Node {
        nhdp,
        wheel,
        now: 0,
        iface,
    }
}

fn deliver(from: &Node, to: &mut Node) {
    let hello = build_hello(&from.nhdp, &from.wheel, from.iface, AddrFamily::Ipv4)
        .unwrap()
        .expect("sender has something to say");

    let mut pkt = PacketBuilder::new();
    pkt.add_message(hello);
    let raw = pkt.finish();

    let source = from
        .nhdp
        .interfaces
        .index(from.iface)
        .addresses
        .keys()
        .next()
        .copied()
        .unwrap();
    let meta = PacketMeta {
        if_index: 1,
        source,
        is_multicast: true,
        pkt_seqno: None,
    };

    let reader = HelloReader::new();
    process_packet(to, &reader.consumers::<Node>(), &raw, &meta).unwrap();
}

fn deliver_raw(to: &mut Node, msg: Vec<u8>, source: NetAddr) {
    let mut pkt = PacketBuilder::new();
    pkt.add_message(msg);
    let raw = pkt.finish();
    let meta = PacketMeta {
        if_index: 1,
        source,
        is_multicast: true,
        pkt_seqno: None,
    };
    let reader = HelloReader::new();
    process_packet(to, &reader.consumers::<Node>(), &raw, &meta).unwrap();
}

/// Scenario: two-node symmetric discovery.
#[test]
fn two_node_discovery() {
    let mut a = node("10.0.0.1");
    let mut b = node("10.0.0.2");

    // A's first HELLO: B learns a HEARD link
    deliver(&a, &mut b);

    assert_eq!(b.nhdp.db.links.len(), 1);
    let (link_id, link) = b.nhdp.db.links.iter().next().unwrap();
    assert_eq!(link.status, LinkStatus::Heard);
    let timers = b.nhdp.timers;
    assert!(!b.wheel.is_active(timers.link_sym, link_id.to_token()));
    assert_eq!(
        b.wheel.deadline(timers.link_heard, link_id.to_token()),
        Some(6_000)
    );
    assert!(b.nhdp.db.naddr_get(&addr("10.0.0.1")).is_some());

    // B answers, listing 10.0.0.1 as HEARD: A's link goes symmetric
    deliver(&b, &mut a);

    assert_eq!(a.nhdp.db.links.len(), 1);
    let (link_id, link) = a.nhdp.db.links.iter().next().unwrap();
    assert_eq!(link.status, LinkStatus::Symmetric);
    let timers = a.nhdp.timers;
    assert!(a.wheel.is_active(timers.link_sym, link_id.to_token()));
    let neighbor = a.nhdp.db.neighbors.index(link.neighbor);
    assert_eq!(neighbor.symmetric, 1);

    // third leg: B hears that A hears it, B goes symmetric too
    deliver(&a, &mut b);
    let (_, link) = b.nhdp.db.links.iter().next().unwrap();
    assert_eq!(link.status, LinkStatus::Symmetric);
}

/// Scenario: link metric direction reversal on ingest.
#[test]
fn metric_direction_reversal() {
    let mut a = node("10.0.0.1");
    let mut b = node("10.0.0.2");

    // establish the link first
    deliver(&a, &mut b);
    deliver(&b, &mut a);
    deliver(&a, &mut b);

    // hand-build A's HELLO carrying a LINK_METRIC TLV for B's address
    // with incoming-link + outgoing-link bits and cost code 0x100
    let mut msg = MessageBuilder::new(iana::MSGTYPE_HELLO, 4);
    msg.add_message_tlv(
        iana::MSGTLV_INTERVAL_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(2_000)],
    );
    msg.add_message_tlv(
        iana::MSGTLV_VALIDITY_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(6_000)],
    );
    msg.add_address_tlv(addr("10.0.0.1"), iana::ADDRTLV_LOCAL_IF, 0, &[
        iana::LOCALIF_THIS_IF,
    ]);
    msg.add_address_tlv(addr("10.0.0.2"), iana::ADDRTLV_LINK_STATUS, 0, &[
        iana::LINKSTATUS_SYMMETRIC,
    ]);
    let tlv_value: u16 = 0xc000 | 0x100;
    msg.add_address_tlv(
        addr("10.0.0.2"),
        iana::ADDRTLV_LINK_METRIC,
        0,
        &tlv_value.to_be_bytes(),
    );

    deliver_raw(&mut b, msg.finish().unwrap(), addr("10.0.0.1"));

    let (_, link) = b.nhdp.db.links.iter().next().unwrap();
    let expected = wisp_rfc5444::metric::decode(0x100);
    assert_eq!(link.domains[0].metric_out, expected);
    assert_eq!(link.domains[0].metric_in, expected);
}

/// Scenario: two-hop learning from a symmetric peer.
#[test]
fn two_hop_learning() {
    let mut a = node("10.0.0.1");
    let mut b = node("10.0.0.2");

    deliver(&a, &mut b);
    deliver(&b, &mut a);
    // B's view of A is symmetric from here on
    deliver(&a, &mut b);
    // now B advertises its symmetric neighbor C to A
    deliver(&b, &mut a);

    // simulate B knowing C: hand-build the HELLO with an extra
    // OTHER_NEIGHB=SYMMETRIC address
    let mut msg = MessageBuilder::new(iana::MSGTYPE_HELLO, 4);
    msg.add_message_tlv(
        iana::MSGTLV_INTERVAL_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(2_000)],
    );
    msg.add_message_tlv(
        iana::MSGTLV_VALIDITY_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(6_000)],
    );
    msg.add_address_tlv(addr("10.0.0.2"), iana::ADDRTLV_LOCAL_IF, 0, &[
        iana::LOCALIF_THIS_IF,
    ]);
    msg.add_address_tlv(addr("10.0.0.1"), iana::ADDRTLV_LINK_STATUS, 0, &[
        iana::LINKSTATUS_SYMMETRIC,
    ]);
    msg.add_address_tlv(addr("10.0.0.3"), iana::ADDRTLV_LINK_STATUS, 0, &[
        iana::LINKSTATUS_SYMMETRIC,
    ]);

    deliver_raw(&mut a, msg.finish().unwrap(), addr("10.0.0.2"));

    let (link_id, link) = a.nhdp.db.links.iter().next().unwrap();
    assert_eq!(link.status, LinkStatus::Symmetric);
    let twohop_id = a
        .nhdp
        .db
        .twohop_get(link_id, &addr("10.0.0.3"))
        .expect("2-hop entry for 10.0.0.3");
    let timers = a.nhdp.timers;
    assert!(a
        .wheel
        .is_active(timers.twohop_vtime, twohop_id.to_token()));
}

/// One HELLO naming addresses of two known neighbors merges them into
/// one router.
#[test]
fn hello_merges_two_neighbors() {
    let mut a = node("10.0.0.1");

    // two HELLOs from different addresses look like two routers
    for peer in ["10.0.0.2", "10.0.0.5"] {
        let mut msg = MessageBuilder::new(iana::MSGTYPE_HELLO, 4);
        msg.add_message_tlv(
            iana::MSGTLV_INTERVAL_TIME,
            0,
            &[wisp_rfc5444::time_tlv::encode(2_000)],
        );
        msg.add_message_tlv(
            iana::MSGTLV_VALIDITY_TIME,
            0,
            &[wisp_rfc5444::time_tlv::encode(6_000)],
        );
        msg.add_address_tlv(addr(peer), iana::ADDRTLV_LOCAL_IF, 0, &[
            iana::LOCALIF_THIS_IF,
        ]);
        deliver_raw(&mut a, msg.finish().unwrap(), addr(peer));
    }
    assert_eq!(a.nhdp.db.neighbors.len(), 2);
    assert_eq!(a.nhdp.db.links.len(), 2);

    // the router reveals that both addresses are its own
    let mut msg = MessageBuilder::new(iana::MSGTYPE_HELLO, 4);
    msg.add_message_tlv(
        iana::MSGTLV_INTERVAL_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(2_000)],
    );
    msg.add_message_tlv(
        iana::MSGTLV_VALIDITY_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(6_000)],
    );
    msg.add_address_tlv(addr("10.0.0.2"), iana::ADDRTLV_LOCAL_IF, 0, &[
        iana::LOCALIF_THIS_IF,
    ]);
    msg.add_address_tlv(addr("10.0.0.5"), iana::ADDRTLV_LOCAL_IF, 0, &[
        iana::LOCALIF_OTHER_IF,
    ]);
    deliver_raw(&mut a, msg.finish().unwrap(), addr("10.0.0.2"));

    assert_eq!(a.nhdp.db.neighbors.len(), 1);
    let (_, neighbor) = a.nhdp.db.neighbors.iter().next().unwrap();
    assert!(neighbor.addresses.contains_key(&addr("10.0.0.2")));
    assert!(neighbor.addresses.contains_key(&addr("10.0.0.5")));
    assert_eq!(neighbor.links.len(), 2);
}

/// A HELLO degrading us to LOST stops the symmetric timer.
#[test]
fn lost_degrades_symmetric_link() {
    let mut a = node("10.0.0.1");
    let mut b = node("10.0.0.2");

    deliver(&a, &mut b);
    deliver(&b, &mut a);
    let (link_id, link) = a.nhdp.db.links.iter().next().unwrap();
    assert_eq!(link.status, LinkStatus::Symmetric);
    let neighbor_id = link.neighbor;

    // B now claims it lost us
    let mut msg = MessageBuilder::new(iana::MSGTYPE_HELLO, 4);
    msg.add_message_tlv(
        iana::MSGTLV_INTERVAL_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(2_000)],
    );
    msg.add_message_tlv(
        iana::MSGTLV_VALIDITY_TIME,
        0,
        &[wisp_rfc5444::time_tlv::encode(6_000)],
    );
    msg.add_address_tlv(addr("10.0.0.2"), iana::ADDRTLV_LOCAL_IF, 0, &[
        iana::LOCALIF_THIS_IF,
    ]);
    msg.add_address_tlv(addr("10.0.0.1"), iana::ADDRTLV_LINK_STATUS, 0, &[
        iana::LINKSTATUS_LOST,
    ]);

    deliver_raw(&mut a, msg.finish().unwrap(), addr("10.0.0.2"));

    let link = a.nhdp.db.links.index(link_id);
    assert_ne!(link.status, LinkStatus::Symmetric);
    assert_eq!(a.nhdp.db.neighbors.index(neighbor_id).symmetric, 0);
}

/// Timer-driven demotion: when the symmetric timer runs out the link
/// falls back to HEARD and the 2-hop entries disappear.
#[test]
fn symtime_expiry_demotes_link() {
    let mut a = node("10.0.0.1");
    let mut b = node("10.0.0.2");

    deliver(&a, &mut b);
    deliver(&b, &mut a);

    let (link_id, link) = a.nhdp.db.links.iter().next().unwrap();
    assert_eq!(link.status, LinkStatus::Symmetric);

    // walk past the symmetric time
    a.now = 7_000;
    let mut progressed = false;
    while let Some(firing) = a.wheel.poll(a.now) {
        let (nhdp, wheel) = (&mut a.nhdp, &mut a.wheel);
        nhdp.handle_timer(wheel, 7_000, &firing);
        progressed = true;
    }
    assert!(progressed);

    if let Some(link) = a.nhdp.db.links.get(link_id) {
        assert_ne!(link.status, LinkStatus::Symmetric);
    }
}
