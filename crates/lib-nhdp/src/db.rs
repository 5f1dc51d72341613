use std::collections::BTreeMap;

use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_core::arena::{Arena, Id};
use wisp_core::timer::TimerWheel;
use wisp_rfc5444::metric;

use crate::domain::{DomainRegistry, MAX_DOMAINS};
use crate::interfaces::{IfaceId, InterfaceRegistry};
use crate::NhdpTimers;

pub type LinkId = Id<Link>;
pub type NeighborId = Id<Neighbor>;
pub type LaddrId = Id<LinkAddr>;
pub type NaddrId = Id<NeighborAddr>;
pub type TwoHopId = Id<TwoHop>;

/// Deterministic link status, see RFC 6130 and the hysteresis hooks.
///
/// PENDING is not an RFC value: it is reported by the hysteresis plug-in
/// while a new link has not yet proven itself. A pending link never
/// counts into the neighbor's symmetric tally and is never advertised in
/// a LINK_STATUS TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Pending,
    Lost,
    Heard,
    Symmetric,
}

impl LinkStatus {
    /// On-wire LINK_STATUS value, `None` for the pending state.
    pub fn tlv_value(&self) -> Option<u8> {
        match self {
            LinkStatus::Pending => None,
            LinkStatus::Lost => Some(wisp_rfc5444::iana::LINKSTATUS_LOST),
            LinkStatus::Heard => Some(wisp_rfc5444::iana::LINKSTATUS_HEARD),
            LinkStatus::Symmetric => Some(wisp_rfc5444::iana::LINKSTATUS_SYMMETRIC),
        }
    }
}

/// Per-domain data of one link.
#[derive(Debug, Clone, Copy)]
pub struct LinkDomainData {
    pub metric_in: u32,
    pub metric_out: u32,
    pub routing_mpr: bool,
}

impl Default for LinkDomainData {
    fn default() -> Self {
        LinkDomainData {
            metric_in: metric::LINK_COST_INFINITE,
            metric_out: metric::LINK_COST_INFINITE,
            routing_mpr: false,
        }
    }
}

/// One directional relationship through one local interface to one
/// interface of a one-hop neighbor.
#[derive(Debug)]
pub struct Link {
    pub interface: IfaceId,
    pub neighbor: NeighborId,

    /// Cached result of [`NhdpDb::calculate_status`].
    pub status: LinkStatus,

    /// Flags maintained by the hysteresis plug-in.
    pub hyst_pending: bool,
    pub hyst_lost: bool,

    /// True if we selected this link as flooding MPR.
    pub flooding_mpr: bool,

    /// V-time and I-time values of the last accepted HELLO.
    pub vtime_value: u64,
    pub itime_value: u64,

    pub addresses: BTreeMap<NetAddr, LaddrId>,
    pub two_hops: BTreeMap<NetAddr, TwoHopId>,
    pub domains: [LinkDomainData; MAX_DOMAINS],

    /// Scratch counter for HELLO conflict resolution.
    pub process_count: i32,
}

/// Per-domain data of one neighbor.
#[derive(Debug, Clone, Copy)]
pub struct NeighborDomainData {
    pub metric_in: u32,
    pub metric_out: u32,
    pub best_link: Option<LinkId>,
    /// True if this neighbor selected us as routing MPR in this domain.
    pub local_is_mpr: bool,
    pub willingness: u8,
}

impl Default for NeighborDomainData {
    fn default() -> Self {
        NeighborDomainData {
            metric_in: metric::LINK_COST_INFINITE,
            metric_out: metric::LINK_COST_INFINITE,
            best_link: None,
            local_is_mpr: false,
            willingness: wisp_rfc5444::iana::WILLINGNESS_DEFAULT,
        }
    }
}

/// A remote node: the collection of links to it plus its full address
/// set across all of its interfaces.
#[derive(Debug, Default)]
pub struct Neighbor {
    /// Number of links in symmetric state.
    pub symmetric: usize,

    /// Originator address learned from the neighbor's HELLOs, unspec
    /// until the first HELLO carrying one.
    pub originator: NetAddr,

    /// True if this neighbor selected us as flooding MPR.
    pub local_is_flooding_mpr: bool,

    pub links: Vec<LinkId>,
    pub addresses: BTreeMap<NetAddr, NaddrId>,
    pub domains: [NeighborDomainData; MAX_DOMAINS],

    /// Scratch counter for HELLO conflict resolution.
    pub process_count: i32,
}

impl Neighbor {
    fn new() -> Neighbor {
        Neighbor {
            originator: NetAddr::UNSPEC,
            ..Default::default()
        }
    }
}

/// An interface address of a link. Owned by the link, also indexed by
/// the interface the link hangs off.
#[derive(Debug)]
pub struct LinkAddr {
    pub addr: NetAddr,
    pub link: LinkId,
    pub might_be_removed: bool,
}

/// An address of a known one-hop neighbor, or a former address kept
/// around as LOST until its hold time runs out. "Lost" is the state of
/// the address's hold timer.
#[derive(Debug)]
pub struct NeighborAddr {
    pub addr: NetAddr,
    pub neighbor: NeighborId,
    pub might_be_removed: bool,
    pub this_if: bool,
}

/// Per-domain data of one 2-hop entry.
#[derive(Debug, Clone, Copy)]
pub struct TwoHopDomainData {
    pub metric_in: u32,
    pub metric_out: u32,
}

impl Default for TwoHopDomainData {
    fn default() -> Self {
        TwoHopDomainData {
            metric_in: metric::LINK_COST_INFINITE,
            metric_out: metric::LINK_COST_INFINITE,
        }
    }
}

/// One remote address reachable through one symmetric link.
#[derive(Debug)]
pub struct TwoHop {
    pub addr: NetAddr,
    pub link: LinkId,
    pub domains: [TwoHopDomainData; MAX_DOMAINS],
}

/// The NHDP link/neighbor/2-hop database.
///
/// Ownership: a neighbor owns its addresses and links, a link owns its
/// link addresses and 2-hop entries. All validity handling runs over the
/// shared timer wheel with the object handle as token.
#[derive(Default)]
pub struct NhdpDb {
    pub neighbors: Arena<Neighbor>,
    pub links: Arena<Link>,
    pub laddrs: Arena<LinkAddr>,
    pub naddrs: Arena<NeighborAddr>,
    pub two_hops: Arena<TwoHop>,

    /// Global index of neighbor addresses.
    pub naddr_index: BTreeMap<NetAddr, NaddrId>,
}

impl NhdpDb {
    pub fn new() -> NhdpDb {
        NhdpDb::default()
    }

    /* ---------------- neighbors ---------------- */

    pub fn neighbor_add(&mut self) -> NeighborId {
        self.neighbors.insert(Neighbor::new())
    }

    pub fn neighbor_remove(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        ifaces: &mut InterfaceRegistry,
        now: u64,
        id: NeighborId,
    ) {
        let naddr_ids: Vec<NaddrId> =
            self.neighbors.index(id).addresses.values().copied().collect();
        for naddr in naddr_ids {
            self.naddr_remove(wheel, timers, naddr);
        }
        let link_ids = self.neighbors.index(id).links.clone();
        for link in link_ids {
            self.link_remove(wheel, timers, ifaces, now, link);
        }
        wheel.stop(timers.neigh_vtime_v4, id.to_token());
        wheel.stop(timers.neigh_vtime_v6, id.to_token());
        self.neighbors.remove(id);
    }

    /// Merge `src` into `dst` after a HELLO showed they are the same
    /// router: addresses and links move over, the empty husk goes away.
    pub fn neighbor_join(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        ifaces: &mut InterfaceRegistry,
        now: u64,
        dst: NeighborId,
        src: NeighborId,
    ) {
        if dst == src {
            return;
        }

        let src_sym = self.neighbors.index(src).symmetric;
        self.neighbors.index_mut(dst).symmetric += src_sym;

        let naddr_ids: Vec<NaddrId> =
            self.neighbors.index(src).addresses.values().copied().collect();
        for naddr_id in naddr_ids {
            self.naddr_move(dst, naddr_id);
        }

        let src_originator = self.neighbors.index(src).originator;
        let link_ids = self.neighbors.index(src).links.clone();
        for link_id in link_ids {
            self.neighbors.index_mut(src).links.retain(|l| *l != link_id);
            self.links.index_mut(link_id).neighbor = dst;
            self.neighbors.index_mut(dst).links.push(link_id);
            // the originator index still points at the moving link
            // under the old identity
            let iface = self.links.index(link_id).interface;
            ifaces.remove_link_originator(iface, &src_originator);
        }

        // everything of value moved away
        self.neighbors.index_mut(src).symmetric = 0;
        self.neighbor_remove(wheel, timers, ifaces, now, src);
    }

    /* ---------------- neighbor addresses ---------------- */

    pub fn naddr_get(&self, addr: &NetAddr) -> Option<NaddrId> {
        self.naddr_index.get(addr).copied()
    }

    pub fn naddr_add(&mut self, neighbor: NeighborId, addr: NetAddr) -> NaddrId {
        if let Some(existing) = self.naddr_index.get(&addr) {
            return *existing;
        }
        let id = self.naddrs.insert(NeighborAddr {
            addr,
            neighbor,
            might_be_removed: false,
            this_if: false,
        });
        self.naddr_index.insert(addr, id);
        self.neighbors.index_mut(neighbor).addresses.insert(addr, id);
        id
    }

    pub fn naddr_remove(&mut self, wheel: &mut TimerWheel, timers: &NhdpTimers, id: NaddrId) {
        let Some(naddr) = self.naddrs.remove(id) else {
            return;
        };
        wheel.stop(timers.naddr_lost, id.to_token());
        self.naddr_index.remove(&naddr.addr);
        if let Some(neighbor) = self.neighbors.get_mut(naddr.neighbor) {
            neighbor.addresses.remove(&naddr.addr);
        }
    }

    pub fn naddr_move(&mut self, dst: NeighborId, id: NaddrId) {
        let (addr, old) = {
            let naddr = self.naddrs.index(id);
            (naddr.addr, naddr.neighbor)
        };
        if old == dst {
            return;
        }
        self.neighbors.index_mut(old).addresses.remove(&addr);
        self.neighbors.index_mut(dst).addresses.insert(addr, id);
        self.naddrs.index_mut(id).neighbor = dst;
    }

    /// Mark an address LOST for `vtime`; it disappears when the timer
    /// fires. A zero hold time removes it immediately.
    pub fn naddr_set_lost(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        now: u64,
        id: NaddrId,
        vtime: u64,
    ) {
        if vtime == 0 {
            self.naddr_remove(wheel, timers, id);
            return;
        }
        wheel.set(now, timers.naddr_lost, id.to_token(), vtime);
    }

    pub fn naddr_not_lost(&mut self, wheel: &mut TimerWheel, timers: &NhdpTimers, id: NaddrId) {
        wheel.stop(timers.naddr_lost, id.to_token());
    }

    pub fn naddr_is_lost(&self, wheel: &TimerWheel, timers: &NhdpTimers, id: NaddrId) -> bool {
        wheel.is_active(timers.naddr_lost, id.to_token())
    }

    /* ---------------- links ---------------- */

    pub fn link_add(
        &mut self,
        ifaces: &mut InterfaceRegistry,
        domains: &DomainRegistry,
        neighbor: NeighborId,
        iface: IfaceId,
    ) -> LinkId {
        let mut domain_data = [LinkDomainData::default(); MAX_DOMAINS];
        for domain in domains.iter() {
            domain_data[domain.index].metric_in = domain.metric.incoming_start;
            domain_data[domain.index].metric_out = domain.metric.outgoing_start;
        }

        let id = self.links.insert(Link {
            interface: iface,
            neighbor,
            status: LinkStatus::Lost,
            hyst_pending: false,
            hyst_lost: false,
            flooding_mpr: false,
            vtime_value: 0,
            itime_value: 0,
            addresses: BTreeMap::new(),
            two_hops: BTreeMap::new(),
            domains: domain_data,
            process_count: 0,
        });
        self.neighbors.index_mut(neighbor).links.push(id);
        ifaces.attach_link(iface, id);
        id
    }

    pub fn link_remove(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        ifaces: &mut InterfaceRegistry,
        now: u64,
        id: LinkId,
    ) {
        if self.links.index(id).status == LinkStatus::Symmetric {
            let n_hold = ifaces
                .get(self.links.index(id).interface)
                .map(|i| i.n_hold)
                .unwrap_or(0);
            self.link_not_symmetric_anymore(wheel, timers, now, n_hold, id);
        }

        wheel.stop(timers.link_vtime, id.to_token());
        wheel.stop(timers.link_heard, id.to_token());
        wheel.stop(timers.link_sym, id.to_token());

        let laddr_ids: Vec<LaddrId> = self.links.index(id).addresses.values().copied().collect();
        for laddr in laddr_ids {
            self.laddr_remove(ifaces, laddr);
        }
        let twohop_ids: Vec<TwoHopId> = self.links.index(id).two_hops.values().copied().collect();
        for twohop in twohop_ids {
            self.twohop_remove(wheel, timers, twohop);
        }

        let link = self.links.remove(id).expect("stale link handle");
        let originator = self
            .neighbors
            .get(link.neighbor)
            .map(|n| n.originator)
            .unwrap_or(NetAddr::UNSPEC);
        ifaces.detach_link(link.interface, id, &originator);
        if let Some(neighbor) = self.neighbors.get_mut(link.neighbor) {
            neighbor.links.retain(|l| *l != id);
        }
    }

    /// The deterministic status function: hysteresis first, then the
    /// symmetric and heard timers.
    pub fn calculate_status(
        &self,
        wheel: &TimerWheel,
        timers: &NhdpTimers,
        id: LinkId,
    ) -> LinkStatus {
        let link = self.links.index(id);
        if link.hyst_pending {
            LinkStatus::Pending
        } else if link.hyst_lost {
            LinkStatus::Lost
        } else if wheel.is_active(timers.link_sym, id.to_token()) {
            LinkStatus::Symmetric
        } else if wheel.is_active(timers.link_heard, id.to_token()) {
            LinkStatus::Heard
        } else {
            LinkStatus::Lost
        }
    }

    /// Recompute the cached status and apply the symmetric transition
    /// bookkeeping. `n_hold` is the hold time for addresses of a
    /// neighbor that lost its last symmetric link.
    pub fn update_status(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        now: u64,
        n_hold: u64,
        id: LinkId,
    ) {
        let was_symmetric = self.links.index(id).status == LinkStatus::Symmetric;
        let status = self.calculate_status(wheel, timers, id);
        self.links.index_mut(id).status = status;

        if was_symmetric && status != LinkStatus::Symmetric {
            self.link_not_symmetric_anymore(wheel, timers, now, n_hold, id);
        }
        if !was_symmetric && status == LinkStatus::Symmetric {
            self.link_now_symmetric(wheel, timers, id);
        }
    }

    fn link_now_symmetric(&mut self, wheel: &mut TimerWheel, timers: &NhdpTimers, id: LinkId) {
        let neighbor_id = self.links.index(id).neighbor;
        let neighbor = self.neighbors.index_mut(neighbor_id);
        neighbor.symmetric += 1;

        if neighbor.symmetric == 1 {
            let naddr_ids: Vec<NaddrId> = neighbor.addresses.values().copied().collect();
            for naddr in naddr_ids {
                self.naddr_not_lost(wheel, timers, naddr);
            }
        }
    }

    fn link_not_symmetric_anymore(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        now: u64,
        n_hold: u64,
        id: LinkId,
    ) {
        // 2-hop entries exist only behind symmetric links
        let twohop_ids: Vec<TwoHopId> = self.links.index(id).two_hops.values().copied().collect();
        for twohop in twohop_ids {
            self.twohop_remove(wheel, timers, twohop);
        }

        let neighbor_id = self.links.index(id).neighbor;
        let neighbor = self.neighbors.index_mut(neighbor_id);
        neighbor.symmetric = neighbor.symmetric.saturating_sub(1);

        if neighbor.symmetric == 0 {
            let naddr_ids: Vec<NaddrId> = neighbor.addresses.values().copied().collect();
            for naddr in naddr_ids {
                self.naddr_set_lost(wheel, timers, now, naddr, n_hold);
            }
        }
    }

    /* ---------------- link addresses ---------------- */

    pub fn laddr_add(
        &mut self,
        ifaces: &mut InterfaceRegistry,
        link: LinkId,
        addr: NetAddr,
    ) -> LaddrId {
        if let Some(existing) = self.links.index(link).addresses.get(&addr) {
            return *existing;
        }
        let id = self.laddrs.insert(LinkAddr {
            addr,
            link,
            might_be_removed: false,
        });
        self.links.index_mut(link).addresses.insert(addr, id);
        ifaces.attach_laddr(self.links.index(link).interface, addr, id);
        id
    }

    pub fn laddr_remove(&mut self, ifaces: &mut InterfaceRegistry, id: LaddrId) {
        let Some(laddr) = self.laddrs.remove(id) else {
            return;
        };
        if let Some(link) = self.links.get_mut(laddr.link) {
            link.addresses.remove(&laddr.addr);
            let iface = link.interface;
            ifaces.detach_laddr(iface, &laddr.addr);
        }
    }

    /// Move a link address to another link on the same interface.
    pub fn laddr_move(&mut self, ifaces: &mut InterfaceRegistry, dst: LinkId, id: LaddrId) {
        let (addr, old) = {
            let laddr = self.laddrs.index(id);
            (laddr.addr, laddr.link)
        };
        if old == dst {
            return;
        }
        self.links.index_mut(old).addresses.remove(&addr);
        self.links.index_mut(dst).addresses.insert(addr, id);
        self.laddrs.index_mut(id).link = dst;
        // both links hang off the same interface during HELLO
        // processing, the interface index just gets the new owner
        let iface = self.links.index(dst).interface;
        ifaces.attach_laddr(iface, addr, id);
    }

    /* ---------------- 2-hop entries ---------------- */

    pub fn twohop_get(&self, link: LinkId, addr: &NetAddr) -> Option<TwoHopId> {
        self.links.index(link).two_hops.get(addr).copied()
    }

    pub fn twohop_add(&mut self, domains: &DomainRegistry, link: LinkId, addr: NetAddr) -> TwoHopId {
        if let Some(existing) = self.links.index(link).two_hops.get(&addr) {
            return *existing;
        }
        let mut domain_data = [TwoHopDomainData::default(); MAX_DOMAINS];
        for domain in domains.iter() {
            domain_data[domain.index].metric_in = domain.metric.incoming_start;
            domain_data[domain.index].metric_out = domain.metric.outgoing_start;
        }
        let id = self.two_hops.insert(TwoHop {
            addr,
            link,
            domains: domain_data,
        });
        self.links.index_mut(link).two_hops.insert(addr, id);
        id
    }

    pub fn twohop_remove(&mut self, wheel: &mut TimerWheel, timers: &NhdpTimers, id: TwoHopId) {
        let Some(twohop) = self.two_hops.remove(id) else {
            return;
        };
        wheel.stop(timers.twohop_vtime, id.to_token());
        if let Some(link) = self.links.get_mut(twohop.link) {
            link.two_hops.remove(&twohop.addr);
        }
    }

    /* ---------------- metrics ---------------- */

    /// Per-domain neighbor cost is the minimum over the neighbor's
    /// links. Returns true when an aggregate changed.
    pub fn calculate_neighbor_metric(
        &mut self,
        domains: &mut DomainRegistry,
        id: NeighborId,
    ) -> bool {
        let mut changed = false;
        let link_ids = self.neighbors.index(id).links.clone();

        for domain in domains.iter_mut() {
            let mut best_in = metric::LINK_COST_INFINITE;
            let mut best_out = metric::LINK_COST_INFINITE;
            let mut best_link = None;

            for link_id in &link_ids {
                let data = &self.links.index(*link_id).domains[domain.index];
                if data.metric_out < best_out {
                    best_out = data.metric_out;
                    best_link = Some(*link_id);
                }
                if data.metric_in < best_in {
                    best_in = data.metric_in;
                }
            }

            let data = &mut self.neighbors.index_mut(id).domains[domain.index];
            if data.metric_in != best_in || data.metric_out != best_out {
                changed = true;
                domain.metric_changed = true;
            }
            data.metric_in = best_in;
            data.metric_out = best_out;
            data.best_link = best_link;
        }
        changed
    }

    /// Remove the addresses of one family from a neighbor, triggered by
    /// the per-family validity timer.
    pub fn neighbor_family_timeout(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        ifaces: &mut InterfaceRegistry,
        now: u64,
        id: NeighborId,
        family: AddrFamily,
    ) {
        let Some(neighbor) = self.neighbors.get(id) else {
            return;
        };
        let naddr_ids: Vec<NaddrId> = neighbor
            .addresses
            .iter()
            .filter(|(addr, _)| addr.family() == family)
            .map(|(_, id)| *id)
            .collect();
        for naddr in naddr_ids {
            self.naddr_remove(wheel, timers, naddr);
        }

        let neighbor = self.neighbors.index(id);
        if neighbor.addresses.is_empty() && neighbor.links.is_empty() {
            self.neighbor_remove(wheel, timers, ifaces, now, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetricParams;
    use crate::interfaces::{IfaceMode, IfaceTiming, InterfaceRegistry};

    struct Fixture {
        wheel: TimerWheel,
        timers: NhdpTimers,
        ifaces: InterfaceRegistry,
        domains: DomainRegistry,
        db: NhdpDb,
        iface: IfaceId,
    }

    fn fixture() -> Fixture {
        let mut wheel = TimerWheel::new();
        let timers = NhdpTimers::register(&mut wheel);
        let mut ifaces = InterfaceRegistry::new();
        let iface = ifaces
            .add(
                "if0",
                1,
                IfaceMode::Ipv4,
                IfaceTiming::default(),
                Default::default(),
            )
            .unwrap();
        let mut domains = DomainRegistry::new();
        domains.add(0, "test", MetricParams::default()).unwrap();
        Fixture {
            wheel,
            timers,
            ifaces,
            domains,
            db: NhdpDb::new(),
            iface,
        }
    }

    fn addr(s: &str) -> NetAddr {
        s.parse().unwrap()
    }

    #[test]
    fn status_follows_hysteresis_then_timers() {
        let mut f = fixture();
        let neighbor = f.db.neighbor_add();
        let link = f.db.link_add(&mut f.ifaces, &f.domains, neighbor, f.iface);
        let token = link.to_token();

        assert_eq!(f.db.calculate_status(&f.wheel, &f.timers, link), LinkStatus::Lost);

        f.wheel.set(0, f.timers.link_heard, token, 1_000);
        assert_eq!(f.db.calculate_status(&f.wheel, &f.timers, link), LinkStatus::Heard);

        f.wheel.set(0, f.timers.link_sym, token, 1_000);
        assert_eq!(
            f.db.calculate_status(&f.wheel, &f.timers, link),
            LinkStatus::Symmetric
        );

        // hysteresis overrides the timers
        f.db.links.index_mut(link).hyst_lost = true;
        assert_eq!(f.db.calculate_status(&f.wheel, &f.timers, link), LinkStatus::Lost);
        f.db.links.index_mut(link).hyst_pending = true;
        assert_eq!(
            f.db.calculate_status(&f.wheel, &f.timers, link),
            LinkStatus::Pending
        );
    }

    #[test]
    fn symmetric_transitions_keep_the_count() {
        let mut f = fixture();
        let neighbor = f.db.neighbor_add();
        let link = f.db.link_add(&mut f.ifaces, &f.domains, neighbor, f.iface);
        f.db.naddr_add(neighbor, addr("10.0.0.2"));
        f.db.twohop_add(&f.domains, link, addr("10.0.0.3"));

        f.wheel.set(0, f.timers.link_sym, link.to_token(), 1_000);
        f.db.update_status(&mut f.wheel, &f.timers, 0, 6_000, link);
        assert_eq!(f.db.neighbors.index(neighbor).symmetric, 1);

        // dropping out of symmetric purges 2-hops and marks addresses
        f.wheel.stop(f.timers.link_sym, link.to_token());
        f.db.update_status(&mut f.wheel, &f.timers, 0, 6_000, link);
        assert_eq!(f.db.neighbors.index(neighbor).symmetric, 0);
        assert!(f.db.links.index(link).two_hops.is_empty());
        let naddr = f.db.naddr_get(&addr("10.0.0.2")).unwrap();
        assert!(f.db.naddr_is_lost(&f.wheel, &f.timers, naddr));
    }

    #[test]
    fn zero_hold_time_removes_address_immediately() {
        let mut f = fixture();
        let neighbor = f.db.neighbor_add();
        let naddr = f.db.naddr_add(neighbor, addr("10.0.0.2"));

        f.db.naddr_set_lost(&mut f.wheel, &f.timers, 0, naddr, 0);
        assert!(f.db.naddr_get(&addr("10.0.0.2")).is_none());
    }

    #[test]
    fn neighbor_join_moves_everything() {
        let mut f = fixture();
        let kept = f.db.neighbor_add();
        let gone = f.db.neighbor_add();

        let link_kept = f.db.link_add(&mut f.ifaces, &f.domains, kept, f.iface);
        let link_gone = f.db.link_add(&mut f.ifaces, &f.domains, gone, f.iface);
        f.db.naddr_add(kept, addr("10.0.0.2"));
        f.db.naddr_add(gone, addr("10.0.0.3"));
        f.db.links.index_mut(link_gone).status = LinkStatus::Symmetric;
        f.db.neighbors.index_mut(gone).symmetric = 1;

        f.db.neighbor_join(&mut f.wheel, &f.timers, &mut f.ifaces, 0, kept, gone);

        assert!(!f.db.neighbors.contains(gone));
        let kept_ref = f.db.neighbors.index(kept);
        assert_eq!(kept_ref.symmetric, 1);
        assert_eq!(kept_ref.links.len(), 2);
        assert!(kept_ref.addresses.contains_key(&addr("10.0.0.2")));
        assert!(kept_ref.addresses.contains_key(&addr("10.0.0.3")));
        assert_eq!(f.db.links.index(link_kept).neighbor, kept);
        assert_eq!(f.db.links.index(link_gone).neighbor, kept);
    }

    #[test]
    fn link_removal_cleans_neighbor_accounting() {
        let mut f = fixture();
        let neighbor = f.db.neighbor_add();
        let link = f.db.link_add(&mut f.ifaces, &f.domains, neighbor, f.iface);
        f.db.laddr_add(&mut f.ifaces, link, addr("10.0.0.2"));
        f.db.links.index_mut(link).status = LinkStatus::Symmetric;
        f.db.neighbors.index_mut(neighbor).symmetric = 1;

        f.db.link_remove(&mut f.wheel, &f.timers, &mut f.ifaces, 0, link);

        assert!(!f.db.links.contains(link));
        assert_eq!(f.db.neighbors.index(neighbor).symmetric, 0);
        assert!(f.ifaces.laddr_lookup(f.iface, &addr("10.0.0.2")).is_none());
        assert!(f.ifaces.index(f.iface).links.is_empty());
    }

    #[test]
    fn neighbor_metric_is_minimum_over_links() {
        let mut f = fixture();
        let neighbor = f.db.neighbor_add();
        let link_a = f.db.link_add(&mut f.ifaces, &f.domains, neighbor, f.iface);
        let link_b = f.db.link_add(&mut f.ifaces, &f.domains, neighbor, f.iface);

        f.db.links.index_mut(link_a).domains[0].metric_out = 2_000;
        f.db.links.index_mut(link_b).domains[0].metric_out = 1_000;
        f.db.links.index_mut(link_a).domains[0].metric_in = 800;
        f.db.links.index_mut(link_b).domains[0].metric_in = 900;

        assert!(f.db.calculate_neighbor_metric(&mut f.domains, neighbor));
        let data = &f.db.neighbors.index(neighbor).domains[0];
        assert_eq!(data.metric_out, 1_000);
        assert_eq!(data.metric_in, 800);
        assert_eq!(data.best_link, Some(link_b));
        assert!(f.domains.take_metric_changed());

        // unchanged input reports no change
        assert!(!f.db.calculate_neighbor_metric(&mut f.domains, neighbor));
    }
}
