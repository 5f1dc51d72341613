//! NHDP (RFC 6130) neighborhood discovery: the link/neighbor/2-hop
//! database, HELLO ingest and emission, MPR selection and the plug-in
//! seams for link metrics and hysteresis.

pub mod db;
pub mod domain;
pub mod error;
pub mod hysteresis;
pub mod interfaces;
pub mod link_metric;
pub mod mpr;
pub mod reader;
pub mod writer;

use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_core::arena::Id;
use wisp_core::timer::{ClassId, Firing, TimerWheel};

pub use db::{LinkId, LinkStatus, NeighborId, NhdpDb};
pub use domain::{DomainRegistry, MAX_DOMAINS};
pub use error::NhdpError;
pub use hysteresis::{Hysteresis, NoHysteresis};
pub use interfaces::{IfaceId, IfaceMode, InterfaceRegistry};
pub use link_metric::{HopCountMetric, LinkMetric};

/// Timer classes of the NHDP subsystem, registered once at startup.
#[derive(Debug, Clone, Copy)]
pub struct NhdpTimers {
    pub link_vtime: ClassId,
    pub link_heard: ClassId,
    pub link_sym: ClassId,
    pub naddr_lost: ClassId,
    pub twohop_vtime: ClassId,
    pub neigh_vtime_v4: ClassId,
    pub neigh_vtime_v6: ClassId,
    /// Periodic, jittered; token is the interface handle. Fired timers
    /// are handled by the daemon (it owns the sockets).
    pub iface_hello: ClassId,
    pub iface_addr_remove: ClassId,
}

impl NhdpTimers {
    pub fn register(wheel: &mut TimerWheel) -> NhdpTimers {
        NhdpTimers {
            link_vtime: wheel.add_class("nhdp link vtime", false, 0),
            link_heard: wheel.add_class("nhdp link heard-time", false, 0),
            link_sym: wheel.add_class("nhdp link symtime", false, 0),
            naddr_lost: wheel.add_class("nhdp address lost", false, 0),
            twohop_vtime: wheel.add_class("nhdp 2hop vtime", false, 0),
            neigh_vtime_v4: wheel.add_class("nhdp neighbor vtime v4", false, 0),
            neigh_vtime_v6: wheel.add_class("nhdp neighbor vtime v6", false, 0),
            iface_hello: wheel.add_class("nhdp hello generation", true, 10),
            iface_addr_remove: wheel.add_class("nhdp interface address removal", false, 0),
        }
    }
}

/// Database change notifications collected during processing; the daemon
/// drains them after each dispatch and feeds its plug-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NhdpEvent {
    LinkAdded(LinkId),
    LinkChanged(LinkId),
    LinkRemoved(LinkId),
}

/// The complete NHDP subsystem state.
pub struct Nhdp {
    pub db: NhdpDb,
    pub interfaces: InterfaceRegistry,
    pub domains: DomainRegistry,
    pub timers: NhdpTimers,
    pub hysteresis: Box<dyn Hysteresis + Send>,

    /// Router originator addresses, one per IP family.
    pub originator_v4: NetAddr,
    pub originator_v6: NetAddr,

    /// Scratch state of the HELLO currently being parsed.
    pub(crate) current: Option<reader::HelloCurrent>,

    pub events: Vec<NhdpEvent>,

    /// Set whenever link state, addresses or metrics changed in a way
    /// the routing layer must see. Cleared by the consumer.
    pub neighborhood_changed: bool,
}

impl Nhdp {
    pub fn new(wheel: &mut TimerWheel) -> Nhdp {
        Nhdp {
            db: NhdpDb::new(),
            interfaces: InterfaceRegistry::new(),
            domains: DomainRegistry::new(),
            timers: NhdpTimers::register(wheel),
            hysteresis: Box::new(NoHysteresis),
            originator_v4: NetAddr::UNSPEC,
            originator_v6: NetAddr::UNSPEC,
            current: None,
            events: Vec::new(),
            neighborhood_changed: false,
        }
    }

    pub fn originator(&self, family: AddrFamily) -> &NetAddr {
        match family {
            AddrFamily::Ipv4 => &self.originator_v4,
            _ => &self.originator_v6,
        }
    }

    pub fn set_originator(&mut self, addr: NetAddr) {
        match addr.family() {
            AddrFamily::Ipv4 => self.originator_v4 = addr,
            AddrFamily::Ipv6 => self.originator_v6 = addr,
            _ => {}
        }
    }

    pub fn take_events(&mut self) -> Vec<NhdpEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn take_neighborhood_changed(&mut self) -> bool {
        std::mem::replace(&mut self.neighborhood_changed, false)
    }

    /// Recompute flooding MPRs on every interface and routing MPRs in
    /// every domain.
    pub fn update_mprs(&mut self) {
        for iface in self.interfaces.ids() {
            mpr::update_flooding(&mut self.db, &self.interfaces, iface);
        }
        for index in 0..self.domains.len() {
            mpr::update_routing(&mut self.db, index);
        }
    }

    /// Handle a due timer belonging to NHDP. Returns false if the class
    /// is not ours (e.g. the hello generation timers the daemon owns).
    pub fn handle_timer(&mut self, wheel: &mut TimerWheel, now: u64, firing: &Firing) -> bool {
        let timers = self.timers;

        if firing.class == timers.link_vtime {
            let id: LinkId = Id::from_token(firing.token);
            if let Some(link) = self.db.links.get(id) {
                let neighbor = link.neighbor;
                self.db
                    .link_remove(wheel, &timers, &mut self.interfaces, now, id);
                self.events.push(NhdpEvent::LinkRemoved(id));
                self.hysteresis.link_removed(id);
                if let Some(n) = self.db.neighbors.get(neighbor) {
                    if n.links.is_empty() {
                        self.db
                            .neighbor_remove(wheel, &timers, &mut self.interfaces, now, neighbor);
                    }
                }
                self.neighborhood_changed = true;
            }
            return true;
        }

        if firing.class == timers.link_heard || firing.class == timers.link_sym {
            let id: LinkId = Id::from_token(firing.token);
            if self.db.links.contains(id) {
                let n_hold = self
                    .interfaces
                    .get(self.db.links.index(id).interface)
                    .map(|i| i.n_hold)
                    .unwrap_or(0);
                let link = self.db.links.index_mut(id);
                let (vtime, itime) = (link.vtime_value, link.itime_value);
                self.hysteresis.update(id, link, vtime, itime, true);
                self.db.update_status(wheel, &timers, now, n_hold, id);
                self.neighborhood_changed = true;
            }
            return true;
        }

        if firing.class == timers.naddr_lost {
            let id: db::NaddrId = Id::from_token(firing.token);
            self.db.naddr_remove(wheel, &timers, id);
            self.neighborhood_changed = true;
            return true;
        }

        if firing.class == timers.twohop_vtime {
            let id: db::TwoHopId = Id::from_token(firing.token);
            self.db.twohop_remove(wheel, &timers, id);
            self.neighborhood_changed = true;
            return true;
        }

        if firing.class == timers.neigh_vtime_v4 || firing.class == timers.neigh_vtime_v6 {
            let id: NeighborId = Id::from_token(firing.token);
            let family = if firing.class == timers.neigh_vtime_v4 {
                AddrFamily::Ipv4
            } else {
                AddrFamily::Ipv6
            };
            self.db.neighbor_family_timeout(
                wheel,
                &timers,
                &mut self.interfaces,
                now,
                id,
                family,
            );
            self.neighborhood_changed = true;
            return true;
        }

        if firing.class == timers.iface_addr_remove {
            let id: interfaces::IfaceAddrId = Id::from_token(firing.token);
            self.interfaces.addr_purge(id);
            return true;
        }

        false
    }
}

/// Seam between the dispatching daemon and the NHDP consumers: whatever
/// owns the protocol state hands out the pieces the HELLO processing
/// needs.
pub trait NhdpContext {
    fn nhdp_split(&mut self) -> (&mut Nhdp, &mut TimerWheel);
    fn now(&self) -> u64;
}
