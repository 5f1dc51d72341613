//! OLSRv2 (RFC 7181): topology dissemination via TC messages over the
//! flooding MPR overlay, the link-state database, and the per-domain
//! shortest-path routing sets reconciled with the kernel.

pub mod error;
pub mod lan;
pub mod originator;
pub mod reader;
pub mod routing;
pub mod tc;
pub mod writer;

use wisp_core::acl::AddrAcl;
use wisp_core::addr::NetAddr;
use wisp_core::arena::Id;
use wisp_core::timer::{ClassId, Firing, TimerWheel};
use wisp_nhdp::{Nhdp, NhdpContext};
use wisp_rfc5444::DuplicateSet;

pub use error::{Olsrv2Error, RouteError};
pub use lan::{LanConfig, LanDb};
pub use originator::OriginatorSet;
pub use routing::{KernelOp, RouteBackend, RouteRequest, RoutingSet};
pub use tc::TcDb;

/// Timer classes of the OLSRv2 subsystem.
#[derive(Debug, Clone, Copy)]
pub struct Olsrv2Timers {
    pub tc_validity: ClassId,
    pub originator_expiry: ClassId,
    /// Periodic, jittered; handled by the daemon which owns the
    /// sockets.
    pub tc_generation: ClassId,
    pub dijkstra_ratelimit: ClassId,
}

impl Olsrv2Timers {
    pub fn register(wheel: &mut TimerWheel) -> Olsrv2Timers {
        Olsrv2Timers {
            tc_validity: wheel.add_class("olsrv2 tc node validity", false, 0),
            originator_expiry: wheel.add_class("olsrv2 originator set vtime", false, 0),
            tc_generation: wheel.add_class("olsrv2 tc generation", true, 10),
            dijkstra_ratelimit: wheel.add_class("olsrv2 dijkstra rate limit", false, 0),
        }
    }
}

/// Timing and policy knobs of the OLSRv2 core.
#[derive(Debug, Clone)]
pub struct Olsrv2Config {
    pub tc_interval: u64,
    pub tc_validity: u64,
    pub forward_hold_time: u64,
    pub processing_hold_time: u64,
    pub originator_hold_time: u64,
    /// Which addresses get routes. The default rejects link-local,
    /// loopback and multicast space.
    pub routable: AddrAcl,
}

impl Default for Olsrv2Config {
    fn default() -> Self {
        Olsrv2Config {
            tc_interval: 5_000,
            tc_validity: 15_000,
            forward_hold_time: 300_000,
            processing_hold_time: 300_000,
            originator_hold_time: 30_000,
            routable: default_routable(),
        }
    }
}

/// The default routable filter of RFC 7181: everything except loopback,
/// link-local and multicast.
pub fn default_routable() -> AddrAcl {
    AddrAcl::new(true)
        .reject("169.254.0.0/16".parse().unwrap())
        .reject("127.0.0.0/8".parse().unwrap())
        .reject("224.0.0.0/4".parse().unwrap())
        .reject("fe80::/10".parse().unwrap())
        .reject("::1/128".parse().unwrap())
        .reject("ff00::/8".parse().unwrap())
}

/// Interval between two Dijkstra runs.
const DIJKSTRA_RATE_LIMIT: u64 = 250;

/// The complete OLSRv2 subsystem state.
pub struct Olsrv2 {
    pub tc: TcDb,
    pub originators: OriginatorSet,
    pub lans: LanDb,
    pub routing: RoutingSet,

    /// Suppression of repeated processing and repeated forwarding;
    /// deliberately separate sets with separate hold times.
    pub processed_set: DuplicateSet,
    pub forwarded_set: DuplicateSet,

    pub config: Olsrv2Config,
    pub timers: Olsrv2Timers,

    /// Advertised neighbor sequence number of our own TCs.
    pub ansn: u16,
    ansn_dirty: bool,
    msg_seqno: u16,

    /// Raw messages waiting to be re-flooded on every flood-active
    /// interface.
    pub flood_queue: Vec<Vec<u8>>,

    pub(crate) current_tc: Option<reader::TcCurrent>,
}

impl Olsrv2 {
    /// `seed` provides the initial ANSN and message sequence number;
    /// the daemon passes randomness so restarts do not replay.
    pub fn new(wheel: &mut TimerWheel, config: Olsrv2Config, seed: u32) -> Olsrv2 {
        Olsrv2 {
            tc: TcDb::new(),
            originators: OriginatorSet::new(),
            lans: LanDb::new(),
            routing: RoutingSet::new(),
            processed_set: DuplicateSet::new(),
            forwarded_set: DuplicateSet::new(),
            config,
            timers: Olsrv2Timers::register(wheel),
            ansn: seed as u16,
            ansn_dirty: false,
            msg_seqno: (seed >> 16) as u16,
            flood_queue: Vec::new(),
            current_tc: None,
        }
    }

    pub fn next_msg_seqno(&mut self) -> u16 {
        self.msg_seqno = self.msg_seqno.wrapping_add(1);
        self.msg_seqno
    }

    /// The advertised neighbor set changed (a neighbor appeared, went
    /// away or switched addresses); the next TC needs a fresh ANSN.
    pub fn mark_neighborhood_changed(&mut self) {
        self.ansn_dirty = true;
    }

    /// Advance the ANSN when any domain reported a metric change or the
    /// neighborhood itself changed since the last TC.
    pub fn update_ansn(&mut self, nhdp: &mut Nhdp) -> u16 {
        let metric_changed = nhdp.domains.take_metric_changed();
        if std::mem::replace(&mut self.ansn_dirty, false) || metric_changed {
            self.ansn = self.ansn.wrapping_add(1);
        }
        self.ansn
    }

    pub fn set_originator(&mut self, wheel: &mut TimerWheel, now: u64, addr: NetAddr) {
        let timers = self.timers;
        let o_hold = self.config.originator_hold_time;
        self.originators.set(wheel, &timers, now, o_hold, addr);
    }

    pub fn take_flood_queue(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.flood_queue)
    }

    /// Request a routing recomputation; collapses into the rate
    /// limiting window.
    pub fn trigger_dijkstra(&mut self, wheel: &mut TimerWheel, now: u64) {
        self.routing.set_trigger();
        if !wheel.is_active(self.timers.dijkstra_ratelimit, 0) {
            wheel.set(now, self.timers.dijkstra_ratelimit, 0, 1);
        }
    }

    /// Run the Dijkstra now unless the rate limiter holds it back;
    /// `force` bypasses the limiter. Returns true when a run happened
    /// (the kernel queue may hold work afterwards).
    pub fn run_dijkstra(
        &mut self,
        nhdp: &mut Nhdp,
        wheel: &mut TimerWheel,
        now: u64,
        force: bool,
    ) -> bool {
        if wheel.is_active(self.timers.dijkstra_ratelimit, 0) {
            if !force {
                self.routing.set_trigger();
                return false;
            }
            wheel.stop(self.timers.dijkstra_ratelimit, 0);
        }

        self.routing
            .run(nhdp, &mut self.tc, &self.config.routable, &self.originators);
        wheel.set(now, self.timers.dijkstra_ratelimit, 0, DIJKSTRA_RATE_LIMIT);
        true
    }

    /// Handle a due OLSRv2 timer. Returns false for the classes the
    /// daemon drives itself (TC generation, the rate limit window).
    pub fn handle_timer(&mut self, wheel: &mut TimerWheel, now: u64, firing: &Firing) -> bool {
        let timers = self.timers;

        if firing.class == timers.tc_validity {
            let id: tc::TcNodeId = Id::from_token(firing.token);
            if self.tc.nodes.contains(id) {
                self.tc.node_remove(wheel, &timers, id);
                self.trigger_dijkstra(wheel, now);
            }
            return true;
        }

        if firing.class == timers.originator_expiry {
            self.originators.expire(Id::from_token(firing.token));
            return true;
        }

        false
    }
}

/// Seam between the daemon and the TC consumers.
pub trait Olsrv2Context: NhdpContext {
    fn olsrv2_split(&mut self) -> (&mut Olsrv2, &mut Nhdp, &mut TimerWheel);
}
