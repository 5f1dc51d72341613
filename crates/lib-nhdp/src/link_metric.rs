use wisp_core::timer::TimerWheel;

use crate::db::{LinkId, NhdpDb};
use crate::domain::DomainRegistry;

/// Link metric plug-in interface, one handler per domain.
///
/// A plug-in observes packets (with their packet sequence numbers) and
/// hello-lost timeouts per link, and periodically publishes a fresh
/// incoming cost into the link's metric slot for its domain. The encoded
/// 12-bit wire form is the canonical quantization: implementations are
/// expected to run their computed cost through encode-then-decode before
/// publishing.
pub trait LinkMetric {
    fn name(&self) -> &'static str;

    /// Cost range and initial values of this metric.
    fn params(&self) -> crate::domain::MetricParams;

    /// A packet arrived over `link`. `pkt_seqno` is the packet sequence
    /// number when the peer sends them.
    fn on_packet(&mut self, link: LinkId, pkt_seqno: Option<u16>);

    /// An accepted HELLO refreshed `link`; gives the plug-in the current
    /// interval/validity so it can arm its own loss timer.
    fn on_hello(&mut self, wheel: &mut TimerWheel, now: u64, link: LinkId, vtime: u64, itime: u64);

    /// The plug-in's hello-lost timer fired for `link`.
    fn on_hello_lost(&mut self, wheel: &mut TimerWheel, now: u64, link: LinkId);

    /// Periodic sampling: refresh the incoming cost of every link in
    /// `domain_index`. Returns true if any cost changed.
    fn sample(&mut self, db: &mut NhdpDb, domains: &mut DomainRegistry, domain_index: usize)
        -> bool;

    fn link_added(&mut self, link: LinkId);
    fn link_removed(&mut self, wheel: &mut TimerWheel, link: LinkId);
}

/// Fallback metric: every link costs the minimum, turning all domains
/// into plain hop count.
#[derive(Debug, Default)]
pub struct HopCountMetric;

impl LinkMetric for HopCountMetric {
    fn name(&self) -> &'static str {
        "hopcount"
    }

    fn params(&self) -> crate::domain::MetricParams {
        use wisp_rfc5444::metric::LINK_COST_MINIMUM;
        crate::domain::MetricParams {
            minimum: LINK_COST_MINIMUM,
            maximum: LINK_COST_MINIMUM,
            incoming_start: LINK_COST_MINIMUM,
            outgoing_start: LINK_COST_MINIMUM,
        }
    }

    fn on_packet(&mut self, _link: LinkId, _pkt_seqno: Option<u16>) {}

    fn on_hello(
        &mut self,
        _wheel: &mut TimerWheel,
        _now: u64,
        _link: LinkId,
        _vtime: u64,
        _itime: u64,
    ) {
    }

    fn on_hello_lost(&mut self, _wheel: &mut TimerWheel, _now: u64, _link: LinkId) {}

    fn sample(
        &mut self,
        _db: &mut NhdpDb,
        _domains: &mut DomainRegistry,
        _domain_index: usize,
    ) -> bool {
        false
    }

    fn link_added(&mut self, _link: LinkId) {}
    fn link_removed(&mut self, _wheel: &mut TimerWheel, _link: LinkId) {}
}
