use crate::db::{Link, LinkId};

/// Link hysteresis plug-in interface.
///
/// Consulted once per accepted HELLO and once per hello-lost timeout;
/// the implementation maintains whatever quality state it wants (keyed
/// by link handle) and publishes its verdict through the `hyst_pending`
/// and `hyst_lost` flags on the link, which feed directly into the link
/// status function.
pub trait Hysteresis {
    fn name(&self) -> &'static str;

    /// `lost` is false for a received HELLO, true for a timeout.
    fn update(&mut self, id: LinkId, link: &mut Link, vtime: u64, itime: u64, lost: bool);

    /// Forget per-link state.
    fn link_removed(&mut self, id: LinkId);
}

/// Default plug-in: no hysteresis, links are never pending or lost
/// beyond what the protocol timers say.
#[derive(Debug, Default)]
pub struct NoHysteresis;

impl Hysteresis for NoHysteresis {
    fn name(&self) -> &'static str {
        "none"
    }

    fn update(&mut self, _id: LinkId, link: &mut Link, _vtime: u64, _itime: u64, _lost: bool) {
        link.hyst_pending = false;
        link.hyst_lost = false;
    }

    fn link_removed(&mut self, _id: LinkId) {}
}
