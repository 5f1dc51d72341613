use std::collections::BTreeMap;

use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_core::arena::{Arena, Id};
use wisp_core::timer::TimerWheel;

use crate::Olsrv2Timers;

pub type OriginatorEntryId = Id<OriginatorEntry>;

/// A former originator address, held for O_HOLD so the network can
/// flush TC state tied to the old identity.
#[derive(Debug)]
pub struct OriginatorEntry {
    pub addr: NetAddr,
}

/// The router's current originator per IP family plus the time-bounded
/// set of addresses it used before. Incoming TCs claiming a former
/// originator are ignored until the entry fades.
#[derive(Default)]
pub struct OriginatorSet {
    v4: NetAddr,
    v6: NetAddr,
    entries: Arena<OriginatorEntry>,
    index: BTreeMap<NetAddr, OriginatorEntryId>,
}

impl OriginatorSet {
    pub fn new() -> OriginatorSet {
        OriginatorSet {
            v4: NetAddr::UNSPEC,
            v6: NetAddr::UNSPEC,
            entries: Arena::new(),
            index: BTreeMap::new(),
        }
    }

    pub fn get(&self, family: AddrFamily) -> &NetAddr {
        match family {
            AddrFamily::Ipv4 => &self.v4,
            _ => &self.v6,
        }
    }

    pub fn is_local(&self, addr: &NetAddr) -> bool {
        (!self.v4.is_unspec() && self.v4 == *addr) || (!self.v6.is_unspec() && self.v6 == *addr)
    }

    pub fn is_former(&self, addr: &NetAddr) -> bool {
        self.index.contains_key(addr)
    }

    /// Switch the originator of `addr`'s family. The previous one moves
    /// into the former-originator set for `o_hold` milliseconds.
    pub fn set(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &Olsrv2Timers,
        now: u64,
        o_hold: u64,
        addr: NetAddr,
    ) {
        let slot = match addr.family() {
            AddrFamily::Ipv4 => &mut self.v4,
            AddrFamily::Ipv6 => &mut self.v6,
            _ => return,
        };
        let old = *slot;
        if old == addr {
            return;
        }
        *slot = addr;

        if !old.is_unspec() {
            self.remember_removed(wheel, timers, now, old, o_hold);
        }

        // the new identity must not linger in the former set
        if let Some(&entry) = self.index.get(&addr) {
            self.expire(entry);
        }

        tracing::info!(originator = %addr, "originator set");
    }

    fn remember_removed(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &Olsrv2Timers,
        now: u64,
        addr: NetAddr,
        o_hold: u64,
    ) {
        let entry = match self.index.get(&addr) {
            Some(&entry) => entry,
            None => {
                let entry = self.entries.insert(OriginatorEntry { addr });
                self.index.insert(addr, entry);
                entry
            }
        };
        wheel.set(now, timers.originator_expiry, entry.to_token(), o_hold);
    }

    /// Timer callback: the former originator is forgotten.
    pub fn expire(&mut self, id: OriginatorEntryId) {
        if let Some(entry) = self.entries.remove(id) {
            self.index.remove(&entry.addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> NetAddr {
        s.parse().unwrap()
    }

    #[test]
    fn former_originator_fades() {
        let mut wheel = TimerWheel::new();
        let timers = Olsrv2Timers::register(&mut wheel);
        let mut set = OriginatorSet::new();

        set.set(&mut wheel, &timers, 0, 30_000, addr("10.0.0.1"));
        assert!(set.is_local(&addr("10.0.0.1")));
        assert!(!set.is_former(&addr("10.0.0.1")));

        set.set(&mut wheel, &timers, 100, 30_000, addr("10.0.0.2"));
        assert!(set.is_local(&addr("10.0.0.2")));
        assert!(set.is_former(&addr("10.0.0.1")));

        // the hold timer runs out
        let firing = wheel.poll(31_000).expect("expiry timer");
        assert_eq!(firing.class, timers.originator_expiry);
        set.expire(Id::from_token(firing.token));
        assert!(!set.is_former(&addr("10.0.0.1")));
    }

    #[test]
    fn families_are_independent() {
        let mut wheel = TimerWheel::new();
        let timers = Olsrv2Timers::register(&mut wheel);
        let mut set = OriginatorSet::new();

        set.set(&mut wheel, &timers, 0, 30_000, addr("10.0.0.1"));
        set.set(&mut wheel, &timers, 0, 30_000, addr("fe80::1"));
        assert!(set.is_local(&addr("10.0.0.1")));
        assert!(set.is_local(&addr("fe80::1")));
        assert_eq!(set.get(AddrFamily::Ipv4), &addr("10.0.0.1"));
        assert_eq!(set.get(AddrFamily::Ipv6), &addr("fe80::1"));
    }
}
