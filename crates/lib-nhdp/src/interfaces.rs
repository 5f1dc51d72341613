use std::collections::BTreeMap;

use wisp_core::acl::AddrAcl;
use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_core::arena::{Arena, Id};
use wisp_core::timer::TimerWheel;
use wisp_rfc5444::iana;

use crate::db::{LaddrId, LinkId};
use crate::error::NhdpError;
use crate::NhdpTimers;

pub type IfaceId = Id<NhdpInterface>;
pub type IfaceAddrId = Id<IfaceAddr>;

/// Which address families an interface participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfaceMode {
    Ipv4,
    Ipv6,
    Dual,
}

impl IfaceMode {
    pub fn accepts(&self, family: AddrFamily) -> bool {
        match self {
            IfaceMode::Ipv4 => family == AddrFamily::Ipv4,
            IfaceMode::Ipv6 => family == AddrFamily::Ipv6,
            IfaceMode::Dual => matches!(family, AddrFamily::Ipv4 | AddrFamily::Ipv6),
        }
    }
}

/// Protocol timing of one interface, RFC 6130 section 5.3.2/5.4.1.
#[derive(Debug, Clone)]
pub struct IfaceTiming {
    pub refresh_interval: u64,
    pub h_hold: u64,
    pub l_hold: u64,
    pub n_hold: u64,
    pub i_hold: u64,
}

impl Default for IfaceTiming {
    fn default() -> Self {
        // 2s refresh, 6s holds
        IfaceTiming {
            refresh_interval: 2_000,
            h_hold: 6_000,
            l_hold: 6_000,
            n_hold: 6_000,
            i_hold: 6_000,
        }
    }
}

/// One local address of an NHDP interface. A removed address lingers
/// with `removed = true` until I_HOLD passes so peers see it dropping
/// out of our HELLOs before it disappears.
#[derive(Debug)]
pub struct IfaceAddr {
    pub addr: NetAddr,
    pub iface: IfaceId,
    pub removed: bool,
}

/// A mesh-participating local interface.
#[derive(Debug)]
pub struct NhdpInterface {
    pub name: String,
    pub if_index: u32,
    pub mode: IfaceMode,
    pub timing: IfaceTiming,

    /// Filter over HELLO source addresses.
    pub ifaddr_filter: AddrAcl,

    pub use_ipv4_for_flooding: bool,
    pub use_ipv6_for_flooding: bool,

    pub willingness: u8,

    /// Hold times shortcut used all over the HELLO processing.
    pub n_hold: u64,

    pub addresses: BTreeMap<NetAddr, IfaceAddrId>,
    pub links: Vec<LinkId>,
    pub link_addrs: BTreeMap<NetAddr, LaddrId>,
    pub link_originators: BTreeMap<NetAddr, LinkId>,
}

/// All NHDP interfaces plus the global view over their addresses.
#[derive(Default)]
pub struct InterfaceRegistry {
    ifaces: Arena<NhdpInterface>,
    by_name: BTreeMap<String, IfaceId>,
    by_index: BTreeMap<u32, IfaceId>,
    pub ifaddrs: Arena<IfaceAddr>,
    ifaddr_index: BTreeMap<NetAddr, IfaceAddrId>,
}

impl InterfaceRegistry {
    pub fn new() -> InterfaceRegistry {
        InterfaceRegistry::default()
    }

    pub fn add(
        &mut self,
        name: &str,
        if_index: u32,
        mode: IfaceMode,
        timing: IfaceTiming,
        ifaddr_filter: AddrAcl,
    ) -> Result<IfaceId, NhdpError> {
        if self.by_name.contains_key(name) {
            return Err(NhdpError::InterfaceExists(name.to_string()));
        }
        let n_hold = timing.n_hold;
        let id = self.ifaces.insert(NhdpInterface {
            name: name.to_string(),
            if_index,
            mode,
            timing,
            ifaddr_filter,
            use_ipv4_for_flooding: mode != IfaceMode::Ipv6,
            use_ipv6_for_flooding: mode != IfaceMode::Ipv4,
            willingness: iana::WILLINGNESS_DEFAULT,
            n_hold,
            addresses: BTreeMap::new(),
            links: Vec::new(),
            link_addrs: BTreeMap::new(),
            link_originators: BTreeMap::new(),
        });
        self.by_name.insert(name.to_string(), id);
        self.by_index.insert(if_index, id);
        Ok(id)
    }

    pub fn get(&self, id: IfaceId) -> Option<&NhdpInterface> {
        self.ifaces.get(id)
    }

    pub fn get_mut(&mut self, id: IfaceId) -> Option<&mut NhdpInterface> {
        self.ifaces.get_mut(id)
    }

    pub fn index(&self, id: IfaceId) -> &NhdpInterface {
        self.ifaces.index(id)
    }

    pub fn by_name(&self, name: &str) -> Option<IfaceId> {
        self.by_name.get(name).copied()
    }

    pub fn by_os_index(&self, if_index: u32) -> Option<IfaceId> {
        self.by_index.get(&if_index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IfaceId, &NhdpInterface)> {
        self.ifaces.iter()
    }

    pub fn ids(&self) -> Vec<IfaceId> {
        self.ifaces.ids()
    }

    /* ---------------- interface addresses ---------------- */

    /// Add (or revive) a local address on an interface.
    pub fn addr_add(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        iface: IfaceId,
        addr: NetAddr,
    ) -> IfaceAddrId {
        if let Some(&existing) = self.ifaces.index(iface).addresses.get(&addr) {
            self.ifaddrs.index_mut(existing).removed = false;
            wheel.stop(timers.iface_addr_remove, existing.to_token());
            return existing;
        }
        let id = self.ifaddrs.insert(IfaceAddr {
            addr,
            iface,
            removed: false,
        });
        self.ifaces.index_mut(iface).addresses.insert(addr, id);
        self.ifaddr_index.insert(addr, id);
        id
    }

    /// Mark an address removed; it stays visible (tagged removed) for
    /// I_HOLD and is purged when the timer fires.
    pub fn addr_mark_removed(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &NhdpTimers,
        now: u64,
        id: IfaceAddrId,
    ) {
        let ifaddr = self.ifaddrs.index_mut(id);
        ifaddr.removed = true;
        let iface = ifaddr.iface;
        let i_hold = self.ifaces.index(iface).timing.i_hold;
        wheel.set(now, timers.iface_addr_remove, id.to_token(), i_hold);
    }

    pub fn addr_purge(&mut self, id: IfaceAddrId) {
        let Some(ifaddr) = self.ifaddrs.remove(id) else {
            return;
        };
        if let Some(iface) = self.ifaces.get_mut(ifaddr.iface) {
            iface.addresses.remove(&ifaddr.addr);
        }
        self.ifaddr_index.remove(&ifaddr.addr);
    }

    /// Is this one of the given interface's own addresses?
    pub fn addr_on_iface(&self, iface: IfaceId, addr: &NetAddr) -> bool {
        self.ifaces
            .index(iface)
            .addresses
            .get(addr)
            .map(|id| !self.ifaddrs.index(*id).removed)
            .unwrap_or(false)
    }

    /// Is this an address of any NHDP interface?
    pub fn addr_global(&self, addr: &NetAddr) -> Option<IfaceAddrId> {
        self.ifaddr_index.get(addr).copied()
    }

    /* ---------------- link indices ---------------- */

    pub fn attach_link(&mut self, iface: IfaceId, link: LinkId) {
        self.ifaces.index_mut(iface).links.push(link);
    }

    pub fn detach_link(&mut self, iface: IfaceId, link: LinkId, originator: &NetAddr) {
        if let Some(iface) = self.ifaces.get_mut(iface) {
            iface.links.retain(|l| *l != link);
            if !originator.is_unspec() {
                if iface.link_originators.get(originator) == Some(&link) {
                    iface.link_originators.remove(originator);
                }
            }
        }
    }

    pub fn attach_laddr(&mut self, iface: IfaceId, addr: NetAddr, laddr: LaddrId) {
        self.ifaces.index_mut(iface).link_addrs.insert(addr, laddr);
    }

    pub fn detach_laddr(&mut self, iface: IfaceId, addr: &NetAddr) {
        if let Some(iface) = self.ifaces.get_mut(iface) {
            iface.link_addrs.remove(addr);
        }
    }

    pub fn laddr_lookup(&self, iface: IfaceId, addr: &NetAddr) -> Option<LaddrId> {
        self.ifaces.index(iface).link_addrs.get(addr).copied()
    }

    pub fn set_link_originator(
        &mut self,
        iface: IfaceId,
        old: &NetAddr,
        new: &NetAddr,
        link: LinkId,
    ) {
        if let Some(iface) = self.ifaces.get_mut(iface) {
            if !old.is_unspec() && iface.link_originators.get(old) == Some(&link) {
                iface.link_originators.remove(old);
            }
            if !new.is_unspec() {
                iface.link_originators.insert(*new, link);
            }
        }
    }

    pub fn remove_link_originator(&mut self, iface: IfaceId, originator: &NetAddr) {
        if let Some(iface) = self.ifaces.get_mut(iface) {
            if !originator.is_unspec() {
                iface.link_originators.remove(originator);
            }
        }
    }

    pub fn link_by_originator(&self, iface: IfaceId, originator: &NetAddr) -> Option<LinkId> {
        self.ifaces
            .index(iface)
            .link_originators
            .get(originator)
            .copied()
    }
}
