use std::collections::{BTreeMap, BTreeSet};

use wisp_core::addr::NetAddr;
use wisp_rfc5444::iana;
use wisp_rfc5444::metric;

use crate::db::{LinkId, LinkStatus, NeighborId, NhdpDb};
use crate::interfaces::{IfaceId, InterfaceRegistry};

/// Recompute the flooding MPR set of one interface.
///
/// Greedy cover: a minimal-ish set of symmetric links whose strict
/// 2-hop neighborhoods together cover every 2-hop address reachable over
/// this interface. Neighbors with willingness NEVER are excluded,
/// willingness ALWAYS is selected unconditionally. Ties fall to the
/// link covering more and, last, to the lower link address, which keeps
/// the selection deterministic.
pub fn update_flooding(db: &mut NhdpDb, ifaces: &InterfaceRegistry, iface_id: IfaceId) {
    let iface = ifaces.index(iface_id);

    // candidate links and their strict 2-hop coverage
    let mut coverage: BTreeMap<LinkId, BTreeSet<NetAddr>> = BTreeMap::new();
    let mut uncovered: BTreeSet<NetAddr> = BTreeSet::new();

    for &link_id in &iface.links {
        let link = db.links.index(link_id);
        if link.status != LinkStatus::Symmetric {
            db.links.index_mut(link_id).flooding_mpr = false;
            continue;
        }
        let neighbor = db.neighbors.index(link.neighbor);
        if neighbor.domains[0].willingness == iana::WILLINGNESS_NEVER {
            db.links.index_mut(link_id).flooding_mpr = false;
            continue;
        }

        let link = db.links.index(link_id);
        let mut covers = BTreeSet::new();
        for addr in link.two_hops.keys() {
            // strict 2-hop: not one of our own addresses, not a 1-hop
            if ifaces.addr_global(addr).is_some() {
                continue;
            }
            if db.naddr_get(addr).is_some() {
                continue;
            }
            covers.insert(*addr);
            uncovered.insert(*addr);
        }
        coverage.insert(link_id, covers);
    }

    for link_id in coverage.keys() {
        db.links.index_mut(*link_id).flooding_mpr = false;
    }

    // willingness ALWAYS is in the set no matter what
    let mut selected: Vec<LinkId> = Vec::new();
    for (&link_id, covers) in &coverage {
        let neighbor = db.neighbors.index(db.links.index(link_id).neighbor);
        if neighbor.domains[0].willingness == iana::WILLINGNESS_ALWAYS {
            selected.push(link_id);
            for addr in covers {
                uncovered.remove(addr);
            }
        }
    }

    while !uncovered.is_empty() {
        let mut best: Option<(usize, u8, NetAddr, LinkId)> = None;
        for (&link_id, covers) in &coverage {
            if selected.contains(&link_id) {
                continue;
            }
            let gain = covers.intersection(&uncovered).count();
            if gain == 0 {
                continue;
            }
            let neighbor = db.neighbors.index(db.links.index(link_id).neighbor);
            let willingness = neighbor.domains[0].willingness;
            let tiebreak = db
                .links
                .index(link_id)
                .addresses
                .keys()
                .next()
                .copied()
                .unwrap_or(NetAddr::UNSPEC);

            let better = match &best {
                None => true,
                Some((best_gain, best_will, best_addr, _)) => {
                    (gain, willingness) > (*best_gain, *best_will)
                        || ((gain, willingness) == (*best_gain, *best_will)
                            && tiebreak < *best_addr)
                }
            };
            if better {
                best = Some((gain, willingness, tiebreak, link_id));
            }
        }

        let Some((_, _, _, link_id)) = best else {
            break; // leftovers are unreachable through any candidate
        };
        selected.push(link_id);
        for addr in &coverage[&link_id] {
            uncovered.remove(addr);
        }
    }

    for link_id in selected {
        db.links.index_mut(link_id).flooding_mpr = true;
    }
}

/// Recompute the routing MPR set of one domain.
///
/// Same cover construction as flooding, but global over all neighbors
/// and cost-aware: cheaper first hops win ties, and a neighbor is only
/// a candidate while its outgoing metric is finite.
pub fn update_routing(db: &mut NhdpDb, domain_index: usize) {
    let mut coverage: BTreeMap<NeighborId, BTreeSet<NetAddr>> = BTreeMap::new();
    let mut cost: BTreeMap<NeighborId, u32> = BTreeMap::new();
    let mut uncovered: BTreeSet<NetAddr> = BTreeSet::new();

    let neighbor_ids = db.neighbors.ids();
    for &neighbor_id in &neighbor_ids {
        let neighbor = db.neighbors.index(neighbor_id);
        for &link_id in &neighbor.links {
            db.links.index_mut(link_id).domains[domain_index].routing_mpr = false;
        }

        let neighbor = db.neighbors.index(neighbor_id);
        if neighbor.symmetric == 0
            || neighbor.domains[domain_index].willingness == iana::WILLINGNESS_NEVER
        {
            continue;
        }
        let neighbor_cost = neighbor.domains[domain_index].metric_out;
        if neighbor_cost >= metric::LINK_COST_INFINITE {
            continue;
        }

        let mut covers = BTreeSet::new();
        for &link_id in &neighbor.links {
            let link = db.links.index(link_id);
            if link.status != LinkStatus::Symmetric {
                continue;
            }
            for (addr, &twohop_id) in &link.two_hops {
                let twohop = db.two_hops.index(twohop_id);
                if twohop.domains[domain_index].metric_out >= metric::LINK_COST_INFINITE {
                    continue;
                }
                if db.naddr_get(addr).is_some() {
                    continue;
                }
                covers.insert(*addr);
                uncovered.insert(*addr);
            }
        }
        if !covers.is_empty() || neighbor.domains[domain_index].willingness == iana::WILLINGNESS_ALWAYS
        {
            coverage.insert(neighbor_id, covers);
            cost.insert(neighbor_id, neighbor_cost);
        }
    }

    let mut selected: Vec<NeighborId> = Vec::new();
    for (&neighbor_id, covers) in &coverage {
        if db.neighbors.index(neighbor_id).domains[domain_index].willingness
            == iana::WILLINGNESS_ALWAYS
        {
            selected.push(neighbor_id);
            for addr in covers {
                uncovered.remove(addr);
            }
        }
    }

    while !uncovered.is_empty() {
        let mut best: Option<(usize, std::cmp::Reverse<u32>, NeighborId)> = None;
        for (&neighbor_id, covers) in &coverage {
            if selected.contains(&neighbor_id) {
                continue;
            }
            let gain = covers.intersection(&uncovered).count();
            if gain == 0 {
                continue;
            }
            let key = (gain, std::cmp::Reverse(cost[&neighbor_id]), neighbor_id);
            if best.map(|b| key > b).unwrap_or(true) {
                best = Some(key);
            }
        }

        let Some((_, _, neighbor_id)) = best else {
            break;
        };
        selected.push(neighbor_id);
        for addr in &coverage[&neighbor_id] {
            uncovered.remove(addr);
        }
    }

    for neighbor_id in selected {
        let links = db.neighbors.index(neighbor_id).links.clone();
        for link_id in links {
            if db.links.index(link_id).status == LinkStatus::Symmetric {
                db.links.index_mut(link_id).domains[domain_index].routing_mpr = true;
            }
        }
    }
}
