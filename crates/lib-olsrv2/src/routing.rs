//! Per-domain shortest paths over the topology graph and the diff
//! against the kernel routing table.
//!
//! One run is atomic with respect to all other protocol work: prepare,
//! seed with the symmetric one-hop neighborhood, relax, override with
//! direct one- and two-hop routes the topology may not advertise yet,
//! then diff every routing entry against its last installed state and
//! queue the changes for the kernel channel.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};

use async_trait::async_trait;

use wisp_core::addr::{AddrFamily, NetAddr};
use wisp_nhdp::db::NeighborId;
use wisp_nhdp::domain::MAX_DOMAINS;
use wisp_nhdp::Nhdp;
use wisp_core::acl::AddrAcl;
use wisp_rfc5444::metric;

use crate::error::RouteError;
use crate::originator::OriginatorSet;
use crate::tc::{TcDb, TcEndpointId, TcNodeId};

/// Kernel parameters per domain.
#[derive(Debug, Clone, Copy)]
pub struct RoutingDomainParams {
    pub table: u8,
    pub protocol: u8,
    pub distance: u8,
}

impl Default for RoutingDomainParams {
    fn default() -> Self {
        RoutingDomainParams {
            table: 254,    // main
            protocol: 100, // well outside the kernel-reserved range
            distance: 2,
        }
    }
}

/// One request on the kernel route channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub family: AddrFamily,
    pub dst: NetAddr,
    pub src: Option<NetAddr>,
    pub gateway: Option<NetAddr>,
    pub if_index: u32,
    pub metric: u32,
    pub table: u8,
    pub protocol: u8,
}

/// The asynchronous route installation backend. The daemon supplies an
/// implementation; everything here only queues requests and consumes
/// completions.
#[async_trait]
pub trait RouteBackend {
    async fn set_route(&mut self, request: &RouteRequest) -> Result<(), RouteError>;
    async fn delete_route(&mut self, request: &RouteRequest) -> Result<(), RouteError>;
    async fn query(&mut self, family: AddrFamily) -> Result<Vec<RouteRequest>, RouteError>;
}

/// One target in the routing set of a domain.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub dst: NetAddr,
    pub cost: u32,
    /// True if the entry belongs into the kernel table.
    pub set: bool,
    /// True while a kernel request for this entry is in flight.
    pub in_processing: bool,
    pub if_index: u32,
    pub gateway: Option<NetAddr>,
    pub distance: u8,

    old_if_index: u32,
    old_gateway: Option<NetAddr>,
    old_distance: u8,
}

impl RouteEntry {
    fn new(dst: NetAddr) -> RouteEntry {
        RouteEntry {
            dst,
            cost: metric::PATH_COST_INFINITE,
            set: false,
            in_processing: false,
            if_index: 0,
            gateway: None,
            distance: 0,
            // sentinel: guarantees the first install is queued
            old_if_index: u32::MAX,
            old_gateway: None,
            old_distance: u8::MAX,
        }
    }
}

/// A queued kernel operation, in execution order.
#[derive(Debug, Clone)]
pub struct KernelOp {
    pub domain: usize,
    pub add: bool,
    pub request: RouteRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Target {
    Node(TcNodeId),
    Endpoint(TcEndpointId),
}

/// The routing sets of all domains plus the kernel work queue.
pub struct RoutingSet {
    pub entries: Vec<BTreeMap<NetAddr, RouteEntry>>,
    pub params: [RoutingDomainParams; MAX_DOMAINS],
    trigger_pending: bool,
    kernel_queue: VecDeque<KernelOp>,
    shutdown: bool,
}

impl Default for RoutingSet {
    fn default() -> Self {
        RoutingSet::new()
    }
}

impl RoutingSet {
    pub fn new() -> RoutingSet {
        RoutingSet {
            entries: (0..MAX_DOMAINS).map(|_| BTreeMap::new()).collect(),
            params: [RoutingDomainParams::default(); MAX_DOMAINS],
            trigger_pending: false,
            kernel_queue: VecDeque::new(),
            shutdown: false,
        }
    }

    pub fn set_trigger(&mut self) {
        self.trigger_pending = true;
    }

    pub fn take_trigger(&mut self) -> bool {
        std::mem::replace(&mut self.trigger_pending, false)
    }

    /// Queue the removal of everything we put into the kernel.
    pub fn initiate_shutdown(&mut self) {
        self.shutdown = true;
        for domain in 0..MAX_DOMAINS {
            let dsts: Vec<NetAddr> = self.entries[domain].keys().copied().collect();
            for dst in dsts {
                let params = self.params[domain];
                let entry = self.entries[domain].get_mut(&dst).unwrap();
                if entry.set {
                    entry.set = false;
                    queue_kernel_op(&mut self.kernel_queue, domain, entry, params);
                }
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown
    }

    /// Run the Dijkstra for every active domain and queue the kernel
    /// diff.
    pub fn run(
        &mut self,
        nhdp: &Nhdp,
        tc: &mut TcDb,
        routable: &AddrAcl,
        originators: &OriginatorSet,
    ) {
        if self.shutdown {
            return;
        }

        for domain_index in 0..nhdp.domains.len() {
            self.prepare(tc, originators, domain_index);
            self.run_domain(nhdp, tc, domain_index);
            self.handle_nhdp_routes(nhdp, routable, domain_index);
            self.process_result(domain_index);
        }
    }

    /// Step 1: snapshot the installed state and reset the scratch data.
    fn prepare(&mut self, tc: &mut TcDb, originators: &OriginatorSet, domain_index: usize) {
        for entry in self.entries[domain_index].values_mut() {
            entry.set = false;
            entry.old_if_index = entry.if_index;
            entry.old_gateway = entry.gateway;
            entry.old_distance = entry.distance;
        }

        let node_ids = tc.nodes.ids();
        for id in node_ids {
            let local = originators.is_local(&tc.nodes.index(id).addr);
            let data = &mut tc.nodes.index_mut(id).dijkstra;
            *data = Default::default();
            data.local = local;
        }
        let endpoint_ids = tc.endpoints.ids();
        for id in endpoint_ids {
            tc.endpoints.index_mut(id).dijkstra = Default::default();
        }
    }

    /// Steps 2 and 3: seed with the symmetric neighborhood and relax.
    fn run_domain(&mut self, nhdp: &Nhdp, tc: &mut TcDb, domain_index: usize) {
        let mut queue: BinaryHeap<Reverse<(u32, NetAddr, Target)>> = BinaryHeap::new();

        // seed: every symmetric neighbor whose originator has a vertex,
        // in originator order so equal costs tie-break deterministically
        // towards the lower first hop
        let mut seeds: Vec<(NetAddr, NeighborId, u32)> = nhdp
            .db
            .neighbors
            .iter()
            .filter(|(_, n)| n.symmetric > 0 && !n.originator.is_unspec())
            .map(|(id, n)| (n.originator, id, n.domains[domain_index].metric_out))
            .collect();
        seeds.sort();
        for (originator, neighbor_id, linkcost) in seeds {
            let Some(node) = tc.node_get(&originator) else {
                continue;
            };
            insert_target(
                tc,
                &mut queue,
                Target::Node(node),
                neighbor_id,
                linkcost,
                0,
                0,
                true,
            );
        }

        while let Some(Reverse((cost, _, target))) = queue.pop() {
            // stale heap entries are skipped
            let data = *target_data(tc, target);
            if !data.on_queue || data.path_cost != cost {
                continue;
            }
            match target {
                Target::Node(id) => tc.nodes.index_mut(id).dijkstra.on_queue = false,
                Target::Endpoint(id) => tc.endpoints.index_mut(id).dijkstra.on_queue = false,
            }

            let first_hop = data.first_hop.expect("queued targets carry a first hop");
            let dst = target_addr(tc, target);
            self.update_entry(
                nhdp,
                domain_index,
                dst,
                first_hop,
                data.distance,
                data.path_cost,
                data.single_hop,
            );

            if let Target::Node(node_id) = target {
                let edge_ids: Vec<_> = tc.nodes.index(node_id).edges.values().copied().collect();
                for edge_id in edge_ids {
                    let (dst_node, edge_cost) = {
                        let edge = tc.edges.index(edge_id);
                        (edge.dst, edge.cost[domain_index])
                    };
                    if edge_cost >= metric::LINK_COST_INFINITE {
                        continue;
                    }
                    insert_target(
                        tc,
                        &mut queue,
                        Target::Node(dst_node),
                        first_hop,
                        edge_cost,
                        data.path_cost,
                        0,
                        false,
                    );
                }

                let attachment_ids: Vec<_> =
                    tc.nodes.index(node_id).attachments.values().copied().collect();
                for attachment_id in attachment_ids {
                    let (endpoint, cost, distance) = {
                        let attachment = tc.attachments.index(attachment_id);
                        (
                            attachment.dst,
                            attachment.cost[domain_index],
                            attachment.distance[domain_index],
                        )
                    };
                    if cost >= metric::LINK_COST_INFINITE {
                        continue;
                    }
                    insert_target(
                        tc,
                        &mut queue,
                        Target::Endpoint(endpoint),
                        first_hop,
                        cost,
                        data.path_cost,
                        distance,
                        false,
                    );
                }
            }
        }
    }

    /// Step 4: a direct link or 2-hop path may beat the advertised
    /// topology, and may exist before any TC covers it.
    fn handle_nhdp_routes(&mut self, nhdp: &Nhdp, routable: &AddrAcl, domain_index: usize) {
        for (neighbor_id, neighbor) in nhdp.db.neighbors.iter() {
            if neighbor.symmetric == 0 {
                continue;
            }
            let neighcost = neighbor.domains[domain_index].metric_out;
            if neighcost >= metric::LINK_COST_INFINITE {
                continue;
            }

            for addr in neighbor.addresses.keys() {
                if !routable.check(addr) {
                    continue;
                }
                let better = self.entries[domain_index]
                    .get(addr)
                    .map(|e| !e.set || e.cost > neighcost)
                    .unwrap_or(true);
                if better {
                    self.update_entry(nhdp, domain_index, *addr, neighbor_id, 0, neighcost, true);
                }
            }

            for &link_id in &neighbor.links {
                let link = nhdp.db.links.index(link_id);
                for (addr, &twohop_id) in &link.two_hops {
                    let twohop = nhdp.db.two_hops.index(twohop_id);
                    let hop_cost = twohop.domains[domain_index].metric_out;
                    if hop_cost >= metric::LINK_COST_INFINITE {
                        continue;
                    }
                    if !routable.check(addr) {
                        continue;
                    }
                    let pathcost = neighcost.saturating_add(hop_cost);
                    let better = self.entries[domain_index]
                        .get(addr)
                        .map(|e| !e.set || e.cost > pathcost)
                        .unwrap_or(true);
                    if better {
                        self.update_entry(
                            nhdp,
                            domain_index,
                            *addr,
                            neighbor_id,
                            0,
                            pathcost,
                            false,
                        );
                    }
                }
            }
        }
    }

    /// Fill one routing entry from a computed path.
    fn update_entry(
        &mut self,
        nhdp: &Nhdp,
        domain_index: usize,
        dst: NetAddr,
        first_hop: NeighborId,
        distance: u8,
        pathcost: u32,
        single_hop: bool,
    ) {
        let Some((if_index, gateway)) = next_hop_info(nhdp, domain_index, first_hop, &dst, single_hop)
        else {
            return;
        };

        let entry = self.entries[domain_index]
            .entry(dst)
            .or_insert_with(|| RouteEntry::new(dst));
        if entry.set && entry.cost <= pathcost {
            // an address can be node target and endpoint target at
            // once; the cheaper path keeps the entry
            return;
        }
        entry.set = true;
        entry.cost = pathcost;
        entry.if_index = if_index;
        entry.gateway = gateway;
        entry.distance = distance;
    }

    /// Steps 5: diff against the snapshot and queue kernel work.
    fn process_result(&mut self, domain_index: usize) {
        let params = self.params[domain_index];
        let dsts: Vec<NetAddr> = self.entries[domain_index].keys().copied().collect();

        for dst in dsts {
            let entry = self.entries[domain_index].get_mut(&dst).unwrap();
            if entry.set
                && entry.old_if_index == entry.if_index
                && entry.old_gateway == entry.gateway
                && entry.old_distance == entry.distance
            {
                // unchanged
                continue;
            }
            queue_kernel_op(&mut self.kernel_queue, domain_index, entry, params);
        }
    }

    /// Hand the queued kernel operations to the channel driver. Marks
    /// the affected entries in-processing.
    pub fn take_kernel_queue(&mut self) -> Vec<KernelOp> {
        let ops: Vec<KernelOp> = self.kernel_queue.drain(..).collect();
        for op in &ops {
            if let Some(entry) = self.entries[op.domain].get_mut(&op.request.dst) {
                entry.in_processing = true;
            }
        }
        ops
    }

    /// Completion callback of the kernel channel.
    pub fn route_finished(&mut self, domain: usize, dst: &NetAddr, result: Result<(), RouteError>) {
        let was_set = {
            let Some(entry) = self.entries[domain].get_mut(dst) else {
                return;
            };
            entry.in_processing = false;
            entry.set
        };

        match result {
            Ok(()) => {
                if was_set {
                    tracing::info!(%dst, domain, "route installed");
                } else {
                    tracing::info!(%dst, domain, "route removed");
                    self.entries[domain].remove(dst);
                }
            }
            Err(err) => {
                if !matches!(err, RouteError::Cancelled) {
                    // interruptions by a newer run revert quietly
                    tracing::warn!(%dst, domain, error = %err, "kernel rejected route change");
                }
                if was_set {
                    // retry through recreation on the next run
                    self.entries[domain].remove(dst);
                } else if let Some(entry) = self.entries[domain].get_mut(dst) {
                    // removal failed, the route is still out there
                    entry.set = true;
                }
            }
        }
    }
}

fn queue_kernel_op(
    queue: &mut VecDeque<KernelOp>,
    domain: usize,
    entry: &RouteEntry,
    params: RoutingDomainParams,
) {
    let request = RouteRequest {
        family: entry.dst.family(),
        dst: entry.dst,
        src: None,
        gateway: entry.gateway,
        if_index: entry.if_index,
        metric: params.distance as u32 + entry.distance as u32,
        table: params.table,
        protocol: params.protocol,
    };
    let op = KernelOp {
        domain,
        add: entry.set,
        request,
    };

    if entry.set {
        // install single-hop routes first: multi-hop routes depend on
        // them for gateway resolution
        if entry.gateway.is_none() {
            queue.push_front(op);
        } else {
            queue.push_back(op);
        }
    } else {
        // removal is the mirror image: multi-hop first
        if entry.gateway.is_none() {
            queue.push_back(op);
        } else {
            queue.push_front(op);
        }
    }
}

fn insert_target(
    tc: &mut TcDb,
    queue: &mut BinaryHeap<Reverse<(u32, NetAddr, Target)>>,
    target: Target,
    first_hop: NeighborId,
    linkcost: u32,
    pathcost: u32,
    distance: u8,
    single_hop: bool,
) {
    if linkcost >= metric::LINK_COST_INFINITE {
        return;
    }
    let total = pathcost.saturating_add(linkcost);
    let addr = target_addr(tc, target);

    let data = target_data_mut(tc, target);
    if data.local || data.path_cost <= total {
        return;
    }
    data.path_cost = total;
    data.first_hop = Some(first_hop);
    data.distance = distance;
    data.single_hop = single_hop;
    data.on_queue = true;

    queue.push(Reverse((total, addr, target)));
}

fn target_addr(tc: &TcDb, target: Target) -> NetAddr {
    match target {
        Target::Node(id) => tc.nodes.index(id).addr,
        Target::Endpoint(id) => tc.endpoints.index(id).addr,
    }
}

fn target_data<'a>(tc: &'a TcDb, target: Target) -> &'a crate::tc::DijkstraData {
    match target {
        Target::Node(id) => &tc.nodes.index(id).dijkstra,
        Target::Endpoint(id) => &tc.endpoints.index(id).dijkstra,
    }
}

fn target_data_mut<'a>(tc: &'a mut TcDb, target: Target) -> &'a mut crate::tc::DijkstraData {
    match target {
        Target::Node(id) => &mut tc.nodes.index_mut(id).dijkstra,
        Target::Endpoint(id) => &mut tc.endpoints.index_mut(id).dijkstra,
    }
}

/// Outgoing interface and gateway of a path through `first_hop`. A
/// single-hop route to the link address itself is on-link and carries
/// no gateway.
fn next_hop_info(
    nhdp: &Nhdp,
    domain_index: usize,
    first_hop: NeighborId,
    dst: &NetAddr,
    single_hop: bool,
) -> Option<(u32, Option<NetAddr>)> {
    let neighbor = nhdp.db.neighbors.get(first_hop)?;
    let best_link = neighbor.domains[domain_index].best_link?;
    let link = nhdp.db.links.get(best_link)?;
    let if_index = nhdp.interfaces.get(link.interface)?.if_index;

    let remote = link
        .addresses
        .keys()
        .find(|addr| addr.family() == dst.family())
        .copied()?;

    if single_hop && remote == *dst {
        Some((if_index, None))
    } else {
        Some((if_index, Some(remote)))
    }
}
