//! The OLSRv2 topology database: tc-nodes keyed by originator address,
//! directed edges between them, and endpoints for attached networks and
//! routable addresses.
//!
//! Every logical adjacency is a pair of half-edges with mutual inverse
//! pointers. A TC only advertises outbound edges, so the inverse half
//! starts out virtual: it shapes the graph but carries no cost and is
//! never used for path computation. When the real half goes away the
//! pair degrades to purely virtual and is freed.

use std::collections::BTreeMap;

use wisp_core::addr::NetAddr;
use wisp_core::arena::{Arena, Id};
use wisp_core::timer::TimerWheel;
use wisp_nhdp::db::NeighborId;
use wisp_nhdp::domain::MAX_DOMAINS;
use wisp_rfc5444::metric;

use crate::Olsrv2Timers;

pub type TcNodeId = Id<TcNode>;
pub type TcEdgeId = Id<TcEdge>;
pub type TcEndpointId = Id<TcEndpoint>;
pub type TcAttachmentId = Id<TcAttachment>;

/// Scratch data of the shortest-path computation, embedded in every
/// dijkstra target (tc-node or endpoint).
#[derive(Debug, Clone, Copy)]
pub struct DijkstraData {
    pub path_cost: u32,
    pub first_hop: Option<NeighborId>,
    pub distance: u8,
    pub single_hop: bool,
    pub local: bool,
    pub on_queue: bool,
}

impl Default for DijkstraData {
    fn default() -> Self {
        DijkstraData {
            path_cost: metric::PATH_COST_INFINITE,
            first_hop: None,
            distance: 0,
            single_hop: false,
            local: false,
            on_queue: false,
        }
    }
}

/// A remote router's vertex in the topology graph.
#[derive(Debug)]
pub struct TcNode {
    pub addr: NetAddr,
    pub ansn: u16,
    pub edges: BTreeMap<NetAddr, TcEdgeId>,
    pub attachments: BTreeMap<NetAddr, TcAttachmentId>,
    pub dijkstra: DijkstraData,
    /// Sweep mark of the TC replacement pass.
    pub marked: bool,
}

/// Directed link between two tc-nodes.
#[derive(Debug)]
pub struct TcEdge {
    pub src: TcNodeId,
    pub dst: TcNodeId,
    pub inverse: TcEdgeId,
    pub cost: [u32; MAX_DOMAINS],
    /// True while only the inverse direction was actually advertised.
    pub virtual_: bool,
    pub marked: bool,
}

/// A prefix or routable address attached to one or more tc-nodes.
#[derive(Debug)]
pub struct TcEndpoint {
    pub addr: NetAddr,
    /// Interface address of a router (true) or attached network (false).
    pub mesh: bool,
    /// Attachments keyed by the source node's originator.
    pub attachments: BTreeMap<NetAddr, TcAttachmentId>,
    pub dijkstra: DijkstraData,
}

/// The edge from a tc-node to an endpoint.
#[derive(Debug)]
pub struct TcAttachment {
    pub src: TcNodeId,
    pub dst: TcEndpointId,
    pub cost: [u32; MAX_DOMAINS],
    pub distance: [u8; MAX_DOMAINS],
    pub marked: bool,
}

#[derive(Default)]
pub struct TcDb {
    pub nodes: Arena<TcNode>,
    pub edges: Arena<TcEdge>,
    pub endpoints: Arena<TcEndpoint>,
    pub attachments: Arena<TcAttachment>,

    pub node_index: BTreeMap<NetAddr, TcNodeId>,
    pub endpoint_index: BTreeMap<NetAddr, TcEndpointId>,
}

impl TcDb {
    pub fn new() -> TcDb {
        TcDb::default()
    }

    pub fn node_get(&self, originator: &NetAddr) -> Option<TcNodeId> {
        self.node_index.get(originator).copied()
    }

    /// True while the node's validity timer runs; a node without one
    /// only exists as destination of advertised edges.
    pub fn node_is_virtual(
        &self,
        wheel: &TimerWheel,
        timers: &Olsrv2Timers,
        id: TcNodeId,
    ) -> bool {
        !wheel.is_active(timers.tc_validity, id.to_token())
    }

    /// Add or refresh a real node: sets the ANSN and (re)arms validity.
    pub fn node_add(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &Olsrv2Timers,
        now: u64,
        originator: NetAddr,
        vtime: u64,
        ansn: u16,
    ) -> TcNodeId {
        let id = match self.node_get(&originator) {
            Some(id) => id,
            None => self.node_add_virtual(originator),
        };
        self.nodes.index_mut(id).ansn = ansn;
        wheel.set(now, timers.tc_validity, id.to_token(), vtime);
        id
    }

    /// Create the bare vertex: no ANSN, no validity timer.
    pub fn node_add_virtual(&mut self, originator: NetAddr) -> TcNodeId {
        if let Some(id) = self.node_get(&originator) {
            return id;
        }
        let id = self.nodes.insert(TcNode {
            addr: originator,
            ansn: 0,
            edges: BTreeMap::new(),
            attachments: BTreeMap::new(),
            dijkstra: DijkstraData::default(),
            marked: false,
        });
        self.node_index.insert(originator, id);
        id
    }

    /// Remove a node's advertised content. The vertex itself stays as
    /// long as inverse edges still point at it.
    pub fn node_remove(&mut self, wheel: &mut TimerWheel, timers: &Olsrv2Timers, id: TcNodeId) {
        let edge_ids: Vec<TcEdgeId> = self.nodes.index(id).edges.values().copied().collect();
        for edge in edge_ids {
            self.edge_remove(wheel, timers, edge);
        }
        let attachment_ids: Vec<TcAttachmentId> =
            self.nodes.index(id).attachments.values().copied().collect();
        for attachment in attachment_ids {
            self.endpoint_remove(attachment);
        }

        wheel.stop(timers.tc_validity, id.to_token());

        if let Some(node) = self.nodes.get(id) {
            if node.edges.is_empty() {
                self.node_index.remove(&node.addr);
                self.nodes.remove(id);
            }
        }
    }

    /// Find or create the edge src → dst-address. An existing (possibly
    /// virtual) edge turns real.
    pub fn edge_add(&mut self, src: TcNodeId, dst_addr: NetAddr) -> TcEdgeId {
        if let Some(&edge) = self.nodes.index(src).edges.get(&dst_addr) {
            self.edges.index_mut(edge).virtual_ = false;
            return edge;
        }

        let dst = self.node_add_virtual(dst_addr);
        let src_addr = self.nodes.index(src).addr;

        let edge = self.edges.insert_with(|own| TcEdge {
            src,
            dst,
            inverse: own, // fixed right below
            cost: [metric::LINK_COST_INFINITE; MAX_DOMAINS],
            virtual_: false,
            marked: false,
        });
        let inverse = self.edges.insert(TcEdge {
            src: dst,
            dst: src,
            inverse: edge,
            cost: [metric::LINK_COST_INFINITE; MAX_DOMAINS],
            virtual_: true,
            marked: false,
        });
        self.edges.index_mut(edge).inverse = inverse;

        self.nodes.index_mut(src).edges.insert(dst_addr, edge);
        self.nodes.index_mut(dst).edges.insert(src_addr, inverse);
        edge
    }

    /// Remove one direction of an adjacency. The pair is freed once
    /// both directions are gone; a dangling virtual destination node is
    /// garbage collected. Returns true if the pair was freed.
    pub fn edge_remove(
        &mut self,
        wheel: &mut TimerWheel,
        timers: &Olsrv2Timers,
        id: TcEdgeId,
    ) -> bool {
        let (src, dst, inverse) = {
            let edge = self.edges.index(id);
            (edge.src, edge.dst, edge.inverse)
        };

        if !self.edges.index(inverse).virtual_ {
            // the other direction is still advertised: this one becomes
            // the virtual half
            let edge = self.edges.index_mut(id);
            edge.virtual_ = true;
            edge.cost = [metric::LINK_COST_INFINITE; MAX_DOMAINS];
            return false;
        }

        // both halves gone
        let src_addr = self.nodes.index(src).addr;
        let dst_addr = self.nodes.index(dst).addr;
        self.nodes.index_mut(src).edges.remove(&dst_addr);
        self.nodes.index_mut(dst).edges.remove(&src_addr);
        self.edges.remove(id);
        self.edges.remove(inverse);

        // a virtual node with no remaining edges has no reason to stay
        for node in [src, dst] {
            let is_empty = self.nodes.index(node).edges.is_empty();
            if is_empty && self.node_is_virtual(wheel, timers, node) {
                let addr = self.nodes.index(node).addr;
                // only drop nodes with no attachments either
                if self.nodes.index(node).attachments.is_empty() {
                    self.node_index.remove(&addr);
                    self.nodes.remove(node);
                }
            }
        }
        true
    }

    pub fn endpoint_get(&self, prefix: &NetAddr) -> Option<TcEndpointId> {
        self.endpoint_index.get(prefix).copied()
    }

    /// Attach an endpoint (routable address or announced network) to a
    /// node.
    pub fn endpoint_add(&mut self, node: TcNodeId, prefix: NetAddr, mesh: bool) -> TcAttachmentId {
        if let Some(&attachment) = self.nodes.index(node).attachments.get(&prefix) {
            return attachment;
        }

        let endpoint = match self.endpoint_get(&prefix) {
            Some(endpoint) => endpoint,
            None => {
                let endpoint = self.endpoints.insert(TcEndpoint {
                    addr: prefix,
                    mesh,
                    attachments: BTreeMap::new(),
                    dijkstra: DijkstraData::default(),
                });
                self.endpoint_index.insert(prefix, endpoint);
                endpoint
            }
        };

        let node_addr = self.nodes.index(node).addr;
        let attachment = self.attachments.insert(TcAttachment {
            src: node,
            dst: endpoint,
            cost: [metric::LINK_COST_INFINITE; MAX_DOMAINS],
            distance: [0; MAX_DOMAINS],
            marked: false,
        });
        self.nodes.index_mut(node).attachments.insert(prefix, attachment);
        self.endpoints
            .index_mut(endpoint)
            .attachments
            .insert(node_addr, attachment);
        attachment
    }

    pub fn endpoint_remove(&mut self, id: TcAttachmentId) {
        let Some(attachment) = self.attachments.remove(id) else {
            return;
        };
        let endpoint_addr = self.endpoints.index(attachment.dst).addr;
        if let Some(node) = self.nodes.get_mut(attachment.src) {
            node.attachments.remove(&endpoint_addr);
        }

        let endpoint = self.endpoints.index_mut(attachment.dst);
        let node_addr = self.nodes.index(attachment.src).addr;
        endpoint.attachments.remove(&node_addr);
        if endpoint.attachments.is_empty() {
            self.endpoint_index.remove(&endpoint_addr);
            self.endpoints.remove(attachment.dst);
        }
    }
}

/// Modulo-2^16 freshness of an advertised neighbor sequence number,
/// wrap-safe: 0x0000 is newer than 0xffff.
pub fn ansn_is_newer(incoming: u16, existing: u16) -> bool {
    let diff = incoming.wrapping_sub(existing);
    diff != 0 && diff < 0x8000
}
