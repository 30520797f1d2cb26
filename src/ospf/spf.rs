//! Shortest-path-first route computation (spec C9/§4.9, RFC 2328 §16):
//! Dijkstra over a graph built fresh from the LSDB on every run.
//!
//! The graph has nodes that reference each other (routers and transit
//! networks), which is awkward to express as owned Rust values. Per spec §9's
//! design note, we allocate every node in a single arena (`Vec<Node>`) and
//! reference by index; the graph is discarded and rebuilt from scratch each
//! SPF run, so no long-lived cyclic structure is ever needed.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::Ipv4Addr;

use crate::ospf::lsdb::Lsdb;
use crate::ospf::types::RouteEntry;
use crate::wire::ospf::{LsaBody, RouterLinkType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NodeId {
    Router(Ipv4Addr),
    Network(Ipv4Addr),
    /// A stub network leaf, keyed by (link_id, mask) since two stub links
    /// can legitimately share a network address with different masks.
    Stub(Ipv4Addr, Ipv4Addr),
}

struct Node {
    id: NodeId,
    edges: Vec<(usize, u32)>, // (neighbor arena index, cost)
}

struct Graph {
    nodes: Vec<Node>,
    index_of: HashMap<NodeId, usize>,
}

impl Graph {
    fn new() -> Self {
        Graph { nodes: Vec::new(), index_of: HashMap::new() }
    }

    fn node_index(&mut self, id: NodeId) -> usize {
        if let Some(&idx) = self.index_of.get(&id) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node { id, edges: Vec::new() });
        self.index_of.insert(id, idx);
        idx
    }

    fn add_edge(&mut self, a: usize, b: usize, cost: u32) {
        self.nodes[a].edges.push((b, cost));
    }
}

/// Build the SPF graph from every Router-LSA and Network-LSA in `lsdb`
/// (spec §4.9: router↔router point-to-point links, router↔network transit
/// links, and stub networks as leaf edges).
fn build_graph(lsdb: &Lsdb) -> Graph {
    let mut graph = Graph::new();
    for lsa in lsdb.iter() {
        match &lsa.body {
            LsaBody::Router { links, .. } => {
                let router_idx = graph.node_index(NodeId::Router(lsa.header.advertising_router));
                for link in links {
                    match link.link_type {
                        RouterLinkType::PointToPoint => {
                            let neighbor_idx = graph.node_index(NodeId::Router(link.link_id));
                            graph.add_edge(router_idx, neighbor_idx, link.metric as u32);
                        }
                        RouterLinkType::Transit => {
                            let network_idx = graph.node_index(NodeId::Network(link.link_id));
                            graph.add_edge(router_idx, network_idx, link.metric as u32);
                        }
                        RouterLinkType::Stub => {
                            let stub_idx = graph.node_index(NodeId::Stub(link.link_id, link.link_data));
                            graph.add_edge(router_idx, stub_idx, link.metric as u32);
                        }
                        RouterLinkType::Virtual => {}
                    }
                }
            }
            LsaBody::Network { attached_routers, .. } => {
                let network_idx = graph.node_index(NodeId::Network(lsa.header.link_state_id));
                for router_id in attached_routers {
                    let router_idx = graph.node_index(NodeId::Router(*router_id));
                    // Network LSAs describe the DR's view of the segment;
                    // the router->network direction was already added by
                    // the Router LSA's Transit link, so this only needs the
                    // network->router return edge for Dijkstra to use it.
                    graph.add_edge(network_idx, router_idx, 0);
                }
            }
            _ => {}
        }
    }
    graph
}

#[derive(PartialEq, Eq)]
struct HeapEntry {
    cost: u32,
    node: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.cmp(&self.cost) // min-heap
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The closest-to-root router on the shortest-path tree leading to `node`,
/// i.e. the next hop to use for traffic destined there. Walking back through
/// `prev` may cross synthetic network nodes (transit segments, cost 0); the
/// first real router found while walking from root towards `node` is the
/// next hop.
fn next_hop_for(prev: &[Option<usize>], graph: &Graph, root: usize, node: usize) -> Option<Ipv4Addr> {
    let mut path = vec![node];
    let mut cur = node;
    while let Some(p) = prev[cur] {
        if p == root {
            break;
        }
        path.push(p);
        cur = p;
    }
    path.iter().rev().find_map(|&idx| match graph.nodes[idx].id {
        NodeId::Router(id) => Some(id),
        NodeId::Network(_) | NodeId::Stub(..) => None,
    })
}

fn mask_to_prefix_len(mask: Ipv4Addr) -> u8 {
    u32::from_be_bytes(mask.octets()).count_ones() as u8
}

/// Run Dijkstra from `root_router_id` over the graph built from `lsdb`,
/// producing a routing table of reachable routers and stub networks (spec
/// §4.9). The next hop is the first real router on the shortest path.
pub fn calculate(root_router_id: Ipv4Addr, lsdb: &Lsdb) -> Vec<RouteEntry> {
    let mut graph = build_graph(lsdb);
    let root = match graph.index_of.get(&NodeId::Router(root_router_id)) {
        Some(&idx) => idx,
        None => return Vec::new(),
    };

    let mut cost = vec![u32::MAX; graph.nodes.len()];
    let mut prev: Vec<Option<usize>> = vec![None; graph.nodes.len()];
    let mut visited = vec![false; graph.nodes.len()];
    cost[root] = 0;

    let mut heap = BinaryHeap::new();
    heap.push(HeapEntry { cost: 0, node: root });

    while let Some(HeapEntry { cost: current_cost, node }) = heap.pop() {
        if visited[node] {
            continue;
        }
        visited[node] = true;
        let edges = std::mem::take(&mut graph.nodes[node].edges);
        for (neighbor, edge_cost) in &edges {
            let candidate = current_cost.saturating_add(*edge_cost);
            if candidate < cost[*neighbor] {
                cost[*neighbor] = candidate;
                prev[*neighbor] = Some(node);
                heap.push(HeapEntry { cost: candidate, node: *neighbor });
            }
        }
        graph.nodes[node].edges = edges;
    }

    let mut routes = Vec::new();
    for idx in 0..graph.nodes.len() {
        if idx == root || cost[idx] == u32::MAX {
            continue;
        }
        match graph.nodes[idx].id {
            NodeId::Router(router_id) => routes.push(RouteEntry {
                destination: router_id,
                prefix_len: 32,
                cost: cost[idx],
                next_hop: next_hop_for(&prev, &graph, root, idx),
            }),
            NodeId::Stub(network, mask) => routes.push(RouteEntry {
                destination: network,
                prefix_len: mask_to_prefix_len(mask),
                cost: cost[idx],
                next_hop: next_hop_for(&prev, &graph, root, idx),
            }),
            NodeId::Network(_) => {}
        }
    }
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ospf::lsdb::Lsdb;
    use crate::wire::ospf::{Lsa, LsaHeader, RouterLink, RouterLinkType, LSA_ROUTER};

    fn router_lsa(id: Ipv4Addr, links: Vec<RouterLink>) -> Lsa {
        Lsa {
            header: LsaHeader {
                age: 0,
                options: 0x02,
                lsa_type: LSA_ROUTER,
                link_state_id: id,
                advertising_router: id,
                sequence: 1,
                checksum: 0,
                length: 0,
            },
            body: LsaBody::Router { flags: 0, links },
        }
    }

    #[test]
    fn p2p_link_yields_direct_route_with_link_cost() {
        let r1 = Ipv4Addr::new(10, 0, 0, 1);
        let r2 = Ipv4Addr::new(10, 0, 0, 2);
        let mut lsdb = Lsdb::new();
        lsdb.install(router_lsa(
            r1,
            vec![RouterLink { link_id: r2, link_data: r1, link_type: RouterLinkType::PointToPoint, metric: 10 }],
        ));
        lsdb.install(router_lsa(
            r2,
            vec![RouterLink { link_id: r1, link_data: r2, link_type: RouterLinkType::PointToPoint, metric: 10 }],
        ));

        let routes = calculate(r1, &lsdb);
        let to_r2 = routes.iter().find(|r| r.destination == r2).expect("route to r2");
        assert_eq!(to_r2.cost, 10);
        assert_eq!(to_r2.next_hop, Some(r2));
    }

    #[test]
    fn stub_link_yields_prefix_route_via_attached_router() {
        let r1 = Ipv4Addr::new(10, 0, 0, 1);
        let r2 = Ipv4Addr::new(10, 0, 0, 2);
        let stub_net = Ipv4Addr::new(192, 168, 1, 0);
        let stub_mask = Ipv4Addr::new(255, 255, 255, 0);
        let mut lsdb = Lsdb::new();
        lsdb.install(router_lsa(
            r1,
            vec![RouterLink { link_id: r2, link_data: r1, link_type: RouterLinkType::PointToPoint, metric: 10 }],
        ));
        lsdb.install(router_lsa(
            r2,
            vec![
                RouterLink { link_id: r1, link_data: r2, link_type: RouterLinkType::PointToPoint, metric: 10 },
                RouterLink { link_id: stub_net, link_data: stub_mask, link_type: RouterLinkType::Stub, metric: 5 },
            ],
        ));

        let routes = calculate(r1, &lsdb);
        let to_stub = routes.iter().find(|r| r.destination == stub_net).expect("route to stub network");
        assert_eq!(to_stub.prefix_len, 24);
        assert_eq!(to_stub.cost, 15);
        assert_eq!(to_stub.next_hop, Some(r2));
    }

    #[test]
    fn unreachable_router_has_no_route() {
        let r1 = Ipv4Addr::new(10, 0, 0, 1);
        let r3 = Ipv4Addr::new(10, 0, 0, 3);
        let mut lsdb = Lsdb::new();
        lsdb.install(router_lsa(r1, vec![]));
        let routes = calculate(r1, &lsdb);
        assert!(routes.iter().all(|r| r.destination != r3));
    }
}
