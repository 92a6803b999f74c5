// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Physical topology: range-config parsing, committee formation over the
//! reachability graph and ring generation within each committee.
//!
//! Nodes and committees live in arenas and refer to each other by index, so
//! the server↔committee and client↔committee cycles need no back-pointers.

use crate::types::errors::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{info, warn};

/// Index into [`Topology::servers`].
pub type ServerIdx = usize;
/// Index into [`Topology::clients`].
pub type ClientIdx = usize;
/// Index into the committee arena.
pub type CommitteeIdx = usize;

/// Top level of a range-config file.
#[derive(Debug, Deserialize)]
pub struct RangeConfigFile {
    pub range: RangeConfig,
}

/// Physical network description.
#[derive(Debug, Deserialize)]
pub struct RangeConfig {
    #[serde(rename = "RACE_nodes")]
    pub race_nodes: Vec<RangeNode>,
    #[serde(default)]
    pub enclaves: Vec<Enclave>,
    #[serde(default)]
    pub services: Vec<serde_json::Value>,
}

/// One physical node.
#[derive(Debug, Deserialize)]
pub struct RangeNode {
    pub name: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default = "default_true")]
    pub genesis: bool,
    #[serde(default)]
    pub enclave: String,
}

fn default_true() -> bool {
    true
}

/// One enclave with its inbound port forwarding rules.
#[derive(Debug, Deserialize)]
pub struct Enclave {
    pub name: String,
    #[serde(default)]
    pub port_mapping: HashMap<String, PortMapping>,
}

/// One port forwarding rule of an enclave.
#[derive(Debug, Deserialize)]
pub struct PortMapping {
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl RangeNode {
    fn is_client(&self) -> bool {
        self.node_type.to_lowercase().contains("client")
    }

    fn is_registry(&self) -> bool {
        self.node_type.to_lowercase().contains("registry")
    }

    fn is_server(&self) -> bool {
        self.node_type.to_lowercase().contains("server")
    }
}

/// Checks the structural requirements the planner relies on.
pub fn validate_range_config(config: &RangeConfig, allow_no_clients: bool) -> Result<()> {
    if config.enclaves.is_empty() {
        return Err(Error::ConfigGen("no enclaves found in range config".to_string()));
    }
    let clients = config
        .race_nodes
        .iter()
        .filter(|n| n.genesis && (n.is_client() || n.is_registry()))
        .count();
    if clients == 0 && !allow_no_clients {
        return Err(Error::ConfigGen("no clients found in range config".to_string()));
    }
    let servers = config.race_nodes.iter().filter(|n| n.is_server()).count();
    if servers == 0 {
        return Err(Error::ConfigGen("no servers found in range config".to_string()));
    }
    if config
        .race_nodes
        .iter()
        .any(|n| n.is_server() && !n.genesis)
    {
        return Err(Error::ConfigGen(
            "non-genesis servers found in range config".to_string(),
        ));
    }
    Ok(())
}

/// A server in the topology arena.
#[derive(Debug)]
pub struct ServerNode {
    pub name: String,
    pub reachable_servers: Vec<ServerIdx>,
    pub reachable_clients: Vec<ClientIdx>,
    pub committee: Option<CommitteeIdx>,
}

/// A client (or registry) in the topology arena.
#[derive(Debug)]
pub struct ClientNode {
    pub name: String,
    pub is_registry: bool,
    pub reachable_servers: Vec<ServerIdx>,
    pub entrance_committee: Option<CommitteeIdx>,
    pub exit_committee: Option<CommitteeIdx>,
}

/// A committee of servers with the clients that exit through it.
#[derive(Debug)]
pub struct Committee {
    pub name: String,
    pub servers: Vec<ServerIdx>,
    pub clients: Vec<ClientIdx>,
    /// Each ring is an ordered cycle of committee members.
    pub rings: Vec<Vec<ServerIdx>>,
    pub flooding_factor: usize,
}

/// The parsed and partitioned overlay topology.
#[derive(Debug)]
pub struct Topology {
    pub servers: Vec<ServerNode>,
    pub clients: Vec<ClientNode>,
    pub committees: Vec<Committee>,
}

impl Topology {
    pub fn server_named(&self, name: &str) -> Option<&ServerNode> {
        self.servers.iter().find(|s| s.name == name)
    }

    /// Committees a committee can reach, derived from member reachability.
    pub fn reachable_committees(&self, committee: CommitteeIdx) -> HashSet<CommitteeIdx> {
        let mut reachable = HashSet::new();
        for &server in &self.committees[committee].servers {
            for &other in &self.servers[server].reachable_servers {
                if let Some(c) = self.servers[other].committee {
                    if c != committee {
                        let _ = reachable.insert(c);
                    }
                }
            }
        }
        reachable
    }

    /// First reachable member per foreign committee for one server,
    /// committee names in key order.
    pub fn reachable_committees_for_server(
        &self,
        server: ServerIdx,
    ) -> BTreeMap<String, Vec<String>> {
        let own = self.servers[server].committee;
        let mut reachable = BTreeMap::new();
        for &other in &self.servers[server].reachable_servers {
            let committee = match self.servers[other].committee {
                Some(c) if Some(c) != own => c,
                _ => continue,
            };
            let name = self.committees[committee].name.clone();
            // Only the first reachable member: the router sends to exactly
            // one entry point per committee, and the config makes that
            // explicit.
            let _ = reachable
                .entry(name)
                .or_insert_with(|| vec![self.servers[other].name.clone()]);
        }
        reachable
    }

    /// Ring hop entries for one server, blank-padded so ring indices align
    /// across the committee.
    pub fn rings_for_server(&self, server: ServerIdx) -> Vec<(String, usize)> {
        let committee = match self.servers[server].committee {
            Some(c) => &self.committees[c],
            None => return Vec::new(),
        };
        committee
            .rings
            .iter()
            .map(|ring| match ring.iter().position(|&s| s == server) {
                Some(pos) => (
                    self.servers[ring[(pos + 1) % ring.len()]].name.clone(),
                    ring.len(),
                ),
                None => (String::new(), 0),
            })
            .collect()
    }
}

/// Builds the node arenas and reachability edges from a range config.
///
/// Two nodes are reachable when they share an enclave, or when the
/// receiver's enclave forwards some port to it.
pub fn build_topology(config: &RangeConfig) -> Result<Topology> {
    let genesis: Vec<&RangeNode> = config.race_nodes.iter().filter(|n| n.genesis).collect();

    let mut servers = Vec::new();
    let mut clients = Vec::new();
    let mut server_index: HashMap<&str, ServerIdx> = HashMap::new();
    let mut client_index: HashMap<&str, ClientIdx> = HashMap::new();

    for node in &genesis {
        if node.is_server() {
            let _ = server_index.insert(node.name.as_str(), servers.len());
            servers.push(ServerNode {
                name: node.name.clone(),
                reachable_servers: Vec::new(),
                reachable_clients: Vec::new(),
                committee: None,
            });
        } else if node.is_client() || node.is_registry() {
            let _ = client_index.insert(node.name.as_str(), clients.len());
            clients.push(ClientNode {
                name: node.name.clone(),
                is_registry: node.is_registry(),
                reachable_servers: Vec::new(),
                entrance_committee: None,
                exit_committee: None,
            });
        }
    }

    let enclaves: HashMap<&str, &Enclave> = config
        .enclaves
        .iter()
        .map(|e| (e.name.as_str(), e))
        .collect();
    let reachable = |from: &RangeNode, to: &RangeNode| -> bool {
        if from.enclave == to.enclave {
            return true;
        }
        match enclaves.get(to.enclave.as_str()) {
            Some(enclave) => enclave
                .port_mapping
                .values()
                .any(|mapping| mapping.hosts.contains(&to.name)),
            None => false,
        }
    };

    for from in &genesis {
        for to in &genesis {
            if from.name == to.name || !reachable(from, to) {
                continue;
            }
            if from.is_server() {
                let from_idx = server_index[from.name.as_str()];
                if to.is_server() {
                    servers[from_idx]
                        .reachable_servers
                        .push(server_index[to.name.as_str()]);
                } else {
                    servers[from_idx]
                        .reachable_clients
                        .push(client_index[to.name.as_str()]);
                }
            } else if to.is_server() {
                // Client-to-client reachability is ignored.
                let from_idx = client_index[from.name.as_str()];
                clients[from_idx]
                    .reachable_servers
                    .push(server_index[to.name.as_str()]);
            }
        }
    }

    Ok(Topology {
        servers,
        clients,
        committees: Vec::new(),
    })
}

/// Partitions servers into committees over the undirectionalized
/// reachability graph, assigns clients, and generates rings.
pub fn form_committees(
    topology: &mut Topology,
    desired_size: Option<usize>,
    flooding_factor: usize,
    num_rings: usize,
    diff_entrance_exit: bool,
) -> Result<()> {
    let server_count = topology.servers.len();
    let desired_size = desired_size.unwrap_or_else(|| {
        ((server_count as f64).log2().floor() as usize).max(1)
    });

    // Undirected projection: keep only mutual edges.
    let mut undirected: Vec<HashSet<ServerIdx>> = vec![HashSet::new(); server_count];
    for (idx, server) in topology.servers.iter().enumerate() {
        for &other in &server.reachable_servers {
            if topology.servers[other].reachable_servers.contains(&idx) {
                let _ = undirected[idx].insert(other);
            }
        }
    }

    let memberships = draft_committees(&undirected, desired_size);
    for (committee_idx, members) in memberships.iter().enumerate() {
        for &server in members {
            topology.servers[server].committee = Some(committee_idx);
        }
        topology.committees.push(Committee {
            name: format!("committee-{}", committee_idx),
            servers: members.clone(),
            clients: Vec::new(),
            rings: Vec::new(),
            flooding_factor,
        });
    }

    assign_clients(topology, diff_entrance_exit)?;

    for committee_idx in 0..topology.committees.len() {
        let rings = generate_rings(topology, committee_idx, num_rings);
        if rings.len() < num_rings {
            warn!(
                "could only generate {} of {} rings for {}",
                rings.len(),
                num_rings,
                topology.committees[committee_idx].name
            );
        }
        topology.committees[committee_idx].rings = rings;
    }

    Ok(())
}

/// Greedy connectivity drafting: repeatedly take a connected set of the
/// desired size (growing one via BFS when a component is larger), then
/// attach any leftover servers to the smallest committee they connect to.
fn draft_committees(
    undirected: &[HashSet<ServerIdx>],
    desired_size: usize,
) -> Vec<Vec<ServerIdx>> {
    let mut committees: Vec<Vec<ServerIdx>> = Vec::new();
    let mut remaining: HashSet<ServerIdx> = (0..undirected.len()).collect();

    loop {
        let components = connected_components(undirected, &remaining);
        let candidate = components
            .iter()
            .find(|c| c.len() == desired_size)
            .or_else(|| components.iter().find(|c| c.len() > desired_size));
        let component = match candidate {
            Some(component) => component,
            None => break,
        };

        let drafted = grow_connected(undirected, component, desired_size);
        for &server in &drafted {
            let _ = remaining.remove(&server);
        }
        committees.push(drafted);
    }

    // Leftovers: components smaller than the desired size.
    let mut leftovers: Vec<ServerIdx> = remaining.into_iter().collect();
    leftovers.sort_unstable();
    for server in leftovers {
        committees.sort_by_key(|c| c.len());
        let attached = committees.iter_mut().find(|committee| {
            committee
                .iter()
                .any(|&member| undirected[server].contains(&member))
        });
        match attached {
            Some(committee) => committee.push(server),
            None => committees.push(vec![server]),
        }
    }

    committees.sort();
    committees
}

fn connected_components(
    undirected: &[HashSet<ServerIdx>],
    remaining: &HashSet<ServerIdx>,
) -> Vec<Vec<ServerIdx>> {
    let mut components = Vec::new();
    let mut visited: HashSet<ServerIdx> = HashSet::new();
    let mut ordered: Vec<ServerIdx> = remaining.iter().copied().collect();
    ordered.sort_unstable();

    for start in ordered {
        if visited.contains(&start) {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        let _ = visited.insert(start);
        while let Some(node) = queue.pop_front() {
            component.push(node);
            let mut neighbours: Vec<ServerIdx> = undirected[node]
                .iter()
                .copied()
                .filter(|n| remaining.contains(n) && !visited.contains(n))
                .collect();
            neighbours.sort_unstable();
            for neighbour in neighbours {
                let _ = visited.insert(neighbour);
                queue.push_back(neighbour);
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}

/// Grows a connected subset of `size` members out of a component by BFS.
fn grow_connected(
    undirected: &[HashSet<ServerIdx>],
    component: &[ServerIdx],
    size: usize,
) -> Vec<ServerIdx> {
    let allowed: HashSet<ServerIdx> = component.iter().copied().collect();
    let mut drafted = Vec::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(component[0]);
    let _ = visited.insert(component[0]);

    while let Some(node) = queue.pop_front() {
        drafted.push(node);
        if drafted.len() == size {
            break;
        }
        let mut neighbours: Vec<ServerIdx> = undirected[node]
            .iter()
            .copied()
            .filter(|n| allowed.contains(n) && !visited.contains(n))
            .collect();
        neighbours.sort_unstable();
        for neighbour in neighbours {
            let _ = visited.insert(neighbour);
            queue.push_back(neighbour);
        }
    }
    drafted.sort_unstable();
    drafted
}

/// Attaches each client to an exit committee (round-robin over its
/// reachable servers) and optionally a different entrance committee.
fn assign_clients(topology: &mut Topology, diff_entrance_exit: bool) -> Result<()> {
    if topology.committees.is_empty() {
        return Err(Error::ConfigGen("no committees formed".to_string()));
    }
    let committee_count = topology.committees.len();
    let mut fallback_idx = 0;
    let mut reachable_idx = 0;

    for client_idx in 0..topology.clients.len() {
        let exit = {
            let client = &topology.clients[client_idx];
            if client.reachable_servers.is_empty() {
                let committee = fallback_idx % committee_count;
                fallback_idx += 1;
                committee
            } else {
                let server =
                    client.reachable_servers[reachable_idx % client.reachable_servers.len()];
                reachable_idx += 1;
                topology.servers[server].committee.ok_or_else(|| {
                    Error::ConfigGen(format!(
                        "server {} has no committee",
                        topology.servers[server].name
                    ))
                })?
            }
        };

        let entrance = if diff_entrance_exit && committee_count > 1 {
            (exit + 1) % committee_count
        } else {
            exit
        };

        topology.clients[client_idx].exit_committee = Some(exit);
        topology.clients[client_idx].entrance_committee = Some(entrance);
        topology.committees[exit].clients.push(client_idx);
    }
    Ok(())
}

/// Generates up to `num_rings` edge-disjoint directed Hamiltonian cycles
/// through the committee, removing the used edges between rounds.
fn generate_rings(
    topology: &Topology,
    committee_idx: CommitteeIdx,
    num_rings: usize,
) -> Vec<Vec<ServerIdx>> {
    let members = &topology.committees[committee_idx].servers;
    if members.len() < 2 {
        return Vec::new();
    }
    let member_set: HashSet<ServerIdx> = members.iter().copied().collect();

    // Directed adjacency restricted to the committee.
    let mut adjacency: HashMap<ServerIdx, Vec<ServerIdx>> = HashMap::new();
    for &server in members {
        let mut targets: Vec<ServerIdx> = topology.servers[server]
            .reachable_servers
            .iter()
            .copied()
            .filter(|t| member_set.contains(t))
            .collect();
        targets.sort_unstable();
        let _ = adjacency.insert(server, targets);
    }

    let mut rings = Vec::new();
    while rings.len() < num_rings {
        match hamiltonian_cycle(members, &adjacency) {
            Some(cycle) => {
                // Remove the cycle's edges so the next ring is disjoint.
                for pos in 0..cycle.len() {
                    let from = cycle[pos];
                    let to = cycle[(pos + 1) % cycle.len()];
                    if let Some(targets) = adjacency.get_mut(&from) {
                        targets.retain(|&t| t != to);
                    }
                }
                rings.push(cycle);
            }
            None => break,
        }
    }
    rings
}

/// Backtracking search for a directed Hamiltonian cycle starting at the
/// first member. Committees are log-sized, so this stays cheap.
fn hamiltonian_cycle(
    members: &[ServerIdx],
    adjacency: &HashMap<ServerIdx, Vec<ServerIdx>>,
) -> Option<Vec<ServerIdx>> {
    let start = members[0];
    let mut path = vec![start];
    let mut used: HashSet<ServerIdx> = [start].iter().copied().collect();
    if extend_cycle(members.len(), start, adjacency, &mut path, &mut used) {
        Some(path)
    } else {
        None
    }
}

fn extend_cycle(
    target_len: usize,
    start: ServerIdx,
    adjacency: &HashMap<ServerIdx, Vec<ServerIdx>>,
    path: &mut Vec<ServerIdx>,
    used: &mut HashSet<ServerIdx>,
) -> bool {
    let current = *path.last().expect("path never empty");
    if path.len() == target_len {
        return adjacency
            .get(&current)
            .map_or(false, |targets| targets.contains(&start));
    }
    let targets = match adjacency.get(&current) {
        Some(targets) => targets.clone(),
        None => return false,
    };
    for next in targets {
        if used.contains(&next) {
            continue;
        }
        path.push(next);
        let _ = used.insert(next);
        if extend_cycle(target_len, start, adjacency, path, used) {
            return true;
        }
        let _ = path.pop();
        let _ = used.remove(&next);
    }
    false
}

/// Validates the committee graph: it must be strongly connected, and a
/// flooding factor below some committee's out-degree on an incomplete graph
/// risks lost messages.
pub fn analyze_committees(topology: &Topology) -> Result<()> {
    let count = topology.committees.len();
    if count == 0 {
        return Err(Error::ConfigGen("no committees to analyze".to_string()));
    }

    let mut forward: Vec<HashSet<CommitteeIdx>> = Vec::with_capacity(count);
    for idx in 0..count {
        forward.push(topology.reachable_committees(idx));
    }
    let mut reverse: Vec<HashSet<CommitteeIdx>> = vec![HashSet::new(); count];
    for (from, targets) in forward.iter().enumerate() {
        for &to in targets {
            let _ = reverse[to].insert(from);
        }
    }

    let reaches_all = |adjacency: &[HashSet<CommitteeIdx>]| -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(0);
        let _ = visited.insert(0);
        while let Some(node) = queue.pop_front() {
            for &next in &adjacency[node] {
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        visited.len() == count
    };

    if !reaches_all(&forward) || !reaches_all(&reverse) {
        return Err(Error::ConfigGen(
            "committee graph is not strongly connected; try another committee size".to_string(),
        ));
    }

    let flooding_factor = topology.committees[0].flooding_factor;
    let max_out_degree = forward.iter().map(|t| t.len()).max().unwrap_or(0);
    if flooding_factor > 0 && max_out_degree > flooding_factor {
        let complete = forward.iter().all(|targets| targets.len() == count - 1);
        if !complete {
            warn!(
                "committee graph is not complete and the flooding factor is below some \
                 committee's out-degree; messages could be lost during routing"
            );
        }
    }

    info!("committee analysis passed for {} committees", count);
    Ok(())
}
