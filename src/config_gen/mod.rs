// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The config generator: a two-pass batch planner that turns a range config
//! and a channel list into per-node configs, shared personas, provisioned
//! keys and a link request for the comms config generators.
//!
//! The first pass forms committees, assigns channel roles and emits the
//! request; the second pass compares the fulfilled links against it and
//! fails when any requested link went unfulfilled.

pub mod roles;
pub mod topology;

use self::roles::{Link, LinkRequest, NodeState};
use self::topology::{RangeConfigFile, Topology};
use crate::types::errors::{Error, Result};
use crate::types::{ChannelProperties, ConnectionType, LinkSide, PersonaRecord, PersonaType};
use rand::RngCore;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Inputs and switches of one generator run.
#[derive(Clone, Debug)]
pub struct GenOptions {
    /// Range config of the physical network.
    pub range_config_file: PathBuf,
    /// List of channel properties.
    pub channel_list_file: PathBuf,
    /// Where configs are stored.
    pub config_dir: PathBuf,
    /// Overwrite configs if they exist.
    pub overwrite: bool,
    /// Channels reserved for genesis client↔server links (comma list).
    pub genesis_c2s_channels: String,
    /// Channels reserved for genesis server↔server links.
    pub genesis_s2s_channels: String,
    /// Channels reserved for dynamic client↔server links.
    pub dynamic_c2s_channels: String,
    /// Channels reserved for dynamic server↔server links.
    pub dynamic_s2s_channels: String,
    /// Allow range configs with only servers.
    pub allow_no_clients: bool,
    /// Request links for every node pair instead of committee-derived ones.
    pub complete_connectivity: bool,
    /// Merged fulfilled requests from the comms config generators; its
    /// presence selects the second pass.
    pub fulfilled_requests_file: Option<PathBuf>,
    /// Disable dynamic link negotiation in the emitted configs.
    pub disable_dynamic_links: bool,
    /// Desired committee size; defaults to log2 of the server count.
    pub committee_size: Option<usize>,
    /// Committees to forward to per hop; 0 floods all reachable ones.
    pub flooding_factor: usize,
    /// Ring paths to generate per committee.
    pub num_rings: usize,
    /// Force client entrance and exit committees to differ.
    pub diff_entrance_exit: bool,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            range_config_file: PathBuf::new(),
            channel_list_file: PathBuf::new(),
            config_dir: PathBuf::new(),
            overwrite: false,
            genesis_c2s_channels: String::new(),
            genesis_s2s_channels: String::new(),
            dynamic_c2s_channels: String::new(),
            dynamic_s2s_channels: String::new(),
            allow_no_clients: false,
            complete_connectivity: false,
            fulfilled_requests_file: None,
            disable_dynamic_links: false,
            committee_size: None,
            flooding_factor: 2,
            num_rings: 2,
            diff_entrance_exit: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RequestFile {
    #[serde(default)]
    links: Vec<LinkRequest>,
}

#[derive(Debug, Deserialize)]
struct StatusFile {
    #[serde(default)]
    attempt: u32,
}

fn status_path(config_dir: &Path) -> PathBuf {
    config_dir.join("network-manager-config-gen-status.json")
}

fn request_path(config_dir: &Path) -> PathBuf {
    config_dir.join("network-manager-request.json")
}

fn read_json_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .map_err(|err| Error::ConfigGen(format!("failed to read {}: {}", path.display(), err)))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| Error::ConfigGen(format!("failed to parse {}: {}", path.display(), err)))
}

fn write_json_file<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| Error::ConfigGen(format!("mkdir {}: {}", parent.display(), err)))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body)
        .map_err(|err| Error::ConfigGen(format!("failed to write {}: {}", path.display(), err)))
}

/// Runs the generator: first pass plans and emits the request, second pass
/// (selected by `fulfilled_requests_file`) verifies fulfilment.
pub fn run(options: &GenOptions) -> Result<()> {
    info!("starting config generation");

    let range: RangeConfigFile = read_json_file(&options.range_config_file)?;
    topology::validate_range_config(&range.range, options.allow_no_clients)?;

    let channels: Vec<ChannelProperties> = read_json_file(&options.channel_list_file)?;
    let channels_by_gid: HashMap<&str, &ChannelProperties> = channels
        .iter()
        .map(|c| (c.channel_gid.as_str(), c))
        .collect();

    let pick = |request: &str| -> Result<Vec<ChannelProperties>> {
        if request.is_empty() {
            return Ok(Vec::new());
        }
        request
            .split(',')
            .map(|gid| {
                channels_by_gid
                    .get(gid)
                    .map(|c| (*c).clone())
                    .ok_or_else(|| {
                        Error::ConfigGen(format!("{} is not in the channel list", gid))
                    })
            })
            .collect()
    };

    let req_gen_c2s = pick(&options.genesis_c2s_channels)?;
    let req_gen_s2s = pick(&options.genesis_s2s_channels)?;
    let req_dyn_c2s = pick(&options.dynamic_c2s_channels)?;
    let req_dyn_s2s = pick(&options.dynamic_s2s_channels)?;
    let required: Vec<ChannelProperties> = req_gen_c2s
        .iter()
        .chain(&req_gen_s2s)
        .chain(&req_dyn_c2s)
        .chain(&req_dyn_s2s)
        .cloned()
        .collect();

    let possible_c2s =
        roles::filter_compatible_channels(&channels, &required, ConnectionType::Indirect);
    // Indirect channels may serve s2s links too, at lower priority than
    // direct ones.
    let mut possible_s2s =
        roles::filter_compatible_channels(&channels, &required, ConnectionType::Direct);
    possible_s2s.extend(possible_c2s.iter().cloned());
    let bootstrap = roles::filter_compatible_channels(&channels, &required, ConnectionType::Local);

    let (prev_attempt, requested, fulfilled) = match &options.fulfilled_requests_file {
        None => (0, Vec::new(), Vec::new()),
        Some(fulfilled_file) => {
            let status: StatusFile = read_json_file(&status_path(&options.config_dir))?;
            // Removed so a failure below does not confuse the orchestrator.
            let _ = fs::remove_file(status_path(&options.config_dir));
            let requested: RequestFile = read_json_file(&request_path(&options.config_dir))?;
            let fulfilled: RequestFile = read_json_file(fulfilled_file)?;
            (status.attempt, requested.links, fulfilled.links)
        }
    };

    let status = if prev_attempt == 0 {
        first_pass(
            options,
            &range,
            Channels {
                req_gen_c2s,
                req_gen_s2s,
                req_dyn_c2s,
                req_dyn_s2s,
                possible_c2s,
                possible_s2s,
                bootstrap,
            },
        )?
    } else {
        final_pass(options, prev_attempt, &requested, &fulfilled)?
    };

    write_json_file(&status_path(&options.config_dir), &status)?;
    info!("config generation complete");
    Ok(())
}

struct Channels {
    req_gen_c2s: Vec<ChannelProperties>,
    req_gen_s2s: Vec<ChannelProperties>,
    req_dyn_c2s: Vec<ChannelProperties>,
    req_dyn_s2s: Vec<ChannelProperties>,
    possible_c2s: Vec<ChannelProperties>,
    possible_s2s: Vec<ChannelProperties>,
    bootstrap: Vec<ChannelProperties>,
}

fn first_pass(
    options: &GenOptions,
    range: &RangeConfigFile,
    channels: Channels,
) -> Result<serde_json::Value> {
    info!("making initial links request");

    let mut topology = topology::build_topology(&range.range)?;
    topology::form_committees(
        &mut topology,
        options.committee_size,
        options.flooding_factor,
        options.num_rings,
        options.diff_entrance_exit,
    )?;
    topology::analyze_committees(&topology)?;

    let personas = personas_for(&topology);
    prepare_config_dir(&options.config_dir, options.overwrite, &personas)?;

    let mut nodes: HashMap<String, NodeState> = personas
        .iter()
        .map(|p| (p.race_uuid.clone(), NodeState::new(&p.race_uuid)))
        .collect();
    let mut request: Vec<LinkRequest> = Vec::new();

    let (c2s_links, s2s_links) = determine_links_needed(&topology, options.complete_connectivity);

    // Genesis roles first: each channel takes as many links as it can.
    let genesis_s2s = or_default(&channels.req_gen_s2s, &channels.possible_s2s);
    roles::create_links(genesis_s2s, &mut nodes, &mut request, s2s_links.clone())?;
    let genesis_c2s = or_default(&channels.req_gen_c2s, &channels.possible_c2s);
    roles::create_links(genesis_c2s, &mut nodes, &mut request, c2s_links.clone())?;

    // Then dynamic roles, which only shape expectations.
    let dynamic_s2s = or_default(&channels.req_dyn_s2s, &channels.possible_s2s);
    roles::assign_dyn_channel_roles(dynamic_s2s, &mut nodes, &s2s_links)?;
    let dynamic_c2s = or_default(&channels.req_dyn_c2s, &channels.possible_c2s);
    roles::assign_dyn_channel_roles(dynamic_c2s, &mut nodes, &c2s_links)?;

    roles::assign_bootstrap_channel_roles(&channels.bootstrap, &mut nodes)?;

    roles::check_required_links(&channels.req_gen_s2s, &nodes, &s2s_links)?;
    roles::check_required_links(&channels.req_gen_c2s, &nodes, &c2s_links)?;
    roles::check_required_links(&channels.req_dyn_s2s, &nodes, &s2s_links)?;
    roles::check_required_links(&channels.req_dyn_c2s, &nodes, &c2s_links)?;

    write_node_configs(options, &topology, &nodes, &request)?;
    write_shared_configs(options, &topology, &personas)?;
    write_json_file(
        &request_path(&options.config_dir),
        &serde_json::json!({ "links": request }),
    )?;

    Ok(serde_json::json!({
        "attempt": 1,
        "status": "needs-review",
        "reason": "first pass",
    }))
}

fn or_default<'a>(
    requested: &'a [ChannelProperties],
    fallback: &'a [ChannelProperties],
) -> &'a [ChannelProperties] {
    if requested.is_empty() {
        fallback
    } else {
        requested
    }
}

fn link_hash(request: &LinkRequest) -> String {
    let mut recipients = request.recipients.clone();
    recipients.sort();
    format!("sender-{}-recipients-{}", request.sender, recipients.join(","))
}

fn final_pass(
    _options: &GenOptions,
    prev_attempt: u32,
    requested: &[LinkRequest],
    fulfilled: &[LinkRequest],
) -> Result<serde_json::Value> {
    let fulfilled_map: HashMap<String, &LinkRequest> = fulfilled
        .iter()
        .map(|link| (link_hash(link), link))
        .collect();

    let unfulfilled: Vec<&LinkRequest> = requested
        .iter()
        .filter(|link| match fulfilled_map.get(&link_hash(link)) {
            Some(entry) => entry.channels.is_empty(),
            None => true,
        })
        .collect();

    if unfulfilled.is_empty() {
        info!("config generation succeeded");
        Ok(serde_json::json!({
            "attempt": prev_attempt + 1,
            "status": "complete",
            "reason": "success",
        }))
    } else {
        warn!("{} requested links were not fulfilled", unfulfilled.len());
        Err(Error::ConfigGen(format!(
            "config generation failed: {} links were not fulfilled",
            unfulfilled.len()
        )))
    }
}

/// One persona record per genesis node, with zero-padded ids in the
/// display names.
fn personas_for(topology: &Topology) -> Vec<PersonaRecord> {
    let mut personas = Vec::new();
    for client in &topology.clients {
        let node_id = zero_padded_id(&client.name);
        personas.push(PersonaRecord {
            display_name: if client.is_registry {
                format!("RACE Registry {}", node_id)
            } else {
                format!("RACE Client {}", node_id)
            },
            race_uuid: client.name.clone(),
            public_key: node_id,
            persona_type: if client.is_registry {
                PersonaType::Registry
            } else {
                PersonaType::Client
            },
            aes_key_file: format!("./{}.aes", client.name),
        });
    }
    for server in &topology.servers {
        let node_id = zero_padded_id(&server.name);
        personas.push(PersonaRecord {
            display_name: format!("RACE Server {}", node_id),
            race_uuid: server.name.clone(),
            public_key: node_id,
            persona_type: PersonaType::Server,
            aes_key_file: format!("./{}.aes", server.name),
        });
    }
    personas
}

fn zero_padded_id(name: &str) -> String {
    let tail = name.rsplit('-').next().unwrap_or(name);
    format!("{:0>5}", tail)
}

fn prepare_config_dir(
    config_dir: &Path,
    overwrite: bool,
    personas: &[PersonaRecord],
) -> Result<()> {
    if config_dir.exists() {
        if overwrite {
            info!("{} exists and overwrite set, removing", config_dir.display());
            fs::remove_dir_all(config_dir).map_err(|err| {
                Error::ConfigGen(format!("rm {}: {}", config_dir.display(), err))
            })?;
        } else {
            return Err(Error::ConfigGen(format!(
                "{} exists and overwrite not set",
                config_dir.display()
            )));
        }
    }
    let mkdir = |path: PathBuf| -> Result<()> {
        fs::create_dir_all(&path)
            .map_err(|err| Error::ConfigGen(format!("mkdir {}: {}", path.display(), err)))
    };
    mkdir(config_dir.join("shared").join("personas"))?;
    for persona in personas {
        mkdir(config_dir.join(&persona.race_uuid))?;
    }
    Ok(())
}

/// Genesis links needed to realize the committees: c2s links to entrance and
/// exit committees, s2s links along the rings (in ring order, so
/// loader-creator channels land inside the rings first), then
/// inter-committee entry points. Each link is requested in both directions.
fn determine_links_needed(
    topology: &Topology,
    complete_connectivity: bool,
) -> (Vec<Link>, Vec<Link>) {
    let mut c2s: Vec<Link> = Vec::new();
    let mut s2s: Vec<Link> = Vec::new();

    if complete_connectivity {
        let mut client_names: Vec<&String> = topology.clients.iter().map(|c| &c.name).collect();
        let mut server_names: Vec<&String> = topology.servers.iter().map(|s| &s.name).collect();
        client_names.sort();
        server_names.sort();
        for client in &client_names {
            for server in &server_names {
                c2s.push(((*client).clone(), vec![(*server).clone()]));
            }
        }
        for a in &server_names {
            for b in &server_names {
                if a != b {
                    s2s.push(((*a).clone(), vec![(*b).clone()]));
                }
            }
        }
    } else {
        for committee in &topology.committees {
            for &client_idx in &committee.clients {
                let client = &topology.clients[client_idx];
                let mut servers: Vec<String> = Vec::new();
                for committee_idx in [client.entrance_committee, client.exit_committee]
                    .iter()
                    .flatten()
                {
                    for &server in &topology.committees[*committee_idx].servers {
                        servers.push(topology.servers[server].name.clone());
                    }
                }
                for server in servers {
                    c2s.push((client.name.clone(), vec![server]));
                }
            }
        }

        for committee in &topology.committees {
            for ring in &committee.rings {
                for pos in 0..ring.len() {
                    let from = &topology.servers[ring[pos]].name;
                    let to = &topology.servers[ring[(pos + 1) % ring.len()]].name;
                    s2s.push((from.clone(), vec![to.clone()]));
                }
            }
        }

        for committee in &topology.committees {
            for &server in &committee.servers {
                for (_, members) in topology.reachable_committees_for_server(server) {
                    if let Some(entry_point) = members.first() {
                        s2s.push((
                            topology.servers[server].name.clone(),
                            vec![entry_point.clone()],
                        ));
                    }
                }
            }
        }
    }

    // Request links in both directions, then dedup.
    let mirror = |links: Vec<Link>| -> Vec<Link> {
        let mut out = Vec::with_capacity(links.len() * 2);
        for (src, dsts) in links {
            out.push((src.clone(), dsts.clone()));
            if let Some(first) = dsts.first() {
                out.push((first.clone(), vec![src]));
            }
        }
        roles::dedup_links(out)
    };

    (mirror(c2s), mirror(s2s))
}

fn write_node_configs(
    options: &GenOptions,
    topology: &Topology,
    nodes: &HashMap<String, NodeState>,
    request: &[LinkRequest],
) -> Result<()> {
    let use_link_wizard = !options.disable_dynamic_links;

    let common_json = |name: &str| -> (serde_json::Value, serde_json::Value, Vec<String>) {
        let state = &nodes[name];
        let channel_roles: BTreeMap<&String, &String> = state
            .channel_roles
            .iter()
            .map(|(gid, role)| (gid, &role.role_name))
            .collect();
        let expected_links: BTreeMap<&String, BTreeMap<&String, LinkSide>> = state
            .expected_links
            .iter()
            .map(|(dst, channels)| {
                (
                    dst,
                    channels.iter().map(|(gid, side)| (gid, *side)).collect(),
                )
            })
            .collect();
        let other_connections: Vec<String> = request
            .iter()
            .filter(|link| link.sender == name)
            .flat_map(|link| link.recipients.iter().cloned())
            .collect();
        (
            serde_json::to_value(&channel_roles).unwrap_or_default(),
            serde_json::to_value(&expected_links).unwrap_or_default(),
            other_connections,
        )
    };

    for client in &topology.clients {
        let entrance: Vec<&String> = client
            .entrance_committee
            .map(|c| {
                topology.committees[c]
                    .servers
                    .iter()
                    .map(|&s| &topology.servers[s].name)
                    .collect()
            })
            .unwrap_or_default();
        let exit: Vec<&String> = client
            .exit_committee
            .map(|c| {
                topology.committees[c]
                    .servers
                    .iter()
                    .map(|&s| &topology.servers[s].name)
                    .collect()
            })
            .unwrap_or_default();
        let (channel_roles, expected_links, other_connections) = common_json(&client.name);

        let config = serde_json::json!({
            "entranceCommittee": entrance,
            "exitCommittee": exit,
            "useLinkWizard": use_link_wizard,
            "channelRoles": channel_roles,
            "expectedLinks": expected_links,
            "otherConnections": other_connections,
        });
        write_json_file(
            &options.config_dir.join(&client.name).join("config.json"),
            &config,
        )?;
    }

    for (server_idx, server) in topology.servers.iter().enumerate() {
        let committee = match server.committee {
            Some(c) => &topology.committees[c],
            None => {
                return Err(Error::ConfigGen(format!(
                    "server {} was never assigned a committee",
                    server.name
                )))
            }
        };
        let exit_clients: Vec<&String> = committee
            .clients
            .iter()
            .map(|&c| &topology.clients[c].name)
            .collect();
        let rings: Vec<serde_json::Value> = topology
            .rings_for_server(server_idx)
            .into_iter()
            .map(|(next, length)| serde_json::json!({ "next": next, "length": length }))
            .collect();
        let (channel_roles, expected_links, other_connections) = common_json(&server.name);

        let config = serde_json::json!({
            "committeeName": committee.name,
            "exitClients": exit_clients,
            "committeeClients": exit_clients,
            "reachableCommittees": topology.reachable_committees_for_server(server_idx),
            "rings": rings,
            "floodingFactor": committee.flooding_factor,
            "useLinkWizard": use_link_wizard,
            "channelRoles": channel_roles,
            "expectedLinks": expected_links,
            "otherConnections": other_connections,
        });
        write_json_file(
            &options.config_dir.join(&server.name).join("config.json"),
            &config,
        )?;
    }
    Ok(())
}

fn write_shared_configs(
    options: &GenOptions,
    topology: &Topology,
    personas: &[PersonaRecord],
) -> Result<()> {
    let personas_path = options
        .config_dir
        .join("shared")
        .join("personas")
        .join("race-personas.json");
    write_json_file(&personas_path, &personas)?;

    // 32 bytes of fresh randomness per persona.
    let mut rng = rand::thread_rng();
    let names = topology
        .clients
        .iter()
        .map(|c| c.name.clone())
        .chain(topology.servers.iter().map(|s| s.name.clone()));
    for name in names {
        let mut key = [0u8; 32];
        rng.fill_bytes(&mut key);
        let key_path = options
            .config_dir
            .join("shared")
            .join("personas")
            .join(format!("{}.aes", name));
        fs::write(&key_path, key)
            .map_err(|err| Error::ConfigGen(format!("write {}: {}", key_path.display(), err)))?;
    }
    Ok(())
}
