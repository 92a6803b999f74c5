// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Persisted per-node configuration read through the host SDK.

use crate::sdk::NetworkManagerSdk;
use crate::types::{Error, LinkSide, Persona, PersonaRecord, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, warn};

/// Path of the persona list, relative to the plugin storage root.
pub const PERSONAS_PATH: &str = "personas/race-personas.json";

/// Path of the static link profiles.
pub const LINK_PROFILES_PATH: &str = "link-profiles.json";

/// Path of the per-node committee config.
pub const NODE_CONFIG_PATH: &str = "config.json";

/// Expected dynamic links per peer: uuid → channel gid → our link side.
pub type ExpectedLinks = HashMap<String, HashMap<String, LinkSide>>;

/// Channel role assignments: channel gid → role name.
pub type ChannelRoles = HashMap<String, String>;

/// One static link entry of `link-profiles.json`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkProfile {
    /// `creator` or `loader`.
    pub role: String,
    /// Channel-specific address JSON.
    pub address: String,
    /// Personas reachable through the link.
    pub personas: Vec<String>,
    /// Free-form description, for logs.
    pub description: String,
}

/// Static link profiles keyed by channel gid.
pub type LinkProfiles = HashMap<String, Vec<LinkProfile>>;

/// `config.json` of a client node.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Servers every outbound message is fanned out to.
    pub entrance_committee: Vec<String>,
    /// Servers that hold this client as an exit client.
    pub exit_committee: Vec<String>,
    /// High-water mark of the receipt dedup set.
    pub max_seen_messages: Option<usize>,
    /// Dynamic links to bring up per peer.
    pub expected_links: ExpectedLinks,
    /// Role this node enacts per channel.
    pub channel_roles: ChannelRoles,
    /// Whether dynamic link negotiation is enabled.
    pub use_link_wizard: Option<bool>,
}

/// Default receipt dedup bound for clients.
pub const DEFAULT_MAX_SEEN_MESSAGES: usize = 10_000;

/// One ring hop of a server's config: this node's successor on the ring.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RingHop {
    /// Successor uuid; empty when this node is not on the ring.
    pub next: String,
    /// Total length of the ring.
    pub length: usize,
}

/// `config.json` of a server node.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Name of the committee this server belongs to.
    pub committee_name: String,
    /// Clients this server delivers to directly.
    pub exit_clients: Vec<String>,
    /// Clients reachable via this committee but not exit-held by self.
    pub committee_clients: Vec<String>,
    /// First reachable member per foreign committee. Iterated in key order.
    pub reachable_committees: BTreeMap<String, Vec<String>>,
    /// This node's successor on each committee ring.
    pub rings: Vec<RingHop>,
    /// Committees to forward to per hop; 0 floods all reachable ones.
    pub flooding_factor: Option<usize>,
    /// High-water mark of the routing dedup sets.
    pub max_stale_uuids: Option<usize>,
    /// Dynamic links to bring up per peer.
    pub expected_links: ExpectedLinks,
    /// Role this node enacts per channel.
    pub channel_roles: ChannelRoles,
    /// Whether dynamic link negotiation is enabled.
    pub use_link_wizard: Option<bool>,
}

/// Default flooding factor for servers.
pub const DEFAULT_FLOODING_FACTOR: usize = 2;

/// Default routing dedup bound for servers.
pub const DEFAULT_MAX_STALE_UUIDS: usize = 1_000_000;

fn read_json<T: for<'de> Deserialize<'de>>(sdk: &dyn NetworkManagerSdk, path: &str) -> Result<T> {
    debug!("reading JSON config {}", path);
    let bytes = sdk.read_file(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|err| Error::ConfigInvalid(format!("{}: {}", path, err)))
}

/// Loads every persona plus this node's own, with key material attached.
pub fn load_personas(
    sdk: &dyn NetworkManagerSdk,
) -> Result<(HashMap<String, Persona>, Persona)> {
    let active_uuid = sdk.get_active_persona();
    if active_uuid.is_empty() {
        return Err(Error::ConfigInvalid(
            "host did not provide an active persona".to_string(),
        ));
    }

    let records: Vec<PersonaRecord> = read_json(sdk, PERSONAS_PATH)?;
    let mut personas = HashMap::new();
    for record in records {
        let key_path = format!("personas/{}", record.aes_key_file.trim_start_matches("./"));
        let aes_key = match sdk.read_file(&key_path) {
            Ok(key) => key,
            Err(err) => {
                error!("missing key file {} for {}: {}", key_path, record.race_uuid, err);
                return Err(Error::ConfigInvalid(format!(
                    "missing key file for {}",
                    record.race_uuid
                )));
            }
        };

        let _ = personas.insert(
            record.race_uuid.clone(),
            Persona {
                uuid: record.race_uuid,
                display_name: record.display_name,
                persona_type: Some(record.persona_type),
                public_key: record.public_key,
                aes_key,
            },
        );
    }

    let race_persona = personas.get(&active_uuid).cloned().ok_or_else(|| {
        Error::ConfigInvalid(format!("active persona {} not in persona set", active_uuid))
    })?;
    debug!(
        "I am {}: uuid = {}",
        race_persona.display_name, race_persona.uuid
    );

    Ok((personas, race_persona))
}

/// Loads the static link profiles; an absent file is an empty profile set.
pub fn load_link_profiles(sdk: &dyn NetworkManagerSdk) -> LinkProfiles {
    match read_json(sdk, LINK_PROFILES_PATH) {
        Ok(profiles) => profiles,
        Err(err) => {
            warn!("no static link profiles loaded: {}", err);
            LinkProfiles::new()
        }
    }
}

/// Loads a client's committee config.
pub fn load_client_config(sdk: &dyn NetworkManagerSdk) -> Result<ClientConfig> {
    read_json(sdk, NODE_CONFIG_PATH)
}

/// Loads a server's committee config.
pub fn load_server_config(sdk: &dyn NetworkManagerSdk) -> Result<ServerConfig> {
    let config: ServerConfig = read_json(sdk, NODE_CONFIG_PATH)?;
    if config.committee_name.is_empty() {
        warn!("committee name is empty; likely a configuration error but not fatal");
    }
    if config
        .reachable_committees
        .values()
        .any(|members| members.is_empty())
    {
        error!("not all reachableCommittees had an actual reachable member");
    }
    Ok(config)
}
