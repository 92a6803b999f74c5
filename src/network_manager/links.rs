// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Link and connection bookkeeping shared by the client and server roles.
//!
//! Tracks which send connections reach which persona (ranked by link
//! quality), which receive connections are up, and the genesis lifecycle:
//! channel activation, static link creation and the drain conditions that
//! gate LinkWizard startup and the PLUGIN_READY report.

use super::config::{ChannelRoles, ExpectedLinks, LinkProfiles};
use crate::messaging::{crypto, EncPkg};
use crate::sdk::{Handle, NetworkManagerSdk, NULL_HANDLE, UNLIMITED_TIMEOUT};
use crate::types::{
    ChannelStatus, ConnectionId, ConnectionType, Error, LinkId, LinkProperties, LinkType, Persona,
    Result,
};
use itertools::Itertools;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info, warn};

/// Hint requesting batched transfers, honoured where the link supports it.
const BATCH_HINTS: &str = r#"{"batch": true}"#;
const NO_HINTS: &str = "{}";

fn hints_for(properties: &LinkProperties) -> &'static str {
    if properties.supported_hints.iter().any(|h| h == "batch") {
        BATCH_HINTS
    } else {
        NO_HINTS
    }
}

/// Orders two links for sending, best first.
///
/// UNDEF connection types sort last; indirect links win when the recipient
/// should be reached obliviously; ties break on higher expected send
/// bandwidth.
pub(crate) fn compare_link_properties(
    a: &LinkProperties,
    b: &LinkProperties,
    prefer_indirect: bool,
) -> Ordering {
    match (
        a.connection_type == ConnectionType::Undef,
        b.connection_type == ConnectionType::Undef,
    ) {
        (false, true) => return Ordering::Less,
        (true, false) => return Ordering::Greater,
        _ => {}
    }
    if prefer_indirect {
        match (
            a.connection_type == ConnectionType::Indirect,
            b.connection_type == ConnectionType::Indirect,
        ) {
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
    }
    b.expected
        .send
        .bandwidth_bps
        .cmp(&a.expected.send.bandwidth_bps)
}

pub(crate) struct LinkManager {
    /// The persona this node runs as.
    pub race_persona: Persona,
    /// Every known persona, keyed by uuid.
    pub personas: HashMap<String, Persona>,
    /// Dynamic links to bring up per peer.
    pub expected_links: ExpectedLinks,
    /// Role this node enacts per channel.
    pub channel_roles: ChannelRoles,

    static_link_profiles: LinkProfiles,
    opening_connections: HashMap<Handle, (Persona, LinkType)>,
    recv_connections: HashSet<ConnectionId>,
    send_connections: HashMap<String, Vec<(ConnectionId, LinkProperties)>>,
    send_connection_to_uuid: HashMap<ConnectionId, String>,
    channels_to_use: HashSet<String>,
    genesis_link_requests: HashSet<Handle>,
    obtain_link_to_retry: HashMap<String, LinkType>,
    /// Clients always route via indirect links, whoever the recipient is.
    prefer_indirect_always: bool,
}

impl LinkManager {
    pub fn new(
        race_persona: Persona,
        personas: HashMap<String, Persona>,
        prefer_indirect_always: bool,
    ) -> Self {
        Self {
            race_persona,
            personas,
            expected_links: ExpectedLinks::new(),
            channel_roles: ChannelRoles::new(),
            static_link_profiles: LinkProfiles::new(),
            opening_connections: HashMap::new(),
            recv_connections: HashSet::new(),
            send_connections: HashMap::new(),
            send_connection_to_uuid: HashMap::new(),
            channels_to_use: HashSet::new(),
            genesis_link_requests: HashSet::new(),
            obtain_link_to_retry: HashMap::new(),
            prefer_indirect_always,
        }
    }

    pub fn set_config(
        &mut self,
        expected_links: ExpectedLinks,
        channel_roles: ChannelRoles,
        static_link_profiles: LinkProfiles,
    ) {
        self.expected_links = expected_links;
        self.channel_roles = channel_roles;
        self.static_link_profiles = static_link_profiles;
    }

    pub fn persona(&self, uuid: &str) -> Option<&Persona> {
        self.personas.get(uuid)
    }

    fn prefer_indirect_for(&self, persona: &Persona) -> bool {
        self.prefer_indirect_always || persona.persona_type.map_or(false, |t| t.is_client())
    }

    /// Activates every channel that is ENABLED and has a configured role.
    pub fn activate_enabled_channels(&mut self, sdk: &dyn NetworkManagerSdk) {
        debug!("activating channels");
        for channel in sdk.get_all_channel_properties() {
            let gid = channel.channel_gid.clone();
            match self.channel_roles.get(&gid) {
                Some(role) if channel.channel_status == ChannelStatus::Enabled => {
                    debug!("activating channel {} as {}", gid, role);
                    let response = sdk.activate_channel(&gid, role, UNLIMITED_TIMEOUT);
                    if response.is_ok() {
                        let _ = self.channels_to_use.insert(gid);
                    } else {
                        error!("failed to activate channel {}", gid);
                    }
                }
                _ => {
                    if channel.roles.is_empty() {
                        warn!("no roles available for channel: {}", gid);
                    }
                }
            }
        }
    }

    /// Creates or loads the static links configured for `channel_gid`,
    /// recording each returned handle as an outstanding genesis request.
    pub fn init_static_links(&mut self, sdk: &dyn NetworkManagerSdk, channel_gid: &str) {
        info!("initStaticLinks: called for {}", channel_gid);
        let profiles = match self.static_link_profiles.get(channel_gid) {
            Some(profiles) if !profiles.is_empty() => profiles.clone(),
            _ => {
                warn!("no static links found for channel {}", channel_gid);
                return;
            }
        };

        if let Some(props) = sdk.get_channel_properties(channel_gid) {
            if sdk.get_links_for_channel(channel_gid).len() >= props.max_links {
                warn!(
                    "channel {} is at or over its max link count; later link requests will fail",
                    channel_gid
                );
            }
        }

        for profile in &profiles {
            let response = match profile.role.as_str() {
                "creator" => {
                    debug!("creating static link: {}", profile.description);
                    sdk.create_link_from_address(
                        channel_gid,
                        &profile.address,
                        &profile.personas,
                        0,
                    )
                }
                "loader" => {
                    debug!("loading static link: {}", profile.description);
                    sdk.load_link_address(channel_gid, &profile.address, &profile.personas, 0)
                }
                other => {
                    error!(
                        "unrecognized role {:?} for static link {} on channel {}",
                        other, profile.description, channel_gid
                    );
                    continue;
                }
            };

            if response.is_ok() {
                let _ = self.genesis_link_requests.insert(response.handle);
            } else {
                error!(
                    "failed to initialise static link {} on channel {}",
                    profile.description, channel_gid
                );
                return;
            }
        }
    }

    /// Marks a channel AVAILABLE, removing it from the pending set.
    pub fn channel_available(&mut self, channel_gid: &str) {
        let _ = self.channels_to_use.remove(channel_gid);
        if self.channels_to_use.is_empty() {
            info!("all expected channels are now available");
        }
    }

    /// Whether channel activation or static link creation is still pending.
    pub fn genesis_pending(&self) -> bool {
        !self.channels_to_use.is_empty() || !self.genesis_link_requests.is_empty()
    }

    pub fn discard_genesis_handle(&mut self, handle: Handle) {
        let _ = self.genesis_link_requests.remove(&handle);
    }

    pub fn record_retry(&mut self, uuid: &str, link_type: LinkType) {
        let _ = self.obtain_link_to_retry.insert(uuid.to_string(), link_type);
    }

    pub fn opening_is_empty(&self) -> bool {
        self.opening_connections.is_empty()
    }

    /// Opens one connection per persona a freshly created/loaded link
    /// addresses, remembering the handle so the open resolves to a persona.
    pub fn open_link_connections(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        link_id: &str,
        properties: &LinkProperties,
    ) {
        for uuid in sdk.get_personas_for_link(link_id) {
            info!("opening link {} for {}", link_id, uuid);
            let response = sdk.open_connection(
                properties.link_type,
                link_id,
                hints_for(properties),
                0,
                UNLIMITED_TIMEOUT,
                false,
            );
            if !response.is_ok() {
                error!("failed to open connection on link {}", link_id);
                return;
            }
            let persona = self.personas.get(&uuid).cloned().unwrap_or_default();
            let _ = self
                .opening_connections
                .insert(response.handle, (persona, properties.link_type));
        }
    }

    /// Send links addressing `persona`, best first, UNDEF links dropped.
    pub fn sorted_send_links(
        &self,
        sdk: &dyn NetworkManagerSdk,
        persona: &Persona,
    ) -> Vec<LinkId> {
        let prefer_indirect = self.prefer_indirect_for(persona);
        sdk.get_links_for_personas(&[persona.uuid.clone()], LinkType::Send)
            .into_iter()
            .filter_map(|link_id| {
                sdk.get_link_properties(&link_id)
                    .map(|props| (link_id, props))
            })
            .sorted_by(|a, b| compare_link_properties(&a.1, &b.1, prefer_indirect))
            .filter(|(_, props)| props.connection_type != ConnectionType::Undef)
            .map(|(link_id, _)| link_id)
            .collect()
    }

    /// Queues a sealed package to `persona` on its `conn_idx`-ranked send
    /// connection (modulo the number of connections). Returns the SDK handle
    /// or [`NULL_HANDLE`] on failure.
    pub fn send_to(
        &self,
        sdk: &dyn NetworkManagerSdk,
        persona: &Persona,
        pkg: EncPkg,
        conn_idx: usize,
    ) -> Handle {
        let ranked = match self.send_connections.get(&persona.uuid) {
            Some(ranked) if !ranked.is_empty() => ranked,
            _ => {
                error!("no connections to {} found, not sending message", persona.uuid);
                return NULL_HANDLE;
            }
        };
        let (conn_id, _) = &ranked[conn_idx % ranked.len()];

        debug!("sending package on {} to {}", conn_id, persona.uuid);
        let response = sdk.send_encrypted_package(pkg, conn_id, 0, 0);
        if !response.is_ok() {
            error!("failed to send package");
            return NULL_HANDLE;
        }
        response.handle
    }

    /// Seals a framed message to `dest_uuid` and sends it on the best
    /// connection. Used for routed forwards and LinkWizard traffic.
    pub fn send_formatted_msg(
        &self,
        sdk: &dyn NetworkManagerSdk,
        dest_uuid: &str,
        msg_text: &str,
        trace_id: u64,
        span_id: u64,
    ) -> bool {
        let persona = match self.personas.get(dest_uuid) {
            Some(persona) => persona,
            None => {
                error!("failed to find destination {} in persona map", dest_uuid);
                return false;
            }
        };
        let sealed = match crypto::seal(msg_text.as_bytes(), &persona.aes_key) {
            Ok(sealed) => sealed,
            Err(err) => {
                error!("failed to seal message to {}: {}", dest_uuid, err);
                return false;
            }
        };
        self.send_to(sdk, persona, EncPkg::new(trace_id, span_id, sealed), 0) != NULL_HANDLE
    }

    /// Resolves an opened connection. Returns a pending LinkWizard retry for
    /// the peer when the new send connection unblocks one.
    pub fn handle_connection_opened(
        &mut self,
        handle: Handle,
        conn_id: &str,
        properties: &LinkProperties,
    ) -> Result<Option<(Persona, LinkType)>> {
        let (persona, link_type) = self
            .opening_connections
            .remove(&handle)
            .unwrap_or((Persona::default(), LinkType::Undef));
        debug!(
            "connection opened for persona {:?} of type {:?}",
            persona.uuid, link_type
        );

        if link_type == LinkType::Recv {
            let _ = self.recv_connections.insert(conn_id.to_string());
            debug!("receive connection opened: {}", conn_id);
            return Ok(None);
        }

        if properties.link_type == LinkType::Send && !persona.is_set() {
            error!("opened send connection but no persona was associated with it");
            return Err(Error::ConfigInvalid(
                "send connection without a persona".to_string(),
            ));
        }

        if persona.is_set() {
            let prefer_indirect = self.prefer_indirect_for(&persona);
            let ranked = self
                .send_connections
                .entry(persona.uuid.clone())
                .or_insert_with(Vec::new);
            ranked.push((conn_id.to_string(), properties.clone()));
            ranked.sort_by(|a, b| compare_link_properties(&a.1, &b.1, prefer_indirect));
            let _ = self
                .send_connection_to_uuid
                .insert(conn_id.to_string(), persona.uuid.clone());
            debug!("unicast send opened: {} to {}", conn_id, persona.uuid);

            // Maybe this new connection unblocks a previously failed
            // LinkWizard obtain for the peer.
            if let Some(link_type) = self.obtain_link_to_retry.remove(&persona.uuid) {
                return Ok(Some((persona, link_type)));
            }
        }

        Ok(None)
    }

    /// Resolves a closed connection, opening a replacement send connection
    /// where one is available.
    pub fn handle_connection_closed(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        handle: Handle,
        conn_id: &str,
    ) -> Result<()> {
        let _ = self.opening_connections.remove(&handle);

        if self.recv_connections.remove(conn_id) {
            debug!("receive closed {}", conn_id);
            return Ok(());
        }

        // Not a receive connection, so it must be a send.
        let uuid = self
            .send_connection_to_uuid
            .remove(conn_id)
            .ok_or_else(|| {
                error!("could not find uuid for closed connection {}", conn_id);
                Error::ConfigInvalid(format!("unknown closed connection {}", conn_id))
            })?;
        if let Some(ranked) = self.send_connections.get_mut(&uuid) {
            ranked.retain(|(cid, _)| cid != conn_id);
        }

        let persona = self
            .personas
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::UnknownPersona(uuid.clone()))?;

        let mut potential = self.sorted_send_links(sdk, &persona);
        if let Some(ranked) = self.send_connections.get(&uuid) {
            for (open_id, _) in ranked {
                if let Some(link_id) = sdk.get_link_for_connection(open_id) {
                    potential.retain(|l| *l != link_id);
                }
            }
        }

        let chosen = match potential.first() {
            Some(chosen) => chosen.clone(),
            None => {
                warn!("could not find a link to reach persona {}", uuid);
                return Ok(());
            }
        };
        let hints = sdk
            .get_link_properties(&chosen)
            .map(|props| hints_for(&props))
            .unwrap_or(NO_HINTS);

        let response =
            sdk.open_connection(LinkType::Send, &chosen, hints, 0, UNLIMITED_TIMEOUT, true);
        if !response.is_ok() {
            error!("failed to open replacement connection on {}", chosen);
            return Err(Error::SdkRefused(format!("openConnection {}", chosen)));
        }
        let _ = self
            .opening_connections
            .insert(response.handle, (persona, LinkType::Send));
        Ok(())
    }

    /// Closes every receive connection. Called first during shutdown.
    pub fn close_recv_connections(&mut self, sdk: &dyn NetworkManagerSdk) {
        info!("closing {} receive connections", self.recv_connections.len());
        for conn_id in self.recv_connections.drain() {
            debug!("closing connection: {}", conn_id);
            let _ = sdk.close_connection(&conn_id, 0);
        }
    }

    /// Closes every send connection. Called after the receive side is down.
    pub fn close_send_connections(&mut self, sdk: &dyn NetworkManagerSdk) {
        info!(
            "closing {} send connections",
            self.send_connection_to_uuid.len()
        );
        for conn_id in self.send_connection_to_uuid.keys() {
            debug!("closing connection: {}", conn_id);
            let _ = sdk.close_connection(conn_id, 0);
        }
        self.send_connection_to_uuid.clear();
        self.send_connections.clear();
    }

    /// Test hook: registers a ready send connection to a persona.
    #[cfg(test)]
    pub fn register_send_connection(
        &mut self,
        uuid: &str,
        conn_id: &str,
        properties: LinkProperties,
    ) {
        let persona = self.personas.get(uuid).cloned().unwrap_or_default();
        let prefer_indirect = self.prefer_indirect_for(&persona);
        let ranked = self
            .send_connections
            .entry(uuid.to_string())
            .or_insert_with(Vec::new);
        ranked.push((conn_id.to_string(), properties));
        ranked.sort_by(|a, b| compare_link_properties(&a.1, &b.1, prefer_indirect));
        let _ = self
            .send_connection_to_uuid
            .insert(conn_id.to_string(), uuid.to_string());
    }

    /// Test hook: registers a pending open so a status callback resolves it.
    #[cfg(test)]
    pub fn expect_opening(&mut self, handle: Handle, persona: Persona, link_type: LinkType) {
        let _ = self.opening_connections.insert(handle, (persona, link_type));
    }
}
