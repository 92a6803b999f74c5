// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The comms plugin: carries sealed packages over a direct TCP channel and
//! an indirect HTTP-whiteboard channel.
//!
//! One logical connection may serve several connection ids (a link opened
//! twice reuses the same socket or poll loop); the underlying transport is
//! only torn down when the last id detaches. Receive loops run as tasks on
//! the plugin's own runtime and are cancelled through a per-connection
//! terminate flag.

pub mod channels;

mod direct;
mod indirect;

pub use channels::{DIRECT_CHANNEL_GID, INDIRECT_CHANNEL_GID};

use self::channels::{default_channel_properties, default_link_properties};
use crate::messaging::EncPkg;
use crate::sdk::{
    CommsPlugin, CommsSdk, Handle, PluginConfig, PluginResponse, Timeout, UserDisplayType,
    NULL_HANDLE,
};
use crate::types::{
    ChannelStatus, ConnectionId, ConnectionStatus, LinkId, LinkProperties, LinkStatus, LinkType,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// First port handed out for dynamically created direct links.
const DEFAULT_START_PORT: u16 = 10_000;
const MAX_PORT: u16 = 65_535;

/// Default whiteboard service location for dynamically created links.
const DEFAULT_WHITEBOARD_HOSTNAME: &str = "twosix-whiteboard";
const DEFAULT_WHITEBOARD_PORT: u16 = 5_000;
const DEFAULT_CHECK_FREQUENCY_MS: u64 = 1_000;

/// Parsed channel-specific link address.
///
/// Direct links use `{hostname, port}`; whiteboard links use
/// `{hostname, port, hashtag, checkFrequency, multicast}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct CommsLinkProfile {
    pub hostname: String,
    pub port: u16,
    #[serde(skip_serializing_if = "is_false")]
    pub multicast: bool,
    #[serde(skip_serializing_if = "is_zero")]
    pub check_frequency: u64,
    #[serde(skip_serializing_if = "str_empty")]
    pub hashtag: String,
    #[serde(skip_serializing_if = "is_false")]
    pub unicast: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

fn str_empty(value: &str) -> bool {
    value.is_empty()
}

/// One logical connection: a socket listener or poll loop plus the
/// connection ids attached to it.
pub(crate) struct CommsConn {
    pub connection_ids: Mutex<Vec<ConnectionId>>,
    pub link_id: LinkId,
    pub link_type: LinkType,
    pub profile: CommsLinkProfile,
    /// Flipped to true to cancel the receive task promptly.
    pub terminate: watch::Sender<bool>,
    // Held so a terminate sent before the task subscribes is never lost.
    cancel_rx: watch::Receiver<bool>,
}

impl CommsConn {
    pub(crate) fn new(
        connection_id: ConnectionId,
        link_id: LinkId,
        link_type: LinkType,
        profile: CommsLinkProfile,
    ) -> Self {
        let (terminate, cancel_rx) = watch::channel(false);
        Self {
            connection_ids: Mutex::new(vec![connection_id]),
            link_id,
            link_type,
            profile,
            terminate,
            cancel_rx,
        }
    }

    pub(crate) fn cancel_rx(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.connection_ids.lock().expect("connection ids").clone()
    }

    fn attach(&self, conn_id: &str) {
        self.connection_ids
            .lock()
            .expect("connection ids")
            .push(conn_id.to_string());
    }

    /// Detaches an id; returns true when no ids remain.
    fn detach(&self, conn_id: &str) -> bool {
        let mut ids = self.connection_ids.lock().expect("connection ids");
        ids.retain(|id| id != conn_id);
        ids.is_empty()
    }
}

pub(crate) type ConnectionMap = Arc<Mutex<HashMap<ConnectionId, Arc<CommsConn>>>>;

struct ChannelState {
    link_profiles: HashMap<LinkId, CommsLinkProfile>,
    link_properties: HashMap<LinkId, LinkProperties>,
    channel_status: HashMap<String, ChannelStatus>,
    links_in_channels: HashMap<String, HashSet<LinkId>>,
    next_available_port: u16,
    next_available_hashtag: u64,
    whiteboard_hostname: String,
    whiteboard_port: u16,
    hostname: String,
    request_start_port_handle: Option<Handle>,
    request_hostname_handle: Option<Handle>,
    user_input_requests: HashSet<Handle>,
}

impl Default for ChannelState {
    fn default() -> Self {
        let mut channel_status = HashMap::new();
        let _ = channel_status.insert(DIRECT_CHANNEL_GID.to_string(), ChannelStatus::Unavailable);
        let _ =
            channel_status.insert(INDIRECT_CHANNEL_GID.to_string(), ChannelStatus::Unavailable);
        let mut links_in_channels = HashMap::new();
        let _ = links_in_channels.insert(DIRECT_CHANNEL_GID.to_string(), HashSet::new());
        let _ = links_in_channels.insert(INDIRECT_CHANNEL_GID.to_string(), HashSet::new());
        Self {
            link_profiles: HashMap::new(),
            link_properties: HashMap::new(),
            channel_status,
            links_in_channels,
            next_available_port: DEFAULT_START_PORT,
            next_available_hashtag: 0,
            whiteboard_hostname: DEFAULT_WHITEBOARD_HOSTNAME.to_string(),
            whiteboard_port: DEFAULT_WHITEBOARD_PORT,
            hostname: "no-hostname-provided-by-user".to_string(),
            request_start_port_handle: None,
            request_hostname_handle: None,
            user_input_requests: HashSet::new(),
        }
    }
}

impl ChannelState {
    fn next_available_port(&mut self) -> Option<u16> {
        if self.next_available_port == MAX_PORT {
            error!("no more ports available for dynamically created links");
            return None;
        }
        let port = self.next_available_port;
        self.next_available_port += 1;
        Some(port)
    }
}

/// The comms plugin façade. Thread-safe; the host may call in from any
/// thread.
pub struct Comm {
    sdk: Arc<dyn CommsSdk>,
    runtime: tokio::runtime::Runtime,
    connections: ConnectionMap,
    state: Mutex<ChannelState>,
    active_persona: Mutex<String>,
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Comm").finish()
    }
}

impl Comm {
    /// Creates the plugin with its own runtime for receive loops.
    pub fn new(sdk: Arc<dyn CommsSdk>) -> crate::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("comms-channel")
            .enable_all()
            .build()
            .map_err(|err| crate::Error::Transport(format!("runtime: {}", err)))?;
        Ok(Self {
            sdk,
            runtime,
            connections: Arc::new(Mutex::new(HashMap::new())),
            state: Mutex::new(ChannelState::default()),
            active_persona: Mutex::new(String::new()),
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChannelState> {
        self.state.lock().expect("channel state")
    }

    /// Failure reply for refused link operations: LINK_DESTROYED with empty
    /// properties, correlated to the caller's handle.
    fn fail_link(&self, handle: Handle) {
        let _ = self.sdk.on_link_status_changed(
            handle,
            "",
            LinkStatus::Destroyed,
            &LinkProperties::default(),
            true,
        );
    }

    fn report_channel_status(&self, channel_gid: &str, status: ChannelStatus) {
        let props = default_channel_properties(self.sdk.as_ref(), channel_gid);
        let _ = self
            .sdk
            .on_channel_status_changed(NULL_HANDLE, channel_gid, status, &props, true);
    }

    /// Shared tail of createLink/createLinkFromAddress/loadLinkAddress:
    /// records the link, reports its status and publishes its properties.
    fn provision_link(
        &self,
        handle: Handle,
        channel_gid: &str,
        link_id: &str,
        profile: CommsLinkProfile,
        properties: LinkProperties,
        status: LinkStatus,
    ) -> PluginResponse {
        {
            let mut state = self.lock_state();
            let _ = state.link_profiles.insert(link_id.to_string(), profile);
            let _ = state
                .link_properties
                .insert(link_id.to_string(), properties.clone());
            let _ = state
                .links_in_channels
                .entry(channel_gid.to_string())
                .or_insert_with(HashSet::new)
                .insert(link_id.to_string());
        }
        let _ = self
            .sdk
            .on_link_status_changed(handle, link_id, status, &properties, true);
        let _ = self.sdk.update_link_properties(link_id, &properties, true);
        debug!(
            "link {} on {} now {:?} with address {}",
            link_id, channel_gid, status, properties.link_address
        );
        PluginResponse::Ok
    }

    /// Checks the channel is AVAILABLE and mints a link id, running the
    /// failure reply on either refusal.
    fn checked_link_id(&self, handle: Handle, channel_gid: &str) -> Option<LinkId> {
        let status = self
            .lock_state()
            .channel_status
            .get(channel_gid)
            .copied()
            .unwrap_or(ChannelStatus::Undef);
        if status != ChannelStatus::Available {
            error!("channel {} not available", channel_gid);
            self.fail_link(handle);
            return None;
        }
        match self.sdk.generate_link_id(channel_gid) {
            Some(link_id) => Some(link_id),
            None => {
                debug!("host failed to generate a link id for {}", channel_gid);
                self.fail_link(handle);
                None
            }
        }
    }
}

impl CommsPlugin for Comm {
    fn init(&self, plugin_config: &PluginConfig) -> PluginResponse {
        info!("init called");
        info!("etcDirectory: {:?}", plugin_config.etc_dir);
        info!("loggingDirectory: {:?}", plugin_config.logging_dir);
        info!("auxDataDirectory: {:?}", plugin_config.aux_data_dir);
        info!("tmpDirectory: {:?}", plugin_config.tmp_dir);
        info!("pluginDirectory: {:?}", plugin_config.plugin_dir);

        let persona = self.sdk.get_active_persona();
        debug!("init: I am {}", persona);
        *self.active_persona.lock().expect("persona") = persona;

        if let Err(err) = self
            .sdk
            .write_file("initialized.txt", b"comms plugin initialized\n")
        {
            warn!("could not write initialization marker: {}", err);
        }

        info!("init returned");
        PluginResponse::Ok
    }

    fn shutdown(&self) -> PluginResponse {
        info!("shutdown called");
        let conn_ids: Vec<ConnectionId> = self
            .connections
            .lock()
            .expect("connections map")
            .keys()
            .cloned()
            .collect();
        for conn_id in conn_ids {
            let _ = self.close_connection(NULL_HANDLE, &conn_id);
        }
        PluginResponse::Ok
    }

    fn send_package(
        &self,
        handle: Handle,
        conn_id: &str,
        pkg: &EncPkg,
        _timeout_timestamp: f64,
        _batch_id: u64,
    ) -> PluginResponse {
        debug!("sendPackage called on {}", conn_id);
        let conn = match self.connections.lock().expect("connections map").get(conn_id) {
            Some(conn) => conn.clone(),
            None => {
                error!("sendPackage: no connection found: {}", conn_id);
                return PluginResponse::Error;
            }
        };

        if conn.link_type == LinkType::Recv {
            debug!("attempting to send on a receive-only connection");
            return PluginResponse::Error;
        }

        let data = pkg.raw_data().to_vec();
        let sdk = self.sdk.clone();
        let profile = conn.profile.clone();
        if profile.multicast {
            info!("sendPackage: sending over whiteboard link");
            let _ = self.runtime.spawn(indirect::post_package(
                sdk,
                handle,
                profile.hostname,
                profile.port,
                profile.hashtag,
                data,
            ));
        } else {
            info!("sendPackage: sending over direct link");
            let _ = self.runtime.spawn(direct::send_oneshot(
                sdk,
                handle,
                profile.hostname,
                profile.port,
                data,
            ));
        }
        PluginResponse::Ok
    }

    fn open_connection(
        &self,
        handle: Handle,
        link_type: LinkType,
        link_id: &str,
        link_hints: &str,
        _send_timeout: Timeout,
    ) -> PluginResponse {
        info!("openConnection called for {}", link_id);
        debug!("    link_hints: {}", link_hints);

        let (profile, properties) = {
            let state = self.lock_state();
            let profile = match state.link_profiles.get(link_id) {
                Some(profile) => profile.clone(),
                None => {
                    error!("openConnection: no link profile found for {}", link_id);
                    return PluginResponse::Error;
                }
            };
            let properties = state
                .link_properties
                .get(link_id)
                .cloned()
                .unwrap_or_default();
            (profile, properties)
        };

        let mut connections = self.connections.lock().expect("connections map");

        // A link already carrying a connection just gets another id.
        let existing = connections
            .values()
            .find(|conn| conn.link_id == link_id)
            .cloned();
        if let Some(conn) = existing {
            info!("connection already exists");
            let conn_id = self.sdk.generate_connection_id(link_id);
            conn.attach(&conn_id);
            let _ = connections.insert(conn_id.clone(), conn);
            drop(connections);
            let _ = self.sdk.on_connection_status_changed(
                handle,
                &conn_id,
                ConnectionStatus::Open,
                &properties,
                true,
            );
            return PluginResponse::Ok;
        }

        let conn_id = self.sdk.generate_connection_id(link_id);
        let conn = Arc::new(CommsConn::new(
            conn_id.clone(),
            link_id.to_string(),
            link_type,
            profile.clone(),
        ));
        let _ = connections.insert(conn_id.clone(), conn.clone());
        drop(connections);

        if link_type.receives() {
            // Receiving requires a task listening or polling for packages.
            if profile.multicast {
                debug!("starting whiteboard poll task");
                let _ = self.runtime.spawn(indirect::poll_loop(
                    self.sdk.clone(),
                    self.connections.clone(),
                    conn,
                    handle,
                    conn_id,
                    properties,
                ));
            } else {
                debug!("starting direct accept task");
                let _ = self.runtime.spawn(direct::accept_loop(
                    self.sdk.clone(),
                    self.connections.clone(),
                    conn,
                    handle,
                    conn_id,
                    properties,
                ));
            }
        } else {
            // Send connections carry no task; just report them open.
            let _ = self.sdk.on_connection_status_changed(
                handle,
                &conn_id,
                ConnectionStatus::Open,
                &properties,
                true,
            );
        }
        PluginResponse::Ok
    }

    fn close_connection(&self, handle: Handle, conn_id: &str) -> PluginResponse {
        info!("closeConnection called for {}", conn_id);

        let conn = {
            let mut connections = self.connections.lock().expect("connections map");
            match connections.remove(conn_id) {
                Some(conn) => conn,
                None => {
                    warn!("no connection found: {}", conn_id);
                    return PluginResponse::Error;
                }
            }
        };

        // The transport only goes down with its last connection id.
        if conn.detach(conn_id) {
            let _ = conn.terminate.send(true);
        }

        let properties = self
            .lock_state()
            .link_properties
            .get(&conn.link_id)
            .cloned()
            .unwrap_or_default();
        let _ = self.sdk.on_connection_status_changed(
            handle,
            conn_id,
            ConnectionStatus::Closed,
            &properties,
            true,
        );
        PluginResponse::Ok
    }

    fn create_link(&self, handle: Handle, channel_gid: &str) -> PluginResponse {
        debug!("createLink: called for {}", channel_gid);
        let link_id = match self.checked_link_id(handle, channel_gid) {
            Some(link_id) => link_id,
            None => return PluginResponse::Error,
        };
        let mut properties = match default_link_properties(self.sdk.as_ref(), channel_gid) {
            Some(properties) => properties,
            None => {
                error!("createLink: invalid channel gid {}", channel_gid);
                self.fail_link(handle);
                return PluginResponse::Error;
            }
        };

        let profile = match channel_gid {
            DIRECT_CHANNEL_GID => {
                properties.link_type = LinkType::Recv;
                let mut state = self.lock_state();
                let port = match state.next_available_port() {
                    Some(port) => port,
                    None => {
                        drop(state);
                        self.fail_link(handle);
                        return PluginResponse::Error;
                    }
                };
                CommsLinkProfile {
                    hostname: state.hostname.clone(),
                    port,
                    unicast: true,
                    ..CommsLinkProfile::default()
                }
            }
            INDIRECT_CHANNEL_GID => {
                properties.link_type = LinkType::Bidi;
                let mut state = self.lock_state();
                let index = state.next_available_hashtag;
                state.next_available_hashtag += 1;
                let persona = self.active_persona.lock().expect("persona").clone();
                CommsLinkProfile {
                    hostname: state.whiteboard_hostname.clone(),
                    port: state.whiteboard_port,
                    check_frequency: DEFAULT_CHECK_FREQUENCY_MS,
                    hashtag: format!("{}_{}", persona, index),
                    multicast: true,
                    ..CommsLinkProfile::default()
                }
            }
            _ => {
                error!("createLink: invalid channel gid {}", channel_gid);
                self.fail_link(handle);
                return PluginResponse::Error;
            }
        };

        properties.link_address =
            serde_json::to_string(&profile).unwrap_or_else(|_| "{}".to_string());
        self.provision_link(
            handle,
            channel_gid,
            &link_id,
            profile,
            properties,
            LinkStatus::Created,
        )
    }

    fn create_link_from_address(
        &self,
        handle: Handle,
        channel_gid: &str,
        link_address: &str,
    ) -> PluginResponse {
        debug!("createLinkFromAddress: called for {}", channel_gid);
        let link_id = match self.checked_link_id(handle, channel_gid) {
            Some(link_id) => link_id,
            None => return PluginResponse::Error,
        };
        let mut properties = match default_link_properties(self.sdk.as_ref(), channel_gid) {
            Some(properties) => properties,
            None => {
                error!("createLinkFromAddress: invalid channel gid {}", channel_gid);
                self.fail_link(handle);
                return PluginResponse::Error;
            }
        };
        let profile: CommsLinkProfile = match serde_json::from_str(link_address) {
            Ok(profile) => profile,
            Err(err) => {
                error!("createLinkFromAddress: bad address {:?}: {}", link_address, err);
                self.fail_link(handle);
                return PluginResponse::Error;
            }
        };

        properties.link_type = if channel_gid == DIRECT_CHANNEL_GID {
            LinkType::Recv
        } else {
            LinkType::Bidi
        };
        properties.link_address = link_address.to_string();
        self.provision_link(
            handle,
            channel_gid,
            &link_id,
            profile,
            properties,
            LinkStatus::Created,
        )
    }

    fn load_link_address(
        &self,
        handle: Handle,
        channel_gid: &str,
        link_address: &str,
    ) -> PluginResponse {
        debug!("loadLinkAddress: called for {}", channel_gid);
        let link_id = match self.checked_link_id(handle, channel_gid) {
            Some(link_id) => link_id,
            None => return PluginResponse::Error,
        };
        let mut properties = match default_link_properties(self.sdk.as_ref(), channel_gid) {
            Some(properties) => properties,
            None => {
                error!("loadLinkAddress: invalid channel gid {}", channel_gid);
                self.fail_link(handle);
                return PluginResponse::Error;
            }
        };
        let profile: CommsLinkProfile = match serde_json::from_str(link_address) {
            Ok(profile) => profile,
            Err(err) => {
                error!("loadLinkAddress: bad address {:?}: {}", link_address, err);
                self.fail_link(handle);
                return PluginResponse::Error;
            }
        };

        properties.link_type = if channel_gid == DIRECT_CHANNEL_GID {
            LinkType::Send
        } else {
            LinkType::Bidi
        };
        properties.link_address = link_address.to_string();
        self.provision_link(
            handle,
            channel_gid,
            &link_id,
            profile,
            properties,
            LinkStatus::Loaded,
        )
    }

    fn load_link_addresses(
        &self,
        handle: Handle,
        channel_gid: &str,
        _link_addresses: &[String],
    ) -> PluginResponse {
        // Neither channel is multi-addressable.
        error!(
            "loadLinkAddresses: API not supported for channel {}",
            channel_gid
        );
        self.fail_link(handle);
        PluginResponse::Error
    }

    fn destroy_link(&self, handle: Handle, link_id: &str) -> PluginResponse {
        debug!("destroyLink: called for {}", link_id);

        let channel_gid = {
            let state = self.lock_state();
            state
                .links_in_channels
                .iter()
                .find(|(_, links)| links.contains(link_id))
                .map(|(gid, _)| gid.clone())
        };
        let channel_gid = match channel_gid {
            Some(channel_gid) => channel_gid,
            None => {
                // Unknown link: nothing to report to the host.
                error!("destroyLink: failed to find link {}", link_id);
                return PluginResponse::Ok;
            }
        };

        let mut properties = default_link_properties(self.sdk.as_ref(), &channel_gid)
            .unwrap_or_default();
        properties.link_type = LinkType::Bidi;
        let _ = self
            .sdk
            .on_link_status_changed(handle, link_id, LinkStatus::Destroyed, &properties, true);

        // Close every connection open on the link.
        let conn_ids: Vec<ConnectionId> = {
            let connections = self.connections.lock().expect("connections map");
            connections
                .iter()
                .filter(|(_, conn)| conn.link_id == link_id)
                .map(|(conn_id, _)| conn_id.clone())
                .collect()
        };
        for conn_id in conn_ids {
            let _ = self.close_connection(handle, &conn_id);
        }

        let mut state = self.lock_state();
        if let Some(links) = state.links_in_channels.get_mut(&channel_gid) {
            let _ = links.remove(link_id);
        }
        let _ = state.link_profiles.remove(link_id);
        PluginResponse::Ok
    }

    fn activate_channel(
        &self,
        _handle: Handle,
        channel_gid: &str,
        _role_name: &str,
    ) -> PluginResponse {
        info!("activateChannel called for {}", channel_gid);

        match channel_gid {
            INDIRECT_CHANNEL_GID => {
                let _ = self
                    .lock_state()
                    .channel_status
                    .insert(channel_gid.to_string(), ChannelStatus::Available);
                self.report_channel_status(channel_gid, ChannelStatus::Available);
                let _ = self.sdk.display_info_to_user(
                    &format!("{} is available", channel_gid),
                    UserDisplayType::Toast,
                );
            }
            DIRECT_CHANNEL_GID => {
                // The direct channel needs a public hostname and a start
                // port before it can hand out link addresses.
                let response = self.sdk.request_plugin_user_input(
                    "startPort",
                    "What is the first available port?",
                    true,
                );
                if !response.is_ok() {
                    warn!("failed to request start port from user");
                }
                let mut state = self.lock_state();
                state.request_start_port_handle = Some(response.handle);
                let _ = state.user_input_requests.insert(response.handle);

                let response = self.sdk.request_common_user_input("hostname");
                if !response.is_ok() {
                    warn!("failed to request hostname from user");
                    let _ = state
                        .channel_status
                        .insert(channel_gid.to_string(), ChannelStatus::Failed);
                    drop(state);
                    self.report_channel_status(channel_gid, ChannelStatus::Failed);
                    return PluginResponse::Ok;
                }
                state.request_hostname_handle = Some(response.handle);
                let _ = state.user_input_requests.insert(response.handle);
            }
            other => warn!("unrecognized channel gid: {}", other),
        }

        PluginResponse::Ok
    }

    fn deactivate_channel(&self, handle: Handle, channel_gid: &str) -> PluginResponse {
        debug!("deactivateChannel: called for {}", channel_gid);
        {
            let mut state = self.lock_state();
            if state.channel_status.get(channel_gid).copied() != Some(ChannelStatus::Available) {
                error!("deactivateChannel: channel {} not available", channel_gid);
                return PluginResponse::Error;
            }
            let _ = state
                .channel_status
                .insert(channel_gid.to_string(), ChannelStatus::Unavailable);
        }
        self.report_channel_status(channel_gid, ChannelStatus::Unavailable);

        // Destroying the links implicitly closes all their connections.
        let links: Vec<LinkId> = self
            .lock_state()
            .links_in_channels
            .get(channel_gid)
            .map(|links| links.iter().cloned().collect())
            .unwrap_or_default();
        for link_id in links {
            let _ = self.destroy_link(handle, &link_id);
        }
        if let Some(links) = self.lock_state().links_in_channels.get_mut(channel_gid) {
            links.clear();
        }
        PluginResponse::Ok
    }

    fn flush_channel(&self, _handle: Handle, _channel_gid: &str, _batch_id: u64) -> PluginResponse {
        debug!("flushChannel: plugin does not support flushing");
        PluginResponse::Error
    }

    fn on_user_input_received(
        &self,
        handle: Handle,
        answered: bool,
        response: &str,
    ) -> PluginResponse {
        debug!("onUserInputReceived: handle={}", handle);
        let mut state = self.lock_state();

        if state.request_hostname_handle == Some(handle) {
            if answered {
                state.hostname = response.to_string();
                info!("using hostname {}", state.hostname);
            } else {
                error!("direct channel is not available without a hostname");
                let _ = state
                    .channel_status
                    .insert(DIRECT_CHANNEL_GID.to_string(), ChannelStatus::Disabled);
                drop(state);
                self.report_channel_status(DIRECT_CHANNEL_GID, ChannelStatus::Disabled);
                state = self.lock_state();
            }
        } else if state.request_start_port_handle == Some(handle) {
            if answered {
                match response.parse::<u16>() {
                    Ok(port) => {
                        state.next_available_port = port;
                        info!("using start port {}", port);
                    }
                    Err(_) => {
                        warn!(
                            "unable to parse start port response {:?}, using default",
                            response
                        );
                    }
                }
            } else {
                warn!("no answer for start port, using default");
            }
        } else {
            warn!("onUserInputReceived: handle is not recognized");
            return PluginResponse::Error;
        }

        let _ = state.user_input_requests.remove(&handle);
        if state.user_input_requests.is_empty() {
            // Input requests only go out when the direct channel activates;
            // once they all resolve the channel is ready, unless the user
            // declined a required answer.
            let status = state
                .channel_status
                .get(DIRECT_CHANNEL_GID)
                .copied()
                .unwrap_or(ChannelStatus::Undef);
            if status != ChannelStatus::Disabled && status != ChannelStatus::Failed {
                let _ = state
                    .channel_status
                    .insert(DIRECT_CHANNEL_GID.to_string(), ChannelStatus::Available);
                drop(state);
                self.report_channel_status(DIRECT_CHANNEL_GID, ChannelStatus::Available);
                let _ = self.sdk.display_info_to_user(
                    &format!("{} is available", DIRECT_CHANNEL_GID),
                    UserDisplayType::Toast,
                );
            }
        }

        PluginResponse::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::mock::MockSdk;
    use crate::types::ConnectionType;

    fn plugin() -> (Arc<MockSdk>, Comm) {
        let sdk = Arc::new(MockSdk::new("race-server-00001"));
        sdk.add_channel(channels::direct_channel_profile());
        sdk.add_channel(channels::indirect_channel_profile());
        let dyn_sdk: Arc<dyn CommsSdk> = sdk.clone();
        let comm = Comm::new(dyn_sdk).expect("runtime");
        assert_eq!(comm.init(&PluginConfig::default()), PluginResponse::Ok);
        (sdk, comm)
    }

    fn make_indirect_available(comm: &Comm) {
        assert_eq!(
            comm.activate_channel(1, INDIRECT_CHANNEL_GID, "default"),
            PluginResponse::Ok
        );
    }

    #[test]
    fn indirect_activation_is_immediate() {
        let (sdk, comm) = plugin();
        make_indirect_available(&comm);
        let state = sdk.state.lock().expect("state");
        assert_eq!(
            state.channel_events,
            vec![(
                NULL_HANDLE,
                INDIRECT_CHANNEL_GID.to_string(),
                ChannelStatus::Available
            )]
        );
    }

    #[test]
    fn direct_activation_waits_for_user_input() {
        let (sdk, comm) = plugin();
        assert_eq!(
            comm.activate_channel(1, DIRECT_CHANNEL_GID, "default"),
            PluginResponse::Ok
        );
        let (port_handle, hostname_handle) = {
            let state = sdk.state.lock().expect("state");
            assert!(state.channel_events.is_empty());
            assert_eq!(state.user_input_requests.len(), 2);
            (
                state.user_input_requests[0].0,
                state.user_input_requests[1].0,
            )
        };

        assert_eq!(
            comm.on_user_input_received(port_handle, true, "26000"),
            PluginResponse::Ok
        );
        assert!(sdk.state.lock().expect("state").channel_events.is_empty());

        assert_eq!(
            comm.on_user_input_received(hostname_handle, true, "race-server-1.example"),
            PluginResponse::Ok
        );
        let state = sdk.state.lock().expect("state");
        assert_eq!(
            state.channel_events,
            vec![(
                NULL_HANDLE,
                DIRECT_CHANNEL_GID.to_string(),
                ChannelStatus::Available
            )]
        );
    }

    #[test]
    fn declined_hostname_disables_the_channel() {
        let (sdk, comm) = plugin();
        assert_eq!(
            comm.activate_channel(1, DIRECT_CHANNEL_GID, "default"),
            PluginResponse::Ok
        );
        let (port_handle, hostname_handle) = {
            let state = sdk.state.lock().expect("state");
            (
                state.user_input_requests[0].0,
                state.user_input_requests[1].0,
            )
        };

        assert_eq!(
            comm.on_user_input_received(hostname_handle, false, ""),
            PluginResponse::Ok
        );
        assert_eq!(
            comm.on_user_input_received(port_handle, true, "26000"),
            PluginResponse::Ok
        );

        // Disabled, and never reported available afterwards.
        let state = sdk.state.lock().expect("state");
        assert_eq!(
            state.channel_events,
            vec![(
                NULL_HANDLE,
                DIRECT_CHANNEL_GID.to_string(),
                ChannelStatus::Disabled
            )]
        );
    }

    #[test]
    fn create_link_allocates_ports_from_the_pool() {
        let (sdk, comm) = plugin();
        assert_eq!(
            comm.activate_channel(1, DIRECT_CHANNEL_GID, "default"),
            PluginResponse::Ok
        );
        let handles: Vec<Handle> = {
            let state = sdk.state.lock().expect("state");
            state.user_input_requests.iter().map(|(h, _)| *h).collect()
        };
        assert_eq!(comm.on_user_input_received(handles[0], true, "26000"), PluginResponse::Ok);
        assert_eq!(
            comm.on_user_input_received(handles[1], true, "race-server-1.example"),
            PluginResponse::Ok
        );

        assert_eq!(comm.create_link(11, DIRECT_CHANNEL_GID), PluginResponse::Ok);
        assert_eq!(comm.create_link(12, DIRECT_CHANNEL_GID), PluginResponse::Ok);

        let state = sdk.state.lock().expect("state");
        let created: Vec<_> = state
            .link_events
            .iter()
            .filter(|(_, _, status, _)| *status == LinkStatus::Created)
            .collect();
        assert_eq!(created.len(), 2);

        let first: CommsLinkProfile =
            serde_json::from_str(&created[0].3.link_address).expect("address json");
        let second: CommsLinkProfile =
            serde_json::from_str(&created[1].3.link_address).expect("address json");
        assert_eq!(first.hostname, "race-server-1.example");
        assert_eq!(first.port, 26_000);
        assert_eq!(second.port, 26_001);
        assert!(first.unicast);
    }

    #[test]
    fn create_link_on_inactive_channel_is_refused_with_destroyed() {
        let (sdk, comm) = plugin();
        assert_eq!(
            comm.create_link(11, DIRECT_CHANNEL_GID),
            PluginResponse::Error
        );
        let state = sdk.state.lock().expect("state");
        assert_eq!(state.link_events.len(), 1);
        let (handle, link_id, status, _) = &state.link_events[0];
        assert_eq!(*handle, 11);
        assert_eq!(link_id, "");
        assert_eq!(*status, LinkStatus::Destroyed);
    }

    #[test]
    fn indirect_links_get_unique_hashtags() {
        let (sdk, comm) = plugin();
        make_indirect_available(&comm);

        assert_eq!(comm.create_link(11, INDIRECT_CHANNEL_GID), PluginResponse::Ok);
        assert_eq!(comm.create_link(12, INDIRECT_CHANNEL_GID), PluginResponse::Ok);

        let state = sdk.state.lock().expect("state");
        let created: Vec<_> = state
            .link_events
            .iter()
            .filter(|(_, _, status, _)| *status == LinkStatus::Created)
            .collect();
        let first: CommsLinkProfile =
            serde_json::from_str(&created[0].3.link_address).expect("address json");
        let second: CommsLinkProfile =
            serde_json::from_str(&created[1].3.link_address).expect("address json");
        assert!(first.multicast);
        assert_eq!(first.hostname, DEFAULT_WHITEBOARD_HOSTNAME);
        assert_ne!(first.hashtag, second.hashtag);
        assert!(first.hashtag.starts_with("race-server-00001_"));
    }

    #[test]
    fn load_link_address_marks_direct_links_send_side() {
        let (sdk, comm) = plugin();
        assert_eq!(
            comm.activate_channel(1, DIRECT_CHANNEL_GID, "default"),
            PluginResponse::Ok
        );
        let handles: Vec<Handle> = {
            let state = sdk.state.lock().expect("state");
            state.user_input_requests.iter().map(|(h, _)| *h).collect()
        };
        assert_eq!(comm.on_user_input_received(handles[0], true, "26000"), PluginResponse::Ok);
        assert_eq!(
            comm.on_user_input_received(handles[1], true, "host-a"),
            PluginResponse::Ok
        );

        let address = r#"{"hostname": "host-b", "port": 26010}"#;
        assert_eq!(
            comm.load_link_address(21, DIRECT_CHANNEL_GID, address),
            PluginResponse::Ok
        );
        let state = sdk.state.lock().expect("state");
        let loaded = state
            .link_events
            .iter()
            .find(|(_, _, status, _)| *status == LinkStatus::Loaded)
            .expect("loaded event");
        assert_eq!(loaded.3.link_type, LinkType::Send);
        assert_eq!(loaded.3.link_address, address);
    }

    #[test]
    fn destroy_of_unknown_link_reports_nothing() {
        let (sdk, comm) = plugin();
        assert_eq!(comm.destroy_link(31, "no-such-link"), PluginResponse::Ok);
        assert!(sdk.state.lock().expect("state").link_events.is_empty());
    }

    #[test]
    fn send_on_receive_connection_is_refused() {
        let (_sdk, comm) = plugin();
        let conn = Arc::new(CommsConn::new(
            "conn-r".to_string(),
            "link-r".to_string(),
            LinkType::Recv,
            CommsLinkProfile::default(),
        ));
        let _ = comm
            .connections
            .lock()
            .expect("map")
            .insert("conn-r".to_string(), conn);

        let pkg = EncPkg::from_raw(vec![1, 2, 3]);
        assert_eq!(
            comm.send_package(41, "conn-r", &pkg, 0.0, 0),
            PluginResponse::Error
        );
    }

    #[test]
    fn second_open_on_a_link_reuses_the_connection() {
        let (sdk, comm) = plugin();
        make_indirect_available(&comm);
        assert_eq!(comm.create_link(11, INDIRECT_CHANNEL_GID), PluginResponse::Ok);
        let link_id = {
            let state = sdk.state.lock().expect("state");
            state.link_events[0].1.clone()
        };

        // Two send-side opens: no poll task needed, both ids share one
        // logical connection.
        assert_eq!(
            comm.open_connection(51, LinkType::Send, &link_id, "{}", 0),
            PluginResponse::Ok
        );
        assert_eq!(
            comm.open_connection(52, LinkType::Send, &link_id, "{}", 0),
            PluginResponse::Ok
        );

        let ids: Vec<ConnectionId> = {
            let connections = comm.connections.lock().expect("map");
            assert_eq!(connections.len(), 2);
            connections.keys().cloned().collect()
        };
        let conn = comm
            .connections
            .lock()
            .expect("map")
            .get(&ids[0])
            .cloned()
            .expect("conn");
        assert_eq!(conn.ids().len(), 2);

        // Closing one id keeps the transport alive for the other.
        assert_eq!(comm.close_connection(53, &ids[0]), PluginResponse::Ok);
        assert_eq!(conn.ids().len(), 1);
        assert!(!*conn.cancel_rx().borrow());

        assert_eq!(comm.close_connection(54, &ids[1]), PluginResponse::Ok);
        assert!(*conn.cancel_rx().borrow());
    }

    #[test]
    fn link_properties_connection_type_comes_from_the_channel() {
        let (sdk, comm) = plugin();
        make_indirect_available(&comm);
        assert_eq!(comm.create_link(11, INDIRECT_CHANNEL_GID), PluginResponse::Ok);
        let state = sdk.state.lock().expect("state");
        assert_eq!(
            state.link_events[0].3.connection_type,
            ConnectionType::Indirect
        );
        assert_eq!(state.link_events[0].3.link_type, LinkType::Bidi);
    }
}
