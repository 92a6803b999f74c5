// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The network manager plugin: oblivious message routing over committees.
//!
//! One concrete plugin type serves both node roles; the client and server
//! routing paths share only the link/connection bookkeeping, so the role is
//! a tagged variant around that shared state rather than a type hierarchy.

pub mod config;

mod client;
mod links;
mod seen;
mod server;
mod tracker;
mod wizard;

#[cfg(test)]
mod tests;

use self::client::ClientState;
use self::links::LinkManager;
use self::server::ServerState;
use self::wizard::LinkWizard;
use crate::messaging::{crypto, parse_ext_msg, ClrMsg, EncPkg, MsgType};
use crate::sdk::{
    Handle, NetworkManagerPlugin, NetworkManagerSdk, PackageStatus, PluginConfig, PluginResponse,
    PluginStatus, UserDisplayType,
};
use crate::types::{
    ChannelProperties, ChannelStatus, ConnectionId, ConnectionStatus, Error, LinkProperties,
    LinkStatus, LinkType, Persona, PersonaType, Result,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Routing role of this node.
enum NodeRole {
    Client(ClientState),
    Server(ServerState),
}

struct Inner {
    links: LinkManager,
    wizard: LinkWizard,
    role: NodeRole,
    use_link_wizard: bool,
    wizard_initialized: bool,
}

/// The network manager plugin façade.
///
/// The host may call in concurrently from several threads; all state sits
/// behind one mutex and every callback resolves to a [`PluginResponse`]
/// without unwinding.
pub struct NetworkManager {
    sdk: Arc<dyn NetworkManagerSdk>,
    kind: PersonaType,
    inner: Mutex<Option<Inner>>,
}

impl std::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("kind", &self.kind)
            .finish()
    }
}

impl NetworkManager {
    /// A client-role plugin.
    pub fn new_client(sdk: Arc<dyn NetworkManagerSdk>) -> Self {
        Self {
            sdk,
            kind: PersonaType::Client,
            inner: Mutex::new(None),
        }
    }

    /// A server-role plugin.
    pub fn new_server(sdk: Arc<dyn NetworkManagerSdk>) -> Self {
        Self {
            sdk,
            kind: PersonaType::Server,
            inner: Mutex::new(None),
        }
    }

    fn build_inner(&self) -> Result<Inner> {
        let sdk = self.sdk.as_ref();
        let (personas, race_persona) = config::load_personas(sdk)?;
        let profiles = config::load_link_profiles(sdk);

        match self.kind {
            PersonaType::Client | PersonaType::Registry => {
                let cfg = config::load_client_config(sdk)?;
                for uuid in cfg.entrance_committee.iter().chain(&cfg.exit_committee) {
                    if !personas.contains_key(uuid) {
                        return Err(Error::ConfigInvalid(format!(
                            "{} is not a valid persona to add to a committee",
                            uuid
                        )));
                    }
                }
                debug!(
                    "configured committees: entrance={} exit={}",
                    cfg.entrance_committee.len(),
                    cfg.exit_committee.len()
                );

                let mut links = LinkManager::new(race_persona.clone(), personas, true);
                links.set_config(cfg.expected_links, cfg.channel_roles, profiles);
                Ok(Inner {
                    links,
                    wizard: LinkWizard::new(race_persona.uuid, PersonaType::Client),
                    role: NodeRole::Client(ClientState::new(
                        cfg.entrance_committee,
                        cfg.exit_committee,
                        cfg.max_seen_messages
                            .unwrap_or(config::DEFAULT_MAX_SEEN_MESSAGES),
                    )),
                    use_link_wizard: cfg.use_link_wizard.unwrap_or(true),
                    wizard_initialized: false,
                })
            }
            PersonaType::Server => {
                let cfg = config::load_server_config(sdk)?;
                let mut links = LinkManager::new(race_persona.clone(), personas, false);
                links.set_config(cfg.expected_links, cfg.channel_roles, profiles);
                Ok(Inner {
                    links,
                    wizard: LinkWizard::new(race_persona.uuid, PersonaType::Server),
                    role: NodeRole::Server(ServerState::new(
                        cfg.committee_name,
                        cfg.exit_clients.into_iter().collect(),
                        cfg.committee_clients.into_iter().collect(),
                        cfg.reachable_committees,
                        cfg.rings,
                        cfg.flooding_factor
                            .unwrap_or(config::DEFAULT_FLOODING_FACTOR),
                        cfg.max_stale_uuids
                            .unwrap_or(config::DEFAULT_MAX_STALE_UUIDS),
                    )),
                    use_link_wizard: cfg.use_link_wizard.unwrap_or(true),
                    wizard_initialized: false,
                })
            }
        }
    }

    fn with_inner<F>(&self, f: F) -> PluginResponse
    where
        F: FnOnce(&mut Inner, &dyn NetworkManagerSdk) -> PluginResponse,
    {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!("plugin state mutex poisoned");
                return PluginResponse::Fatal;
            }
        };
        match guard.as_mut() {
            Some(inner) => f(inner, self.sdk.as_ref()),
            None => {
                error!("plugin callback before init");
                PluginResponse::Error
            }
        }
    }
}

/// Once genesis work has drained, top up dynamic links to every peer that
/// has fewer distinct send channels than its configured expectation.
fn maybe_init_wizard(inner: &mut Inner, sdk: &dyn NetworkManagerSdk) {
    if inner.wizard_initialized || inner.links.genesis_pending() {
        return;
    }
    inner.wizard_initialized = true;
    if !inner.use_link_wizard {
        info!("dynamic link negotiation disabled by config");
        return;
    }

    info!("invoking the link wizard");
    let race_uuid = inner.links.race_persona.uuid.clone();
    let peers: Vec<Persona> = inner
        .links
        .personas
        .values()
        .filter(|p| p.uuid != race_uuid)
        .cloned()
        .collect();

    for persona in peers {
        let mut existing_channels = HashSet::new();
        for link_id in inner.links.sorted_send_links(sdk, &persona) {
            if let Some(props) = sdk.get_link_properties(&link_id) {
                let _ = existing_channels.insert(props.channel_gid);
            }
        }
        let expected = inner
            .links
            .expected_links
            .get(&persona.uuid)
            .map(|channels| channels.len())
            .unwrap_or(0);

        for _ in existing_channels.len()..expected {
            if !inner
                .wizard
                .obtain_unicast_link(sdk, &inner.links, &persona, LinkType::Send)
            {
                // Peer unreachable for now; retry when a send connection to
                // it opens.
                inner.links.record_retry(&persona.uuid, LinkType::Send);
                break;
            }
        }
    }
}

impl NetworkManagerPlugin for NetworkManager {
    fn init(&self, plugin_config: &PluginConfig) -> PluginResponse {
        info!("init called");
        info!("etcDirectory: {:?}", plugin_config.etc_dir);
        info!("loggingDirectory: {:?}", plugin_config.logging_dir);
        info!("auxDataDirectory: {:?}", plugin_config.aux_data_dir);
        info!("tmpDirectory: {:?}", plugin_config.tmp_dir);
        info!("pluginDirectory: {:?}", plugin_config.plugin_dir);

        let mut inner = match self.build_inner() {
            Ok(inner) => inner,
            Err(err) => {
                error!("init failed: {}", err);
                return PluginResponse::Fatal;
            }
        };

        let note = match self.kind {
            PersonaType::Server => "network manager server plugin initialized\n",
            _ => "network manager client plugin initialized\n",
        };
        if let Err(err) = self.sdk.write_file("initialized.txt", note.as_bytes()) {
            warn!("could not write initialization marker: {}", err);
        }

        inner.links.activate_enabled_channels(self.sdk.as_ref());

        match self.inner.lock() {
            Ok(mut guard) => {
                *guard = Some(inner);
                info!("init returned");
                PluginResponse::Ok
            }
            Err(_) => PluginResponse::Fatal,
        }
    }

    fn shutdown(&self) -> PluginResponse {
        info!("shutdown called");
        self.with_inner(|inner, sdk| {
            // Receive side goes down first so no new packages arrive while
            // sends drain.
            inner.links.close_recv_connections(sdk);
            inner.links.close_send_connections(sdk);
            PluginResponse::Ok
        })
    }

    fn process_clr_msg(&self, handle: Handle, msg: &ClrMsg) -> PluginResponse {
        self.with_inner(|inner, sdk| match &mut inner.role {
            NodeRole::Client(state) => {
                match state.process_clr_msg(sdk, &inner.links, handle, msg) {
                    Ok(()) => PluginResponse::Ok,
                    Err(err) => {
                        error!("processClrMsg failed: {}", err);
                        PluginResponse::Error
                    }
                }
            }
            NodeRole::Server(_) => {
                error!("processClrMsg not callable for servers");
                PluginResponse::Error
            }
        })
    }

    fn process_enc_pkg(
        &self,
        _handle: Handle,
        pkg: &EncPkg,
        _conn_ids: &[ConnectionId],
    ) -> PluginResponse {
        self.with_inner(|inner, sdk| {
            debug!("processEncPkg: ciphertext len = {}", pkg.cipher_text.len());

            let plaintext = match crypto::open(&pkg.cipher_text, &inner.links.race_persona.aes_key)
            {
                Ok(plaintext) => plaintext,
                Err(Error::NotForMe) => {
                    debug!("unable to open package (not for me)");
                    return PluginResponse::Ok;
                }
                Err(err) => {
                    debug!("failed to open package: {}", err);
                    return PluginResponse::Ok;
                }
            };
            let text = match String::from_utf8(plaintext) {
                Ok(text) => text,
                Err(_) => {
                    error!("opened package is not valid UTF-8");
                    return PluginResponse::Ok;
                }
            };
            let mut msg = match parse_ext_msg(&text) {
                Ok(msg) => msg,
                Err(err) => {
                    error!("message failed to parse: {}", err);
                    return PluginResponse::Ok;
                }
            };
            msg.clr.trace_id = pkg.trace_id;
            msg.clr.span_id = pkg.span_id;

            match &mut inner.role {
                NodeRole::Client(state) => match msg.msg_type {
                    MsgType::Links => {
                        let sender = match inner.links.persona(&msg.clr.from) {
                            Some(persona) => persona.clone(),
                            None => {
                                error!("{} is not a valid persona", msg.clr.from);
                                return PluginResponse::Ok;
                            }
                        };
                        let _ = inner
                            .wizard
                            .process_link_msg(sdk, &inner.links, &sender, &msg.clr.msg);
                    }
                    MsgType::Client => state.receive_client_msg(sdk, &msg),
                    MsgType::Undef => error!("message has undefined message type"),
                },
                NodeRole::Server(state) => {
                    if msg.clr.to == inner.links.race_persona.uuid
                        && msg.msg_type == MsgType::Links
                    {
                        let sender = match inner.links.persona(&msg.clr.from) {
                            Some(persona) => persona.clone(),
                            None => {
                                error!("{} is not a valid persona", msg.clr.from);
                                return PluginResponse::Ok;
                            }
                        };
                        let _ = inner
                            .wizard
                            .process_link_msg(sdk, &inner.links, &sender, &msg.clr.msg);
                        return PluginResponse::Ok;
                    }
                    state.route(sdk, &inner.links, msg);
                }
            }
            PluginResponse::Ok
        })
    }

    fn on_package_status_changed(&self, handle: Handle, status: PackageStatus) -> PluginResponse {
        debug!("onPackageStatusChanged: handle={} status={:?}", handle, status);
        self.with_inner(|inner, sdk| {
            if let NodeRole::Client(state) = &mut inner.role {
                state.package_status_changed(sdk, handle, status);
            }
            PluginResponse::Ok
        })
    }

    fn on_connection_status_changed(
        &self,
        handle: Handle,
        conn_id: &str,
        status: ConnectionStatus,
        _link_id: &str,
        properties: &LinkProperties,
    ) -> PluginResponse {
        debug!(
            "onConnectionStatusChanged: handle={} conn_id={} status={:?}",
            handle, conn_id, status
        );
        self.with_inner(|inner, sdk| {
            let result = match status {
                ConnectionStatus::Open => {
                    match inner.links.handle_connection_opened(handle, conn_id, properties) {
                        Ok(Some((persona, link_type))) => {
                            let _ = inner.wizard.obtain_unicast_link(
                                sdk,
                                &inner.links,
                                &persona,
                                link_type,
                            );
                            PluginResponse::Ok
                        }
                        Ok(None) => PluginResponse::Ok,
                        Err(err) => {
                            error!("connection open handling failed: {}", err);
                            PluginResponse::Error
                        }
                    }
                }
                ConnectionStatus::Closed => {
                    match inner.links.handle_connection_closed(sdk, handle, conn_id) {
                        Ok(()) => PluginResponse::Ok,
                        Err(err) => {
                            error!("connection close handling failed: {}", err);
                            PluginResponse::Error
                        }
                    }
                }
                ConnectionStatus::Undef => PluginResponse::Ok,
            };

            // Every outstanding openConnection has resolved (possibly by a
            // close); report readiness to the host.
            if inner.links.opening_is_empty() {
                self.sdk.on_plugin_status_changed(PluginStatus::Ready);
                let _ = self
                    .sdk
                    .display_info_to_user("network manager is ready", UserDisplayType::Toast);
            }

            result
        })
    }

    fn on_link_status_changed(
        &self,
        handle: Handle,
        link_id: &str,
        status: LinkStatus,
        properties: &LinkProperties,
    ) -> PluginResponse {
        debug!(
            "onLinkStatusChanged: link={} status={:?}",
            link_id, status
        );
        self.with_inner(|inner, sdk| {
            let _ = inner.wizard.handle_link_status_update(
                sdk,
                &inner.links,
                handle,
                link_id,
                status,
                properties,
            );

            match status {
                LinkStatus::Created | LinkStatus::Loaded => {
                    inner.links.open_link_connections(sdk, link_id, properties);
                }
                LinkStatus::Destroyed => {}
                LinkStatus::Undef => warn!("onLinkStatusChanged: received invalid LinkStatus"),
            }

            inner.links.discard_genesis_handle(handle);
            maybe_init_wizard(inner, sdk);
            PluginResponse::Ok
        })
    }

    fn on_channel_status_changed(
        &self,
        handle: Handle,
        channel_gid: &str,
        status: ChannelStatus,
        _properties: &ChannelProperties,
    ) -> PluginResponse {
        debug!(
            "onChannelStatusChanged: channel={} status={:?}",
            channel_gid, status
        );
        self.with_inner(|inner, sdk| {
            if status == ChannelStatus::Available {
                inner.links.init_static_links(sdk, channel_gid);
                inner.links.channel_available(channel_gid);
            }
            inner
                .wizard
                .handle_channel_status_update(handle, channel_gid, status);
            maybe_init_wizard(inner, sdk);
            PluginResponse::Ok
        })
    }
}

#[cfg(test)]
impl NetworkManager {
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Option<Inner>> {
        self.inner.lock().expect("plugin state")
    }

    pub(crate) fn test_register_send_connection(
        &self,
        uuid: &str,
        conn_id: &str,
        properties: LinkProperties,
    ) {
        let mut guard = self.lock_inner();
        let inner = guard.as_mut().expect("init first");
        inner.links.register_send_connection(uuid, conn_id, properties);
    }

    pub(crate) fn test_obtain_unicast_link(&self, uuid: &str, link_type: LinkType) -> bool {
        let mut guard = self.lock_inner();
        let inner = guard.as_mut().expect("init first");
        let persona = inner.links.persona(uuid).cloned().expect("known persona");
        inner
            .wizard
            .obtain_unicast_link(self.sdk.as_ref(), &inner.links, &persona, link_type)
    }

    pub(crate) fn test_client_has_seen(&self, hash: &[u8; 32]) -> bool {
        let mut guard = self.lock_inner();
        match &mut guard.as_mut().expect("init first").role {
            NodeRole::Client(state) => state.has_seen(hash),
            NodeRole::Server(_) => panic!("not a client"),
        }
    }

    pub(crate) fn test_server_is_stale(&self, uuid: i64) -> bool {
        let mut guard = self.lock_inner();
        match &mut guard.as_mut().expect("init first").role {
            NodeRole::Server(state) => state.is_stale(uuid),
            NodeRole::Client(_) => panic!("not a server"),
        }
    }
}
