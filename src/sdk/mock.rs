// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! In-memory host SDK used by the unit and scenario tests.
//!
//! Scripted lookups (channels, links, files) are loaded up front; every
//! mutating call is captured so tests can assert on it or ferry sealed
//! packages between plugin instances.

use super::{
    CommsSdk, Handle, MessageStatus, NetworkManagerSdk, PackageStatus, PluginStatus, SdkResponse,
    SdkStatus, Timeout, UserDisplayType,
};
use crate::messaging::{ClrMsg, EncPkg};
use crate::types::{
    ChannelProperties, ChannelStatus, ConnectionId, ConnectionStatus, Error, LinkId,
    LinkProperties, LinkStatus, LinkType, Result,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// One captured `sendEncryptedPackage` call.
#[derive(Clone, Debug)]
pub(crate) struct SentPackage {
    pub handle: Handle,
    pub conn_id: ConnectionId,
    pub pkg: EncPkg,
}

/// One captured `createLink` call.
#[derive(Clone, Debug)]
pub(crate) struct CreateLinkCall {
    pub handle: Handle,
    pub channel_gid: String,
    pub personas: Vec<String>,
}

/// One captured `loadLinkAddress` call.
#[derive(Clone, Debug)]
pub(crate) struct LoadAddressCall {
    pub handle: Handle,
    pub channel_gid: String,
    pub address: String,
    pub personas: Vec<String>,
}

/// One captured `openConnection` call.
#[derive(Clone, Debug)]
pub(crate) struct OpenConnectionCall {
    pub handle: Handle,
    pub link_type: LinkType,
    pub link_id: LinkId,
    pub hints: String,
}

#[derive(Default)]
pub(crate) struct MockState {
    next_handle: Handle,
    next_link_id: u64,
    next_conn_id: u64,

    // Scripted lookups.
    pub channels: HashMap<String, ChannelProperties>,
    pub link_properties: HashMap<LinkId, LinkProperties>,
    pub personas_for_link: HashMap<LinkId, Vec<String>>,
    pub link_for_connection: HashMap<ConnectionId, LinkId>,
    pub files: HashMap<String, Vec<u8>>,

    // Captured network-manager-side calls.
    pub sent_packages: Vec<SentPackage>,
    pub presented: Vec<ClrMsg>,
    pub message_statuses: Vec<(Handle, MessageStatus)>,
    pub plugin_statuses: Vec<PluginStatus>,
    pub activated_channels: Vec<(String, String)>,
    pub created_links: Vec<CreateLinkCall>,
    pub created_from_address: Vec<LoadAddressCall>,
    pub loaded_addresses: Vec<LoadAddressCall>,
    pub opened_connections: Vec<OpenConnectionCall>,
    pub closed_connections: Vec<ConnectionId>,
    pub destroyed_links: Vec<LinkId>,

    // Captured comms-side calls.
    pub received_pkgs: Vec<(EncPkg, Vec<ConnectionId>)>,
    pub package_statuses: Vec<(Handle, PackageStatus)>,
    pub connection_events: Vec<(Handle, ConnectionId, ConnectionStatus)>,
    pub link_events: Vec<(Handle, LinkId, LinkStatus, LinkProperties)>,
    pub channel_events: Vec<(Handle, String, ChannelStatus)>,
    pub user_input_requests: Vec<(Handle, String)>,
    pub displayed: Vec<String>,
}

pub(crate) struct MockSdk {
    active_persona: String,
    pub state: Mutex<MockState>,
}

impl MockSdk {
    pub fn new(active_persona: &str) -> Self {
        Self {
            active_persona: active_persona.to_string(),
            state: Mutex::new(MockState {
                next_handle: 1,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock sdk poisoned")
    }

    fn next_handle(state: &mut MockState) -> Handle {
        let handle = state.next_handle;
        state.next_handle += 1;
        handle
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        let _ = self.lock().files.insert(path.to_string(), data.to_vec());
    }

    pub fn add_channel(&self, props: ChannelProperties) {
        let _ = self.lock().channels.insert(props.channel_gid.clone(), props);
    }

    /// Registers a link with its properties and addressed personas.
    pub fn add_link(&self, link_id: &str, props: LinkProperties, personas: &[&str]) {
        let mut state = self.lock();
        let _ = state
            .link_properties
            .insert(link_id.to_string(), props);
        let _ = state.personas_for_link.insert(
            link_id.to_string(),
            personas.iter().map(|p| p.to_string()).collect(),
        );
    }

    /// Drains the packages captured from `sendEncryptedPackage`, e.g. to
    /// ferry them to another plugin instance in a scenario test.
    pub fn take_sent_packages(&self) -> Vec<SentPackage> {
        std::mem::take(&mut self.lock().sent_packages)
    }

    pub fn take_presented(&self) -> Vec<ClrMsg> {
        std::mem::take(&mut self.lock().presented)
    }
}

impl NetworkManagerSdk for MockSdk {
    fn get_active_persona(&self) -> String {
        self.active_persona.clone()
    }

    fn get_entropy(&self, n: usize) -> Vec<u8> {
        vec![7u8; n]
    }

    fn get_supported_channels(&self) -> HashMap<String, ChannelProperties> {
        self.lock().channels.clone()
    }

    fn get_all_channel_properties(&self) -> Vec<ChannelProperties> {
        let mut channels: Vec<_> = self.lock().channels.values().cloned().collect();
        channels.sort_by(|a, b| a.channel_gid.cmp(&b.channel_gid));
        channels
    }

    fn get_channel_properties(&self, channel_gid: &str) -> Option<ChannelProperties> {
        self.lock().channels.get(channel_gid).cloned()
    }

    fn get_link_properties(&self, link_id: &str) -> Option<LinkProperties> {
        self.lock().link_properties.get(link_id).cloned()
    }

    fn get_links_for_channel(&self, channel_gid: &str) -> Vec<LinkId> {
        let state = self.lock();
        let mut links: Vec<_> = state
            .link_properties
            .iter()
            .filter(|(_, props)| props.channel_gid == channel_gid)
            .map(|(id, _)| id.clone())
            .collect();
        links.sort();
        links
    }

    fn get_links_for_personas(&self, uuids: &[String], link_type: LinkType) -> Vec<LinkId> {
        let state = self.lock();
        let mut links: Vec<_> = state
            .personas_for_link
            .iter()
            .filter(|(_, personas)| uuids.iter().all(|uuid| personas.contains(uuid)))
            .filter(|(link_id, _)| {
                let props = match state.link_properties.get(*link_id) {
                    Some(props) => props,
                    None => return false,
                };
                match link_type {
                    LinkType::Send => props.link_type.sends(),
                    LinkType::Recv => props.link_type.receives(),
                    LinkType::Bidi => props.link_type == LinkType::Bidi,
                    LinkType::Undef => true,
                }
            })
            .map(|(link_id, _)| link_id.clone())
            .collect();
        links.sort();
        links
    }

    fn get_personas_for_link(&self, link_id: &str) -> Vec<String> {
        self.lock()
            .personas_for_link
            .get(link_id)
            .cloned()
            .unwrap_or_default()
    }

    fn get_link_for_connection(&self, conn_id: &str) -> Option<LinkId> {
        self.lock().link_for_connection.get(conn_id).cloned()
    }

    fn activate_channel(
        &self,
        channel_gid: &str,
        role_name: &str,
        _timeout: Timeout,
    ) -> SdkResponse {
        let mut state = self.lock();
        state
            .activated_channels
            .push((channel_gid.to_string(), role_name.to_string()));
        let handle = Self::next_handle(&mut state);
        SdkResponse::ok(handle)
    }

    fn deactivate_channel(&self, _channel_gid: &str, _timeout: Timeout) -> SdkResponse {
        let mut state = self.lock();
        let handle = Self::next_handle(&mut state);
        SdkResponse::ok(handle)
    }

    fn create_link(&self, channel_gid: &str, personas: &[String], _timeout: Timeout) -> SdkResponse {
        let mut state = self.lock();
        let handle = Self::next_handle(&mut state);
        state.created_links.push(CreateLinkCall {
            handle,
            channel_gid: channel_gid.to_string(),
            personas: personas.to_vec(),
        });
        SdkResponse::ok(handle)
    }

    fn create_link_from_address(
        &self,
        channel_gid: &str,
        address: &str,
        personas: &[String],
        _timeout: Timeout,
    ) -> SdkResponse {
        let mut state = self.lock();
        let handle = Self::next_handle(&mut state);
        state.created_from_address.push(LoadAddressCall {
            handle,
            channel_gid: channel_gid.to_string(),
            address: address.to_string(),
            personas: personas.to_vec(),
        });
        SdkResponse::ok(handle)
    }

    fn load_link_address(
        &self,
        channel_gid: &str,
        address: &str,
        personas: &[String],
        _timeout: Timeout,
    ) -> SdkResponse {
        let mut state = self.lock();
        let handle = Self::next_handle(&mut state);
        state.loaded_addresses.push(LoadAddressCall {
            handle,
            channel_gid: channel_gid.to_string(),
            address: address.to_string(),
            personas: personas.to_vec(),
        });
        SdkResponse::ok(handle)
    }

    fn load_link_addresses(
        &self,
        _channel_gid: &str,
        _addresses: &[String],
        _personas: &[String],
        _timeout: Timeout,
    ) -> SdkResponse {
        SdkResponse::refused(SdkStatus::InvalidArgument)
    }

    fn destroy_link(&self, link_id: &str, _timeout: Timeout) -> SdkResponse {
        let mut state = self.lock();
        state.destroyed_links.push(link_id.to_string());
        let handle = Self::next_handle(&mut state);
        SdkResponse::ok(handle)
    }

    fn open_connection(
        &self,
        link_type: LinkType,
        link_id: &str,
        link_hints: &str,
        _priority: i32,
        _timeout: Timeout,
        _blocking: bool,
    ) -> SdkResponse {
        let mut state = self.lock();
        let handle = Self::next_handle(&mut state);
        state.opened_connections.push(OpenConnectionCall {
            handle,
            link_type,
            link_id: link_id.to_string(),
            hints: link_hints.to_string(),
        });
        SdkResponse::ok(handle)
    }

    fn close_connection(&self, conn_id: &str, _timeout: Timeout) -> SdkResponse {
        let mut state = self.lock();
        state.closed_connections.push(conn_id.to_string());
        let handle = Self::next_handle(&mut state);
        SdkResponse::ok(handle)
    }

    fn send_encrypted_package(
        &self,
        pkg: EncPkg,
        conn_id: &str,
        _batch_id: u64,
        _timeout: Timeout,
    ) -> SdkResponse {
        let mut state = self.lock();
        let handle = Self::next_handle(&mut state);
        state.sent_packages.push(SentPackage {
            handle,
            conn_id: conn_id.to_string(),
            pkg,
        });
        SdkResponse::ok(handle)
    }

    fn on_message_status_changed(&self, handle: Handle, status: MessageStatus) -> SdkResponse {
        self.lock().message_statuses.push((handle, status));
        SdkResponse::ok(NULL_OK)
    }

    fn on_plugin_status_changed(&self, status: PluginStatus) {
        self.lock().plugin_statuses.push(status);
    }

    fn present_cleartext_message(&self, msg: ClrMsg) -> SdkResponse {
        self.lock().presented.push(msg);
        SdkResponse::ok(NULL_OK)
    }

    fn display_info_to_user(&self, message: &str, _display_type: UserDisplayType) -> SdkResponse {
        self.lock().displayed.push(message.to_string());
        SdkResponse::ok(NULL_OK)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::ConfigInvalid(format!("no such file: {}", path)))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let _ = self.lock().files.insert(path.to_string(), data.to_vec());
        Ok(())
    }
}

// Handle used for fire-and-forget acknowledgements.
const NULL_OK: Handle = 0;

impl CommsSdk for MockSdk {
    fn get_active_persona(&self) -> String {
        self.active_persona.clone()
    }

    fn get_channel_properties(&self, channel_gid: &str) -> Option<ChannelProperties> {
        self.lock().channels.get(channel_gid).cloned()
    }

    fn generate_link_id(&self, channel_gid: &str) -> Option<LinkId> {
        let mut state = self.lock();
        state.next_link_id += 1;
        Some(format!("{}/LinkID_{}", channel_gid, state.next_link_id))
    }

    fn generate_connection_id(&self, link_id: &str) -> ConnectionId {
        let mut state = self.lock();
        state.next_conn_id += 1;
        format!("{}/ConnID_{}", link_id, state.next_conn_id)
    }

    fn receive_enc_pkg(
        &self,
        pkg: EncPkg,
        conn_ids: &[ConnectionId],
        _blocking: bool,
    ) -> SdkResponse {
        self.lock().received_pkgs.push((pkg, conn_ids.to_vec()));
        SdkResponse::ok(NULL_OK)
    }

    fn on_package_status_changed(
        &self,
        handle: Handle,
        status: PackageStatus,
        _blocking: bool,
    ) -> SdkResponse {
        self.lock().package_statuses.push((handle, status));
        SdkResponse::ok(NULL_OK)
    }

    fn on_connection_status_changed(
        &self,
        handle: Handle,
        conn_id: &str,
        status: ConnectionStatus,
        _properties: &LinkProperties,
        _blocking: bool,
    ) -> SdkResponse {
        self.lock()
            .connection_events
            .push((handle, conn_id.to_string(), status));
        SdkResponse::ok(NULL_OK)
    }

    fn on_link_status_changed(
        &self,
        handle: Handle,
        link_id: &str,
        status: LinkStatus,
        properties: &LinkProperties,
        _blocking: bool,
    ) -> SdkResponse {
        self.lock()
            .link_events
            .push((handle, link_id.to_string(), status, properties.clone()));
        SdkResponse::ok(NULL_OK)
    }

    fn on_channel_status_changed(
        &self,
        handle: Handle,
        channel_gid: &str,
        status: ChannelStatus,
        _properties: &ChannelProperties,
        _blocking: bool,
    ) -> SdkResponse {
        self.lock()
            .channel_events
            .push((handle, channel_gid.to_string(), status));
        SdkResponse::ok(NULL_OK)
    }

    fn update_link_properties(
        &self,
        link_id: &str,
        properties: &LinkProperties,
        _blocking: bool,
    ) -> SdkResponse {
        let _ = self
            .lock()
            .link_properties
            .insert(link_id.to_string(), properties.clone());
        SdkResponse::ok(NULL_OK)
    }

    fn request_plugin_user_input(&self, key: &str, _prompt: &str, _required: bool) -> SdkResponse {
        let mut state = self.lock();
        let handle = Self::next_handle(&mut state);
        state.user_input_requests.push((handle, key.to_string()));
        SdkResponse::ok(handle)
    }

    fn request_common_user_input(&self, key: &str) -> SdkResponse {
        let mut state = self.lock();
        let handle = Self::next_handle(&mut state);
        state.user_input_requests.push((handle, key.to_string()));
        SdkResponse::ok(handle)
    }

    fn display_info_to_user(&self, message: &str, _display_type: UserDisplayType) -> SdkResponse {
        self.lock().displayed.push(message.to_string());
        SdkResponse::ok(NULL_OK)
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        NetworkManagerSdk::read_file(self, path)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        NetworkManagerSdk::write_file(self, path, data)
    }
}
