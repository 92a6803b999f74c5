// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Contract between the plugins and the opaque host runtime.
//!
//! The host hands each plugin an implementation of its SDK capability trait
//! ([`NetworkManagerSdk`] / [`CommsSdk`]); the plugin in turn implements its
//! callback trait ([`NetworkManagerPlugin`] / [`CommsPlugin`]). The host may
//! call into a plugin from several threads at once, so every plugin presents
//! a single thread-safe façade.

#[cfg(test)]
pub(crate) mod mock;

use crate::messaging::{ClrMsg, EncPkg};
use crate::types::{
    ChannelProperties, ChannelStatus, ConnectionId, ConnectionStatus, LinkId, LinkProperties,
    LinkStatus, LinkType, Result,
};
use std::collections::HashMap;
use std::path::PathBuf;

/// Opaque correlation handle for asynchronous host calls.
///
/// Monotonic in practice but never assumed unique across plugin lifetimes;
/// only ever used as a map key.
pub type Handle = u64;

/// The absent handle.
pub const NULL_HANDLE: Handle = 0;

/// Timeout of a host call, in milliseconds.
pub type Timeout = i64;

/// Wait for the eventual status callback, however long that takes.
pub const UNLIMITED_TIMEOUT: Timeout = i64::MAX;

/// Outcome of a host SDK call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SdkStatus {
    /// Call accepted; an eventual status callback will carry `handle`.
    Ok,
    /// Call refused due to a malformed argument.
    InvalidArgument,
    /// Call refused because the send queue is saturated.
    QueueFull,
    /// Call refused because the counterpart plugin is absent.
    PluginMissing,
    /// Call refused during teardown.
    ShuttingDown,
}

/// Response of every fallible host SDK call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SdkResponse {
    /// Whether the call was accepted.
    pub status: SdkStatus,
    /// Correlation handle for the eventual status callback.
    pub handle: Handle,
    /// Fill level of the relevant queue, 0.0..=1.0.
    pub queue_utilization: f64,
}

impl SdkResponse {
    /// An accepted call correlated by `handle`.
    pub fn ok(handle: Handle) -> Self {
        Self {
            status: SdkStatus::Ok,
            handle,
            queue_utilization: 0.0,
        }
    }

    /// A refused call.
    pub fn refused(status: SdkStatus) -> Self {
        Self {
            status,
            handle: NULL_HANDLE,
            queue_utilization: 0.0,
        }
    }

    /// Whether the call was accepted.
    pub fn is_ok(&self) -> bool {
        self.status == SdkStatus::Ok
    }
}

/// Return value of every plugin callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PluginResponse {
    /// Callback handled.
    Ok,
    /// Callback failed; the plugin remains usable.
    Error,
    /// Unrecoverable state corruption; the host may tear the plugin down.
    Fatal,
}

/// Readiness of a plugin as reported to the host.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PluginStatus {
    /// Still initialising.
    NotReady,
    /// All genesis connections are up.
    Ready,
}

/// Delivery state of one sealed package.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PackageStatus {
    /// No status received yet.
    Invalid,
    /// Handed to the transport successfully.
    Sent,
    /// Receipt confirmed by the transport.
    Received,
    /// Transport failed.
    FailedGeneric,
    /// Network-level failure.
    FailedNetworkError,
    /// Timed out in a queue.
    FailedTimeout,
}

impl PackageStatus {
    /// Whether this status is terminal-failed.
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            PackageStatus::FailedGeneric
                | PackageStatus::FailedNetworkError
                | PackageStatus::FailedTimeout
        )
    }
}

/// Aggregated delivery state of one cleartext message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageStatus {
    /// Still undetermined.
    Undef,
    /// At least one sealed copy was sent.
    Sent,
    /// Every sealed copy failed.
    Failed,
}

/// How `displayInfoToUser` output is rendered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum UserDisplayType {
    /// Transient notification.
    Toast,
    /// Modal dialog.
    Dialog,
    /// QR code rendering of the message.
    QrCode,
}

/// Paths the host provisions for a plugin instance.
#[derive(Clone, Debug, Default)]
pub struct PluginConfig {
    /// Static configuration files.
    pub etc_dir: PathBuf,
    /// Where the plugin may write logs.
    pub logging_dir: PathBuf,
    /// Auxiliary read-only data.
    pub aux_data_dir: PathBuf,
    /// Scratch space.
    pub tmp_dir: PathBuf,
    /// The plugin's own install directory.
    pub plugin_dir: PathBuf,
}

/// Capabilities the host provides to the network manager plugin.
///
/// The host may be called from any thread; implementations are shared as
/// `Arc<dyn NetworkManagerSdk>`.
pub trait NetworkManagerSdk: Send + Sync {
    /// Uuid of the persona this node runs as.
    fn get_active_persona(&self) -> String;
    /// `n` bytes of host entropy.
    fn get_entropy(&self, n: usize) -> Vec<u8>;
    /// Channels this node's comms plugins support, keyed by gid.
    fn get_supported_channels(&self) -> HashMap<String, ChannelProperties>;
    /// Properties of every known channel, supported or not.
    fn get_all_channel_properties(&self) -> Vec<ChannelProperties>;
    /// Properties of one channel.
    fn get_channel_properties(&self, channel_gid: &str) -> Option<ChannelProperties>;
    /// Properties of one link.
    fn get_link_properties(&self, link_id: &str) -> Option<LinkProperties>;
    /// Links currently existing on a channel.
    fn get_links_for_channel(&self, channel_gid: &str) -> Vec<LinkId>;
    /// Links of `link_type` addressing all of `uuids`.
    fn get_links_for_personas(&self, uuids: &[String], link_type: LinkType) -> Vec<LinkId>;
    /// Personas addressed by a link.
    fn get_personas_for_link(&self, link_id: &str) -> Vec<String>;
    /// The link a connection is open on.
    fn get_link_for_connection(&self, conn_id: &str) -> Option<LinkId>;

    /// Activates a channel under the given role.
    fn activate_channel(&self, channel_gid: &str, role_name: &str, timeout: Timeout)
        -> SdkResponse;
    /// Deactivates a channel, destroying its links.
    fn deactivate_channel(&self, channel_gid: &str, timeout: Timeout) -> SdkResponse;
    /// Asks the channel to create a link addressing `personas`.
    fn create_link(&self, channel_gid: &str, personas: &[String], timeout: Timeout) -> SdkResponse;
    /// Creates a link from a known address (genesis links).
    fn create_link_from_address(
        &self,
        channel_gid: &str,
        address: &str,
        personas: &[String],
        timeout: Timeout,
    ) -> SdkResponse;
    /// Loads a link address created by a peer.
    fn load_link_address(
        &self,
        channel_gid: &str,
        address: &str,
        personas: &[String],
        timeout: Timeout,
    ) -> SdkResponse;
    /// Loads several addresses as one link (multi-addressable channels only).
    fn load_link_addresses(
        &self,
        channel_gid: &str,
        addresses: &[String],
        personas: &[String],
        timeout: Timeout,
    ) -> SdkResponse;
    /// Destroys a link and closes its connections.
    fn destroy_link(&self, link_id: &str, timeout: Timeout) -> SdkResponse;

    /// Opens a connection on a link.
    #[allow(clippy::too_many_arguments)]
    fn open_connection(
        &self,
        link_type: LinkType,
        link_id: &str,
        link_hints: &str,
        priority: i32,
        timeout: Timeout,
        blocking: bool,
    ) -> SdkResponse;
    /// Closes a connection.
    fn close_connection(&self, conn_id: &str, timeout: Timeout) -> SdkResponse;
    /// Queues a sealed package on a send connection.
    fn send_encrypted_package(
        &self,
        pkg: EncPkg,
        conn_id: &str,
        batch_id: u64,
        timeout: Timeout,
    ) -> SdkResponse;

    /// Reports the aggregated status of a cleartext message.
    fn on_message_status_changed(&self, handle: Handle, status: MessageStatus) -> SdkResponse;
    /// Reports plugin readiness.
    fn on_plugin_status_changed(&self, status: PluginStatus);
    /// Delivers received cleartext up to the application.
    fn present_cleartext_message(&self, msg: ClrMsg) -> SdkResponse;
    /// Shows a notification to the node's user.
    fn display_info_to_user(&self, message: &str, display_type: UserDisplayType) -> SdkResponse;

    /// Reads a file from the plugin's provisioned storage.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    /// Writes a file into the plugin's provisioned storage.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// Capabilities the host provides to the comms plugin.
pub trait CommsSdk: Send + Sync {
    /// Uuid of the persona this node runs as.
    fn get_active_persona(&self) -> String;
    /// Properties of one channel.
    fn get_channel_properties(&self, channel_gid: &str) -> Option<ChannelProperties>;
    /// Mints a fresh link id scoped to a channel.
    fn generate_link_id(&self, channel_gid: &str) -> Option<LinkId>;
    /// Mints a fresh connection id scoped to a link.
    fn generate_connection_id(&self, link_id: &str) -> ConnectionId;

    /// Delivers a received package to the network manager.
    fn receive_enc_pkg(&self, pkg: EncPkg, conn_ids: &[ConnectionId], blocking: bool)
        -> SdkResponse;
    /// Reports the transport outcome of a previous sendPackage.
    fn on_package_status_changed(
        &self,
        handle: Handle,
        status: PackageStatus,
        blocking: bool,
    ) -> SdkResponse;
    /// Reports a connection lifecycle change.
    fn on_connection_status_changed(
        &self,
        handle: Handle,
        conn_id: &str,
        status: ConnectionStatus,
        properties: &LinkProperties,
        blocking: bool,
    ) -> SdkResponse;
    /// Reports a link lifecycle change.
    fn on_link_status_changed(
        &self,
        handle: Handle,
        link_id: &str,
        status: LinkStatus,
        properties: &LinkProperties,
        blocking: bool,
    ) -> SdkResponse;
    /// Reports a channel lifecycle change.
    fn on_channel_status_changed(
        &self,
        handle: Handle,
        channel_gid: &str,
        status: ChannelStatus,
        properties: &ChannelProperties,
        blocking: bool,
    ) -> SdkResponse;
    /// Publishes updated link properties.
    fn update_link_properties(
        &self,
        link_id: &str,
        properties: &LinkProperties,
        blocking: bool,
    ) -> SdkResponse;

    /// Prompts the node's user for a plugin-specific value.
    fn request_plugin_user_input(&self, key: &str, prompt: &str, required: bool) -> SdkResponse;
    /// Prompts the node's user for a value shared across plugins.
    fn request_common_user_input(&self, key: &str) -> SdkResponse;
    /// Shows a notification to the node's user.
    fn display_info_to_user(&self, message: &str, display_type: UserDisplayType) -> SdkResponse;

    /// Reads a file from the plugin's provisioned storage.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    /// Writes a file into the plugin's provisioned storage.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// Callbacks a network manager plugin implements for the host.
pub trait NetworkManagerPlugin {
    /// One-time initialisation with the provisioned paths.
    fn init(&self, config: &PluginConfig) -> PluginResponse;
    /// Orderly teardown; receive connections close before sends.
    fn shutdown(&self) -> PluginResponse;
    /// A cleartext message from the application, to be routed.
    fn process_clr_msg(&self, handle: Handle, msg: &ClrMsg) -> PluginResponse;
    /// A sealed package delivered by the comms layer.
    fn process_enc_pkg(
        &self,
        handle: Handle,
        pkg: &EncPkg,
        conn_ids: &[ConnectionId],
    ) -> PluginResponse;
    /// Transport outcome of a previously sent package.
    fn on_package_status_changed(&self, handle: Handle, status: PackageStatus) -> PluginResponse;
    /// A connection opened or closed.
    fn on_connection_status_changed(
        &self,
        handle: Handle,
        conn_id: &str,
        status: ConnectionStatus,
        link_id: &str,
        properties: &LinkProperties,
    ) -> PluginResponse;
    /// A link was created, loaded or destroyed.
    fn on_link_status_changed(
        &self,
        handle: Handle,
        link_id: &str,
        status: LinkStatus,
        properties: &LinkProperties,
    ) -> PluginResponse;
    /// A channel changed lifecycle state.
    fn on_channel_status_changed(
        &self,
        handle: Handle,
        channel_gid: &str,
        status: ChannelStatus,
        properties: &ChannelProperties,
    ) -> PluginResponse;

    /// Link properties were republished.
    fn on_link_properties_changed(
        &self,
        _link_id: &str,
        _properties: &LinkProperties,
    ) -> PluginResponse {
        PluginResponse::Ok
    }
    /// The links addressing a persona changed.
    fn on_persona_links_changed(
        &self,
        _persona: &str,
        _link_type: LinkType,
        _links: &[LinkId],
    ) -> PluginResponse {
        PluginResponse::Ok
    }
    /// A user input prompt was answered or declined.
    fn on_user_input_received(
        &self,
        _handle: Handle,
        _answered: bool,
        _response: &str,
    ) -> PluginResponse {
        PluginResponse::Ok
    }
    /// The user acknowledged displayed information.
    fn on_user_acknowledgement_received(&self, _handle: Handle) -> PluginResponse {
        PluginResponse::Ok
    }
    /// Epoch changeover notification.
    fn notify_epoch(&self, _data: &str) -> PluginResponse {
        PluginResponse::Ok
    }
    /// A node is about to be bootstrapped through us.
    fn prepare_to_bootstrap(
        &self,
        _handle: Handle,
        _link_id: &str,
        _config_path: &str,
        _device_info: &str,
    ) -> PluginResponse {
        PluginResponse::Ok
    }
    /// Key material arrived for a bootstrapping node.
    fn on_bootstrap_key_received(&self, _persona: &str, _key: &[u8]) -> PluginResponse {
        PluginResponse::Ok
    }
}

/// Callbacks a comms plugin implements for the host.
pub trait CommsPlugin {
    /// One-time initialisation with the provisioned paths.
    fn init(&self, config: &PluginConfig) -> PluginResponse;
    /// Orderly teardown of every connection.
    fn shutdown(&self) -> PluginResponse;
    /// Transmits a sealed package on a connection.
    fn send_package(
        &self,
        handle: Handle,
        conn_id: &str,
        pkg: &EncPkg,
        timeout_timestamp: f64,
        batch_id: u64,
    ) -> PluginResponse;
    /// Opens a connection on a link.
    fn open_connection(
        &self,
        handle: Handle,
        link_type: LinkType,
        link_id: &str,
        link_hints: &str,
        send_timeout: Timeout,
    ) -> PluginResponse;
    /// Closes a connection.
    fn close_connection(&self, handle: Handle, conn_id: &str) -> PluginResponse;
    /// Creates a fresh link on a channel.
    fn create_link(&self, handle: Handle, channel_gid: &str) -> PluginResponse;
    /// Creates a link from a known address.
    fn create_link_from_address(
        &self,
        handle: Handle,
        channel_gid: &str,
        link_address: &str,
    ) -> PluginResponse;
    /// Loads a link address created by a peer.
    fn load_link_address(
        &self,
        handle: Handle,
        channel_gid: &str,
        link_address: &str,
    ) -> PluginResponse;
    /// Loads several addresses as one link.
    fn load_link_addresses(
        &self,
        handle: Handle,
        channel_gid: &str,
        link_addresses: &[String],
    ) -> PluginResponse;
    /// Destroys a link.
    fn destroy_link(&self, handle: Handle, link_id: &str) -> PluginResponse;
    /// Activates a channel under a role.
    fn activate_channel(&self, handle: Handle, channel_gid: &str, role_name: &str)
        -> PluginResponse;
    /// Deactivates a channel.
    fn deactivate_channel(&self, handle: Handle, channel_gid: &str) -> PluginResponse;
    /// Flushes queued packages of a channel.
    fn flush_channel(&self, handle: Handle, channel_gid: &str, batch_id: u64) -> PluginResponse;
    /// A user input prompt was answered or declined.
    fn on_user_input_received(
        &self,
        handle: Handle,
        answered: bool,
        response: &str,
    ) -> PluginResponse;
    /// The user acknowledged displayed information.
    fn on_user_acknowledgement_received(&self, _handle: Handle) -> PluginResponse {
        PluginResponse::Ok
    }
}
