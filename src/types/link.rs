// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::channel::{ConnectionType, SendType, TransmissionType};
use serde::{Deserialize, Serialize};

/// Identifier of a link, generated by the host.
pub type LinkId = String;

/// Identifier of a connection opened on a link, generated by the host.
pub type ConnectionId = String;

/// Transfer direction of a link or connection from this node's viewpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    /// Unknown.
    #[serde(rename = "LT_UNDEF")]
    Undef,
    /// This node sends.
    #[serde(rename = "LT_SEND")]
    Send,
    /// This node receives.
    #[serde(rename = "LT_RECV")]
    Recv,
    /// Both directions.
    #[serde(rename = "LT_BIDI")]
    Bidi,
}

impl Default for LinkType {
    fn default() -> Self {
        LinkType::Undef
    }
}

impl LinkType {
    /// Whether a connection of this type delivers inbound packages.
    pub fn receives(self) -> bool {
        matches!(self, LinkType::Recv | LinkType::Bidi)
    }

    /// Whether a connection of this type accepts outbound packages.
    pub fn sends(self) -> bool {
        matches!(self, LinkType::Send | LinkType::Bidi)
    }
}

/// Lifecycle state of a link as reported to the network manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LinkStatus {
    /// Unknown.
    Undef,
    /// Created locally; the address can now be shared.
    Created,
    /// Loaded from an address created elsewhere.
    Loaded,
    /// Destroyed; also the failure reply for refused create/load calls.
    Destroyed,
}

/// Lifecycle state of a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Unknown.
    Undef,
    /// Open and transferring.
    Open,
    /// Closed; no further packages will be delivered.
    Closed,
}

/// One direction's performance figures. Negative values mean "unknown".
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkPropertySet {
    /// Throughput in bits per second.
    pub bandwidth_bps: i64,
    /// One-way latency in milliseconds.
    pub latency_ms: i64,
    /// Expected loss fraction.
    pub loss: f32,
}

impl Default for LinkPropertySet {
    fn default() -> Self {
        Self {
            bandwidth_bps: -1,
            latency_ms: -1,
            loss: -1.0,
        }
    }
}

/// Send and receive figures for one quality level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkPropertyPair {
    /// Sending from this node.
    pub send: LinkPropertySet,
    /// Receiving at this node.
    pub receive: LinkPropertySet,
}

/// Properties of a concrete link, as shared between the comms plugin and the
/// network manager.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkProperties {
    /// Send/recv/bidi from this node's viewpoint.
    pub link_type: LinkType,
    /// Unicast or multicast.
    pub transmission_type: TransmissionType,
    /// Direct or indirect.
    pub connection_type: ConnectionType,
    /// Stored or ephemeral sends.
    pub send_type: SendType,
    /// Whether delivery is acknowledged by the transport.
    pub reliable: bool,
    /// Whether in-flight packages can be flushed.
    pub is_flushable: bool,
    /// Channel this link belongs to.
    pub channel_gid: String,
    /// Channel-specific opaque address, typically JSON.
    pub link_address: String,
    /// Hint keys openConnection honours for this link.
    pub supported_hints: Vec<String>,
    /// Expected performance.
    pub expected: LinkPropertyPair,
    /// Pessimistic performance bound.
    pub worst: LinkPropertyPair,
    /// Optimistic performance bound.
    pub best: LinkPropertyPair,
    /// Lifetime of the link in seconds, -1 if unbounded.
    pub duration_s: i64,
    /// Interval before the link may be reused, -1 if not applicable.
    pub period_s: i64,
    /// Maximum transfer unit in bytes, -1 if unbounded.
    pub mtu: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_sets_default_to_unknown() {
        let set = LinkPropertySet::default();
        assert_eq!(set.bandwidth_bps, -1);
        assert_eq!(set.latency_ms, -1);
        assert!(set.loss < 0.0);
    }

    #[test]
    fn link_type_directionality() {
        assert!(LinkType::Bidi.sends() && LinkType::Bidi.receives());
        assert!(LinkType::Send.sends() && !LinkType::Send.receives());
        assert!(!LinkType::Recv.sends() && LinkType::Recv.receives());
        assert!(!LinkType::Undef.sends() && !LinkType::Undef.receives());
    }
}
