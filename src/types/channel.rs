// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::link::LinkPropertyPair;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How transfers on a channel reach the peer.
///
/// The serialised tags match the channel-list files consumed by the config
/// generator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Not yet determined. Sorts last in every ranking.
    #[serde(rename = "CT_UNDEF")]
    Undef,
    /// Peer-to-peer socket; observable as a direct flow.
    #[serde(rename = "CT_DIRECT")]
    Direct,
    /// Via a third-party service such as a whiteboard.
    #[serde(rename = "CT_INDIRECT")]
    Indirect,
    /// Mixture of direct and indirect hops.
    #[serde(rename = "CT_MIXED")]
    Mixed,
    /// Local-only transport used for bootstrapping.
    #[serde(rename = "CT_LOCAL")]
    Local,
}

impl Default for ConnectionType {
    fn default() -> Self {
        ConnectionType::Undef
    }
}

/// Whether one send reaches one or many receivers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TransmissionType {
    /// Unknown.
    #[serde(rename = "TT_UNDEF")]
    Undef,
    /// One receiver per link.
    #[serde(rename = "TT_UNICAST")]
    Unicast,
    /// Every subscriber of the link address observes each post.
    #[serde(rename = "TT_MULTICAST")]
    Multicast,
}

impl Default for TransmissionType {
    fn default() -> Self {
        TransmissionType::Undef
    }
}

/// Whether a send is held by a store or delivered synchronously.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum SendType {
    /// Unknown.
    #[serde(rename = "ST_UNDEF")]
    Undef,
    /// Persisted by an intermediary and fetched asynchronously.
    #[serde(rename = "ST_STORED_ASYNC")]
    StoredAsync,
    /// Ephemeral, synchronous transfer.
    #[serde(rename = "ST_EPHEM_SYNC")]
    EphemSync,
}

impl Default for SendType {
    fn default() -> Self {
        SendType::Undef
    }
}

/// Transfer directions a channel's links support, phrased in terms of which
/// side created the link address.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LinkDirection {
    /// Unknown.
    #[serde(rename = "LD_UNDEF")]
    Undef,
    /// Only the creator can send.
    #[serde(rename = "LD_CREATOR_TO_LOADER")]
    CreatorToLoader,
    /// Only the loader can send.
    #[serde(rename = "LD_LOADER_TO_CREATOR")]
    LoaderToCreator,
    /// Both sides can send.
    #[serde(rename = "LD_BIDI")]
    Bidi,
}

impl Default for LinkDirection {
    fn default() -> Self {
        LinkDirection::Undef
    }
}

/// Which side of a link a node can take.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LinkSide {
    /// Unknown.
    #[serde(rename = "LS_UNDEF")]
    Undef,
    /// Can create links and share their addresses.
    #[serde(rename = "LS_CREATOR")]
    Creator,
    /// Can load addresses created elsewhere.
    #[serde(rename = "LS_LOADER")]
    Loader,
    /// Can do either.
    #[serde(rename = "LS_BOTH")]
    Both,
}

impl Default for LinkSide {
    fn default() -> Self {
        LinkSide::Undef
    }
}

impl LinkSide {
    /// Whether a node holding this side may call createLink.
    pub fn can_create(self) -> bool {
        matches!(self, LinkSide::Creator | LinkSide::Both)
    }

    /// Whether a node holding this side may call loadLinkAddress.
    pub fn can_load(self) -> bool {
        matches!(self, LinkSide::Loader | LinkSide::Both)
    }
}

/// Lifecycle state of a channel on this node.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Unknown.
    #[serde(rename = "CHANNEL_UNDEF")]
    Undef,
    /// Activated and ready for link operations.
    #[serde(rename = "CHANNEL_AVAILABLE")]
    Available,
    /// Not activated, or deactivated.
    #[serde(rename = "CHANNEL_UNAVAILABLE")]
    Unavailable,
    /// Enabled by configuration but not yet activated.
    #[serde(rename = "CHANNEL_ENABLED")]
    Enabled,
    /// Disabled: a required user input was declined.
    #[serde(rename = "CHANNEL_DISABLED")]
    Disabled,
    /// Activation failed.
    #[serde(rename = "CHANNEL_FAILED")]
    Failed,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        ChannelStatus::Undef
    }
}

/// One role a node may enact on a channel.
///
/// Two roles conflict iff their mechanical tag sets intersect; a node holds
/// at most one role per channel and no pair of roles across channels with a
/// mechanical conflict.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelRole {
    /// Name the role is assigned by in `channelRoles`.
    pub role_name: String,
    /// Side of the link lifecycle this role allows.
    pub link_side: LinkSide,
    /// Tags claiming exclusive mechanical resources (e.g. a radio).
    pub mechanical_tags: BTreeSet<String>,
    /// Tags describing observable behaviour, for planning only.
    pub behavioral_tags: BTreeSet<String>,
}

impl ChannelRole {
    /// Roles conflict iff they claim a common mechanical resource.
    pub fn conflicts_with(&self, other: &ChannelRole) -> bool {
        self.mechanical_tags
            .intersection(&other.mechanical_tags)
            .next()
            .is_some()
    }
}

/// Static and current properties of a transport channel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelProperties {
    /// Channel identifier, e.g. `twoSixDirect`.
    pub channel_gid: String,
    /// Current lifecycle state.
    pub channel_status: ChannelStatus,
    /// How transfers reach the peer.
    pub connection_type: ConnectionType,
    /// Unicast or multicast.
    pub transmission_type: TransmissionType,
    /// Stored or ephemeral sends.
    pub send_type: SendType,
    /// Directions the channel's links support.
    pub link_direction: LinkDirection,
    /// Whether one loadLinkAddresses call may carry several addresses.
    pub multi_addressable: bool,
    /// Whether delivery is acknowledged by the transport.
    pub reliable: bool,
    /// Whether in-flight packages can be flushed on demand.
    pub is_flushable: bool,
    /// Upper bound on concurrent links for this channel on one node.
    pub max_links: usize,
    /// Hint keys openConnection honours for this channel.
    pub supported_hints: Vec<String>,
    /// Roles a node may enact.
    pub roles: Vec<ChannelRole>,
    /// Role this node currently enacts (set after activation).
    pub current_role: ChannelRole,
    /// Expected link performance when this node created the link.
    pub creator_expected: LinkPropertyPair,
    /// Expected link performance when this node loaded the link.
    pub loader_expected: LinkPropertyPair,
    /// Lifetime of a link in seconds, -1 if unbounded.
    pub duration_s: i64,
    /// Interval before a link may be reused, -1 if not applicable.
    pub period_s: i64,
    /// Maximum transfer unit in bytes, -1 if unbounded.
    pub mtu: i64,
}

impl ChannelProperties {
    /// Expected send bandwidth when enacting `side` on this channel.
    pub fn expected_send_bandwidth(&self, side: LinkSide) -> i64 {
        if side == LinkSide::Loader {
            self.loader_expected.send.bandwidth_bps
        } else {
            self.creator_expected.send.bandwidth_bps
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(tags: &[&str]) -> ChannelRole {
        ChannelRole {
            role_name: "default".to_string(),
            link_side: LinkSide::Both,
            mechanical_tags: tags.iter().map(|t| t.to_string()).collect(),
            behavioral_tags: BTreeSet::new(),
        }
    }

    #[test]
    fn roles_conflict_on_shared_mechanical_tag() {
        assert!(role(&["wifi"]).conflicts_with(&role(&["wifi", "sdr"])));
        assert!(!role(&["wifi"]).conflicts_with(&role(&["sdr"])));
        assert!(!role(&[]).conflicts_with(&role(&[])));
    }

    #[test]
    fn channel_properties_parse_from_channel_list_entry() {
        let raw = r#"{
            "channelGid": "twoSixIndirect",
            "connectionType": "CT_INDIRECT",
            "transmissionType": "TT_MULTICAST",
            "linkDirection": "LD_BIDI",
            "sendType": "ST_STORED_ASYNC",
            "multiAddressable": false,
            "reliable": false,
            "maxLinks": 1000,
            "roles": [{
                "roleName": "default",
                "linkSide": "LS_BOTH",
                "mechanicalTags": [],
                "behavioralTags": []
            }]
        }"#;
        let props: ChannelProperties =
            serde_json::from_str(raw).expect("channel entry should parse");
        assert_eq!(props.connection_type, ConnectionType::Indirect);
        assert_eq!(props.link_direction, LinkDirection::Bidi);
        assert_eq!(props.roles.len(), 1);
        assert_eq!(props.roles[0].link_side, LinkSide::Both);
        // Fields absent from the file come back as defaults.
        assert_eq!(props.channel_status, ChannelStatus::Undef);
    }
}
