// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The two concrete channels this plugin provides and their property
//! profiles.

use crate::sdk::CommsSdk;
use crate::types::{
    ChannelProperties, ConnectionType, LinkProperties, LinkPropertySet, LinkType, SendType,
    TransmissionType,
};

/// Gid of the direct point-to-point TCP channel.
pub const DIRECT_CHANNEL_GID: &str = "twoSixDirect";

/// Gid of the indirect HTTP-whiteboard channel.
pub const INDIRECT_CHANNEL_GID: &str = "twoSixIndirect";

/// Channel properties as known to the host, falling back to a minimal
/// profile when the host has none registered.
pub(crate) fn default_channel_properties(
    sdk: &dyn CommsSdk,
    channel_gid: &str,
) -> ChannelProperties {
    sdk.get_channel_properties(channel_gid)
        .unwrap_or_else(|| ChannelProperties {
            channel_gid: channel_gid.to_string(),
            ..ChannelProperties::default()
        })
}

/// Link properties a fresh link on `channel_gid` starts with.
///
/// The worst/best figures are the measured envelope of the reference
/// deployments; the expected figures come from the channel profile.
pub(crate) fn default_link_properties(
    sdk: &dyn CommsSdk,
    channel_gid: &str,
) -> Option<LinkProperties> {
    let channel = default_channel_properties(sdk, channel_gid);
    match channel_gid {
        DIRECT_CHANNEL_GID => {
            let mut props = base_link_properties(&channel);
            props.worst.send = LinkPropertySet {
                bandwidth_bps: 23_130_000,
                latency_ms: 17,
                loss: -1.0,
            };
            props.worst.receive = props.worst.send;
            props.best.send = LinkPropertySet {
                bandwidth_bps: 28_270_000,
                latency_ms: 14,
                loss: -1.0,
            };
            props.best.receive = props.best.send;
            Some(props)
        }
        INDIRECT_CHANNEL_GID => {
            let mut props = base_link_properties(&channel);
            props.link_type = LinkType::Bidi;
            props.worst.send = LinkPropertySet {
                bandwidth_bps: 277_200,
                latency_ms: 3_190,
                loss: 0.1,
            };
            props.worst.receive = props.worst.send;
            props.best.send = LinkPropertySet {
                bandwidth_bps: 338_800,
                latency_ms: 2_610,
                loss: 0.1,
            };
            props.best.receive = props.best.send;
            Some(props)
        }
        _ => None,
    }
}

fn base_link_properties(channel: &ChannelProperties) -> LinkProperties {
    LinkProperties {
        transmission_type: channel.transmission_type,
        connection_type: channel.connection_type,
        send_type: channel.send_type,
        reliable: channel.reliable,
        is_flushable: channel.is_flushable,
        duration_s: channel.duration_s,
        period_s: channel.period_s,
        mtu: channel.mtu,
        expected: channel.creator_expected,
        supported_hints: channel.supported_hints.clone(),
        channel_gid: channel.channel_gid.clone(),
        ..LinkProperties::default()
    }
}

/// Baseline channel profile for the direct channel, used by deployments that
/// assemble a channel list.
pub fn direct_channel_profile() -> ChannelProperties {
    ChannelProperties {
        channel_gid: DIRECT_CHANNEL_GID.to_string(),
        connection_type: ConnectionType::Direct,
        transmission_type: TransmissionType::Unicast,
        send_type: SendType::EphemSync,
        link_direction: crate::types::LinkDirection::LoaderToCreator,
        reliable: false,
        max_links: 1_000,
        ..ChannelProperties::default()
    }
}

/// Baseline channel profile for the indirect channel.
pub fn indirect_channel_profile() -> ChannelProperties {
    ChannelProperties {
        channel_gid: INDIRECT_CHANNEL_GID.to_string(),
        connection_type: ConnectionType::Indirect,
        transmission_type: TransmissionType::Multicast,
        send_type: SendType::StoredAsync,
        link_direction: crate::types::LinkDirection::Bidi,
        reliable: false,
        max_links: 1_000,
        ..ChannelProperties::default()
    }
}
