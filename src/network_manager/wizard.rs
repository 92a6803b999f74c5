// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Dynamic link negotiation.
//!
//! Peers negotiate new unicast links at runtime over the same sealed channel
//! they are configuring, using small JSON payloads carried in LINKS-typed
//! messages. The protocol is optimistic: a request that cannot be honoured
//! is logged locally and no reply is sent.

use super::links::LinkManager;
use crate::messaging::{format_ext_msg, ClrMsg, ExtClrMsg};
use crate::sdk::{Handle, NetworkManagerSdk};
use crate::types::{
    ChannelProperties, ChannelStatus, ConnectionType, LinkDirection, LinkProperties, LinkSide,
    LinkStatus, LinkType, Persona, PersonaType,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info};

/// One LinkWizard payload: a JSON object carrying at most one verb.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WizardPayload {
    /// Ask the peer to advertise its channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    get_supported_channels: Option<bool>,
    /// Advertisement: channel gid → the sender's link side on it.
    #[serde(skip_serializing_if = "Option::is_none")]
    supported_channels: Option<HashMap<String, LinkSide>>,
    /// Ask the peer to create a link on this channel and share its address.
    #[serde(skip_serializing_if = "Option::is_none")]
    request_create_link: Option<String>,
    /// Ask the peer to load a created address.
    #[serde(skip_serializing_if = "Option::is_none")]
    request_load_link_address: Option<LoadLinkAddressRequest>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadLinkAddressRequest {
    channel_gid: String,
    address: String,
    personas: Vec<String>,
}

pub(crate) struct LinkWizard {
    active_uuid: String,
    local_type: PersonaType,
    /// Advertised channels per peer, filled by `supportedChannels` messages.
    supported_channels: HashMap<String, HashMap<String, LinkSide>>,
    /// Obtain calls buffered until the peer's channels are known.
    pending_requests: HashMap<String, Vec<LinkType>>,
    /// createLink handles awaiting LINK_CREATED, with the peers to notify.
    pending_create: HashMap<Handle, Vec<String>>,
    /// loadLinkAddress handles awaiting LINK_LOADED.
    pending_load: HashMap<Handle, Vec<String>>,
}

impl LinkWizard {
    pub fn new(active_uuid: String, local_type: PersonaType) -> Self {
        Self {
            active_uuid,
            local_type,
            supported_channels: HashMap::new(),
            pending_requests: HashMap::new(),
            pending_create: HashMap::new(),
            pending_load: HashMap::new(),
        }
    }

    /// Handles one LINKS payload from `sender`, potentially creating or
    /// loading links and/or messaging other peers.
    pub fn process_link_msg(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        sender: &Persona,
        msg: &str,
    ) -> bool {
        let uuid = sender.uuid.clone();
        debug!("wizard: message from {}: {}", uuid, msg);

        let payload: WizardPayload = match serde_json::from_str(msg) {
            Ok(payload) => payload,
            Err(err) => {
                error!("wizard: error parsing payload {:?}: {}", msg, err);
                return false;
            }
        };

        if payload.get_supported_channels == Some(true) {
            let _ = self.respond_supported_channels(sdk, links, &uuid);
        }

        if let Some(channels) = payload.supported_channels {
            debug!("wizard: updated supported channels for {}: {:?}", uuid, channels);
            let _ = self.supported_channels.insert(uuid.clone(), channels);

            // Replay any obtain calls that were waiting on this answer.
            if let Some(pending) = self.pending_requests.remove(&uuid) {
                for link_type in pending {
                    let _ = self.obtain_unicast_link(sdk, links, sender, link_type);
                }
            }
        }

        if let Some(channel_gid) = payload.request_create_link {
            let _ = self.handle_create_link_request(sdk, &uuid, &channel_gid);
        }

        if let Some(request) = payload.request_load_link_address {
            let _ = self.handle_load_link_address_request(sdk, &uuid, request);
        }

        true
    }

    /// Attempts to construct a new unicast link with `persona` of the given
    /// type; a BIDI request may end up creating two unidirectional links.
    ///
    /// Returns false when the peer cannot be reached yet — the caller should
    /// retry once a send connection to the peer opens. A true return with no
    /// link created means there was no compatible channel.
    pub fn obtain_unicast_link(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        persona: &Persona,
        link_type: LinkType,
    ) -> bool {
        let uuid = persona.uuid.clone();
        debug!("wizard: obtain {:?} link to {}", link_type, uuid);

        if self
            .supported_channels
            .get(&uuid)
            .map_or(true, |channels| channels.is_empty())
        {
            // Ask the peer what channels it supports and queue the request
            // for when the answer arrives.
            if self.query_supported_channels(sdk, links, &uuid) {
                self.pending_requests
                    .entry(uuid)
                    .or_insert_with(Vec::new)
                    .push(link_type);
                true
            } else {
                // No send connection yet; not able to query.
                false
            }
        } else {
            self.internal_obtain_unicast_link(sdk, links, persona, link_type)
        }
    }

    fn internal_obtain_unicast_link(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        persona: &Persona,
        link_type: LinkType,
    ) -> bool {
        let uuid = persona.uuid.clone();
        let their_channels = self
            .supported_channels
            .get(&uuid)
            .cloned()
            .unwrap_or_default();
        let mut potential: HashMap<String, ChannelProperties> = sdk.get_supported_channels();

        if link_type == LinkType::Bidi {
            potential.retain(|_, props| props.link_direction == LinkDirection::Bidi);
            if potential.is_empty() {
                // No bidirectional channel on offer: satisfy the request with
                // separate receive and send links instead.
                let recv = self.internal_obtain_unicast_link(sdk, links, persona, LinkType::Recv);
                let send = self.internal_obtain_unicast_link(sdk, links, persona, LinkType::Send);
                return recv && send;
            }
        }

        let mut candidates: Vec<(String, ChannelProperties, LinkSide)> = Vec::new();
        for (channel_gid, props) in potential {
            let their_side = match their_channels.get(&channel_gid) {
                Some(side) => *side,
                None => continue,
            };
            let direction = props.link_direction;
            let our_side = props.current_role.link_side;

            // To create: we create, they load, and the direction serves the
            // requested transfer. To load: the mirror image.
            let create_ok = our_side.can_create()
                && their_side.can_load()
                && (direction == LinkDirection::Bidi
                    || (link_type == LinkType::Send && direction == LinkDirection::CreatorToLoader)
                    || (link_type == LinkType::Recv
                        && direction == LinkDirection::LoaderToCreator));
            let load_ok = our_side.can_load()
                && their_side.can_create()
                && (direction == LinkDirection::Bidi
                    || (link_type == LinkType::Send && direction == LinkDirection::LoaderToCreator)
                    || (link_type == LinkType::Recv
                        && direction == LinkDirection::CreatorToLoader));

            if create_ok {
                candidates.push((channel_gid, props, LinkSide::Creator));
            } else if load_ok {
                candidates.push((channel_gid, props, LinkSide::Loader));
            }
        }

        let recipient_type = if self.local_type.is_client() {
            PersonaType::Client
        } else {
            persona.persona_type.unwrap_or(PersonaType::Server)
        };
        let best = match preferred_channel(candidates, recipient_type) {
            Some(best) => best,
            None => {
                info!("wizard: no channel candidate to connect to {}", uuid);
                return false;
            }
        };
        let (channel_gid, props, side) = best;

        let max_links = sdk
            .get_channel_properties(&channel_gid)
            .map(|c| c.max_links)
            .unwrap_or(0);
        if sdk.get_links_for_channel(&channel_gid).len() >= max_links {
            error!(
                "wizard: channel {} is at or over its max link count",
                channel_gid
            );
            return false;
        }

        debug!(
            "wizard: best channel {} side {:?} direction {:?} for {:?}",
            channel_gid, side, props.link_direction, link_type
        );
        match side {
            LinkSide::Creator => {
                debug!("wizard: creating link");
                let response = sdk.create_link(&channel_gid, &[uuid.clone()], 0);
                if !response.is_ok() {
                    error!("wizard: error creating link on channel {}", channel_gid);
                    return false;
                }
                let _ = self.pending_create.insert(response.handle, vec![uuid]);
                true
            }
            LinkSide::Loader => {
                // We want to be the loader, so prompt the peer to create.
                debug!("wizard: requesting link creation");
                self.request_create_link(sdk, links, &uuid, &channel_gid)
            }
            other => {
                error!("wizard: invalid link side {:?}", other);
                false
            }
        }
    }

    /// Handles a peer's request that we create a link and share the address.
    fn handle_create_link_request(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        uuid: &str,
        channel_gid: &str,
    ) -> bool {
        debug!("wizard: create request from {} on {}", uuid, channel_gid);
        if !sdk.get_supported_channels().contains_key(channel_gid) {
            error!("wizard: requested channel {} is not supported", channel_gid);
            return false;
        }
        let max_links = sdk
            .get_channel_properties(channel_gid)
            .map(|c| c.max_links)
            .unwrap_or(0);
        if sdk.get_links_for_channel(channel_gid).len() >= max_links {
            error!(
                "wizard: channel {} is at or over its max link count",
                channel_gid
            );
            return false;
        }

        let response = sdk.create_link(channel_gid, &[uuid.to_string()], 0);
        if !response.is_ok() {
            error!("wizard: error creating link on {}", channel_gid);
            return false;
        }
        let _ = self
            .pending_create
            .insert(response.handle, vec![uuid.to_string()]);
        true
    }

    /// Handles a peer's request that we load a created address.
    fn handle_load_link_address_request(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        uuid: &str,
        request: LoadLinkAddressRequest,
    ) -> bool {
        debug!(
            "wizard: load request from {} on {}",
            uuid, request.channel_gid
        );
        if !sdk
            .get_supported_channels()
            .contains_key(&request.channel_gid)
        {
            error!(
                "wizard: requested channel {} is not supported",
                request.channel_gid
            );
            return false;
        }
        let max_links = sdk
            .get_channel_properties(&request.channel_gid)
            .map(|c| c.max_links)
            .unwrap_or(0);
        if sdk.get_links_for_channel(&request.channel_gid).len() >= max_links {
            error!(
                "wizard: channel {} is at or over its max link count",
                request.channel_gid
            );
            return false;
        }

        // Our own uuid is in the persona list; the loaded link should
        // address everyone else.
        let personas: Vec<String> = request
            .personas
            .into_iter()
            .filter(|p| *p != self.active_uuid)
            .collect();
        let response = sdk.load_link_address(&request.channel_gid, &request.address, &personas, 0);
        if !response.is_ok() {
            error!(
                "wizard: error loading link address on {} with address {}",
                request.channel_gid, request.address
            );
            return false;
        }
        let _ = self
            .pending_load
            .insert(response.handle, vec![uuid.to_string()]);
        true
    }

    /// Watches link status updates for handles of previous wizard calls;
    /// LINK_CREATED results trigger the address hand-off to the peers.
    pub fn handle_link_status_update(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        handle: Handle,
        link_id: &str,
        status: LinkStatus,
        properties: &LinkProperties,
    ) -> bool {
        debug!("wizard: link {} status {:?}", link_id, status);
        match status {
            LinkStatus::Created => {
                let mut uuid_list = match self.pending_create.remove(&handle) {
                    Some(uuid_list) => uuid_list,
                    None => {
                        // Not a link the wizard created; ignore.
                        debug!("wizard: LINK_CREATED without a pendingCreate entry, ignoring");
                        return false;
                    }
                };
                uuid_list.push(self.active_uuid.clone());

                for uuid in &uuid_list {
                    if *uuid != self.active_uuid {
                        let _ = self.request_load_link_address(
                            sdk,
                            links,
                            uuid,
                            &properties.channel_gid,
                            &properties.link_address,
                            &uuid_list,
                        );
                    }
                }
                true
            }
            LinkStatus::Loaded | LinkStatus::Destroyed => {
                if self.pending_load.remove(&handle).is_none() {
                    debug!(
                        "wizard: {:?} without a pendingLoad entry, ignoring",
                        status
                    );
                    return false;
                }
                true
            }
            LinkStatus::Undef => true,
        }
    }

    /// No channel-status-driven behaviour today; kept for protocol symmetry.
    pub fn handle_channel_status_update(
        &mut self,
        _handle: Handle,
        _channel_gid: &str,
        _status: ChannelStatus,
    ) {
    }

    fn send_payload(
        &self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        to_uuid: &str,
        payload: &WizardPayload,
    ) -> bool {
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(err) => {
                error!("wizard: failed to encode payload: {}", err);
                return false;
            }
        };
        // Control messages carry a fixed header; they are never ring-routed.
        let clr = ClrMsg::new(&body, &self.active_uuid, to_uuid, 1, 0, 0);
        let text = format_ext_msg(&ExtClrMsg::control(clr));
        links.send_formatted_msg(sdk, to_uuid, &text, 0, 0)
    }

    fn query_supported_channels(
        &self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        uuid: &str,
    ) -> bool {
        debug!("wizard: querying supported channels of {}", uuid);
        self.send_payload(
            sdk,
            links,
            uuid,
            &WizardPayload {
                get_supported_channels: Some(true),
                ..WizardPayload::default()
            },
        )
    }

    fn respond_supported_channels(
        &self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        uuid: &str,
    ) -> bool {
        let channels: HashMap<String, LinkSide> = sdk
            .get_supported_channels()
            .into_iter()
            .map(|(gid, props)| (gid, props.current_role.link_side))
            .collect();
        debug!("wizard: advertising {:?} to {}", channels, uuid);
        self.send_payload(
            sdk,
            links,
            uuid,
            &WizardPayload {
                supported_channels: Some(channels),
                ..WizardPayload::default()
            },
        )
    }

    fn request_create_link(
        &self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        uuid: &str,
        channel_gid: &str,
    ) -> bool {
        self.send_payload(
            sdk,
            links,
            uuid,
            &WizardPayload {
                request_create_link: Some(channel_gid.to_string()),
                ..WizardPayload::default()
            },
        )
    }

    fn request_load_link_address(
        &self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        uuid: &str,
        channel_gid: &str,
        address: &str,
        personas: &[String],
    ) -> bool {
        self.send_payload(
            sdk,
            links,
            uuid,
            &WizardPayload {
                request_load_link_address: Some(LoadLinkAddressRequest {
                    channel_gid: channel_gid.to_string(),
                    address: address.to_string(),
                    personas: personas.to_vec(),
                }),
                ..WizardPayload::default()
            },
        )
    }
}

/// Picks the preferred channel for sending to a recipient of the given type:
/// clients must be reached indirectly and prefer it; ties break on the
/// expected send bandwidth of the side we would enact.
fn preferred_channel(
    candidates: Vec<(String, ChannelProperties, LinkSide)>,
    recipient_type: PersonaType,
) -> Option<(String, ChannelProperties, LinkSide)> {
    debug!("wizard: {} candidate channels", candidates.len());

    let mut best: Option<(String, ChannelProperties, LinkSide)> = None;
    for (channel_gid, props, side) in candidates {
        let better = match &best {
            None => rank_channel(
                (&props, side),
                (&ChannelProperties::default(), LinkSide::Undef),
                recipient_type,
            ),
            Some((_, best_props, best_side)) => {
                rank_channel((&props, side), (best_props, *best_side), recipient_type)
            }
        };
        if better {
            debug!("wizard: new best channel {}", channel_gid);
            best = Some((channel_gid, props, side));
        }
    }

    if let Some((_, props, _)) = &best {
        if props.connection_type == ConnectionType::Direct && recipient_type.is_client() {
            error!("wizard: client link could not find an indirect channel");
            return None;
        }
    }
    best
}

/// True when `lhs` outranks `rhs` for the recipient type.
fn rank_channel(
    lhs: (&ChannelProperties, LinkSide),
    rhs: (&ChannelProperties, LinkSide),
    recipient_type: PersonaType,
) -> bool {
    if recipient_type.is_client() {
        match (
            lhs.0.connection_type == ConnectionType::Indirect,
            rhs.0.connection_type == ConnectionType::Indirect,
        ) {
            (true, false) => return true,
            (false, true) => return false,
            _ => {}
        }
    }
    lhs.0.expected_send_bandwidth(lhs.1) > rhs.0.expected_send_bandwidth(rhs.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LinkPropertyPair, LinkPropertySet};

    fn channel(
        gid: &str,
        connection_type: ConnectionType,
        creator_bw: i64,
        loader_bw: i64,
    ) -> ChannelProperties {
        ChannelProperties {
            channel_gid: gid.to_string(),
            connection_type,
            creator_expected: LinkPropertyPair {
                send: LinkPropertySet {
                    bandwidth_bps: creator_bw,
                    ..LinkPropertySet::default()
                },
                receive: LinkPropertySet::default(),
            },
            loader_expected: LinkPropertyPair {
                send: LinkPropertySet {
                    bandwidth_bps: loader_bw,
                    ..LinkPropertySet::default()
                },
                receive: LinkPropertySet::default(),
            },
            ..ChannelProperties::default()
        }
    }

    #[test]
    fn clients_require_indirect_channels() {
        let direct = channel("direct", ConnectionType::Direct, 1_000_000, 1_000_000);
        let picked = preferred_channel(
            vec![("direct".to_string(), direct, LinkSide::Creator)],
            PersonaType::Client,
        );
        assert!(picked.is_none());
    }

    #[test]
    fn indirect_wins_for_clients_despite_lower_bandwidth() {
        let direct = channel("direct", ConnectionType::Direct, 1_000_000, 1_000_000);
        let indirect = channel("indirect", ConnectionType::Indirect, 100, 100);
        let picked = preferred_channel(
            vec![
                ("direct".to_string(), direct, LinkSide::Creator),
                ("indirect".to_string(), indirect, LinkSide::Creator),
            ],
            PersonaType::Client,
        )
        .expect("indirect candidate should win");
        assert_eq!(picked.0, "indirect");
    }

    #[test]
    fn bandwidth_of_the_enacted_side_decides_for_servers() {
        // Same channel shape, but we would load one and create the other.
        let slow_creator = channel("a", ConnectionType::Direct, 10, 9_999);
        let fast_creator = channel("b", ConnectionType::Direct, 500, 1);
        let picked = preferred_channel(
            vec![
                ("a".to_string(), slow_creator, LinkSide::Creator),
                ("b".to_string(), fast_creator, LinkSide::Creator),
            ],
            PersonaType::Server,
        )
        .expect("a candidate should win");
        assert_eq!(picked.0, "b");

        let slow_creator = channel("a", ConnectionType::Direct, 10, 9_999);
        let fast_creator = channel("b", ConnectionType::Direct, 500, 1);
        let picked = preferred_channel(
            vec![
                ("a".to_string(), slow_creator, LinkSide::Loader),
                ("b".to_string(), fast_creator, LinkSide::Loader),
            ],
            PersonaType::Server,
        )
        .expect("a candidate should win");
        // As loaders, channel a's loader bandwidth dominates.
        assert_eq!(picked.0, "a");
    }

    #[test]
    fn payload_wire_shape_is_single_verb_json() {
        let payload = WizardPayload {
            request_create_link: Some("twoSixIndirect".to_string()),
            ..WizardPayload::default()
        };
        let body = serde_json::to_string(&payload).expect("payload encodes");
        assert_eq!(body, r#"{"requestCreateLink":"twoSixIndirect"}"#);

        let parsed: WizardPayload = serde_json::from_str(&body).expect("payload parses");
        assert_eq!(parsed.request_create_link.as_deref(), Some("twoSixIndirect"));
        assert!(parsed.supported_channels.is_none());
    }
}
