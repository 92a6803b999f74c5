// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Channel role assignment: the constraint-solving half of the generator.
//!
//! Every requested sender/recipient pair must land on a channel whose roles
//! are mutually compatible with the link direction, without introducing a
//! mechanical-tag conflict with roles already assigned to either endpoint on
//! any other channel.

use crate::types::errors::{Error, Result};
use crate::types::{ChannelProperties, ChannelRole, LinkDirection, LinkSide};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// A requested logical link: one sender, one or more recipients.
pub type Link = (String, Vec<String>);

/// One entry of `network-manager-request.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkRequest {
    pub sender: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(rename = "groupId", default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Per-node planning state: assigned roles and the links expected of it.
#[derive(Debug, Default)]
pub struct NodeState {
    pub persona: String,
    pub channel_roles: HashMap<String, ChannelRole>,
    pub mechanical_tags: BTreeSet<String>,
    /// dst persona → channel gid → this node's link side.
    pub expected_links: HashMap<String, HashMap<String, LinkSide>>,
}

impl NodeState {
    pub fn new(persona: &str) -> Self {
        Self {
            persona: persona.to_string(),
            ..Self::default()
        }
    }

    fn role_compatible(&self, role: &ChannelRole, channel_gid: &str) -> bool {
        // A channel pins at most one role per node.
        if let Some(existing) = self.channel_roles.get(channel_gid) {
            return existing.role_name == role.role_name;
        }
        role.mechanical_tags.is_disjoint(&self.mechanical_tags)
    }

    fn add_role(&mut self, role: &ChannelRole, channel_gid: &str) {
        let _ = self
            .channel_roles
            .insert(channel_gid.to_string(), role.clone());
        self.mechanical_tags
            .extend(role.mechanical_tags.iter().cloned());
    }

    fn has_expected_link(&self, dst: &str, channel_gid: &str, side: LinkSide) -> bool {
        self.expected_links
            .get(dst)
            .and_then(|channels| channels.get(channel_gid))
            .copied()
            == Some(side)
    }
}

/// Whether two roles can coexist on one node.
pub fn roles_compatible(a: &ChannelRole, b: &ChannelRole) -> bool {
    !a.conflicts_with(b)
}

fn possible_roles<'a>(a: &'a ChannelProperties, b: &ChannelProperties) -> Vec<&'a ChannelRole> {
    a.roles
        .iter()
        .filter(|a_role| b.roles.iter().any(|b_role| roles_compatible(a_role, b_role)))
        .collect()
}

/// Whether two channels can both create links on a fully connected overlay.
///
/// Channel A is compatible with channel B iff every role of each remains
/// enactable against some role of the other; two unidirectional channels
/// pointing opposite ways pass this even when individual role pairs clash.
pub fn channels_compatible(a: &ChannelProperties, b: &ChannelProperties) -> bool {
    if a.channel_gid == b.channel_gid {
        return false;
    }
    possible_roles(a, b).len() == a.roles.len() && possible_roles(b, a).len() == b.roles.len()
}

/// Channels of `connection_type` that conflict with none of the required
/// channels.
pub fn filter_compatible_channels(
    channels: &[ChannelProperties],
    required: &[ChannelProperties],
    connection_type: crate::types::ConnectionType,
) -> Vec<ChannelProperties> {
    channels
        .iter()
        .filter(|channel| channel.connection_type == connection_type)
        .filter(|channel| required.iter().all(|req| channels_compatible(channel, req)))
        .cloned()
        .collect()
}

fn find_role(
    roles: &[ChannelRole],
    allowed_sides: &[LinkSide],
    channel_gid: &str,
) -> Result<ChannelRole> {
    for side in allowed_sides {
        for role in roles {
            if role.link_side == *side {
                return Ok(role.clone());
            }
        }
    }
    Err(Error::ConfigGen(format!(
        "could not find a valid role for channel {} among {:?}",
        channel_gid,
        roles.iter().map(|r| r.link_side).collect::<Vec<_>>()
    )))
}

fn matching_link_side(side: LinkSide) -> Result<LinkSide> {
    match side {
        LinkSide::Both => Ok(LinkSide::Both),
        LinkSide::Loader => Ok(LinkSide::Creator),
        LinkSide::Creator => Ok(LinkSide::Loader),
        LinkSide::Undef => Err(Error::ConfigGen("invalid link side".to_string())),
    }
}

const LOADER_SIDES: [LinkSide; 2] = [LinkSide::Both, LinkSide::Loader];
const CREATOR_SIDES: [LinkSide; 2] = [LinkSide::Both, LinkSide::Creator];

/// Checks whether `channel` can fulfill a link from `sender` to the
/// recipients, optionally committing the role assignments and expected
/// links. Multi-recipient links need a multicast channel.
pub fn fulfill_request(
    channel: &ChannelProperties,
    nodes: &mut HashMap<String, NodeState>,
    sender: &str,
    recipients: &[String],
    update_roles: bool,
) -> Result<bool> {
    let channel_gid = &channel.channel_gid;

    if recipients.len() > 1
        && channel.transmission_type != crate::types::TransmissionType::Multicast
    {
        warn!("cannot request a multicast link from {}", channel_gid);
        return Ok(false);
    }

    // Determine the role each side of the link must enact.
    let (sender_role, receiver_role) = match channel.link_direction {
        LinkDirection::LoaderToCreator => (
            find_role(&channel.roles, &LOADER_SIDES, channel_gid)?,
            find_role(&channel.roles, &CREATOR_SIDES, channel_gid)?,
        ),
        LinkDirection::CreatorToLoader => (
            find_role(&channel.roles, &CREATOR_SIDES, channel_gid)?,
            find_role(&channel.roles, &LOADER_SIDES, channel_gid)?,
        ),
        LinkDirection::Bidi => {
            let sender_assigned = nodes
                .get(sender)
                .and_then(|n| n.channel_roles.get(channel_gid))
                .cloned();
            let receiver_assigned = recipients
                .first()
                .and_then(|r| nodes.get(r))
                .and_then(|n| n.channel_roles.get(channel_gid))
                .cloned();
            if let Some(sender_role) = sender_assigned {
                let receiver_role = find_role(
                    &channel.roles,
                    &[matching_link_side(sender_role.link_side)?],
                    channel_gid,
                )?;
                (sender_role, receiver_role)
            } else if let Some(receiver_role) = receiver_assigned {
                let sender_role = find_role(
                    &channel.roles,
                    &[matching_link_side(receiver_role.link_side)?],
                    channel_gid,
                )?;
                (sender_role, receiver_role)
            } else {
                (
                    find_role(&channel.roles, &LOADER_SIDES, channel_gid)?,
                    find_role(&channel.roles, &CREATOR_SIDES, channel_gid)?,
                )
            }
        }
        LinkDirection::Undef => {
            return Err(Error::ConfigGen(format!(
                "invalid link direction for channel {}",
                channel_gid
            )))
        }
    };

    let sender_ok = nodes
        .get(sender)
        .map_or(false, |n| n.role_compatible(&sender_role, channel_gid));
    let receivers_ok = recipients.iter().all(|recipient| {
        nodes
            .get(recipient)
            .map_or(false, |n| n.role_compatible(&receiver_role, channel_gid))
    });
    if !sender_ok || !receivers_ok {
        return Ok(false);
    }

    let mut update_roles = update_roles;
    // A BOTH/BOTH bidirectional link only needs recording on one endpoint.
    if channel.link_direction == LinkDirection::Bidi
        && sender_role.link_side == LinkSide::Both
        && receiver_role.link_side == LinkSide::Both
        && recipients.len() == 1
        && nodes
            .get(&recipients[0])
            .map_or(false, |n| n.has_expected_link(sender, channel_gid, LinkSide::Both))
    {
        update_roles = false;
    }

    if update_roles {
        if let Some(node) = nodes.get_mut(sender) {
            node.add_role(&sender_role, channel_gid);
        }
        for recipient in recipients {
            if let Some(node) = nodes.get_mut(recipient) {
                node.add_role(&receiver_role, channel_gid);
            }
        }
        if let (Some(first), true) = (recipients.first(), recipients.len() == 1) {
            if let Some(node) = nodes.get_mut(sender) {
                let _ = node
                    .expected_links
                    .entry(first.clone())
                    .or_insert_with(HashMap::new)
                    .insert(channel_gid.clone(), sender_role.link_side);
            }
        }
    }

    Ok(true)
}

/// Plans genesis links: channels are tried in order, each taking as many of
/// the remaining links as its roles allow; every requested link lands in
/// `request`. Leftover links are a planning failure.
pub fn create_links(
    channels: &[ChannelProperties],
    nodes: &mut HashMap<String, NodeState>,
    request: &mut Vec<LinkRequest>,
    mut links_needed: Vec<Link>,
) -> Result<()> {
    for channel in channels {
        let mut still_needed = Vec::new();
        for (sender, recipients) in links_needed {
            if fulfill_request(channel, nodes, &sender, &recipients, true)? {
                debug!(
                    "requesting {} -> {:?} genesis link from channel {}",
                    sender, recipients, channel.channel_gid
                );
                request.push(LinkRequest {
                    sender,
                    recipients,
                    details: serde_json::json!({}),
                    group_id: None,
                    channels: vec![channel.channel_gid.clone()],
                });
            } else {
                still_needed.push((sender, recipients));
            }
        }
        links_needed = still_needed;
    }

    if !links_needed.is_empty() {
        return Err(Error::ConfigGen(format!(
            "failed to find channels to satisfy {} links, first: {:?}",
            links_needed.len(),
            links_needed[0]
        )));
    }
    Ok(())
}

/// Assigns roles for dynamic channels: every channel/link pairing that fits
/// is recorded so the runtime LinkWizard can realize it later.
pub fn assign_dyn_channel_roles(
    channels: &[ChannelProperties],
    nodes: &mut HashMap<String, NodeState>,
    links_needed: &[Link],
) -> Result<()> {
    for channel in channels {
        for (sender, recipients) in links_needed {
            if fulfill_request(channel, nodes, sender, recipients, true)? {
                debug!(
                    "expecting {} -> {:?} link from channel {}",
                    sender, recipients, channel.channel_gid
                );
            }
        }
    }
    Ok(())
}

/// Bootstrap channels must carry exactly one role and fit every node.
pub fn assign_bootstrap_channel_roles(
    channels: &[ChannelProperties],
    nodes: &mut HashMap<String, NodeState>,
) -> Result<()> {
    for channel in channels {
        if channel.roles.len() != 1 {
            return Err(Error::ConfigGen(format!(
                "expected 1 role for bootstrap channel {}, got {}",
                channel.channel_gid,
                channel.roles.len()
            )));
        }
        let role = &channel.roles[0];
        for node in nodes.values_mut() {
            if !node.role_compatible(role, &channel.channel_gid) {
                return Err(Error::ConfigGen(format!(
                    "bootstrap channel {} not compatible with channels on node {}",
                    channel.channel_gid, node.persona
                )));
            }
            node.add_role(role, &channel.channel_gid);
        }
    }
    Ok(())
}

/// Checks that every explicitly required channel will carry at least one
/// link; a required channel with no expected links was crowded out by role
/// conflicts or earlier channels.
pub fn check_required_links(
    channels: &[ChannelProperties],
    nodes: &HashMap<String, NodeState>,
    links: &[Link],
) -> Result<()> {
    for channel in channels {
        let used = links.iter().any(|(sender, recipients)| {
            recipients.first().map_or(false, |first| {
                nodes
                    .get(sender)
                    .and_then(|n| n.expected_links.get(first))
                    .map_or(false, |channels| {
                        channels.contains_key(&channel.channel_gid)
                    })
            })
        });
        if !used {
            return Err(Error::ConfigGen(format!(
                "{} is required but will not have any links; likely a conflict between \
                 channels, or all its links were fulfilled by an earlier channel",
                channel.channel_gid
            )));
        }
    }
    info!("all required channels carry at least one link");
    Ok(())
}

/// Removes duplicate (sender, recipients) pairs, keeping first occurrence.
pub fn dedup_links(links: Vec<Link>) -> Vec<Link> {
    let mut deduped: Vec<Link> = Vec::new();
    let mut seen: HashMap<String, Vec<Vec<String>>> = HashMap::new();
    for (sender, recipients) in links {
        let known = seen.entry(sender.clone()).or_insert_with(Vec::new);
        if !known.contains(&recipients) {
            known.push(recipients.clone());
            deduped.push((sender, recipients));
        }
    }
    deduped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionType, TransmissionType};

    fn role(name: &str, side: LinkSide, tags: &[&str]) -> ChannelRole {
        ChannelRole {
            role_name: name.to_string(),
            link_side: side,
            mechanical_tags: tags.iter().map(|t| t.to_string()).collect(),
            behavioral_tags: BTreeSet::new(),
        }
    }

    fn channel(gid: &str, direction: LinkDirection, roles: Vec<ChannelRole>) -> ChannelProperties {
        ChannelProperties {
            channel_gid: gid.to_string(),
            link_direction: direction,
            transmission_type: TransmissionType::Unicast,
            connection_type: ConnectionType::Indirect,
            roles,
            ..ChannelProperties::default()
        }
    }

    fn nodes_for(names: &[&str]) -> HashMap<String, NodeState> {
        names
            .iter()
            .map(|name| (name.to_string(), NodeState::new(name)))
            .collect()
    }

    #[test]
    fn conflicting_required_channels_are_rejected() {
        // Two channels both claiming the same mechanical resource: role
        // assignment cannot satisfy links on both for the same node.
        let c1 = channel(
            "c1",
            LinkDirection::Bidi,
            vec![role("default", LinkSide::Both, &["wifi"])],
        );
        let c2 = channel(
            "c2",
            LinkDirection::Bidi,
            vec![role("default", LinkSide::Both, &["wifi"])],
        );
        assert!(!channels_compatible(&c1, &c2));

        let mut nodes = nodes_for(&["a", "b"]);
        let links = vec![("a".to_string(), vec!["b".to_string()])];
        let mut request = Vec::new();
        create_links(&[c1], &mut nodes, &mut request, links.clone()).expect("c1 fits");

        // The second channel can no longer be satisfied on these nodes.
        assert!(create_links(&[c2], &mut nodes, &mut request, links).is_err());
    }

    #[test]
    fn a_channel_is_never_compatible_with_itself() {
        let c = channel(
            "c",
            LinkDirection::Bidi,
            vec![role("default", LinkSide::Both, &[])],
        );
        assert!(!channels_compatible(&c, &c.clone()));
    }

    #[test]
    fn opposite_unidirectional_channels_are_compatible() {
        let up = channel(
            "up",
            LinkDirection::LoaderToCreator,
            vec![
                role("send", LinkSide::Loader, &["uplink"]),
                role("recv", LinkSide::Creator, &["downlink"]),
            ],
        );
        let down = channel(
            "down",
            LinkDirection::LoaderToCreator,
            vec![
                role("send", LinkSide::Loader, &["downlink"]),
                role("recv", LinkSide::Creator, &["uplink"]),
            ],
        );
        // Each role of one channel has a workable counterpart on the other.
        assert!(channels_compatible(&up, &down));
    }

    #[test]
    fn assigned_roles_never_overlap_mechanically() {
        let c1 = channel(
            "c1",
            LinkDirection::Bidi,
            vec![role("r1", LinkSide::Both, &["radio-a"])],
        );
        let c2 = channel(
            "c2",
            LinkDirection::Bidi,
            vec![role("r2", LinkSide::Both, &["radio-b"])],
        );
        let mut nodes = nodes_for(&["a", "b"]);
        let links = vec![
            ("a".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["a".to_string()]),
        ];
        let mut request = Vec::new();
        create_links(&[c1], &mut nodes, &mut request, links.clone()).expect("c1");
        assign_dyn_channel_roles(&[c2], &mut nodes, &links).expect("c2");

        for node in nodes.values() {
            let mut union: BTreeSet<String> = BTreeSet::new();
            for assigned in node.channel_roles.values() {
                for tag in &assigned.mechanical_tags {
                    assert!(
                        union.insert(tag.clone()),
                        "mechanical tag {} assigned twice on {}",
                        tag,
                        node.persona
                    );
                }
            }
        }
    }

    #[test]
    fn loader_to_creator_sides_are_enforced() {
        let c = channel(
            "c",
            LinkDirection::LoaderToCreator,
            vec![
                role("loader", LinkSide::Loader, &[]),
                role("creator", LinkSide::Creator, &[]),
            ],
        );
        let mut nodes = nodes_for(&["a", "b"]);
        assert!(fulfill_request(&c, &mut nodes, "a", &["b".to_string()], true).expect("fulfill"));
        assert_eq!(nodes["a"].channel_roles["c"].link_side, LinkSide::Loader);
        assert_eq!(nodes["b"].channel_roles["c"].link_side, LinkSide::Creator);
        assert_eq!(
            nodes["a"].expected_links["b"]["c"],
            LinkSide::Loader
        );
    }

    #[test]
    fn multicast_requests_need_multicast_channels() {
        let c = channel(
            "c",
            LinkDirection::Bidi,
            vec![role("default", LinkSide::Both, &[])],
        );
        let mut nodes = nodes_for(&["a", "b", "d"]);
        let fulfilled = fulfill_request(
            &c,
            &mut nodes,
            "a",
            &["b".to_string(), "d".to_string()],
            true,
        )
        .expect("fulfill");
        assert!(!fulfilled);
    }

    #[test]
    fn bidi_both_links_are_recorded_on_one_endpoint_only() {
        let c = channel(
            "c",
            LinkDirection::Bidi,
            vec![role("default", LinkSide::Both, &[])],
        );
        let mut nodes = nodes_for(&["a", "b"]);
        assert!(fulfill_request(&c, &mut nodes, "a", &["b".to_string()], true).expect("forward"));
        assert!(fulfill_request(&c, &mut nodes, "b", &["a".to_string()], true).expect("reverse"));

        let forward = nodes["a"].expected_links.get("b").is_some();
        let reverse = nodes["b"].expected_links.get("a").is_some();
        assert!(forward && !reverse);
    }

    #[test]
    fn dedup_preserves_first_occurrence_order() {
        let links = vec![
            ("a".to_string(), vec!["b".to_string()]),
            ("a".to_string(), vec!["b".to_string()]),
            ("b".to_string(), vec!["a".to_string()]),
        ];
        let deduped = dedup_links(links);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].0, "a");
        assert_eq!(deduped[1].0, "b");
    }
}
