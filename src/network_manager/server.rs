// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::config::RingHop;
use super::links::LinkManager;
use super::seen::SeenSet;
use crate::messaging::{format_clr_msg, format_ext_msg, ClrMsg, ExtClrMsg, UNSET_UUID};
use crate::sdk::NetworkManagerSdk;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// A flooding factor of zero means "flood every reachable committee".
pub(crate) const FULL_FLOODING: usize = 0;

/// Server-role routing state: ring traversal, inter-committee forwarding and
/// the two dedup sets behind them.
pub(crate) struct ServerState {
    pub committee_name: String,
    /// Clients this server delivers to directly.
    pub exit_clients: HashSet<String>,
    /// Clients reachable via this committee but exit-held elsewhere in it.
    pub committee_clients: HashSet<String>,
    /// First reachable member per foreign committee, iterated in key order.
    pub reachable_committees: BTreeMap<String, Vec<String>>,
    /// This node's successor on each committee ring.
    pub rings: Vec<RingHop>,
    pub flooding_factor: usize,
    /// Messages this node has routed.
    stale_uuids: SeenSet<i64>,
    /// Messages this node has flooded out of the committee.
    flooded_uuids: SeenSet<i64>,
}

impl ServerState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        committee_name: String,
        exit_clients: HashSet<String>,
        committee_clients: HashSet<String>,
        reachable_committees: BTreeMap<String, Vec<String>>,
        rings: Vec<RingHop>,
        flooding_factor: usize,
        max_stale_uuids: usize,
    ) -> Self {
        Self {
            committee_name,
            exit_clients,
            committee_clients,
            reachable_committees,
            rings,
            flooding_factor,
            stale_uuids: SeenSet::new(max_stale_uuids),
            flooded_uuids: SeenSet::new(max_stale_uuids),
        }
    }

    fn add_stale(&mut self, uuid: i64) {
        if uuid != UNSET_UUID {
            self.stale_uuids.add(uuid);
        }
    }

    fn add_flooded(&mut self, uuid: i64) {
        if uuid != UNSET_UUID {
            self.flooded_uuids.add(uuid);
        }
    }

    /// Entry point of the routing state machine.
    ///
    /// A message without a ring TTL starts a fresh ring traversal here
    /// (unless this is a ringless single-server committee); everything else
    /// continues one.
    pub fn route(&mut self, sdk: &dyn NetworkManagerSdk, links: &LinkManager, msg: ExtClrMsg) {
        debug!("route: uuid={} ringTtl={}", msg.uuid, msg.ring_ttl);
        if !msg.is_ring_ttl_set() && !self.rings.is_empty() {
            self.start_ring_msg(sdk, links, msg);
        } else {
            self.handle_ring_msg(sdk, links, msg);
        }
    }

    fn start_ring_msg(&mut self, sdk: &dyn NetworkManagerSdk, links: &LinkManager, msg: ExtClrMsg) {
        if self.stale_uuids.contains(&msg.uuid) {
            debug!("received additional copy of message uuid={}", msg.uuid);
            return;
        }
        self.add_stale(msg.uuid);
        self.send_to_rings(sdk, links, &msg);
    }

    /// Sends the message out on every local ring, stamping `ring_ttl` so it
    /// reads zero when the traversal comes back around to this node.
    fn send_to_rings(&self, sdk: &dyn NetworkManagerSdk, links: &LinkManager, msg: &ExtClrMsg) {
        if msg.is_ring_ttl_set() {
            warn!("attempted to stamp a second ring TTL, ignoring");
            return;
        }
        for (idx, ring) in self.rings.iter().enumerate() {
            if ring.next.is_empty() {
                // Blank slot: this node is not a member of ring idx.
                continue;
            }
            debug!(
                "sending along ring of length {} to {}",
                ring.length, ring.next
            );
            let mut ring_msg = msg.clone();
            ring_msg.ring_ttl = ring.length as i64 - 1;
            ring_msg.ring_idx = idx as i64;
            self.send_ext(sdk, links, &ring.next, &ring_msg);
        }
    }

    fn handle_ring_msg(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        mut msg: ExtClrMsg,
    ) {
        debug!("handleRingMsg: uuid={} ringTtl={}", msg.uuid, msg.ring_ttl);
        // Repeated uuids are not aborted here: redundant ring paths are
        // allowed. The uuid still goes stale so the same message arriving
        // from outside the committee is filtered.
        self.add_stale(msg.uuid);

        if msg.ring_ttl > 0 {
            // Continue the trip around the ring.
            msg.dec_ring_ttl();
            match self.ring_next(msg.ring_idx) {
                Some(next) => self.send_ext(sdk, links, &next, &msg),
                None => warn!(
                    "ring message for an empty ring index (idx={}), dropping uuid={}",
                    msg.ring_idx, msg.uuid
                ),
            }
            return;
        }

        if self.flooded_uuids.contains(&msg.uuid) {
            info!("received end-of-ring message we have already dealt with, ignoring");
            return;
        }
        self.add_flooded(msg.uuid);

        let dst_client = msg.clr.to.clone();
        if self.exit_clients.contains(&dst_client) {
            debug!("destination is in exitClients, forwarding to {}", dst_client);
            self.send_clr(sdk, links, &dst_client, &msg.as_clr_msg());
        } else if self.committee_clients.contains(&dst_client) && !self.rings.is_empty() {
            // Someone else in our committee exits to it; recirculate.
            debug!("destination is in committeeClients, forwarding around the ring");
            match self.ring_next(msg.ring_idx) {
                Some(next) => self.send_ext(sdk, links, &next, &msg),
                None => warn!(
                    "ring message for an empty ring index (idx={}), dropping uuid={}",
                    msg.ring_idx, msg.uuid
                ),
            }
        } else {
            self.forward_to_new_committees(sdk, links, &msg);
        }
    }

    /// Forwards to committees this node can reach that the message has not
    /// yet visited, capped by the flooding factor; when the cap cannot be
    /// met locally the end-of-ring message is additionally relayed so other
    /// ring members forward to their own reachable committees. That relay
    /// may push the aggregate send count past the flooding factor, which is
    /// intentional.
    fn forward_to_new_committees(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        msg: &ExtClrMsg,
    ) {
        let mut intercom = msg.clone();
        intercom.unset_ring_ttl();
        if !intercom.committees_visited.contains(&self.committee_name) {
            intercom.committees_visited.push(self.committee_name.clone());
        }
        intercom.committees_sent.clear();

        let mut intercom_dsts: Vec<String> = Vec::new();
        for (committee, members) in &self.reachable_committees {
            if intercom.committees_visited.contains(committee)
                || intercom.committees_sent.contains(committee)
            {
                continue;
            }
            if let Some(entry_point) = members.first() {
                if !intercom_dsts.contains(entry_point) {
                    intercom_dsts.push(entry_point.clone());
                }
                intercom.committees_sent.push(committee.clone());
            }
            if self.flooding_factor > FULL_FLOODING && intercom_dsts.len() >= self.flooding_factor
            {
                break;
            }
        }

        debug!("forwarding to {:?}", intercom_dsts);
        for dst in &intercom_dsts {
            self.send_ext(sdk, links, dst, &intercom);
        }

        if self.flooding_factor == FULL_FLOODING || intercom_dsts.len() < self.flooding_factor {
            debug!(
                "sent to {} other committees with floodingFactor {}, relaying on rings for \
                 additional sends",
                intercom_dsts.len(),
                self.flooding_factor
            );
            for ring in &self.rings {
                if !ring.next.is_empty() {
                    self.send_ext(sdk, links, &ring.next, msg);
                }
            }
        }
    }

    fn ring_next(&self, ring_idx: i64) -> Option<String> {
        self.rings
            .get(ring_idx as usize)
            .filter(|ring| !ring.next.is_empty())
            .map(|ring| ring.next.clone())
    }

    fn send_ext(
        &self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        dst_uuid: &str,
        msg: &ExtClrMsg,
    ) {
        debug!("sendMsg: to {}", dst_uuid);
        let text = format_ext_msg(msg);
        let _ = links.send_formatted_msg(sdk, dst_uuid, &text, msg.clr.trace_id, msg.clr.span_id);
    }

    fn send_clr(
        &self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        dst_uuid: &str,
        msg: &ClrMsg,
    ) {
        debug!("sendMsg: to {}", dst_uuid);
        let text = format_clr_msg(msg);
        let _ = links.send_formatted_msg(sdk, dst_uuid, &text, msg.trace_id, msg.span_id);
    }

    #[cfg(test)]
    pub fn is_stale(&self, uuid: i64) -> bool {
        self.stale_uuids.contains(&uuid)
    }
}
