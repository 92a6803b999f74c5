// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::links::LinkManager;
use super::seen::SeenSet;
use super::tracker::ClearMessageTracker;
use crate::messaging::{crypto, format_clr_msg, message_hash, ClrMsg, EncPkg, ExtClrMsg};
use crate::sdk::{Handle, MessageStatus, NetworkManagerSdk, PackageStatus, NULL_HANDLE};
use crate::types::{Error, Result};
use tracing::{debug, error, info};

/// Client-role routing state: entrance/exit-committee fanout and receipt
/// dedup.
pub(crate) struct ClientState {
    /// Servers every outbound message is sealed to, one copy each.
    pub entrance_committee: Vec<String>,
    /// Servers that hold this client as an exit client.
    pub exit_committee: Vec<String>,
    seen: SeenSet<[u8; 32]>,
    tracker: ClearMessageTracker,
}

impl ClientState {
    pub fn new(
        entrance_committee: Vec<String>,
        exit_committee: Vec<String>,
        max_seen_messages: usize,
    ) -> Self {
        Self {
            entrance_committee,
            exit_committee,
            seen: SeenSet::new(max_seen_messages),
            tracker: ClearMessageTracker::default(),
        }
    }

    /// Routes an application cleartext message: seals one copy per entrance
    /// committee member and tracks the package handles under `handle`.
    pub fn process_clr_msg(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        links: &LinkManager,
        handle: Handle,
        msg: &ClrMsg,
    ) -> Result<()> {
        debug!(
            "processClrMsg: len={} from={} to={}",
            msg.msg.len(),
            msg.from,
            msg.to
        );

        if !links.personas.contains_key(&msg.to) {
            error!("{} is not a valid persona to send a message to", msg.to);
            return Err(Error::ConfigInvalid(format!("unknown recipient {}", msg.to)));
        }
        if msg.to == links.race_persona.uuid {
            info!("I am {}, nothing to send", msg.to);
            let _ = sdk.present_cleartext_message(msg.clone());
            return Ok(());
        }

        let framed = format_clr_msg(msg);
        let hash = message_hash(msg);
        if self.seen.contains(&hash) {
            error!(
                "new cleartext message {} is identical to a previously sent message",
                hex::encode(hash)
            );
            return Err(Error::DuplicateMessage);
        }
        self.seen.add(hash);

        let mut any_sent = false;
        for uuid in &self.entrance_committee {
            // One uniquely sealed package per entrance committee member.
            let persona = match links.persona(uuid) {
                Some(persona) => persona,
                None => {
                    error!("entrance committee member {} is not a known persona", uuid);
                    continue;
                }
            };
            let sealed = match crypto::seal(framed.as_bytes(), &persona.aes_key) {
                Ok(sealed) => sealed,
                Err(err) => {
                    error!("failed to seal message to {}: {}", uuid, err);
                    continue;
                }
            };
            let enc_handle =
                links.send_to(sdk, persona, EncPkg::new(msg.trace_id, msg.span_id, sealed), 0);
            if enc_handle != NULL_HANDLE {
                any_sent = true;
                self.tracker.track(enc_handle, handle);
            }
        }

        info!("done sending: any_sent={}", any_sent);
        if !any_sent {
            error!("no valid links to any entrance committee members found");
            return Err(Error::NoRoute);
        }
        Ok(())
    }

    /// Delivers a received client-typed message up to the host, at most once
    /// per message hash across all incoming copies.
    pub fn receive_client_msg(&mut self, sdk: &dyn NetworkManagerSdk, msg: &ExtClrMsg) {
        let clr = msg.as_clr_msg();
        let hash = message_hash(&clr);
        if self.seen.contains(&hash) {
            info!("package duplicate of one already seen, ignoring");
            return;
        }
        self.seen.add(hash);
        let _ = sdk.present_cleartext_message(clr);
    }

    /// Applies a package status update, reporting the owning message once
    /// its aggregate state is determined.
    pub fn package_status_changed(
        &mut self,
        sdk: &dyn NetworkManagerSdk,
        enc_handle: Handle,
        status: PackageStatus,
    ) {
        let (clr_handle, message_status) = self.tracker.update(enc_handle, status);
        if message_status != MessageStatus::Undef {
            let _ = sdk.on_message_status_changed(clr_handle, message_status);
        }
    }

    #[cfg(test)]
    pub fn has_seen(&self, hash: &[u8; 32]) -> bool {
        self.seen.contains(hash)
    }
}
