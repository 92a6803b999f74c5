// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::ClrMsg;
use sha2::{Digest, Sha256};

/// Sentinel for a message uuid that has not been derived yet.
pub const UNSET_UUID: i64 = -1;

/// Sentinel for a ring TTL that has not been stamped yet.
pub const UNSET_RING_TTL: i64 = -1;

/// Payload discriminator of an extended message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MsgType {
    /// Default / undefined.
    Undef,
    /// Client-to-client message for humans.
    Client,
    /// Control-plane link negotiation payload.
    Links,
}

impl MsgType {
    /// Wire value in the framed form.
    pub fn as_i64(self) -> i64 {
        match self {
            MsgType::Undef => 0,
            MsgType::Client => 1,
            MsgType::Links => 2,
        }
    }

    /// Parses a wire value; anything unknown maps to `Undef`.
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => MsgType::Client,
            2 => MsgType::Links,
            _ => MsgType::Undef,
        }
    }
}

/// Cleartext message extended with the routing metadata servers act on.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtClrMsg {
    /// The application-visible part.
    pub clr: ClrMsg,
    /// 64-bit hash-derived identifier used for server-side dedup.
    pub uuid: i64,
    /// Hops left on the current ring, [`UNSET_RING_TTL`] before stamping.
    pub ring_ttl: i64,
    /// Index of the ring being traversed.
    pub ring_idx: i64,
    /// Payload discriminator.
    pub msg_type: MsgType,
    /// Committees this message has already been through.
    pub committees_visited: Vec<String>,
    /// Committees this message is already being sent to.
    pub committees_sent: Vec<String>,
}

impl ExtClrMsg {
    /// Wraps a cleartext message without deriving a uuid; used by the
    /// LinkWizard whose control messages are never ring-routed.
    pub fn control(clr: ClrMsg) -> Self {
        Self {
            clr,
            uuid: 0,
            ring_ttl: 0,
            ring_idx: 0,
            msg_type: MsgType::Links,
            committees_visited: Vec::new(),
            committees_sent: Vec::new(),
        }
    }

    /// Promotes a cleartext message into a routable one, deriving the uuid
    /// from the low 64 bits of SHA-256 over the concatenated fields. The
    /// reserved sentinel value remaps to 1.
    pub fn from_clr_msg(clr: ClrMsg) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(
            format!(
                "{}{}{}{}{}{}",
                clr.msg, clr.from, clr.to, clr.time, clr.nonce, clr.amp_index
            )
            .as_bytes(),
        );
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let mut uuid = i64::from_be_bytes(prefix);
        if uuid == UNSET_UUID {
            uuid = 1;
        }

        Self {
            clr,
            uuid,
            ring_ttl: UNSET_RING_TTL,
            ring_idx: 0,
            msg_type: MsgType::Client,
            committees_visited: Vec::new(),
            committees_sent: Vec::new(),
        }
    }

    /// Whether the uuid has been derived.
    pub fn is_uuid_set(&self) -> bool {
        self.uuid != UNSET_UUID
    }

    /// Whether the ring TTL has been stamped.
    pub fn is_ring_ttl_set(&self) -> bool {
        self.ring_ttl != UNSET_RING_TTL
    }

    /// Clears the ring TTL so the receiving committee starts fresh.
    pub fn unset_ring_ttl(&mut self) {
        self.ring_ttl = UNSET_RING_TTL;
    }

    /// Decrements the ring TTL, never below zero.
    pub fn dec_ring_ttl(&mut self) {
        if self.ring_ttl > 0 {
            self.ring_ttl -= 1;
        }
    }

    /// A copy of this message downgraded to its cleartext part.
    pub fn as_clr_msg(&self) -> ClrMsg {
        self.clr.clone()
    }
}
