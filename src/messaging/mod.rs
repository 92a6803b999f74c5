// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Message model of the overlay: application cleartext, the routed extension
//! of it, the delimited wire framing and the AEAD sealing packages travel in.

pub mod crypto;
mod ext_msg;
mod framing;

pub use ext_msg::{ExtClrMsg, MsgType, UNSET_RING_TTL, UNSET_UUID};
pub use framing::{format_clr_msg, format_ext_msg, message_hash, parse_ext_msg, DELIMITER};

use bytes::Bytes;
use std::fmt::{self, Debug, Formatter};

/// Application-visible cleartext message.
///
/// `trace_id` and `span_id` are tracing correlation values carried alongside
/// the message; they never enter the framed form or the message hash.
#[derive(Clone, Default, PartialEq)]
pub struct ClrMsg {
    /// Message body.
    pub msg: String,
    /// Persona uuid of the sender.
    pub from: String,
    /// Persona uuid of the recipient.
    pub to: String,
    /// Time the message was sent.
    pub time: i64,
    /// Nonce differentiating otherwise identical messages.
    pub nonce: i64,
    /// Index into an amp sequence, zero for ordinary messages.
    pub amp_index: i64,
    /// Tracing correlation id.
    pub trace_id: u64,
    /// Tracing span id.
    pub span_id: u64,
}

impl ClrMsg {
    /// Creates a message with zeroed trace context.
    pub fn new(msg: &str, from: &str, to: &str, time: i64, nonce: i64, amp_index: i64) -> Self {
        Self {
            msg: msg.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            time,
            nonce,
            amp_index,
            trace_id: 0,
            span_id: 0,
        }
    }
}

impl Debug for ClrMsg {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        // Body contents stay out of logs.
        f.debug_struct("ClrMsg")
            .field("len", &self.msg.len())
            .field("from", &self.from)
            .field("to", &self.to)
            .field("time", &self.time)
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// An opaque sealed package as handed to and received from the comms layer.
#[derive(Clone, Default, PartialEq)]
pub struct EncPkg {
    /// Tracing correlation id carried next to the ciphertext.
    pub trace_id: u64,
    /// Tracing span id carried next to the ciphertext.
    pub span_id: u64,
    /// `nonce ‖ tag ‖ ciphertext` wire bytes.
    pub cipher_text: Bytes,
}

impl EncPkg {
    /// Package wrapping freshly sealed bytes.
    pub fn new(trace_id: u64, span_id: u64, cipher_text: Vec<u8>) -> Self {
        Self {
            trace_id,
            span_id,
            cipher_text: Bytes::from(cipher_text),
        }
    }

    /// Package reconstructed from raw wire bytes (no trace context).
    pub fn from_raw(data: Vec<u8>) -> Self {
        Self {
            trace_id: 0,
            span_id: 0,
            cipher_text: Bytes::from(data),
        }
    }

    /// The raw bytes a channel transfers.
    pub fn raw_data(&self) -> &[u8] {
        &self.cipher_text
    }
}

impl Debug for EncPkg {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("EncPkg")
            .field("cipher_len", &self.cipher_text.len())
            .finish()
    }
}
