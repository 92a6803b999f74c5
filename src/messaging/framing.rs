// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::ext_msg::{ExtClrMsg, MsgType};
use super::ClrMsg;
use crate::types::errors::{Error, Result};
use sha2::{Digest, Sha256};

/// Token separator of the framed forms.
pub const DELIMITER: &str = "~~~";

const CLR_SENTINEL: &str = "clrMsg";
const EXT_SENTINEL: &str = "extClrMsg";
const CLR_TOKENS: usize = 7;
const EXT_TOKENS: usize = 13;

/// Frames a cleartext message as the 7-token form.
pub fn format_clr_msg(msg: &ClrMsg) -> String {
    [
        CLR_SENTINEL.to_string(),
        msg.msg.clone(),
        msg.from.clone(),
        msg.to.clone(),
        msg.time.to_string(),
        msg.nonce.to_string(),
        msg.amp_index.to_string(),
    ]
    .join(DELIMITER)
}

/// Frames an extended message as the 13-token form.
pub fn format_ext_msg(msg: &ExtClrMsg) -> String {
    // The committee lists are JSON so that empty and multi-entry lists frame
    // unambiguously inside the token.
    let visited =
        serde_json::to_string(&msg.committees_visited).unwrap_or_else(|_| "[]".to_string());
    let sent = serde_json::to_string(&msg.committees_sent).unwrap_or_else(|_| "[]".to_string());
    [
        EXT_SENTINEL.to_string(),
        msg.clr.msg.clone(),
        msg.clr.from.clone(),
        msg.clr.to.clone(),
        msg.clr.time.to_string(),
        msg.clr.nonce.to_string(),
        msg.clr.amp_index.to_string(),
        msg.uuid.to_string(),
        msg.ring_ttl.to_string(),
        msg.ring_idx.to_string(),
        msg.msg_type.as_i64().to_string(),
        visited,
        sent,
    ]
    .join(DELIMITER)
}

/// SHA-256 over the 7-token framing of the cleartext part.
///
/// Used for client-side dedup, so a given message hashes identically at its
/// origin and at every recipient regardless of accumulated routing metadata.
pub fn message_hash(msg: &ClrMsg) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(format_clr_msg(msg).as_bytes());
    hasher.finalize().into()
}

fn parse_i64(token: &str, field: &str) -> Result<i64> {
    token
        .parse::<i64>()
        .map_err(|_| Error::ParseError(format!("{} is not an integer: {:?}", field, token)))
}

/// Parses a framed message, accepting the 7- and 13-token forms.
///
/// A 7-token cleartext frame is promoted via [`ExtClrMsg::from_clr_msg`] so
/// the caller always receives a routable message. Any other token count is a
/// parse error.
pub fn parse_ext_msg(text: &str) -> Result<ExtClrMsg> {
    let tokens: Vec<&str> = text.split(DELIMITER).collect();
    match tokens.len() {
        CLR_TOKENS => {
            let clr = parse_clr_tokens(&tokens)?;
            Ok(ExtClrMsg::from_clr_msg(clr))
        }
        EXT_TOKENS => {
            let clr = parse_clr_tokens(&tokens)?;
            let committees_visited: Vec<String> = serde_json::from_str(tokens[11])
                .map_err(|err| Error::ParseError(format!("committeesVisited: {}", err)))?;
            let committees_sent: Vec<String> = serde_json::from_str(tokens[12])
                .map_err(|err| Error::ParseError(format!("committeesSent: {}", err)))?;
            Ok(ExtClrMsg {
                clr,
                uuid: parse_i64(tokens[7], "uuid")?,
                ring_ttl: parse_i64(tokens[8], "ringTtl")?,
                ring_idx: parse_i64(tokens[9], "ringIdx")?,
                msg_type: MsgType::from_i64(parse_i64(tokens[10], "msgType")?),
                committees_visited,
                committees_sent,
            })
        }
        n => Err(Error::ParseError(format!(
            "expected {} or {} tokens, got {}",
            CLR_TOKENS, EXT_TOKENS, n
        ))),
    }
}

fn parse_clr_tokens(tokens: &[&str]) -> Result<ClrMsg> {
    Ok(ClrMsg::new(
        tokens[1],
        tokens[2],
        tokens[3],
        parse_i64(tokens[4], "time")?,
        parse_i64(tokens[5], "nonce")?,
        parse_i64(tokens[6], "ampIndex")?,
    ))
}
