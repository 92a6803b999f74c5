// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::result;
use thiserror::Error;

/// A specialised `Result` type for this crate.
pub type Result<T> = result::Result<T, Error>;

/// Main error type for the crate.
///
/// Recoverable errors are logged where they occur and translated into the
/// appropriate status code before they reach the host; nothing in this enum
/// is ever allowed to unwind across the plugin boundary.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A persisted config file is missing, malformed or inconsistent. Fatal at init.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// A sealed package did not authenticate under our key. Dropped silently.
    #[error("Package not addressed to this node")]
    NotForMe,
    /// Input to seal/open was too short to contain a nonce and tag.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// A delimited message failed to parse.
    #[error("Failed to parse message: {0}")]
    ParseError(String),
    /// A message hash or uuid was already present in the seen-set.
    #[error("Duplicate of an already-seen message")]
    DuplicateMessage,
    /// No send connection exists for any required recipient.
    #[error("No route to recipient")]
    NoRoute,
    /// A socket or HTTP transfer failed.
    #[error("Transport failure: {0}")]
    Transport(String),
    /// An operation was requested on a channel that is not AVAILABLE.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),
    /// The channel already carries its maximum number of links.
    #[error("Max links exceeded for channel: {0}")]
    MaxLinksExceeded(String),
    /// A required user input prompt was declined or timed out.
    #[error("Required user input was not provided")]
    UserInputTimeout,
    /// The host SDK refused a call.
    #[error("SDK call refused: {0}")]
    SdkRefused(String),
    /// Serialisation error.
    #[error("Serialisation error: {0}")]
    Serialisation(String),
    /// An identified persona is not present in the loaded persona set.
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),
    /// The dynamic port pool for direct links is exhausted.
    #[error("No more ports available for dynamically created links")]
    PortPoolExhausted,
    /// Failure in the config generator constraint solver.
    #[error("Config generation failed: {0}")]
    ConfigGen(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialisation(err.to_string())
    }
}
