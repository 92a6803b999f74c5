// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Formatter};

/// The role a node plays in the overlay.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaType {
    /// Originates and receives application cleartext.
    Client,
    /// Routes sealed packages between committees; never originates cleartext.
    Server,
    /// A registry node; treated as a client for routing purposes.
    Registry,
}

impl PersonaType {
    /// Whether this persona is addressed like a client.
    pub fn is_client(self) -> bool {
        !matches!(self, PersonaType::Server)
    }
}

/// Stable identity of a node, immutable after load.
///
/// The symmetric key is provisioned out-of-band (`personas/<uuid>.aes`) and
/// is the only secret material in the system.
#[derive(Clone, Default, PartialEq)]
pub struct Persona {
    /// Overlay-wide unique identifier of this node.
    pub uuid: String,
    /// Human-readable name, for logs and user display only.
    pub display_name: String,
    /// Role of the node.
    pub persona_type: Option<PersonaType>,
    /// Public key placeholder carried in the persona file.
    pub public_key: String,
    /// 32-byte AES key used to seal packages addressed to this persona.
    pub aes_key: Vec<u8>,
}

impl Persona {
    /// Whether this persona carries a usable identity.
    pub fn is_set(&self) -> bool {
        !self.uuid.is_empty()
    }
}

impl Debug for Persona {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        // Key material stays out of logs.
        f.debug_struct("Persona")
            .field("uuid", &self.uuid)
            .field("display_name", &self.display_name)
            .field("persona_type", &self.persona_type)
            .finish()
    }
}

/// One entry of `personas/race-personas.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaRecord {
    /// Human-readable name.
    pub display_name: String,
    /// Node uuid.
    pub race_uuid: String,
    /// Public key placeholder.
    pub public_key: String,
    /// client / server / registry.
    pub persona_type: PersonaType,
    /// Path of the AES key file, relative to the personas directory.
    pub aes_key_file: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn persona_record_round_trip() -> Result<()> {
        let raw = r#"{
            "displayName": "Client 00001",
            "raceUuid": "race-client-00001",
            "publicKey": "00001",
            "personaType": "client",
            "aesKeyFile": "./race-client-00001.aes"
        }"#;
        let record: PersonaRecord = serde_json::from_str(raw)?;
        assert_eq!(record.race_uuid, "race-client-00001");
        assert_eq!(record.persona_type, PersonaType::Client);

        let reencoded = serde_json::to_string(&record)?;
        let record2: PersonaRecord = serde_json::from_str(&reencoded)?;
        assert_eq!(record.race_uuid, record2.race_uuid);
        assert_eq!(record.aes_key_file, record2.aes_key_file);
        Ok(())
    }

    #[test]
    fn registry_is_addressed_like_a_client() {
        assert!(PersonaType::Registry.is_client());
        assert!(PersonaType::Client.is_client());
        assert!(!PersonaType::Server.is_client());
    }
}
