// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Identity and transport property model shared by both plugins.

mod channel;
pub mod errors;
mod link;
mod persona;

pub use channel::{
    ChannelProperties, ChannelRole, ChannelStatus, ConnectionType, LinkDirection, LinkSide,
    SendType, TransmissionType,
};
pub use errors::{Error, Result};
pub use link::{
    ConnectionId, ConnectionStatus, LinkId, LinkProperties, LinkPropertyPair, LinkPropertySet,
    LinkStatus, LinkType,
};
pub use persona::{Persona, PersonaRecord, PersonaType};
