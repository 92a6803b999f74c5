// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Core of an anonymity-overlay exemplar.
//!
//! Two host-loaded plugins collaborate here: a network manager that performs
//! oblivious message routing across a peered overlay of committees, and a
//! comms plugin that carries the resulting sealed packages over a direct TCP
//! channel or an indirect HTTP-whiteboard channel. The host runtime is opaque
//! to this crate and reached only through the capability traits in [`sdk`].
//!
//! The [`config_gen`] module (and the `config_gen` binary) produces the
//! per-node configuration both plugins consume: committee membership, ring
//! traversal orders, channel role assignments and provisioned symmetric keys.

#![forbid(unsafe_code)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

pub mod comms;
pub mod config_gen;
pub mod messaging;
pub mod network_manager;
pub mod sdk;
pub mod types;

pub use types::errors::{Error, Result};
