// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! End-to-end routing scenarios over mocked hosts: several plugin instances
//! wired together by ferrying every sealed package to every other node, so
//! dedup and not-for-me drops are exercised exactly as on a real overlay.

use super::*;
use crate::messaging::{crypto, format_clr_msg, message_hash, ExtClrMsg};
use crate::sdk::mock::MockSdk;
use crate::sdk::{NetworkManagerSdk, PluginConfig};
use crate::types::{
    ChannelProperties, ChannelRole, ConnectionType, LinkDirection, LinkPropertyPair,
    LinkPropertySet, LinkSide,
};

const C1: &str = "race-client-00001";
const C2: &str = "race-client-00002";
const S1: &str = "race-server-00001";
const S2: &str = "race-server-00002";

fn key_for(uuid: &str) -> Vec<u8> {
    let mut key = vec![0u8; 32];
    for (i, &b) in uuid.as_bytes().iter().take(32).enumerate() {
        key[i] = b;
    }
    key
}

fn personas_json(entries: &[(&str, &str)]) -> String {
    let body: Vec<String> = entries
        .iter()
        .map(|(uuid, persona_type)| {
            format!(
                r#"{{"displayName":"{u}","raceUuid":"{u}","publicKey":"0","personaType":"{t}","aesKeyFile":"./{u}.aes"}}"#,
                u = uuid,
                t = persona_type
            )
        })
        .collect();
    format!("[{}]", body.join(","))
}

struct TestNode {
    sdk: Arc<MockSdk>,
    plugin: NetworkManager,
}

fn make_node(uuid: &str, all: &[(&str, &str)], config: &str, server: bool) -> TestNode {
    let sdk = Arc::new(MockSdk::new(uuid));
    sdk.add_file("personas/race-personas.json", personas_json(all).as_bytes());
    for (u, _) in all {
        sdk.add_file(&format!("personas/{}.aes", u), &key_for(u));
    }
    sdk.add_file("config.json", config.as_bytes());

    let dyn_sdk: Arc<dyn NetworkManagerSdk> = sdk.clone();
    let plugin = if server {
        NetworkManager::new_server(dyn_sdk)
    } else {
        NetworkManager::new_client(dyn_sdk)
    };
    assert_eq!(plugin.init(&PluginConfig::default()), PluginResponse::Ok);
    TestNode { sdk, plugin }
}

fn send_props() -> LinkProperties {
    LinkProperties {
        link_type: LinkType::Send,
        connection_type: ConnectionType::Indirect,
        expected: LinkPropertyPair {
            send: LinkPropertySet {
                bandwidth_bps: 1000,
                ..LinkPropertySet::default()
            },
            receive: LinkPropertySet::default(),
        },
        ..LinkProperties::default()
    }
}

/// Ferries every captured outbound package to every other node until the
/// overlay goes quiet. Packages not sealed to a node drop silently there.
fn pump(nodes: &[&TestNode]) {
    loop {
        let mut delivered = false;
        for node in nodes {
            for sent in node.sdk.take_sent_packages() {
                delivered = true;
                for other in nodes {
                    if !std::ptr::eq(*other, *node) {
                        let _ = other.plugin.process_enc_pkg(
                            0,
                            &sent.pkg,
                            &["test-conn".to_string()],
                        );
                    }
                }
            }
        }
        if !delivered {
            break;
        }
    }
}

fn two_server_committee() -> (TestNode, TestNode, TestNode, TestNode) {
    let all = [(C1, "client"), (C2, "client"), (S1, "server"), (S2, "server")];

    let c1 = make_node(
        C1,
        &all,
        &format!(r#"{{"entranceCommittee":["{S1}"],"exitCommittee":["{S1}"]}}"#, S1 = S1),
        false,
    );
    let c2 = make_node(
        C2,
        &all,
        &format!(r#"{{"entranceCommittee":["{S2}"],"exitCommittee":["{S2}"]}}"#, S2 = S2),
        false,
    );
    let s1 = make_node(
        S1,
        &all,
        &format!(
            r#"{{
                "committeeName": "committee-0",
                "exitClients": ["{C1}"],
                "committeeClients": ["{C1}", "{C2}"],
                "reachableCommittees": {{}},
                "rings": [{{"next": "{S2}", "length": 2}}],
                "floodingFactor": 2
            }}"#,
            C1 = C1,
            C2 = C2,
            S2 = S2
        ),
        true,
    );
    let s2 = make_node(
        S2,
        &all,
        &format!(
            r#"{{
                "committeeName": "committee-0",
                "exitClients": ["{C2}"],
                "committeeClients": ["{C1}", "{C2}"],
                "reachableCommittees": {{}},
                "rings": [{{"next": "{S1}", "length": 2}}],
                "floodingFactor": 2
            }}"#,
            C1 = C1,
            C2 = C2,
            S1 = S1
        ),
        true,
    );

    c1.plugin.test_register_send_connection(S1, "c1->s1", send_props());
    c2.plugin.test_register_send_connection(S2, "c2->s2", send_props());
    s1.plugin.test_register_send_connection(S2, "s1->s2", send_props());
    s1.plugin.test_register_send_connection(C1, "s1->c1", send_props());
    s2.plugin.test_register_send_connection(S1, "s2->s1", send_props());
    s2.plugin.test_register_send_connection(C2, "s2->c2", send_props());

    (c1, c2, s1, s2)
}

#[test]
fn direct_round_trip_delivers_exactly_once() {
    let (c1, c2, s1, s2) = two_server_committee();

    let msg = ClrMsg::new("hi", C1, C2, 1, 42, 0);
    assert_eq!(c1.plugin.process_clr_msg(7, &msg), PluginResponse::Ok);
    pump(&[&c1, &c2, &s1, &s2]);

    let presented = c2.sdk.take_presented();
    assert_eq!(presented.len(), 1);
    assert_eq!(presented[0].msg, "hi");
    assert_eq!(presented[0].to, C2);

    let uuid = ExtClrMsg::from_clr_msg(msg.clone()).uuid;
    assert!(s1.plugin.test_server_is_stale(uuid));
    assert!(s2.plugin.test_server_is_stale(uuid));

    let hash = message_hash(&msg);
    assert!(c1.plugin.test_client_has_seen(&hash));
    assert!(c2.plugin.test_client_has_seen(&hash));

    // Nothing came back to the sender.
    assert!(c1.sdk.take_presented().is_empty());
}

#[test]
fn resending_an_identical_message_is_refused() {
    let (c1, c2, s1, s2) = two_server_committee();

    let msg = ClrMsg::new("hi", C1, C2, 1, 42, 0);
    assert_eq!(c1.plugin.process_clr_msg(7, &msg), PluginResponse::Ok);
    pump(&[&c1, &c2, &s1, &s2]);
    let _ = c2.sdk.take_presented();

    assert_eq!(c1.plugin.process_clr_msg(8, &msg), PluginResponse::Error);
}

#[test]
fn replayed_package_is_delivered_once() {
    let all = [(C1, "client"), (C2, "client")];
    let c2 = make_node(
        C2,
        &all,
        r#"{"entranceCommittee":[],"exitCommittee":[]}"#,
        false,
    );

    let msg = ClrMsg::new("hi", C1, C2, 1, 42, 0);
    let sealed = crypto::seal(format_clr_msg(&msg).as_bytes(), &key_for(C2)).expect("seal");
    let pkg = EncPkg::from_raw(sealed);

    for _ in 0..3 {
        assert_eq!(
            c2.plugin.process_enc_pkg(0, &pkg, &["test-conn".to_string()]),
            PluginResponse::Ok
        );
    }
    assert_eq!(c2.sdk.take_presented().len(), 1);
}

#[test]
fn servers_refuse_cleartext_input() {
    let (_, _, s1, _) = two_server_committee();
    let msg = ClrMsg::new("hi", C1, C2, 1, 42, 0);
    assert_eq!(s1.plugin.process_clr_msg(7, &msg), PluginResponse::Error);
}

#[test]
fn flood_cap_holds_while_delivery_succeeds() {
    // Three committees X/Y/Z, one server each, fully reachable, cap 1.
    const SX: &str = "race-server-000x";
    const SY: &str = "race-server-000y";
    const SZ: &str = "race-server-000z";
    const CX: &str = "race-client-000x";
    const CZ: &str = "race-client-000z";
    let all = [
        (CX, "client"),
        (CZ, "client"),
        (SX, "server"),
        (SY, "server"),
        (SZ, "server"),
    ];

    let server_config = |name: &str, exit: &str, reach: &[(&str, &str)]| {
        let reachable: Vec<String> = reach
            .iter()
            .map(|(committee, member)| format!(r#""{}": ["{}"]"#, committee, member))
            .collect();
        format!(
            r#"{{
                "committeeName": "{name}",
                "exitClients": [{exit}],
                "committeeClients": [],
                "reachableCommittees": {{{reach}}},
                "rings": [],
                "floodingFactor": 1
            }}"#,
            name = name,
            exit = exit,
            reach = reachable.join(",")
        )
    };

    let cx = make_node(
        CX,
        &all,
        &format!(r#"{{"entranceCommittee":["{SX}"],"exitCommittee":["{SX}"]}}"#, SX = SX),
        false,
    );
    let cz = make_node(
        CZ,
        &all,
        &format!(r#"{{"entranceCommittee":["{SZ}"],"exitCommittee":["{SZ}"]}}"#, SZ = SZ),
        false,
    );
    let sx = make_node(
        SX,
        &all,
        &server_config(
            "committee-x",
            &format!(r#""{}""#, CX),
            &[("committee-y", SY), ("committee-z", SZ)],
        ),
        true,
    );
    let sy = make_node(
        SY,
        &all,
        &server_config("committee-y", "", &[("committee-x", SX), ("committee-z", SZ)]),
        true,
    );
    let sz = make_node(
        SZ,
        &all,
        &server_config(
            "committee-z",
            &format!(r#""{}""#, CZ),
            &[("committee-x", SX), ("committee-y", SY)],
        ),
        true,
    );

    cx.plugin.test_register_send_connection(SX, "cx->sx", send_props());
    for (node, peers) in &[
        (&sx, [SY, SZ]),
        (&sy, [SX, SZ]),
        (&sz, [SX, SY]),
    ] {
        for peer in peers {
            node.plugin
                .test_register_send_connection(peer, &format!("to-{}", peer), send_props());
        }
    }
    sz.plugin.test_register_send_connection(CZ, "sz->cz", send_props());

    let msg = ClrMsg::new("flood", CX, CZ, 1, 1, 0);
    assert_eq!(cx.plugin.process_clr_msg(1, &msg), PluginResponse::Ok);

    // X forwards once under the cap; the message still reaches Z.
    let from_cx = cx.sdk.take_sent_packages();
    assert_eq!(from_cx.len(), 1);
    for sent in from_cx {
        let _ = sx
            .plugin
            .process_enc_pkg(0, &sent.pkg, &["test-conn".to_string()]);
    }
    let from_sx = sx.sdk.take_sent_packages();
    assert_eq!(from_sx.len(), 1, "flooding factor caps X at one forward");

    for sent in from_sx {
        for node in &[&cx, &cz, &sy, &sz] {
            let _ = node
                .plugin
                .process_enc_pkg(0, &sent.pkg, &["test-conn".to_string()]);
        }
    }
    pump(&[&cx, &cz, &sx, &sy, &sz]);

    assert_eq!(cz.sdk.take_presented().len(), 1);
}

#[test]
fn wizard_negotiates_one_link_per_request() {
    const A: &str = "race-client-000a";
    const B: &str = "race-client-000b";
    let all = [(A, "client"), (B, "client")];
    let empty = r#"{"entranceCommittee":[],"exitCommittee":[]}"#;

    let role = ChannelRole {
        role_name: "default".to_string(),
        link_side: LinkSide::Both,
        ..ChannelRole::default()
    };
    let channel = ChannelProperties {
        channel_gid: "twoSixIndirect".to_string(),
        connection_type: ConnectionType::Indirect,
        link_direction: LinkDirection::Bidi,
        max_links: 2,
        roles: vec![role.clone()],
        current_role: role,
        ..ChannelProperties::default()
    };

    let a = make_node(A, &all, empty, false);
    let b = make_node(B, &all, empty, false);
    a.sdk.add_channel(channel.clone());
    b.sdk.add_channel(channel);

    // One existing send connection in each direction for control traffic.
    a.plugin.test_register_send_connection(B, "a->b", send_props());
    b.plugin.test_register_send_connection(A, "b->a", send_props());

    assert!(a.plugin.test_obtain_unicast_link(B, LinkType::Bidi));
    // getSupportedChannels → advertisement → replayed obtain.
    pump(&[&a, &b]);

    let created = {
        let state = a.sdk.state.lock().expect("mock state");
        assert_eq!(state.created_links.len(), 1, "exactly one createLink on A");
        state.created_links[0].clone()
    };
    assert_eq!(created.channel_gid, "twoSixIndirect");
    assert_eq!(created.personas, vec![B.to_string()]);
    assert!(b.sdk.state.lock().expect("mock state").created_links.is_empty());

    // The link comes up: A must hand the address to B, exactly once.
    let link_props = LinkProperties {
        link_type: LinkType::Bidi,
        connection_type: ConnectionType::Indirect,
        channel_gid: "twoSixIndirect".to_string(),
        link_address: r#"{"hashtag":"ab"}"#.to_string(),
        ..LinkProperties::default()
    };
    assert_eq!(
        a.plugin
            .on_link_status_changed(created.handle, "twoSixIndirect/LinkID_1", LinkStatus::Created, &link_props),
        PluginResponse::Ok
    );

    let outbound = a.sdk.take_sent_packages();
    assert_eq!(outbound.len(), 1, "one requestLoadLinkAddress to B");
    for sent in outbound {
        let _ = b
            .plugin
            .process_enc_pkg(0, &sent.pkg, &["test-conn".to_string()]);
    }

    let loaded = {
        let state = b.sdk.state.lock().expect("mock state");
        assert_eq!(state.loaded_addresses.len(), 1, "one loadLinkAddress on B");
        state.loaded_addresses[0].clone()
    };
    assert_eq!(loaded.channel_gid, "twoSixIndirect");
    assert_eq!(loaded.address, r#"{"hashtag":"ab"}"#);
    // B's own uuid was stripped from the persona list before loading.
    assert_eq!(loaded.personas, vec![A.to_string()]);
}
