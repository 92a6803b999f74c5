// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The direct channel: a TCP listener per receive link and a one-shot TCP
//! connection per send. No socket reuse; a transfer is the whole byte
//! stream up to EOF.

use super::{CommsConn, ConnectionMap};
use crate::messaging::EncPkg;
use crate::sdk::{CommsSdk, Handle, PackageStatus, NULL_HANDLE};
use crate::types::{ConnectionId, ConnectionStatus, LinkProperties};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error};

/// Waits until the terminate flag flips true.
pub(super) async fn terminated(cancel_rx: &mut watch::Receiver<bool>) {
    if *cancel_rx.borrow() {
        return;
    }
    while cancel_rx.changed().await.is_ok() {
        if *cancel_rx.borrow() {
            return;
        }
    }
    // Sender dropped: treat as termination.
}

/// Accept loop of a direct receive connection.
///
/// Binds the link's port, reports the connection open, then accepts one
/// socket at a time, reading to EOF and delivering the bytes as a sealed
/// package. On error every connection id attached to this connection is
/// removed and reported closed; a clean terminate leaves that to
/// `closeConnection`.
pub(super) async fn accept_loop(
    sdk: Arc<dyn CommsSdk>,
    connections: ConnectionMap,
    conn: Arc<CommsConn>,
    handle: Handle,
    conn_id: ConnectionId,
    properties: LinkProperties,
) {
    debug!("creating connection monitor for {}", conn.link_id);
    let mut cancel_rx = conn.cancel_rx();

    let listener = match TcpListener::bind(("0.0.0.0", conn.profile.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("direct connection monitor failed to bind: {}", err);
            fail_connection(&sdk, &connections, &conn, &properties);
            return;
        }
    };

    let _ = sdk.on_connection_status_changed(
        handle,
        &conn_id,
        ConnectionStatus::Open,
        &properties,
        true,
    );

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = terminated(&mut cancel_rx) => return,
        };

        let (mut stream, _) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("direct connection monitor accept error: {}", err);
                fail_connection(&sdk, &connections, &conn, &properties);
                return;
            }
        };

        let mut data = Vec::new();
        match stream.read_to_end(&mut data).await {
            Ok(_) => {
                let _ = sdk.receive_enc_pkg(EncPkg::from_raw(data), &conn.ids(), true);
            }
            Err(err) => {
                error!("direct connection monitor read error: {}", err);
                fail_connection(&sdk, &connections, &conn, &properties);
                return;
            }
        }
    }
}

/// Error-path teardown: drop every id of this connection from the table and
/// let the host know each of them closed.
fn fail_connection(
    sdk: &Arc<dyn CommsSdk>,
    connections: &ConnectionMap,
    conn: &Arc<CommsConn>,
    properties: &LinkProperties,
) {
    let ids = conn.ids();
    {
        let mut map = connections.lock().expect("connections map");
        for id in &ids {
            let _ = map.remove(id);
        }
    }
    for id in &ids {
        let _ = sdk.on_connection_status_changed(
            NULL_HANDLE,
            id,
            ConnectionStatus::Closed,
            properties,
            true,
        );
    }
}

/// One-shot direct send: connect, write everything, shut down, report.
pub(super) async fn send_oneshot(
    sdk: Arc<dyn CommsSdk>,
    handle: Handle,
    hostname: String,
    port: u16,
    data: Vec<u8>,
) {
    let mut stream = match TcpStream::connect((hostname.as_str(), port)).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(
                "sendPackage failed to connect to {}:{}: {}",
                hostname, port, err
            );
            let _ = sdk.on_package_status_changed(handle, PackageStatus::FailedGeneric, true);
            return;
        }
    };

    debug!("sendPackage: socket connected, sending data");
    let result = async {
        stream.write_all(&data).await?;
        stream.shutdown().await
    }
    .await;

    match result {
        Ok(()) => {
            debug!("sendPackage: data sent over socket");
            let _ = sdk.on_package_status_changed(handle, PackageStatus::Sent, true);
        }
        Err(err) => {
            error!("sendPackage failed to send over direct link: {}", err);
            let _ = sdk.on_package_status_changed(handle, PackageStatus::FailedGeneric, true);
        }
    }
}
