// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The indirect channel: a remote append-only whiteboard addressed by
//! `(host, port, hashtag)` as the transport. Senders post base64 blobs;
//! receivers poll for the backlog since their last index, so subscribers of
//! a hashtag observe every post in store order.

use super::direct::terminated;
use super::{CommsConn, ConnectionMap};
use crate::messaging::EncPkg;
use crate::sdk::{CommsSdk, Handle, PackageStatus, NULL_HANDLE};
use crate::types::{ConnectionId, ConnectionStatus, Error, LinkProperties, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// REST client for one whiteboard service.
pub(crate) struct Whiteboard {
    client: reqwest::Client,
    base: String,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    index: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    latest: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RangeResponse {
    data: Vec<String>,
    length: u64,
}

impl Whiteboard {
    pub fn new(hostname: &str, port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: format!("http://{}:{}", hostname, port),
        }
    }

    /// Appends a blob under `hashtag`. Success requires a 200/201 status and
    /// an `index` in the response body.
    pub async fn post(&self, hashtag: &str, data: &[u8]) -> Result<i64> {
        let url = format!("{}/post/{}", self.base, hashtag);
        let body = serde_json::json!({ "data": base64::encode(data) });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 && status != 201 {
            return Err(Error::Transport(format!("post returned status {}", status)));
        }
        let parsed: PostResponse = response
            .json()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        parsed
            .index
            .ok_or_else(|| Error::Transport("post response carried no index".to_string()))
    }

    /// Index of the next post under `hashtag`; zero when it cannot be
    /// fetched, so a fresh subscriber starts from the beginning.
    pub async fn latest(&self, hashtag: &str) -> u64 {
        let url = format!("{}/latest/{}", self.base, hashtag);
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().as_u16() == 200 => response,
            Ok(response) => {
                debug!(
                    "failed to get last post index, status = {}",
                    response.status()
                );
                return 0;
            }
            Err(err) => {
                debug!("failed to get last post index: {}", err);
                return 0;
            }
        };
        match response.json::<LatestResponse>().await {
            Ok(parsed) => parsed.latest,
            Err(err) => {
                debug!("failed to parse latest index: {}", err);
                0
            }
        }
    }

    /// Fetches every post from `oldest` to the tail. Returns the decoded
    /// blobs and the new latest index.
    pub async fn fetch_backlog(&self, hashtag: &str, oldest: u64) -> Result<(Vec<Vec<u8>>, u64)> {
        let url = format!("{}/get/{}/{}/-1", self.base, hashtag, oldest);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            if status > 200 && status < 300 {
                debug!("no new posts, status = {}", status);
                return Ok((Vec::new(), oldest));
            }
            return Err(Error::Transport(format!(
                "unexpected status fetching new posts: {}",
                status
            )));
        }

        let parsed: RangeResponse = response
            .json()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        let mut posts = Vec::with_capacity(parsed.data.len());
        for encoded in &parsed.data {
            let decoded = base64::decode(encoded)
                .map_err(|err| Error::Transport(format!("undecodable post: {}", err)))?;
            posts.push(decoded);
        }
        Ok((posts, parsed.length))
    }
}

/// Posts one package and reports its transport outcome.
pub(super) async fn post_package(
    sdk: Arc<dyn CommsSdk>,
    handle: Handle,
    hostname: String,
    port: u16,
    hashtag: String,
    data: Vec<u8>,
) {
    let whiteboard = Whiteboard::new(&hostname, port);
    match whiteboard.post(&hashtag, &data).await {
        Ok(index) => {
            debug!("posted package to {} at index {}", hashtag, index);
            let _ = sdk.on_package_status_changed(handle, PackageStatus::Sent, true);
        }
        Err(err) => {
            error!("failed to post package to {}: {}", hashtag, err);
            let _ = sdk.on_package_status_changed(handle, PackageStatus::FailedGeneric, true);
        }
    }
}

/// Poll loop of an indirect connection: recover the backlog since the
/// subscription point, deliver each post as a sealed package, sleep the
/// configured interval, repeat. Persistent errors close the connection.
pub(super) async fn poll_loop(
    sdk: Arc<dyn CommsSdk>,
    connections: ConnectionMap,
    conn: Arc<CommsConn>,
    handle: Handle,
    conn_id: ConnectionId,
    properties: LinkProperties,
) {
    let mut cancel_rx = conn.cancel_rx();
    let whiteboard = Whiteboard::new(&conn.profile.hostname, conn.profile.port);
    let hashtag = conn.profile.hashtag.clone();
    let interval = Duration::from_millis(conn.profile.check_frequency.max(1));

    let _ = sdk.on_connection_status_changed(
        handle,
        &conn_id,
        ConnectionStatus::Open,
        &properties,
        true,
    );

    let mut latest = tokio::select! {
        latest = whiteboard.latest(&hashtag) => latest,
        _ = terminated(&mut cancel_rx) => return,
    };

    loop {
        let fetched = tokio::select! {
            fetched = whiteboard.fetch_backlog(&hashtag, latest) => fetched,
            _ = terminated(&mut cancel_rx) => return,
        };

        let (posts, new_latest) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                error!("whiteboard poll error: {}", err);
                close_all_ids(&sdk, &connections, &conn, &properties);
                return;
            }
        };

        let expected = new_latest.saturating_sub(latest) as usize;
        if posts.len() < expected {
            error!(
                "expected {} posts but got {}. {} posts may have been lost",
                expected,
                posts.len(),
                expected - posts.len()
            );
        }
        latest = new_latest;

        for post in posts {
            let response = sdk.receive_enc_pkg(EncPkg::from_raw(post), &conn.ids(), true);
            if !response.is_ok() {
                error!("host refused received package: {:?}", response.status);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = terminated(&mut cancel_rx) => return,
        }
    }
}

fn close_all_ids(
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

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn range_body_parses_with_defaults() -> Result<()> {
        let parsed: RangeResponse =
            serde_json::from_str(r#"{"data": ["aGVsbG8="], "length": 3, "timestamp": "t"}"#)?;
        assert_eq!(parsed.data.len(), 1);
        assert_eq!(parsed.length, 3);
        assert_eq!(base64::decode(&parsed.data[0])?, b"hello");

        let empty: RangeResponse = serde_json::from_str("{}")?;
        assert!(empty.data.is_empty());
        assert_eq!(empty.length, 0);
        Ok(())
    }

    #[test]
    fn post_response_requires_an_index() -> Result<()> {
        let with: PostResponse = serde_json::from_str(r#"{"index": 5, "timestamp": "t"}"#)?;
        assert_eq!(with.index, Some(5));
        let without: PostResponse = serde_json::from_str(r#"{"timestamp": "t"}"#)?;
        assert_eq!(without.index, None);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_whiteboard_fails_post_and_zeroes_latest() {
        // Port 9 (discard) is reliably closed on loopback.
        let whiteboard = Whiteboard::new("127.0.0.1", 9);
        assert!(whiteboard.post("tag", b"x").await.is_err());
        assert_eq!(whiteboard.latest("tag").await, 0);
        assert!(whiteboard.fetch_backlog("tag", 0).await.is_err());
    }
}
