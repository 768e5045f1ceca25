//! Read-only client for the blockchain data service.
//!
//! The service exposes header lookups (`GET <base>/top`,
//! `GET <base>/<height>`) and a forward-scanning batch endpoint
//! (`POST <sync-url>` with `{lastKnownBlockHashes, blockCount}`).

use crate::entities::{Block, BlockHeader};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors from the chain data service.
///
/// Every variant is transient from the worker's point of view: the
/// attempt is negative-acknowledged and retried on a later delivery.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("chain service returned status {status}")]
    Status { status: u16 },
}

/// Which header to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderRef {
    /// The current chain head.
    Top,
    /// The header at an exact height.
    Height(u64),
}

/// Read-only access to chain data, mockable for tests.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn header(&self, at: HeaderRef) -> Result<BlockHeader, ChainError>;

    async fn batch(
        &self,
        last_known_hashes: &[String],
        block_count: u64,
    ) -> Result<Vec<Block>, ChainError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest<'a> {
    last_known_block_hashes: &'a [String],
    block_count: u64,
}

/// reqwest-backed implementation against the HTTP surface of the chain
/// data service.
pub struct ChainClient {
    header_base_url: String,
    sync_url: String,
    http: reqwest::Client,
}

impl ChainClient {
    pub fn new(header_base_url: impl Into<String>, sync_url: impl Into<String>) -> Self {
        Self {
            header_base_url: header_base_url.into().trim_end_matches('/').to_string(),
            sync_url: sync_url.into(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn header_url(&self, at: HeaderRef) -> String {
        match at {
            HeaderRef::Top => format!("{}/top", self.header_base_url),
            HeaderRef::Height(height) => format!("{}/{}", self.header_base_url, height),
        }
    }
}

#[async_trait]
impl ChainSource for ChainClient {
    async fn header(&self, at: HeaderRef) -> Result<BlockHeader, ChainError> {
        let response = self.http.get(self.header_url(at)).send().await?;
        if !response.status().is_success() {
            return Err(ChainError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }

    async fn batch(
        &self,
        last_known_hashes: &[String],
        block_count: u64,
    ) -> Result<Vec<Block>, ChainError> {
        let response = self
            .http
            .post(&self.sync_url)
            .json(&BatchRequest {
                last_known_block_hashes: last_known_hashes,
                block_count,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChainError::Status {
                status: response.status().as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn header_urls_follow_the_service_surface() {
        let client = ChainClient::new("http://127.0.0.1:8070/block/", "http://127.0.0.1:8070/sync");
        assert_eq!(
            client.header_url(HeaderRef::Top),
            "http://127.0.0.1:8070/block/top"
        );
        assert_eq!(
            client.header_url(HeaderRef::Height(1000)),
            "http://127.0.0.1:8070/block/1000"
        );
    }

    #[test]
    fn batch_request_serializes_to_the_wire_shape() {
        let hashes = vec!["abc123".to_string()];
        let body = BatchRequest {
            last_known_block_hashes: &hashes,
            block_count: 101,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["lastKnownBlockHashes"][0], "abc123");
        assert_eq!(value["blockCount"], 101);
    }

    #[test]
    fn batch_response_deserializes_blocks() {
        let json = r#"[
            {
                "height": 1001,
                "transactions": [
                    {
                        "publicKey": "aa",
                        "outputs": [
                            {"index": 0, "globalIndex": 5512, "amount": 120, "key": "bb"}
                        ]
                    }
                ]
            }
        ]"#;
        let blocks: Vec<Block> = serde_json::from_str(json).unwrap();
        assert_eq!(blocks[0].height, 1001);
        assert_eq!(blocks[0].transactions[0].outputs[0].global_index, 5512);
    }
}
