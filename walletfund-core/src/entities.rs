//! Wire-level data model for the funding pipeline.
//!
//! All progress state for a request travels inside the message payload;
//! nothing here references external storage by id. Field names follow
//! the JSON schemas carried on the queues (camelCase).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// View-key half of the wallet key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewKey {
    pub private_key: String,
}

/// Spend-key half of the wallet key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendKeys {
    pub public_key: String,
    pub private_key: String,
}

/// Destination wallet: address plus the keys the output matcher needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletKeys {
    pub address: String,
    pub view: ViewKey,
    pub spend: SpendKeys,
}

/// The caller's funding request.
///
/// Only `amount` is interpreted by the pipeline; any other caller
/// fields are carried through untouched so the completion event can
/// echo the original request object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRequest {
    /// Target amount in the smallest currency unit.
    pub amount: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The durable unit of work consumed from the scan queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub wallet: WalletKeys,
    pub request: FundingRequest,
    /// Block height at which the request was created.
    pub scan_height: u64,
    /// Block height deadline after which scanning stops looking for
    /// new progress.
    pub max_height: u64,
    /// Populated only when forwarding a funded or partially funded
    /// payload downstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funds: Option<Vec<MatchedOutput>>,
}

/// Block header as served by the chain data service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
}

/// One transaction output as it appears in a block batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutput {
    pub index: u32,
    pub global_index: u64,
    pub amount: u64,
    pub key: String,
}

/// A transaction inside a block batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTransaction {
    pub public_key: String,
    pub outputs: Vec<TransactionOutput>,
}

/// One block of a forward-scanning batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    pub transactions: Vec<BlockTransaction>,
}

/// An output determined to belong to the target wallet, annotated with
/// the per-output spend key needed to later spend it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedOutput {
    pub index: u32,
    pub global_index: u64,
    pub amount: u64,
    pub key: String,
    pub private_ephemeral: String,
}

/// Terminal outcome codes published on the public bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum CompletionStatus {
    Funded,
    PartiallyFunded,
    TimedOut,
}

impl From<CompletionStatus> for u16 {
    fn from(status: CompletionStatus) -> u16 {
        match status {
            CompletionStatus::Funded => 100,
            CompletionStatus::PartiallyFunded => 206,
            CompletionStatus::TimedOut => 408,
        }
    }
}

impl TryFrom<u16> for CompletionStatus {
    type Error = String;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            100 => Ok(CompletionStatus::Funded),
            206 => Ok(CompletionStatus::PartiallyFunded),
            408 => Ok(CompletionStatus::TimedOut),
            other => Err(format!("unknown completion status code {other}")),
        }
    }
}

/// Event published on the public "complete" queue for every terminal
/// decision, the sole channel visible to the original requester.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub address: String,
    pub status: CompletionStatus,
    /// Echo of the original caller request object.
    pub request: FundingRequest,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn scan_request_round_trips_with_caller_fields() {
        let json = r#"{
            "wallet": {
                "address": "TRTLv3addr",
                "view": {"privateKey": "aa"},
                "spend": {"publicKey": "bb", "privateKey": "cc"}
            },
            "request": {"amount": 100, "callerId": "abc-123", "atomicUnits": true},
            "scanHeight": 1000,
            "maxHeight": 1500
        }"#;

        let request: ScanRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.request.amount, 100);
        assert_eq!(request.scan_height, 1000);
        assert_eq!(request.max_height, 1500);
        assert!(request.funds.is_none());
        assert_eq!(
            request.request.extra.get("callerId").unwrap(),
            &Value::from("abc-123")
        );

        let serialized = serde_json::to_value(&request).unwrap();
        assert_eq!(serialized["scanHeight"], 1000);
        assert_eq!(serialized["request"]["callerId"], "abc-123");
        // Absent funds must not serialize at all.
        assert!(serialized.get("funds").is_none());
    }

    #[test]
    fn completion_status_serializes_as_bare_code() {
        assert_eq!(
            serde_json::to_value(CompletionStatus::Funded).unwrap(),
            Value::from(100)
        );
        assert_eq!(
            serde_json::to_value(CompletionStatus::PartiallyFunded).unwrap(),
            Value::from(206)
        );
        assert_eq!(
            serde_json::to_value(CompletionStatus::TimedOut).unwrap(),
            Value::from(408)
        );

        let status: CompletionStatus = serde_json::from_str("408").unwrap();
        assert_eq!(status, CompletionStatus::TimedOut);
        assert!(serde_json::from_str::<CompletionStatus>("200").is_err());
    }

    #[test]
    fn matched_output_uses_camel_case_fields() {
        let output = MatchedOutput {
            index: 2,
            global_index: 5512,
            amount: 120,
            key: "dd".to_string(),
            private_ephemeral: "ee".to_string(),
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["globalIndex"], 5512);
        assert_eq!(value["privateEphemeral"], "ee");
    }
}
