//! Output-ownership matching.
//!
//! [`OutputMatcher`] is the seam for the cryptographic capability that
//! decides which outputs of a transaction belong to a wallet. It must
//! be a pure function of its inputs; the worker's statelessness
//! invariant depends on that.

use crate::entities::{MatchedOutput, TransactionOutput, WalletKeys};
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Errors from key-material parsing.
///
/// These are request-fatal rather than transient: the same payload will
/// fail the same way on every redelivery.
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("invalid {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },
}

/// Pure ownership test for transaction outputs.
pub trait OutputMatcher: Send + Sync {
    /// Return the subset of `outputs` owned by the wallet, each
    /// annotated with the key material needed downstream to spend it.
    fn owned_outputs(
        &self,
        tx_public_key: &str,
        outputs: &[TransactionOutput],
        wallet: &WalletKeys,
    ) -> Result<Vec<MatchedOutput>, MatcherError>;
}

/// CryptoNote view-key scanning.
///
/// For a transaction key `R` and wallet keys `(a, B, b)` the shared
/// derivation is `D = 8·a·R`. Output `i` belongs to the wallet when
/// `Hs(D ‖ varint(i))·G + B` equals the output key, and its one-time
/// spend key is `Hs(D ‖ varint(i)) + b`.
pub struct DerivationMatcher;

impl OutputMatcher for DerivationMatcher {
    fn owned_outputs(
        &self,
        tx_public_key: &str,
        outputs: &[TransactionOutput],
        wallet: &WalletKeys,
    ) -> Result<Vec<MatchedOutput>, MatcherError> {
        let tx_pub = parse_point("transaction public key", tx_public_key)?;
        let view_secret = parse_scalar("wallet view private key", &wallet.view.private_key)?;
        let spend_public = parse_point("wallet spend public key", &wallet.spend.public_key)?;
        let spend_secret = parse_scalar("wallet spend private key", &wallet.spend.private_key)?;

        let derivation = (tx_pub * view_secret).mul_by_cofactor();
        let derivation_bytes = derivation.compress().to_bytes();

        let mut owned = Vec::new();
        for output in outputs {
            // An output key we cannot even decode is somebody else's.
            let Some(key_bytes) = decode_key(&output.key) else {
                continue;
            };
            let scalar = derivation_scalar(&derivation_bytes, output.index);
            let candidate = EdwardsPoint::mul_base(&scalar) + spend_public;
            if candidate.compress().to_bytes() == key_bytes {
                owned.push(MatchedOutput {
                    index: output.index,
                    global_index: output.global_index,
                    amount: output.amount,
                    key: output.key.clone(),
                    private_ephemeral: hex::encode((scalar + spend_secret).to_bytes()),
                });
            }
        }
        Ok(owned)
    }
}

/// `Hs(derivation ‖ varint(index))` reduced to a scalar.
fn derivation_scalar(derivation: &[u8; 32], output_index: u32) -> Scalar {
    let mut hasher = Keccak256::new();
    hasher.update(derivation);
    hasher.update(varint(u64::from(output_index)));
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    Scalar::from_bytes_mod_order(bytes)
}

fn varint(mut value: u64) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(10);
    while value >= 0x80 {
        encoded.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    encoded.push(value as u8);
    encoded
}

fn decode_key(key: &str) -> Option<[u8; 32]> {
    hex::decode(key).ok()?.try_into().ok()
}

fn parse_bytes(field: &'static str, key: &str) -> Result<[u8; 32], MatcherError> {
    let bytes = hex::decode(key).map_err(|e| MatcherError::InvalidKey {
        field,
        reason: e.to_string(),
    })?;
    bytes.try_into().map_err(|_| MatcherError::InvalidKey {
        field,
        reason: "expected 32 bytes".to_string(),
    })
}

fn parse_scalar(field: &'static str, key: &str) -> Result<Scalar, MatcherError> {
    Option::<Scalar>::from(Scalar::from_canonical_bytes(parse_bytes(field, key)?)).ok_or(
        MatcherError::InvalidKey {
            field,
            reason: "not a canonical scalar".to_string(),
        },
    )
}

fn parse_point(field: &'static str, key: &str) -> Result<EdwardsPoint, MatcherError> {
    CompressedEdwardsY(parse_bytes(field, key)?)
        .decompress()
        .ok_or(MatcherError::InvalidKey {
            field,
            reason: "not a curve point".to_string(),
        })
}
