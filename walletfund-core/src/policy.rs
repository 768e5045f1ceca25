//! Priority-ordered decision policy for one scan attempt.
//!
//! A pure function of the request and the chain data visible at that
//! instant. Keeping it free of I/O makes every branch testable without
//! a broker or a chain service.

use crate::entities::{MatchedOutput, ScanRequest};

/// Tuning knobs the worker applies on every attempt.
#[derive(Debug, Clone, Copy)]
pub struct ScanPolicy {
    /// Blocks that must be mined on top of the block containing matched
    /// funds before they are treated as settled.
    pub confirmations_required: u64,
    /// Upper bound on blocks scanned per attempt; the batch request
    /// asks for `maximum_scan_blocks + 1` blocks.
    pub maximum_scan_blocks: u64,
}

/// The exactly-one-of-six result of evaluating an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Target amount reached with enough confirmations. Terminal.
    Funded {
        funds: Vec<MatchedOutput>,
        total: u64,
    },
    /// Target amount reached but the funds are not yet settled.
    /// Retried later.
    PendingConfirmation { total: u64, confirmations: u64 },
    /// Deadline passed with some settled funds below the target.
    /// Terminal.
    PartiallyFunded {
        funds: Vec<MatchedOutput>,
        total: u64,
    },
    /// Some funds found but nothing to act on yet. Retried later.
    PendingMore { total: u64 },
    /// Deadline passed with nothing found. Terminal.
    TimedOut,
    /// Nothing found, deadline still ahead. Retried later.
    PendingNone,
}

impl Outcome {
    /// Terminal outcomes consume the message; the rest requeue it.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Funded { .. } | Outcome::PartiallyFunded { .. } | Outcome::TimedOut
        )
    }
}

/// Evaluate one scan attempt.
///
/// `funds_found_in_block` is the highest block height in this attempt's
/// batch that contributed at least one match; confirmations are
/// `top_height - funds_found_in_block`.
///
/// Branch order matters: full funding with confirmations always wins
/// over a still-running deadline check, and the partial-at-deadline
/// branch is only evaluated once full funding is ruled out. A partial
/// amount past the deadline whose funds are not yet settled stays
/// `PendingMore` so the payout is only emitted once it is confirmed.
pub fn decide(
    request: &ScanRequest,
    top_height: u64,
    matched: Vec<MatchedOutput>,
    funds_found_in_block: Option<u64>,
    policy: &ScanPolicy,
) -> Outcome {
    if matched.is_empty() {
        return if top_height > request.max_height {
            Outcome::TimedOut
        } else {
            Outcome::PendingNone
        };
    }

    let total: u64 = matched.iter().map(|output| output.amount).sum();
    let confirmations = funds_found_in_block
        .map(|height| top_height.saturating_sub(height))
        .unwrap_or(0);

    if total >= request.request.amount {
        if confirmations >= policy.confirmations_required {
            Outcome::Funded {
                funds: matched,
                total,
            }
        } else {
            Outcome::PendingConfirmation {
                total,
                confirmations,
            }
        }
    } else if top_height > request.max_height && confirmations >= policy.confirmations_required {
        Outcome::PartiallyFunded {
            funds: matched,
            total,
        }
    } else {
        Outcome::PendingMore { total }
    }
}
