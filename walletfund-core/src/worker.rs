//! ScanWorker: the per-message scan/decide/retry loop.
//!
//! Each worker consumes exactly one scan delivery at a time, recomputes
//! the request's progress from the chain data visible right now plus
//! the payload itself, and resolves the delivery: terminal outcomes
//! publish their emissions and then ack, everything else nacks for a
//! future redelivery. No state survives between attempts outside the
//! message payload.

use crate::chain::{ChainError, ChainSource, HeaderRef};
use crate::entities::{CompletionEvent, CompletionStatus, MatchedOutput, ScanRequest};
use crate::matcher::{MatcherError, OutputMatcher};
use crate::policy::{Outcome, ScanPolicy, decide};
use crate::queue::{Delivery, MessageQueue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause before a non-terminal attempt's message becomes consumable
/// again. Keeps a lone pending request from spinning against the chain
/// service.
pub const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Failures inside one attempt.
#[derive(Debug, Error)]
enum AttemptError {
    /// Transient; the delivery is nacked and retried later.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Request-fatal; the payload would fail identically on every
    /// redelivery, so it is dead-lettered.
    #[error(transparent)]
    Matcher(#[from] MatcherError),
}

/// Result of the fetch-and-match phase.
enum Attempt {
    /// No blocks exist past `scanHeight`; no progress is possible.
    NoNewBlocks,
    Decided(Outcome),
}

/// Queue handles one worker context operates on. `scan`, `send` and
/// `dead_letter` live on the private bus, `complete` on the public bus.
pub struct WorkerQueues {
    pub scan: MessageQueue,
    pub send: MessageQueue,
    pub complete: MessageQueue,
    pub dead_letter: MessageQueue,
}

/// One scan worker execution context.
pub struct ScanWorker<C, M> {
    id: usize,
    chain: Arc<C>,
    matcher: Arc<M>,
    policy: ScanPolicy,
    queues: WorkerQueues,
}

impl<C: ChainSource, M: OutputMatcher> ScanWorker<C, M> {
    pub fn new(
        id: usize,
        chain: Arc<C>,
        matcher: Arc<M>,
        policy: ScanPolicy,
        queues: WorkerQueues,
    ) -> Self {
        Self {
            id,
            chain,
            matcher,
            policy,
            queues,
        }
    }

    /// Run until shutdown. One message is processed fully, through its
    /// ack or nack, before the next is accepted.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(worker = self.id, "ScanWorker started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(worker = self.id, "ScanWorker received shutdown signal");
                        break;
                    }
                }

                delivery = self.queues.scan.consume() => {
                    self.process_delivery(delivery).await;
                }
            }
        }

        info!(worker = self.id, "ScanWorker shutdown complete");
    }

    /// Evaluate one delivery and resolve it with exactly one ack or nack.
    pub async fn process_delivery(&self, delivery: Delivery) {
        let request: ScanRequest = match serde_json::from_slice(delivery.payload()) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    worker = self.id,
                    error = %e,
                    "Dead-lettering unparsable scan message"
                );
                self.dead_letter(delivery);
                return;
            }
        };

        match self.attempt(&request).await {
            Ok(Attempt::NoNewBlocks) => {
                debug!(
                    worker = self.id,
                    address = %request.wallet.address,
                    scan_height = request.scan_height,
                    "No new blocks since the request was created, requeueing"
                );
                delivery.nack_after(REDELIVERY_DELAY);
            }
            Ok(Attempt::Decided(outcome)) => self.resolve(delivery, request, outcome),
            Err(AttemptError::Chain(e)) => {
                debug!(
                    worker = self.id,
                    address = %request.wallet.address,
                    error = %e,
                    "Chain fetch failed, requeueing"
                );
                delivery.nack_after(REDELIVERY_DELAY);
            }
            Err(AttemptError::Matcher(e)) => {
                warn!(
                    worker = self.id,
                    address = %request.wallet.address,
                    error = %e,
                    "Dead-lettering scan message with invalid key material"
                );
                self.dead_letter(delivery);
            }
        }
    }

    /// Fetch the chain context, match outputs, and apply the policy.
    async fn attempt(&self, request: &ScanRequest) -> Result<Attempt, AttemptError> {
        let top = self.chain.header(HeaderRef::Top).await?;
        if top.height == request.scan_height {
            return Ok(Attempt::NoNewBlocks);
        }

        let start = self
            .chain
            .header(HeaderRef::Height(request.scan_height))
            .await?;
        let batch = self
            .chain
            .batch(
                std::slice::from_ref(&start.hash),
                self.policy.maximum_scan_blocks + 1,
            )
            .await?;

        let mut wallet_outputs: Vec<MatchedOutput> = Vec::new();
        let mut funds_found_in_block: Option<u64> = None;

        for block in &batch {
            for transaction in &block.transactions {
                let owned = self.matcher.owned_outputs(
                    &transaction.public_key,
                    &transaction.outputs,
                    &request.wallet,
                )?;
                if !owned.is_empty() {
                    funds_found_in_block =
                        Some(funds_found_in_block.map_or(block.height, |h| h.max(block.height)));
                    wallet_outputs.extend(owned);
                }
            }
        }

        Ok(Attempt::Decided(decide(
            request,
            top.height,
            wallet_outputs,
            funds_found_in_block,
            &self.policy,
        )))
    }

    fn resolve(&self, delivery: Delivery, request: ScanRequest, outcome: Outcome) {
        let address = request.wallet.address.clone();
        match outcome {
            Outcome::Funded { funds, total } => {
                info!(worker = self.id, %address, total, "Request fully funded");
                self.finish(delivery, request, funds, CompletionStatus::Funded, true);
            }
            Outcome::PartiallyFunded { funds, total } => {
                info!(
                    worker = self.id,
                    %address,
                    total,
                    "Deadline passed with partial funds"
                );
                self.finish(
                    delivery,
                    request,
                    funds,
                    CompletionStatus::PartiallyFunded,
                    true,
                );
            }
            Outcome::TimedOut => {
                info!(
                    worker = self.id,
                    %address,
                    "Deadline passed with no funds found"
                );
                self.finish(delivery, request, Vec::new(), CompletionStatus::TimedOut, false);
            }
            Outcome::PendingConfirmation {
                total,
                confirmations,
            } => {
                debug!(
                    worker = self.id,
                    %address,
                    total,
                    confirmations,
                    "Funds found, waiting for confirmations"
                );
                delivery.nack_after(REDELIVERY_DELAY);
            }
            Outcome::PendingMore { total } => {
                debug!(
                    worker = self.id,
                    %address,
                    total,
                    "Funds below target, retrying"
                );
                delivery.nack_after(REDELIVERY_DELAY);
            }
            Outcome::PendingNone => {
                debug!(worker = self.id, %address, "No funds found yet, retrying");
                delivery.nack_after(REDELIVERY_DELAY);
            }
        }
    }

    /// Publish the terminal emissions, then ack.
    ///
    /// Every emission is enqueued before the originating message is
    /// removed: a crash in between redelivers the request instead of
    /// losing the decision.
    fn finish(
        &self,
        delivery: Delivery,
        mut request: ScanRequest,
        funds: Vec<MatchedOutput>,
        status: CompletionStatus,
        forward: bool,
    ) {
        let event = CompletionEvent {
            address: request.wallet.address.clone(),
            status,
            request: request.request.clone(),
        };
        match serde_json::to_vec(&event) {
            Ok(bytes) => self.queues.complete.publish(bytes),
            Err(e) => {
                error!(
                    worker = self.id,
                    error = %e,
                    "Failed to encode completion event, requeueing"
                );
                delivery.nack();
                return;
            }
        }

        if forward {
            request.funds = Some(funds);
            match serde_json::to_vec(&request) {
                Ok(bytes) => self.queues.send.publish(bytes),
                Err(e) => {
                    error!(
                        worker = self.id,
                        error = %e,
                        "Failed to encode forwarded payload, requeueing"
                    );
                    delivery.nack();
                    return;
                }
            }
        }

        delivery.ack();
    }

    fn dead_letter(&self, delivery: Delivery) {
        self.queues.dead_letter.publish(delivery.payload().to_vec());
        delivery.ack();
    }
}
