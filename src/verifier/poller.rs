//! Polling of remote verification sessions until the verifier reaches a verdict.
//!
//! Each transaction is polled by its own task, so ticks for one transaction never overlap
//! while different transactions are polled independently. Without a timeout or attempt limit
//! a transaction is polled until a verdict arrives or the process exits.

use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{config::Config, core::status::VerificationStatus, error::ExchangeError};

/// Source of verification session status, one fetch per tick.
#[async_trait]
pub trait StatusSource: Debug {
    async fn fetch_status(&self, id: Uuid) -> Result<VerificationStatus, ExchangeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Terminal,
    Abandoned,
}

/// Why polling stopped without a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    Timeout,
    MaxAttempts,
    Cancelled,
}

/// Final result of polling one transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The first status carrying a verdict.
    Terminal(VerificationStatus),
    Abandoned(AbandonReason),
}

/// Bounds applied to every polled transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollLimits {
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
}

impl PollLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.poll_timeout(),
            max_attempts: config.poll_max_attempts,
        }
    }
}

/// Drives the `Idle -> Polling -> Terminal | Abandoned` state machine of each transaction.
///
/// # Warning
/// The state of every started transaction is kept for the lifetime of the poller, so that a
/// finished transaction cannot be polled again. Like
/// [MemoryStore](crate::verifier::session::MemoryStore), this grows by one entry per exchange;
/// long running processes should replace the poller periodically.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    source: Arc<dyn StatusSource + Send + Sync>,
    limits: PollLimits,
    states: Arc<Mutex<HashMap<Uuid, PollState>>>,
}

/// Receives the outcome of one polled transaction.
#[derive(Debug)]
pub struct PollHandle {
    id: Uuid,
    outcome: oneshot::Receiver<PollOutcome>,
    cancel: Option<oneshot::Sender<()>>,
}

impl PollHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop polling; the transaction becomes abandoned.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }

    /// Wait for the outcome. It is delivered exactly once.
    pub async fn outcome(self) -> PollOutcome {
        let Self { outcome, cancel, .. } = self;
        let outcome = outcome.await;
        drop(cancel);
        // The task only goes away without answering if the runtime shuts down.
        outcome.unwrap_or(PollOutcome::Abandoned(AbandonReason::Cancelled))
    }
}

impl StatusPoller {
    pub fn new(source: Arc<dyn StatusSource + Send + Sync>, limits: PollLimits) -> Self {
        Self {
            source,
            limits,
            states: Arc::default(),
        }
    }

    /// Current state of a transaction; `Idle` if polling never started.
    pub async fn state(&self, id: Uuid) -> PollState {
        self.states
            .lock()
            .await
            .get(&id)
            .copied()
            .unwrap_or(PollState::Idle)
    }

    /// Start polling a transaction every `interval`.
    ///
    /// A transaction is polled at most once; starting it again, even after it finished, fails
    /// with [ExchangeError::PollerAlreadyStarted].
    pub async fn start(&self, id: Uuid, interval: Duration) -> Result<PollHandle, ExchangeError> {
        {
            let mut states = self.states.lock().await;
            if states.contains_key(&id) {
                return Err(ExchangeError::PollerAlreadyStarted(id));
            }
            states.insert(id, PollState::Polling);
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = PollTask {
            id,
            interval,
            limits: self.limits,
            source: self.source.clone(),
            states: self.states.clone(),
        };
        tokio::spawn(async move {
            let outcome = task.run(cancel_rx).await;
            // Nobody may be waiting any more.
            let _ = outcome_tx.send(outcome);
        });
        info!(%id, ?interval, "started status polling");

        Ok(PollHandle {
            id,
            outcome: outcome_rx,
            cancel: Some(cancel_tx),
        })
    }
}

struct PollTask {
    id: Uuid,
    interval: Duration,
    limits: PollLimits,
    source: Arc<dyn StatusSource + Send + Sync>,
    states: Arc<Mutex<HashMap<Uuid, PollState>>>,
}

impl PollTask {
    async fn run(self, cancel: oneshot::Receiver<()>) -> PollOutcome {
        // A dropped handle is not a cancellation.
        let cancelled = async {
            if cancel.await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(cancelled);
        let expired = async {
            match self.limits.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);
        let mut attempts = 0u32;

        // The timeout and cancellation also interrupt a status request in flight.
        let outcome = loop {
            tokio::select! {
                biased;
                _ = &mut cancelled => break PollOutcome::Abandoned(AbandonReason::Cancelled),
                _ = &mut expired => break PollOutcome::Abandoned(AbandonReason::Timeout),
                _ = tokio::time::sleep(self.interval) => {}
            }

            if self.limits.max_attempts.is_some_and(|max| attempts >= max) {
                break PollOutcome::Abandoned(AbandonReason::MaxAttempts);
            }

            attempts += 1;
            let fetched = tokio::select! {
                biased;
                _ = &mut cancelled => break PollOutcome::Abandoned(AbandonReason::Cancelled),
                _ = &mut expired => break PollOutcome::Abandoned(AbandonReason::Timeout),
                fetched = self.source.fetch_status(self.id) => fetched,
            };
            match fetched {
                Ok(status) if status.is_terminal() => break PollOutcome::Terminal(status),
                Ok(_) => debug!(id = %self.id, attempts, "verification still pending"),
                Err(e) => warn!(id = %self.id, attempts, "status fetch failed: {e}"),
            }
        };

        let state = match &outcome {
            PollOutcome::Terminal(status) => {
                info!(id = %self.id, attempts, result = ?status.verification_result, "verification finished");
                PollState::Terminal
            }
            PollOutcome::Abandoned(reason) => {
                warn!(id = %self.id, attempts, ?reason, "abandoned status polling");
                PollState::Abandoned
            }
        };
        self.states.lock().await.insert(self.id, state);
        outcome
    }
}
