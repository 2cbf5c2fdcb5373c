//! Scripted behaviour shared by the mock service clients.

use crate::error::{AvatalkError, Result, ServiceFailure, Stage};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum Outcome<T> {
    Respond(T),
    Fail(ServiceFailure),
    Pending,
}

/// What a mock call does once invoked, plus counters for observing it.
#[derive(Debug, Clone)]
pub(crate) struct Script<T> {
    outcome: Outcome<T>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    cancellations: Arc<AtomicUsize>,
}

impl<T: Clone + Send + Sync> Script<T> {
    pub(crate) fn respond(value: T) -> Self {
        Self {
            outcome: Outcome::Respond(value),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
            cancellations: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn set_response(&mut self, value: T) {
        self.outcome = Outcome::Respond(value);
    }

    pub(crate) fn set_failure(&mut self, reason: ServiceFailure) {
        self.outcome = Outcome::Fail(reason);
    }

    pub(crate) fn set_pending(&mut self) {
        self.outcome = Outcome::Pending;
    }

    pub(crate) fn set_delay(&mut self, delay: Duration) {
        self.delay = Some(delay);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn cancellations(&self) -> usize {
        self.cancellations.load(Ordering::SeqCst)
    }

    /// Play the script for one call, honouring `cancel` throughout.
    pub(crate) async fn run(&self, stage: Stage, cancel: &CancellationToken) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let outcome = async {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.outcome {
                Outcome::Respond(value) => Ok(value.clone()),
                Outcome::Fail(reason) => Err(AvatalkError::service(stage, reason.clone())),
                Outcome::Pending => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.cancellations.fetch_add(1, Ordering::SeqCst);
                Err(AvatalkError::StageCancelled { stage })
            }
            result = outcome => result,
        }
    }
}
