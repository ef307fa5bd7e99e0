//! Run deadline shared by every pipeline component.
//!
//! A [`Deadline`] is created once by the driver before any worker starts and
//! handed (by clone) to each component. Every blocking receive or send in the
//! pipeline is raced against [`Deadline::cancelled`], so no component blocks
//! past expiry by more than one scheduling step.
//!
//! The token fires for one of two reasons: the fixed expiry instant passes,
//! or someone calls [`Deadline::cancel`] (for example on Ctrl-C). Whichever
//! happens first is recorded and reported by [`Deadline::state`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Whether the run is still live, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadlineState {
    Live,
    Expired,
    Cancelled,
}

/// Cancellation token with an optional fixed absolute expiry.
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    expires_at: Option<Instant>,
    reason: Arc<OnceLock<DeadlineState>>,
}

impl Deadline {
    /// Deadline expiring `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self::with_expiry(Instant::now().checked_add(duration))
    }

    /// Deadline that only fires on explicit [`cancel`](Self::cancel).
    pub fn never() -> Self {
        Self::with_expiry(None)
    }

    fn with_expiry(expires_at: Option<Instant>) -> Self {
        Self {
            token: CancellationToken::new(),
            expires_at,
            reason: Arc::new(OnceLock::new()),
        }
    }

    /// Abort the run now. No-op if the deadline already fired.
    pub fn cancel(&self) {
        if self.reason.set(DeadlineState::Cancelled).is_ok() {
            debug!("Deadline cancelled explicitly");
        }
        self.token.cancel();
    }

    /// Current state of the deadline.
    pub fn state(&self) -> DeadlineState {
        if let Some(reason) = self.reason.get() {
            return *reason;
        }
        if self.is_past_expiry() {
            self.expire();
            return self.reason.get().copied().unwrap_or(DeadlineState::Expired);
        }
        DeadlineState::Live
    }

    /// `true` until the deadline fires.
    pub fn is_live(&self) -> bool {
        self.state() == DeadlineState::Live
    }

    /// Time left until expiry. `None` for a deadline without expiry.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Resolves once the deadline fires, either by expiry or cancellation.
    ///
    /// Cancel safe: dropping the future before it resolves has no effect.
    pub async fn cancelled(&self) {
        match self.expires_at {
            Some(at) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(at) => self.expire(),
                }
            }
            None => self.token.cancelled().await,
        }
    }

    fn is_past_expiry(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    fn expire(&self) {
        if self.reason.set(DeadlineState::Expired).is_ok() {
            debug!("Deadline expired");
        }
        self.token.cancel();
    }
}
