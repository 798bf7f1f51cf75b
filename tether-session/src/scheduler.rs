//! Token refresh scheduler.
//!
//! Owns at most one timer. Every path that arms the timer goes through
//! [`RefreshScheduler::reschedule`], which cancels the previous timer before
//! arming the next one. A watcher task follows the session status: entering
//! `Authenticated` arms, leaving it cancels.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tether_core::{expires_at_from, RemoteAuthority, SessionStatus};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::store::SessionStore;

/// When to renew a credential relative to its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh this long before expiry; below it, refresh immediately.
    pub threshold: Duration,
    /// Lower bound on a non-immediate delay.
    pub min_delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(300),
            min_delay: Duration::from_secs(60),
        }
    }
}

impl RefreshPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    /// Delay before refreshing a credential with `remaining` lifetime.
    ///
    /// Zero when the remaining lifetime is already below the threshold;
    /// otherwise `remaining - threshold`, clamped to `min_delay`.
    pub fn delay_for(&self, remaining: ChronoDuration) -> Duration {
        let remaining = remaining.to_std().unwrap_or(Duration::ZERO);
        if remaining < self.threshold {
            Duration::ZERO
        } else {
            (remaining - self.threshold).max(self.min_delay)
        }
    }
}

struct ArmedTimer {
    epoch: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// At most one refresh call is outstanding. A timer that fires while one
/// is running leaves its epoch in `deferred` for the running refresh to
/// pick up once it finishes.
#[derive(Default)]
struct RefreshState {
    running: bool,
    deferred: Option<u64>,
}

struct SchedulerInner {
    store: Arc<SessionStore>,
    remote: Arc<dyn RemoteAuthority>,
    policy: RefreshPolicy,
    timer: Mutex<Option<ArmedTimer>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    refresh_state: Mutex<RefreshState>,
}

/// Keeps the session's credential renewed ahead of expiry.
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

// Slots hold only handles, so a panic while one was locked cannot leave it
// in a state worth refusing.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RefreshScheduler {
    pub fn new(
        store: Arc<SessionStore>,
        remote: Arc<dyn RemoteAuthority>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                remote,
                policy,
                timer: Mutex::new(None),
                watcher: Mutex::new(None),
                refresh_state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.inner.policy
    }

    /// Start following session status. Calling this again is a no-op.
    pub fn start(&self) {
        let mut watcher = lock(&self.inner.watcher);
        if watcher.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let mut status_rx = inner.store.subscribe();
        *watcher = Some(tokio::spawn(async move {
            loop {
                let status = *status_rx.borrow_and_update();
                match status {
                    SessionStatus::Authenticated { epoch } => SchedulerInner::arm_for(&inner, epoch).await,
                    SessionStatus::Unauthenticated | SessionStatus::Unknown => inner.cancel(),
                }
                if status_rx.changed().await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Cancel any armed timer, then arm one to fire after `delay`.
    pub fn reschedule(&self, epoch: u64, delay: Duration) {
        SchedulerInner::reschedule(&self.inner, epoch, delay);
    }

    /// Cancel the armed timer, if any.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.inner.timer).is_some()
    }

    /// When the armed timer is due to fire.
    pub fn armed_deadline(&self) -> Option<Instant> {
        lock(&self.inner.timer).as_ref().map(|timer| timer.deadline)
    }

    /// Stop following status and cancel the timer.
    pub fn shutdown(&self) {
        if let Some(watcher) = lock(&self.inner.watcher).take() {
            watcher.abort();
        }
        self.inner.cancel();
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SchedulerInner {
    async fn arm_for(inner: &Arc<Self>, epoch: u64) {
        let expires_at = match inner.store.get_expiry().await {
            Ok(expires_at) => expires_at,
            Err(_) => {
                inner.cancel();
                return;
            }
        };
        let delay = inner.policy.delay_for(expires_at.signed_duration_since(Utc::now()));
        Self::reschedule(inner, epoch, delay);
    }

    fn reschedule(inner: &Arc<Self>, epoch: u64, delay: Duration) {
        let mut slot = lock(&inner.timer);
        if let Some(previous) = slot.take() {
            previous.handle.abort();
            tracing::debug!(epoch = previous.epoch, "Refresh timer cancelled");
        }

        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task_inner.fire(epoch).await;
        });
        tracing::info!(epoch, delay_secs = delay.as_secs(), "Refresh timer armed");
        *slot = Some(ArmedTimer {
            epoch,
            deadline: Instant::now() + delay,
            handle,
        });
    }

    fn cancel(&self) {
        if let Some(previous) = lock(&self.timer).take() {
            previous.handle.abort();
            tracing::debug!(epoch = previous.epoch, "Refresh timer cancelled");
        }
    }

    async fn fire(&self, epoch: u64) {
        // Release the slot so re-arming after a successful refresh does
        // not abort this task.
        {
            let mut slot = lock(&self.timer);
            if slot.as_ref().is_some_and(|timer| timer.epoch == epoch) {
                slot.take();
            }
        }

        {
            let mut state = lock(&self.refresh_state);
            if state.running {
                state.deferred = Some(epoch);
                tracing::debug!(epoch, "Refresh already in progress, deferring");
                return;
            }
            state.running = true;
        }

        let mut epoch = epoch;
        loop {
            self.refresh(epoch).await;
            let deferred = {
                let mut state = lock(&self.refresh_state);
                let deferred = state.deferred.take();
                if deferred.is_none() {
                    state.running = false;
                }
                deferred
            };
            match deferred {
                Some(next) => epoch = next,
                None => break,
            }
        }
    }

    async fn refresh(&self, epoch: u64) {
        if self.store.status().epoch() != Some(epoch) {
            tracing::debug!(epoch, "Session changed before refresh fired");
            return;
        }
        let token = match self.store.get_token().await {
            Ok(token) => token,
            Err(_) => return,
        };

        tracing::debug!(epoch, "Refreshing session");
        match self.remote.refresh_session(&token).await {
            Ok(refreshed) => {
                let expires_at = expires_at_from(Utc::now(), refreshed.expires_in);
                match self.store.apply_refresh(epoch, refreshed.token, expires_at).await {
                    Ok(Some(new_epoch)) => {
                        tracing::info!(epoch = new_epoch, expires_at = %expires_at, "Session refreshed");
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(epoch, error = %err, "Refreshed session rejected");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    epoch,
                    error = %err,
                    "Session refresh failed, waiting for the next trigger"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_below_threshold_is_immediate() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.delay_for(ChronoDuration::seconds(200)), Duration::ZERO);
        assert_eq!(policy.delay_for(ChronoDuration::seconds(-30)), Duration::ZERO);
    }

    #[test]
    fn test_delay_is_expiry_minus_threshold() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.delay_for(ChronoDuration::seconds(1200)),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_delay_is_clamped_to_minimum() {
        let policy = RefreshPolicy::default();
        assert_eq!(
            policy.delay_for(ChronoDuration::seconds(310)),
            Duration::from_secs(60)
        );
        assert_eq!(
            policy.delay_for(ChronoDuration::seconds(300)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_policy_builders() {
        let policy = RefreshPolicy::new()
            .with_threshold(Duration::from_secs(120))
            .with_min_delay(Duration::from_secs(5));
        assert_eq!(
            policy.delay_for(ChronoDuration::seconds(130)),
            Duration::from_secs(10)
        );
        assert_eq!(
            policy.delay_for(ChronoDuration::seconds(122)),
            Duration::from_secs(5)
        );
    }
}
