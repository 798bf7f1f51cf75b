//! Route guard for protected views.
//!
//! Headless: the guard turns session status into a [`GuardDecision`] and
//! drives an abstract [`Navigator`]; it renders nothing itself.

use std::sync::Arc;

use tether_core::SessionStatus;
use tokio::sync::watch;

/// Navigation primitive the guard redirects through.
pub trait Navigator: Send + Sync {
    fn redirect(&self, route: &str);
}

/// What a protected view should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Status not yet known: neutral placeholder, no navigation.
    Placeholder,
    /// Authenticated: render the protected content.
    Render,
    /// Unauthenticated: navigated away to the login route.
    Redirected,
}

impl GuardDecision {
    pub fn renders_content(&self) -> bool {
        matches!(self, Self::Render)
    }
}

/// Gates one protected view on the session status.
pub struct RouteGuard {
    status: watch::Receiver<SessionStatus>,
    navigator: Arc<dyn Navigator>,
    login_route: String,
    redirected: bool,
}

impl RouteGuard {
    pub fn new(
        status: watch::Receiver<SessionStatus>,
        navigator: Arc<dyn Navigator>,
        login_route: impl Into<String>,
    ) -> Self {
        Self {
            status,
            navigator,
            login_route: login_route.into(),
            redirected: false,
        }
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    /// Decide for the current status.
    ///
    /// Redirects at most once per transition into `Unauthenticated`;
    /// re-evaluating while still unauthenticated does not navigate again.
    pub fn evaluate(&mut self) -> GuardDecision {
        let status = *self.status.borrow_and_update();
        match status {
            SessionStatus::Unknown => GuardDecision::Placeholder,
            SessionStatus::Authenticated { .. } => {
                self.redirected = false;
                GuardDecision::Render
            }
            SessionStatus::Unauthenticated => {
                if !self.redirected {
                    self.redirected = true;
                    tracing::info!(route = %self.login_route, "Not authenticated, redirecting");
                    self.navigator.redirect(&self.login_route);
                }
                GuardDecision::Redirected
            }
        }
    }

    /// Wait for the next status change and decide again. Returns `None`
    /// once the session store is gone.
    pub async fn next_decision(&mut self) -> Option<GuardDecision> {
        self.status.changed().await.ok()?;
        Some(self.evaluate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Redirects(Mutex<Vec<String>>);

    impl Navigator for Redirects {
        fn redirect(&self, route: &str) {
            self.0.lock().unwrap().push(route.to_string());
        }
    }

    impl Redirects {
        fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn guard() -> (watch::Sender<SessionStatus>, Arc<Redirects>, RouteGuard) {
        let (tx, rx) = watch::channel(SessionStatus::Unknown);
        let navigator = Arc::new(Redirects::default());
        let guard = RouteGuard::new(rx, navigator.clone(), "/login");
        (tx, navigator, guard)
    }

    #[test]
    fn test_unknown_renders_placeholder_without_navigation() {
        let (_tx, navigator, mut guard) = guard();
        assert_eq!(guard.evaluate(), GuardDecision::Placeholder);
        assert!(!guard.evaluate().renders_content());
        assert_eq!(navigator.count(), 0);
    }

    #[test]
    fn test_unauthenticated_redirects_once() {
        let (tx, navigator, mut guard) = guard();
        tx.send_replace(SessionStatus::Unauthenticated);

        assert_eq!(guard.evaluate(), GuardDecision::Redirected);
        assert_eq!(guard.evaluate(), GuardDecision::Redirected);
        assert_eq!(navigator.count(), 1);
        assert_eq!(navigator.0.lock().unwrap()[0], "/login");
    }

    #[test]
    fn test_authenticated_renders_content() {
        let (tx, navigator, mut guard) = guard();
        tx.send_replace(SessionStatus::Authenticated { epoch: 1 });
        assert_eq!(guard.evaluate(), GuardDecision::Render);
        assert_eq!(navigator.count(), 0);
    }

    #[tokio::test]
    async fn test_mid_session_logout_redirects_away() {
        let (tx, navigator, mut guard) = guard();
        tx.send_replace(SessionStatus::Authenticated { epoch: 1 });
        assert_eq!(guard.evaluate(), GuardDecision::Render);

        tx.send_replace(SessionStatus::Unauthenticated);
        assert_eq!(guard.next_decision().await, Some(GuardDecision::Redirected));
        assert_eq!(navigator.count(), 1);

        // Logging in again and being logged out again redirects again.
        tx.send_replace(SessionStatus::Authenticated { epoch: 2 });
        assert_eq!(guard.next_decision().await, Some(GuardDecision::Render));
        tx.send_replace(SessionStatus::Unauthenticated);
        assert_eq!(guard.next_decision().await, Some(GuardDecision::Redirected));
        assert_eq!(navigator.count(), 2);
    }

    #[tokio::test]
    async fn test_next_decision_ends_with_store() {
        let (tx, _navigator, mut guard) = guard();
        drop(tx);
        assert_eq!(guard.next_decision().await, None);
    }
}
