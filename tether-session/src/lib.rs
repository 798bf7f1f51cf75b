//! tether Session - Session Lifecycle
//!
//! The session state store, its persistence backends, the token refresh
//! scheduler that keeps the credential alive, and the route guard that
//! gates protected views on session status.
//!
//! ```ignore
//! let store = Arc::new(SessionStore::new(Arc::new(FileSessionPersistence::new(path))));
//! let scheduler = RefreshScheduler::new(store.clone(), remote, RefreshPolicy::default());
//! scheduler.start();
//! store.restore().await;
//! ```

pub mod guard;
pub mod persistence;
pub mod scheduler;
pub mod store;

pub use guard::{GuardDecision, Navigator, RouteGuard};
pub use persistence::{FileSessionPersistence, MemorySessionPersistence, SessionPersistence};
pub use scheduler::{RefreshPolicy, RefreshScheduler};
pub use store::SessionStore;
