//! tether Client - Remote Authority Wiring
//!
//! The HTTP implementation of the remote authority, the authorized request
//! layer that reports Unauthorized back to the session store, the mutation
//! coordinator, and the [`ClientContext`] that owns all of them.
//!
//! ```ignore
//! let config = TetherConfig::load()?;
//! let ctx = ClientContext::from_config(&config)?;
//! ctx.initialize().await;
//! ctx.login(&Credentials::new("ada@example.com", "secret")).await?;
//!
//! let categories = ctx
//!     .read::<Vec<Category>>(&CacheKey::new(ResourceClass::Categories), ReadPolicy::default())
//!     .await?;
//! ```

pub mod config;
pub mod context;
pub mod http;
pub mod mutation;
pub mod request;
pub mod telemetry;

pub use config::{CacheSection, LogConfig, RefreshConfig, TetherConfig};
pub use context::{ClientContext, ContextOptions};
pub use http::HttpRemote;
pub use mutation::{MutationCoordinator, Reconciliation};
pub use request::AuthorizedRemote;
pub use telemetry::{init_tracing, TelemetryError};
