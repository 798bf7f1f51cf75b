//! tether client entry point
//!
//! Loads configuration, restores or establishes a session, and keeps it
//! alive until interrupted.

use std::error::Error;

use tether_client::{init_tracing, ClientContext, TetherConfig};
use tether_core::Credentials;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = TetherConfig::load()?;
    init_tracing(&config.log)?;

    let ctx = ClientContext::from_config(&config)?;
    let status = ctx.initialize().await;
    tracing::info!(api = %config.api_base_url, status = ?status, "tether client started");

    if !status.is_authenticated() {
        if let Some(credentials) = credentials_from_env() {
            let identity = ctx.login(&credentials).await?;
            tracing::info!(user = %identity.email, "Signed in from environment");
        } else {
            tracing::warn!("No session; set TETHER_EMAIL and TETHER_PASSWORD to sign in");
        }
    }

    let mut status_rx = ctx.session().subscribe();
    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                tracing::info!(status = ?status, "Session status changed");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    ctx.dispose();
    Ok(())
}

fn credentials_from_env() -> Option<Credentials> {
    let email = std::env::var("TETHER_EMAIL").ok()?;
    let password = std::env::var("TETHER_PASSWORD").ok()?;
    Some(Credentials::new(email, password))
}
