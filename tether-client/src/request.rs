//! Authorized request layer.
//!
//! The only place besides the session store that sees the bearer token.
//! Every call reads the current credential from the store, and any
//! Unauthorized answer clears the session it was issued under.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tether_cache::ResourceFetcher;
use tether_core::{
    CacheError, CacheKey, MutationRequest, MutationResponse, RemoteAuthority, RemoteError,
    TetherError,
};
use tether_session::SessionStore;

pub struct AuthorizedRemote {
    store: Arc<SessionStore>,
    remote: Arc<dyn RemoteAuthority>,
}

impl AuthorizedRemote {
    pub fn new(store: Arc<SessionStore>, remote: Arc<dyn RemoteAuthority>) -> Self {
        Self { store, remote }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn remote(&self) -> &Arc<dyn RemoteAuthority> {
        &self.remote
    }

    /// Clear the session on Unauthorized, then hand the result back.
    async fn observe<T>(&self, epoch: u64, result: Result<T, RemoteError>) -> Result<T, RemoteError> {
        if let Err(RemoteError::Unauthorized) = &result {
            self.store.handle_unauthorized_at(epoch).await;
        }
        result
    }

    pub async fn fetch_collection(&self, key: &CacheKey) -> Result<Value, TetherError> {
        let (token, epoch) = self.store.get_credential().await?;
        let result = self.remote.fetch_collection(&token, key).await;
        Ok(self.observe(epoch, result).await?)
    }

    pub async fn mutate(&self, request: &MutationRequest) -> Result<MutationResponse, TetherError> {
        let (token, epoch) = self.store.get_credential().await?;
        let result = self.remote.mutate(&token, request).await;
        Ok(self.observe(epoch, result).await?)
    }
}

#[async_trait]
impl ResourceFetcher for AuthorizedRemote {
    async fn fetch(&self, key: &CacheKey) -> Result<Value, CacheError> {
        let (token, epoch) = self
            .store
            .get_credential()
            .await
            .map_err(|_| CacheError::NoSession)?;
        let result = self.remote.fetch_collection(&token, key).await;
        Ok(self.observe(epoch, result).await?)
    }
}
