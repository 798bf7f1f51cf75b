//! Mutation coordinator.
//!
//! Runs one remote mutation and then reconciles the cache. Nothing is
//! applied speculatively: if the remote call fails the cache is left as it
//! was and the error goes back to the caller.

use serde_json::{json, Value};
use tether_cache::{ReadPolicy, RemoteCache};
use tether_core::{
    new_mutation_id, CacheKey, EmailStatus, MutationId, MutationOp, MutationRequest,
    MutationResponse, ResourceClass, TetherError, TetherResult, ValidationError,
};

use crate::request::AuthorizedRemote;

/// How the cache is brought back in line after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Write the returned entity into its own entry. `id` is taken from the
    /// response when the request had none (creates). `listings` are
    /// invalidated as well, for mutations that change their membership.
    /// Deletes only ever invalidate the entry, whatever the response.
    Point {
        class: ResourceClass,
        id: Option<String>,
        listings: Vec<ResourceClass>,
    },
    /// Invalidate every key of these classes.
    Invalidate { classes: Vec<ResourceClass> },
    /// Discard the response and re-read the entity.
    Refetch { key: CacheKey },
}

impl Reconciliation {
    pub fn point(key: &CacheKey) -> Self {
        Self::Point {
            class: key.class(),
            id: key.entity_id().map(str::to_string),
            listings: Vec::new(),
        }
    }

    pub fn invalidate(classes: &[ResourceClass]) -> Self {
        Self::Invalidate {
            classes: classes.to_vec(),
        }
    }
}

/// One mutation in flight. Exists for the duration of the call only.
#[derive(Debug, Clone)]
struct MutationRecord {
    id: MutationId,
    target: Option<CacheKey>,
    op: MutationOp,
    strategy: Reconciliation,
}

/// Category changes reshape both the category list and every email
/// listing filtered by category.
const CATEGORY_CLASSES: &[ResourceClass] = &[ResourceClass::Categories, ResourceClass::Emails];

pub struct MutationCoordinator {
    cache: RemoteCache<AuthorizedRemote>,
}

impl MutationCoordinator {
    pub fn new(cache: RemoteCache<AuthorizedRemote>) -> Self {
        Self { cache }
    }

    fn remote(&self) -> &AuthorizedRemote {
        self.cache.fetcher()
    }

    /// Run `request` and reconcile with `strategy`.
    pub async fn execute(
        &self,
        request: MutationRequest,
        strategy: Reconciliation,
    ) -> TetherResult<MutationResponse> {
        request.validate()?;

        let record = MutationRecord {
            id: new_mutation_id(),
            target: request.entity_key(),
            op: request.op,
            strategy,
        };
        tracing::info!(
            mutation_id = %record.id,
            class = %request.class,
            op = record.op.as_str(),
            "Mutation started"
        );

        let response = match self.remote().mutate(&request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(mutation_id = %record.id, error = %err, "Mutation failed, cache untouched");
                return Err(err);
            }
        };

        self.reconcile(&record, &response).await;
        Ok(response)
    }

    async fn reconcile(&self, record: &MutationRecord, response: &MutationResponse) {
        match &record.strategy {
            Reconciliation::Point {
                class,
                id,
                listings,
            } => {
                let key = id
                    .clone()
                    .or_else(|| returned_id(response))
                    .map(|id| CacheKey::entity(*class, id));
                match (key, response) {
                    (Some(key), _) if record.op == MutationOp::Delete => {
                        self.cache.invalidate_key(&key).await;
                        tracing::debug!(mutation_id = %record.id, key = %key, "Deleted entity invalidated");
                    }
                    (Some(key), MutationResponse::Entity(entity)) => {
                        self.cache.put(&key, entity.clone()).await;
                        tracing::debug!(mutation_id = %record.id, key = %key, "Point reconciled");
                    }
                    (Some(key), MutationResponse::Partial(_)) => {
                        self.refetch(record, &key).await;
                    }
                    (Some(key), MutationResponse::Acknowledged) => {
                        self.cache.invalidate_key(&key).await;
                    }
                    (None, _) => {
                        tracing::debug!(mutation_id = %record.id, "No entity id to reconcile");
                    }
                }
                if !listings.is_empty() {
                    self.cache.invalidate_classes(listings).await;
                }
            }
            Reconciliation::Invalidate { classes } => {
                let marked = self.cache.invalidate_classes(classes).await;
                tracing::debug!(mutation_id = %record.id, marked, "Classes invalidated");
            }
            Reconciliation::Refetch { key } => {
                self.refetch(record, key).await;
            }
        }
    }

    /// Invalidate `key` and re-read it. A failed re-read leaves the key
    /// invalidated, so the next read fetches again.
    async fn refetch(&self, record: &MutationRecord, key: &CacheKey) {
        self.cache.invalidate_key(key).await;
        if let Err(err) = self.cache.read(key, ReadPolicy::ForceRefresh).await {
            tracing::warn!(
                mutation_id = %record.id,
                target = ?record.target,
                key = %key,
                error = %err,
                "Refetch after mutation failed"
            );
        }
    }

    // ------------------------------------------------------------------
    // Convenience mutations
    // ------------------------------------------------------------------

    /// Set an email's status flags.
    pub async fn set_email_status(
        &self,
        email_id: &str,
        status: EmailStatus,
    ) -> TetherResult<MutationResponse> {
        let request =
            MutationRequest::patch(ResourceClass::Email, email_id, json!({ "status": status }));
        let strategy = Reconciliation::point(&CacheKey::entity(ResourceClass::Email, email_id));
        self.execute(request, strategy).await
    }

    pub async fn create_category(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> TetherResult<MutationResponse> {
        let name = required("name", name)?;
        let request = MutationRequest::create(
            ResourceClass::Categories,
            json!({ "name": name, "description": description }),
        );
        self.execute(request, Reconciliation::invalidate(CATEGORY_CLASSES))
            .await
    }

    pub async fn rename_category(&self, name: &str, new_name: &str) -> TetherResult<MutationResponse> {
        let new_name = required("new_name", new_name)?;
        let request =
            MutationRequest::patch(ResourceClass::Categories, name, json!({ "name": new_name }));
        self.execute(request, Reconciliation::invalidate(CATEGORY_CLASSES))
            .await
    }

    pub async fn delete_category(&self, name: &str) -> TetherResult<MutationResponse> {
        let request = MutationRequest::delete(ResourceClass::Categories, name);
        self.execute(request, Reconciliation::invalidate(CATEGORY_CLASSES))
            .await
    }

    /// Move several emails into one category.
    pub async fn recategorize(
        &self,
        email_ids: &[String],
        category: &str,
    ) -> TetherResult<MutationResponse> {
        if email_ids.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "email_ids".to_string(),
            }
            .into());
        }
        let category = required("category", category)?;
        let request = MutationRequest::bulk_patch(
            ResourceClass::Emails,
            json!({ "emailIds": email_ids, "category": category }),
        );
        self.execute(request, Reconciliation::invalidate(CATEGORY_CLASSES))
            .await
    }

    pub async fn create_task(
        &self,
        title: &str,
        email_id: Option<&str>,
    ) -> TetherResult<MutationResponse> {
        let title = required("title", title)?;
        let request = MutationRequest::create(
            ResourceClass::Tasks,
            json!({ "title": title, "emailId": email_id }),
        );
        self.execute(request, task_point(None)).await
    }

    /// Patch a task's fields.
    pub async fn update_task(&self, task_id: &str, changes: Value) -> TetherResult<MutationResponse> {
        let request = MutationRequest::patch(ResourceClass::Task, task_id, changes);
        self.execute(request, task_point(Some(task_id))).await
    }

    pub async fn complete_task(&self, task_id: &str) -> TetherResult<MutationResponse> {
        self.update_task(task_id, json!({ "done": true })).await
    }

    pub async fn delete_task(&self, task_id: &str) -> TetherResult<MutationResponse> {
        let request = MutationRequest::delete(ResourceClass::Task, task_id);
        self.execute(request, task_point(Some(task_id))).await
    }
}

fn task_point(id: Option<&str>) -> Reconciliation {
    Reconciliation::Point {
        class: ResourceClass::Task,
        id: id.map(str::to_string),
        listings: vec![ResourceClass::Tasks],
    }
}

fn returned_id(response: &MutationResponse) -> Option<String> {
    match response {
        MutationResponse::Entity(value) => value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, TetherError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }
        .into());
    }
    Ok(trimmed)
}

impl Clone for MutationCoordinator {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_strategy_from_entity_key() {
        let key = CacheKey::entity(ResourceClass::Email, "e-1");
        assert_eq!(
            Reconciliation::point(&key),
            Reconciliation::Point {
                class: ResourceClass::Email,
                id: Some("e-1".to_string()),
                listings: vec![],
            }
        );
    }

    #[test]
    fn test_returned_id_only_from_full_entities() {
        assert_eq!(
            returned_id(&MutationResponse::Entity(json!({"id": "t-1"}))),
            Some("t-1".to_string())
        );
        assert_eq!(returned_id(&MutationResponse::Partial(json!({"id": "t-1"}))), None);
        assert_eq!(returned_id(&MutationResponse::Acknowledged), None);
    }

    #[test]
    fn test_required_trims_and_rejects_blank() {
        assert_eq!(required("name", "  Work ").unwrap(), "Work");
        assert!(required("name", "   ").unwrap_err().is_validation());
    }
}
