//! Resource classes, cache keys, and the remote resource shapes.
//!
//! A [`CacheKey`] is the composite of a [`ResourceClass`] and the
//! resource-specific parameters (category name, pagination cursor, entity
//! id). Parameters are kept in a sorted map so two keys built with the same
//! parameters in a different order are the same key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Parameter name used for single-entity keys.
pub const ENTITY_ID_PARAM: &str = "id";

/// Class of remote resource held in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// The category collection.
    Categories,
    /// Email listings, keyed by category and pagination cursor.
    Emails,
    /// A single email, keyed by id.
    Email,
    /// Task listings.
    Tasks,
    /// A single task, keyed by id.
    Task,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Categories => "categories",
            ResourceClass::Emails => "emails",
            ResourceClass::Email => "email",
            ResourceClass::Tasks => "tasks",
            ResourceClass::Task => "task",
        }
    }

    pub fn all() -> &'static [ResourceClass] {
        &[
            ResourceClass::Categories,
            ResourceClass::Emails,
            ResourceClass::Email,
            ResourceClass::Tasks,
            ResourceClass::Task,
        ]
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.as_str() == value)
    }

    /// Whether keys of this class address one entity by id.
    pub fn is_entity(&self) -> bool {
        matches!(self, ResourceClass::Email | ResourceClass::Task)
    }

    /// The listing class whose membership contains entities of this class.
    pub fn listing_class(&self) -> Option<ResourceClass> {
        match self {
            ResourceClass::Email => Some(ResourceClass::Emails),
            ResourceClass::Task => Some(ResourceClass::Tasks),
            _ => None,
        }
    }

    /// Remote collection segment, shared by a listing and its entity class.
    pub fn collection_segment(&self) -> &'static str {
        match self {
            ResourceClass::Categories => "categories",
            ResourceClass::Emails | ResourceClass::Email => "emails",
            ResourceClass::Tasks | ResourceClass::Task => "tasks",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite cache key: resource class plus resource-specific parameters.
///
/// The inner struct is private; keys are only built through the
/// constructors below, which always require a class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct CacheKeyInner {
    class: ResourceClass,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    /// Key for a whole collection with no parameters.
    pub fn new(class: ResourceClass) -> Self {
        Self {
            inner: CacheKeyInner {
                class,
                params: BTreeMap::new(),
            },
        }
    }

    /// Key for a single entity of `class`.
    pub fn entity(class: ResourceClass, id: impl Into<String>) -> Self {
        Self::new(class).with_param(ENTITY_ID_PARAM, id)
    }

    /// Add or replace a parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.params.insert(name.into(), value.into());
        self
    }

    pub fn class(&self) -> ResourceClass {
        self.inner.class
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.inner.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).map(String::as_str)
    }

    /// The entity id, for single-entity keys.
    pub fn entity_id(&self) -> Option<&str> {
        self.param(ENTITY_ID_PARAM)
    }

    pub fn belongs_to(&self, class: ResourceClass) -> bool {
        self.inner.class == class
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.inner.class.as_str())?;
        let mut sep = '?';
        for (name, value) in &self.inner.params {
            write!(f, "{}{}={}", sep, name, value)?;
            sep = '&';
        }
        Ok(())
    }
}

// ============================================================================
// REMOTE RESOURCE SHAPES
// ============================================================================

/// A category emails can be filed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub email_count: u64,
}

/// Status flags of one email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailStatus {
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub archived: bool,
}

/// One email as returned by the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    pub subject: String,
    pub from: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub status: EmailStatus,
}

/// A task derived from an email or created by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub email_id: Option<String>,
}

/// A page of a listing with an optional cursor for the next page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entity_key_exposes_id() {
        let key = CacheKey::entity(ResourceClass::Email, "e-42");
        assert_eq!(key.class(), ResourceClass::Email);
        assert_eq!(key.entity_id(), Some("e-42"));
        assert_eq!(key.to_string(), "email?id=e-42");
    }

    #[test]
    fn test_listing_key_display_is_sorted() {
        let key = CacheKey::new(ResourceClass::Emails)
            .with_param("cursor", "abc")
            .with_param("category", "work");
        assert_eq!(key.to_string(), "emails?category=work&cursor=abc");
        assert_eq!(CacheKey::new(ResourceClass::Categories).to_string(), "categories");
    }

    #[test]
    fn test_class_relations() {
        assert_eq!(ResourceClass::Email.listing_class(), Some(ResourceClass::Emails));
        assert_eq!(ResourceClass::Task.listing_class(), Some(ResourceClass::Tasks));
        assert_eq!(ResourceClass::Categories.listing_class(), None);
        assert_eq!(ResourceClass::Email.collection_segment(), "emails");
        assert!(ResourceClass::Task.is_entity());
        assert!(!ResourceClass::Tasks.is_entity());
    }

    #[test]
    fn test_parse_roundtrips_names() {
        for class in ResourceClass::all() {
            assert_eq!(ResourceClass::parse(class.as_str()), Some(*class));
        }
        assert_eq!(ResourceClass::parse("unknown"), None);
    }

    #[test]
    fn test_email_deserializes_with_missing_flags() {
        let email: Email = serde_json::from_value(serde_json::json!({
            "id": "e-1",
            "subject": "hello",
            "from": "a@example.com"
        }))
        .expect("email should deserialize");
        assert_eq!(email.status, EmailStatus::default());
        assert_eq!(email.category, None);
    }

    fn class_strategy() -> impl Strategy<Value = ResourceClass> {
        prop_oneof![
            Just(ResourceClass::Categories),
            Just(ResourceClass::Emails),
            Just(ResourceClass::Email),
            Just(ResourceClass::Tasks),
            Just(ResourceClass::Task),
        ]
    }

    proptest! {
        /// Parameter insertion order never changes key identity.
        #[test]
        fn prop_param_order_is_irrelevant(
            class in class_strategy(),
            a in "[a-z]{1,8}",
            b in "[a-z]{1,8}",
            va in "[a-z0-9]{0,8}",
            vb in "[a-z0-9]{0,8}",
        ) {
            prop_assume!(a != b);
            let left = CacheKey::new(class).with_param(a.clone(), va.clone()).with_param(b.clone(), vb.clone());
            let right = CacheKey::new(class).with_param(b, vb).with_param(a, va);
            prop_assert_eq!(&left, &right);
            prop_assert_eq!(left.to_string(), right.to_string());
        }

        /// A key only ever belongs to the class it was built with.
        #[test]
        fn prop_key_belongs_to_exactly_one_class(class in class_strategy(), id in "[a-z0-9-]{1,12}") {
            let key = CacheKey::entity(class, id);
            for other in ResourceClass::all() {
                prop_assert_eq!(key.belongs_to(*other), *other == class);
            }
        }
    }
}
