// Rating Relations - the collection, element and owner a rating points at
// Shared by the Rating entity (resolve) and the query builder (key lookup)

use serde::{Deserialize, Serialize};

use crate::collections::{Collection, CollectionRegistry};
use crate::core::{CollectionId, ElementId, UserId};
use crate::error::{AppResult, NotFound};
use crate::infrastructure::collaborators::{Element, ElementStore, User, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRelation {
    pub id: CollectionId,
}

impl CollectionRelation {
    pub const COLUMN: &'static str = "collection_id";

    pub fn new(id: CollectionId) -> Self {
        Self { id }
    }

    /// Fetched fresh on every call; caching belongs to the registry.
    pub async fn resolve(&self, collections: &CollectionRegistry) -> AppResult<Collection> {
        collections.get_by_id(self.id).await
    }

    /// Collection id for a handle.
    pub async fn lookup(collections: &CollectionRegistry, handle: &str) -> AppResult<Option<i64>> {
        Ok(collections
            .find_by_handle(handle)
            .await?
            .map(|collection| collection.id.value()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementRelation {
    pub id: ElementId,
}

impl ElementRelation {
    pub const COLUMN: &'static str = "element_id";

    pub fn new(id: ElementId) -> Self {
        Self { id }
    }

    pub async fn resolve(&self, elements: &dyn ElementStore) -> AppResult<Element> {
        elements
            .element_by_id(self.id)
            .await?
            .ok_or_else(|| NotFound::by_id("element", self.id.value()).into())
    }

    /// Element id for a URI.
    pub async fn lookup(elements: &dyn ElementStore, uri: &str) -> AppResult<Option<i64>> {
        Ok(elements
            .element_by_uri(uri)
            .await?
            .map(|element| element.id.value()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRelation {
    pub id: Option<UserId>,
}

impl OwnerRelation {
    pub const COLUMN: &'static str = "owner_id";

    pub fn new(id: Option<UserId>) -> Self {
        Self { id }
    }

    /// `None` for anonymous ratings; `NotFound` when the owner was removed.
    pub async fn resolve(&self, users: &dyn UserStore) -> AppResult<Option<User>> {
        let Some(id) = self.id else {
            return Ok(None);
        };
        users
            .user_by_id(id)
            .await?
            .map(Some)
            .ok_or_else(|| NotFound::by_id("user", id.value()).into())
    }

    /// User id for a username or email.
    pub async fn lookup(users: &dyn UserStore, username_or_email: &str) -> AppResult<Option<i64>> {
        Ok(users
            .user_by_username_or_email(username_or_email)
            .await?
            .map(|user| user.id.value()))
    }
}
