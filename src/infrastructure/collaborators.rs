// External Collaborators - content elements, identities and attribute layouts
// The host CMS owns these; the engine only talks to them through the traits below

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::core::{ElementId, LayoutId, UserId};
use crate::error::AppResult;

/// Content item a rating is attached to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub element_type: String,
    pub uri: Option<String>,
    pub title: String,
}

impl Element {
    pub fn new(id: i64, element_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: ElementId::new(id),
            element_type: element_type.into(),
            uri: None,
            title: title.into(),
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            username: username.into(),
            email: email.into(),
            full_name: None,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// Full name when set, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.username)
    }
}

/// Extra custom attributes attached to a collection or to ratings in general
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldLayout {
    pub id: Option<LayoutId>,
    pub fields: Vec<String>,
}

impl FieldLayout {
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            id: None,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
pub trait ElementStore: Send + Sync {
    async fn element_by_id(&self, id: ElementId) -> AppResult<Option<Element>>;
    async fn element_by_uri(&self, uri: &str) -> AppResult<Option<Element>>;
    /// Whether `element_type` names a content type collections may target.
    async fn supports_type(&self, element_type: &str) -> AppResult<bool>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_id(&self, id: UserId) -> AppResult<Option<User>>;
    async fn user_by_username_or_email(&self, username_or_email: &str) -> AppResult<Option<User>>;
    async fn current_identity(&self) -> AppResult<Option<User>>;
}

#[async_trait]
pub trait LayoutService: Send + Sync {
    /// Persist a layout and return its id.
    async fn save_layout(&self, layout: &FieldLayout) -> AppResult<LayoutId>;
    async fn delete_layout(&self, id: LayoutId) -> AppResult<()>;
    async fn layout_by_id(&self, id: LayoutId) -> AppResult<Option<FieldLayout>>;
}

#[derive(Default)]
pub struct InMemoryElementStore {
    types: RwLock<HashSet<String>>,
    elements: RwLock<HashMap<ElementId, Element>>,
}

impl InMemoryElementStore {
    pub fn new(types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            types: RwLock::new(types.into_iter().map(Into::into).collect()),
            elements: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, element: Element) {
        self.types.write().await.insert(element.element_type.clone());
        self.elements.write().await.insert(element.id, element);
    }
}

#[async_trait]
impl ElementStore for InMemoryElementStore {
    async fn element_by_id(&self, id: ElementId) -> AppResult<Option<Element>> {
        Ok(self.elements.read().await.get(&id).cloned())
    }

    async fn element_by_uri(&self, uri: &str) -> AppResult<Option<Element>> {
        let uri = uri.trim_matches('/');
        Ok(self
            .elements
            .read()
            .await
            .values()
            .find(|element| element.uri.as_deref().map(|u| u.trim_matches('/')) == Some(uri))
            .cloned())
    }

    async fn supports_type(&self, element_type: &str) -> AppResult<bool> {
        Ok(self.types.read().await.contains(element_type))
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, User>>,
    current: RwLock<Option<UserId>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    /// Set (or clear) the authenticated identity.
    pub async fn set_current(&self, id: Option<UserId>) {
        *self.current.write().await = id;
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn user_by_id(&self, id: UserId) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn user_by_username_or_email(&self, username_or_email: &str) -> AppResult<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| {
                user.username.eq_ignore_ascii_case(username_or_email)
                    || user.email.eq_ignore_ascii_case(username_or_email)
            })
            .cloned())
    }

    async fn current_identity(&self) -> AppResult<Option<User>> {
        let current = *self.current.read().await;
        match current {
            Some(id) => self.user_by_id(id).await,
            None => Ok(None),
        }
    }
}

pub struct InMemoryLayoutService {
    next_id: AtomicI64,
    layouts: RwLock<HashMap<LayoutId, FieldLayout>>,
}

impl Default for InMemoryLayoutService {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            layouts: RwLock::new(HashMap::new()),
        }
    }
}

impl InMemoryLayoutService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn layout_count(&self) -> usize {
        self.layouts.read().await.len()
    }
}

#[async_trait]
impl LayoutService for InMemoryLayoutService {
    async fn save_layout(&self, layout: &FieldLayout) -> AppResult<LayoutId> {
        let id = LayoutId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut stored = layout.clone();
        stored.id = Some(id);
        self.layouts.write().await.insert(id, stored);
        Ok(id)
    }

    async fn delete_layout(&self, id: LayoutId) -> AppResult<()> {
        self.layouts.write().await.remove(&id);
        Ok(())
    }

    async fn layout_by_id(&self, id: LayoutId) -> AppResult<Option<FieldLayout>> {
        Ok(self.layouts.read().await.get(&id).cloned())
    }
}
