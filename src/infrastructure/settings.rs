// Settings Store - small JSON blob persisted in the rating_settings table
// Holds the status list, the field-version token and the default rating layout

use once_cell::sync::Lazy;
use rand::distr::Alphanumeric;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info, instrument, warn};

use crate::core::LayoutId;
use crate::error::{AppError, AppResult, ValidationErrors};
use crate::infrastructure::collaborators::{FieldLayout, LayoutService};
use crate::infrastructure::database::{RatingDatabase, SETTINGS_TABLE};

const SETTINGS_KEY: &str = "settings";
pub const FIELD_VERSION_LENGTH: usize = 12;

static STATUS_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("status key pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusOption {
    pub key: String,
    pub label: String,
}

impl StatusOption {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_statuses")]
    pub statuses: Vec<StatusOption>,
    #[serde(default)]
    pub field_version: Option<String>,
    #[serde(default)]
    pub field_layout_id: Option<LayoutId>,
}

fn default_statuses() -> Vec<StatusOption> {
    vec![
        StatusOption::new("active", "Active"),
        StatusOption::new("pending", "Pending"),
        StatusOption::new("disabled", "Disabled"),
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            statuses: default_statuses(),
            field_version: None,
            field_layout_id: None,
        }
    }
}

impl Settings {
    /// First configured status, assigned to new ratings.
    pub fn default_status(&self) -> &str {
        self.statuses
            .first()
            .map(|status| status.key.as_str())
            .unwrap_or("active")
    }

    pub fn has_status(&self, key: &str) -> bool {
        self.statuses.iter().any(|status| status.key == key)
    }
}

pub fn validate_statuses(statuses: &[StatusOption]) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    if statuses.is_empty() {
        errors.add("statuses", "At least one status is required.");
    }
    let mut seen = std::collections::HashSet::new();
    for status in statuses {
        if !STATUS_KEY_PATTERN.is_match(&status.key) {
            errors.add(
                "statuses",
                format!("\"{}\" isn't a valid status key.", status.key),
            );
        }
        if status.label.trim().is_empty() {
            errors.add("statuses", format!("Status \"{}\" needs a label.", status.key));
        }
        if !seen.insert(status.key.as_str()) {
            errors.add("statuses", format!("Status \"{}\" is listed twice.", status.key));
        }
    }
    errors
}

/// Fresh random token; tokens are compared for equality only.
pub fn generate_field_version() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(FIELD_VERSION_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct SettingsStore {
    db: RatingDatabase,
}

impl SettingsStore {
    pub fn new(db: RatingDatabase) -> Self {
        Self { db }
    }

    pub async fn load(&self) -> AppResult<Settings> {
        let raw: Option<String> =
            sqlx::query_scalar(&format!("SELECT value FROM {SETTINGS_TABLE} WHERE key = ?"))
                .bind(SETTINGS_KEY)
                .fetch_optional(self.db.pool())
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to load settings: {}", e)))?;
        parse_settings(raw)
    }

    pub async fn field_version(&self) -> AppResult<Option<String>> {
        Ok(self.load().await?.field_version)
    }

    pub async fn default_status(&self) -> AppResult<String> {
        Ok(self.load().await?.default_status().to_string())
    }

    /// Store a new random field-version token and return it.
    #[instrument(skip(self))]
    pub async fn bump_field_version(&self) -> AppResult<String> {
        let token = generate_field_version();
        let stored = token.clone();
        self.modify(move |settings| settings.field_version = Some(stored))
            .await?;
        debug!(field_version = %token, "field version bumped");
        Ok(token)
    }

    #[instrument(skip(self, statuses))]
    pub async fn save_statuses(&self, statuses: Vec<StatusOption>) -> AppResult<Settings> {
        validate_statuses(&statuses).into_result()?;
        let count = statuses.len();
        let settings = self.modify(move |settings| settings.statuses = statuses).await?;
        info!(count, "saved rating statuses");
        Ok(settings)
    }

    /// Replace the default rating layout, deleting the previous one.
    #[instrument(skip(self, layouts, layout))]
    pub async fn save_default_layout(
        &self,
        layouts: &dyn LayoutService,
        layout: &FieldLayout,
    ) -> AppResult<LayoutId> {
        let previous = self.load().await?.field_layout_id;
        let layout_id = layouts.save_layout(layout).await?;

        if let Err(err) = self
            .modify(move |settings| settings.field_layout_id = Some(layout_id))
            .await
        {
            if let Err(cleanup_err) = layouts.delete_layout(layout_id).await {
                warn!(%layout_id, error = %cleanup_err, "failed to discard unsaved layout");
            }
            return Err(err);
        }

        if let Some(previous) = previous.filter(|previous| *previous != layout_id) {
            layouts.delete_layout(previous).await?;
        }
        info!(%layout_id, "saved default rating layout");
        Ok(layout_id)
    }

    async fn modify<F>(&self, apply: F) -> AppResult<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut tx = self.db.begin_transaction().await?;
        let result = modify_in(tx.conn(), apply).await;
        tx.finish(result).await
    }
}

async fn modify_in<F>(conn: &mut SqliteConnection, apply: F) -> AppResult<Settings>
where
    F: FnOnce(&mut Settings),
{
    let raw: Option<String> =
        sqlx::query_scalar(&format!("SELECT value FROM {SETTINGS_TABLE} WHERE key = ?"))
            .bind(SETTINGS_KEY)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to load settings: {}", e)))?;

    let mut settings = parse_settings(raw)?;
    apply(&mut settings);

    let encoded = serde_json::to_string(&settings)
        .map_err(|e| AppError::Internal(format!("Failed to encode settings: {}", e)))?;
    sqlx::query(&format!(
        "INSERT INTO {SETTINGS_TABLE} (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value"
    ))
    .bind(SETTINGS_KEY)
    .bind(encoded)
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::DatabaseError(format!("Failed to save settings: {}", e)))?;

    Ok(settings)
}

fn parse_settings(raw: Option<String>) -> AppResult<Settings> {
    match raw {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| AppError::Internal(format!("Stored settings are corrupt: {}", e))),
        None => Ok(Settings::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::collaborators::InMemoryLayoutService;

    async fn store() -> SettingsStore {
        SettingsStore::new(RatingDatabase::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_defaults_without_stored_row() {
        let settings = store().await.load().await.unwrap();
        assert_eq!(settings.default_status(), "active");
        assert!(settings.has_status("disabled"));
        assert!(settings.field_version.is_none());
    }

    #[tokio::test]
    async fn test_bump_field_version_changes_token() {
        let store = store().await;
        let first = store.bump_field_version().await.unwrap();
        let second = store.bump_field_version().await.unwrap();

        assert_eq!(first.len(), FIELD_VERSION_LENGTH);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
        assert_eq!(store.field_version().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_save_statuses() {
        let store = store().await;
        store
            .save_statuses(vec![
                StatusOption::new("pending", "Awaiting review"),
                StatusOption::new("active", "Live"),
                StatusOption::new("spam", "Spam"),
            ])
            .await
            .unwrap();
        assert_eq!(store.default_status().await.unwrap(), "pending");

        let err = store
            .save_statuses(vec![
                StatusOption::new("active", "Active"),
                StatusOption::new("active", "Again"),
            ])
            .await
            .unwrap_err();
        assert!(err.validation_errors().unwrap().has("statuses"));

        assert!(store.save_statuses(vec![]).await.is_err());
        assert!(store
            .save_statuses(vec![StatusOption::new("Not Valid", "x")])
            .await
            .is_err());
        assert_eq!(store.default_status().await.unwrap(), "pending");
    }

    #[tokio::test]
    async fn test_default_layout_replaces_previous() {
        let store = store().await;
        let layouts = InMemoryLayoutService::new();

        let first = store
            .save_default_layout(&layouts, &FieldLayout::new(["summary"]))
            .await
            .unwrap();
        let second = store
            .save_default_layout(&layouts, &FieldLayout::new(["summary", "photos"]))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(layouts.layout_count().await, 1);
        assert_eq!(store.load().await.unwrap().field_layout_id, Some(second));
    }
}
