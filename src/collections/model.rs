use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::core::{millis_to_datetime, CollectionId, FieldId, Handle, LayoutId};
use crate::error::ValidationErrors;
use crate::infrastructure::cache::CachedModel;
use crate::infrastructure::collaborators::FieldLayout;

/// A named grouping of rating fields targeting one content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: CollectionId,
    pub handle: Handle,
    pub name: String,
    pub element_type: String,
    pub field_layout_id: Option<LayoutId>,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

impl Collection {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: CollectionId::new(row.try_get("id")?),
            handle: Handle::new_unchecked(row.try_get::<String, _>("handle")?),
            name: row.try_get("name")?,
            element_type: row.try_get("element_type")?,
            field_layout_id: row.try_get::<Option<i64>, _>("field_layout_id")?.map(LayoutId::new),
            date_created: millis_to_datetime(row.try_get("date_created")?),
            date_updated: millis_to_datetime(row.try_get("date_updated")?),
        })
    }
}

impl CachedModel for Collection {
    fn cache_id(&self) -> i64 {
        self.id.value()
    }

    fn cache_handle(&self) -> &str {
        self.handle.as_str()
    }
}

/// One field requested for a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionFieldSpec {
    pub field_id: FieldId,
    pub required: bool,
}

impl CollectionFieldSpec {
    pub fn required(field_id: FieldId) -> Self {
        Self { field_id, required: true }
    }
}

impl From<FieldId> for CollectionFieldSpec {
    fn from(field_id: FieldId) -> Self {
        Self { field_id, required: false }
    }
}

/// Stored association between a collection and a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionField {
    pub collection_id: CollectionId,
    pub field_id: FieldId,
    pub required: bool,
    pub sort_order: i64,
}

impl CollectionField {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            collection_id: CollectionId::new(row.try_get("collection_id")?),
            field_id: FieldId::new(row.try_get("field_id")?),
            required: row.try_get("required")?,
            sort_order: row.try_get::<Option<i64>, _>("sort_order")?.unwrap_or_default(),
        })
    }
}

/// Submitted attributes of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDefinition {
    pub handle: String,
    pub name: String,
    pub element_type: String,
    /// Extra custom attributes; rebuilt on every save
    pub field_layout: FieldLayout,
}

impl CollectionDefinition {
    pub fn new(
        handle: impl Into<String>,
        name: impl Into<String>,
        element_type: impl Into<String>,
    ) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
            element_type: element_type.into(),
            field_layout: FieldLayout::default(),
        }
    }

    pub fn with_layout(mut self, layout: FieldLayout) -> Self {
        self.field_layout = layout;
        self
    }

    pub fn validate(&self, max_handle_length: usize) -> (Option<Handle>, ValidationErrors) {
        let mut errors = ValidationErrors::new();
        let handle = match Handle::parse(&self.handle, max_handle_length) {
            Ok(handle) => Some(handle),
            Err(message) => {
                errors.add("handle", message);
                None
            }
        };
        if self.name.trim().is_empty() {
            errors.add("name", "Name cannot be blank.");
        }
        if self.element_type.trim().is_empty() {
            errors.add("elementType", "Element type cannot be blank.");
        }
        (handle, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_validation() {
        let (handle, errors) = CollectionDefinition::new("reviews", "Reviews", "entry").validate(64);
        assert!(errors.is_empty());
        assert_eq!(handle.map(Handle::into_string), Some("reviews".to_string()));

        let (_, errors) = CollectionDefinition::new("id", "", "").validate(64);
        assert!(errors.has("handle"));
        assert!(errors.has("name"));
        assert!(errors.has("elementType"));
    }

    #[test]
    fn test_field_spec_from_id() {
        let spec: CollectionFieldSpec = FieldId::new(4).into();
        assert!(!spec.required);
        assert!(CollectionFieldSpec::required(FieldId::new(4)).required);
    }
}
