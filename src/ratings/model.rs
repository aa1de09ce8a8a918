use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::core::{CollectionId, ElementId, RatingId, UserId};
use crate::error::{AppResult, ValidationErrors};
use crate::fields::Field;
use crate::infrastructure::collaborators::UserStore;

use super::relations::{CollectionRelation, ElementRelation, OwnerRelation};
use super::status::RatingStatus;

/// Values of a rating's dynamic fields, keyed by field handle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValues(BTreeMap<String, Option<f64>>);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, handle: impl Into<String>, value: impl Into<Option<f64>>) {
        self.0.insert(handle.into(), value.into());
    }

    pub fn get(&self, handle: &str) -> Option<f64> {
        self.0.get(handle).copied().flatten()
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.0.contains_key(handle)
    }

    pub fn remove(&mut self, handle: &str) -> Option<Option<f64>> {
        self.0.remove(handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.0.iter().map(|(handle, value)| (handle.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the map against the fields of the rating's collection:
    /// every key must name one of them, values must be in bounds,
    /// and required fields must carry a value.
    pub fn check_against(&self, fields: &[(Field, bool)]) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let known: HashSet<&str> = fields.iter().map(|(field, _)| field.handle.as_str()).collect();

        for handle in self.0.keys() {
            if !known.contains(handle.as_str()) {
                errors.add(
                    handle.clone(),
                    format!("\"{}\" isn't a rating field of this collection.", handle),
                );
            }
        }

        for (field, required) in fields {
            match self.get(field.handle.as_str()) {
                Some(value) => {
                    if let Err(message) = field.validate_value(value) {
                        errors.add(field.handle.as_str(), message);
                    }
                }
                None if *required => {
                    errors.add(field.handle.as_str(), format!("{} cannot be blank.", field.name));
                }
                None => {}
            }
        }
        errors
    }
}

/// Value of a fixed attribute or a dynamic field
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Integer(i64),
    Number(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AttributeValue::Null)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<DateTime<Utc>> for AttributeValue {
    fn from(value: DateTime<Utc>) -> Self {
        AttributeValue::Timestamp(value)
    }
}

/// Neighbours of a rating within the result set it was fetched in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceLinks {
    pub prev: Option<RatingId>,
    pub next: Option<RatingId>,
}

/// One submitted rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub id: Option<RatingId>,
    pub collection: CollectionRelation,
    pub element: ElementRelation,
    pub owner: OwnerRelation,
    pub name: Option<String>,
    pub email: Option<String>,
    /// `None` until chosen. `create` then applies the configured default status.
    pub status: Option<RatingStatus>,
    pub values: FieldValues,
    pub date_created: Option<DateTime<Utc>>,
    pub date_updated: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub sequence: Option<SequenceLinks>,
}

impl Rating {
    pub fn new(collection_id: CollectionId, element_id: ElementId) -> Self {
        Self {
            id: None,
            collection: CollectionRelation::new(collection_id),
            element: ElementRelation::new(element_id),
            owner: OwnerRelation::default(),
            name: None,
            email: None,
            status: None,
            values: FieldValues::new(),
            date_created: None,
            date_updated: None,
            sequence: None,
        }
    }

    pub fn with_owner(mut self, owner_id: Option<UserId>) -> Self {
        self.owner = OwnerRelation::new(owner_id);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<RatingStatus>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_value(mut self, handle: impl Into<String>, value: f64) -> Self {
        self.values.set(handle, value);
        self
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection.id
    }

    pub fn element_id(&self) -> ElementId {
        self.element.id
    }

    pub fn owner_id(&self) -> Option<UserId> {
        self.owner.id
    }

    pub fn value(&self, handle: &str) -> Option<f64> {
        self.values.get(handle)
    }

    /// Fixed attributes first, then dynamic field values.
    /// `None` means the name is neither.
    pub fn attribute(&self, name: &str) -> Option<AttributeValue> {
        let fixed: AttributeValue = match name {
            "id" => self.id.map(RatingId::value).into(),
            "collectionId" => self.collection.id.value().into(),
            "elementId" => self.element.id.value().into(),
            "ownerId" => self.owner.id.map(UserId::value).into(),
            "name" => self.name.clone().into(),
            "email" => self.email.clone().into(),
            "status" => self.status.as_ref().map(|status| status.as_str().to_string()).into(),
            "dateCreated" => self.date_created.into(),
            "dateUpdated" => self.date_updated.into(),
            _ => {
                return self
                    .values
                    .contains(name)
                    .then(|| self.values.get(name).into())
            }
        };
        Some(fixed)
    }

    /// Display name of the owner when there is one, else the submitted name.
    pub async fn publisher(&self, users: &dyn UserStore) -> AppResult<Option<String>> {
        if let Some(owner) = self.owner.resolve(users).await? {
            return Ok(Some(owner.display_name().to_string()));
        }
        Ok(self.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldId, Handle};
    use crate::infrastructure::collaborators::{InMemoryUserStore, User};

    fn field(handle: &str, min: f64, max: f64) -> Field {
        Field {
            id: FieldId::new(1),
            handle: Handle::new_unchecked(handle),
            name: handle.to_uppercase(),
            min,
            max,
            increment: 1.0,
            precision: 0,
            date_created: Utc::now(),
            date_updated: Utc::now(),
        }
    }

    #[test]
    fn test_check_against() {
        let fields = vec![(field("quality", 1.0, 5.0), true), (field("value", 1.0, 5.0), false)];

        let mut values = FieldValues::new();
        values.set("quality", 4.0);
        assert!(values.check_against(&fields).is_empty());

        values.set("quality", 9.0);
        values.set("speed", 2.0);
        let errors = values.check_against(&fields);
        assert!(errors.has("quality"));
        assert!(errors.has("speed"));
        assert!(!errors.has("value"));

        let errors = FieldValues::new().check_against(&fields);
        assert_eq!(errors.get("quality"), &["QUALITY cannot be blank.".to_string()]);
    }

    #[test]
    fn test_attribute_lookup_prefers_fixed_attributes() {
        let rating = Rating::new(CollectionId::new(2), ElementId::new(8))
            .with_name("Kim")
            .with_value("quality", 3.0)
            .with_value("name", 1.0);

        assert_eq!(rating.attribute("name"), Some(AttributeValue::Text("Kim".into())));
        assert_eq!(rating.attribute("quality"), Some(AttributeValue::Number(3.0)));
        assert_eq!(rating.attribute("elementId"), Some(AttributeValue::Integer(8)));
        assert_eq!(rating.attribute("ownerId"), Some(AttributeValue::Null));
        assert_eq!(rating.attribute("speed"), None);
    }

    #[tokio::test]
    async fn test_publisher() {
        let users = InMemoryUserStore::new();
        users
            .insert(User::new(1, "ana", "ana@example.com").with_full_name("Ana Ortiz"))
            .await;

        let anonymous = Rating::new(CollectionId::new(1), ElementId::new(1)).with_name("Guest");
        assert_eq!(anonymous.publisher(&users).await.unwrap(), Some("Guest".to_string()));

        let owned = anonymous.clone().with_owner(Some(UserId::new(1)));
        assert_eq!(owned.publisher(&users).await.unwrap(), Some("Ana Ortiz".to_string()));
    }
}
