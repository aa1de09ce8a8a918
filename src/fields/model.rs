use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::core::{millis_to_datetime, FieldId, Handle};
use crate::error::ValidationErrors;
use crate::infrastructure::cache::CachedModel;
use crate::infrastructure::schema_ops::ColumnType;

use super::column_name;

/// Most decimal places a field may store
pub const MAX_PRECISION: u8 = 10;

const EPSILON: f64 = 1e-9;

/// A numeric rating dimension and its column on the ratings table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: FieldId,
    pub handle: Handle,
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub increment: f64,
    pub precision: u8,
    pub date_created: DateTime<Utc>,
    pub date_updated: DateTime<Utc>,
}

impl Field {
    pub fn column_name(&self) -> String {
        column_name(self.handle.as_str())
    }

    pub fn column_type(&self) -> ColumnType {
        ColumnType::for_range(self.min, self.max, self.precision)
    }

    /// Selectable values from `min` in steps of `increment`, never above `max`.
    pub fn options(&self) -> Vec<f64> {
        let mut options = Vec::new();
        let mut step = 0u32;
        loop {
            let value = self.round(self.min + self.increment * step as f64);
            if value > self.max + EPSILON {
                break;
            }
            options.push(value);
            step += 1;
        }
        options
    }

    pub fn round(&self, value: f64) -> f64 {
        let factor = 10f64.powi(self.precision as i32);
        (value * factor).round() / factor
    }

    pub fn validate_value(&self, value: f64) -> Result<(), String> {
        if !value.is_finite() || value < self.min - EPSILON || value > self.max + EPSILON {
            return Err(format!(
                "{} must be between {} and {}.",
                self.name, self.min, self.max
            ));
        }
        Ok(())
    }

    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let precision: i64 = row.try_get("decimal_precision")?;
        Ok(Self {
            id: FieldId::new(row.try_get("id")?),
            handle: Handle::new_unchecked(row.try_get::<String, _>("handle")?),
            name: row.try_get("name")?,
            min: row.try_get("min_value")?,
            max: row.try_get("max_value")?,
            increment: row.try_get("increment")?,
            precision: precision.clamp(0, MAX_PRECISION as i64) as u8,
            date_created: millis_to_datetime(row.try_get("date_created")?),
            date_updated: millis_to_datetime(row.try_get("date_updated")?),
        })
    }
}

impl CachedModel for Field {
    fn cache_id(&self) -> i64 {
        self.id.value()
    }

    fn cache_handle(&self) -> &str {
        self.handle.as_str()
    }
}

/// Submitted attributes of a field, before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub handle: String,
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub increment: f64,
    pub precision: u8,
}

impl FieldDefinition {
    /// A 0 to 5 whole-number field.
    pub fn new(handle: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
            min: 0.0,
            max: 5.0,
            increment: 1.0,
            precision: 0,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_increment(mut self, increment: f64) -> Self {
        self.increment = increment;
        self
    }

    pub fn with_precision(mut self, precision: u8) -> Self {
        self.precision = precision;
        self
    }

    /// Check shape and bounds. Handle uniqueness needs the store and is checked by the registry.
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
        if !self.min.is_finite() {
            errors.add("min", "Min must be a number.");
        }
        if !self.max.is_finite() {
            errors.add("max", "Max must be a number.");
        }
        if self.min.is_finite() && self.max.is_finite() && self.min > self.max {
            errors.add("min", "Min must be less than or equal to Max.");
        }
        if !self.increment.is_finite() || self.increment <= 0.0 {
            errors.add("increment", "Increment must be greater than 0.");
        }
        if self.precision > MAX_PRECISION {
            errors.add(
                "precision",
                format!("Precision must be at most {}.", MAX_PRECISION),
            );
        }

        (handle, errors)
    }

    /// Whether applying this definition to `field` changes its column.
    pub fn changes_column_of(&self, field: &Field) -> bool {
        self.handle.trim() != field.handle.as_str()
            || self.min != field.min
            || self.max != field.max
            || self.precision != field.precision
    }
}
