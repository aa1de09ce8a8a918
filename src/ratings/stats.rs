// Stats Aggregator - count/sum/average/min/max over a rating query

use crate::error::AppResult;

use super::query::builder::{Aggregate, Prepared, RatingQuery};

/// Read-only aggregates over the ratings a query matches (limit and offset ignored).
pub struct RatingStats<'a> {
    query: RatingQuery<'a>,
    default_field: Option<String>,
}

impl<'a> RatingStats<'a> {
    pub fn new(query: RatingQuery<'a>) -> Self {
        Self { query, default_field: None }
    }

    /// Field used by `average`, `sum`, `min` and `max` when none is named.
    pub fn with_default_field(mut self, handle: impl Into<String>) -> Self {
        self.default_field = Some(handle.into());
        self
    }

    /// Ratings matched, or with `field`, ratings carrying a value for it.
    pub async fn count(&self, field: Option<&str>) -> AppResult<i64> {
        let prepared = self.query.prepare().await?;
        match field {
            None => self.query.aggregate_count(&prepared, None).await,
            Some(handle) => match self.column(&prepared, handle).await? {
                Some(column) => self.query.aggregate_count(&prepared, Some(&column)).await,
                None => Ok(0),
            },
        }
    }

    pub async fn average(&self, field: Option<&str>) -> AppResult<Option<f64>> {
        self.compute(Aggregate::Avg, field).await
    }

    pub async fn sum(&self, field: Option<&str>) -> AppResult<Option<f64>> {
        self.compute(Aggregate::Sum, field).await
    }

    pub async fn min(&self, field: Option<&str>) -> AppResult<Option<f64>> {
        self.compute(Aggregate::Min, field).await
    }

    pub async fn max(&self, field: Option<&str>) -> AppResult<Option<f64>> {
        self.compute(Aggregate::Max, field).await
    }

    async fn compute(&self, function: Aggregate, field: Option<&str>) -> AppResult<Option<f64>> {
        let Some(handle) = field.or(self.default_field.as_deref()) else {
            return Ok(None);
        };
        let prepared = self.query.prepare().await?;
        match self.column(&prepared, handle).await? {
            Some(column) => self.query.aggregate(&prepared, function, &column).await,
            None => Ok(None),
        }
    }

    /// Column of a field, `None` when it is missing from the table.
    /// Unknown handles are a `NotFound`.
    async fn column(&self, prepared: &Prepared, handle: &str) -> AppResult<Option<String>> {
        if let Some(dynamic) = prepared.column_for(handle) {
            return Ok(Some(dynamic.column.clone()));
        }
        self.query
            .service()
            .field_registry()
            .get_by_handle(handle)
            .await?;
        Ok(None)
    }
}
