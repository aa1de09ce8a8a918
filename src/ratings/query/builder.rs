// Rating Query Builder - filter predicates over fixed and dynamic columns, row hydration
// Dynamic columns missing from the table are left out of the select

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

use crate::core::{millis_to_datetime, CollectionId, ElementId, RatingId, UserId};
use crate::error::{AppError, AppResult};
use crate::fields::Field;
use crate::infrastructure::database::RATINGS_TABLE;
use crate::infrastructure::schema_ops::quote_ident;
use crate::ratings::model::{FieldValues, Rating};
use crate::ratings::relations::{CollectionRelation, ElementRelation, OwnerRelation};
use crate::ratings::service::RatingService;
use crate::ratings::stats::RatingStats;
use crate::ratings::status::RatingStatus;

use super::params::{find_param_value, parse_base_param, Join, Operand, Operator, ParamValue};
use super::results::ResultSet;

const FIXED_COLUMNS: &str =
    "id, collection_id, element_id, owner_id, name, email, status, date_created, date_updated";

/// Attribute names accepted by `order_by`, with their columns
const ORDERABLE: &[(&str, &str)] = &[
    ("id", "id"),
    ("collectionId", "collection_id"),
    ("elementId", "element_id"),
    ("ownerId", "owner_id"),
    ("name", "name"),
    ("email", "email"),
    ("status", "status"),
    ("dateCreated", "date_created"),
    ("dateUpdated", "date_updated"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Which relation a key-valued parameter resolves through
#[derive(Debug, Clone, Copy)]
enum KeyLookup {
    None,
    Collection,
    Element,
    Owner,
}

#[derive(Debug, Clone)]
enum Bound {
    Int(i64),
    Text(String),
}

/// One (operator, value) pair, resolved and ready to render
#[derive(Debug, Clone)]
enum Clause {
    IsNull { column: &'static str, negated: bool },
    Blank { column: &'static str, negated: bool },
    Compare { column: &'static str, operator: Operator, value: Bound },
    Like { column: &'static str, negated: bool, pattern: String },
    Constant(bool),
}

#[derive(Debug, Clone)]
struct Predicate {
    join: Join,
    clauses: Vec<Clause>,
}

/// A dynamic column present on the table
#[derive(Debug, Clone)]
pub(crate) struct DynamicColumn {
    pub field: Field,
    pub column: String,
}

/// Everything resolved before SQL is built
pub(crate) struct Prepared {
    pub columns: Vec<DynamicColumn>,
    predicates: Vec<Predicate>,
    order: Vec<(String, Direction)>,
}

impl Prepared {
    pub(crate) fn column_for(&self, handle: &str) -> Option<&DynamicColumn> {
        self.columns
            .iter()
            .find(|column| column.field.handle.as_str().eq_ignore_ascii_case(handle))
    }
}

/// Aggregate functions the stats aggregator needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl Aggregate {
    fn as_sql(self) -> &'static str {
        match self {
            Aggregate::Count => "COUNT",
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
        }
    }
}

/// Composable rating query. Every filter is optional; filters combine with AND.
#[derive(Clone)]
pub struct RatingQuery<'a> {
    service: &'a RatingService,
    id: Option<ParamValue>,
    collection: Option<ParamValue>,
    element: Option<ParamValue>,
    owner: Option<ParamValue>,
    name: Option<ParamValue>,
    email: Option<ParamValue>,
    status: Option<ParamValue>,
    order: Vec<(String, Direction)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl<'a> RatingQuery<'a> {
    pub fn new(service: &'a RatingService) -> Self {
        Self {
            service,
            id: None,
            collection: None,
            element: None,
            owner: None,
            name: None,
            email: None,
            status: Some(ParamValue::from(RatingStatus::Active)),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn id(mut self, value: impl Into<ParamValue>) -> Self {
        self.id = Some(value.into());
        self
    }

    /// Collection ids, handles or collections.
    pub fn collection(mut self, value: impl Into<ParamValue>) -> Self {
        self.collection = Some(value.into());
        self
    }

    /// Element ids, URIs or elements.
    pub fn element(mut self, value: impl Into<ParamValue>) -> Self {
        self.element = Some(value.into());
        self
    }

    /// User ids, usernames, emails or users.
    pub fn owner(mut self, value: impl Into<ParamValue>) -> Self {
        self.owner = Some(value.into());
        self
    }

    pub fn name(mut self, value: impl Into<ParamValue>) -> Self {
        self.name = Some(value.into());
        self
    }

    pub fn email(mut self, value: impl Into<ParamValue>) -> Self {
        self.email = Some(value.into());
        self
    }

    /// Only `active` unless set. `Null` or `"any"` lifts the filter.
    pub fn status(mut self, value: impl Into<ParamValue>) -> Self {
        self.status = match value.into() {
            ParamValue::Null => None,
            ParamValue::Str(text) if text.trim().eq_ignore_ascii_case("any") => None,
            other => Some(other),
        };
        self
    }

    pub fn any_status(mut self) -> Self {
        self.status = None;
        self
    }

    /// Order by a fixed attribute (`dateCreated`, `name`, ...) or a field handle.
    pub fn order_by(mut self, attribute: impl Into<String>, direction: Direction) -> Self {
        self.order.push((attribute.into(), direction));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn stats(self) -> RatingStats<'a> {
        RatingStats::new(self)
    }

    #[instrument(skip(self))]
    pub async fn all(&self) -> AppResult<ResultSet> {
        let prepared = self.prepare().await?;

        let mut select = format!("SELECT {FIXED_COLUMNS}");
        for dynamic in &prepared.columns {
            let column = quote_ident(&dynamic.column);
            select.push_str(&format!(", CAST({column} AS REAL) AS {column}"));
        }
        let mut qb = QueryBuilder::<Sqlite>::new(select);
        qb.push(format!(" FROM {RATINGS_TABLE}"));
        push_where(&mut qb, &prepared.predicates);
        self.push_order_and_page(&mut qb, &prepared);

        let rows = qb
            .build()
            .fetch_all(self.service.database().pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to query ratings: {}", e)))?;
        debug!(rows = rows.len(), "rating query fetched");

        let ratings = self.hydrate(&rows, &prepared).await?;
        Ok(ResultSet::new(ratings))
    }

    pub async fn one(&self) -> AppResult<Option<Rating>> {
        let results = self.clone().limit(1).all().await?;
        Ok(results.into_iter().next())
    }

    pub async fn ids(&self) -> AppResult<Vec<RatingId>> {
        let prepared = self.prepare().await?;
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT id FROM {RATINGS_TABLE}"));
        push_where(&mut qb, &prepared.predicates);
        self.push_order_and_page(&mut qb, &prepared);

        let ids: Vec<i64> = qb
            .build_query_scalar()
            .fetch_all(self.service.database().pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to query rating ids: {}", e)))?;
        Ok(ids.into_iter().map(RatingId::new).collect())
    }

    /// Matching rows, ignoring limit and offset.
    pub async fn count(&self) -> AppResult<i64> {
        let prepared = self.prepare().await?;
        self.aggregate_count(&prepared, None).await
    }

    pub async fn exists(&self) -> AppResult<bool> {
        Ok(self.count().await? > 0)
    }

    /// Resolve the field catalog, physical columns and every lookup.
    pub(crate) async fn prepare(&self) -> AppResult<Prepared> {
        let catalog = self.service.field_registry().find_all().await?;
        let physical = self.service.physical_columns().await?;
        let columns: Vec<DynamicColumn> = catalog
            .into_iter()
            .filter_map(|field| {
                let column = field.column_name();
                physical
                    .contains(&column)
                    .then_some(DynamicColumn { field, column })
            })
            .collect();

        let mut predicates = Vec::new();
        if let Some(value) = &self.id {
            predicates.push(self.key_predicate(value, "id", KeyLookup::None).await?);
        }
        if let Some(value) = &self.collection {
            predicates.push(
                self.key_predicate(value, CollectionRelation::COLUMN, KeyLookup::Collection)
                    .await?,
            );
        }
        if let Some(value) = &self.element {
            predicates.push(
                self.key_predicate(value, ElementRelation::COLUMN, KeyLookup::Element)
                    .await?,
            );
        }
        if let Some(value) = &self.owner {
            predicates.push(
                self.key_predicate(value, OwnerRelation::COLUMN, KeyLookup::Owner)
                    .await?,
            );
        }
        if let Some(value) = &self.name {
            predicates.push(text_predicate(value, "name"));
        }
        if let Some(value) = &self.email {
            predicates.push(text_predicate(value, "email"));
        }
        if let Some(value) = &self.status {
            predicates.push(text_predicate(value, "status"));
        }

        let mut order = Vec::new();
        for (attribute, direction) in &self.order {
            if let Some((_, column)) = ORDERABLE
                .iter()
                .find(|(name, column)| *name == attribute.as_str() || *column == attribute.as_str())
            {
                order.push((column.to_string(), *direction));
                continue;
            }
            if let Some(dynamic) = columns
                .iter()
                .find(|c| c.field.handle.as_str().eq_ignore_ascii_case(attribute))
            {
                order.push((quote_ident(&dynamic.column), *direction));
                continue;
            }
            if self.service.field_registry().find_by_handle(attribute).await?.is_some() {
                debug!(%attribute, "ordering column missing from table, ignored");
                continue;
            }
            return Err(AppError::validation(
                "orderBy",
                format!("Cannot order ratings by \"{}\".", attribute),
            ));
        }
        if order.is_empty() {
            order.push(("date_created".to_string(), Direction::Desc));
            order.push(("id".to_string(), Direction::Desc));
        }

        Ok(Prepared { columns, predicates, order })
    }

    pub(crate) async fn aggregate(
        &self,
        prepared: &Prepared,
        function: Aggregate,
        column: &str,
    ) -> AppResult<Option<f64>> {
        let column = quote_ident(column);
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT CAST({}({column}) AS REAL) FROM {RATINGS_TABLE}",
            function.as_sql()
        ));
        push_where(&mut qb, &prepared.predicates);
        qb.build_query_scalar::<Option<f64>>()
            .fetch_one(self.service.database().pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to aggregate ratings: {}", e)))
    }

    /// `COUNT(*)` without a column, otherwise the non-null values of it.
    pub(crate) async fn aggregate_count(&self, prepared: &Prepared, column: Option<&str>) -> AppResult<i64> {
        let target = column.map(quote_ident).unwrap_or_else(|| "*".to_string());
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {}({target}) FROM {RATINGS_TABLE}",
            Aggregate::Count.as_sql()
        ));
        push_where(&mut qb, &prepared.predicates);
        qb.build_query_scalar::<i64>()
            .fetch_one(self.service.database().pool())
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count ratings: {}", e)))
    }

    pub(crate) fn service(&self) -> &'a RatingService {
        self.service
    }

    fn push_order_and_page(&self, qb: &mut QueryBuilder<'_, Sqlite>, prepared: &Prepared) {
        qb.push(" ORDER BY ");
        {
            let mut order = qb.separated(", ");
            for (column, direction) in &prepared.order {
                order.push(format!("{} {}", column, direction.as_sql()));
            }
        }

        if self.limit.is_some() || self.offset.is_some() {
            qb.push(" LIMIT ").push_bind(self.limit.unwrap_or(-1));
            if let Some(offset) = self.offset {
                qb.push(" OFFSET ").push_bind(offset);
            }
        }
    }

    async fn key_predicate(
        &self,
        value: &ParamValue,
        column: &'static str,
        lookup: KeyLookup,
    ) -> AppResult<Predicate> {
        let param = parse_base_param(value.clone());
        let mut clauses = Vec::with_capacity(param.values.len());
        for value in &param.values {
            let condition = find_param_value(value);
            let clause = match condition.operand {
                Operand::Empty => Clause::IsNull {
                    column,
                    negated: condition.operator.is_negated(),
                },
                Operand::Id(id) => Clause::Compare {
                    column,
                    operator: condition.operator,
                    value: Bound::Int(id),
                },
                Operand::Text(key) => match self.resolve_key(lookup, &key).await? {
                    Some(id) => Clause::Compare {
                        column,
                        operator: condition.operator,
                        value: Bound::Int(id),
                    },
                    None => {
                        debug!(%column, %key, "lookup did not resolve");
                        Clause::Constant(condition.operator.is_negated())
                    }
                },
            };
            clauses.push(clause);
        }
        Ok(Predicate { join: param.join, clauses })
    }

    async fn resolve_key(&self, lookup: KeyLookup, key: &str) -> AppResult<Option<i64>> {
        if key.is_empty() {
            return Ok(None);
        }
        match lookup {
            KeyLookup::None => Ok(None),
            KeyLookup::Collection => {
                CollectionRelation::lookup(self.service.collection_registry(), key).await
            }
            KeyLookup::Element => {
                ElementRelation::lookup(self.service.element_store(), key).await
            }
            KeyLookup::Owner => OwnerRelation::lookup(self.service.user_store(), key).await,
        }
    }

    async fn hydrate(&self, rows: &[SqliteRow], prepared: &Prepared) -> AppResult<Vec<Rating>> {
        // handles of each collection's fields that have a selected column
        let mut collection_fields: HashMap<CollectionId, Vec<(String, String)>> = HashMap::new();
        let selected: HashSet<&str> = prepared.columns.iter().map(|c| c.column.as_str()).collect();

        let mut ratings = Vec::with_capacity(rows.len());
        for row in rows {
            let collection_id = CollectionId::new(decode(row, "collection_id")?);
            if !collection_fields.contains_key(&collection_id) {
                let fields = match self
                    .service
                    .collection_registry()
                    .find_by_id(collection_id)
                    .await?
                {
                    Some(collection) => self
                        .service
                        .collection_registry()
                        .get_rating_fields(&collection)
                        .await?
                        .into_iter()
                        .map(|field| (field.handle.as_str().to_string(), field.column_name()))
                        .filter(|(_, column)| selected.contains(column.as_str()))
                        .collect(),
                    None => Vec::new(),
                };
                collection_fields.insert(collection_id, fields);
            }

            let mut values = FieldValues::new();
            if let Some(fields) = collection_fields.get(&collection_id) {
                for (handle, column) in fields {
                    values.set(handle.clone(), decode::<Option<f64>>(row, column)?);
                }
            }

            let status: String = decode(row, "status")?;
            ratings.push(Rating {
                id: Some(RatingId::new(decode(row, "id")?)),
                collection: CollectionRelation::new(collection_id),
                element: ElementRelation::new(ElementId::new(decode(row, "element_id")?)),
                owner: OwnerRelation::new(decode::<Option<i64>>(row, "owner_id")?.map(UserId::new)),
                name: decode(row, "name")?,
                email: decode(row, "email")?,
                status: Some(RatingStatus::from(status)),
                values,
                date_created: Some(millis_to_datetime(decode(row, "date_created")?)),
                date_updated: Some(millis_to_datetime(decode(row, "date_updated")?)),
                sequence: None,
            });
        }
        Ok(ratings)
    }
}

fn decode<'r, T>(row: &'r SqliteRow, column: &str) -> AppResult<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column)
        .map_err(|e| AppError::DatabaseError(format!("Failed to decode rating column {}: {}", column, e)))
}

/// Predicate for a text column: literals, `*` wildcards and the empty marker.
fn text_predicate(value: &ParamValue, column: &'static str) -> Predicate {
    let param = parse_base_param(value.clone());
    let clauses = param
        .values
        .iter()
        .map(|value| {
            let condition = find_param_value(value);
            let negated = condition.operator.is_negated();
            match condition.operand.as_text() {
                None => Clause::Blank { column, negated },
                Some(text) if text.contains('*') => Clause::Like {
                    column,
                    negated,
                    pattern: text.replace('*', "%"),
                },
                Some(text) => Clause::Compare {
                    column,
                    operator: condition.operator,
                    value: Bound::Text(text),
                },
            }
        })
        .collect();
    Predicate { join: param.join, clauses }
}

fn push_where(qb: &mut QueryBuilder<'_, Sqlite>, predicates: &[Predicate]) {
    qb.push(" WHERE 1 = 1");
    for predicate in predicates {
        if predicate.clauses.is_empty() {
            continue;
        }
        qb.push(" AND (");
        for (position, clause) in predicate.clauses.iter().enumerate() {
            if position > 0 {
                qb.push(predicate.join.as_sql());
            }
            push_clause(qb, clause);
        }
        qb.push(")");
    }
}

fn push_clause(qb: &mut QueryBuilder<'_, Sqlite>, clause: &Clause) {
    match clause {
        Clause::IsNull { column, negated: false } => {
            qb.push(format!("{column} IS NULL"));
        }
        Clause::IsNull { column, negated: true } => {
            qb.push(format!("{column} IS NOT NULL"));
        }
        Clause::Blank { column, negated: false } => {
            qb.push(format!("({column} IS NULL OR {column} = '')"));
        }
        Clause::Blank { column, negated: true } => {
            qb.push(format!("({column} IS NOT NULL AND {column} != '')"));
        }
        Clause::Compare { column, operator, value } => {
            qb.push(format!("{column} {} ", operator.as_sql()));
            match value {
                Bound::Int(id) => qb.push_bind(*id),
                Bound::Text(text) => qb.push_bind(text.clone()),
            };
        }
        Clause::Like { column, negated, pattern } => {
            let keyword = if *negated { "NOT LIKE" } else { "LIKE" };
            qb.push(format!("{column} {keyword} ")).push_bind(pattern.clone());
        }
        Clause::Constant(matches) => {
            qb.push(if *matches { "1 = 1" } else { "0 = 1" });
        }
    }
}
