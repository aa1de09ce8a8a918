// Schema Operations - column DDL for the ratings table
// Add, retype/rename, drop and introspect the dynamic rating columns

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use std::fmt;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

/// Numeric column types a rating field can be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    TinyIntUnsigned,
    TinyInt,
    SmallIntUnsigned,
    SmallInt,
    MediumIntUnsigned,
    MediumInt,
    IntUnsigned,
    Int,
    BigInt,
    Decimal { digits: u8, scale: u8 },
}

const INTEGER_TYPES: &[(ColumnType, i128, i128)] = &[
    (ColumnType::TinyIntUnsigned, 0, 255),
    (ColumnType::TinyInt, -128, 127),
    (ColumnType::SmallIntUnsigned, 0, 65_535),
    (ColumnType::SmallInt, -32_768, 32_767),
    (ColumnType::MediumIntUnsigned, 0, 16_777_215),
    (ColumnType::MediumInt, -8_388_608, 8_388_607),
    (ColumnType::IntUnsigned, 0, 4_294_967_295),
    (ColumnType::Int, -2_147_483_648, 2_147_483_647),
];

impl ColumnType {
    /// Smallest type that holds every value of `[min, max]` at `precision` decimals.
    pub fn for_range(min: f64, max: f64, precision: u8) -> Self {
        if precision == 0 {
            let low = min.floor() as i128;
            let high = max.ceil() as i128;
            return INTEGER_TYPES
                .iter()
                .find(|(_, lo, hi)| *lo <= low && high <= *hi)
                .map(|(column_type, _, _)| *column_type)
                .unwrap_or(ColumnType::BigInt);
        }

        let magnitude = min.abs().max(max.abs()).trunc() as u128;
        let integer_digits = magnitude.to_string().len() as u8;
        ColumnType::Decimal {
            digits: integer_digits.saturating_add(precision),
            scale: precision,
        }
    }

    /// Whether every value in `[min, max]` at `precision` decimals fits this type.
    pub fn can_represent(&self, min: f64, max: f64, precision: u8) -> bool {
        match self {
            ColumnType::Decimal { digits, scale } => {
                if precision > *scale {
                    return false;
                }
                let integer_digits = digits.saturating_sub(*scale) as i32;
                let limit = 10f64.powi(integer_digits);
                min.abs() < limit && max.abs() < limit
            }
            ColumnType::BigInt => precision == 0,
            integer => {
                precision == 0
                    && INTEGER_TYPES
                        .iter()
                        .find(|(column_type, _, _)| column_type == integer)
                        .map(|(_, lo, hi)| {
                            *lo <= min.floor() as i128 && max.ceil() as i128 <= *hi
                        })
                        .unwrap_or(false)
            }
        }
    }

    /// Decimal places the type stores.
    pub fn scale(&self) -> u8 {
        match self {
            ColumnType::Decimal { scale, .. } => *scale,
            _ => 0,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            ColumnType::TinyIntUnsigned => "TINYINT UNSIGNED".to_string(),
            ColumnType::TinyInt => "TINYINT".to_string(),
            ColumnType::SmallIntUnsigned => "SMALLINT UNSIGNED".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::MediumIntUnsigned => "MEDIUMINT UNSIGNED".to_string(),
            ColumnType::MediumInt => "MEDIUMINT".to_string(),
            ColumnType::IntUnsigned => "INT UNSIGNED".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Decimal { digits, scale } => format!("DECIMAL({},{})", digits, scale),
        }
    }

    /// Parse a declared column type as reported by the store.
    pub fn from_sql(declared: &str) -> Option<Self> {
        let normalized = normalize_type(declared);
        if let Some(args) = normalized
            .strip_prefix("DECIMAL(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let (digits, scale) = args.split_once(',')?;
            return Some(ColumnType::Decimal {
                digits: digits.trim().parse().ok()?,
                scale: scale.trim().parse().ok()?,
            });
        }
        INTEGER_TYPES
            .iter()
            .map(|(column_type, _, _)| *column_type)
            .chain(std::iter::once(ColumnType::BigInt))
            .find(|column_type| column_type.to_sql() == normalized)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

fn normalize_type(declared: &str) -> String {
    declared
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
        .replace(", ", ",")
}

/// Quote an identifier for interpolation into DDL/DML.
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Physical column as reported by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
}

impl ColumnInfo {
    pub fn column_type(&self) -> Option<ColumnType> {
        ColumnType::from_sql(&self.declared_type)
    }
}

pub async fn table_columns(conn: &mut SqliteConnection, table: &str) -> AppResult<Vec<ColumnInfo>> {
    let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| {
            AppError::DatabaseError(format!("Failed to read columns of {}: {}", table, e))
        })?;

    Ok(rows
        .into_iter()
        .map(|row| ColumnInfo {
            name: row.get("name"),
            declared_type: row.get("type"),
        })
        .collect())
}

pub async fn find_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> AppResult<Option<ColumnInfo>> {
    Ok(table_columns(conn, table)
        .await?
        .into_iter()
        .find(|info| info.name == column))
}

pub async fn column_exists(conn: &mut SqliteConnection, table: &str, column: &str) -> AppResult<bool> {
    Ok(find_column(conn, table, column).await?.is_some())
}

async fn execute_ddl(conn: &mut SqliteConnection, statement: &str, action: &str) -> AppResult<()> {
    debug!(%statement, "executing ddl");
    sqlx::query(statement)
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to {}: {}", action, e)))?;
    Ok(())
}

pub async fn add_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    column_type: ColumnType,
) -> AppResult<()> {
    let statement = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote_ident(table),
        quote_ident(column),
        column_type
    );
    execute_ddl(conn, &statement, &format!("add column {}.{}", table, column)).await?;
    info!(table, column, %column_type, "added rating column");
    Ok(())
}

pub async fn rename_column(
    conn: &mut SqliteConnection,
    table: &str,
    from: &str,
    to: &str,
) -> AppResult<()> {
    let statement = format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(from),
        quote_ident(to)
    );
    execute_ddl(conn, &statement, &format!("rename column {}.{} to {}", table, from, to)).await?;
    info!(table, from, to, "renamed rating column");
    Ok(())
}

/// Unused column name for a retype copy. Dynamic columns all start with
/// `rating_`, so the prefix keeps it clear of them.
async fn scratch_column(conn: &mut SqliteConnection, table: &str) -> AppResult<String> {
    let mut suffix = 0u32;
    loop {
        let candidate = format!("retype_{}", suffix);
        if !column_exists(conn, table, &candidate).await? {
            return Ok(candidate);
        }
        suffix += 1;
    }
}

/// Rename (when `new_name` differs) and retype a column in place, keeping its values.
///
/// SQLite cannot change a declared type directly, so a retype copies the values
/// into a fresh column of the new type which then takes the original name.
/// Copied values are rounded to the scale of the new type.
/// Everything runs on the caller's connection, so it commits or rolls back with
/// the surrounding transaction.
pub async fn alter_column(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    new_name: Option<&str>,
    column_type: ColumnType,
) -> AppResult<()> {
    let target = new_name.unwrap_or(column);

    if target != column {
        rename_column(conn, table, column, target).await?;
    }

    let current = find_column(conn, table, target).await?.ok_or_else(|| {
        AppError::SchemaDrift {
            table: table.to_string(),
            column: target.to_string(),
        }
    })?;

    if current.column_type() == Some(column_type) {
        return Ok(());
    }

    let scratch = scratch_column(conn, table).await?;
    add_column(conn, table, &scratch, column_type).await?;
    execute_ddl(
        conn,
        &format!(
            "UPDATE {} SET {} = ROUND({}, {})",
            quote_ident(table),
            quote_ident(&scratch),
            quote_ident(target),
            column_type.scale()
        ),
        &format!("copy values of {}.{}", table, target),
    )
    .await?;
    drop_column(conn, table, target).await?;
    rename_column(conn, table, &scratch, target).await?;

    info!(table, column = target, %column_type, "retyped rating column");
    Ok(())
}

pub async fn drop_column(conn: &mut SqliteConnection, table: &str, column: &str) -> AppResult<()> {
    let statement = format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table),
        quote_ident(column)
    );
    execute_ddl(conn, &statement, &format!("drop column {}.{}", table, column)).await?;
    info!(table, column, "dropped rating column");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::{RatingDatabase, RATINGS_TABLE};

    #[test]
    fn test_integer_type_selection() {
        assert_eq!(ColumnType::for_range(1.0, 5.0, 0), ColumnType::TinyIntUnsigned);
        assert_eq!(ColumnType::for_range(-5.0, 5.0, 0), ColumnType::TinyInt);
        assert_eq!(ColumnType::for_range(-5.0, 200.0, 0), ColumnType::SmallInt);
        assert_eq!(ColumnType::for_range(0.0, 1000.0, 0), ColumnType::SmallIntUnsigned);
        assert_eq!(ColumnType::for_range(0.0, 70_000.0, 0), ColumnType::MediumIntUnsigned);
        assert_eq!(ColumnType::for_range(-1.0, 3e9, 0), ColumnType::BigInt);
    }

    #[test]
    fn test_decimal_type_selection() {
        assert_eq!(
            ColumnType::for_range(0.0, 5.0, 1),
            ColumnType::Decimal { digits: 2, scale: 1 }
        );
        assert_eq!(
            ColumnType::for_range(-100.0, 10.0, 2),
            ColumnType::Decimal { digits: 5, scale: 2 }
        );
    }

    #[test]
    fn test_selected_type_represents_range() {
        let cases = [
            (0.0, 5.0, 0),
            (1.0, 10.0, 0),
            (-300.0, 300.0, 0),
            (0.0, 5.0, 2),
            (-99.5, 250.25, 2),
            (0.0, 100_000.0, 3),
        ];
        for (min, max, precision) in cases {
            let column_type = ColumnType::for_range(min, max, precision);
            assert!(
                column_type.can_represent(min, max, precision),
                "{} cannot hold [{}, {}] at {}",
                column_type,
                min,
                max,
                precision
            );
        }
        assert!(!ColumnType::TinyIntUnsigned.can_represent(0.0, 300.0, 0));
        assert!(!ColumnType::TinyIntUnsigned.can_represent(0.0, 5.0, 1));
    }

    #[test]
    fn test_declared_type_roundtrip() {
        for column_type in [
            ColumnType::TinyIntUnsigned,
            ColumnType::MediumInt,
            ColumnType::BigInt,
            ColumnType::Decimal { digits: 4, scale: 2 },
        ] {
            assert_eq!(ColumnType::from_sql(&column_type.to_sql()), Some(column_type));
        }
        assert_eq!(
            ColumnType::from_sql("decimal(4, 2)"),
            Some(ColumnType::Decimal { digits: 4, scale: 2 })
        );
        assert_eq!(ColumnType::from_sql("TEXT"), None);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("rating_quality"), "\"rating_quality\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[tokio::test]
    async fn test_add_alter_drop_column() {
        let db = RatingDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();

        add_column(tx.conn(), RATINGS_TABLE, "rating_quality", ColumnType::TinyIntUnsigned)
            .await
            .unwrap();
        assert!(column_exists(tx.conn(), RATINGS_TABLE, "rating_quality").await.unwrap());

        sqlx::query(
            "INSERT INTO ratings (collection_id, element_id, status, date_created, date_updated, rating_quality) VALUES (1, 1, 'active', 0, 0, 4)",
        )
        .execute(tx.conn())
        .await
        .unwrap();

        alter_column(
            tx.conn(),
            RATINGS_TABLE,
            "rating_quality",
            Some("rating_value"),
            ColumnType::Decimal { digits: 3, scale: 1 },
        )
        .await
        .unwrap();

        assert!(!column_exists(tx.conn(), RATINGS_TABLE, "rating_quality").await.unwrap());
        let info = find_column(tx.conn(), RATINGS_TABLE, "rating_value")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.column_type(), Some(ColumnType::Decimal { digits: 3, scale: 1 }));

        let value: f64 = sqlx::query_scalar("SELECT CAST(rating_value AS REAL) FROM ratings")
            .fetch_one(tx.conn())
            .await
            .unwrap();
        assert_eq!(value, 4.0);

        drop_column(tx.conn(), RATINGS_TABLE, "rating_value").await.unwrap();
        assert!(!column_exists(tx.conn(), RATINGS_TABLE, "rating_value").await.unwrap());

        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_narrowing_retype_rounds_values_and_skips_taken_scratch_names() {
        let db = RatingDatabase::new_in_memory().await.unwrap();
        let mut tx = db.begin_transaction().await.unwrap();

        let decimal = ColumnType::Decimal { digits: 3, scale: 2 };
        add_column(tx.conn(), RATINGS_TABLE, "rating_score", decimal).await.unwrap();
        add_column(tx.conn(), RATINGS_TABLE, "retype_0", ColumnType::TinyInt).await.unwrap();
        sqlx::query(
            "INSERT INTO ratings (collection_id, element_id, status, date_created, date_updated, rating_score, retype_0) VALUES (1, 1, 'active', 0, 0, 4.56, 7)",
        )
        .execute(tx.conn())
        .await
        .unwrap();

        alter_column(
            tx.conn(),
            RATINGS_TABLE,
            "rating_score",
            None,
            ColumnType::Decimal { digits: 2, scale: 1 },
        )
        .await
        .unwrap();
        let value: f64 = sqlx::query_scalar("SELECT CAST(rating_score AS REAL) FROM ratings")
            .fetch_one(tx.conn())
            .await
            .unwrap();
        assert_eq!(value, 4.6);

        alter_column(tx.conn(), RATINGS_TABLE, "rating_score", None, ColumnType::TinyIntUnsigned)
            .await
            .unwrap();
        let value: f64 = sqlx::query_scalar("SELECT CAST(rating_score AS REAL) FROM ratings")
            .fetch_one(tx.conn())
            .await
            .unwrap();
        assert_eq!(value, 5.0);

        let kept: i64 = sqlx::query_scalar("SELECT retype_0 FROM ratings")
            .fetch_one(tx.conn())
            .await
            .unwrap();
        assert_eq!(kept, 7);
        assert!(!column_exists(tx.conn(), RATINGS_TABLE, "retype_1").await.unwrap());

        tx.rollback().await.unwrap();
    }
}
