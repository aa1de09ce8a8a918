use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Longest identifier the store accepts; bounds the length of field handles.
    pub max_identifier_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 5,
            },
            cache: CacheConfig { capacity: 1000 },
            schema: SchemaConfig { max_identifier_length: 64 },
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            database: DatabaseConfig {
                url: env::var("RATING_DATABASE_URL")
                    .or_else(|_| env::var("DATABASE_URL"))
                    .unwrap_or(defaults.database.url),
                max_connections: env::var("RATING_DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(defaults.database.max_connections),
            },
            cache: CacheConfig {
                capacity: env::var("RATING_CACHE_CAPACITY")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .unwrap_or(defaults.cache.capacity),
            },
            schema: SchemaConfig {
                max_identifier_length: env::var("RATING_MAX_IDENTIFIER_LENGTH")
                    .unwrap_or_else(|_| "64".to_string())
                    .parse()
                    .unwrap_or(defaults.schema.max_identifier_length),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database.url = url.into();
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cache.capacity == 0 {
            anyhow::bail!("cache capacity must be greater than zero");
        }
        if self.schema.max_identifier_length <= crate::fields::FIELD_PREFIX.len() {
            anyhow::bail!(
                "max identifier length {} leaves no room for field handles",
                self.schema.max_identifier_length
            );
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.url.contains(":memory:") || self.database.url.contains("mode=memory")
    }

    /// Longest handle a field may use once the column prefix is applied.
    pub fn max_field_handle_length(&self) -> usize {
        self.schema.max_identifier_length - crate::fields::FIELD_PREFIX.len()
    }
}
