// Strong Types - newtype ids and handles shared by every registry
// Keeps field, collection, rating, element and user ids from being mixed up

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

macro_rules! strong_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl $name {
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            pub fn value(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<$name> for Identifier {
            fn from(id: $name) -> Self {
                Identifier::Id(id.0)
            }
        }
    };
}

/// Either a numeric id or a textual key (handle, URI, username or email).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    Id(i64),
    Key(String),
}

impl Identifier {
    /// Numeric text is read as an id, anything else as a key.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<i64>() {
            Ok(id) => Identifier::Id(id),
            Err(_) => Identifier::Key(value.to_string()),
        }
    }
}

impl From<i64> for Identifier {
    fn from(id: i64) -> Self {
        Identifier::Id(id)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::parse(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Identifier::parse(&value)
    }
}

impl From<&Handle> for Identifier {
    fn from(handle: &Handle) -> Self {
        Identifier::Key(handle.as_str().to_string())
    }
}

strong_id!(
    /// Id of a rating field definition
    FieldId
);
strong_id!(
    /// Id of a rating collection
    CollectionId
);
strong_id!(
    /// Id of a submitted rating
    RatingId
);
strong_id!(
    /// Id of a content element owned by the host CMS
    ElementId
);
strong_id!(
    /// Id of a user in the host identity store
    UserId
);
strong_id!(
    /// Id of an attribute layout owned by the layout service
    LayoutId
);

/// Words a handle may not take because they collide with fixed rating attributes.
pub const RESERVED_HANDLES: &[&str] = &[
    "archived",
    "children",
    "dateCreated",
    "dateUpdated",
    "enabled",
    "id",
    "link",
    "locale",
    "parents",
    "siblings",
    "uid",
    "uri",
    "url",
    "ref",
    "status",
    "title",
];

static HANDLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_]*$").expect("handle pattern is valid"));

/// Identifier-safe short name of a field or collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(String);

impl Handle {
    /// Parse a handle, rejecting anything that could not be used as a column suffix.
    pub fn parse(value: &str, max_length: usize) -> Result<Self, String> {
        let value = value.trim();
        if value.is_empty() {
            return Err("Handle cannot be blank.".to_string());
        }
        if value.len() > max_length {
            return Err(format!(
                "Handle should contain at most {} characters.",
                max_length
            ));
        }
        if !HANDLE_PATTERN.is_match(value) {
            return Err(format!(
                "\"{}\" isn't a valid handle: use letters, numbers and underscores, starting with a letter.",
                value
            ));
        }
        if RESERVED_HANDLES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(value))
        {
            return Err(format!("\"{}\" is a reserved word.", value));
        }
        Ok(Self(value.to_string()))
    }

    /// Wrap a handle already validated by the store.
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Handle {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Milliseconds since the unix epoch, the unit every timestamp column uses.
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::from(UNIX_EPOCH))
}
