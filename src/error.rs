use std::collections::BTreeMap;
use std::fmt;

/// Attribute-keyed validation messages collected before any write happens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, attribute: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(attribute.into())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (attribute, messages) in other.errors {
            self.errors.entry(attribute).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has(&self, attribute: &str) -> bool {
        self.errors.contains_key(attribute)
    }

    pub fn get(&self, attribute: &str) -> &[String] {
        self.errors.get(attribute).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// `Ok(())` when nothing was collected, otherwise `AppError::Validation`.
    pub fn into_result(self) -> AppResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (attribute, messages) in &self.errors {
            for message in messages {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{}: {}", attribute, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// How a missing entity was looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Id(i64),
    Handle(String),
    Generic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFound {
    pub entity: &'static str,
    pub lookup: Lookup,
}

impl NotFound {
    pub fn by_id(entity: &'static str, id: i64) -> Self {
        Self { entity, lookup: Lookup::Id(id) }
    }

    pub fn by_handle(entity: &'static str, handle: impl Into<String>) -> Self {
        Self { entity, lookup: Lookup::Handle(handle.into()) }
    }

    pub fn generic(entity: &'static str) -> Self {
        Self { entity, lookup: Lookup::Generic }
    }
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entity = self.entity.to_string();
        if let Some(first) = entity.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        match &self.lookup {
            Lookup::Id(id) => write!(f, "{} does not exist with the id \"{}\".", entity, id),
            Lookup::Handle(handle) => {
                write!(f, "{} does not exist with the handle \"{}\".", entity, handle)
            }
            Lookup::Generic => write!(f, "{} does not exist.", entity),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationErrors),
    NotFound(NotFound),
    SchemaDrift { table: String, column: String },
    Vetoed { hook: String, reason: String },
    DatabaseError(String),
    ConfigurationError(String),
    Internal(String),
}

impl AppError {
    /// Validation, lookup and hook-veto failures are recoverable by the caller;
    /// everything else aborted a transaction and must surface.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AppError::Validation(_) | AppError::NotFound(_) | AppError::Vetoed { .. }
        )
    }

    pub fn validation(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(attribute, message);
        AppError::Validation(errors)
    }

    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            AppError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(errors) => write!(f, "Validation error: {}", errors),
            AppError::NotFound(not_found) => write!(f, "Not found: {}", not_found),
            AppError::SchemaDrift { table, column } => write!(
                f,
                "Schema drift: column {}.{} is missing from the store",
                table, column
            ),
            AppError::Vetoed { hook, reason } => {
                write!(f, "Vetoed by hook '{}': {}", hook, reason)
            }
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<NotFound> for AppError {
    fn from(not_found: NotFound) -> Self {
        AppError::NotFound(not_found)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::Validation(errors)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_messages() {
        let by_id = NotFound::by_id("rating field", 7);
        assert_eq!(by_id.to_string(), "Rating field does not exist with the id \"7\".");

        let by_handle = NotFound::by_handle("rating collection", "reviews");
        assert_eq!(
            by_handle.to_string(),
            "Rating collection does not exist with the handle \"reviews\"."
        );

        assert_eq!(NotFound::generic("rating").to_string(), "Rating does not exist.");
    }

    #[test]
    fn test_validation_errors_accumulate() {
        let mut errors = ValidationErrors::new();
        errors.add("handle", "Handle is required");
        errors.add("handle", "Handle is too long");
        errors.add("min", "Min must be less than or equal to max");

        assert!(errors.has("handle"));
        assert_eq!(errors.get("handle").len(), 2);
        assert_eq!(errors.attributes().collect::<Vec<_>>(), vec!["handle", "min"]);

        let err = errors.into_result().unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AppError::DatabaseError("boom".into()).is_fatal());
        assert!(AppError::SchemaDrift { table: "ratings".into(), column: "rating_x".into() }
            .is_fatal());
        assert!(!AppError::NotFound(NotFound::generic("rating")).is_fatal());
        assert!(!AppError::Vetoed { hook: "h".into(), reason: "no".into() }.is_fatal());
    }
}
