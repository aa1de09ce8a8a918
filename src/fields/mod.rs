// Rating Fields - user-defined numeric dimensions, one physical column each

pub mod model;
pub mod registry;
pub mod version;

pub use model::{Field, FieldDefinition};
pub use registry::FieldRegistry;
pub use version::FieldVersionGate;

/// Prefix of every dynamic column on the ratings table
pub const FIELD_PREFIX: &str = "rating_";

/// Column holding the values of the field with this handle.
pub fn column_name(handle: &str) -> String {
    format!("{}{}", FIELD_PREFIX, handle)
}
