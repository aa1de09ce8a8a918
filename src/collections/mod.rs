// Rating Collections - which fields apply to which content type

pub mod model;
pub mod registry;

pub use model::{Collection, CollectionDefinition, CollectionField, CollectionFieldSpec};
pub use registry::CollectionRegistry;
