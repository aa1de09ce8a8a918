// Core types and primitives

pub mod strong_types;

pub use strong_types::{
    current_time_millis, millis_to_datetime, CollectionId, ElementId, FieldId, Handle, Identifier, LayoutId,
    RatingId, UserId, RESERVED_HANDLES,
};
