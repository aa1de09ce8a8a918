// Ratings - submitted ratings, their relations, moderation status, queries and stats

pub mod model;
pub mod query;
pub mod relations;
pub mod service;
pub mod stats;
pub mod status;

pub use model::{AttributeValue, FieldValues, Rating, SequenceLinks};
pub use query::{Direction, RatingQuery, ResultSet};
pub use relations::{CollectionRelation, ElementRelation, OwnerRelation};
pub use service::RatingService;
pub use stats::RatingStats;
pub use status::RatingStatus;
