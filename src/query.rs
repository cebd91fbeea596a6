//! # Query Module
//!
//! Everything that turns filter state into SQL text:
//!
//! - [`rule`]: one filter rule (property + free text) into a predicate.
//! - [`rule_set`]: an ordered rule list into one combined predicate, plus the
//!   persisted forms of that list.
//! - [`collection`]: filter parameters and the extended where into the full
//!   collection statement, its count statement and the helper queries.
//! - [`camera`]: the camera alias lookup used by camera rules.
//!
//! Nothing here touches the database; execution lives in [`crate::database`].

pub mod camera;
pub mod collection;
pub mod rule;
pub mod rule_set;

pub use camera::{CameraIndex, CameraLookup};
pub use collection::{
    CollectionQuery, Comparator, ExtendedWhere, FilterFlags, FilterParams, QueryFlags,
    RatingFilter, SortField, Term, all_query, count_query, selected_query,
};
pub use rule::{MATCH_ALL, Property};
pub use rule_set::{Conjunction, FilterRule, MAX_RULES, RuleList};
