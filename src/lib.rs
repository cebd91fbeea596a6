//! # Photo Collection Engine
//!
//! This crate turns the filter state of a photo catalog into SQL and keeps a cached
//! view of the resulting collection: which images match, how many there are, and
//! how they are ordered.
//!
//! ## Features
//!
//! - **Rule Compilation**: Free-text filter rules ("`>=f/2.8`", "`2021:06:15`",
//!   "`[100;400]`") are parsed and compiled into SQL predicates.
//! - **Rule Persistence**: Rule lists round-trip through a key-value
//!   [`config::ConfigStore`] and through a compact serialized string.
//! - **Collection Queries**: Film roll, rating, sort order and grouping settings are
//!   combined with the compiled rules into one statement plus its count statement.
//! - **Cached View**: [`collection::CatalogView`] recompiles lazily, recounts cheaply
//!   on external changes, and broadcasts change events.
//! - **Change Coalescing**: [`notifier::ChangeNotifier`] owns the canonical view on a
//!   single task and merges bursts of update requests into one recompute.
//!
//! ## Usage
//!
//! ```no_run
//! use photocollect::collection::CatalogView;
//! use photocollect::config::MemoryConfig;
//! use photocollect::database::{Database, Pool};
//! use photocollect::notifier::{CatalogSignal, ChangeNotifier};
//! use std::sync::Arc;
//! use tokio::sync::broadcast;
//!
//! async fn watch(url: &str) -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::with_migration(Pool::connect(url).await?).await?;
//!     let (events, _) = broadcast::channel(64);
//!
//!     let view = CatalogView::open(db, Arc::new(MemoryConfig::new()), Some(events)).await?;
//!     let mut rx = view.subscribe().ok_or("view does not broadcast")?;
//!     let handle = ChangeNotifier::spawn(view);
//!
//!     handle.signal(CatalogSignal::FilmRollsImported(1))?;
//!     println!("{:?}", rx.recv().await?);
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod collection;
pub mod config;
pub mod database;
mod dialect;
pub mod notifier;
pub mod parser;
pub mod query;

/// Identifier of an image row in the catalog.
pub type ImageId = i64;

/// The types most callers need, in one import.
pub mod prelude {
    pub use crate::ImageId;
    pub use crate::collection::{CatalogError, CatalogView};
    pub use crate::config::{ConfigError, ConfigStore, FileConfig, MemoryConfig};
    pub use crate::database::{Database, DatabaseError};
    pub use crate::notifier::{
        CatalogSignal, ChangeKind, ChangeNotifier, CollectionEvent, NotifierError, NotifierHandle,
    };
    pub use crate::query::{
        CameraIndex, CameraLookup, Comparator, Conjunction, ExtendedWhere, FilterFlags,
        FilterParams, FilterRule, Property, QueryFlags, RatingFilter, RuleList, SortField,
    };
}
