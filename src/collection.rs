//! # Catalog View Module
//!
//! A [`CatalogView`] owns the filter state of one collection, the statement
//! compiled from it and the cached number of matching images.
//!
//! ## Lifecycle
//!
//! - Every setter only marks the view stale; nothing is rebuilt until
//!   [`CatalogView::update`] runs, either explicitly or lazily from
//!   [`CatalogView::query`].
//! - `update()` compiles the statement, counts its rows, persists the filter
//!   state (canonical view only) and emits a hint message.
//! - [`CatalogView::refresh`] is the cheap path taken on external catalog changes:
//!   it re-runs the stored count statement without rebuilding the query.
//! - A failed `update()` leaves the previous statement and count in place.
//!
//! One view per application is *canonical*: it persists its state and broadcasts
//! [`CollectionEvent`]s. Views created with [`CatalogView::clone_view`] are
//! independent copies that do neither.

use crate::{
    ImageId,
    config::ConfigStore,
    database::{Database, DatabaseError},
    notifier::{ChangeKind, CollectionEvent},
    query::{
        CameraLookup, CollectionQuery, Comparator, ExtendedWhere, FilterFlags, FilterParams,
        QueryFlags, RatingFilter, SortField, all_query, count_query, rule_set, selected_query,
    },
};
use std::{error::Error as _, sync::Arc};
use thiserror::Error;
use tokio::sync::broadcast;

/// A compiled statement together with the statement counting its rows.
///
/// With grouping on, `ungrouped` holds the same collection with every group
/// member visible.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Compiled {
    query: String,
    count_sql: String,
    count_binds: Vec<i64>,
    query_flags: QueryFlags,
    ungrouped: Option<Ungrouped>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Ungrouped {
    query: String,
    count_sql: String,
}

impl Compiled {
    fn ungrouped_query(&self) -> &str {
        self.ungrouped.as_ref().map_or(&self.query, |u| &u.query)
    }

    /// Bind values selecting the full result of a paginated query.
    fn window(&self) -> Vec<i64> {
        if self.query_flags.contains(QueryFlags::USE_LIMIT) {
            vec![0, -1]
        } else {
            vec![]
        }
    }
}

/// The filtered view of the catalog.
pub struct CatalogView {
    db: Database,
    config: Arc<dyn ConfigStore>,
    events: Option<broadcast::Sender<CollectionEvent>>,
    is_canonical: bool,
    params: FilterParams,
    extended_where: ExtendedWhere,
    grouping: Option<ImageId>,
    compiled: Option<Compiled>,
    stale: bool,
    count: u32,
    ungrouped_count: u32,
}

impl std::fmt::Debug for CatalogView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogView")
            .field("is_canonical", &self.is_canonical)
            .field("params", &self.params)
            .field("extended_where", &self.extended_where)
            .field("grouping", &self.grouping)
            .field("compiled", &self.compiled)
            .field("stale", &self.stale)
            .field("count", &self.count)
            .field("ungrouped_count", &self.ungrouped_count)
            .finish()
    }
}

impl CatalogView {
    /// Creates the canonical view with default parameters and no compiled query.
    ///
    /// # Arguments
    ///
    /// * `db` - The catalog database.
    /// * `config` - Store the filter state and rule list are persisted to.
    /// * `events` - Channel for [`CollectionEvent`]s; `None` disables broadcasting.
    pub fn new(
        db: Database,
        config: Arc<dyn ConfigStore>,
        events: Option<broadcast::Sender<CollectionEvent>>,
    ) -> Self {
        Self {
            db,
            config,
            events,
            is_canonical: true,
            params: FilterParams::default(),
            extended_where: ExtendedWhere::default(),
            grouping: None,
            compiled: None,
            stale: true,
            count: 0,
            ungrouped_count: 0,
        }
    }

    /// Creates the canonical view and loads its persisted state.
    pub async fn open(
        db: Database,
        config: Arc<dyn ConfigStore>,
        events: Option<broadcast::Sender<CollectionEvent>>,
    ) -> Result<Self, CatalogError> {
        let mut view = Self::new(db, config, events);
        view.reset().await?;

        Ok(view)
    }

    /// Returns an independent, non-canonical copy of this view.
    ///
    /// The copy starts with the same parameters, statement and count, but never
    /// persists its state or broadcasts events.
    pub fn clone_view(&self) -> Self {
        Self {
            db: self.db.clone(),
            config: Arc::clone(&self.config),
            events: None,
            is_canonical: false,
            params: self.params,
            extended_where: self.extended_where.clone(),
            grouping: self.grouping,
            compiled: self.compiled.clone(),
            stale: self.stale,
            count: self.count,
            ungrouped_count: self.ungrouped_count,
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.is_canonical
    }

    /// Returns `true` when a setter ran since the last successful update.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn config(&self) -> &Arc<dyn ConfigStore> {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Subscribes to the events of this view; `None` if it does not broadcast.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<CollectionEvent>> {
        self.events.as_ref().map(broadcast::Sender::subscribe)
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    pub fn extended_where(&self) -> &ExtendedWhere {
        &self.extended_where
    }

    pub fn grouping(&self) -> Option<ImageId> {
        self.grouping
    }

    pub fn set_film_id(&mut self, film_id: u32) {
        self.params.film_id = film_id;
        self.stale = true;
    }

    pub fn set_rating(&mut self, rating: RatingFilter) {
        self.params.rating = rating;
        self.stale = true;
    }

    pub fn set_rating_comparator(&mut self, comparator: Comparator) {
        self.params.comparator = comparator;
        self.stale = true;
    }

    pub fn set_sort(&mut self, sort: SortField, descending: bool) {
        self.params.sort = sort;
        self.params.descending = descending;
        self.stale = true;
    }

    pub fn set_filter_flags(&mut self, flags: FilterFlags) {
        self.params.filter_flags = flags;
        self.stale = true;
    }

    pub fn set_query_flags(&mut self, flags: QueryFlags) {
        self.params.query_flags = flags;
        self.stale = true;
    }

    pub fn set_extended_where(&mut self, extended: ExtendedWhere) {
        self.extended_where = extended;
        self.stale = true;
    }

    /// `None` turns grouping off; `Some(g)` hides non-leading group members
    /// except those of the expanded group `g`.
    pub fn set_grouping(&mut self, expanded: Option<ImageId>) {
        self.grouping = expanded;
        self.stale = true;
    }

    /// Reloads the persisted filter state, falling back to the defaults for
    /// absent keys, and rebuilds.
    pub async fn reset(&mut self) -> Result<(), CatalogError> {
        self.params = FilterParams::load(self.config.as_ref());
        self.stale = true;

        self.update().await
    }

    /// Rebuilds the statement and the count from the current parameters.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::StorageFailure`] if counting fails; the previously
    /// compiled statement and count are kept and the view stays stale.
    pub async fn update(&mut self) -> Result<(), CatalogError> {
        let builder = CollectionQuery::new(&self.params, &self.extended_where);
        let query = builder.clone().with_grouping(self.grouping).to_sql();
        let (count_sql, count_binds) =
            count_query(&query, self.params.query_flags, &self.extended_where);

        let count = self.db.count(&count_sql, &count_binds).await?;

        let ungrouped_query = builder.to_sql();
        let (ungrouped, ungrouped_count) = if ungrouped_query == query {
            (None, count)
        } else {
            let (ungrouped_count_sql, _) =
                count_query(&ungrouped_query, self.params.query_flags, &self.extended_where);
            let ungrouped_count = self.db.count(&ungrouped_count_sql, &count_binds).await?;
            let ungrouped = Ungrouped {
                query: ungrouped_query,
                count_sql: ungrouped_count_sql,
            };
            (Some(ungrouped), ungrouped_count)
        };

        tracing::debug!(query = %query, count, ungrouped_count, "updated collection");

        self.compiled = Some(Compiled {
            query,
            count_sql,
            count_binds,
            query_flags: self.params.query_flags,
            ungrouped,
        });
        self.count = clamp_count(count);
        self.ungrouped_count = clamp_count(ungrouped_count);
        self.stale = false;

        if self.is_canonical {
            self.params.store(self.config.as_ref());
        }

        self.emit_hint().await;

        Ok(())
    }

    /// Returns the compiled statement, building it first if it is absent or stale.
    pub async fn query(&mut self) -> Result<&str, CatalogError> {
        if self.stale || self.compiled.is_none() {
            self.update().await?;
        }

        self.compiled
            .as_ref()
            .map(|c| c.query.as_str())
            .ok_or_else(|| CatalogError::StorageFailure("collection query unavailable".into()))
    }

    /// Returns the last successfully compiled statement without rebuilding.
    pub fn current_query(&self) -> Option<&str> {
        self.compiled.as_ref().map(|c| c.query.as_str())
    }

    /// Returns the cached number of images in the collection.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Like [`CatalogView::count`], but counting every member of a group.
    pub fn ungrouped_count(&self) -> u32 {
        self.ungrouped_count
    }

    /// Counts the selected images, independent of the collection filters.
    pub async fn selected_count(&self) -> Result<u32, CatalogError> {
        Ok(clamp_count(self.db.count_selected().await?))
    }

    /// Returns up to `limit` images of the whole catalog (`-1` for all),
    /// ordered by the current sort but ignoring every filter.
    pub async fn all(&self, limit: i64) -> Result<Vec<ImageId>, CatalogError> {
        let sql = all_query(
            self.params.sort,
            self.params.descending,
            self.params.query_flags.contains(QueryFlags::USE_SORT),
        );

        Ok(self.db.query_ids(&sql, &[limit]).await?)
    }

    /// Returns up to `limit` selected images (`-1` for all), ordered by the
    /// current sort but ignoring every filter.
    pub async fn selected(&self, limit: i64) -> Result<Vec<ImageId>, CatalogError> {
        let sql = selected_query(
            self.params.sort,
            self.params.descending,
            self.params.query_flags.contains(QueryFlags::USE_SORT),
        );

        Ok(self.db.query_ids(&sql, &[limit]).await?)
    }

    /// Returns the image at 0-based position `n` of the collection, or `None`
    /// when `n` is not below the cached count.
    pub async fn nth(&mut self, n: usize) -> Result<Option<ImageId>, CatalogError> {
        self.query().await?;
        if n >= self.count as usize {
            return Ok(None);
        }

        let Some(compiled) = self.compiled.as_ref() else {
            return Ok(None);
        };

        if compiled.query_flags.contains(QueryFlags::USE_LIMIT) {
            let offset = i64::try_from(n).unwrap_or(i64::MAX);
            let ids = self.db.query_ids(&compiled.query, &[offset, 1]).await?;
            Ok(ids.first().copied())
        } else {
            let ids = self.db.query_ids(&compiled.query, &[]).await?;
            Ok(ids.get(n).copied())
        }
    }

    /// Returns one page of the collection: up to `limit` images (`-1` for all)
    /// starting at position `offset`.
    pub async fn images(&mut self, offset: i64, limit: i64) -> Result<Vec<ImageId>, CatalogError> {
        self.query().await?;

        let Some(compiled) = self.compiled.as_ref() else {
            return Ok(Vec::new());
        };

        if compiled.query_flags.contains(QueryFlags::USE_LIMIT) {
            Ok(self.db.query_ids(&compiled.query, &[offset, limit]).await?)
        } else {
            let ids = self.db.query_ids(&compiled.query, &[]).await?;
            let skip = usize::try_from(offset).unwrap_or(0);
            let take = usize::try_from(limit).unwrap_or(usize::MAX);
            Ok(ids.into_iter().skip(skip).take(take).collect())
        }
    }

    /// Returns the 0-based position of `imgid` in the collection, or `None` if it
    /// is not part of it.
    pub async fn position(&mut self, imgid: ImageId) -> Result<Option<usize>, CatalogError> {
        self.query().await?;

        let Some(compiled) = self.compiled.as_ref() else {
            return Ok(None);
        };

        let ids = self
            .db
            .query_ids(&compiled.query, &compiled.window())
            .await?;

        Ok(ids.iter().position(|id| *id == imgid))
    }

    /// Like [`CatalogView::position`], but reports a missing image as position 0.
    pub async fn image_offset(&mut self, imgid: ImageId) -> Result<usize, CatalogError> {
        Ok(self.position(imgid).await?.unwrap_or(0))
    }

    /// Re-runs the stored count statement without rebuilding the query.
    ///
    /// Builds the query first if none has been compiled yet. Returns whether the
    /// count changed.
    pub async fn recount(&mut self) -> Result<bool, CatalogError> {
        let Some(compiled) = self.compiled.as_ref() else {
            let before = self.count;
            self.update().await?;
            return Ok(before != self.count);
        };

        let count = clamp_count(
            self.db
                .count(&compiled.count_sql, &compiled.count_binds)
                .await?,
        );
        let ungrouped_count = match &compiled.ungrouped {
            Some(ungrouped) => clamp_count(
                self.db
                    .count(&ungrouped.count_sql, &compiled.count_binds)
                    .await?,
            ),
            None => count,
        };

        let changed = count != self.count || ungrouped_count != self.ungrouped_count;
        self.count = count;
        self.ungrouped_count = ungrouped_count;

        tracing::debug!(count, changed, "recounted collection");

        Ok(changed)
    }

    /// Reacts to an external catalog change.
    ///
    /// Recounts, re-emits the hint when the count changed and broadcasts
    /// [`ChangeKind::Reload`]. Clones only recount.
    pub async fn refresh(&mut self) -> Result<bool, CatalogError> {
        let changed = self.recount().await?;

        if self.is_canonical {
            if changed {
                self.emit_hint().await;
            }
            self.send(CollectionEvent::Changed(ChangeKind::Reload));
        }

        Ok(changed)
    }

    /// Recompiles the stored rule list into the extended where and rebuilds.
    ///
    /// The film-roll filter is dropped in favour of the rules, and selected images
    /// that left the collection are unselected. Group members hidden by grouping
    /// still count as part of the collection.
    pub async fn update_query(&mut self, cameras: &dyn CameraLookup) -> Result<(), CatalogError> {
        let predicate = rule_set::compile_config(self.config.as_ref(), cameras);

        self.set_extended_where(ExtendedWhere::Predicate(predicate));
        self.set_query_flags(self.params.query_flags | QueryFlags::USE_WHERE_EXT);
        self.set_filter_flags(self.params.filter_flags - FilterFlags::FILM_ID);

        self.update().await?;

        if let Some(compiled) = self.compiled.as_ref() {
            let removed = self
                .db
                .prune_selection(compiled.ungrouped_query(), &compiled.window())
                .await?;

            if removed > 0 {
                tracing::info!(removed, "unselected images outside the new collection");
                self.send(CollectionEvent::SelectionChanged);
            }
        }

        if self.is_canonical {
            self.send(CollectionEvent::Changed(ChangeKind::NewQuery));
        }

        Ok(())
    }

    /// Formats the status line for `selected` selected images.
    ///
    /// The total ignores grouping, since hidden group members can be selected too.
    pub fn hint_message(&self, selected: u32) -> String {
        let total = self.ungrouped_count;
        if selected == 1 {
            format!("1 image of {total} in current collection is selected")
        } else {
            format!("{selected} images of {total} in current collection are selected")
        }
    }

    async fn emit_hint(&self) {
        if self.events.is_none() {
            return;
        }

        match self.db.count_selected().await {
            Ok(selected) => {
                let message = self.hint_message(clamp_count(selected));
                self.send(CollectionEvent::Hint(message));
            }
            Err(e) => tracing::warn!(error = %e, "failed to count selected images"),
        }
    }

    fn send(&self, event: CollectionEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                tracing::trace!("no collection listeners");
            }
        }
    }
}

fn clamp_count(count: i64) -> u32 {
    u32::try_from(count.max(0)).unwrap_or(u32::MAX)
}

/// Errors surfaced by [`CatalogView`] operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The storage engine rejected a statement; the view kept its previous state.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl From<DatabaseError> for CatalogError {
    fn from(e: DatabaseError) -> Self {
        match e.source() {
            Some(source) => CatalogError::StorageFailure(format!("{e}: {source}")),
            None => CatalogError::StorageFailure(e.to_string()),
        }
    }
}
