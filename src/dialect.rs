//! # SQL Dialect Module
//!
//! This module defines the `Dialect` trait, which keeps every fixed piece of SQL the
//! catalog issues in one place: placeholder syntax, literal escaping, the pagination
//! clauses appended to collection queries, the helper statements used by the
//! collection view, and the schema migration.
//!
//! The dialect is chosen at compile time by feature flags. When the `sqlite` feature
//! is enabled, the `CurrentDialect` type alias is set to `sqlite::SqliteDialect`.
//!
//! ## Key Components
//! - **`Dialect` Trait**: Default-method statement builders parameterized by
//!   `placeholder(idx)`, plus the dialect-specific `migration`.
//! - **`CurrentDialect` Alias**: The dialect selected by feature flags, so the query
//!   builders and the storage layer never name a concrete backend.

#[cfg(feature = "sqlite")]
mod sqlite;

/// The current SQL dialect used at compile time, determined by feature flags.
#[cfg(feature = "sqlite")]
pub type CurrentDialect = sqlite::SqliteDialect;

#[cfg(feature = "sqlite")]
pub type Db = sqlx::Sqlite;

/// A trait for SQL dialects to support database-specific query generation.
pub trait Dialect {
    /// Returns the SQL placeholder syntax for the given parameter index.
    ///
    /// - SQLite: `?1`, `?2`, ...
    ///
    /// # Parameters
    /// - `idx`: The 1-based parameter index.
    fn placeholder(idx: usize) -> String;

    /// Escapes free text so it can be embedded inside a single-quoted SQL literal.
    ///
    /// Filter predicates are plain text (they are persisted and shown to the user),
    /// so user input is escaped instead of bound.
    fn escape_literal(text: &str) -> String {
        text.replace('\'', "''")
    }

    /// Returns the pagination clause appended to a collection query:
    /// offset at parameter 1, row count at parameter 2.
    fn limit_clause() -> String {
        format!(
            " limit {}, {}",
            Self::placeholder(1),
            Self::placeholder(2)
        )
    }

    /// Returns the single-argument clause used by the unpaginated helper queries.
    fn single_limit_clause() -> String {
        format!(" limit {}", Self::placeholder(1))
    }

    /// Returns the statement counting the current selection.
    fn selected_count_statement() -> &'static str {
        "select count(distinct imgid) from selected_images"
    }

    /// Returns the statement that drops selected images which are no longer part of
    /// the given collection query.
    ///
    /// # Parameters
    /// - `query`: The full collection query; its pagination parameters stay unbound
    ///   here and are supplied by the caller.
    fn prune_selection_statement(query: &str) -> String {
        format!("delete from selected_images where imgid not in ({query})")
    }

    /// Returns the statement listing every distinct camera maker and model.
    fn camera_models_statement() -> &'static str {
        "select maker, model from images group by maker, model"
    }

    /// Creates every table the catalog queries refer to.
    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error>;
}
