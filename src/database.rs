//! # Storage Boundary Module
//!
//! `Database` wraps an SQLx connection pool and is the only place where catalog
//! SQL is executed. The collection layers build statement text themselves and hand
//! it over together with their integer bind values; this module runs it, retries
//! transient failures and attaches the failing statement to every error.

use crate::{
    ImageId,
    dialect::{CurrentDialect, Dialect},
};
pub use crate::dialect::Db;
pub use sqlx::Pool;
use thiserror::Error;

pub async fn run_migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
    CurrentDialect::migration(pool).await
}

/// A handle to the catalog database.
///
/// Cloning is cheap: clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Db>,
}

impl Database {
    /// Runs the schema migration on `pool` and wraps it.
    pub async fn with_migration(pool: sqlx::Pool<Db>) -> Result<Self, sqlx::Error> {
        run_migration(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns the underlying pool, e.g. for importing fixtures.
    pub fn pool(&self) -> &Pool<Db> {
        &self.pool
    }

    async fn retry<F, Fut, T>(&self, mut op: F) -> Result<T, DatabaseError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, DatabaseError>>,
    {
        let max_retries = 3;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    tracing::warn!(attempt, error = %e, "retrying database operation");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs a query returning one image id per row.
    ///
    /// # Arguments
    ///
    /// * `sql` - The statement text, typically a compiled collection query.
    /// * `binds` - Integer values bound to `?1`, `?2`, ... in order.
    pub async fn query_ids(&self, sql: &str, binds: &[i64]) -> Result<Vec<ImageId>, DatabaseError> {
        self.retry(|| async {
            let mut q = sqlx::query_scalar::<_, ImageId>(sql);

            for bind in binds {
                q = q.bind(*bind);
            }

            q.fetch_all(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryFailed {
                    operation: DbOperation::QueryImages,
                    sql: sql.to_string(),
                    source: e,
                })
        })
        .await
    }

    /// Runs a query returning a single integer, such as a `count(...)`.
    ///
    /// A `NULL` or missing row is reported as zero.
    pub async fn count(&self, sql: &str, binds: &[i64]) -> Result<i64, DatabaseError> {
        let count: Option<Option<i64>> = self
            .retry(|| async {
                let mut q = sqlx::query_scalar::<_, Option<i64>>(sql);

                for bind in binds {
                    q = q.bind(*bind);
                }

                q.fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::CountImages,
                        sql: sql.to_string(),
                        source: e,
                    })
            })
            .await?;

        Ok(count.flatten().unwrap_or(0))
    }

    /// Counts the images currently in the selection.
    pub async fn count_selected(&self) -> Result<i64, DatabaseError> {
        self.count(CurrentDialect::selected_count_statement(), &[])
            .await
    }

    /// Removes every selected image that does not appear in the result of `query`.
    ///
    /// Returns the number of rows removed from the selection.
    pub async fn prune_selection(&self, query: &str, binds: &[i64]) -> Result<u64, DatabaseError> {
        let stmt = CurrentDialect::prune_selection_statement(query);

        let removed = self
            .retry(|| async {
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

                let mut q = sqlx::query(&stmt);
                for bind in binds {
                    q = q.bind(*bind);
                }

                let result = q
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::PruneSelection,
                        sql: stmt.clone(),
                        source: e,
                    })?;

                tx.commit()
                    .await
                    .map_err(|e| DatabaseError::TransactionFailed { source: e })?;

                Ok(result.rows_affected())
            })
            .await?;

        Ok(removed)
    }

    /// Lists every distinct `(maker, model)` pair present in the catalog.
    ///
    /// Rows with a missing maker or model are skipped.
    pub async fn camera_models(&self) -> Result<Vec<(String, String)>, DatabaseError> {
        let stmt = CurrentDialect::camera_models_statement();

        let rows: Vec<(Option<String>, Option<String>)> = self
            .retry(|| async {
                sqlx::query_as(stmt)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| DatabaseError::QueryFailed {
                        operation: DbOperation::QueryCameras,
                        sql: stmt.to_string(),
                        source: e,
                    })
            })
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(maker, model)| Some((maker?, model?)))
            .collect())
    }
}

/// Represents errors that can occur during database operations.
///
/// Each variant includes contextual information to assist with debugging and error handling.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A general SQL query failure, with the operation and the statement text.
    #[error("Query failed during {operation:?}: sql={sql}")]
    QueryFailed {
        operation: DbOperation,
        sql: String,
        #[source]
        source: sqlx::Error,
    },

    /// A failure to begin or commit a transaction.
    #[error("Failed to operate transaction")]
    TransactionFailed {
        #[source]
        source: sqlx::Error,
    },
}

/// The kind of database operation being performed,
/// used for attaching context to [`DatabaseError::QueryFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOperation {
    /// SELECT image ids for a collection query
    QueryImages,
    /// SELECT count(...) for a collection or the selection
    CountImages,
    /// DELETE FROM selected_images WHERE imgid NOT IN (...)
    PruneSelection,
    /// SELECT maker, model FROM images
    QueryCameras,
}

impl DatabaseError {
    fn is_retryable(&self) -> bool {
        let is_retryable_kind = |e: &sqlx::Error| {
            matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::PoolTimedOut
            )
        };

        match self {
            DatabaseError::QueryFailed { source, .. } => is_retryable_kind(source),
            DatabaseError::TransactionFailed { source } => is_retryable_kind(source),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{Database, DatabaseError, DbOperation};
    use sqlx::sqlite::SqlitePoolOptions;

    /// Returns a migrated database on a single-connection in-memory SQLite pool.
    pub(crate) async fn get_db() -> Database {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        Database::with_migration(pool).await.unwrap()
    }

    /// Inserts `(id, film_id, flags)` rows, each with a distinct filename.
    pub(crate) async fn insert_images(db: &Database, images: &[(i64, i64, i64)]) {
        for &(id, film_id, flags) in images {
            sqlx::query("INSERT OR IGNORE INTO film_rolls (id, folder) VALUES (?1, ?2)")
                .bind(film_id)
                .bind(format!("/photos/roll{film_id}"))
                .execute(db.pool())
                .await
                .unwrap();

            sqlx::query(
                "INSERT INTO images (id, group_id, film_id, filename, flags) VALUES (?1, ?1, ?2, ?3, ?4)",
            )
            .bind(id)
            .bind(film_id)
            .bind(format!("img_{id:04}.raw"))
            .bind(flags)
            .execute(db.pool())
            .await
            .unwrap();
        }
    }

    /// Verifies that `Database::with_migration` can be called multiple times
    /// on the same pool without error.
    #[tokio::test]
    async fn test_migration_idempotency() {
        let db = get_db().await;

        Database::with_migration(db.pool().clone()).await.unwrap();
        Database::with_migration(db.pool().clone()).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_ids_and_count() {
        let db = get_db().await;
        insert_images(&db, &[(1, 1, 0), (2, 1, 1), (3, 2, 2)]).await;

        let ids = db
            .query_ids("select id from images where film_id = ?1 order by id", &[1])
            .await
            .unwrap();
        assert_eq!(vec![1, 2], ids);

        let ids = db
            .query_ids("select id from images order by id limit ?1, ?2", &[1, -1])
            .await
            .unwrap();
        assert_eq!(vec![2, 3], ids);

        assert_eq!(3, db.count("select count(distinct id) from images", &[]).await.unwrap());
        assert_eq!(
            0,
            db.count("select max(id) from images where film_id = ?1", &[9])
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_prune_selection() {
        let db = get_db().await;
        insert_images(&db, &[(1, 1, 0), (2, 1, 0), (3, 2, 0)]).await;

        for id in [1, 2, 3] {
            sqlx::query("INSERT INTO selected_images (imgid) VALUES (?1)")
                .bind(id)
                .execute(db.pool())
                .await
                .unwrap();
        }
        assert_eq!(3, db.count_selected().await.unwrap());

        let removed = db
            .prune_selection("select id from images where film_id = 1 limit ?1, ?2", &[0, -1])
            .await
            .unwrap();

        assert_eq!(1, removed);
        assert_eq!(2, db.count_selected().await.unwrap());
    }

    #[tokio::test]
    async fn test_camera_models_skips_unknown() {
        let db = get_db().await;
        insert_images(&db, &[(1, 1, 0), (2, 1, 0), (3, 1, 0)]).await;

        sqlx::query("UPDATE images SET maker = 'Canon', model = 'EOS 5D' WHERE id IN (1, 2)")
            .execute(db.pool())
            .await
            .unwrap();

        assert_eq!(
            vec![("Canon".to_string(), "EOS 5D".to_string())],
            db.camera_models().await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_query_failure_carries_statement() {
        let db = get_db().await;

        match db.query_ids("select id from no_such_table", &[]).await {
            Err(DatabaseError::QueryFailed { operation, sql, .. }) => {
                assert_eq!(DbOperation::QueryImages, operation);
                assert_eq!("select id from no_such_table", sql);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
