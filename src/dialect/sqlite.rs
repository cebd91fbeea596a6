use super::{Db, Dialect};
use sqlx::Row;

/// SQLite dialect implementation of the `Dialect` trait.
#[cfg(feature = "sqlite")]
pub struct SqliteDialect;

#[cfg(feature = "sqlite")]
impl Dialect for SqliteDialect {
    fn placeholder(idx: usize) -> String {
        format!("?{idx}")
    }

    async fn migration(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
        let stmts = vec![
            r#"CREATE TABLE IF NOT EXISTS film_rolls (
                id INTEGER PRIMARY KEY,
                folder TEXT NOT NULL
            );"#,
            r#"CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY,
                group_id INTEGER,
                film_id INTEGER,
                filename TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                flags INTEGER NOT NULL DEFAULT 0,
                datetime_taken TEXT,
                maker TEXT,
                model TEXT,
                lens TEXT,
                aperture REAL,
                exposure REAL,
                focal_length REAL,
                iso REAL,
                longitude REAL,
                latitude REAL,
                FOREIGN KEY (film_id) REFERENCES film_rolls(id) ON DELETE CASCADE
            );"#,
            r#"CREATE TABLE IF NOT EXISTS color_labels (
                imgid INTEGER,
                color INTEGER,
                FOREIGN KEY (imgid) REFERENCES images(id) ON DELETE CASCADE
            );"#,
            r#"CREATE TABLE IF NOT EXISTS history (
                imgid INTEGER,
                num INTEGER,
                operation TEXT,
                FOREIGN KEY (imgid) REFERENCES images(id) ON DELETE CASCADE
            );"#,
            r#"CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            );"#,
            r#"CREATE TABLE IF NOT EXISTS tagged_images (
                imgid INTEGER,
                tagid INTEGER,
                PRIMARY KEY (imgid, tagid),
                FOREIGN KEY (imgid) REFERENCES images(id) ON DELETE CASCADE,
                FOREIGN KEY (tagid) REFERENCES tags(id) ON DELETE CASCADE
            );"#,
            r#"CREATE TABLE IF NOT EXISTS meta_data (
                id INTEGER,
                key INTEGER,
                value TEXT,
                FOREIGN KEY (id) REFERENCES images(id) ON DELETE CASCADE
            );"#,
            r#"CREATE TABLE IF NOT EXISTS selected_images (
                imgid INTEGER PRIMARY KEY
            );"#,
        ];

        for stmt in stmts {
            sqlx::query(stmt).execute(pool).await?;
        }

        maybe_create_indexes(pool).await?;

        Ok(())
    }
}

async fn maybe_create_indexes(pool: &sqlx::Pool<Db>) -> Result<(), sqlx::Error> {
    let rows = sqlx::query("PRAGMA index_list(images);")
        .fetch_all(pool)
        .await?;

    let has_film_index = rows.iter().any(|row| {
        let name: &str = row.get("name");
        name == "images_film_id_index"
    });

    if !has_film_index {
        sqlx::query("CREATE INDEX images_film_id_index ON images (film_id);")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX images_group_id_index ON images (group_id);")
            .execute(pool)
            .await?;
    }

    Ok(())
}
