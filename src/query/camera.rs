//! # Camera Lookup Module
//!
//! Camera rules are typed as free text ("canon eos") but compiled into exact
//! `maker`/`model` comparisons. [`CameraIndex`] holds the cameras present in the
//! catalog and resolves that text into the matching pairs.

use crate::database::{Database, DatabaseError};

/// Resolves the free text of a camera rule into concrete `(maker, model)` pairs.
pub trait CameraLookup: Send + Sync {
    /// Returns every known camera whose display alias contains `text`.
    fn lookup(&self, text: &str) -> Vec<(String, String)>;
}

/// An in-memory list of the cameras present in the catalog.
///
/// The display alias of a camera is `"<maker> <model>"`; lookups match it
/// case-insensitively and ignore `%` wildcards around the needle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CameraIndex {
    models: Vec<(String, String)>,
}

impl CameraIndex {
    pub fn new(models: Vec<(String, String)>) -> Self {
        Self { models }
    }

    /// Loads every distinct camera from the catalog.
    pub async fn load(db: &Database) -> Result<Self, DatabaseError> {
        let models = db.camera_models().await?;
        tracing::debug!(cameras = models.len(), "loaded camera index");

        Ok(Self::new(models))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl CameraLookup for CameraIndex {
    fn lookup(&self, text: &str) -> Vec<(String, String)> {
        let needle = text.trim_matches('%').to_lowercase();

        self.models
            .iter()
            .filter(|(maker, model)| {
                format!("{maker} {model}")
                    .to_lowercase()
                    .contains(needle.as_str())
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{CameraIndex, CameraLookup};
    use crate::database::tests::{get_db, insert_images};

    fn index() -> CameraIndex {
        CameraIndex::new(vec![
            ("Canon".to_string(), "EOS 5D Mark II".to_string()),
            ("Canon".to_string(), "EOS R5".to_string()),
            ("Nikon".to_string(), "D850".to_string()),
        ])
    }

    #[test]
    fn test_lookup_matches_alias_case_insensitively() {
        let cameras = index();

        assert_eq!(2, cameras.lookup("canon eos").len());
        assert_eq!(
            vec![("Nikon".to_string(), "D850".to_string())],
            cameras.lookup("%n d8%")
        );
        assert!(cameras.lookup("Leica").is_empty());
    }

    #[test]
    fn test_lookup_wildcard_matches_everything() {
        assert_eq!(3, index().lookup("%").len());
    }

    #[tokio::test]
    async fn test_load_from_catalog() {
        let db = get_db().await;
        insert_images(&db, &[(1, 1, 0), (2, 1, 0)]).await;
        sqlx::query("UPDATE images SET maker = 'Fujifilm', model = 'X-T4'")
            .execute(db.pool())
            .await
            .unwrap();

        let cameras = CameraIndex::load(&db).await.unwrap();

        assert_eq!(1, cameras.len());
        assert_eq!(1, cameras.lookup("x-t4").len());
    }
}
