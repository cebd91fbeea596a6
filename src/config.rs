//! # Configuration Store Module
//!
//! The catalog persists its canonical filter state and the user's rule list in a
//! flat, string-keyed store. This module defines that store as the [`ConfigStore`]
//! trait and ships two implementations:
//!
//! - **`MemoryConfig`**: a process-local map, used by tests and transient views.
//! - **`FileConfig`**: a `key=value` text file, one entry per line, written back
//!   atomically through a temporary file.
//!
//! Key names used by the catalog are collected in [`keys`].

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::RwLock,
};
use thiserror::Error;

/// Key names read and written by the collection view and the rule-set compiler.
pub mod keys {
    pub const QUERY_FLAGS: &str = "plugins/collection/query_flags";
    pub const FILTER_FLAGS: &str = "plugins/collection/filter_flags";
    pub const FILM_ID: &str = "plugins/collection/film_id";
    pub const RATING: &str = "plugins/collection/rating";
    pub const RATING_COMPARATOR: &str = "plugins/collection/rating_comparator";
    pub const SORT: &str = "plugins/collection/sort";
    pub const DESCENDING: &str = "plugins/collection/descending";

    pub const NUM_RULES: &str = "plugins/lighttable/collect/num_rules";

    /// `plugins/lighttable/collect/mode<N>`
    pub fn rule_mode(n: usize) -> String {
        format!("plugins/lighttable/collect/mode{n}")
    }

    /// `plugins/lighttable/collect/item<N>`
    pub fn rule_item(n: usize) -> String {
        format!("plugins/lighttable/collect/item{n}")
    }

    /// `plugins/lighttable/collect/string<N>`
    pub fn rule_string(n: usize) -> String {
        format!("plugins/lighttable/collect/string{n}")
    }
}

/// A string-keyed configuration store.
///
/// Getters return `None` when a key is absent or cannot be read as the requested
/// type; callers supply their own defaults.
pub trait ConfigStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;

    fn set_string(&self, key: &str, value: &str);

    fn key_exists(&self, key: &str) -> bool {
        self.get_string(key).is_some()
    }

    fn get_int(&self, key: &str) -> Option<i64> {
        self.get_string(key)?.trim().parse().ok()
    }

    fn set_int(&self, key: &str, value: i64) {
        self.set_string(key, &value.to_string());
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get_string(key)?.trim() {
            "TRUE" | "true" | "1" => Some(true),
            "FALSE" | "false" | "0" => Some(false),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.set_string(key, if value { "TRUE" } else { "FALSE" });
    }
}

/// In-memory configuration store.
#[derive(Debug, Default)]
pub struct MemoryConfig {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(key).cloned())
    }

    fn set_string(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

/// Configuration store backed by a `key=value` text file.
///
/// Changes are kept in memory until [`FileConfig::save`] is called.
#[derive(Debug)]
pub struct FileConfig {
    path: PathBuf,
    values: MemoryConfig,
}

impl FileConfig {
    /// Opens the configuration file at `path`.
    ///
    /// A missing file yields an empty store; it is created on the first `save()`.
    /// Blank lines and lines starting with `#` are ignored. Values are taken
    /// verbatim after the first `=`, with `\n`, `\r` and `\\` unescaped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file exists but cannot be read, and
    /// [`ConfigError::Parse`] for a non-empty line without a `=` separator.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let values = MemoryConfig::new();

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
                line: idx + 1,
                content: line.to_string(),
            })?;
            values.set_string(key.trim(), &unescape(value));
        }

        tracing::debug!(path = %path.display(), "loaded configuration");

        Ok(Self { path, values })
    }

    /// Returns the path this store was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes every entry back to disk, sorted by key.
    pub fn save(&self) -> Result<(), ConfigError> {
        let mut entries: Vec<(String, String)> = self
            .values
            .values
            .read()
            .map(|values| {
                values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        for (key, value) in &entries {
            writeln!(file, "{key}={}", escape(value))?;
        }
        file.flush()?;
        file.persist(&self.path).map_err(|e| ConfigError::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "saved configuration");

        Ok(())
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape`]; unknown escapes are kept as written.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

impl ConfigStore for FileConfig {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get_string(key)
    }

    fn set_string(&self, key: &str, value: &str) {
        self.values.set_string(key, value);
    }
}

/// Errors raised while loading or saving a [`FileConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access configuration file")]
    Io(#[from] io::Error),

    #[error("malformed configuration line {line}: {content}")]
    Parse { line: usize, content: String },
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ConfigStore, FileConfig, MemoryConfig, keys};

    #[test]
    fn test_memory_config_typed_access() {
        let config = MemoryConfig::new();

        assert!(!config.key_exists(keys::FILM_ID));
        assert_eq!(None, config.get_int(keys::FILM_ID));

        config.set_int(keys::FILM_ID, 42);
        config.set_bool(keys::DESCENDING, true);
        config.set_string(&keys::rule_string(0), "%");

        assert!(config.key_exists(keys::FILM_ID));
        assert_eq!(Some(42), config.get_int(keys::FILM_ID));
        assert_eq!(Some(true), config.get_bool(keys::DESCENDING));
        assert_eq!(Some("%".to_string()), config.get_string(&keys::rule_string(0)));
    }

    #[test]
    fn test_typed_getters_reject_garbage() {
        let config = MemoryConfig::new();
        config.set_string(keys::RATING, "three");

        assert!(config.key_exists(keys::RATING));
        assert_eq!(None, config.get_int(keys::RATING));
        assert_eq!(None, config.get_bool(keys::RATING));
    }

    #[test]
    fn test_rule_key_names() {
        assert_eq!("plugins/lighttable/collect/mode3", keys::rule_mode(3));
        assert_eq!("plugins/lighttable/collect/item0", keys::rule_item(0));
        assert_eq!("plugins/lighttable/collect/string9", keys::rule_string(9));
    }

    #[test]
    fn test_file_config_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = FileConfig::open(dir.path().join("photocollectrc")).unwrap();

        assert!(!config.key_exists(keys::SORT));
    }

    #[test]
    fn test_file_config_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("photocollectrc");

        let config = FileConfig::open(&path).unwrap();
        config.set_int(keys::SORT, 2);
        config.set_string(&keys::rule_string(0), "a=b c");
        config.save().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            "plugins/collection/sort=2\nplugins/lighttable/collect/string0=a=b c\n",
            content
        );

        let reopened = FileConfig::open(&path).unwrap();
        assert_eq!(Some(2), reopened.get_int(keys::SORT));
        assert_eq!(
            Some("a=b c".to_string()),
            reopened.get_string(&keys::rule_string(0))
        );
    }

    #[test]
    fn test_file_config_keeps_trailing_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photocollectrc");

        let config = FileConfig::open(&path).unwrap();
        config.set_string(&keys::rule_string(0), "50mm ");
        config.save().unwrap();

        let reopened = FileConfig::open(&path).unwrap();
        assert_eq!(
            Some("50mm ".to_string()),
            reopened.get_string(&keys::rule_string(0))
        );
    }

    #[test]
    fn test_file_config_escapes_line_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photocollectrc");

        let config = FileConfig::open(&path).unwrap();
        config.set_string(&keys::rule_string(0), "a\nb");
        config.set_string(&keys::rule_string(1), "C:\\photos\\n");
        config.save().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            "plugins/lighttable/collect/string0=a\\nb\nplugins/lighttable/collect/string1=C:\\\\photos\\\\n\n",
            content
        );

        let reopened = FileConfig::open(&path).unwrap();
        assert_eq!(
            Some("a\nb".to_string()),
            reopened.get_string(&keys::rule_string(0))
        );
        assert_eq!(
            Some("C:\\photos\\n".to_string()),
            reopened.get_string(&keys::rule_string(1))
        );
    }

    #[test]
    fn test_file_config_rejects_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photocollectrc");
        std::fs::write(&path, "# comment\n\nplugins/collection/sort=1\nbroken\n").unwrap();

        match FileConfig::open(&path) {
            Err(ConfigError::Parse { line, content }) => {
                assert_eq!(4, line);
                assert_eq!("broken", content);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
