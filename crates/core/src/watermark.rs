use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::StoreError;

/// Persisted progress of the incremental jobs, one value per derived table
#[trait_variant::make(Send)]
pub trait WatermarkStore: Sync {
    /// Last id folded into `table`, zero if the table was never processed
    async fn get_watermark(&self, table: &str) -> Result<u64, StoreError>;

    async fn set_watermark(&self, table: &str, value: u64) -> Result<(), StoreError>;
}

/// Position of a bulk catch-up run
pub trait CursorStore {
    fn load(&self) -> Result<Option<u64>, StoreError>;

    fn store(&self, cursor: u64) -> Result<(), StoreError>;
}

/// Cursor kept as a plain-text number in a file
#[derive(Debug, Clone)]
pub struct FileCursor {
    path: PathBuf,
}

impl FileCursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CursorStore for FileCursor {
    fn load(&self) -> Result<Option<u64>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let raw = raw.trim();

        if raw.is_empty() {
            return Ok(None);
        }

        raw.parse()
            .map(Some)
            .map_err(|_| StoreError::OutOfRange {
                field: "cursor",
                value: raw.to_string(),
            })
    }

    fn store(&self, cursor: u64) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // the previous cursor stays intact until the rename succeeds
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, format!("{cursor}\n"))?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_has_no_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = FileCursor::new(dir.path().join("nothing.cursor"));
        assert_eq!(cursor.load().unwrap(), None);
    }

    #[test]
    fn stored_cursor_is_loaded_back() {
        let dir = tempfile::tempdir().unwrap();
        let cursor = FileCursor::new(dir.path().join("state").join("assets.cursor"));

        cursor.store(4_000).unwrap();
        assert_eq!(cursor.load().unwrap(), Some(4_000));

        cursor.store(5_000).unwrap();
        assert_eq!(cursor.load().unwrap(), Some(5_000));

        let raw = std::fs::read_to_string(cursor.path()).unwrap();
        assert_eq!(raw, "5000\n");
    }

    #[test]
    fn garbage_cursor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cursor");
        std::fs::write(&path, "not-a-number").unwrap();

        let cursor = FileCursor::new(path);
        assert!(matches!(
            cursor.load(),
            Err(StoreError::OutOfRange { field: "cursor", .. })
        ));
    }
}
