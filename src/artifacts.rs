use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

const FILE_PREFIX: &str = "recording_";

/// Errors from explicit artifact operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The artifact was already deleted (or never existed)
    #[error("recording not found: {}", path.display())]
    NotFound {
        /// Requested path
        path: PathBuf,
    },

    /// Filesystem failure
    #[error("recording storage error at {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
}

/// Directory of recorded artifacts awaiting consumption
///
/// Files are named `recording_<unix-millis>.<ext>`. The store never tracks
/// which file is being written: callers only sweep while no capture runs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    extension: String,
    last_token: u64,
}

impl ArtifactStore {
    /// The directory is created on first use, not here
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            last_token: 0,
        }
    }

    /// Storage directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the storage directory if needed (idempotent)
    ///
    /// # Errors
    /// Returns error if the directory cannot be created
    pub fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    /// Reserve a fresh, collision-free path for a new recording
    ///
    /// The timestamp token only moves forward: an allocation in the same
    /// millisecond as the previous one, or one whose name already exists,
    /// takes the next free token.
    ///
    /// # Errors
    /// Returns error if the storage directory cannot be created
    pub fn allocate_path(&mut self) -> Result<PathBuf, StoreError> {
        self.ensure_dir()?;

        let mut token = now_millis().max(self.last_token.saturating_add(1));
        let mut path = self.path_for(token);
        while path.exists() {
            token += 1;
            path = self.path_for(token);
        }

        self.last_token = token;
        tracing::debug!(path = %path.display(), "allocated recording path");
        Ok(path)
    }

    fn path_for(&self, token: u64) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{token}.{}", self.extension))
    }

    /// Delete recordings whose modification time is older than `max_age`
    ///
    /// Returns the number of files deleted. Never fails: a missing directory
    /// counts as empty and per-file errors are logged and skipped.
    pub fn sweep_expired(&self, max_age: Duration) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("recordings directory does not exist, skipping sweep");
                return 0;
            }
            Err(e) => {
                tracing::warn!("failed to read recordings directory: {}", e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut deleted_count = 0;

        for entry in entries.filter_map(std::result::Result::ok) {
            let path = entry.path();
            if !is_recording_file(&path) {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!("failed to stat {}: {}", path.display(), e);
                    continue;
                }
            };

            // Files from the future (clock changes) have zero age
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= max_age {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    deleted_count += 1;
                    tracing::info!(
                        age_secs = age.as_secs(),
                        "deleted expired recording: {}",
                        path.display()
                    );
                }
                Err(e) => {
                    tracing::warn!("failed to delete {}: {}", path.display(), e);
                }
            }
        }

        if deleted_count > 0 {
            tracing::debug!("sweep complete: deleted {} recordings", deleted_count);
        }

        deleted_count
    }

    /// Delete a consumed recording
    ///
    /// # Errors
    /// [`StoreError::NotFound`] if the file is already gone, [`StoreError::Io`] otherwise
    pub fn delete(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => {
                tracing::info!("deleted recording: {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                path: path.to_path_buf(),
            }),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Remove the whole storage directory (best effort)
    pub fn purge_all(&self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => tracing::info!("removed recordings directory: {}", self.dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "failed to remove recordings directory {}: {}",
                self.dir.display(),
                e
            ),
        }
    }
}

fn is_recording_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(FILE_PREFIX))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    const MAX_AGE: Duration = Duration::from_secs(600);

    fn create_recording(dir: &Path, name: &str, age: Duration) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"fake ogg data").unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
        path
    }

    fn file_name(path: &Path) -> &str {
        path.file_name().unwrap().to_str().unwrap()
    }

    #[test]
    fn test_allocate_path_creates_directory() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("nested").join("recordings");
        let mut store = ArtifactStore::new(&dir, "ogg");

        let path = store.allocate_path().unwrap();

        assert!(dir.is_dir());
        assert_eq!(path.parent(), Some(dir.as_path()));
        // Allocation reserves a name, the capture tool creates the file
        assert!(!path.exists());
    }

    #[test]
    fn test_allocate_path_naming() {
        let temp = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::new(temp.path(), "ogg");

        let path = store.allocate_path().unwrap();
        let name = file_name(&path);
        let token = name
            .strip_prefix("recording_")
            .and_then(|rest| rest.strip_suffix(".ogg"))
            .unwrap();

        assert!(!token.is_empty());
        assert!(token.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_allocate_path_never_collides() {
        let temp = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::new(temp.path(), "ogg");

        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let path = store.allocate_path().unwrap();
            assert!(seen.insert(path));
        }
    }

    #[test]
    fn test_allocate_path_skips_existing_file() {
        let temp = tempfile::tempdir().unwrap();
        let mut store = ArtifactStore::new(temp.path(), "ogg");

        let first = store.allocate_path().unwrap();
        fs::write(&first, b"data").unwrap();

        // A second store (e.g. after restart) must not reuse the name
        let mut restarted = ArtifactStore::new(temp.path(), "ogg");
        restarted.last_token = store.last_token - 1;
        let second = restarted.allocate_path().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_sweep_missing_directory() {
        let temp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(temp.path().join("missing"), "ogg");
        assert_eq!(store.sweep_expired(MAX_AGE), 0);
    }

    #[test]
    fn test_sweep_empty_directory() {
        let temp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(temp.path(), "ogg");
        assert_eq!(store.sweep_expired(MAX_AGE), 0);
    }

    #[test]
    fn test_sweep_deletes_only_expired_and_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        let store = ArtifactStore::new(dir, "ogg");

        let old: Vec<PathBuf> = (0..3)
            .map(|i| {
                create_recording(
                    dir,
                    &format!("recording_{i}.ogg"),
                    Duration::from_secs(3600),
                )
            })
            .collect();
        let fresh: Vec<PathBuf> = (0..2)
            .map(|i| {
                create_recording(
                    dir,
                    &format!("recording_{}.ogg", 100 + i),
                    Duration::from_secs(60),
                )
            })
            .collect();

        assert_eq!(store.sweep_expired(MAX_AGE), 3);
        assert!(old.iter().all(|p| !p.exists()));
        assert!(fresh.iter().all(|p| p.exists()));

        assert_eq!(store.sweep_expired(MAX_AGE), 0);
        assert!(fresh.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_sweep_ignores_foreign_files() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        let store = ArtifactStore::new(dir, "ogg");

        create_recording(dir, "recording_1.ogg", Duration::from_secs(3600));
        let notes = create_recording(dir, "notes.txt", Duration::from_secs(3600));
        fs::create_dir(dir.join("recording_dir")).unwrap();

        assert_eq!(store.sweep_expired(MAX_AGE), 1);
        assert!(notes.exists());
        assert!(dir.join("recording_dir").is_dir());
    }

    #[test]
    fn test_sweep_zero_age_deletes_everything_older() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path();
        let store = ArtifactStore::new(dir, "ogg");

        create_recording(dir, "recording_1.ogg", Duration::from_secs(5));
        assert_eq!(store.sweep_expired(Duration::ZERO), 1);
    }

    #[test]
    fn test_delete_then_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(temp.path(), "ogg");
        let path = create_recording(temp.path(), "recording_1.ogg", Duration::ZERO);

        store.delete(&path).unwrap();
        assert!(!path.exists());

        let err = store.delete(&path).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { path: p } if p == path));
    }

    #[test]
    fn test_purge_all_removes_directory() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("recordings");
        let mut store = ArtifactStore::new(&dir, "ogg");

        let path = store.allocate_path().unwrap();
        fs::write(&path, b"data").unwrap();

        store.purge_all();
        assert!(!dir.exists());

        // Second purge is a no-op
        store.purge_all();
    }
}
