use super::{Source, SourceError, SourceLocator};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Bucket/key object storage as seen by [`RemoteSource`].
///
/// Absence is reported as `Ok(false)` from the existence checks and as
/// [`SourceError::NotFound`] from `download`.
pub trait ObjectStore: Send + Sync {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, SourceError>;
    fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, SourceError>;
    fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), SourceError>;
}

/// An object in a remote store.
pub struct RemoteSource {
    locator: SourceLocator,
    bucket: String,
    key: String,
    store: Arc<dyn ObjectStore>,
}

impl RemoteSource {
    pub fn new(
        locator: SourceLocator,
        bucket: String,
        key: String,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            locator,
            bucket,
            key,
            store,
        }
    }
}

impl Source for RemoteSource {
    fn locator(&self) -> &SourceLocator {
        &self.locator
    }

    fn exists(&self) -> Result<bool, SourceError> {
        if !self.store.bucket_exists(&self.bucket)? {
            debug!(bucket = %self.bucket, "bucket does not exist");
            return Ok(false);
        }
        self.store.object_exists(&self.bucket, &self.key)
    }

    fn fetch(&self, dest: &Path) -> Result<(), SourceError> {
        info!(source = %self.locator, "downloading remote source");
        self.store.download(&self.bucket, &self.key, dest)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    /// In-memory store that counts every call.
    #[derive(Default)]
    pub struct MemoryStore {
        pub objects: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
        pub calls: Mutex<Vec<String>>,
        pub deny: bool,
    }

    impl MemoryStore {
        pub fn with_object(bucket: &str, key: &str, bytes: &[u8]) -> Self {
            let store = Self::default();
            store
                .objects
                .lock()
                .entry(bucket.to_string())
                .or_default()
                .insert(key.to_string(), bytes.to_vec());
            store
        }

        pub fn denying() -> Self {
            Self {
                deny: true,
                ..Self::default()
            }
        }

        pub fn downloads(&self) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|c| c.starts_with("download"))
                .count()
        }

        fn check_access(&self, bucket: &str) -> Result<(), SourceError> {
            if self.deny {
                return Err(SourceError::Credentials {
                    locator: bucket.to_string(),
                    message: "403 Forbidden".to_string(),
                });
            }
            Ok(())
        }
    }

    impl ObjectStore for MemoryStore {
        fn bucket_exists(&self, bucket: &str) -> Result<bool, SourceError> {
            self.calls.lock().push(format!("bucket {bucket}"));
            self.check_access(bucket)?;
            Ok(self.objects.lock().contains_key(bucket))
        }

        fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, SourceError> {
            self.calls.lock().push(format!("object {bucket}/{key}"));
            self.check_access(bucket)?;
            Ok(self
                .objects
                .lock()
                .get(bucket)
                .is_some_and(|b| b.contains_key(key)))
        }

        fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), SourceError> {
            self.calls.lock().push(format!("download {bucket}/{key}"));
            self.check_access(bucket)?;
            let objects = self.objects.lock();
            let bytes = objects
                .get(bucket)
                .and_then(|b| b.get(key))
                .ok_or_else(|| SourceError::NotFound(format!("s3://{bucket}/{key}")))?;
            fs::write(dest, bytes)?;
            Ok(())
        }
    }

    fn remote(store: Arc<MemoryStore>, bucket: &str, key: &str) -> RemoteSource {
        let locator = SourceLocator::parse(&format!("s3://{bucket}/{key}")).unwrap();
        RemoteSource::new(locator, bucket.to_string(), key.to_string(), store)
    }

    #[test]
    fn missing_bucket_is_false_without_object_lookup() {
        let store = Arc::new(MemoryStore::default());
        let source = remote(Arc::clone(&store), "nobucket", "t1.nii");
        assert!(!source.exists().unwrap());
        assert_eq!(*store.calls.lock(), vec!["bucket nobucket".to_string()]);
    }

    #[test]
    fn missing_key_is_false() {
        let store = Arc::new(MemoryStore::with_object("b", "a.nii", b"x"));
        assert!(!remote(Arc::clone(&store), "b", "other.nii").exists().unwrap());
        assert!(remote(store, "b", "a.nii").exists().unwrap());
    }

    #[test]
    fn denied_access_is_an_error() {
        let store = Arc::new(MemoryStore::denying());
        let result = remote(store, "b", "a.nii").exists();
        assert!(matches!(result, Err(SourceError::Credentials { .. })));
    }

    #[test]
    fn fetch_downloads_into_destination() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::with_object("b", "dir/a.nii", b"volume"));
        let dest = tmp.path().join("a.nii");
        remote(Arc::clone(&store), "b", "dir/a.nii").fetch(&dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"volume");
        assert_eq!(store.downloads(), 1);
    }

    #[test]
    fn fetch_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::default());
        let result = remote(store, "b", "a.nii").fetch(&tmp.path().join("a.nii"));
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }
}
