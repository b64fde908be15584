//! Object store backed by a local directory tree.
//!
//! Objects live at `<root>/<bucket>/<key>`, with leading slashes trimmed from
//! the key. Access goes through `cap-std` handles rooted at the bucket
//! directory, so keys cannot reach outside it. Presigned URLs are `file://`
//! URLs, which is enough for remote hosts sharing the same filesystem (and
//! for tests that use a local shell as the remote end).

use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use super::{ObjectStore, ObjectStoreError, PresignMethod, StoreFuture};

/// Directory-backed [`ObjectStore`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectoryObjectStore {
    root: Utf8PathBuf,
}

impl DirectoryObjectStore {
    /// Creates a store rooted at `root`; buckets become subdirectories.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding all buckets.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Filesystem path an object is stored at.
    #[must_use]
    pub fn object_path(&self, bucket: &str, key: &str) -> Utf8PathBuf {
        self.root.join(bucket).join(relative_key(key))
    }

    fn bucket_dir(&self, bucket: &str) -> Result<Dir, ObjectStoreError> {
        let path = self.root.join(bucket);
        Dir::create_ambient_dir_all(&path, ambient_authority())
            .and_then(|()| Dir::open_ambient_dir(&path, ambient_authority()))
            .map_err(|err| io_error(&path, &err))
    }

    fn write_object(&self, bucket: &str, key: &str, body: &[u8]) -> Result<(), ObjectStoreError> {
        let dir = self.bucket_dir(bucket)?;
        let relative = relative_key(key);
        if let Some(parent) = relative.parent().filter(|parent| !parent.as_str().is_empty()) {
            dir.create_dir_all(parent)
                .map_err(|err| io_error(&self.object_path(bucket, key), &err))?;
        }
        dir.write(relative, body)
            .map_err(|err| io_error(&self.object_path(bucket, key), &err))
    }

    fn read_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let dir = self.bucket_dir(bucket)?;
        match dir.read(relative_key(key)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(ObjectStoreError::NotFound {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }),
            Err(err) => Err(io_error(&self.object_path(bucket, key), &err)),
        }
    }
}

impl ObjectStore for DirectoryObjectStore {
    fn put<'a>(&'a self, bucket: &'a str, key: &'a str, body: Vec<u8>) -> StoreFuture<'a, ()> {
        Box::pin(async move { self.write_object(bucket, key, &body) })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move { self.read_object(bucket, key) })
    }

    fn presign<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        _method: PresignMethod,
        _expires: Duration,
    ) -> StoreFuture<'a, String> {
        Box::pin(async move {
            // Make sure uploads to the URL have a directory to land in.
            let dir = self.bucket_dir(bucket)?;
            if let Some(parent) = relative_key(key)
                .parent()
                .filter(|parent| !parent.as_str().is_empty())
            {
                dir.create_dir_all(parent)
                    .map_err(|err| io_error(&self.object_path(bucket, key), &err))?;
            }
            Ok(format!("file://{}", self.object_path(bucket, key)))
        })
    }
}

fn relative_key(key: &str) -> &Utf8Path {
    Utf8Path::new(key.trim_start_matches('/'))
}

fn io_error(path: &Utf8Path, err: &io::Error) -> ObjectStoreError {
    ObjectStoreError::Io {
        path: path.to_string(),
        message: err.to_string(),
    }
}
