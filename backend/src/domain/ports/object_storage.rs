//! Port for blob storage addressed by slash separated paths.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by storage adapters.
    pub enum StorageError {
        /// The path is empty, absolute or escapes the storage root.
        InvalidPath { path: String } => "invalid object path: {path}",
        NotFound { path: String } => "object not found: {path}",
        Io { message: String } => "storage i/o failure: {message}",
    }
}

impl From<StorageError> for crate::domain::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPath { .. } => Self::validation_failed(err.to_string()),
            StorageError::NotFound { .. } => Self::not_found(err.to_string()),
            StorageError::Io { .. } => Self::internal(err.to_string()),
        }
    }
}

/// Streamed object contents.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata returned by uploads and listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub path: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub content_type: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `reader` at `path`, creating missing intermediate segments.
    async fn upload(
        &self,
        path: &str,
        reader: ObjectReader,
        content_type: Option<String>,
    ) -> Result<ObjectInfo, StorageError>;

    async fn download(&self, path: &str) -> Result<ObjectReader, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// URL for `path`, time limited where the backend can sign URLs.
    async fn get_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Objects whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// Reject paths that could escape the storage root.
///
/// Runs before any adapter touches the backend.
///
/// # Examples
/// ```
/// use skeleton::domain::ports::validate_object_path;
///
/// assert!(validate_object_path("avatars/1.png").is_ok());
/// assert!(validate_object_path("../etc/passwd").is_err());
/// ```
pub fn validate_object_path(path: &str) -> Result<(), StorageError> {
    let invalid = || StorageError::invalid_path(path);
    if path.trim().is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.contains('\0')
    {
        return Err(invalid());
    }
    if path
        .split('/')
        .any(|segment| segment == ".." || segment == ".")
    {
        return Err(invalid());
    }
    Ok(())
}

/// Like [`validate_object_path`] but an empty prefix (everything) is fine.
pub fn validate_object_prefix(prefix: &str) -> Result<(), StorageError> {
    if prefix.is_empty() {
        return Ok(());
    }
    validate_object_path(prefix.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("..")]
    #[case("../secret")]
    #[case("a/../../b")]
    #[case("a/./b")]
    #[case("/etc/passwd")]
    #[case("a\\b")]
    #[case("")]
    #[case("nul\0byte")]
    fn traversal_is_rejected(#[case] path: &str) {
        assert_eq!(
            validate_object_path(path),
            Err(StorageError::invalid_path(path))
        );
    }

    #[rstest]
    #[case("file.txt")]
    #[case("nested/dir/file.txt")]
    #[case("names..with..dots.txt")]
    fn ordinary_paths_pass(#[case] path: &str) {
        assert!(validate_object_path(path).is_ok());
    }

    #[rstest]
    #[case("", true)]
    #[case("avatars/", true)]
    #[case("../", false)]
    fn prefixes(#[case] prefix: &str, #[case] ok: bool) {
        assert_eq!(validate_object_prefix(prefix).is_ok(), ok);
    }
}
