//! Filesystem storage rooted at a capability-scoped directory.
//!
//! All access goes through a `cap_std` [`Dir`] handle opened once at
//! construction, so validated object paths cannot reach outside the root.
//! Uploads are staged in a hidden temporary file and renamed into place.

use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cap_std::{ambient_authority, fs::Dir};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::io::AsyncReadExt;

use crate::domain::ports::{
    ObjectInfo, ObjectReader, ObjectStorage, StorageError, validate_object_path,
    validate_object_prefix,
};

type HmacSha256 = Hmac<Sha256>;

const TEMP_PREFIX: &str = ".upload-";

fn io_error(err: impl std::fmt::Display) -> StorageError {
    StorageError::io(err.to_string())
}

fn map_io(path: &str, err: io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::not_found(path)
    } else {
        io_error(err)
    }
}

/// Best effort content type from the file extension.
fn guess_content_type(path: &str) -> Option<String> {
    let extension = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "json" => "application/json",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(mime.to_owned())
}

fn object_info(
    dir: &Dir,
    path: &str,
    content_type: Option<String>,
) -> Result<ObjectInfo, StorageError> {
    let metadata = dir.metadata(path).map_err(|err| map_io(path, err))?;
    let modified = metadata
        .modified()
        .map(|time| DateTime::<Utc>::from(time.into_std()))
        .unwrap_or_else(|_| Utc::now());
    Ok(ObjectInfo {
        path: path.to_owned(),
        size: metadata.len(),
        modified,
        content_type: content_type.or_else(|| guess_content_type(path)),
    })
}

fn write_atomically(dir: &Dir, path: &str, bytes: &[u8]) -> io::Result<()> {
    let target = Path::new(path);
    if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        dir.create_dir_all(parent)?;
    }
    let file_name = target
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let staged = target.with_file_name(format!(
        "{TEMP_PREFIX}{}-{file_name}",
        uuid::Uuid::new_v4().simple()
    ));
    dir.write(&staged, bytes)?;
    if let Err(err) = dir.rename(&staged, dir, target) {
        drop(dir.remove_file(&staged));
        return Err(err);
    }
    Ok(())
}

fn walk(
    dir: &Dir,
    relative: &Path,
    prefix: &str,
    found: &mut Vec<ObjectInfo>,
) -> io::Result<()> {
    let entries = if relative.as_os_str().is_empty() {
        dir.entries()?
    } else {
        dir.read_dir(relative)?
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }
        let child: PathBuf = relative.join(name);
        let Some(object_path) = child.to_str().map(|p| p.replace('\\', "/")) else {
            continue;
        };
        if entry.file_type()?.is_dir() {
            let as_dir = format!("{object_path}/");
            if as_dir.starts_with(prefix) || prefix.starts_with(&as_dir) {
                walk(dir, &child, prefix, found)?;
            }
        } else if object_path.starts_with(prefix) {
            if let Ok(info) = object_info(dir, &object_path, None) {
                found.push(info);
            }
        }
    }
    Ok(())
}

/// Signature over a path and expiry, hex encoded.
fn sign(key: &[u8], path: &str, expires: i64) -> Result<String, StorageError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(io_error)?;
    mac.update(format!("{path}:{expires}").as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Storage on the local filesystem.
pub struct LocalStorage {
    root: Arc<Dir>,
    base_url: String,
    signing_key: Option<Vec<u8>>,
}

impl LocalStorage {
    /// Open `base_path`, creating it when missing.
    ///
    /// # Errors
    /// Propagates filesystem failures creating or opening the directory.
    pub fn open(
        base_path: &Path,
        base_url: impl Into<String>,
        signing_key: Option<&str>,
    ) -> io::Result<Self> {
        Dir::create_ambient_dir_all(base_path, ambient_authority())?;
        let root = Dir::open_ambient_dir(base_path, ambient_authority())?;
        Ok(Self {
            root: Arc::new(root),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            signing_key: signing_key.map(|key| key.as_bytes().to_vec()),
        })
    }

    /// Check a URL produced by [`ObjectStorage::get_url`].
    ///
    /// Signatures are compared in constant time; expired links fail.
    #[must_use]
    pub fn verify_signed_url(
        &self,
        path: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(key) = &self.signing_key else {
            return false;
        };
        if now.timestamp() > expires {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
            return false;
        };
        mac.update(format!("{path}:{expires}").as_bytes());
        mac.verify_slice(&provided).is_ok()
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Dir) -> Result<T, StorageError> + Send + 'static,
    {
        let root = Arc::clone(&self.root);
        tokio::task::spawn_blocking(move || work(&root))
            .await
            .map_err(io_error)?
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn upload(
        &self,
        path: &str,
        mut reader: ObjectReader,
        content_type: Option<String>,
    ) -> Result<ObjectInfo, StorageError> {
        validate_object_path(path)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await.map_err(io_error)?;
        let path = path.to_owned();
        self.blocking(move |dir| {
            write_atomically(dir, &path, &bytes).map_err(io_error)?;
            object_info(dir, &path, content_type)
        })
        .await
    }

    async fn download(&self, path: &str) -> Result<ObjectReader, StorageError> {
        validate_object_path(path)?;
        let path = path.to_owned();
        let bytes = self
            .blocking(move |dir| dir.read(&path).map_err(|err| map_io(&path, err)))
            .await?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    /// Deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        validate_object_path(path)?;
        let path = path.to_owned();
        self.blocking(move |dir| match dir.remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(err)),
        })
        .await
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        validate_object_path(path)?;
        let path = path.to_owned();
        self.blocking(move |dir| match dir.metadata(&path) {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(err)),
        })
        .await
    }

    /// `base_url/path`, plus `expires` and `signature` query parameters
    /// when a signing key is configured.
    async fn get_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_object_path(path)?;
        let url = format!("{}/{path}", self.base_url);
        let Some(key) = &self.signing_key else {
            return Ok(url);
        };
        let ttl = chrono::Duration::from_std(ttl).map_err(io_error)?;
        let expires = (Utc::now() + ttl).timestamp();
        let signature = sign(key, path, expires)?;
        Ok(format!("{url}?expires={expires}&signature={signature}"))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        validate_object_prefix(prefix)?;
        let prefix = prefix.to_owned();
        let mut objects = self
            .blocking(move |dir| {
                let mut found = Vec::new();
                walk(dir, Path::new(""), &prefix, &mut found).map_err(io_error)?;
                Ok(found)
            })
            .await?;
        objects.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(objects)
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
