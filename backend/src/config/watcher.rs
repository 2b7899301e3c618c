//! Change notification for the dotfile.
//!
//! The watcher only reports that the file changed. It never reloads or
//! mutates the [`Config`](super::Config) already shared with running
//! drivers; callers decide what a change means (usually: log and restart).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::warn;

use super::ConfigError;

/// Keeps a filesystem watch alive; dropping it stops notifications.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Invoke `on_change` whenever `path` is created, modified or removed.
    ///
    /// The parent directory is watched so editors that replace the file
    /// atomically are still observed.
    ///
    /// # Errors
    /// [`ConfigError::Watch`] when the platform watcher cannot be installed.
    pub fn watch<F>(path: &Path, on_change: F) -> Result<Self, ConfigError>
    where
        F: Fn(&Path) + Send + 'static,
    {
        let watch_error = |source: notify::Error| ConfigError::Watch {
            path: path.to_path_buf(),
            source,
        };
        let target = path.to_path_buf();
        let file_name: Option<OsString> = path.file_name().map(ToOwned::to_owned);
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            match event {
                Ok(event) if is_relevant(&event, file_name.as_deref()) => on_change(&target),
                Ok(_) => {}
                Err(error) => warn!(%error, "config watcher reported an error"),
            }
        })
        .map_err(watch_error)?;

        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        Ok(Self {
            _watcher: watcher,
            path: path.to_path_buf(),
        })
    }

    /// The file being watched.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let mutating = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    mutating
        && event
            .paths
            .iter()
            .any(|changed| changed.file_name() == file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn modifications_to_the_dotfile_are_relevant() {
        let name = std::ffi::OsStr::new(".env");
        assert!(is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), "/srv/app/.env"),
            Some(name)
        ));
        assert!(is_relevant(
            &event(EventKind::Create(CreateKind::File), "/srv/app/.env"),
            Some(name)
        ));
    }

    #[test]
    fn sibling_files_and_reads_are_ignored() {
        let name = std::ffi::OsStr::new(".env");
        assert!(!is_relevant(
            &event(EventKind::Modify(ModifyKind::Any), "/srv/app/.env.example"),
            Some(name)
        ));
        assert!(!is_relevant(
            &event(EventKind::Access(notify::event::AccessKind::Any), "/srv/app/.env"),
            Some(name)
        ));
    }

    #[test]
    fn watching_a_temporary_directory_succeeds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".env");
        let watcher = ConfigWatcher::watch(&path, |_| {}).expect("watch");
        assert_eq!(watcher.path(), path.as_path());
    }
}
