//! Versioned SQL migrations.
//!
//! Files are named `<version>_<name>.sql` and carry `-- +migrate Up` and
//! `-- +migrate Down` sections. Every apply or revert appends a row to the
//! version table (`id, version_id, is_applied, tstamp`); the most recent row
//! for a version decides whether it is applied.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cap_std::ambient_authority;
use cap_std::fs::Dir;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::domain::ports::{
    Database, DatabaseError, DatabaseExt, IsolationLevel, SqlValue, run_in_transaction,
};

/// Version table used when none is given.
pub const DEFAULT_TABLE: &str = "db_migration";
/// Migration directory used when none is given.
pub const DEFAULT_DIR: &str = "migrations";

const DIRECTIVE: &str = "-- +migrate";
/// Versions at or above this are `YYYYMMDDHHMMSS` timestamps.
const TIMESTAMP_VERSION_FLOOR: i64 = 10_000_000_000_000;

/// Errors raised by the migration runner.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error("migration directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid migration {file}: {message}")]
    Parse { file: String, message: String },
    #[error("duplicate migration version {version}")]
    Duplicate { version: i64 },
    #[error("invalid migration table name '{0}'")]
    InvalidTable(String),
    #[error("no next version found")]
    NoNextVersion,
    #[error("no migration to roll back")]
    NoCurrentVersion,
    #[error("version {0} is applied but has no migration file")]
    UnknownVersion(i64),
    #[error("found unapplied migrations older than current version {current}: {versions:?}")]
    Missing { current: i64, versions: Vec<i64> },
    #[error("migration file {0} already exists")]
    Exists(String),
    #[error("migration task failed: {0}")]
    Join(String),
}

/// One migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub file: String,
    pub up: String,
    pub down: String,
}

/// A migration and when it was applied, if it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: i64,
    pub file: String,
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct VersionRow {
    version_id: i64,
    is_applied: bool,
    tstamp: DateTime<Utc>,
}

fn parse_file_name(file: &str) -> Option<(i64, String)> {
    let stem = file.strip_suffix(".sql")?;
    let (version, name) = stem.split_once('_')?;
    let version = version.parse::<i64>().ok().filter(|version| *version > 0)?;
    Some((version, name.to_owned()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

/// Split a file into its up and down scripts.
fn parse_sections(file: &str, contents: &str) -> Result<(String, String), MigrationError> {
    let mut section = Section::Preamble;
    let mut saw_up = false;
    let mut up = String::new();
    let mut down = String::new();
    for line in contents.lines() {
        if let Some(directive) = line.trim().strip_prefix(DIRECTIVE) {
            match directive.trim() {
                "Up" => {
                    section = Section::Up;
                    saw_up = true;
                }
                "Down" => section = Section::Down,
                "StatementBegin" | "StatementEnd" => {}
                other => {
                    return Err(MigrationError::Parse {
                        file: file.to_owned(),
                        message: format!("unknown directive '{other}'"),
                    });
                }
            }
            continue;
        }
        let target = match section {
            Section::Preamble => continue,
            Section::Up => &mut up,
            Section::Down => &mut down,
        };
        target.push_str(line);
        target.push('\n');
    }
    if !saw_up {
        return Err(MigrationError::Parse {
            file: file.to_owned(),
            message: format!("missing '{DIRECTIVE} Up' section"),
        });
    }
    Ok((up, down))
}

fn read_migrations(dir: &Dir, path: &Path) -> Result<Vec<Migration>, MigrationError> {
    let io = |source| MigrationError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut by_version = BTreeMap::new();
    for entry in dir.entries().map_err(io)? {
        let entry = entry.map_err(io)?;
        let file = entry.file_name().to_string_lossy().into_owned();
        let Some((version, name)) = parse_file_name(&file) else {
            continue;
        };
        let contents = dir.read_to_string(&file).map_err(io)?;
        let (up, down) = parse_sections(&file, &contents)?;
        let migration = Migration {
            version,
            name,
            file,
            up,
            down,
        };
        if by_version.insert(version, migration).is_some() {
            return Err(MigrationError::Duplicate { version });
        }
    }
    Ok(by_version.into_values().collect())
}

/// Renames turning timestamp versions into sequential ones after the
/// highest sequential version.
fn plan_fix(migrations: &[Migration]) -> Vec<(String, String)> {
    let mut next = migrations
        .iter()
        .map(|migration| migration.version)
        .filter(|version| *version < TIMESTAMP_VERSION_FLOOR)
        .max()
        .unwrap_or(0);
    migrations
        .iter()
        .filter(|migration| migration.version >= TIMESTAMP_VERSION_FLOOR)
        .map(|migration| {
            next += 1;
            (
                migration.file.clone(),
                format!("{next:05}_{}.sql", migration.name),
            )
        })
        .collect()
}

fn slug(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    slug.trim_matches('_').to_owned()
}

fn template(name: &str) -> String {
    format!(
        "-- {name}\n\n{DIRECTIVE} Up\n-- SQL in this section is executed when the migration is applied.\n\n\
         {DIRECTIVE} Down\n-- SQL in this section is executed when the migration is rolled back.\n"
    )
}

fn valid_table(table: &str) -> bool {
    let mut chars = table.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

/// The migration files on disk; needs no database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDir {
    path: PathBuf,
}

impl MigrationDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_dir<T, F>(&self, create: bool, work: F) -> Result<T, MigrationError>
    where
        T: Send + 'static,
        F: FnOnce(&Dir, &Path) -> Result<T, MigrationError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let io = |source| MigrationError::Io {
                path: path.clone(),
                source,
            };
            if create {
                Dir::create_ambient_dir_all(&path, ambient_authority()).map_err(io)?;
            }
            let dir = Dir::open_ambient_dir(&path, ambient_authority()).map_err(io)?;
            work(&dir, &path)
        })
        .await
        .map_err(|err| MigrationError::Join(err.to_string()))?
    }

    /// Migration files in version order.
    ///
    /// # Errors
    /// Unreadable directory, malformed file or duplicate version.
    pub async fn load(&self) -> Result<Vec<Migration>, MigrationError> {
        self.with_dir(false, read_migrations).await
    }

    /// Write an empty migration named after `now`, returning its file name.
    ///
    /// # Errors
    /// [`MigrationError::Exists`] when the file is already present.
    pub async fn create(&self, name: &str, now: DateTime<Utc>) -> Result<String, MigrationError> {
        let slug = slug(name);
        if slug.is_empty() {
            return Err(MigrationError::Parse {
                file: name.to_owned(),
                message: "migration name must contain letters or digits".to_owned(),
            });
        }
        let file = format!("{}_{slug}.sql", now.format("%Y%m%d%H%M%S"));
        let contents = template(name.trim());
        let created = file.clone();
        self.with_dir(true, move |dir, path| {
            if dir.exists(&file) {
                return Err(MigrationError::Exists(file));
            }
            dir.write(&file, contents).map_err(|source| MigrationError::Io {
                path: path.to_path_buf(),
                source,
            })
        })
        .await?;
        info!(operation = "Migrate.Create", file = %created, "migration created");
        Ok(created)
    }

    /// Renumber timestamp versions sequentially, returning the renames.
    ///
    /// # Errors
    /// Any filesystem failure.
    pub async fn fix(&self) -> Result<Vec<(String, String)>, MigrationError> {
        let renames = self
            .with_dir(false, |dir, path| {
                let migrations = read_migrations(dir, path)?;
                let renames = plan_fix(&migrations);
                for (from, to) in &renames {
                    dir.rename(from, dir, to)
                        .map_err(|source| MigrationError::Io {
                            path: path.to_path_buf(),
                            source,
                        })?;
                }
                Ok(renames)
            })
            .await?;
        for (from, to) in &renames {
            info!(operation = "Migrate.Fix", from = %from, to = %to, "migration renumbered");
        }
        Ok(renames)
    }
}

/// Applies and reverts migrations from one directory against one database.
pub struct Migrator {
    db: Arc<dyn Database>,
    dir: MigrationDir,
    table: String,
}

impl Migrator {
    /// # Errors
    /// [`MigrationError::InvalidTable`] unless `table` is a plain identifier.
    pub fn new(
        db: Arc<dyn Database>,
        dir: impl Into<PathBuf>,
        table: &str,
    ) -> Result<Self, MigrationError> {
        if !valid_table(table) {
            return Err(MigrationError::InvalidTable(table.to_owned()));
        }
        Ok(Self {
            db,
            dir: MigrationDir::new(dir),
            table: table.to_owned(),
        })
    }

    /// Migration files in version order.
    ///
    /// # Errors
    /// Unreadable directory, malformed file or duplicate version.
    pub async fn load(&self) -> Result<Vec<Migration>, MigrationError> {
        self.dir.load().await
    }

    /// Create the version table if it is absent.
    ///
    /// # Errors
    /// Any database failure.
    pub async fn ensure_table(&self) -> Result<(), MigrationError> {
        let table = &self.table;
        self.db
            .execute_script(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 id serial PRIMARY KEY, \
                 version_id bigint NOT NULL, \
                 is_applied boolean NOT NULL, \
                 tstamp timestamptz NOT NULL DEFAULT now())"
            ))
            .await?;
        let row = self
            .db
            .query_row(&format!("SELECT count(*) AS count FROM {table}"), &[])
            .await?;
        if row.get("count").and_then(serde_json::Value::as_i64) == Some(0) {
            self.record(0, true).await?;
        }
        Ok(())
    }

    async fn record(&self, version: i64, applied: bool) -> Result<(), DatabaseError> {
        self.db
            .exec(&self.insert_sql(), &[version.into(), applied.into()])
            .await
            .map(|_| ())
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version_id, is_applied) VALUES ($1, $2)",
            self.table
        )
    }

    async fn applied(&self) -> Result<BTreeMap<i64, DateTime<Utc>>, MigrationError> {
        let rows: Vec<VersionRow> = self
            .db
            .select(
                &format!(
                    "SELECT DISTINCT ON (version_id) version_id, is_applied, tstamp \
                     FROM {} ORDER BY version_id, id DESC",
                    self.table
                ),
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.is_applied && row.version_id > 0)
            .map(|row| (row.version_id, row.tstamp))
            .collect())
    }

    /// Highest applied version, `0` when none.
    ///
    /// # Errors
    /// Any database failure.
    pub async fn version(&self) -> Result<i64, MigrationError> {
        self.ensure_table().await?;
        Ok(self.applied().await?.keys().next_back().copied().unwrap_or(0))
    }

    async fn apply(&self, migration: &Migration) -> Result<(), MigrationError> {
        self.run(migration, migration.up.clone(), true).await?;
        info!(
            operation = "Migrate.Up",
            version = migration.version,
            file = %migration.file,
            "migration applied"
        );
        Ok(())
    }

    async fn revert(&self, migration: &Migration) -> Result<(), MigrationError> {
        self.run(migration, migration.down.clone(), false).await?;
        info!(
            operation = "Migrate.Down",
            version = migration.version,
            file = %migration.file,
            "migration rolled back"
        );
        Ok(())
    }

    async fn run(
        &self,
        migration: &Migration,
        script: String,
        applied: bool,
    ) -> Result<(), MigrationError> {
        let insert = self.insert_sql();
        let args = [SqlValue::from(migration.version), SqlValue::from(applied)];
        run_in_transaction(self.db.as_ref(), IsolationLevel::default(), move |tx| {
            Box::pin(async move {
                if !script.trim().is_empty() {
                    tx.execute_script(&script).await?;
                }
                tx.exec(&insert, &args).await?;
                Ok::<_, DatabaseError>(())
            })
        })
        .await?;
        Ok(())
    }

    async fn plan(&self) -> Result<(Vec<Migration>, BTreeMap<i64, DateTime<Utc>>), MigrationError> {
        self.ensure_table().await?;
        let migrations = self.load().await?;
        let applied = self.applied().await?;
        Ok((migrations, applied))
    }

    /// Apply every pending migration.
    ///
    /// # Errors
    /// [`MigrationError::Missing`] when an unapplied migration predates the
    /// current version, or the first failing migration.
    pub async fn up(&self) -> Result<Vec<i64>, MigrationError> {
        self.up_to(i64::MAX).await
    }

    /// Apply pending migrations up to and including `target`.
    ///
    /// # Errors
    /// See [`Migrator::up`].
    pub async fn up_to(&self, target: i64) -> Result<Vec<i64>, MigrationError> {
        let (migrations, applied) = self.plan().await?;
        let current = applied.keys().next_back().copied().unwrap_or(0);
        let missing: Vec<i64> = migrations
            .iter()
            .map(|migration| migration.version)
            .filter(|version| *version < current && !applied.contains_key(version))
            .collect();
        if !missing.is_empty() {
            return Err(MigrationError::Missing {
                current,
                versions: missing,
            });
        }
        let mut done = Vec::new();
        for migration in migrations
            .iter()
            .filter(|migration| migration.version > current && migration.version <= target)
        {
            self.apply(migration).await?;
            done.push(migration.version);
        }
        Ok(done)
    }

    /// Apply only the next pending migration.
    ///
    /// # Errors
    /// [`MigrationError::NoNextVersion`] when nothing is pending.
    pub async fn up_by_one(&self) -> Result<i64, MigrationError> {
        let (migrations, applied) = self.plan().await?;
        let current = applied.keys().next_back().copied().unwrap_or(0);
        let next = migrations
            .iter()
            .find(|migration| migration.version > current)
            .ok_or(MigrationError::NoNextVersion)?;
        self.apply(next).await?;
        Ok(next.version)
    }

    /// Roll back the current version.
    ///
    /// # Errors
    /// [`MigrationError::NoCurrentVersion`] when nothing is applied.
    pub async fn down(&self) -> Result<i64, MigrationError> {
        let (migrations, applied) = self.plan().await?;
        let current = applied
            .keys()
            .next_back()
            .copied()
            .ok_or(MigrationError::NoCurrentVersion)?;
        let migration = find(&migrations, current)?;
        self.revert(migration).await?;
        Ok(current)
    }

    /// Roll back every applied version above `target`, newest first.
    ///
    /// # Errors
    /// [`MigrationError::UnknownVersion`] when an applied version has no
    /// file, or the first failing rollback.
    pub async fn down_to(&self, target: i64) -> Result<Vec<i64>, MigrationError> {
        let (migrations, applied) = self.plan().await?;
        let mut done = Vec::new();
        for version in applied.keys().rev().filter(|version| **version > target) {
            self.revert(find(&migrations, *version)?).await?;
            done.push(*version);
        }
        Ok(done)
    }

    /// Roll back and re-apply the current version.
    ///
    /// # Errors
    /// See [`Migrator::down`].
    pub async fn redo(&self) -> Result<i64, MigrationError> {
        let version = self.down().await?;
        let migrations = self.load().await?;
        self.apply(find(&migrations, version)?).await?;
        Ok(version)
    }

    /// Roll back everything.
    ///
    /// # Errors
    /// See [`Migrator::down_to`].
    pub async fn reset(&self) -> Result<Vec<i64>, MigrationError> {
        self.down_to(0).await
    }

    /// Every migration file with its applied time.
    ///
    /// # Errors
    /// Any database or filesystem failure.
    pub async fn status(&self) -> Result<Vec<MigrationStatus>, MigrationError> {
        let (migrations, applied) = self.plan().await?;
        Ok(migrations
            .into_iter()
            .map(|migration| MigrationStatus {
                version: migration.version,
                applied_at: applied.get(&migration.version).copied(),
                file: migration.file,
            })
            .collect())
    }

    /// See [`MigrationDir::create`].
    ///
    /// # Errors
    /// As [`MigrationDir::create`].
    pub async fn create(&self, name: &str, now: DateTime<Utc>) -> Result<String, MigrationError> {
        self.dir.create(name, now).await
    }

    /// See [`MigrationDir::fix`].
    ///
    /// # Errors
    /// As [`MigrationDir::fix`].
    pub async fn fix(&self) -> Result<Vec<(String, String)>, MigrationError> {
        self.dir.fix().await
    }
}

fn find(migrations: &[Migration], version: i64) -> Result<&Migration, MigrationError> {
    migrations
        .iter()
        .find(|migration| migration.version == version)
        .ok_or(MigrationError::UnknownVersion(version))
}
