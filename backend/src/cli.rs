//! Command-line surface.
//!
//! ```text
//! skeleton http
//! skeleton worker
//! skeleton pubsub
//! skeleton db:migrate [--dir D] [--table T] [--verbose] <verb>
//! ```

use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use crate::bootstrap::{RunError, Runtime, serve_http, serve_pubsub, serve_worker};
use crate::outbound::persistence::{
    DEFAULT_DIR, DEFAULT_TABLE, MigrationDir, Migrator, registry_database,
};

/// Clean-architecture service skeleton.
#[derive(Debug, Clone, Parser)]
#[command(name = "skeleton", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve the HTTP ingress.
    Http,
    /// Consume pub/sub subscriptions.
    Pubsub,
    /// Run the queue worker pool.
    Worker,
    /// Apply, revert or inspect database migrations.
    #[command(name = "db:migrate", disable_version_flag = true)]
    Migrate(MigrateArgs),
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct MigrateArgs {
    /// Directory holding `<version>_<name>.sql` files.
    #[arg(long, default_value = DEFAULT_DIR, value_name = "path")]
    pub dir: PathBuf,
    /// Version table name.
    #[arg(long, default_value = DEFAULT_TABLE, value_name = "name")]
    pub table: String,
    /// Print every migration touched, not just the summary.
    #[arg(long, short)]
    pub verbose: bool,
    /// Print a usage guide and exit.
    #[arg(long)]
    pub guide: bool,
    /// Print the tool version and exit.
    #[arg(long = "version")]
    pub show_version: bool,
    #[command(subcommand)]
    pub verb: Option<MigrateVerb>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum MigrateVerb {
    /// Apply every pending migration.
    Up,
    /// Apply the next pending migration.
    UpByOne,
    /// Apply pending migrations up to and including VERSION.
    UpTo { version: i64 },
    /// Roll back the current migration.
    Down,
    /// Roll back migrations newer than VERSION.
    DownTo { version: i64 },
    /// Roll back and re-apply the current migration.
    Redo,
    /// Roll back every applied migration.
    Reset,
    /// List migrations and when they were applied.
    Status,
    /// Print the current database version.
    Version,
    /// Write a new migration file.
    Create { name: String },
    /// Renumber timestamped migrations sequentially.
    Fix,
}

impl MigrateVerb {
    fn needs_database(&self) -> bool {
        !matches!(self, Self::Create { .. } | Self::Fix)
    }
}

const GUIDE: &str = "\
Usage: skeleton db:migrate [--dir D] [--table T] [--verbose] <verb>

Verbs:
  up              apply every pending migration
  up-by-one       apply the next pending migration
  up-to VERSION   apply pending migrations up to VERSION
  down            roll back the current migration
  down-to VERSION roll back migrations newer than VERSION
  redo            roll back and re-apply the current migration
  reset           roll back every applied migration
  status          list migrations and when they were applied
  version         print the current database version
  create NAME     write <timestamp>_<name>.sql with Up/Down sections
  fix             renumber timestamped migrations sequentially

Database settings come from DB_HOST, DB_PORT, DB_USERNAME, DB_PASSWORD and
DB_NAME.
";

impl Cli {
    /// Run the selected command to completion.
    ///
    /// # Errors
    /// Any [`RunError`] raised by the command.
    pub async fn run(self, runtime: &Runtime) -> Result<(), RunError> {
        match self.command {
            Command::Http => serve_http(runtime).await,
            Command::Pubsub => serve_pubsub(runtime).await,
            Command::Worker => serve_worker(runtime).await,
            Command::Migrate(args) => migrate(&args, runtime, &mut std::io::stdout()).await,
        }
    }
}

/// Execute one `db:migrate` invocation, writing its report to `out`.
///
/// # Errors
/// Database connection, migration or output failures.
pub async fn migrate<W: Write>(
    args: &MigrateArgs,
    runtime: &Runtime,
    out: &mut W,
) -> Result<(), RunError> {
    if args.show_version {
        writeln!(out, "skeleton db:migrate {}", env!("CARGO_PKG_VERSION"))?;
        return Ok(());
    }
    let Some(verb) = args.verb.as_ref().filter(|_| !args.guide) else {
        out.write_all(GUIDE.as_bytes())?;
        return Ok(());
    };

    if !verb.needs_database() {
        return migrate_files(verb, &MigrationDir::new(&args.dir), args.verbose, out).await;
    }

    let db = registry_database(&runtime.config.database).await?;
    let result = async {
        let migrator = Migrator::new(std::sync::Arc::clone(&db), &args.dir, &args.table)?;
        migrate_database(verb, &migrator, args.verbose, out).await
    }
    .await;
    if let Err(err) = db.close().await {
        tracing::warn!(operation = "Migrate.Close", error = %err, "database close failed");
    }
    runtime.close();
    result
}

async fn migrate_files<W: Write>(
    verb: &MigrateVerb,
    files: &MigrationDir,
    verbose: bool,
    out: &mut W,
) -> Result<(), RunError> {
    match verb {
        MigrateVerb::Create { name } => {
            let file = files.create(name, Utc::now()).await?;
            writeln!(out, "created {}", files.path().join(file).display())?;
        }
        MigrateVerb::Fix => {
            let renames = files.fix().await?;
            if verbose {
                for (from, to) in &renames {
                    writeln!(out, "renamed {from} -> {to}")?;
                }
            }
            writeln!(out, "fixed {} migration(s)", renames.len())?;
        }
        _ => {}
    }
    Ok(())
}

async fn migrate_database<W: Write>(
    verb: &MigrateVerb,
    migrator: &Migrator,
    verbose: bool,
    out: &mut W,
) -> Result<(), RunError> {
    match verb {
        MigrateVerb::Up => report(out, "applied", &migrator.up().await?, verbose)?,
        MigrateVerb::UpTo { version } => {
            report(out, "applied", &migrator.up_to(*version).await?, verbose)?;
        }
        MigrateVerb::UpByOne => writeln!(out, "applied {}", migrator.up_by_one().await?)?,
        MigrateVerb::Down => writeln!(out, "rolled back {}", migrator.down().await?)?,
        MigrateVerb::DownTo { version } => {
            report(out, "rolled back", &migrator.down_to(*version).await?, verbose)?;
        }
        MigrateVerb::Redo => writeln!(out, "redid {}", migrator.redo().await?)?,
        MigrateVerb::Reset => report(out, "rolled back", &migrator.reset().await?, verbose)?,
        MigrateVerb::Status => {
            writeln!(out, "{:<24} Migration", "Applied At")?;
            for entry in migrator.status().await? {
                let applied = entry.applied_at.map_or_else(
                    || "Pending".to_owned(),
                    |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
                );
                writeln!(out, "{applied:<24} {}", entry.file)?;
            }
        }
        MigrateVerb::Version => writeln!(out, "version {}", migrator.version().await?)?,
        MigrateVerb::Create { .. } | MigrateVerb::Fix => {}
    }
    Ok(())
}

fn report<W: Write>(out: &mut W, verb: &str, versions: &[i64], verbose: bool) -> std::io::Result<()> {
    if verbose {
        for version in versions {
            writeln!(out, "{verb} {version}")?;
        }
    }
    match versions.last() {
        Some(last) => writeln!(out, "{verb} {} migration(s); now at {last}", versions.len()),
        None => writeln!(out, "no migrations to run"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::telemetry::LogFormat;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("valid arguments")
    }

    fn runtime() -> Runtime {
        Runtime::new(Config::default(), LogFormat::Json)
    }

    #[rstest]
    #[case(&["skeleton", "http"], Command::Http)]
    #[case(&["skeleton", "worker"], Command::Worker)]
    #[case(&["skeleton", "pubsub"], Command::Pubsub)]
    fn ingress_commands(#[case] args: &[&str], #[case] expected: Command) {
        assert_eq!(parse(args).command, expected);
    }

    #[rstest]
    #[case(&["up"], MigrateVerb::Up)]
    #[case(&["up-by-one"], MigrateVerb::UpByOne)]
    #[case(&["up-to", "3"], MigrateVerb::UpTo { version: 3 })]
    #[case(&["down"], MigrateVerb::Down)]
    #[case(&["down-to", "0"], MigrateVerb::DownTo { version: 0 })]
    #[case(&["redo"], MigrateVerb::Redo)]
    #[case(&["reset"], MigrateVerb::Reset)]
    #[case(&["status"], MigrateVerb::Status)]
    #[case(&["version"], MigrateVerb::Version)]
    #[case(&["create", "add_users"], MigrateVerb::Create { name: "add_users".to_owned() })]
    #[case(&["fix"], MigrateVerb::Fix)]
    fn migrate_verbs(#[case] verb: &[&str], #[case] expected: MigrateVerb) {
        let mut args = vec!["skeleton", "db:migrate"];
        args.extend_from_slice(verb);
        let Command::Migrate(migrate) = parse(&args).command else {
            panic!("expected db:migrate");
        };
        assert_eq!(migrate.verb, Some(expected));
        assert_eq!(migrate.dir, PathBuf::from(DEFAULT_DIR));
        assert_eq!(migrate.table, DEFAULT_TABLE);
    }

    #[test]
    fn migrate_flags() {
        let cli = parse(&[
            "skeleton",
            "db:migrate",
            "--dir",
            "db/sql",
            "--table",
            "schema_versions",
            "--verbose",
            "status",
        ]);
        let Command::Migrate(args) = cli.command else {
            panic!("expected db:migrate");
        };
        assert_eq!(args.dir, PathBuf::from("db/sql"));
        assert_eq!(args.table, "schema_versions");
        assert!(args.verbose);
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(Cli::try_parse_from(["skeleton", "serve"]).is_err());
    }

    #[tokio::test]
    async fn guide_and_version_need_no_database() {
        let Command::Migrate(guide) = parse(&["skeleton", "db:migrate", "--guide"]).command else {
            panic!("expected db:migrate");
        };
        let mut out = Vec::new();
        migrate(&guide, &runtime(), &mut out).await.expect("guide");
        assert!(String::from_utf8_lossy(&out).contains("up-by-one"));

        let Command::Migrate(version) = parse(&["skeleton", "db:migrate", "--version"]).command
        else {
            panic!("expected db:migrate");
        };
        let mut out = Vec::new();
        migrate(&version, &runtime(), &mut out).await.expect("version");
        assert!(String::from_utf8_lossy(&out).starts_with("skeleton db:migrate "));
    }

    #[tokio::test]
    async fn create_writes_into_the_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("migrations");
        let dir_arg = dir.to_string_lossy().into_owned();
        let Command::Migrate(args) =
            parse(&["skeleton", "db:migrate", "--dir", &dir_arg, "create", "add users"]).command
        else {
            panic!("expected db:migrate");
        };

        let mut out = Vec::new();
        migrate(&args, &runtime(), &mut out).await.expect("create");

        let report = String::from_utf8_lossy(&out).into_owned();
        assert!(report.starts_with("created "), "{report}");
        assert!(report.trim_end().ends_with("_add_users.sql"), "{report}");
        assert_eq!(std::fs::read_dir(&dir).expect("dir").count(), 1);
    }

    #[tokio::test]
    async fn database_verbs_fail_without_credentials() {
        let Command::Migrate(args) = parse(&["skeleton", "db:migrate", "up"]).command else {
            panic!("expected db:migrate");
        };
        let mut out = Vec::new();
        let err = migrate(&args, &runtime(), &mut out)
            .await
            .expect_err("DB_USERNAME is unset");
        assert!(matches!(err, RunError::Init(_)));
    }
}
