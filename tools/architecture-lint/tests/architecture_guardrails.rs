//! End-to-end runs of the lint over source trees written to disk.

use std::fs;
use std::path::PathBuf;

use architecture_lint::{ArchitectureLintError, Violation};
use rstest::rstest;
use tempfile::TempDir;

const VALID: &[(&str, &str)] = &[
    (
        "domain/usecase.rs",
        "pub trait UseCase { fn name(&self) -> &'static str; }",
    ),
    (
        "inbound/http/router.rs",
        "use crate::domain::usecase::UseCase; fn mount(_: &dyn UseCase) {}",
    ),
    (
        "outbound/cache/memory.rs",
        "use crate::domain::ports::Cache; pub struct MemoryCache;",
    ),
    (
        "bootstrap/wiring.rs",
        "use crate::inbound::http::Router; use crate::outbound::cache::MemoryCache;",
    ),
];

fn lint_tree(files: &[(&str, &str)]) -> Result<(), ArchitectureLintError> {
    let temp_dir = TempDir::new().expect("tempdir");
    let backend_dir = temp_dir.path().join("backend");
    let src_dir = backend_dir.join("src");
    for (file, contents) in files {
        let path = src_dir.join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directories");
        }
        fs::write(&path, contents).expect("write source file");
    }
    architecture_lint::lint_backend_sources(&backend_dir)
}

fn violations(outcome: Result<(), ArchitectureLintError>) -> Vec<Violation> {
    match outcome {
        Err(ArchitectureLintError::Violations(violations)) => violations,
        other => panic!("expected violations, got: {other:?}"),
    }
}

fn has_violation(violations: &[Violation], file: &str, needle: &str) -> bool {
    let file = PathBuf::from(file);
    violations
        .iter()
        .any(|violation| violation.file == file && violation.message.contains(needle))
}

#[rstest]
fn layered_tree_passes() {
    let outcome = lint_tree(VALID);
    assert!(outcome.is_ok(), "expected success, got: {outcome:?}");
}

#[rstest]
#[case(
    "inbound/queue/pool.rs",
    "use skeleton::outbound::queue::RedisQueue; fn run() {}",
    "crate::outbound"
)]
#[case(
    "outbound/pubsub/redis.rs",
    "use crate::inbound::pubsub::PubSubRouter; fn run() {}",
    "crate::inbound"
)]
#[case(
    "inbound/http/server.rs",
    "use sqlx::PgPool; fn run() {}",
    "external crate `sqlx`"
)]
#[case(
    "domain/response.rs",
    "use actix_web::HttpResponse; fn run() { let _ = HttpResponse::Ok(); }",
    "external crate `actix_web`"
)]
fn crossing_a_boundary_is_reported(
    #[case] file: &str,
    #[case] contents: &str,
    #[case] needle: &str,
) {
    let mut files = VALID.to_vec();
    files.push((file, contents));
    let found = violations(lint_tree(&files));
    assert!(has_violation(&found, file, needle), "got: {found:?}");
}

#[rstest]
fn every_violation_is_reported() {
    let mut files = VALID.to_vec();
    files.push((
        "inbound/http/bad.rs",
        "use crate::outbound::cache::RedisCache; fn run() {}",
    ));
    files.push(("domain/bad.rs", "use reqwest::Client; fn run() {}"));
    let found = violations(lint_tree(&files));
    assert_eq!(found.len(), 2, "got: {found:?}");
    assert!(has_violation(&found, "inbound/http/bad.rs", "crate::outbound"));
    assert!(has_violation(&found, "domain/bad.rs", "external crate `reqwest`"));
}
