//! Unit tests for the architecture lint.

use std::path::PathBuf;

use rstest::fixture;
use rstest::rstest;

use super::*;

#[derive(Clone, Copy)]
struct LintSingle;

impl LintSingle {
    fn lint(self, file: &str, contents: &str) -> Result<(), ArchitectureLintError> {
        lint_sources(&[LintSource {
            file: PathBuf::from(file),
            contents: contents.to_owned(),
        }])
    }
}

#[fixture]
fn lint_single() -> LintSingle {
    LintSingle
}

#[rstest]
#[case(
    "inbound/http/router.rs",
    "use crate::domain::UseCase; fn mount(_: &dyn UseCase) {}",
    true
)]
#[case(
    "inbound/queue/pool.rs",
    "use crate::outbound::queue::RedisQueue; fn run() { let _ = RedisQueue::new; }",
    false
)]
#[case(
    "inbound/queue/pool.rs",
    "use outbound::queue::RedisQueue; fn run() {}",
    false
)]
#[case(
    "inbound/queue/pool.rs",
    "use skeleton::outbound::queue::RedisQueue; fn run() {}",
    false
)]
#[case("inbound/http/middleware/auth.rs", "use jsonwebtoken::decode; fn check() {}", false)]
#[case("domain/usecases/login.rs", "use crate::inbound::http; fn thing() {}", false)]
#[case("domain/ports/cache.rs", "use bb8_redis::RedisConnectionManager; fn thing() {}", false)]
#[case("domain/response.rs", "use actix_web::HttpResponse; fn thing() {}", false)]
#[case("outbound/cache/redis.rs", "use crate::inbound::http; fn thing() {}", false)]
#[case("outbound/cache/redis.rs", "use actix_web::web; fn thing() {}", false)]
#[case("outbound/cache/redis.rs", "use bb8_redis::bb8::Pool; fn thing() {}", true)]
fn detects_boundary_violations(
    lint_single: LintSingle,
    #[case] file: &str,
    #[case] contents: &str,
    #[case] ok: bool,
) {
    let result = lint_single.lint(file, contents);
    assert_eq!(result.is_ok(), ok, "result: {result:?}");
}

#[rstest]
fn test_modules_may_cross_layers(lint_single: LintSingle) {
    let inline = "fn run() {} #[cfg(test)] mod tests { use crate::outbound::queue::MemoryQueue; }";
    assert!(lint_single.lint("inbound/queue/pool.rs", inline).is_ok());
    assert!(
        lint_single
            .lint("inbound/pubsub/tests.rs", "use crate::outbound::pubsub::MemoryPubSub;")
            .is_ok()
    );
}

#[rstest]
fn files_outside_the_layers_are_rejected(lint_single: LintSingle) {
    let result = lint_single.lint("bootstrap/wiring.rs", "fn wire() {}");
    assert!(matches!(result, Err(ArchitectureLintError::Parse { .. })));
}
