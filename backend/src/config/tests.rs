//! Unit tests for configuration loading.

use super::*;
use mockable::MockEnv;
use rstest::{fixture, rstest};
use std::collections::HashMap;

fn mock_env(vars: &[(&str, &str)]) -> MockEnv {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect();
    let mut env = MockEnv::new();
    env.expect_string()
        .times(0..)
        .returning(move |key| vars.get(key).cloned());
    env
}

#[fixture]
fn defaults() -> Config {
    Config::default()
}

#[rstest]
fn defaults_match_documented_values(defaults: Config) {
    assert_eq!(defaults.app.port, 8080);
    assert_eq!(defaults.database.host, "localhost");
    assert_eq!(defaults.database.max_connections, 10);
    assert_eq!(defaults.cache.redis.port, 6379);
    assert_eq!(defaults.cache.redis.db, 0);
    assert_eq!(defaults.storage.s3_region, "us-east-1");
    assert_eq!(defaults.queue.concurrency, 10);
    assert_eq!(
        defaults.queue.weights,
        vec![
            ("critical".to_owned(), 6),
            ("default".to_owned(), 3),
            ("low".to_owned(), 1)
        ]
    );
    assert!(defaults.http_client.follow_redirect);
    assert_eq!(defaults.http_client.max_retries, 3);
    assert!(defaults.token.secret.is_none());
}

#[rstest]
fn empty_sources_load_the_defaults(defaults: Config) {
    let loaded = Config::from_sources(&mock_env(&[]), &Dotfile::new()).expect("load");
    assert_eq!(loaded, defaults);
    assert_eq!(loaded.token.issuer, loaded.app.name);
    assert_eq!(loaded.pubsub.consumer, "skeleton");
}

#[rstest]
fn missing_secrets_fail_only_when_required(defaults: Config) {
    let err = defaults.token.require_secret().expect_err("secret missing");
    assert!(matches!(err, ConfigError::Missing { name: "JWT_SECRET_KEY" }));
    let err = defaults.crypto.require_key().expect_err("key missing");
    assert!(matches!(err, ConfigError::Missing { name: "ENCRYPTION_KEY" }));
    let err = defaults.database.require_name().expect_err("db name missing");
    assert!(matches!(err, ConfigError::Missing { name: "DB_NAME" }));
}

#[test]
fn environment_overrides_dotfile() {
    let env = mock_env(&[("CACHE_DRIVER", "redis"), ("CACHE_PORT", "6380")]);
    let dotfile = parse_dotfile("CACHE_DRIVER=memory\nCACHE_HOST=cache.internal\n").expect("parse");

    let config = Config::from_sources(&env, &dotfile).expect("config");

    assert_eq!(config.cache.driver, "redis");
    assert_eq!(config.cache.redis.host, "cache.internal");
    assert_eq!(config.cache.redis.port, 6380);
}

#[rstest]
#[case("APP_PORT", "http")]
#[case("HTTP_CLIENT_TIMEOUT", "forever")]
#[case("HTTP_CLIENT_FOLLOW_REDIRECT", "sometimes")]
#[case("QUEUE_WEIGHTS", "critical=0")]
#[case("BCRYPT_COST", "-1")]
fn unparsable_values_are_rejected(#[case] key: &'static str, #[case] value: &'static str) {
    let env = mock_env(&[(key, value)]);
    let err = Config::from_sources(&env, &Dotfile::new()).expect_err("invalid config");
    match err {
        ConfigError::Invalid { name, .. } => assert_eq!(name, key),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn durations_accept_suffixes() {
    let env = mock_env(&[
        ("HTTP_CLIENT_TIMEOUT", "1500ms"),
        ("HTTP_CLIENT_RETRY_WAIT_TIME", "2"),
        ("JWT_EXPIRY", "15m"),
    ]);
    let config = Config::from_sources(&env, &Dotfile::new()).expect("config");

    assert_eq!(config.http_client.timeout, Duration::from_millis(1500));
    assert_eq!(config.http_client.retry_wait, Duration::from_secs(2));
    assert_eq!(config.token.expiry, Duration::from_secs(900));
}

#[test]
fn default_headers_and_weights_are_parsed() {
    let env = mock_env(&[
        ("HTTP_CLIENT_HEADERS", "User-Agent: skeleton/1, X-Team:core"),
        ("QUEUE_WEIGHTS", "emails=2, reports=1"),
    ]);
    let config = Config::from_sources(&env, &Dotfile::new()).expect("config");

    assert_eq!(
        config.http_client.default_headers,
        vec![
            ("User-Agent".to_owned(), "skeleton/1".to_owned()),
            ("X-Team".to_owned(), "core".to_owned()),
        ]
    );
    assert_eq!(
        config.queue.weights,
        vec![("emails".to_owned(), 2), ("reports".to_owned(), 1)]
    );
}

#[test]
fn s3_credentials_report_first_missing_value() {
    let env = mock_env(&[("STORAGE_S3_BUCKET", "media")]);
    let config = Config::from_sources(&env, &Dotfile::new()).expect("config");

    let err = config
        .storage
        .require_s3_credentials()
        .expect_err("credentials missing");
    assert!(matches!(err, ConfigError::Missing { name: "STORAGE_S3_ACCESS_KEY" }));
}

#[rstest]
#[case(None, "redis://localhost:6379/0")]
#[case(Some("s3cret"), "redis://:s3cret@localhost:6379/0")]
fn redis_url_includes_password(#[case] password: Option<&str>, #[case] expected: &str) {
    let endpoint = RedisEndpoint {
        password: password.map(str::to_owned),
        ..RedisEndpoint::default()
    };
    assert_eq!(endpoint.url(), expected);
}

#[test]
fn load_reads_the_configured_dotfile() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("service.env");
    let root = cap_std::fs::Dir::open_ambient_dir(dir.path(), cap_std::ambient_authority())
        .expect("open tempdir");
    root.write("service.env", "DB_NAME=orders\nAPP_PORT=7001\n")
        .expect("write dotfile");

    let path_value = path.to_string_lossy().into_owned();
    let env = mock_env(&[("APP_DOTFILE", path_value.as_str())]);
    let config = Config::load(&env).expect("config");

    assert_eq!(config.database.name.as_deref(), Some("orders"));
    assert_eq!(config.app.port, 7001);
    assert_eq!(config.app.dotfile, path);
}
