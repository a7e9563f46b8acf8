//! End-to-end tests of the SQL authenticator against an SQLite store.
//!
//! Every test creates its own database file in a temporary directory, so the
//! tests need no running database server.

use rust_authd::auth::sql::{SqlAuthConfig, SqlAuthenticator, SqlDriver};
use rust_authd::{AuthError, AuthResult, Authenticator};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// bcrypt cost low enough to keep the suite fast.
const TEST_COST: u32 = 4;

struct Store {
    _dir: TempDir,
    url: String,
}

impl Store {
    async fn create(users: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("auth.db").display());

        let pool = SqlitePool::connect(&url).await.unwrap();
        sqlx::query("CREATE TABLE users (username TEXT, password_hash TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        for (username, password) in users {
            let hash = bcrypt::hash(password, TEST_COST).unwrap();
            insert(&pool, username, Some(hash.as_str())).await;
        }
        pool.close().await;

        Self { _dir: dir, url }
    }

    fn config(&self) -> SqlAuthConfig {
        SqlAuthConfig::new(&self.url, "username", "password_hash", "users")
    }

    async fn authenticator(&self) -> SqlAuthenticator {
        SqlAuthenticator::new(SqlDriver::Sqlite, &self.config()).await.unwrap()
    }

    async fn execute(&self, sql: &str) {
        let pool = SqlitePool::connect(&self.url).await.unwrap();
        sqlx::query(sql).execute(&pool).await.unwrap();
        pool.close().await;
    }
}

async fn insert(pool: &SqlitePool, username: &str, hash: Option<&str>) {
    sqlx::query("INSERT INTO users (username, password_hash) VALUES (?, ?)")
        .bind(username)
        .bind(hash)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn alice_scenario() {
    let store = Store::create(&[("alice", "s3cret")]).await;
    let auth = store.authenticator().await;

    assert_eq!(auth.name(), "sqlite");

    let allowed = auth.authenticate("alice", "s3cret").await.unwrap();
    assert!(allowed.is_allowed());
    assert!(allowed.labels().unwrap().is_empty());

    assert_eq!(auth.authenticate("alice", "wrong").await.unwrap(), AuthResult::Denied);
    assert_eq!(auth.authenticate("bob", "anything").await.unwrap(), AuthResult::NoMatch);
    assert!(!auth.authenticate("bob", "anything").await.unwrap().is_allowed());

    auth.stop().await;
}

#[tokio::test]
async fn repeated_calls_give_identical_results() {
    let store = Store::create(&[("alice", "s3cret")]).await;
    let auth = store.authenticator().await;

    for _ in 0..3 {
        assert!(auth.authenticate("alice", "s3cret").await.unwrap().is_allowed());
        assert_eq!(auth.authenticate("alice", "nope").await.unwrap(), AuthResult::Denied);
    }
}

#[tokio::test]
async fn username_is_bound_not_interpolated() {
    let store = Store::create(&[("alice", "s3cret")]).await;
    let auth = store.authenticator().await;

    let result = auth.authenticate("' OR '1'='1", "s3cret").await.unwrap();
    assert_eq!(result, AuthResult::NoMatch);
}

#[tokio::test]
async fn unrecognized_hash_format_is_a_denial() {
    let store = Store::create(&[]).await;
    store
        .execute("INSERT INTO users (username, password_hash) VALUES ('legacy', 'plain-text')")
        .await;
    let auth = store.authenticator().await;

    assert_eq!(auth.authenticate("legacy", "plain-text").await.unwrap(), AuthResult::Denied);
}

#[tokio::test]
async fn duplicate_usernames_are_a_query_error() {
    let store = Store::create(&[("alice", "s3cret"), ("alice", "other")]).await;
    let auth = store.authenticator().await;

    assert!(matches!(auth.authenticate("alice", "s3cret").await, Err(AuthError::Query(_))));
}

#[tokio::test]
async fn null_hash_is_a_query_error() {
    let store = Store::create(&[]).await;
    store
        .execute("INSERT INTO users (username, password_hash) VALUES ('ghost', NULL)")
        .await;
    let auth = store.authenticator().await;

    assert!(matches!(auth.authenticate("ghost", "x").await, Err(AuthError::Query(_))));
}

#[tokio::test]
async fn missing_table_is_reported_per_call() {
    let store = Store::create(&[("alice", "s3cret")]).await;
    let mut config = store.config();
    config.table = "accounts".to_string();
    let auth = SqlAuthenticator::new(SqlDriver::Sqlite, &config).await.unwrap();

    assert!(matches!(auth.authenticate("alice", "s3cret").await, Err(AuthError::Query(_))));
    // the authenticator stays usable for later calls
    assert!(matches!(auth.authenticate("alice", "s3cret").await, Err(AuthError::Query(_))));
}

#[tokio::test]
async fn store_breaking_mid_life_returns_error() {
    let store = Store::create(&[("alice", "s3cret")]).await;
    let auth = store.authenticator().await;
    assert!(auth.authenticate("alice", "s3cret").await.unwrap().is_allowed());

    store.execute("DROP TABLE users").await;

    let result = auth.authenticate("alice", "s3cret").await;
    assert!(matches!(result, Err(AuthError::Query(_)) | Err(AuthError::Connection(_))));
}

#[tokio::test]
async fn stopped_authenticator_returns_closed_promptly() {
    let store = Store::create(&[("alice", "s3cret")]).await;
    let auth = store.authenticator().await;

    auth.stop().await;
    auth.stop().await;

    let result = timeout(Duration::from_secs(1), auth.authenticate("alice", "s3cret"))
        .await
        .expect("authenticate after stop must not hang");
    assert!(matches!(result, Err(AuthError::Closed)));
}

#[tokio::test]
async fn cancelled_call_returns_cancelled() {
    let store = Store::create(&[("alice", "s3cret")]).await;
    let auth = store.authenticator().await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = auth.authenticate_cancellable("alice", "s3cret", &cancel).await;
    assert!(matches!(result, Err(AuthError::Cancelled)));

    let live = CancellationToken::new();
    let result = auth.authenticate_cancellable("alice", "s3cret", &live).await.unwrap();
    assert!(result.is_allowed());
}

#[tokio::test]
async fn missing_database_file_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=ro", dir.path().join("absent.db").display());
    let config = SqlAuthConfig::new(&url, "username", "password_hash", "users");

    let result = SqlAuthenticator::new(SqlDriver::Sqlite, &config).await;
    assert!(matches!(result, Err(AuthError::Connection(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_get_their_own_results() {
    let users: Vec<(String, String)> = (0..100)
        .map(|i| (format!("user{}", i), format!("password-{}", i)))
        .collect();
    let borrowed: Vec<(&str, &str)> = users.iter().map(|(u, p)| (u.as_str(), p.as_str())).collect();

    let store = Store::create(&borrowed).await;
    let auth = Arc::new(store.authenticator().await);

    let tasks: Vec<_> = users
        .iter()
        .enumerate()
        .map(|(i, (username, password))| {
            let auth = Arc::clone(&auth);
            let username = username.clone();
            // odd users present somebody else's password
            let password = if i % 2 == 0 {
                password.clone()
            } else {
                format!("password-{}", (i + 1) % 100)
            };
            tokio::spawn(async move {
                let result = auth.authenticate(&username, &password).await;
                (i, result)
            })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        let (i, result) = task.unwrap();
        let result = result.unwrap();
        if i % 2 == 0 {
            assert!(result.is_allowed(), "user{} should be allowed", i);
        } else {
            assert_eq!(result, AuthResult::Denied, "user{} should be denied", i);
        }
    }

    auth.stop().await;
}

#[tokio::test]
async fn slow_lookup_hits_query_timeout() {
    let store = Store::create(&[]).await;
    // a view that walks twenty million rows before producing its single match
    store
        .execute(
            "CREATE VIEW slow_users AS \
             WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 20000000) \
             SELECT 'alice' AS username, 'unused' AS password_hash FROM n WHERE x = 20000000",
        )
        .await;

    let mut config = store.config();
    config.table = "slow_users".to_string();
    config.max_connections = 1;
    config.query_timeout = Some(1);
    let auth = SqlAuthenticator::new(SqlDriver::Sqlite, &config).await.unwrap();

    let result = timeout(Duration::from_secs(10), auth.authenticate("alice", "s3cret"))
        .await
        .expect("query_timeout must bound the call");
    assert!(matches!(result, Err(AuthError::Timeout)), "got {:?}", result);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_during_in_flight_calls() {
    let store = Store::create(&[("alice", "s3cret")]).await;
    let mut config = store.config();
    config.max_connections = 2;
    let auth = Arc::new(SqlAuthenticator::new(SqlDriver::Sqlite, &config).await.unwrap());

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move { auth.authenticate("alice", "s3cret").await })
        })
        .collect();

    timeout(Duration::from_secs(10), auth.stop())
        .await
        .expect("stop must not hang on in-flight calls");

    let results = timeout(Duration::from_secs(10), futures::future::join_all(tasks))
        .await
        .expect("in-flight calls must finish after stop");
    for result in results {
        match result.unwrap() {
            Ok(result) => assert!(result.is_allowed()),
            Err(AuthError::Closed) => {}
            Err(other) => panic!("unexpected error after stop: {:?}", other),
        }
    }

    assert!(matches!(auth.authenticate("alice", "s3cret").await, Err(AuthError::Closed)));
}
