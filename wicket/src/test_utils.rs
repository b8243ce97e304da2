//! Shared fixtures for tests.

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::AuthService;
use crate::auth::password::{self, Argon2Params};
use crate::auth::session_store::Durability;
use crate::cache::MemoryCache;
use crate::config::{Config, PasswordConfig};
use crate::db::handlers::{Repository, Users};
use crate::db::models::users::{User, UserCreateDBRequest};

/// Password of every user made by [`create_test_user`].
pub const TEST_PASSWORD: &str = "password";

/// Cheapest argon2 parameters the library accepts.
pub fn cheap_argon2() -> Argon2Params {
    Argon2Params {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    let params = cheap_argon2();
    config.auth.password = PasswordConfig {
        argon2_memory_kib: params.memory_kib,
        argon2_iterations: params.iterations,
        argon2_parallelism: params.parallelism,
    };
    // Tests assert on the durable copy right after a save
    config.auth.session.durability = Durability::Synchronous;
    config
}

/// An [`AuthService`] over `pool` and a fresh in-memory cache, returned for inspection.
pub fn test_service(pool: PgPool) -> (AuthService, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let service = AuthService::new(pool, cache.clone(), &test_config());
    (service, cache)
}

/// Insert a user with `email` and the password [`TEST_PASSWORD`].
pub async fn create_test_user(pool: &PgPool, email: &str) -> User {
    let password_hash = password::hash_password(TEST_PASSWORD, cheap_argon2()).expect("Failed to hash test password");

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            name: "Test User".to_string(),
            email: email.to_string(),
            phone: String::new(),
            password_hash,
        })
        .await
        .expect("Failed to create test user")
}

/// Make every `operation` (`INSERT`, `UPDATE` or `DELETE`) on a row of `table` raise, so a flow
/// touching that table fails midway through its transaction.
pub async fn fail_writes_to(pool: &PgPool, table: &str, operation: &str) {
    let sql = format!(
        r#"
        CREATE OR REPLACE FUNCTION wicket_failing_write() RETURNS trigger AS $$
        BEGIN
            RAISE EXCEPTION 'write to % rejected', TG_TABLE_NAME;
        END;
        $$ LANGUAGE plpgsql;

        CREATE TRIGGER reject_{table}_{trigger} BEFORE {operation} ON {table}
            FOR EACH ROW EXECUTE FUNCTION wicket_failing_write();
        "#,
        trigger = operation.to_lowercase(),
    );

    sqlx::raw_sql(&sql)
        .execute(pool)
        .await
        .expect("Failed to install failing trigger");
}
