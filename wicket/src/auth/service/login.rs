use chrono::Utc;
use tracing::instrument;

use super::{AuthService, ClientInfo, canonical_email};
use crate::auth::session::Session;
use crate::db::handlers::Users;
use crate::db::models::users::User;
use crate::errors::{Error, Result};

impl AuthService {
    /// Check an email and password.
    ///
    /// Throttled per email. An unknown email and a wrong password both fail with
    /// [`Error::Unauthorized`]. A successful check clears the email's throttle and records the
    /// login time. Unconfirmed users may log in.
    #[instrument(skip_all, err(level = "info"))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = canonical_email(email);
        let limit_key = format!("login:{email}");
        self.limiter.check(&limit_key, self.rate_limits.login).await?;

        if email.is_empty() || password.is_empty() {
            return Err(Error::Unauthorized);
        }

        let mut conn = self.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let mut user = Users::new(&mut conn)
            .get_user_by_email(&email)
            .await?
            .ok_or(Error::Unauthorized)?;

        if !self.verify_password(user.password_hash.clone(), password.to_string()).await? {
            return Err(Error::Unauthorized);
        }

        Users::new(&mut conn).update_last_login(user.id).await?;
        user.last_login = Some(Utc::now());

        self.limiter.reset(&limit_key).await?;
        Ok(user)
    }

    /// Authenticate and start a session for the user. `remember` selects the long session
    /// lifetime.
    #[instrument(skip(self, email, password), err(level = "info"))]
    pub async fn login(&self, email: &str, password: &str, client: ClientInfo, remember: bool) -> Result<Session> {
        let user = self.authenticate(email, password).await?;
        let (groups, permissions) = self.resolve_access(user.id).await?;

        let ttl = if remember {
            self.auth.session.long_duration
        } else {
            self.auth.session.duration
        };

        let mut session = Session::for_user(&user, &groups, permissions, ttl).with_client(client.user_agent, client.ip);
        self.sessions.save(&mut session).await?;

        tracing::info!(groups = session.groups.len(), "user logged in");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service::RegistrationRequest;
    use crate::test_utils::test_service;
    use sqlx::PgPool;
    use std::time::Duration;

    async fn register(service: &AuthService, email: &str, password: &str) -> User {
        service
            .register(RegistrationRequest {
                name: "Login User".to_string(),
                email: email.to_string(),
                password: password.to_string(),
                phone: String::new(),
            })
            .await
            .unwrap()
            .user
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_creates_authenticated_session(pool: PgPool) {
        let (service, _) = test_service(pool);
        let user = register(&service, "login@example.com", "hunter2").await;

        let session = service
            .login(" LOGIN@example.com", "hunter2", ClientInfo::new("Mozilla/5.0", "192.0.2.1"), false)
            .await
            .unwrap();

        assert_eq!(session.user_id(), Some(user.id));
        assert_eq!(session.ip, "192.0.2.1");
        let ttl = session.time_to_live().unwrap();
        assert!(ttl <= Duration::from_secs(3 * 3600) && ttl > Duration::from_secs(3 * 3600 - 60));

        let stored = service.session(&session.id).await.unwrap();
        assert_eq!(stored, session);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_remember_uses_long_duration(pool: PgPool) {
        let (service, _) = test_service(pool);
        register(&service, "remember@example.com", "pw").await;

        let session = service
            .login("remember@example.com", "pw", ClientInfo::default(), true)
            .await
            .unwrap();
        assert!(session.time_to_live().unwrap() > Duration::from_secs(29 * 86400));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unknown_email_and_wrong_password_look_the_same(pool: PgPool) {
        let (service, _) = test_service(pool);
        register(&service, "same@example.com", "right").await;

        let unknown = service.authenticate("nobody@example.com", "right").await.unwrap_err();
        let wrong = service.authenticate("same@example.com", "wrong").await.unwrap_err();

        assert!(matches!(unknown, Error::Unauthorized));
        assert!(matches!(wrong, Error::Unauthorized));
        assert_eq!(unknown.user_message(), wrong.user_message());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_login_is_rate_limited_per_email(pool: PgPool) {
        let (service, _) = test_service(pool);
        register(&service, "throttle@example.com", "right").await;

        // test config allows 5 attempts
        for _ in 0..5 {
            assert!(matches!(
                service.authenticate("throttle@example.com", "wrong").await,
                Err(Error::Unauthorized)
            ));
        }

        // Even the right password is refused once the window is exhausted
        match service.authenticate("Throttle@example.com", "right").await {
            Err(Error::LimitExceeded { limit, ttl }) => {
                assert_eq!(limit, 5);
                assert!(ttl > Duration::ZERO);
            }
            other => panic!("expected LimitExceeded, got {other:?}"),
        }

        // Other emails are unaffected
        assert!(matches!(
            service.authenticate("other@example.com", "x").await,
            Err(Error::Unauthorized)
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_successful_login_resets_throttle(pool: PgPool) {
        let (service, _) = test_service(pool);
        let user = register(&service, "reset-throttle@example.com", "right").await;

        for _ in 0..4 {
            let _ = service.authenticate("reset-throttle@example.com", "wrong").await;
        }
        let authed = service.authenticate("reset-throttle@example.com", "right").await.unwrap();
        assert_eq!(authed.id, user.id);
        assert!(authed.last_login.is_some());

        assert_eq!(service.limiter().hits("login:reset-throttle@example.com").await.unwrap(), 0);
    }
}
