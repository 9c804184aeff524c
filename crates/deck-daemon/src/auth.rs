//! Bearer-token identity for API requests.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::collections::HashMap;
use tracing::warn;

use deck_proto::config::UserConfig;

use crate::http::{ApiError, AppState};
use crate::store::UserRecord;

pub const APP_ACCESS: &str = "app:access";
pub const MUSICS_PLAY: &str = "musics:play";
pub const MUSICS_DOWNLOAD: &str = "musics:download";
pub const ADMIN_RESTORE: &str = "admin:restore";

pub struct Authenticator {
    by_token: HashMap<String, UserConfig>,
}

impl Authenticator {
    pub fn new(users: &[UserConfig]) -> Self {
        let mut by_token = HashMap::new();
        for user in users {
            if user.token.is_empty() {
                warn!(user = %user.id, "User has no token configured, skipping");
                continue;
            }
            by_token.insert(user.token.clone(), user.clone());
        }
        Self { by_token }
    }

    /// Resolve an `Authorization: Bearer <token>` header value.
    pub fn resolve(&self, authorization: Option<&str>) -> Option<&UserConfig> {
        let token = authorization?.strip_prefix("Bearer ")?.trim();
        self.by_token.get(token)
    }

    pub fn find_by_email(&self, email: &str) -> Option<&UserConfig> {
        self.by_token
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub record: UserRecord,
    permissions: Vec<String>,
}

impl CurrentUser {
    pub fn can(&self, accreditation: &str) -> bool {
        self.permissions.iter().any(|p| p == accreditation)
    }

    pub fn require(&self, accreditation: &str) -> Result<(), ApiError> {
        if self.can(accreditation) {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let config = state.auth.resolve(header).ok_or(ApiError::Unauthenticated)?;

        let user = CurrentUser {
            record: UserRecord {
                id: config.id.clone(),
                email: config.email.clone(),
                name: config.name.clone(),
                favourites: String::new(),
            },
            permissions: config.permissions.clone(),
        };
        if !user.can(APP_ACCESS) {
            return Err(ApiError::Unauthenticated);
        }

        let record = state
            .store
            .ensure_user(&config.id, &config.email, &config.name)
            .await?;
        Ok(CurrentUser { record, ..user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(token: &str, permissions: &[&str]) -> UserConfig {
        UserConfig {
            id: format!("id-{token}"),
            email: format!("{token}@example.com"),
            name: String::new(),
            token: token.to_string(),
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_resolve_bearer_token() {
        let auth = Authenticator::new(&[user("secret", &[APP_ACCESS]), user("", &[APP_ACCESS])]);
        assert_eq!(
            auth.resolve(Some("Bearer secret")).map(|u| u.id.as_str()),
            Some("id-secret")
        );
        assert!(auth.resolve(Some("Bearer nope")).is_none());
        assert!(auth.resolve(Some("secret")).is_none());
        assert!(auth.resolve(Some("Bearer ")).is_none());
        assert!(auth.resolve(None).is_none());
        assert_eq!(
            auth.find_by_email("SECRET@example.com").map(|u| u.id.as_str()),
            Some("id-secret")
        );
        assert!(auth.find_by_email("@example.com").is_none());
    }

    #[test]
    fn test_permissions() {
        let current = CurrentUser {
            record: UserRecord {
                id: "u".into(),
                email: "e".into(),
                name: "n".into(),
                favourites: "f".into(),
            },
            permissions: vec![APP_ACCESS.into(), MUSICS_PLAY.into()],
        };
        assert!(current.require(MUSICS_PLAY).is_ok());
        assert!(matches!(current.require(MUSICS_DOWNLOAD), Err(ApiError::Forbidden)));
    }
}
