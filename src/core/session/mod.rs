use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    RequestPartsExt,
};
use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::core::shared::error::PqrsError;
use crate::core::shared::state::AppState;

pub const SESSION_COOKIE: &str = "pqrs_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access to tickets and insurers.
    Admin,
    /// Read-only access restricted to one city.
    CityConsultant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::CityConsultant => "city_consultant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "city_consultant" | "consultor_ciudad" => Ok(Self::CityConsultant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Who is making an admin request and what they may see.
#[derive(Debug, Clone, Serialize)]
pub struct AdminContext {
    pub user_id: i32,
    pub username: String,
    pub role: Role,
    pub city_id: Option<i32>,
    #[serde(skip)]
    pub expires_at: DateTime<Utc>,
}

impl AdminContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), PqrsError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(PqrsError::Forbidden(
                "This action requires an administrator".to_string(),
            ))
        }
    }

    /// City filter applied to every ticket query; `None` means unrestricted.
    pub fn city_scope(&self) -> Option<i32> {
        match self.role {
            Role::Admin => None,
            Role::CityConsultant => Some(self.city_id.unwrap_or(-1)),
        }
    }

    pub fn can_see_city(&self, city_id: i32) -> bool {
        self.city_scope().map_or(true, |scope| scope == city_id)
    }
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, AdminContext>>>,
    ttl: Duration,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Opens a session and returns its opaque token.
    pub async fn create(
        &self,
        user_id: i32,
        username: &str,
        role: Role,
        city_id: Option<i32>,
    ) -> String {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let context = AdminContext {
            user_id,
            username: username.to_string(),
            role,
            city_id,
            expires_at: Utc::now() + self.ttl,
        };
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, ctx| ctx.expires_at > Utc::now());
        sessions.insert(token.clone(), context);
        debug!("Opened {role} session for {username}");
        token
    }

    pub async fn get(&self, token: &str) -> Option<AdminContext> {
        let sessions = self.sessions.read().await;
        sessions
            .get(token)
            .filter(|ctx| ctx.expires_at > Utc::now())
            .cloned()
    }

    pub async fn remove(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminContext {
    type Rejection = PqrsError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let cookies = parts
            .extract::<Cookies>()
            .await
            .map_err(|_| PqrsError::Unauthorized("Not authorized".to_string()))?;

        let token = cookies
            .get(SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or_else(|| PqrsError::Unauthorized("Not authorized".to_string()))?;

        let context = state
            .sessions
            .get(&token)
            .await
            .ok_or_else(|| PqrsError::Unauthorized("Session expired".to_string()))?;

        trace!("Request by {} ({})", context.username, context.role);
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = SessionStore::new(Duration::hours(1));
        let token = store.create(7, "auditor", Role::Admin, None).await;

        let ctx = store.get(&token).await.expect("session should exist");
        assert_eq!(ctx.user_id, 7);
        assert!(ctx.is_admin());
        assert!(ctx.require_admin().is_ok());

        assert!(store.remove(&token).await);
        assert!(store.get(&token).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_rejected() {
        let store = SessionStore::new(Duration::seconds(-1));
        let token = store.create(1, "old", Role::Admin, None).await;
        assert!(store.get(&token).await.is_none());
    }

    #[tokio::test]
    async fn test_consultant_is_scoped_and_read_only() {
        let store = SessionStore::new(Duration::hours(1));
        let token = store
            .create(3, "cali", Role::CityConsultant, Some(12))
            .await;
        let ctx = store.get(&token).await.unwrap();

        assert_eq!(ctx.city_scope(), Some(12));
        assert!(ctx.can_see_city(12));
        assert!(!ctx.can_see_city(13));
        assert!(matches!(ctx.require_admin(), Err(PqrsError::Forbidden(_))));
    }

    #[test]
    fn test_consultant_without_city_sees_nothing() {
        let ctx = AdminContext {
            user_id: 1,
            username: "x".into(),
            role: Role::CityConsultant,
            city_id: None,
            expires_at: Utc::now(),
        };
        assert_eq!(ctx.city_scope(), Some(-1));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("consultor_ciudad".parse::<Role>(), Ok(Role::CityConsultant));
        assert_eq!("admin".parse::<Role>(), Ok(Role::Admin));
        assert!("root".parse::<Role>().is_err());
    }
}
