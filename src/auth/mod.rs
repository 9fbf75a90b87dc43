use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use serde::Deserialize;
use std::sync::Arc;
use tower_cookies::{cookie::SameSite, Cookie, Cookies};

use crate::core::config::AppConfig;
use crate::core::session::{AdminContext, Role, SESSION_COOKIE};
use crate::core::shared::error::PqrsError;
use crate::core::shared::models::{AdminUser, NewAdminUser};
use crate::core::shared::schema::admin_users;
use crate::core::shared::state::AppState;
use crate::core::shared::utils::DbPool;
use crate::core::urls::ApiUrls;
use crate::security::password::{hash_password, verify_password};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

fn authenticate(
    conn: &mut PgConnection,
    username: &str,
    password: &str,
) -> Result<AdminUser, PqrsError> {
    let invalid = || PqrsError::Unauthorized("Invalid username or password".to_string());

    let user = admin_users::table
        .filter(admin_users::username.eq(username))
        .filter(admin_users::active.eq(true))
        .select(AdminUser::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(invalid)?;

    if !verify_password(password, &user.password_hash) {
        return Err(invalid());
    }
    Ok(user)
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AdminContext>, PqrsError> {
    let username = req.username.trim().to_string();
    if username.is_empty() || req.password.is_empty() {
        return Err(PqrsError::validation("Username and password are required"));
    }

    let conn = state.conn.clone();
    let lookup = username.clone();
    let user = tokio::task::spawn_blocking(move || {
        let mut db_conn = conn.get()?;
        authenticate(&mut db_conn, &lookup, &req.password)
    })
    .await?
    .map_err(|e| {
        warn!("Failed login for {username}");
        e
    })?;

    let role: Role = user
        .role
        .parse()
        .map_err(|e: String| PqrsError::Internal(e))?;

    let token = state
        .sessions
        .create(user.id, &user.username, role, user.city_id)
        .await;
    let context = state
        .sessions
        .get(&token)
        .await
        .ok_or_else(|| PqrsError::Internal("Session was not stored".to_string()))?;
    cookies.add(session_cookie(token));

    info!("{} logged in as {role}", user.username);
    Ok(Json(context))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
) -> Json<serde_json::Value> {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value()).await;
    }
    cookies.remove(session_cookie(String::new()));
    Json(serde_json::json!({ "success": true }))
}

pub async fn session_info(ctx: AdminContext) -> Json<AdminContext> {
    Json(ctx)
}

/// Creates the first administrator from the environment when none exists.
pub fn ensure_bootstrap_admin(pool: &DbPool, config: &AppConfig) -> Result<bool, PqrsError> {
    let Some((username, password)) = &config.bootstrap_admin else {
        return Ok(false);
    };

    let mut conn = pool.get()?;
    let admins: i64 = admin_users::table
        .filter(admin_users::role.eq(Role::Admin.as_str()))
        .count()
        .get_result(&mut conn)?;
    if admins > 0 {
        return Ok(false);
    }

    let new_admin = NewAdminUser {
        username: username.clone(),
        password_hash: hash_password(password)?,
        role: Role::Admin.as_str().to_string(),
        city_id: None,
        active: true,
        created_at: Utc::now(),
    };
    diesel::insert_into(admin_users::table)
        .values(&new_admin)
        .execute(&mut conn)?;

    info!("Created bootstrap administrator {username}");
    Ok(true)
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route(ApiUrls::AUTH_LOGIN, post(login))
        .route(ApiUrls::AUTH_LOGOUT, post(logout))
        .route(ApiUrls::AUTH_SESSION, get(session_info))
}
