use std::sync::Arc;

use crate::core::config::AppConfig;
use crate::core::session::SessionStore;
use crate::core::shared::utils::DbPool;
use crate::email::Notifier;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub sessions: SessionStore,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    pub fn new(conn: DbPool, config: AppConfig, notifier: Arc<Notifier>) -> Self {
        let sessions = SessionStore::new(chrono::Duration::hours(config.session_ttl_hours));
        Self {
            conn,
            config,
            sessions,
            notifier,
        }
    }
}
