// Library exports for binaries and tests
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use sqlx::PgPool;

use config::Config;
use services::{email::EmailService, notifications::NotificationService, storage::FileStorage};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: redis::Client,
    pub config: Arc<Config>,
    pub email: Option<Arc<EmailService>>,
    pub notifications: Arc<NotificationService>,
    pub storage: Arc<FileStorage>,
}

impl AppState {
    pub fn new(db: PgPool, redis: redis::Client, config: Arc<Config>) -> Self {
        let email = EmailService::new(&config).map(Arc::new);
        let notifications = Arc::new(NotificationService::new(email.clone(), config.clone()));
        let storage = Arc::new(FileStorage::new(&config));
        Self {
            db,
            redis,
            config,
            email,
            notifications,
            storage,
        }
    }
}
