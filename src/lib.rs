pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod storage;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::services::RateLimiter;
use crate::storage::{BlobStore, UrlSigner};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<Config>,
    pub store: Arc<dyn BlobStore>,
    pub signer: Arc<UrlSigner>,
    pub rate_limiter: Arc<RateLimiter>,
}
