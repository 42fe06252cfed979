//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::server::Server;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub server: Arc<Server>,
}

impl AppState {
    pub fn new(config: Config, server: Arc<Server>) -> Self {
        Self {
            config: Arc::new(config),
            server,
        }
    }
}
