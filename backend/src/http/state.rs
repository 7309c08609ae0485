//! Application state for the HTTP server.

use std::sync::Arc;

use crate::db::repository::PinningRepository;
use crate::services::PinningService;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: PinningService,
    /// Repository instance, used for health checks
    pub repository: Arc<dyn PinningRepository>,
}

impl AppState {
    pub fn new(service: PinningService, repository: Arc<dyn PinningRepository>) -> Self {
        Self {
            service,
            repository,
        }
    }
}
