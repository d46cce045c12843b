use scrum_core::Services;
use std::time::Instant;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub started: Instant,
}

impl AppState {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            started: Instant::now(),
        }
    }
}
