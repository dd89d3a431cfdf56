//! Application state shared across handlers.

use std::sync::Arc;

use crate::session::SessionController;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session controller owning every live sandbox.
    pub controller: Arc<SessionController>,
}

impl AppState {
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }
}
