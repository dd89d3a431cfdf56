//! Test utilities and common setup.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use browserpool::api::{self, AppState};
use browserpool::container::ContainerRuntime;
use browserpool::discovery::{
    DiscoveryConfig, DiscoveryStrategy, EndpointDiscoverer, PublicHostResolver,
};
use browserpool::ports::PortPool;
use browserpool::session::{ControllerConfig, SessionController, SqliteSessionStore};

/// Create a test application with all collaborators initialized.
///
/// The container runtime is real but never exercised: these tests only hit
/// endpoints that do not start containers.
pub async fn test_app() -> Router {
    let store = SqliteSessionStore::in_memory().await.unwrap();
    let runtime = Arc::new(ContainerRuntime::new());
    let ports = Arc::new(PortPool::new(49500, 49509));

    let discovery = DiscoveryConfig {
        grace: Duration::ZERO,
        strategy_timeout: Duration::from_millis(100),
        order: vec![DiscoveryStrategy::Logs],
    };
    let discoverer = Arc::new(EndpointDiscoverer::new(
        discovery,
        PublicHostResolver::new(Some("localhost".to_string())),
    ));

    let controller = Arc::new(SessionController::new(
        runtime,
        Arc::new(store),
        ports,
        discoverer,
        ControllerConfig {
            max_sessions: 2,
            ..ControllerConfig::default()
        },
    ));

    api::build_router(AppState::new(controller))
}
