//! HTTP surface over the session controller.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::build_router;
pub use state::AppState;
