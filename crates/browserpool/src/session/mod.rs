//! Session lifecycle: models, persistence and the controller.

pub mod models;
pub mod service;
pub mod store;

pub use models::{BulkSlotOutcome, CreateSessionRequest, Session, SessionRecord, SessionStatus, SlotStatus};
pub use service::{ControllerConfig, SessionController, SessionError};
pub use store::{JsonSessionStore, SessionStore, SqliteSessionStore, StoreError};
