//! Session data models.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tokio::sync::OnceCell;

use crate::container::ContainerRuntimeApi;
use crate::ports::PortPool;

/// Grace timeout (seconds) given to a container on stop before it is killed.
const STOP_TIMEOUT_SECONDS: u32 = 5;

/// Session status state machine.
///
/// `Starting → Active` (container running, endpoint discovered or absent),
/// `Starting → Error` (container never reached running state), and `Closed`
/// terminal from either. No transition leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Container is starting.
    Starting,
    /// Container is running; the endpoint may still be absent.
    Active,
    /// Container failed to reach running state.
    Error,
    /// Session has been torn down. Terminal.
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Error => write!(f, "error"),
            SessionStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "starting" => Ok(SessionStatus::Starting),
            "active" => Ok(SessionStatus::Active),
            "error" => Ok(SessionStatus::Error),
            "closed" => Ok(SessionStatus::Closed),
            _ => Err(format!("unknown session status: {s}")),
        }
    }
}

// Conversion from String for sqlx row decoding.
impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Persisted projection of a session, also the wire shape.
///
/// `uptime_seconds` is derived from `created_at` at read time, never stored.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    pub id: String,
    pub port: i64,
    pub endpoint: Option<String>,
    /// RFC 3339 timestamp.
    pub created_at: String,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    #[sqlx(skip)]
    pub uptime_seconds: i64,
    pub video_preview_link: Option<String>,
}

impl SessionRecord {
    /// Recompute `uptime_seconds` from `created_at`.
    pub fn refresh_uptime(&mut self) {
        self.uptime_seconds = uptime_from(&self.created_at);
    }
}

/// Seconds elapsed since an RFC 3339 timestamp; zero when unparseable or in
/// the future.
pub fn uptime_from(created_at: &str) -> i64 {
    DateTime::parse_from_rfc3339(created_at)
        .map(|t| (Utc::now() - t.with_timezone(&Utc)).num_seconds().max(0))
        .unwrap_or(0)
}

/// One in-memory browser session: a reserved port, the container backing it
/// and the discovered endpoint.
///
/// The session controller exclusively owns instances and drives all status
/// transitions; the container process itself is owned by the external
/// runtime and only referenced here.
pub struct Session {
    id: String,
    port: u16,
    created_at: DateTime<Utc>,
    container_id: OnceLock<String>,
    state: Mutex<SessionState>,
    releasing: AtomicBool,
    closed: OnceCell<()>,
    runtime: Arc<dyn ContainerRuntimeApi>,
    ports: Arc<PortPool>,
}

struct SessionState {
    status: SessionStatus,
    endpoint: Option<String>,
}

impl Session {
    pub fn new(id: String, port: u16, runtime: Arc<dyn ContainerRuntimeApi>, ports: Arc<PortPool>) -> Self {
        Self {
            id,
            port,
            created_at: Utc::now(),
            container_id: OnceLock::new(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Starting,
                endpoint: None,
            }),
            releasing: AtomicBool::new(false),
            closed: OnceCell::new(),
            runtime,
            ports,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn status(&self) -> SessionStatus {
        self.lock_state().status
    }

    pub fn endpoint(&self) -> Option<String> {
        self.lock_state().endpoint.clone()
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.get().map(String::as_str)
    }

    /// Seconds since this session was created.
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds().max(0)
    }

    /// Record the container backing this session. Set exactly once.
    pub fn set_container_id(&self, container_id: String) {
        if self.container_id.set(container_id).is_err() {
            warn!("container id for session {} set twice", self.id);
        }
    }

    /// Transition `Starting → Active`, with or without an endpoint.
    pub fn activate(&self, endpoint: Option<String>) {
        let mut state = self.lock_state();
        if state.status == SessionStatus::Starting {
            state.status = SessionStatus::Active;
            state.endpoint = endpoint;
        }
    }

    /// Transition `Starting → Error`.
    pub fn mark_error(&self) {
        let mut state = self.lock_state();
        if state.status == SessionStatus::Starting {
            state.status = SessionStatus::Error;
        }
    }

    /// Claim this session for release. Exactly one caller wins; losers
    /// treat the session as already gone.
    pub fn claim_close(&self) -> bool {
        !self.releasing.swap(true, Ordering::SeqCst)
    }

    /// Snapshot this session as a persistable record.
    pub fn record(&self) -> SessionRecord {
        let state = self.lock_state();
        SessionRecord {
            id: self.id.clone(),
            port: i64::from(self.port),
            endpoint: state.endpoint.clone(),
            created_at: self.created_at.to_rfc3339(),
            status: state.status,
            uptime_seconds: self.uptime_seconds(),
            video_preview_link: None,
        }
    }

    /// Tear this session down: stop and remove the container, release the
    /// port, transition to `Closed`.
    ///
    /// Idempotent and safe under concurrent calls; the effects run at most
    /// once, later callers just wait for the first to finish. Teardown is
    /// best-effort: runtime errors are logged, the port is always released.
    pub async fn close(&self) {
        self.closed
            .get_or_init(|| async {
                if let Some(container_id) = self.container_id.get() {
                    if let Err(err) = self
                        .runtime
                        .stop_container(container_id, Some(STOP_TIMEOUT_SECONDS))
                        .await
                    {
                        warn!("stopping container {container_id} for session {}: {err}", self.id);
                    }
                    if let Err(err) = self.runtime.remove_container(container_id, true).await {
                        warn!("removing container {container_id} for session {}: {err}", self.id);
                    }
                }

                self.ports.release(self.port).await;
                self.lock_state().status = SessionStatus::Closed;
            })
            .await;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        // Status/endpoint accessors never panic while holding the lock.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Request body for creating a session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Caller-supplied session id; generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Outcome of one slot of a bulk-create call.
#[derive(Debug, Clone, Serialize)]
pub struct BulkSlotOutcome {
    /// 1-based slot number inside the block.
    pub slot: usize,
    /// Host port pre-declared for this slot.
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-slot status of a bulk create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Created,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Starting,
            SessionStatus::Active,
            SessionStatus::Error,
            SessionStatus::Closed,
        ] {
            assert_eq!(status.to_string().parse::<SessionStatus>(), Ok(status));
        }
        assert!("bogus".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn uptime_is_non_negative_and_tolerates_garbage() {
        let now = Utc::now().to_rfc3339();
        assert!(uptime_from(&now) >= 0);

        let future = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        assert_eq!(uptime_from(&future), 0);

        assert_eq!(uptime_from("not-a-timestamp"), 0);
    }
}
