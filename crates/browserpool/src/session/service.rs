//! Session lifecycle controller.
//!
//! The controller owns every live session and is the only writer of session
//! state. Admission (capacity, duplicate id, port reservation) happens under
//! one lock so concurrent creates cannot both pass the capacity check or
//! grab the same port; container start, readiness polling and endpoint
//! discovery run outside the lock. Externally visible state is
//! all-or-nothing: a record is persisted only after the container is running,
//! and every failure path deregisters the slot, tears the container down and
//! releases the port.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::container::{ContainerConfig, ContainerRuntimeApi};
use crate::discovery::EndpointDiscoverer;
use crate::ports::PortPool;

use super::models::{BulkSlotOutcome, Session, SessionRecord, SlotStatus};
use super::store::{SessionStore, StoreError};

/// Controller-level configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Hard cap on concurrently live sessions.
    pub max_sessions: usize,
    /// Image each sandbox container runs.
    pub image: String,
    /// Container name prefix; the session id is appended.
    pub container_name_prefix: String,
    /// Port the browser exposes inside the container.
    pub container_port: u16,
    /// Overall deadline for a container to reach running state.
    pub start_timeout: Duration,
    /// Interval between container state polls.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 20,
            image: "chromium-cdp".to_string(),
            container_name_prefix: "browser-".to_string(),
            container_port: 9222,
            start_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session capacity of {0} reached")]
    CapacityExceeded(usize),

    #[error("session '{0}' already exists")]
    DuplicateId(String),

    #[error("invalid session id: {0}")]
    InvalidId(String),

    #[error("no ports available in the configured range")]
    PortExhausted,

    #[error("session failed to start: {0}")]
    StartFailure(String),

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a session's host port is chosen during admission.
enum PortChoice {
    /// Uniform random pick from the pool.
    Random,
    /// Claim one named port (bulk-create path).
    Exact(u16),
}

/// Owns live sessions and drives their lifecycle.
pub struct SessionController {
    runtime: Arc<dyn ContainerRuntimeApi>,
    store: Arc<dyn SessionStore>,
    ports: Arc<PortPool>,
    discoverer: Arc<EndpointDiscoverer>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    config: ControllerConfig,
    started_at: Instant,
}

impl SessionController {
    pub fn new(
        runtime: Arc<dyn ContainerRuntimeApi>,
        store: Arc<dyn SessionStore>,
        ports: Arc<PortPool>,
        discoverer: Arc<EndpointDiscoverer>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            ports,
            discoverer,
            sessions: Mutex::new(HashMap::new()),
            config,
            started_at: Instant::now(),
        }
    }

    /// Create one session and wait for it to become active.
    ///
    /// Runs in a spawned task: a caller that disconnects mid-create cannot
    /// abandon a half-built session.
    pub async fn create(
        self: &Arc<Self>,
        requested_id: Option<String>,
    ) -> Result<SessionRecord, SessionError> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.create_inner(requested_id, PortChoice::Random).await })
            .await
            .map_err(|err| SessionError::StartFailure(format!("creation task failed: {err}")))?
    }

    async fn create_inner(
        &self,
        requested_id: Option<String>,
        choice: PortChoice,
    ) -> Result<SessionRecord, SessionError> {
        let session = self.admit(requested_id, choice).await?;

        match self.start_session(&session).await {
            Ok(record) => Ok(record),
            Err(err) => {
                self.sessions.lock().await.remove(session.id());
                session.mark_error();
                session.close().await;
                Err(err)
            }
        }
    }

    /// Admission: capacity, duplicate id and port reservation as one atomic
    /// unit. The session is registered in `Starting` state so a concurrent
    /// create sees the slot as taken.
    async fn admit(
        &self,
        requested_id: Option<String>,
        choice: PortChoice,
    ) -> Result<Arc<Session>, SessionError> {
        let id = match requested_id {
            Some(id) => {
                validate_session_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.lock().await;

        if sessions.len() >= self.config.max_sessions {
            return Err(SessionError::CapacityExceeded(self.config.max_sessions));
        }
        if sessions.contains_key(&id) {
            return Err(SessionError::DuplicateId(id));
        }

        let port = match choice {
            PortChoice::Random => self
                .ports
                .reserve()
                .await
                .ok_or(SessionError::PortExhausted)?,
            PortChoice::Exact(port) => {
                if !self.ports.reserve_exact(port).await {
                    return Err(SessionError::PortExhausted);
                }
                port
            }
        };

        let session = Arc::new(Session::new(
            id.clone(),
            port,
            Arc::clone(&self.runtime),
            Arc::clone(&self.ports),
        ));
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    /// Start the container behind an admitted session, wait for it to run,
    /// discover its endpoint and persist the record.
    async fn start_session(&self, session: &Session) -> Result<SessionRecord, SessionError> {
        let name = format!("{}{}", self.config.container_name_prefix, session.id());
        let config = ContainerConfig::new(self.config.image.clone())
            .name(name)
            .env("DISPLAY", ":99")
            .port(session.port(), self.config.container_port);

        let container_id = self
            .runtime
            .create_container(&config)
            .await
            .map_err(|err| SessionError::StartFailure(err.to_string()))?;
        session.set_container_id(container_id.clone());

        self.wait_for_running(&container_id).await?;

        let endpoint = self
            .discoverer
            .discover(self.runtime.as_ref(), &container_id, session.port())
            .await;
        if endpoint.is_none() {
            warn!(
                "no endpoint discovered for session {}, exposing port {} only",
                session.id(),
                session.port()
            );
        }
        session.activate(endpoint);

        let record = session.record();
        self.store.create(&record).await?;

        info!(
            "session {} active on port {} (container {container_id})",
            session.id(),
            session.port()
        );
        Ok(record)
    }

    /// Poll container state until it is running, with a bounded deadline.
    /// A container that exits or disappears fails fast.
    async fn wait_for_running(&self, container_id: &str) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.config.start_timeout;

        loop {
            match self.runtime.container_state_status(container_id).await {
                Ok(Some(status)) => match status.as_str() {
                    "running" => return Ok(()),
                    "exited" | "dead" => {
                        return Err(SessionError::StartFailure(format!(
                            "container {container_id} is {status}"
                        )));
                    }
                    _ => {}
                },
                Ok(None) => {
                    return Err(SessionError::StartFailure(format!(
                        "container {container_id} disappeared during startup"
                    )));
                }
                Err(err) => return Err(SessionError::StartFailure(err.to_string())),
            }

            if Instant::now() >= deadline {
                return Err(SessionError::StartFailure(format!(
                    "container {container_id} not running after {:?}",
                    self.config.start_timeout
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Release one session: tear the container down, deregister, delete the
    /// record. Returns false when the id is unknown; a second concurrent
    /// caller for the same id gets false.
    ///
    /// The registry entry stays in place until teardown finishes, so a
    /// concurrent create for the same id is rejected as a duplicate instead
    /// of racing the old container's name.
    pub async fn release(&self, id: &str) -> Result<bool, SessionError> {
        let session = self.sessions.lock().await.get(id).cloned();
        let Some(session) = session else {
            return Ok(false);
        };
        if !session.claim_close() {
            return Ok(false);
        }

        session.close().await;
        self.sessions.lock().await.remove(id);
        self.store.delete(id).await?;
        info!("session {id} released");
        Ok(true)
    }

    /// Fetch one persisted session record.
    pub async fn get(&self, id: &str) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.store.get(id).await?)
    }

    /// List all persisted session records, newest first.
    pub async fn list(&self) -> Result<Vec<SessionRecord>, SessionError> {
        Ok(self.store.list_all().await?)
    }

    /// Create up to `count` sessions over the fixed block at the start of
    /// the port range, one slot per port. Slots are independent: a failed
    /// slot is reported but does not roll back the others.
    pub async fn bulk_create(
        self: &Arc<Self>,
        count: usize,
    ) -> Result<Vec<BulkSlotOutcome>, SessionError> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.bulk_create_inner(count).await })
            .await
            .map_err(|err| SessionError::StartFailure(format!("bulk task failed: {err}")))
    }

    async fn bulk_create_inner(&self, count: usize) -> Vec<BulkSlotOutcome> {
        let port_start = *self.ports.range().start();
        let mut outcomes = Vec::with_capacity(count);

        for slot in 0..count {
            let port = match u16::try_from(slot)
                .ok()
                .and_then(|offset| port_start.checked_add(offset))
            {
                Some(port) => port,
                None => {
                    warn!("bulk slot {} exceeds the valid port space", slot + 1);
                    outcomes.push(BulkSlotOutcome {
                        slot: slot + 1,
                        port: u16::MAX,
                        session_id: None,
                        endpoint: None,
                        status: SlotStatus::Failed,
                        error: Some(SessionError::PortExhausted.to_string()),
                    });
                    continue;
                }
            };
            let outcome = match self.create_inner(None, PortChoice::Exact(port)).await {
                Ok(record) => BulkSlotOutcome {
                    slot: slot + 1,
                    port,
                    session_id: Some(record.id),
                    endpoint: record.endpoint,
                    status: SlotStatus::Created,
                    error: None,
                },
                Err(err) => {
                    warn!("bulk slot {} on port {port} failed: {err}", slot + 1);
                    BulkSlotOutcome {
                        slot: slot + 1,
                        port,
                        session_id: None,
                        endpoint: None,
                        status: SlotStatus::Failed,
                        error: Some(err.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Close every registered session. Persisted records are left in place;
    /// deletion is caller-driven only. Returns the number of sessions
    /// closed.
    pub async fn cleanup_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        let count = drained.len();
        futures::future::join_all(drained.iter().map(|session| session.close())).await;

        if count > 0 {
            info!("cleaned up {count} sessions");
        }
        count
    }

    /// Attach a video preview link to an existing session record.
    pub async fn set_preview_link(&self, id: &str, url: &str) -> Result<(), SessionError> {
        if self.store.get(id).await?.is_none() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        self.store.update_preview_link(id, url).await?;
        Ok(())
    }

    /// Number of currently registered (live) sessions.
    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Number of ports currently available in the pool.
    pub async fn available_port_count(&self) -> usize {
        self.ports.available_count().await
    }

    /// Seconds this controller has been running.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Configured session cap.
    pub fn max_sessions(&self) -> usize {
        self.config.max_sessions
    }
}

/// Session ids end up in container names and file names; keep them to a
/// conservative alphabet.
fn validate_session_id(id: &str) -> Result<(), SessionError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidId(id.to_string()))
    }
}
