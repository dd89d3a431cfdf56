//! Debugging-endpoint discovery for started browser containers.
//!
//! A freshly started sandbox exposes the Chrome DevTools Protocol on its
//! reserved host port, but the full WebSocket URL (which embeds a browser
//! id) has to be discovered. Discovery runs an ordered list of strategies,
//! each bounded by its own timeout, and short-circuits on the first hit:
//!
//! - `Logs`: scan the container log stream for one of several accepted
//!   DevTools line shapes.
//! - `Http`: query the browser's own discovery endpoint
//!   (`http://127.0.0.1:<port>/json`) for the first debuggable target.
//!
//! Exhausting all strategies yields `None` rather than an error: a session
//! without a resolved endpoint is still usable through the raw port.

use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::container::ContainerRuntimeApi;

mod public_host;

pub use public_host::PublicHostResolver;

/// Accepted log-line shapes for the browser id. Browsers and wrapper
/// scripts differ in how much of the DevTools URL they print.
static BROWSER_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"ws://[^\s]*?/devtools/browser/([a-z0-9\-]+)",
        r"/devtools/browser/([a-z0-9\-]+)",
        r"browser/([a-z0-9\-]+)",
        r"Browser ID: ([a-z0-9\-]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static pattern compiles"))
    .collect()
});

/// One discovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStrategy {
    /// Parse the container log stream.
    Logs,
    /// Query the browser's HTTP discovery endpoint on the reserved port.
    Http,
}

/// Discovery configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Grace interval before the first attempt, giving the browser process
    /// time to write its startup banner.
    pub grace: Duration,
    /// Per-strategy timeout.
    pub strategy_timeout: Duration,
    /// Strategy order. Logs first avoids a network round trip when the
    /// browser id is already in the log stream.
    pub order: Vec<DiscoveryStrategy>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(3),
            strategy_timeout: Duration::from_secs(10),
            order: vec![DiscoveryStrategy::Logs, DiscoveryStrategy::Http],
        }
    }
}

/// Discovers the externally reachable debugging URL of a container.
pub struct EndpointDiscoverer {
    client: reqwest::Client,
    resolver: PublicHostResolver,
    config: DiscoveryConfig,
}

impl EndpointDiscoverer {
    pub fn new(config: DiscoveryConfig, resolver: PublicHostResolver) -> Self {
        Self {
            client: reqwest::Client::new(),
            resolver,
            config,
        }
    }

    /// Discover the debugging endpoint for a started container.
    ///
    /// Returns `None` when every strategy comes up empty or times out;
    /// callers treat that as "endpoint absent", not as a failure.
    pub async fn discover(
        &self,
        runtime: &dyn ContainerRuntimeApi,
        container_id: &str,
        port: u16,
    ) -> Option<String> {
        tokio::time::sleep(self.config.grace).await;

        for strategy in &self.config.order {
            let attempt = match strategy {
                DiscoveryStrategy::Logs => {
                    tokio::time::timeout(
                        self.config.strategy_timeout,
                        self.from_logs(runtime, container_id, port),
                    )
                    .await
                }
                DiscoveryStrategy::Http => {
                    tokio::time::timeout(self.config.strategy_timeout, self.from_http(port)).await
                }
            };

            match attempt {
                Ok(Some(url)) => {
                    debug!("discovered endpoint for container {container_id} via {strategy:?}");
                    return Some(url);
                }
                Ok(None) => {
                    debug!("strategy {strategy:?} found no endpoint for container {container_id}")
                }
                Err(_) => warn!(
                    "strategy {strategy:?} timed out after {:?} for container {container_id}",
                    self.config.strategy_timeout
                ),
            }
        }

        None
    }

    /// Scan container logs for a recognizable browser id and assemble the
    /// DevTools URL from it.
    async fn from_logs(
        &self,
        runtime: &dyn ContainerRuntimeApi,
        container_id: &str,
        port: u16,
    ) -> Option<String> {
        let logs = match runtime.get_logs(container_id, None).await {
            Ok(logs) => logs,
            Err(err) => {
                warn!("fetching logs for container {container_id} failed: {err}");
                return None;
            }
        };

        let browser_id = extract_browser_id(&logs)?;
        let host = self.resolver.public_host().await;
        Some(format!("ws://{host}:{port}/devtools/browser/{browser_id}"))
    }

    /// Ask the browser's own discovery endpoint for debuggable targets and
    /// take the WebSocket URL of the first one.
    async fn from_http(&self, port: u16) -> Option<String> {
        let url = format!("http://127.0.0.1:{port}/json");
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("discovery endpoint {url} returned {}", response.status());
                return None;
            }
            Err(err) => {
                debug!("discovery endpoint {url} unreachable: {err}");
                return None;
            }
        };

        let targets: Vec<serde_json::Value> = match response.json().await {
            Ok(targets) => targets,
            Err(err) => {
                warn!("discovery endpoint {url} returned malformed JSON: {err}");
                return None;
            }
        };

        let ws_url = targets
            .first()?
            .get("webSocketDebuggerUrl")?
            .as_str()?
            .to_string();

        let host = self.resolver.public_host().await;
        Some(rewrite_loopback_host(&ws_url, &host))
    }
}

/// Extract a browser id from a container log stream, trying each accepted
/// pattern in order.
pub fn extract_browser_id(logs: &str) -> Option<&str> {
    for pattern in BROWSER_ID_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(logs) {
            if let Some(m) = captures.get(1) {
                return Some(m.as_str());
            }
        }
    }
    None
}

/// Rewrite a host-local address in a URL to the externally reachable host.
pub fn rewrite_loopback_host(url: &str, host: &str) -> String {
    url.replace("127.0.0.1", host).replace("localhost", host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_full_devtools_url() {
        let logs = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/0b4f9a13-9f8e-4f0a-b8a1-2c1de1a2b3c4\n";
        assert_eq!(
            extract_browser_id(logs),
            Some("0b4f9a13-9f8e-4f0a-b8a1-2c1de1a2b3c4")
        );
    }

    #[test]
    fn extracts_id_from_alternate_log_shapes() {
        assert_eq!(
            extract_browser_id("path is /devtools/browser/abc-123"),
            Some("abc-123")
        );
        assert_eq!(extract_browser_id("browser/deadbeef"), Some("deadbeef"));
        assert_eq!(extract_browser_id("Browser ID: 42aa-bb"), Some("42aa-bb"));
    }

    #[test]
    fn no_id_in_unrelated_logs() {
        assert_eq!(extract_browser_id("starting xvfb on :99\nready\n"), None);
    }

    #[test]
    fn rewrites_loopback_hosts() {
        assert_eq!(
            rewrite_loopback_host("ws://127.0.0.1:9100/devtools/browser/x", "203.0.113.7"),
            "ws://203.0.113.7:9100/devtools/browser/x"
        );
        assert_eq!(
            rewrite_loopback_host("ws://localhost:9100/x", "example.org"),
            "ws://example.org:9100/x"
        );
    }
}
