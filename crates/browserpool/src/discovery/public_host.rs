//! Externally reachable host resolution.
//!
//! Discovered DevTools URLs point at the loopback interface; callers need
//! the address this host is reachable on from outside. The address is
//! resolved once per process through an explicit fallback chain and cached:
//!
//! 1. configured override, if any
//! 2. cloud instance metadata service (short timeout)
//! 3. public-IP lookup service
//! 4. `localhost`

use std::time::Duration;

use log::{debug, info};
use tokio::sync::OnceCell;

const METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/public-ipv4";
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

const IP_LOOKUP_URL: &str = "https://api.ipify.org";
const IP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

const LOCAL_FALLBACK: &str = "localhost";

/// Resolves and caches the externally reachable host address.
pub struct PublicHostResolver {
    override_host: Option<String>,
    client: reqwest::Client,
    cached: OnceCell<String>,
}

impl Default for PublicHostResolver {
    fn default() -> Self {
        Self::new(None)
    }
}

impl PublicHostResolver {
    /// Create a resolver. A configured `override_host` wins over every
    /// lookup (also the way tests keep resolution offline).
    pub fn new(override_host: Option<String>) -> Self {
        Self {
            override_host,
            client: reqwest::Client::new(),
            cached: OnceCell::new(),
        }
    }

    /// The externally reachable host address, resolved on first use.
    pub async fn public_host(&self) -> String {
        self.cached
            .get_or_init(|| async { self.resolve().await })
            .await
            .clone()
    }

    async fn resolve(&self) -> String {
        if let Some(ref host) = self.override_host {
            return host.clone();
        }

        for (url, timeout) in [
            (METADATA_URL, METADATA_TIMEOUT),
            (IP_LOOKUP_URL, IP_LOOKUP_TIMEOUT),
        ] {
            match self.fetch_host(url, timeout).await {
                Some(host) => {
                    info!("resolved public host {host} via {url}");
                    return host;
                }
                None => debug!("public host lookup via {url} failed"),
            }
        }

        info!("no public host lookup succeeded, using {LOCAL_FALLBACK}");
        LOCAL_FALLBACK.to_string()
    }

    async fn fetch_host(&self, url: &str, timeout: Duration) -> Option<String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;

        let host = response.text().await.ok()?.trim().to_string();
        if host.is_empty() { None } else { Some(host) }
    }
}
