//! Client factory.

use crate::bootstrap::classify;
use crate::endpoint::Endpoint;
use config::MongodConfig;
use errors::{MongodError, Result};
use mongodb::Client;
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use std::ops::Deref;
use std::time::Duration;

/// Application name reported to the server.
pub const APP_NAME: &str = "mongod-fixture";

/// A connected driver client bound to one instance.
///
/// Dereferences to [`mongodb::Client`].
#[derive(Debug, Clone)]
pub struct ClientHandle {
    client: Client,
    endpoint: Endpoint,
    replica_set: Option<String>
}

impl ClientHandle {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn replica_set(&self) -> Option<&str> {
        self.replica_set.as_deref()
    }

    /// Connection string equivalent to this client's options.
    pub fn connection_string(&self) -> String {
        self.endpoint.connection_string(self.replica_set())
    }

    pub async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| match classify(&self.endpoint, "ping", &e) {
                MongodError::BootstrapFailed { reason, .. } => MongodError::Connectivity {
                    endpoint: self.endpoint.to_string(),
                    reason
                },
                other => other
            })?;
        Ok(())
    }
}

impl Deref for ClientHandle {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Builds clients with a bounded server-selection timeout.
#[derive(Debug, Clone)]
pub struct ClientFactory {
    server_selection_timeout: Duration,
    app_name: String
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new(Duration::from_millis(3000))
    }
}

impl ClientFactory {
    pub fn new(server_selection_timeout: Duration) -> Self {
        Self {
            server_selection_timeout,
            app_name: APP_NAME.to_string()
        }
    }

    pub fn from_config(config: &MongodConfig) -> Self {
        Self::new(config.server_selection_timeout())
    }

    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }

    /// Driver options for `endpoint`.
    ///
    /// Always a direct connection with retryable writes off. With a replica
    /// set name the client also verifies the server belongs to that set.
    pub fn options(&self, endpoint: &Endpoint, replica_set: Option<&str>) -> Result<ClientOptions> {
        let mut options = ClientOptions::default();
        options.hosts = vec![endpoint.server_address()?];
        options.direct_connection = Some(true);
        options.repl_set_name = replica_set.map(str::to_string);
        options.server_selection_timeout = Some(self.server_selection_timeout);
        options.retry_writes = Some(false);
        options.app_name = Some(self.app_name.clone());
        Ok(options)
    }

    /// Builds a client and pings the server through it.
    ///
    /// Fails with [`MongodError::Connectivity`] within roughly the selection
    /// timeout when nothing answers at `endpoint`.
    pub async fn connect(&self, endpoint: &Endpoint, replica_set: Option<&str>) -> Result<ClientHandle> {
        let options = self.options(endpoint, replica_set)?;
        let client = Client::with_options(options).map_err(|e| MongodError::Connectivity {
            endpoint: endpoint.to_string(),
            reason: e.to_string()
        })?;

        let handle = ClientHandle {
            client,
            endpoint: endpoint.clone(),
            replica_set: replica_set.map(str::to_string)
        };
        handle.ping().await?;

        tracing::debug!(endpoint = %endpoint, replica_set = ?replica_set, "Client connected");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_options_replica_set() {
        let factory = ClientFactory::default();
        let options = factory
            .options(&Endpoint::tcp("127.0.0.1", 27017), Some("rs0"))
            .unwrap();

        assert_eq!(options.repl_set_name.as_deref(), Some("rs0"));
        assert_eq!(options.direct_connection, Some(true));
        assert_eq!(options.retry_writes, Some(false));
        assert_eq!(options.server_selection_timeout, Some(Duration::from_millis(3000)));
        assert_eq!(options.app_name.as_deref(), Some(APP_NAME));
        assert_eq!(options.hosts.len(), 1);
    }

    #[test]
    fn test_options_standalone() {
        let factory = ClientFactory::new(Duration::from_millis(750));
        let options = factory
            .options(&Endpoint::tcp("127.0.0.1", 27017), None)
            .unwrap();

        assert_eq!(options.repl_set_name, None);
        assert_eq!(options.server_selection_timeout, Some(Duration::from_millis(750)));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_within_timeout() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let factory = ClientFactory::new(Duration::from_millis(500));
        let start = Instant::now();
        let err = factory
            .connect(&Endpoint::tcp("127.0.0.1", port), None)
            .await
            .unwrap_err();

        assert!(matches!(err, MongodError::Connectivity { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
