//! Test server harness for E2E testing
//!
//! Provides `TestRelayServer` for spawning real relay instances in tests.

use metrics_exporter_prometheus::PrometheusBuilder;
use relay_service::actors::ActorMetrics;
use relay_service::config::Config;
use relay_service::observability::HealthState;
use relay_service::routes::{self, AppState};
use relay_service::service::RelayService;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning a Session Relay in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestRelayServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRelayServer {
    addr: SocketAddr,
    service: Arc<RelayService>,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestRelayServer {
    /// Spawn a relay with default test configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(Self::test_config()?).await
    }

    /// Default test configuration (fixed relay id, default rate and interval).
    pub fn test_config() -> Result<Config, anyhow::Error> {
        let vars = HashMap::from([
            ("RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("RELAY_ID".to_string(), "relay-test".to_string()),
        ]);
        Config::from_vars(&vars).map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))
    }

    /// Spawn a relay with the given configuration.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    /// - Report ready
    pub async fn spawn_with(config: Config) -> Result<Self, anyhow::Error> {
        let service = Arc::new(RelayService::init(&config, ActorMetrics::new()));
        let health = Arc::new(HealthState::new());
        health.set_ready();

        let state = Arc::new(AppState {
            service: Arc::clone(&service),
            health,
        });

        // Recorder is not installed globally; tests only need a render handle
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            service,
            config,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the WebSocket signaling URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the relay service behind the server.
    pub fn service(&self) -> &Arc<RelayService> {
        &self.service
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for TestRelayServer {
    fn drop(&mut self) {
        // Explicitly abort the HTTP server task to ensure immediate cleanup
        self._handle.abort();
    }
}
