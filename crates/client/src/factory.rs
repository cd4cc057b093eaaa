use crate::async_client::AsyncRestClient;
use crate::callback_client::CallbackRestClient;
use execbridge_core::RestClient;
use execbridge_executor::{Bridge, BridgeConfig, BridgeStatsSnapshot, PoolError, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Owns a request pool and a response pool and hands out clients bridged
/// over them.
///
/// Every client built by one factory shares the same pools and counters.
/// The pools shut down when [`shutdown`](Self::shutdown) is called or the
/// last reference to them is dropped.
pub struct ClientFactory {
    request: Arc<WorkerPool>,
    response: Arc<WorkerPool>,
    bridge: Bridge,
}

impl ClientFactory {
    pub fn start(config: &BridgeConfig) -> Result<Self, PoolError> {
        let request = Arc::new(WorkerPool::new(&config.request)?);
        let response = Arc::new(WorkerPool::new(&config.response)?);
        let bridge = Bridge::new(request.clone(), response.clone());
        info!(
            request = %config.request.name,
            response = %config.response.name,
            "Client factory ready"
        );
        Ok(Self {
            request,
            response,
            bridge,
        })
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn async_client(&self, client: Arc<dyn RestClient>) -> AsyncRestClient {
        AsyncRestClient::new(client, self.bridge.clone())
    }

    pub fn callback_client(&self, client: Arc<dyn RestClient>) -> CallbackRestClient {
        CallbackRestClient::new(client, self.bridge.clone())
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.bridge.stats()
    }

    /// Stop both pools without waiting. New calls are rejected; calls
    /// already accepted may still complete in the background.
    pub fn shutdown(&self) {
        self.request.shutdown();
        self.response.shutdown();
    }

    /// Stop the request pool first, waiting up to `timeout` for running
    /// computations, then give their notifications the same time to drain.
    ///
    /// Blocks the calling thread.
    pub fn shutdown_timeout(&self, timeout: Duration) {
        self.request.shutdown_timeout(timeout);
        self.response.shutdown_timeout(timeout);
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("request", &self.request)
            .field("response", &self.response)
            .finish()
    }
}
