use crate::client::Client;
use crate::config::Target;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::Sender;

/// Manufactures clients on demand and keeps them registered for shutdown.
/// Several pools can be configured to multi-home the load over distinct
/// local source addresses.
pub struct LocalClientPool {
    local_addr: Option<SocketAddr>,
    clients: Mutex<Vec<Arc<Client>>>,
}

impl LocalClientPool {
    pub fn new(local_addr: Option<SocketAddr>) -> Self {
        LocalClientPool {
            local_addr,
            clients: Mutex::new(Vec::new()),
        }
    }

    /// Connects a new client and registers it.
    pub async fn spawn_client(
        &self,
        target: Arc<Target>,
        rtt_tx: Sender<Duration>,
        err_tx: Sender<Error>,
    ) -> Result<Arc<Client>> {
        let client = Client::connect(target, self.local_addr, rtt_tx, err_tx).await?;
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Arc::clone(&client));
        Ok(client)
    }

    /// Tears down every connection this pool has created.
    pub async fn close(&self) -> Result<()> {
        let clients: Vec<_> = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for client in clients {
            client.close().await?;
        }
        Ok(())
    }
}
