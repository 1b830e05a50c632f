//! Background loop plumbing shared by the heartbeat, health monitor and agent sampler

use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::FleetError;

/// Future that resolves when a loop should exit
pub type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A spawned background loop together with its shutdown trigger
pub struct LoopHandle {
    name: &'static str,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl LoopHandle {
    /// Spawn `body`, handing it the signal that fires on [`LoopHandle::stop`]
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let signal: ShutdownSignal = Box::pin(async move {
            // A dropped sender also counts as shutdown
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(body(signal));
        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop and wait for it to exit
    pub async fn stop(mut self) -> Result<(), FleetError> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        debug!("Waiting for {} loop to exit", self.name);
        self.handle
            .await
            .map_err(|e| FleetError::ShutdownError(format!("{} loop: {}", self.name, e)))
    }
}
