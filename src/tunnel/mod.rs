//! Short-lived local tunnels into pods.
//!
//! A [`TunnelProvider`] acquires a [`Tunnel`]; starting it spawns the
//! forwarding loop and yields a [`TunnelHandle`] carrying the two single-use
//! signals shared with that task: readiness (with the bound local port) and
//! stop.

pub mod port_forward;
pub mod validate;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::fsm::BoxFuture;

/// Where a tunnel should lead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub namespace: String,
    pub pod: String,
    /// 0 asks for an ephemeral port
    pub local_port: u16,
    pub remote_port: u16,
}

/// An acquired tunnel that has not started forwarding yet.
pub trait Tunnel: Send {
    /// Forwards traffic until `stop` fires or its sender is dropped.
    ///
    /// Must send the bound local port on `ready` once connections will be
    /// accepted.
    fn forward(
        self: Box<Self>,
        ready: oneshot::Sender<u16>,
        stop: oneshot::Receiver<()>,
    ) -> BoxFuture<'static, Result<()>>;
}

#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Acquires a tunnel. Credential, bind and upgrade failures surface here.
    async fn open(&self, target: &TunnelTarget) -> Result<Box<dyn Tunnel>>;
}

/// Why a tunnel never became ready.
#[derive(Debug)]
pub enum NotReady {
    TimedOut(Duration),
    /// The forwarding loop ended before signalling ready
    Failed(Error),
}

/// A running tunnel. Dropping it closes the stop channel, which also ends the
/// forwarding loop; [`TunnelHandle::shutdown`] additionally waits for it.
pub struct TunnelHandle {
    ready: Option<oneshot::Receiver<u16>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl TunnelHandle {
    /// Spawns the tunnel's forwarding loop as its own task.
    pub fn start(tunnel: Box<dyn Tunnel>) -> Self {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(tunnel.forward(ready_tx, stop_rx));

        Self {
            ready: Some(ready_rx),
            stop: Some(stop_tx),
            task: Some(task),
        }
    }

    /// Blocks until the tunnel reports its local port, fails, or `timeout` expires.
    pub async fn ready(&mut self, timeout: Duration) -> std::result::Result<u16, NotReady> {
        let Some(ready) = self.ready.take() else {
            return Err(NotReady::Failed(Error::tunnel("readiness already consumed")));
        };

        match tokio::time::timeout(timeout, ready).await {
            Ok(Ok(port)) => Ok(port),
            Ok(Err(_)) => {
                let err = match self.join().await {
                    Err(e) => e,
                    Ok(()) => Error::tunnel("forwarding stopped before it was ready"),
                };
                Err(NotReady::Failed(err))
            }
            Err(_) => Err(NotReady::TimedOut(timeout)),
        }
    }

    /// Signals stop and waits for the forwarding task to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            // Err means the loop already exited
            let _ = stop.send(());
        }
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::tunnel(format!("forwarding task failed: {e}")))?,
            None => Ok(()),
        }
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
