//! Tunnels over the pod `portforward` subresource.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Portforwarder};
use kube::Client;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use super::{Tunnel, TunnelProvider, TunnelTarget};
use crate::error::{Error, Result};
use crate::fsm::BoxFuture;

/// Opens port-forward tunnels with the run's kube client.
#[derive(Clone)]
pub struct PortForwardProvider {
    client: Client,
}

impl PortForwardProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TunnelProvider for PortForwardProvider {
    async fn open(&self, target: &TunnelTarget) -> Result<Box<dyn Tunnel>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, target.local_port))
            .await
            .map_err(|e| Error::tunnel(format!("cannot bind local port {}: {e}", target.local_port)))?;

        // Upgrade once up front so credential and upgrade failures surface
        // while acquiring, not as a failed probe.
        let primed = pods
            .portforward(&target.pod, &[target.remote_port])
            .await
            .map_err(|e| {
                Error::tunnel(format!(
                    "port-forward to {}/{}:{} failed: {e}",
                    target.namespace, target.pod, target.remote_port
                ))
            })?;

        Ok(Box::new(PortForward {
            pods,
            pod: target.pod.clone(),
            remote_port: target.remote_port,
            listener,
            primed: Some(primed),
        }))
    }
}

struct PortForward {
    pods: Api<Pod>,
    pod: String,
    remote_port: u16,
    listener: TcpListener,
    primed: Option<Portforwarder>,
}

impl Tunnel for PortForward {
    fn forward(
        self: Box<Self>,
        ready: oneshot::Sender<u16>,
        stop: oneshot::Receiver<()>,
    ) -> BoxFuture<'static, Result<()>> {
        Box::pin((*self).run(ready, stop))
    }
}

impl PortForward {
    async fn run(self, ready: oneshot::Sender<u16>, mut stop: oneshot::Receiver<()>) -> Result<()> {
        let PortForward {
            pods,
            pod,
            remote_port,
            listener,
            mut primed,
        } = self;

        let local_port = listener.local_addr()?.port();
        log::info!("tunnel: 127.0.0.1:{local_port} -> {pod}:{remote_port}");
        // Err only means nobody waits for readiness any more
        let _ = ready.send(local_port);

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut stop => break,
                accepted = listener.accept() => {
                    let Some((conn, peer)) = admit(accepted) else {
                        continue;
                    };
                    let forwarder = match primed.take() {
                        Some(forwarder) => forwarder,
                        None => match pods.portforward(&pod, &[remote_port]).await {
                            Ok(forwarder) => forwarder,
                            Err(e) => {
                                log::warn!("tunnel: dropping connection from {peer}: {e}");
                                continue;
                            }
                        },
                    };
                    log::debug!("tunnel: forwarding connection from {peer}");
                    connections.spawn(forward_connection(forwarder, remote_port, conn));
                }
            }
        }

        connections.shutdown().await;
        log::info!("tunnel: closed 127.0.0.1:{local_port}");
        Ok(())
    }
}

/// A failed accept loses that one connection, not the tunnel.
fn admit(accepted: io::Result<(TcpStream, SocketAddr)>) -> Option<(TcpStream, SocketAddr)> {
    match accepted {
        Ok(conn) => Some(conn),
        Err(e) => {
            log::warn!("tunnel: accept failed: {e}");
            None
        }
    }
}

async fn forward_connection(mut forwarder: Portforwarder, port: u16, mut conn: TcpStream) {
    let Some(mut upstream) = forwarder.take_stream(port) else {
        log::warn!("tunnel: no stream for port {port}");
        return;
    };

    if let Err(e) = tokio::io::copy_bidirectional(&mut conn, &mut upstream).await {
        log::debug!("tunnel: connection ended: {e}");
    }
    drop(upstream);

    if let Err(e) = forwarder.join().await {
        log::debug!("tunnel: port-forward session ended with error: {e}");
    }
}
