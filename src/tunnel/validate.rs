//! Probes candidate pods one at a time through short-lived tunnels.

use std::sync::Arc;
use std::time::Instant;

use super::{NotReady, TunnelHandle, TunnelProvider, TunnelTarget};
use crate::config::ProbeSettings;
use crate::error::{Error, Result};
use crate::models::k8s::{PodRecord, TunnelOutcome};

pub struct TunnelValidator {
    provider: Arc<dyn TunnelProvider>,
    http: reqwest::Client,
    probe: ProbeSettings,
}

impl TunnelValidator {
    pub fn new(provider: Arc<dyn TunnelProvider>, probe: ProbeSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(probe.request_timeout)
            .no_proxy()
            // Successive tunnels may reuse a local port; never reuse a connection
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| Error::tunnel(format!("cannot build probe client: {e}")))?;

        Ok(Self {
            provider,
            http,
            probe,
        })
    }

    /// Probes every pod in order. Probe failures become Unreachable outcomes;
    /// only tunnel acquisition errors end the loop early.
    pub async fn validate(
        &self,
        namespace: &str,
        pods: &[PodRecord],
        remote_port: u16,
    ) -> Result<Vec<TunnelOutcome>> {
        let mut outcomes = Vec::with_capacity(pods.len());
        for pod in pods {
            let target = TunnelTarget {
                namespace: namespace.to_string(),
                pod: pod.name.clone(),
                local_port: self.probe.local_port,
                remote_port,
            };
            outcomes.push(self.validate_one(&target).await?);
        }
        Ok(outcomes)
    }

    /// Opens, waits for, probes and always tears down one tunnel.
    pub async fn validate_one(&self, target: &TunnelTarget) -> Result<TunnelOutcome> {
        let tunnel = self.provider.open(target).await?;
        let mut handle = TunnelHandle::start(tunnel);

        let outcome = match handle.ready(self.probe.ready_timeout).await {
            Ok(local_port) => Ok(self.probe(&target.pod, local_port).await),
            Err(NotReady::TimedOut(waited)) => Ok(TunnelOutcome::unreachable(
                &target.pod,
                None,
                format!("tunnel timed out after {waited:?} waiting to become ready"),
            )),
            Err(NotReady::Failed(e)) => Err(e),
        };

        if let Err(e) = handle.shutdown().await {
            log::warn!("tunnel to {}: teardown reported {e}", target.pod);
        }
        outcome
    }

    async fn probe(&self, pod: &str, local_port: u16) -> TunnelOutcome {
        let url = self.probe.url(local_port);
        let started = Instant::now();

        match self.http.get(&url).send().await {
            Ok(response) => {
                let status = response.status();
                log::info!("probe: {pod} answered {status} in {:?}", started.elapsed());
                if status.as_u16() < 400 {
                    TunnelOutcome::reachable(pod, status.as_u16())
                } else {
                    TunnelOutcome::unreachable(
                        pod,
                        Some(status.as_u16()),
                        format!("GET {} returned {status}", self.probe.path),
                    )
                }
            }
            Err(e) => {
                log::info!("probe: {pod} failed after {:?}: {e}", started.elapsed());
                TunnelOutcome::unreachable(pod, None, format!("GET {} failed: {e}", self.probe.path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    use super::*;
    use crate::fsm::BoxFuture;
    use crate::models::k8s::PodPhase;
    use crate::tunnel::Tunnel;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Status(u16),
        /// Accepts and hangs up without answering
        HangUp,
        /// Never reports ready
        Stall,
    }

    struct Canned {
        behaviour: Behaviour,
        listener: TcpListener,
        stops: Arc<AtomicUsize>,
    }

    async fn answer(mut conn: TcpStream, status: u16) {
        let mut buf = [0u8; 1024];
        let mut seen = Vec::new();
        while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
            match conn.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => seen.extend_from_slice(&buf[..n]),
            }
        }
        let reply =
            format!("HTTP/1.1 {status} Canned\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
        let _ = conn.write_all(reply.as_bytes()).await;
        let _ = conn.shutdown().await;
    }

    impl Tunnel for Canned {
        fn forward(
            self: Box<Self>,
            ready: oneshot::Sender<u16>,
            mut stop: oneshot::Receiver<()>,
        ) -> BoxFuture<'static, Result<()>> {
            Box::pin(async move {
                let Canned {
                    behaviour,
                    listener,
                    stops,
                } = *self;
                let _held = match behaviour {
                    Behaviour::Stall => Some(ready),
                    _ => {
                        let _ = ready.send(listener.local_addr()?.port());
                        None
                    }
                };
                loop {
                    tokio::select! {
                        _ = &mut stop => break,
                        accepted = listener.accept() => {
                            let (conn, _) = accepted?;
                            match behaviour {
                                Behaviour::Status(code) => answer(conn, code).await,
                                _ => drop(conn),
                            }
                        }
                    }
                }
                stops.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    #[derive(Default)]
    struct CannedProvider {
        behaviours: HashMap<String, Behaviour>,
        opened: Mutex<Vec<TunnelTarget>>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TunnelProvider for CannedProvider {
        async fn open(&self, target: &TunnelTarget) -> Result<Box<dyn Tunnel>> {
            let behaviour = *self
                .behaviours
                .get(&target.pod)
                .ok_or_else(|| Error::tunnel(format!("pod {} refused the upgrade", target.pod)))?;
            self.opened.lock().unwrap().push(target.clone());
            let listener = TcpListener::bind(("127.0.0.1", target.local_port)).await?;
            Ok(Box::new(Canned {
                behaviour,
                listener,
                stops: self.stops.clone(),
            }))
        }
    }

    fn pod(name: &str) -> PodRecord {
        PodRecord {
            name: name.into(),
            phase: PodPhase::Running,
            conditions: vec![],
            labels: Default::default(),
        }
    }

    fn validator(provider: Arc<CannedProvider>) -> TunnelValidator {
        let probe = ProbeSettings {
            path: "/healthz".into(),
            ready_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        TunnelValidator::new(provider, probe).unwrap()
    }

    fn provider(pods: &[(&str, Behaviour)]) -> Arc<CannedProvider> {
        Arc::new(CannedProvider {
            behaviours: pods.iter().map(|(n, b)| (n.to_string(), *b)).collect(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn every_candidate_is_probed_and_classified() {
        let provider = provider(&[
            ("web-1", Behaviour::Status(200)),
            ("web-2", Behaviour::Status(503)),
            ("web-3", Behaviour::HangUp),
            ("web-4", Behaviour::Status(302)),
        ]);
        let pods = vec![pod("web-1"), pod("web-2"), pod("web-3"), pod("web-4")];

        let outcomes = validator(provider.clone())
            .validate("shop", &pods, 8080)
            .await
            .unwrap();

        let reachable: Vec<bool> = outcomes.iter().map(|o| o.reachable).collect();
        assert_eq!(reachable, vec![true, false, false, true]);
        assert_eq!(outcomes[1].status, Some(503));
        assert!(outcomes[1].detail.as_deref().unwrap().contains("/healthz"));
        assert_eq!(outcomes[2].status, None);
        assert_eq!(provider.stops.load(Ordering::SeqCst), 4);

        let opened = provider.opened.lock().unwrap();
        assert!(opened.iter().all(|t| t.namespace == "shop" && t.remote_port == 8080));
    }

    #[tokio::test]
    async fn readiness_timeout_is_a_distinct_unreachable_outcome() {
        let provider = provider(&[("web-1", Behaviour::Stall), ("web-2", Behaviour::Status(200))]);

        let outcomes = validator(provider.clone())
            .validate("shop", &[pod("web-1"), pod("web-2")], 8080)
            .await
            .unwrap();

        assert!(!outcomes[0].reachable);
        assert!(outcomes[0].detail.as_deref().unwrap().contains("timed out"));
        assert!(outcomes[1].reachable);
        assert_eq!(provider.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn acquisition_failure_propagates() {
        let provider = provider(&[("web-1", Behaviour::Status(200))]);

        let err = validator(provider)
            .validate("shop", &[pod("web-1"), pod("ghost")], 8080)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Tunnel(_)));
    }
}
