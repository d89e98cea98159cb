#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use kube_trouble::cluster::{ClusterGateway, Connection, Connector};
use kube_trouble::config::{ProbeSettings, Settings};
use kube_trouble::console::Console;
use kube_trouble::fsm::BoxFuture;
use kube_trouble::models::k8s::{
    ClusterContext, ContainerPortRecord, ContainerRecord, ControllerRecord, PodCondition,
    PodPhase, PodRecord, ServicePortRecord, ServiceRecord, TargetPort,
};
use kube_trouble::tunnel::{Tunnel, TunnelProvider, TunnelTarget};
use kube_trouble::{Error, Result};

/// Output sink the test keeps a handle to.
#[derive(Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<u8>>>);

impl Transcript {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for Transcript {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Console fed from `answers`, one per line.
pub fn console(answers: &[&str]) -> (Console, Transcript) {
    let mut input = answers.join("\n");
    input.push('\n');
    let transcript = Transcript::default();
    (
        Console::new(Cursor::new(input.into_bytes()), transcript.clone()),
        transcript,
    )
}

pub fn settings() -> Settings {
    Settings {
        probe: ProbeSettings {
            path: "/healthz".into(),
            ready_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn pod(name: &str, app: &str, phase: PodPhase, ready: bool) -> PodRecord {
    PodRecord {
        name: name.into(),
        phase,
        conditions: vec![PodCondition {
            kind: "Ready".into(),
            status: if ready { "True" } else { "False" }.into(),
        }],
        labels: labels(&[("app", app)]),
    }
}

pub fn web_service() -> ServiceRecord {
    ServiceRecord {
        name: "web".into(),
        selector: labels(&[("app", "web")]),
        ports: vec![ServicePortRecord {
            name: "http".into(),
            port: 80,
            target: TargetPort::Name("http".into()),
        }],
    }
}

pub fn controller(name: &str, app: &str) -> ControllerRecord {
    ControllerRecord {
        name: name.into(),
        labels: labels(&[("app", app)]),
        containers: vec![ContainerRecord {
            name: "server".into(),
            ports: vec![
                ContainerPortRecord {
                    name: Some("metrics".into()),
                    container_port: 9090,
                },
                ContainerPortRecord {
                    name: Some("http".into()),
                    container_port: 8080,
                },
            ],
        }],
    }
}

/// In-memory cluster keyed by namespace.
#[derive(Default)]
pub struct FakeCluster {
    pub namespaces: Vec<String>,
    pub pods: HashMap<String, Vec<PodRecord>>,
    pub services: HashMap<String, Vec<ServiceRecord>>,
    pub controllers: HashMap<String, Vec<ControllerRecord>>,
    pub pod_lists: AtomicUsize,
}

impl FakeCluster {
    /// `shop` holds three healthy `web` pods behind one service and deployment.
    pub fn shop() -> Self {
        let mut cluster = FakeCluster {
            namespaces: vec!["default".into(), "shop".into(), "kube-system".into()],
            ..Default::default()
        };
        cluster.pods.insert(
            "shop".into(),
            vec![
                pod("web-1", "web", PodPhase::Running, true),
                pod("web-2", "web", PodPhase::Running, true),
                pod("web-3", "web", PodPhase::Running, true),
                pod("db-0", "db", PodPhase::Running, true),
            ],
        );
        cluster.services.insert("shop".into(), vec![web_service()]);
        cluster
            .controllers
            .insert("shop".into(), vec![controller("web", "web"), controller("db", "db")]);
        cluster
    }
}

#[async_trait]
impl ClusterGateway for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.namespaces.clone())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>> {
        self.pod_lists.fetch_add(1, Ordering::SeqCst);
        Ok(self.pods.get(namespace).cloned().unwrap_or_default())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceRecord>> {
        Ok(self.services.get(namespace).cloned().unwrap_or_default())
    }

    async fn list_controllers(&self, namespace: &str) -> Result<Vec<ControllerRecord>> {
        Ok(self.controllers.get(namespace).cloned().unwrap_or_default())
    }
}

/// Answers every request on the tunnel with a fixed HTTP status.
struct StatusTunnel {
    status: u16,
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
    let reply = format!("HTTP/1.1 {status} Fake\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
    let _ = conn.write_all(reply.as_bytes()).await;
    let _ = conn.shutdown().await;
}

impl Tunnel for StatusTunnel {
    fn forward(
        self: Box<Self>,
        ready: oneshot::Sender<u16>,
        mut stop: oneshot::Receiver<()>,
    ) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let StatusTunnel {
                status,
                listener,
                stops,
            } = *self;
            let _ = ready.send(listener.local_addr()?.port());
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    accepted = listener.accept() => {
                        let (conn, _) = accepted?;
                        answer(conn, status).await;
                    }
                }
            }
            stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct FakeTunnels {
    pub statuses: HashMap<String, u16>,
    pub opened: Mutex<Vec<TunnelTarget>>,
    pub stops: Arc<AtomicUsize>,
}

impl FakeTunnels {
    pub fn with(statuses: &[(&str, u16)]) -> Self {
        FakeTunnels {
            statuses: statuses.iter().map(|(p, s)| (p.to_string(), *s)).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl TunnelProvider for FakeTunnels {
    async fn open(&self, target: &TunnelTarget) -> Result<Box<dyn Tunnel>> {
        let status = *self
            .statuses
            .get(&target.pod)
            .ok_or_else(|| Error::tunnel(format!("no route to {}", target.pod)))?;
        self.opened.lock().unwrap().push(target.clone());
        let listener = TcpListener::bind(("127.0.0.1", target.local_port)).await?;
        Ok(Box::new(StatusTunnel {
            status,
            listener,
            stops: self.stops.clone(),
        }))
    }
}

/// Connects only when the locator is empty or listed in `accepted`.
pub struct FakeConnector {
    pub cluster: Arc<FakeCluster>,
    pub tunnels: Arc<FakeTunnels>,
    pub accepted: Vec<String>,
    pub attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(cluster: FakeCluster, tunnels: FakeTunnels) -> Self {
        FakeConnector {
            cluster: Arc::new(cluster),
            tunnels: Arc::new(tunnels),
            accepted: Vec::new(),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, locator: &str) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !locator.is_empty() && !self.accepted.iter().any(|a| a == locator) {
            return Err(Error::kubeconfig(format!("{locator}: no such file")));
        }
        Ok(Connection {
            context: Some(ClusterContext {
                name: "kind-dev".into(),
                cluster: "kind-dev".into(),
                user: "kind-dev".into(),
                namespace: None,
                server_url: Some("https://127.0.0.1:6443".into()),
            }),
            gateway: self.cluster.clone(),
            tunnels: self.tunnels.clone(),
        })
    }
}
