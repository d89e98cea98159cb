//! kube-rs backed cluster gateway and connector.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, ListParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};

use super::kubeconfig::{current_context, load_kubeconfig};
use super::{ClusterGateway, Connection, Connector};
use crate::error::{Error, Result};
use crate::models::k8s::{
    ContainerPortRecord, ContainerRecord, ControllerRecord, PodCondition, PodPhase, PodRecord,
    ServicePortRecord, ServiceRecord, TargetPort,
};
use crate::tunnel::port_forward::PortForwardProvider;

/// Gateway over a live API server.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        log::debug!("cluster: {} pod(s) in {namespace}", list.items.len());
        Ok(list.items.into_iter().map(pod_record).collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceRecord>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(service_record).collect())
    }

    async fn list_controllers(&self, namespace: &str) -> Result<Vec<ControllerRecord>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(controller_record).collect())
    }
}

/// Builds connections from kubeconfig files.
pub struct KubeConnector {
    /// Used when the operator gives no path
    default_path: Option<PathBuf>,
}

impl KubeConnector {
    pub fn new(default_path: Option<PathBuf>) -> Self {
        Self { default_path }
    }
}

#[async_trait]
impl Connector for KubeConnector {
    async fn connect(&self, locator: &str) -> Result<Connection> {
        let path = if locator.is_empty() {
            self.default_path.clone()
        } else {
            Some(PathBuf::from(locator))
        };

        let kubeconfig = load_kubeconfig(path.as_deref())?;
        let context = current_context(&kubeconfig);

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::kubeconfig(e.to_string()))?;
        let client = Client::try_from(config)?;

        // Fail here rather than on the first list call if the server is unreachable
        let version = client.apiserver_version().await?;
        log::info!("cluster: connected, server version {}", version.git_version);

        Ok(Connection {
            context,
            gateway: Arc::new(KubeGateway::new(client.clone())),
            tunnels: Arc::new(PortForwardProvider::new(client)),
        })
    }
}

// ── conversions ───────────────────────────────────────────────────────────────

fn to_port(n: i32) -> u16 {
    u16::try_from(n).unwrap_or_default()
}

fn pod_record(pod: Pod) -> PodRecord {
    let status = pod.status.unwrap_or_default();
    PodRecord {
        name: pod.metadata.name.unwrap_or_default(),
        phase: status
            .phase
            .as_deref()
            .map(PodPhase::from)
            .unwrap_or(PodPhase::Unknown),
        conditions: status
            .conditions
            .unwrap_or_default()
            .into_iter()
            .map(|c| PodCondition {
                kind: c.type_,
                status: c.status,
            })
            .collect(),
        labels: pod.metadata.labels.unwrap_or_default(),
    }
}

fn service_port_record(port: ServicePort) -> ServicePortRecord {
    let number = to_port(port.port);
    // An omitted targetPort defaults to the service port
    let target = match port.target_port {
        None => TargetPort::Number(number),
        Some(IntOrString::Int(n)) => TargetPort::Number(to_port(n)),
        Some(IntOrString::String(s)) => match s.parse::<u16>() {
            Ok(n) => TargetPort::Number(n),
            Err(_) => TargetPort::Name(s),
        },
    };
    ServicePortRecord {
        name: port.name.unwrap_or_default(),
        port: number,
        target,
    }
}

fn service_record(service: Service) -> ServiceRecord {
    let spec = service.spec.unwrap_or_default();
    ServiceRecord {
        name: service.metadata.name.unwrap_or_default(),
        selector: spec.selector.unwrap_or_default(),
        ports: spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(service_port_record)
            .collect(),
    }
}

fn controller_record(deployment: Deployment) -> ControllerRecord {
    let containers = deployment
        .spec
        .and_then(|spec| spec.template.spec)
        .map(|pod_spec| pod_spec.containers)
        .unwrap_or_default();

    ControllerRecord {
        name: deployment.metadata.name.unwrap_or_default(),
        labels: deployment.metadata.labels.unwrap_or_default(),
        containers: containers
            .into_iter()
            .map(|c| ContainerRecord {
                name: c.name,
                ports: c
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| ContainerPortRecord {
                        name: p.name,
                        container_port: to_port(p.container_port),
                    })
                    .collect(),
            })
            .collect(),
    }
}
