//! Cluster access used by the troubleshooting steps.
//!
//! The steps only see [`ClusterGateway`] and [`Connector`]; the kube-backed
//! implementations live in [`kube_api`] and kubeconfig discovery in
//! [`kubeconfig`].

pub mod kube_api;
pub mod kubeconfig;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::k8s::{ClusterContext, ControllerRecord, PodRecord, ServiceRecord};
use crate::tunnel::TunnelProvider;

/// Read-only queries against the cluster.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodRecord>>;

    async fn list_services(&self, namespace: &str) -> Result<Vec<ServiceRecord>>;

    /// Deployments in the namespace, as returned by the API.
    async fn list_controllers(&self, namespace: &str) -> Result<Vec<ControllerRecord>>;
}

/// Everything a run needs once credentials have been loaded.
#[derive(Clone)]
pub struct Connection {
    pub context: Option<ClusterContext>,
    pub gateway: Arc<dyn ClusterGateway>,
    pub tunnels: Arc<dyn TunnelProvider>,
}

/// Turns a config locator into a live [`Connection`].
#[async_trait]
pub trait Connector: Send + Sync {
    /// `locator` is a kubeconfig path; empty means default discovery.
    async fn connect(&self, locator: &str) -> Result<Connection>;
}
