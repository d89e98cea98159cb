// Immutable snapshots of the cluster objects the troubleshooting flow inspects.
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label key shared by a service selector, its controller and the member pods.
pub const IDENTITY_LABEL: &str = "app";

/// The kubeconfig context a connection was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterContext {
    pub name: String,
    pub cluster: String,
    pub user: String,
    pub namespace: Option<String>,
    /// API server URL from the clusters stanza
    pub server_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for PodPhase {
    fn from(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCondition {
    /// Condition type, e.g. `Ready` or `PodScheduled`
    pub kind: String,
    /// `True`, `False` or `Unknown`
    pub status: String,
}

impl PodCondition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRecord {
    pub name: String,
    pub phase: PodPhase,
    pub conditions: Vec<PodCondition>,
    pub labels: BTreeMap<String, String>,
}

impl PodRecord {
    pub fn condition(&self, kind: &str) -> Option<&PodCondition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Where a service port sends traffic inside the pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetPort {
    Number(u16),
    /// Must be resolved against a container port name
    Name(String),
}

impl fmt::Display for TargetPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortRecord {
    pub name: String,
    pub port: u16,
    pub target: TargetPort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub name: String,
    pub selector: BTreeMap<String, String>,
    pub ports: Vec<ServicePortRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPortRecord {
    pub name: Option<String>,
    pub container_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub name: String,
    pub ports: Vec<ContainerPortRecord>,
}

/// Deployment-equivalent workload controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRecord {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerRecord>,
}

impl ControllerRecord {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Result of probing one pod through a tunnel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelOutcome {
    pub pod: String,
    pub reachable: bool,
    /// HTTP status, when the probe got that far
    pub status: Option<u16>,
    pub detail: Option<String>,
}

impl TunnelOutcome {
    pub fn reachable(pod: impl Into<String>, status: u16) -> Self {
        Self {
            pod: pod.into(),
            reachable: true,
            status: Some(status),
            detail: None,
        }
    }

    pub fn unreachable(pod: impl Into<String>, status: Option<u16>, detail: impl Into<String>) -> Self {
        Self {
            pod: pod.into(),
            reachable: false,
            status,
            detail: Some(detail.into()),
        }
    }
}

/// A diagnostic observation reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub check: String,
    pub summary: String,
    pub pods: Vec<String>,
}
