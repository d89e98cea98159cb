//! Data accumulated while walking the troubleshooting steps.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::k8s::{
    ControllerRecord, Finding, PodRecord, ServicePortRecord, ServiceRecord, TunnelOutcome,
};

/// Everything the operator has chosen and the cluster has told us so far.
///
/// Accessors named `require_*` enforce the ordering of the steps: a step can
/// only read what an earlier step stored.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Kubeconfig path as typed; empty means default discovery
    pub locator: String,
    pub namespace: String,
    /// Captured once per namespace selection, never refreshed implicitly
    pub pods: Vec<PodRecord>,
    pub service: Option<ServiceRecord>,
    pub service_port: Option<ServicePortRecord>,
    pub controller: Option<ControllerRecord>,
    pub container_port: Option<u16>,
    pub candidates: Vec<PodRecord>,
    pub outcomes: Vec<TunnelOutcome>,
    pub findings: Vec<Finding>,
}

impl Session {
    /// Switches namespace, dropping everything gathered for the previous one.
    pub fn select_namespace(&mut self, namespace: impl Into<String>) {
        self.namespace = namespace.into();
        self.pods.clear();
        self.clear_service_scope();
    }

    pub fn select_service(&mut self, service: ServiceRecord) {
        self.clear_service_scope();
        self.service = Some(service);
    }

    pub fn select_service_port(&mut self, port: ServicePortRecord) {
        self.service_port = Some(port);
        self.controller = None;
        self.container_port = None;
        self.candidates.clear();
        self.outcomes.clear();
    }

    pub fn record_finding(&mut self, check: &str, summary: impl Into<String>, pods: Vec<String>) {
        self.findings.push(Finding {
            check: check.to_string(),
            summary: summary.into(),
            pods,
        });
    }

    pub fn require_namespace(&self) -> Result<&str> {
        if self.namespace.is_empty() {
            return Err(Error::precondition("a namespace must be selected first"));
        }
        Ok(&self.namespace)
    }

    pub fn require_service(&self) -> Result<&ServiceRecord> {
        self.service
            .as_ref()
            .ok_or_else(|| Error::precondition("a service must be selected first"))
    }

    pub fn require_service_port(&self) -> Result<&ServicePortRecord> {
        self.service_port
            .as_ref()
            .ok_or_else(|| Error::precondition("a service port must be selected first"))
    }

    pub fn require_controller(&self) -> Result<&ControllerRecord> {
        self.controller
            .as_ref()
            .ok_or_else(|| Error::precondition("the backing controller must be resolved first"))
    }

    pub fn require_container_port(&self) -> Result<u16> {
        self.container_port
            .ok_or_else(|| Error::precondition("the container port must be resolved first"))
    }

    fn clear_service_scope(&mut self) {
        self.service = None;
        self.service_port = None;
        self.controller = None;
        self.container_port = None;
        self.candidates.clear();
        self.outcomes.clear();
    }
}
