//! Pod health checks run against the namespace snapshot.

use crate::models::k8s::{PodPhase, PodRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodCheck {
    Pending,
    NotRunning,
    NotReady,
}

impl PodCheck {
    pub fn id(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NotRunning => "not-running",
            Self::NotReady => "not-ready",
        }
    }

    /// Names of the pods failing this check, in snapshot order.
    pub fn affected(self, pods: &[PodRecord]) -> Vec<&str> {
        pods.iter()
            .filter(|pod| self.fails(pod))
            .map(|pod| pod.name.as_str())
            .collect()
    }

    fn fails(self, pod: &PodRecord) -> bool {
        match self {
            Self::Pending => pod.phase == PodPhase::Pending,
            Self::NotRunning => pod.phase != PodPhase::Running,
            // A missing Ready condition is not reported
            Self::NotReady => pod.condition("Ready").is_some_and(|c| !c.is_true()),
        }
    }

    pub fn heading(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::NotRunning => "Not running",
            Self::NotReady => "Not ready",
        }
    }

    pub fn all_clear(self) -> &'static str {
        match self {
            Self::Pending => "No pods are pending.",
            Self::NotRunning => "All pods are running.",
            Self::NotReady => "All pods are ready.",
        }
    }

    pub fn hints(self) -> &'static [&'static str] {
        match self {
            Self::Pending => &[
                "Run `kubectl describe pod <name>` and read the scheduling events.",
                "Not enough CPU or memory on the nodes, or a ResourceQuota is exhausted.",
                "A PersistentVolumeClaim the pod mounts is not bound.",
                "Node selectors, taints or affinity rules exclude every node.",
            ],
            Self::NotRunning => &[
                "Run `kubectl logs <name> --previous` to see why the container exited.",
                "ImagePullBackOff: check the image name, tag and registry credentials.",
                "CrashLoopBackOff: the application exits on start; check its config and command.",
            ],
            Self::NotReady => &[
                "The readiness probe is failing; `kubectl describe pod <name>` shows why.",
                "Check the probe's port and path match what the container serves.",
            ],
        }
    }
}
