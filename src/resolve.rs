//! Pure resolution of a service endpoint down to the pods that serve it.
//!
//! Everything here works on snapshots that were already fetched; nothing
//! talks to the cluster.

use crate::error::{Error, Result};
use crate::models::k8s::{
    ControllerRecord, PodRecord, ServicePortRecord, ServiceRecord, TargetPort, IDENTITY_LABEL,
};

/// Finds the controller whose identity label matches the service selector.
///
/// More than one match is reported as [`Error::Ambiguous`] with the candidate
/// names sorted lexicographically.
pub fn resolve_controller<'a>(
    service: &ServiceRecord,
    controllers: &'a [ControllerRecord],
) -> Result<&'a ControllerRecord> {
    let wanted = service.selector.get(IDENTITY_LABEL).ok_or_else(|| {
        Error::not_found(
            "selector label",
            format!("{IDENTITY_LABEL} on service {}", service.name),
        )
    })?;
    let selector = format!("{IDENTITY_LABEL}={wanted}");

    let mut matches: Vec<&ControllerRecord> = controllers
        .iter()
        .filter(|c| c.label(IDENTITY_LABEL) == Some(wanted.as_str()))
        .collect();

    match matches.len() {
        0 => Err(Error::not_found("controller", selector)),
        1 => Ok(matches.remove(0)),
        _ => {
            let mut candidates: Vec<String> = matches.iter().map(|c| c.name.clone()).collect();
            candidates.sort();
            Err(Error::Ambiguous {
                kind: "controller",
                name: selector,
                candidates,
            })
        }
    }
}

/// Maps a service port to the container port it lands on.
///
/// Symbolic targets match the first named port in container, then port,
/// declaration order.
pub fn resolve_container_port(
    controller: &ControllerRecord,
    service_port: &ServicePortRecord,
) -> Result<u16> {
    let name = match &service_port.target {
        TargetPort::Number(port) => return Ok(*port),
        TargetPort::Name(name) => name,
    };

    controller
        .containers
        .iter()
        .flat_map(|container| container.ports.iter())
        .find(|port| port.name.as_deref() == Some(name.as_str()))
        .map(|port| port.container_port)
        .ok_or_else(|| {
            Error::not_found(
                "container port",
                format!("{name} in controller {}", controller.name),
            )
        })
}

/// Pods in the snapshot carrying the controller's identity label value, in
/// snapshot order. An empty result is a finding, not an error.
pub fn resolve_member_pods<'a>(
    controller: &ControllerRecord,
    pods: &'a [PodRecord],
) -> Vec<&'a PodRecord> {
    let Some(identity) = controller.label(IDENTITY_LABEL) else {
        return Vec::new();
    };
    pods.iter()
        .filter(|pod| pod.label(IDENTITY_LABEL) == Some(identity))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::models::k8s::{ContainerPortRecord, ContainerRecord, PodPhase};

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn controller(name: &str, app: &str, containers: Vec<ContainerRecord>) -> ControllerRecord {
        ControllerRecord {
            name: name.into(),
            labels: labels(&[("app", app)]),
            containers,
        }
    }

    fn container(name: &str, ports: &[(&str, u16)]) -> ContainerRecord {
        ContainerRecord {
            name: name.into(),
            ports: ports
                .iter()
                .map(|(n, p)| ContainerPortRecord {
                    name: Some(n.to_string()),
                    container_port: *p,
                })
                .collect(),
        }
    }

    fn service(app: Option<&str>) -> ServiceRecord {
        ServiceRecord {
            name: "web".into(),
            selector: app.map(|a| labels(&[("app", a)])).unwrap_or_default(),
            ports: vec![],
        }
    }

    fn port(target: TargetPort) -> ServicePortRecord {
        ServicePortRecord {
            name: "http".into(),
            port: 80,
            target,
        }
    }

    fn pod(name: &str, app: &str) -> PodRecord {
        PodRecord {
            name: name.into(),
            phase: PodPhase::Running,
            conditions: vec![],
            labels: labels(&[("app", app)]),
        }
    }

    #[test]
    fn controller_matches_selector_label() {
        let controllers = vec![controller("api", "api", vec![]), controller("web", "web", vec![])];

        let found = resolve_controller(&service(Some("web")), &controllers).unwrap();

        assert_eq!(found.name, "web");
    }

    #[test]
    fn controller_not_found_without_match_or_selector() {
        let controllers = vec![controller("api", "api", vec![])];

        let err = resolve_controller(&service(Some("web")), &controllers).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "controller", .. }));

        let err = resolve_controller(&service(None), &controllers).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "selector label", .. }));
    }

    #[test]
    fn ambiguous_controllers_are_sorted_by_name() {
        let controllers = vec![
            controller("web-canary", "web", vec![]),
            controller("web", "web", vec![]),
            controller("api", "api", vec![]),
        ];

        let err = resolve_controller(&service(Some("web")), &controllers).unwrap_err();

        match err {
            Error::Ambiguous { candidates, .. } => {
                assert_eq!(candidates, vec!["web", "web-canary"]);
            }
            other => panic!("expected Ambiguous, got {other}"),
        }
    }

    #[test]
    fn numeric_target_is_returned_unchanged() {
        let c = controller("web", "web", vec![container("app", &[("http", 8080)])]);

        assert_eq!(resolve_container_port(&c, &port(TargetPort::Number(9090))).unwrap(), 9090);

        let empty = controller("web", "web", vec![]);
        assert_eq!(resolve_container_port(&empty, &port(TargetPort::Number(80))).unwrap(), 80);
    }

    #[test]
    fn symbolic_target_takes_first_declared_match() {
        let c = controller(
            "web",
            "web",
            vec![
                container("sidecar", &[("metrics", 9100)]),
                container("app", &[("admin", 9000), ("http", 8080)]),
                container("proxy", &[("http", 15001)]),
            ],
        );

        let resolved = resolve_container_port(&c, &port(TargetPort::Name("http".into()))).unwrap();

        assert_eq!(resolved, 8080);
    }

    #[test]
    fn symbolic_target_without_match_is_not_found() {
        let c = controller("web", "web", vec![container("app", &[("admin", 9000)])]);

        let err = resolve_container_port(&c, &port(TargetPort::Name("http".into()))).unwrap_err();

        assert!(matches!(err, Error::NotFound { kind: "container port", .. }));
    }

    #[test]
    fn member_pods_keep_snapshot_order() {
        let c = controller("web", "web", vec![]);
        let pods = vec![pod("web-2", "web"), pod("api-1", "api"), pod("web-1", "web")];

        let members: Vec<&str> = resolve_member_pods(&c, &pods)
            .into_iter()
            .map(|p| p.name.as_str())
            .collect();

        assert_eq!(members, vec!["web-2", "web-1"]);
    }

    #[test]
    fn member_pods_may_be_empty() {
        let c = controller("web", "web", vec![]);
        let pods = vec![pod("api-1", "api")];

        assert!(resolve_member_pods(&c, &pods).is_empty());

        let unlabeled = ControllerRecord {
            name: "bare".into(),
            labels: BTreeMap::new(),
            containers: vec![],
        };
        assert!(resolve_member_pods(&unlabeled, &pods).is_empty());
    }
}
