use super::checks::PodCheck;
use super::*;
use crate::models::k8s::{PodRecord, IDENTITY_LABEL};
use crate::resolve;
use crate::tunnel::validate::TunnelValidator;

impl Diagnostics {
    pub(super) async fn welcome(&mut self) -> Result<Transition> {
        self.console.say("Welcome to kube-trouble.")?;
        self.console.say(
            "kube-trouble walks you through finding out why a workload in your cluster cannot be reached.",
        )?;
        self.console.say(
            "The checks follow the flow described at https://learnk8s.io/a/troubleshooting-kubernetes.pdf.",
        )?;
        self.console.blank()?;
        Ok(Transition::Change(ACQUIRE_CONNECTION))
    }

    pub(super) async fn prompt_for_kubeconfig(&mut self) -> Result<Transition> {
        let fallback = self
            .settings
            .kubeconfig
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "$KUBECONFIG or ~/.kube".to_string());

        self.console.say("We need to start by connecting to a Kubernetes cluster.")?;
        self.console.say(format!(
            "Enter the location of your KUBECONFIG file (blank for {fallback}):"
        ))?;
        self.session.locator = self.console.read_line()?;
        Ok(Transition::Update)
    }

    pub(super) async fn connect(&mut self) -> Result<Transition> {
        let connection = self.connector.connect(&self.session.locator).await?;

        match &connection.context {
            Some(ctx) => self.console.say(format!(
                "Connected using context {} (cluster {}, server {}).",
                ctx.name,
                ctx.cluster,
                ctx.server_url.as_deref().unwrap_or("unknown")
            ))?,
            None => self.console.say("Connected.")?,
        }
        self.connection = Some(connection);
        Ok(Transition::Change(SELECT_NAMESPACE))
    }

    pub(super) async fn select_namespace(&mut self) -> Result<Transition> {
        let namespaces = self.gateway()?.list_namespaces().await?;
        if namespaces.is_empty() {
            return Err(Error::not_found("namespace", "none visible with these credentials"));
        }

        let picked = self.console.choose(
            "Choose the Kubernetes namespace of interest:",
            &namespaces,
            |ns| ns.clone(),
        )?;
        self.session.select_namespace(namespaces[picked].clone());
        Ok(Transition::Change(FETCH_PODS))
    }

    pub(super) async fn fetch_pods(&mut self) -> Result<Transition> {
        let namespace = self.session.require_namespace()?.to_string();
        let pods = self.gateway()?.list_pods(&namespace).await?;

        self.console.say(format!(
            "There are {} pods in namespace {namespace}.",
            pods.len()
        ))?;
        self.session.pods = pods;
        Ok(Transition::Change(CHECK_PENDING))
    }

    pub(super) async fn check_pending(&mut self) -> Result<Transition> {
        self.run_check(PodCheck::Pending, CHECK_RUNNING)
    }

    pub(super) async fn check_running(&mut self) -> Result<Transition> {
        self.run_check(PodCheck::NotRunning, CHECK_READY)
    }

    pub(super) async fn check_ready(&mut self) -> Result<Transition> {
        self.run_check(PodCheck::NotReady, SELECT_SERVICE)
    }

    /// Reports the pods failing `check`. The snapshot is only refreshed when
    /// the operator asks for it.
    fn run_check(&mut self, check: PodCheck, next: &'static str) -> Result<Transition> {
        let affected: Vec<String> = check
            .affected(&self.session.pods)
            .into_iter()
            .map(String::from)
            .collect();

        if affected.is_empty() {
            self.console.say(check.all_clear())?;
            return Ok(Transition::Change(next));
        }

        for name in &affected {
            self.console.say(format!("### {} - {name}", check.heading()))?;
        }
        self.console.say("Things to look at:")?;
        for hint in check.hints() {
            self.console.say(format!("  - {hint}"))?;
        }

        let summary = format!("{} pod(s): {}", affected.len(), check.heading().to_lowercase());
        self.session.record_finding(check.id(), summary, affected);

        if self.console.confirm("Re-fetch the pods and check again?")? {
            Ok(Transition::Change(FETCH_PODS))
        } else {
            Ok(Transition::Change(FINISH))
        }
    }

    pub(super) async fn select_service(&mut self) -> Result<Transition> {
        let namespace = self.session.require_namespace()?.to_string();
        let mut services = self.gateway()?.list_services(&namespace).await?;

        if services.is_empty() {
            self.console.say(format!("There are no services in namespace {namespace}."))?;
            self.session.record_finding(
                "no-services",
                format!("namespace {namespace} has no services"),
                Vec::new(),
            );
            return Ok(Transition::Change(FINISH));
        }

        let picked = self.console.choose(
            "Which service should be reachable?",
            &services,
            |svc| svc.name.clone(),
        )?;
        self.session.select_service(services.swap_remove(picked));
        Ok(Transition::Change(SELECT_SERVICE_PORT))
    }

    pub(super) async fn select_service_port(&mut self) -> Result<Transition> {
        let service = self.session.require_service()?.clone();

        if service.ports.is_empty() {
            self.console.say(format!("Service {} exposes no ports.", service.name))?;
            self.session.record_finding(
                "no-service-ports",
                format!("service {} has no ports", service.name),
                Vec::new(),
            );
            return Ok(Transition::Change(FINISH));
        }

        let picked = self.console.choose("Select the service port:", &service.ports, |p| {
            let name = if p.name.is_empty() { "<unnamed>" } else { &p.name };
            format!("{name}:{} -> {}", p.port, p.target)
        })?;
        self.session.select_service_port(service.ports[picked].clone());
        Ok(Transition::Change(RESOLVE_CONTROLLER))
    }

    pub(super) async fn resolve_controller(&mut self) -> Result<Transition> {
        let namespace = self.session.require_namespace()?.to_string();
        let service = self.session.require_service()?.clone();
        let controllers = self.gateway()?.list_controllers(&namespace).await?;

        let controller = match resolve::resolve_controller(&service, &controllers) {
            Ok(controller) => controller.clone(),
            Err(Error::Ambiguous {
                name, candidates, ..
            }) => {
                self.console
                    .say(format!("More than one controller matches {name}."))?;
                let picked = self.console.choose(
                    "Which controller backs the service?",
                    &candidates,
                    |c| c.clone(),
                )?;
                controllers
                    .iter()
                    .find(|c| c.name == candidates[picked])
                    .cloned()
                    .ok_or_else(|| Error::not_found("controller", candidates[picked].clone()))?
            }
            Err(e) => return Err(e),
        };

        self.console.say(format!(
            "Service {} is backed by controller {}.",
            service.name, controller.name
        ))?;
        self.session.controller = Some(controller);
        Ok(Transition::Change(RESOLVE_CONTAINER_PORT))
    }

    pub(super) async fn resolve_container_port(&mut self) -> Result<Transition> {
        let service_port = self.session.require_service_port()?;
        let port = resolve::resolve_container_port(self.session.require_controller()?, service_port)?;

        let message = format!(
            "Service port {} targets container port {port}.",
            service_port.target
        );
        self.console.say(message)?;
        self.session.container_port = Some(port);
        Ok(Transition::Change(RESOLVE_MEMBER_PODS))
    }

    pub(super) async fn resolve_member_pods(&mut self) -> Result<Transition> {
        let controller = self.session.require_controller()?;
        let members: Vec<PodRecord> = resolve::resolve_member_pods(controller, &self.session.pods)
            .into_iter()
            .cloned()
            .collect();
        let controller_name = controller.name.clone();
        let identity = controller.label(IDENTITY_LABEL).unwrap_or("").to_string();

        if members.is_empty() {
            self.console.say(format!(
                "No pods carry {IDENTITY_LABEL}={identity} from controller {controller_name}."
            ))?;
            self.session.record_finding(
                "no-member-pods",
                format!("controller {controller_name} has no member pods"),
                Vec::new(),
            );
        } else {
            self.console.say(format!(
                "Found {} pod(s) behind controller {controller_name}:",
                members.len()
            ))?;
            for pod in &members {
                self.console.say(format!("  {}", pod.name))?;
            }
        }

        self.session.candidates = members;
        Ok(Transition::Change(VALIDATE_CONNECTIVITY))
    }

    pub(super) async fn validate_connectivity(&mut self) -> Result<Transition> {
        let namespace = self.session.require_namespace()?.to_string();
        let port = self.session.require_container_port()?;
        let candidates = self.session.candidates.clone();

        if candidates.is_empty() {
            self.console.say("There are no pods to probe.")?;
            return Ok(Transition::Change(FINISH));
        }

        let validator =
            TunnelValidator::new(self.connection()?.tunnels.clone(), self.settings.probe.clone())?;
        self.console.say(format!(
            "Probing {} pod(s) on container port {port} at {}...",
            candidates.len(),
            self.settings.probe.path
        ))?;

        let outcomes = validator.validate(&namespace, &candidates, port).await?;
        for outcome in &outcomes {
            let line = match &outcome.detail {
                _ if outcome.reachable => format!(
                    "{}: reachable (HTTP {})",
                    outcome.pod,
                    outcome.status.unwrap_or_default()
                ),
                Some(detail) => format!("{}: unreachable, {detail}", outcome.pod),
                None => format!("{}: unreachable", outcome.pod),
            };
            self.console.say(line)?;
        }

        self.session.outcomes = outcomes;
        Ok(Transition::Change(FINISH))
    }

    pub(super) async fn finish(&mut self) -> Result<Transition> {
        self.console.blank()?;
        if self.session.findings.is_empty() {
            self.console.say("No problems were found before the probe.")?;
        } else {
            self.console.say("Findings:")?;
            for finding in &self.session.findings {
                let pods = if finding.pods.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", finding.pods.join(", "))
                };
                self.console
                    .say(format!("  - [{}] {}{pods}", finding.check, finding.summary))?;
            }
        }

        if !self.session.outcomes.is_empty() {
            let reachable = self.session.outcomes.iter().filter(|o| o.reachable).count();
            self.console.say(format!(
                "{reachable} of {} pod(s) answered the probe.",
                self.session.outcomes.len()
            ))?;
        }

        if self.settings.json {
            let report = self.report_json()?;
            self.console.say(report)?;
        }

        self.console.say("See ya!")?;
        Ok(Transition::Stay)
    }
}
