//! The troubleshooting script: one state per step, driven by [`StateMachine`].
//!
//! [`Diagnostics`] is the context every step receives. It owns the
//! [`Session`], the operator console and the cluster connection once one has
//! been acquired.

pub mod checks;
mod steps;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cluster::{ClusterGateway, Connection, Connector};
use crate::config::Settings;
use crate::console::Console;
use crate::error::{Error, ErrorClass, Result};
use crate::fsm::{BoxFuture, MachineError, State, StateMachine, Transition};
use crate::models::k8s::ClusterContext;
use crate::session::Session;

pub const WELCOME: &str = "welcome";
pub const ACQUIRE_CONNECTION: &str = "acquire-connection";
pub const SELECT_NAMESPACE: &str = "select-namespace";
pub const FETCH_PODS: &str = "fetch-pods";
pub const CHECK_PENDING: &str = "check-pending";
pub const CHECK_RUNNING: &str = "check-running";
pub const CHECK_READY: &str = "check-ready";
pub const SELECT_SERVICE: &str = "select-service";
pub const SELECT_SERVICE_PORT: &str = "select-service-port";
pub const RESOLVE_CONTROLLER: &str = "resolve-controller";
pub const RESOLVE_CONTAINER_PORT: &str = "resolve-container-port";
pub const RESOLVE_MEMBER_PODS: &str = "resolve-member-pods";
pub const VALIDATE_CONNECTIVITY: &str = "validate-connectivity";
pub const FINISH: &str = "finish";

/// Context handed to every step.
pub struct Diagnostics {
    session: Session,
    console: Console,
    connector: Arc<dyn Connector>,
    connection: Option<Connection>,
    settings: Settings,
}

/// JSON document printed at the end of a run with `--json`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    generated_at: DateTime<Utc>,
    context: Option<&'a ClusterContext>,
    session: &'a Session,
}

impl Diagnostics {
    pub fn new(connector: Arc<dyn Connector>, console: Console, settings: Settings) -> Self {
        Self {
            session: Session::default(),
            console,
            connector,
            connection: None,
            settings,
        }
    }

    /// Starts from an existing connection and session, e.g. to run a single
    /// step in isolation.
    pub fn with_connection(mut self, connection: Connection, session: Session) -> Self {
        self.connection = Some(connection);
        self.session = session;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// The machine with every step registered.
    pub fn machine(&self) -> StateMachine<Diagnostics, Error> {
        let mut machine = StateMachine::new()
            .with_error_handler(report_and_retry)
            .with_failure_filter(counts_toward_limit)
            .with_max_retries(self.settings.max_retries);

        machine.register(WELCOME, State::new().on_enter(welcome));
        machine.register(
            ACQUIRE_CONNECTION,
            State::new()
                .on_enter(prompt_for_kubeconfig)
                .on_update(connect),
        );
        machine.register(SELECT_NAMESPACE, State::new().on_enter(select_namespace));
        machine.register(FETCH_PODS, State::new().on_enter(fetch_pods));
        machine.register(CHECK_PENDING, State::new().on_enter(check_pending));
        machine.register(CHECK_RUNNING, State::new().on_enter(check_running));
        machine.register(CHECK_READY, State::new().on_enter(check_ready));
        machine.register(SELECT_SERVICE, State::new().on_enter(select_service));
        machine.register(SELECT_SERVICE_PORT, State::new().on_enter(select_service_port));
        machine.register(RESOLVE_CONTROLLER, State::new().on_enter(resolve_controller));
        machine.register(
            RESOLVE_CONTAINER_PORT,
            State::new().on_enter(resolve_container_port),
        );
        machine.register(RESOLVE_MEMBER_PODS, State::new().on_enter(resolve_member_pods));
        machine.register(
            VALIDATE_CONNECTIVITY,
            State::new().on_enter(validate_connectivity),
        );
        machine.register(FINISH, State::new().on_enter(finish));
        machine
    }

    /// Walks the whole script and hands back what was gathered.
    pub async fn run(mut self) -> std::result::Result<Session, MachineError<Error>> {
        let mut machine = self.machine();
        machine.run(&mut self, WELCOME).await?;
        Ok(self.session)
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or(Error::NotConnected)
    }

    fn gateway(&self) -> Result<Arc<dyn ClusterGateway>> {
        Ok(self.connection()?.gateway.clone())
    }

    fn report_json(&self) -> Result<String> {
        let report = Report {
            generated_at: Utc::now(),
            context: self.connection.as_ref().and_then(|c| c.context.as_ref()),
            session: &self.session,
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }
}

/// Tells the operator what went wrong, then re-enters the failing step unless
/// the error leaves nothing to retry.
fn report_and_retry(
    machine: &StateMachine<Diagnostics, Error>,
    d: &mut Diagnostics,
    err: &Error,
) -> Transition {
    log::debug!("step {:?} failed ({:?}): {err}", machine.current(), err.class());

    let shown = d
        .console
        .say("An error occurred when troubleshooting your workload.")
        .and_then(|_| d.console.say(err));
    if let Err(e) = shown {
        log::error!("cannot report error to the terminal: {e}");
        return Transition::Abort;
    }

    match err.class() {
        ErrorClass::Fatal => Transition::Abort,
        _ => machine.current().map_or(Transition::Abort, Transition::Change),
    }
}

/// A mistyped answer is re-prompted as often as it takes.
fn counts_toward_limit(err: &Error) -> bool {
    err.class() != ErrorClass::Input
}

macro_rules! step_hooks {
    ($($step:ident),* $(,)?) => {
        $(
            fn $step(d: &mut Diagnostics) -> BoxFuture<'_, Result<Transition>> {
                Box::pin(d.$step())
            }
        )*
    };
}

step_hooks!(
    welcome,
    prompt_for_kubeconfig,
    connect,
    select_namespace,
    fetch_pods,
    check_pending,
    check_running,
    check_ready,
    select_service,
    select_service_port,
    resolve_controller,
    resolve_container_port,
    resolve_member_pods,
    validate_connectivity,
    finish,
);
