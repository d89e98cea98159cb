//! Named-state machine that sequences the troubleshooting steps.
//!
//! A state is data: up to three optional hooks bound to a name. Hooks receive
//! the caller's context explicitly and return the [`Transition`] they want,
//! which the driver loop in [`StateMachine::run`] applies. Every hook failure
//! is funneled through a single pluggable error handler, so retry and abort
//! policy is decided in one place.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

/// Owned, sendable future returned by state hooks and tunnels.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Enter/update hook: runs against the context and requests the next transition.
pub type Hook<C, E> = for<'a> fn(&'a mut C) -> BoxFuture<'a, Result<Transition, E>>;

/// Exit hook: runs against the context before the machine leaves a state.
pub type ExitHook<C, E> = for<'a> fn(&'a mut C) -> BoxFuture<'a, Result<(), E>>;

/// Invoked whenever a hook fails; decides what the machine does next.
pub type ErrorHandler<C, E> = fn(&StateMachine<C, E>, &mut C, &E) -> Transition;

/// Decides whether a hook failure counts toward the retry cap.
pub type FailureFilter<E> = fn(&E) -> bool;

/// What the machine should do after a hook or the error handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Remain in the current state and stop driving.
    Stay,
    /// Run the current state's update hook.
    Update,
    /// Move to the named state.
    Change(&'static str),
    /// Halt the run. From the error handler this surfaces the triggering error.
    Abort,
}

/// Lifecycle hooks of a single named state.
pub struct State<C, E> {
    on_enter: Option<Hook<C, E>>,
    on_update: Option<Hook<C, E>>,
    on_exit: Option<ExitHook<C, E>>,
}

impl<C, E> State<C, E> {
    pub fn new() -> Self {
        Self {
            on_enter: None,
            on_update: None,
            on_exit: None,
        }
    }

    pub fn on_enter(mut self, hook: Hook<C, E>) -> Self {
        self.on_enter = Some(hook);
        self
    }

    pub fn on_update(mut self, hook: Hook<C, E>) -> Self {
        self.on_update = Some(hook);
        self
    }

    pub fn on_exit(mut self, hook: ExitHook<C, E>) -> Self {
        self.on_exit = Some(hook);
        self
    }
}

impl<C, E> Default for State<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, E> Clone for State<C, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, E> Copy for State<C, E> {}

/// Reasons the machine cannot keep driving.
#[derive(Debug, Error)]
pub enum MachineError<E: std::error::Error + 'static> {
    /// A transition named a state that was never registered. This is a
    /// control-flow bug, not a runtime condition.
    #[error("state machine has no state named {0:?}")]
    UnknownState(&'static str),

    /// The same state kept failing past the retry limit.
    #[error("giving up on state {state:?} after {attempts} consecutive failures: {source}")]
    RetriesExhausted {
        state: &'static str,
        attempts: u32,
        #[source]
        source: E,
    },

    /// The error handler chose to abort.
    #[error("state {state:?} aborted: {source}")]
    Aborted {
        state: &'static str,
        #[source]
        source: E,
    },
}

/// Finite state machine with one active state at a time.
pub struct StateMachine<C, E> {
    states: HashMap<&'static str, State<C, E>>,
    current: Option<&'static str>,
    error_handler: ErrorHandler<C, E>,
    counts_toward_limit: FailureFilter<E>,
    max_retries: Option<u32>,
    failures: u32,
}

impl<C, E> StateMachine<C, E>
where
    E: std::error::Error + 'static,
{
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            current: None,
            error_handler: retry_current_state::<C, E>,
            counts_toward_limit: every_failure::<E>,
            max_retries: None,
            failures: 0,
        }
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler<C, E>) -> Self {
        self.error_handler = handler;
        self
    }

    /// Only failures for which `filter` returns true count toward the retry
    /// cap; the rest still go through the error handler.
    pub fn with_failure_filter(mut self, filter: FailureFilter<E>) -> Self {
        self.counts_toward_limit = filter;
        self
    }

    /// Cap on consecutive failures of the same state. `None` retries forever.
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Associates `state` with `name`, replacing any previous registration.
    pub fn register(&mut self, name: &'static str, state: State<C, E>) {
        self.states.insert(name, state);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.states.remove(name).is_some()
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn current(&self) -> Option<&'static str> {
        self.current
    }

    /// Consecutive failures recorded against the current state.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Leaves the current state (running its exit hook) and enters `name`.
    ///
    /// A failing exit hook aborts the transition and leaves the previous state
    /// current. An unregistered `name` is returned as
    /// [`MachineError::UnknownState`].
    pub async fn change(
        &mut self,
        ctx: &mut C,
        name: &'static str,
    ) -> Result<Transition, MachineError<E>> {
        let exit = self
            .current
            .and_then(|current| self.states.get(current))
            .and_then(|state| state.on_exit);
        if let Some(exit) = exit {
            if let Err(err) = exit(ctx).await {
                return self.fail(ctx, err);
            }
        }

        let enter = self
            .states
            .get(name)
            .ok_or(MachineError::UnknownState(name))?
            .on_enter;

        if self.current != Some(name) {
            self.failures = 0;
        }
        log::debug!("fsm: {:?} -> {name:?}", self.current);
        self.current = Some(name);

        match enter {
            Some(enter) => match enter(ctx).await {
                Ok(transition) => Ok(transition),
                Err(err) => self.fail(ctx, err),
            },
            None => Ok(Transition::Stay),
        }
    }

    /// Runs the current state's update hook, if any.
    pub async fn update(&mut self, ctx: &mut C) -> Result<Transition, MachineError<E>> {
        let Some(current) = self.current else {
            log::warn!("fsm: update() called without an active state");
            return Ok(Transition::Stay);
        };

        let update = self.states.get(current).and_then(|state| state.on_update);
        match update {
            Some(update) => match update(ctx).await {
                Ok(transition) => Ok(transition),
                Err(err) => self.fail(ctx, err),
            },
            None => Ok(Transition::Stay),
        }
    }

    /// Enters `start` and keeps applying requested transitions until a state
    /// asks to stay put.
    pub async fn run(&mut self, ctx: &mut C, start: &'static str) -> Result<(), MachineError<E>> {
        let mut next = Transition::Change(start);
        loop {
            next = match next {
                Transition::Change(name) => self.change(ctx, name).await?,
                Transition::Update => self.update(ctx).await?,
                Transition::Stay => return Ok(()),
                Transition::Abort => {
                    log::info!("fsm: halted in state {:?}", self.current);
                    return Ok(());
                }
            };
        }
    }

    fn fail(&mut self, ctx: &mut C, err: E) -> Result<Transition, MachineError<E>> {
        let state = self.current.unwrap_or("<none>");
        if (self.counts_toward_limit)(&err) {
            self.failures += 1;
        }

        // The handler sees every failure, including the one that exhausts the cap
        let handler = self.error_handler;
        let next = handler(self, ctx, &err);
        if next == Transition::Abort {
            return Err(MachineError::Aborted { state, source: err });
        }

        match self.max_retries {
            Some(max) if self.failures > max => Err(MachineError::RetriesExhausted {
                state,
                attempts: self.failures,
                source: err,
            }),
            _ => Ok(next),
        }
    }
}

impl<C, E> Default for StateMachine<C, E>
where
    E: std::error::Error + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, E> fmt::Debug for StateMachine<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.states.keys().collect();
        names.sort();
        f.debug_struct("StateMachine")
            .field("current", &self.current)
            .field("states", &names)
            .field("max_retries", &self.max_retries)
            .field("failures", &self.failures)
            .finish()
    }
}

/// Default handler: log and re-enter whatever state failed.
fn retry_current_state<C, E: std::error::Error + 'static>(
    machine: &StateMachine<C, E>,
    _ctx: &mut C,
    err: &E,
) -> Transition {
    log::error!("fsm: state {:?} failed: {err}", machine.current());
    machine.current().map_or(Transition::Abort, Transition::Change)
}

fn every_failure<E>(_: &E) -> bool {
    true
}
