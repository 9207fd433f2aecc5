//! Dual-path capability execution.
//! Every remote operation is described twice: as a facade call on the live session
//! (`SessionCall`) and as an equivalent CLI command (`ProcessCall`). The invoker tries
//! the session first, switches to the CLI when the session reports the call as
//! unsupported, and refreshes a rejected credential at most once per invocation,
//! whichever path hit it.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::remote::{Phase, RemoteError, RpcRequest};
use crate::session::{ConnectTarget, ConnectionManager, Session};

mod runner;

pub use runner::{CliScope, CommandRunner, JujuCli, ProcessInvocation};

type SessionParser<T> = Box<dyn Fn(Value) -> AppResult<T> + Send + Sync>;
type ProcessParser<T> = Box<dyn Fn(&str) -> AppResult<T> + Send + Sync>;

/// Primary path: one facade request plus the parser for its reply.
pub struct SessionCall<T> {
    pub capability: &'static str,
    pub request: RpcRequest,
    parse: SessionParser<T>,
}

impl<T> SessionCall<T> {
    pub fn new<F>(capability: &'static str, request: RpcRequest, parse: F) -> Self
    where
        F: Fn(Value) -> AppResult<T> + Send + Sync + 'static,
    {
        Self { capability, request, parse: Box::new(parse) }
    }
}

/// Fallback path: CLI arguments (without target or format flags) plus a parser for
/// the command's standard output.
pub struct ProcessCall<T> {
    pub args: Vec<String>,
    pub json: bool,
    pub scope: CliScope,
    input: Option<String>,
    parse: ProcessParser<T>,
}

impl<T: 'static> ProcessCall<T> {
    /// Command run with `--format json`; stdout is parsed before `parse` sees it.
    pub fn json<F>(args: &[&str], parse: F) -> Self
    where
        F: Fn(Value) -> AppResult<T> + Send + Sync + 'static,
    {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
            json: true,
            scope: CliScope::Session,
            input: None,
            parse: Box::new(move |out: &str| {
                let v: Value = if out.trim().is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(out).map_err(|e| AppError::remote(format!("malformed command output: {}", e)))?
                };
                parse(v)
            }),
        }
    }

    /// Command whose output is free text (or ignored).
    pub fn text<F>(args: &[&str], parse: F) -> Self
    where
        F: Fn(&str) -> AppResult<T> + Send + Sync + 'static,
    {
        Self {
            args: args.iter().map(|s| s.to_string()).collect(),
            json: false,
            scope: CliScope::Session,
            input: None,
            parse: Box::new(parse),
        }
    }

    /// Target the controller even when invoked with a model session.
    pub fn controller_scoped(mut self) -> Self {
        self.scope = CliScope::Controller;
        self
    }

    /// No target flag; the arguments name it.
    pub fn explicit_target(mut self) -> Self {
        self.scope = CliScope::Explicit;
        self
    }

    /// Feed `input` to the command's stdin instead of the account secret.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

pub struct CapabilityInvoker<'a> {
    connections: &'a ConnectionManager,
    runner: &'a dyn CommandRunner,
}

impl<'a> CapabilityInvoker<'a> {
    pub fn new(connections: &'a ConnectionManager, runner: &'a dyn CommandRunner) -> Self {
        Self { connections, runner }
    }

    /// Run `primary` on `session`; fall back to `fallback` when the session cannot.
    pub async fn invoke<T, S>(&self, session: &S, primary: SessionCall<T>, fallback: ProcessCall<T>) -> AppResult<T>
    where
        S: Session + ?Sized,
        T: 'static,
    {
        // shared by both paths
        let mut refreshed = false;
        match self.call_session(session, &primary, &mut refreshed).await {
            Err(RemoteError::Unsupported(why)) => {
                info!(target: "sojobo::invoker", "{} unsupported on {} ({}), using command fallback",
                    primary.capability, session.target().label(), why);
            }
            Ok(v) => return (primary.parse)(v),
            Err(e) => return Err(e.classify(Phase::Call)),
        }
        let out = self.call_process(session, &fallback, &mut refreshed).await.map_err(|e| match e {
            // nothing left to fall back to
            RemoteError::Unsupported(m) => AppError::remote(m),
            other => other.classify(Phase::Call),
        })?;
        (fallback.parse)(&out)
    }

    /// Run a client-side command (`bootstrap`, `show-controller`) that needs no
    /// session. It runs as the administrator and is not retried.
    pub async fn run_local<T: 'static>(&self, target: ConnectTarget, call: ProcessCall<T>) -> AppResult<T> {
        let admin = self.connections.administrator();
        let inv = ProcessInvocation {
            args: call.args.clone(),
            target,
            scope: CliScope::Local,
            account: admin.account().to_string(),
            secret: admin.secret().to_string(),
            input: call.input.clone(),
            json: call.json,
        };
        debug!(target: "sojobo::invoker", "local {:?}", inv);
        let out = self.runner.run(&inv).await.map_err(|e| match e {
            RemoteError::Unsupported(m) => AppError::remote(m),
            other => other.classify(Phase::Call),
        })?;
        (call.parse)(&out)
    }

    async fn call_session<T, S>(&self, session: &S, call: &SessionCall<T>, refreshed: &mut bool) -> Result<Value, RemoteError>
    where
        S: Session + ?Sized,
    {
        loop {
            debug!(target: "sojobo::invoker", "{} via session {}", call.request, session.target().label());
            match session.live().call(&call.request, self.connections.call_timeout()).await {
                Err(RemoteError::StaleCredential(m)) if !*refreshed => {
                    warn!(target: "sojobo::invoker", "{}: {}; refreshing credential and retrying once", call.capability, m);
                    *refreshed = true;
                    self.refresh(session).await?;
                }
                other => return other,
            }
        }
    }

    async fn call_process<T, S>(&self, session: &S, call: &ProcessCall<T>, refreshed: &mut bool) -> Result<String, RemoteError>
    where
        S: Session + ?Sized,
    {
        loop {
            let cred = session
                .live()
                .credential()
                .await
                .ok_or_else(|| RemoteError::Transport(format!("session {} is not open", session.target().label())))?;
            let inv = ProcessInvocation {
                args: call.args.clone(),
                target: session.target().clone(),
                scope: call.scope,
                account: cred.account,
                secret: cred.secret,
                input: call.input.clone(),
                json: call.json,
            };
            debug!(target: "sojobo::invoker", "fallback {:?}", inv);
            match self.runner.run(&inv).await {
                Err(RemoteError::StaleCredential(m)) if !*refreshed => {
                    warn!(target: "sojobo::invoker", "command fallback rejected credential ({}); refreshing and retrying once", m);
                    *refreshed = true;
                    self.refresh(session).await?;
                }
                other => return other,
            }
        }
    }

    async fn refresh<S: Session + ?Sized>(&self, session: &S) -> Result<(), RemoteError> {
        self.connections.reauthenticate(session).await.map_err(|e| match e {
            AppError::Unauthorized { message } => RemoteError::StaleCredential(message),
            other => RemoteError::Transport(other.to_string()),
        })
    }
}
