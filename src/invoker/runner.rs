//! Out-of-process fallback: the `juju` command line client.
//! The account secret is written to the child's stdin and never placed in the
//! argument vector or the logs.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::remote::RemoteError;
use crate::session::ConnectTarget;

/// Which target flag the command gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliScope {
    /// `-m controller:model` for model sessions, `-c controller` otherwise.
    Session,
    /// Always `-c controller`.
    Controller,
    /// The arguments already name the target (`destroy-model ctrl:model`).
    Explicit,
    /// Acts on the client itself (`bootstrap`): no login and no target flag.
    Local,
}

#[derive(Clone)]
pub struct ProcessInvocation {
    pub args: Vec<String>,
    pub target: ConnectTarget,
    pub scope: CliScope,
    pub account: String,
    pub secret: String,
    /// Written to stdin in place of the secret (`change-user-password` prompts).
    pub input: Option<String>,
    pub json: bool,
}

impl ProcessInvocation {
    /// Full argument vector for the command itself (login excluded).
    pub fn command_line(&self) -> Vec<String> {
        let mut argv = self.args.clone();
        match (self.scope, &self.target.model) {
            (CliScope::Explicit | CliScope::Local, _) => {}
            (CliScope::Session, Some(_)) => {
                argv.push("-m".into());
                argv.push(self.target.label());
            }
            _ => {
                argv.push("-c".into());
                argv.push(self.target.controller.clone());
            }
        }
        if self.json {
            argv.push("--format".into());
            argv.push("json".into());
        }
        argv
    }
}

impl fmt::Debug for ProcessInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessInvocation")
            .field("argv", &self.command_line())
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command as `inv.account` and return its standard output.
    async fn run(&self, inv: &ProcessInvocation) -> Result<String, RemoteError>;
}

pub struct JujuCli {
    binary: String,
    timeout: Duration,
}

struct Finished {
    ok: bool,
    stdout: String,
    stderr: String,
}

impl JujuCli {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self { binary: binary.into(), timeout }
    }

    async fn exec(&self, argv: &[String], secret: Option<&str>) -> Result<Finished, RemoteError> {
        let mut command = Command::new(&self.binary);
        command.args(argv);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| RemoteError::Transport(format!("failed to start {}: {}", self.binary, e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Some(s) = secret {
                // commands that never prompt may exit before reading stdin
                if let Err(e) = stdin.write_all(format!("{}\n", s).as_bytes()).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(RemoteError::Transport(format!("writing secret to {}: {}", self.binary, e)));
                    }
                }
            }
        }
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout(format!("{} {} after {:?}", self.binary, argv.first().map(String::as_str).unwrap_or(""), self.timeout)))?
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        debug!(target: "sojobo::invoker", args = ?argv, exit_code = output.status.code().unwrap_or(-1), "command executed");
        Ok(Finished {
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl CommandRunner for JujuCli {
    async fn run(&self, inv: &ProcessInvocation) -> Result<String, RemoteError> {
        if inv.scope != CliScope::Local {
            let login = vec!["login".to_string(), inv.account.clone(), "-c".to_string(), inv.target.controller.clone()];
            let done = self.exec(&login, Some(&inv.secret)).await?;
            if !done.ok {
                // a refused login is a credential problem; anything else keeps its class
                return Err(match classify_cli_failure(&done.stderr) {
                    RemoteError::AuthFault(m) => RemoteError::StaleCredential(m),
                    other => other,
                });
            }
        }
        let stdin = inv.input.as_deref().unwrap_or(&inv.secret);
        let done = self.exec(&inv.command_line(), Some(stdin)).await?;
        if done.ok { Ok(done.stdout) } else { Err(classify_cli_failure(&done.stderr)) }
    }
}

const UNREACHABLE: [&str; 6] =
    ["cannot connect", "dial tcp", "connection refused", "no route to host", "i/o timeout", "connection reset"];

/// Map the client's diagnostic text to a failure class.
pub(crate) fn classify_cli_failure(stderr: &str) -> RemoteError {
    let text = stderr.trim().trim_start_matches("ERROR").trim();
    let first = text.lines().next().unwrap_or("command failed").to_string();
    let lower = text.to_ascii_lowercase();
    if lower.contains("invalid entity name or password") || lower.contains("login expired") || lower.contains("not logged in") {
        RemoteError::StaleCredential(first)
    } else if UNREACHABLE.iter().any(|m| lower.contains(m)) {
        RemoteError::Transport(first)
    } else if lower.contains("permission denied") {
        RemoteError::AuthFault(first)
    } else if lower.contains("not found") {
        let kind = lower
            .split_whitespace()
            .next()
            .filter(|w| w.chars().all(|c| c.is_ascii_alphabetic()))
            .unwrap_or("resource")
            .to_string();
        RemoteError::NotFound(kind)
    } else if lower.contains("is not a valid command") || lower.contains("unrecognized command") {
        RemoteError::Unsupported(first)
    } else {
        RemoteError::Failed(first)
    }
}
