//! Command execution on local and remote hosts
//!
//! Every storage primitive is an external command issued on some host. Local
//! commands are spawned directly, commands for any other host are handed to a
//! transport program (`ssh` by default) as `<transport> <host> <command...>`.
//!
//! Two shapes are supported:
//! - a single command whose stdout is collected line by line
//! - a two-stage pipe where the sender's stdout feeds the receiver's stdin,
//!   possibly on different hosts
//!
//! Commands are tagged with an [`Effect`]. In dry-run mode mutating commands are
//! logged and skipped while read-only commands still run, so planning behaves
//! the same way with and without dry-run.

use std::process::Stdio;

use tracing::instrument;

use crate::config::RunnerConfig;

/// Name of the host that runs commands without transport
pub const LOCALHOST: &str = "localhost";

/// A host commands are issued on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Host(String);

impl Host {
    #[must_use]
    pub fn local() -> Self {
        Self(LOCALHOST.to_string())
    }

    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Host from an optional name, an absent name meaning the local host
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        name.map_or_else(Self::local, Self::new)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0 == LOCALHOST
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a command changes state on its host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Runs even in dry-run mode
    ReadOnly,
    /// Skipped in dry-run mode
    Mutating,
}

/// A program with arguments, bound to the host it runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub host: Host,
    pub program: String,
    pub args: Vec<String>,
}

impl HostCommand {
    pub fn new<I, S>(host: Host, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            host,
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Program and arguments as they are spawned locally
    ///
    /// Remote commands become arguments of the transport. The remote side
    /// re-parses them with a shell, so each one is quoted.
    #[must_use]
    pub fn to_argv(&self, transport: &str) -> (String, Vec<String>) {
        if self.host.is_local() {
            return (self.program.clone(), self.args.clone());
        }
        let mut args = Vec::with_capacity(self.args.len() + 2);
        args.push(self.host.name().to_string());
        args.push(shell_quote(&self.program));
        args.extend(self.args.iter().map(|arg| shell_quote(arg)));
        (transport.to_string(), args)
    }

    /// The command line as the operator would type it
    #[must_use]
    pub fn display(&self, transport: &str) -> String {
        let (program, args) = self.to_argv(transport);
        std::iter::once(&program)
            .chain(args.iter())
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c)
}

/// Quote a word for a POSIX shell, leaving plain words untouched
#[must_use]
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_shell_safe) {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn format_status(status: &Option<i32>) -> String {
    match *status {
        Some(code) => code.to_string(),
        None => "on a signal".to_string(),
    }
}

/// Failure of an external command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to start \"{command}\": {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command \"{command}\" exited {}", format_status(.status))]
    Exit {
        command: String,
        status: Option<i32>,
    },
    #[error("failed waiting for \"{command}\": {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    /// Exit status of the failed command, if it exited on its own
    #[must_use]
    pub fn status(&self) -> Option<i32> {
        match self {
            CommandError::Exit { status, .. } => *status,
            CommandError::Spawn { .. } | CommandError::Io { .. } => None,
        }
    }

    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { command, .. }
            | CommandError::Exit { command, .. }
            | CommandError::Io { command, .. } => command,
        }
    }
}

/// Executes commands on behalf of the sync logic
pub trait CommandRunner {
    /// Run a single command and return its stdout, one entry per non-empty line
    fn run(
        &self,
        command: &HostCommand,
        effect: Effect,
    ) -> impl std::future::Future<Output = Result<Vec<String>, CommandError>> + Send;

    /// Run `sender | receiver`, failing if either side exits nonzero
    fn run_piped(
        &self,
        sender: &HostCommand,
        receiver: &HostCommand,
        effect: Effect,
    ) -> impl std::future::Future<Output = Result<(), CommandError>> + Send;
}

/// Runs commands as child processes, remote ones through the transport
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    config: RunnerConfig,
}

impl ShellRunner {
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn skipped(&self, effect: Effect, shown: &str) -> bool {
        if self.config.dry_run && effect == Effect::Mutating {
            tracing::debug!("    would execute \"{shown}\"");
            return true;
        }
        tracing::debug!("    executing \"{shown}\"");
        false
    }

    fn process(&self, command: &HostCommand) -> tokio::process::Command {
        let (program, args) = command.to_argv(&self.config.transport);
        let mut process = tokio::process::Command::new(program);
        process.args(args).kill_on_drop(true);
        process
    }
}

impl CommandRunner for ShellRunner {
    #[instrument(skip(self))]
    async fn run(
        &self,
        command: &HostCommand,
        effect: Effect,
    ) -> Result<Vec<String>, CommandError> {
        let display = command.display(&self.config.transport);
        if self.skipped(effect, &display) {
            return Ok(vec![]);
        }
        let output = self
            .process(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|source| CommandError::Spawn {
                command: display.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(CommandError::Exit {
                command: display,
                status: output.status.code(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    #[instrument(skip(self))]
    async fn run_piped(
        &self,
        sender: &HostCommand,
        receiver: &HostCommand,
        effect: Effect,
    ) -> Result<(), CommandError> {
        let sender_display = sender.display(&self.config.transport);
        let receiver_display = receiver.display(&self.config.transport);
        if self.skipped(effect, &format!("{sender_display} | {receiver_display}")) {
            return Ok(());
        }
        let mut sender_child = self
            .process(sender)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: sender_display.clone(),
                source,
            })?;
        let pipe: Stdio = sender_child
            .stdout
            .take()
            .ok_or_else(|| CommandError::Io {
                command: sender_display.clone(),
                source: std::io::Error::other("stdout was not captured"),
            })?
            .try_into()
            .map_err(|source| CommandError::Io {
                command: sender_display.clone(),
                source,
            })?;
        // on error the sender is dropped, which kills it
        let receiver_child = self
            .process(receiver)
            .stdin(pipe)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                command: receiver_display.clone(),
                source,
            })?;
        supervise(vec![
            (sender_display, sender_child),
            (receiver_display, receiver_child),
        ])
        .await
    }
}

enum LegOutcome {
    Succeeded,
    Failed(CommandError),
    Terminated,
}

async fn wait_leg(
    command: String,
    mut child: tokio::process::Child,
    cancel: tokio_util::sync::CancellationToken,
) -> LegOutcome {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) if status.success() => LegOutcome::Succeeded,
            Ok(status) => LegOutcome::Failed(CommandError::Exit {
                command,
                status: status.code(),
            }),
            Err(source) => LegOutcome::Failed(CommandError::Io { command, source }),
        },
        () = cancel.cancelled() => {
            tracing::debug!("    terminating \"{command}\"");
            if let Err(error) = child.kill().await {
                tracing::warn!("failed to terminate \"{command}\": {error}");
            }
            LegOutcome::Terminated
        }
    }
}

/// Wait for all legs of a pipe; the first failure terminates the others
async fn supervise(legs: Vec<(String, tokio::process::Child)>) -> Result<(), CommandError> {
    let cancel = tokio_util::sync::CancellationToken::new();
    let (outcome_tx, mut outcome_rx) = tokio::sync::mpsc::channel(legs.len().max(1));
    let mut join_set = tokio::task::JoinSet::new();
    for (command, child) in legs {
        let outcome_tx = outcome_tx.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let outcome = wait_leg(command, child, cancel).await;
            // the supervisor outlives every leg
            let _ = outcome_tx.send(outcome).await;
        });
    }
    drop(outcome_tx);
    let mut first_error = None;
    while let Some(outcome) = outcome_rx.recv().await {
        match outcome {
            LegOutcome::Succeeded | LegOutcome::Terminated => {}
            LegOutcome::Failed(error) => {
                if first_error.is_none() {
                    tracing::debug!("pipe leg failed: {error}");
                    cancel.cancel();
                    first_error = Some(error);
                }
            }
        }
    }
    while let Some(res) = join_set.join_next().await {
        if let Err(error) = res {
            tracing::error!("pipe supervisor task failed: {error}");
            if first_error.is_none() {
                cancel.cancel();
                first_error = Some(CommandError::Io {
                    command: "pipe".to_string(),
                    source: std::io::Error::other(error),
                });
            }
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}
