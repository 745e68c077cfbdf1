//! In-memory stand-in for the storage engine on any number of hosts

use std::collections::BTreeMap;
use std::sync::Mutex;

use common::{CommandError, CommandRunner, Effect, HostCommand};

#[derive(Debug, Default)]
struct HostState {
    datasets: Vec<String>,
    snapshots: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    hosts: BTreeMap<String, HostState>,
    failures: Vec<String>,
    dry_run: bool,
    executed: Vec<String>,
    skipped: Vec<String>,
}

/// Answers `zfs list`, `zfs snapshot` and `zfs send | zfs recv` from memory
///
/// Commands are recorded as `<host>: <program> <args>`, pipes as both legs
/// joined by ` | `. Snapshot listings keep insertion order.
#[derive(Debug, Default)]
pub(crate) struct FakeZfs {
    state: Mutex<State>,
}

fn describe(command: &HostCommand) -> String {
    format!(
        "{}: {} {}",
        command.host,
        command.program,
        command.args.join(" ")
    )
}

fn exit(command: &str, status: i32) -> CommandError {
    CommandError::Exit {
        command: command.to_string(),
        status: Some(status),
    }
}

fn ids_of<'a>(snapshots: &'a [String], dataset: &str) -> impl Iterator<Item = &'a str> {
    let prefix = format!("{dataset}@");
    snapshots
        .iter()
        .filter_map(move |name| name.strip_prefix(prefix.as_str()))
}

impl FakeZfs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn with_datasets(self, host: &str, names: &[&str]) -> Self {
        self.state()
            .hosts
            .entry(host.to_string())
            .or_default()
            .datasets
            .extend(names.iter().map(|name| name.to_string()));
        self
    }

    pub(crate) fn with_snapshots(self, host: &str, names: &[&str]) -> Self {
        self.state()
            .hosts
            .entry(host.to_string())
            .or_default()
            .snapshots
            .extend(names.iter().map(|name| name.to_string()));
        self
    }

    /// Fail every command whose description contains `pattern`, with status 1
    pub(crate) fn fail_on(self, pattern: &str) -> Self {
        self.state().failures.push(pattern.to_string());
        self
    }

    pub(crate) fn dry_run(self) -> Self {
        self.state().dry_run = true;
        self
    }

    /// Every command that ran, in order
    pub(crate) fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Mutating commands skipped in dry-run mode
    pub(crate) fn skipped(&self) -> Vec<String> {
        self.state().skipped.clone()
    }

    /// Pipes that ran, in order
    pub(crate) fn transfers(&self) -> Vec<String> {
        self.state()
            .executed
            .iter()
            .filter(|command| command.contains(" | "))
            .cloned()
            .collect()
    }

    /// Current snapshot identifiers of `dataset` on `host`
    pub(crate) fn snapshot_ids(&self, host: &str, dataset: &str) -> Vec<String> {
        self.state()
            .hosts
            .get(host)
            .map(|state| ids_of(&state.snapshots, dataset).map(str::to_string).collect())
            .unwrap_or_default()
    }
}

impl State {
    /// Records the command, returning false if dry-run skips it
    fn admit(&mut self, description: &str, effect: Effect) -> bool {
        if self.dry_run && effect == Effect::Mutating {
            self.skipped.push(description.to_string());
            return false;
        }
        self.executed.push(description.to_string());
        true
    }

    fn check_failure(&self, description: &str) -> Result<(), CommandError> {
        if self
            .failures
            .iter()
            .any(|pattern| description.contains(pattern.as_str()))
        {
            return Err(exit(description, 1));
        }
        Ok(())
    }

    fn run(&mut self, command: &HostCommand) -> Result<Vec<String>, CommandError> {
        let description = describe(command);
        let host = self.hosts.entry(command.host.to_string()).or_default();
        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["list", "-H", "-o", "name"] => Ok(host.datasets.clone()),
            ["list", "-H", "-t", "snapshot", "-o", "name"] => Ok(host.snapshots.clone()),
            ["snapshot", name] => {
                if host.snapshots.iter().any(|existing| existing.as_str() == *name) {
                    return Err(exit(&description, 1));
                }
                host.snapshots.push((*name).to_string());
                Ok(vec![])
            }
            _ => Err(exit(&description, 2)),
        }
    }

    fn transfer(&mut self, sender: &HostCommand, receiver: &HostCommand) -> Result<(), CommandError> {
        let sender_description = describe(sender);
        let receiver_description = describe(receiver);
        let send_args: Vec<&str> = sender.args.iter().map(String::as_str).collect();
        let (from, snapshot) = match send_args.as_slice() {
            ["send", "-p", "-I", from, snapshot] => {
                (from.strip_prefix('@').map(str::to_string), *snapshot)
            }
            ["send", "-p", snapshot] => (None, *snapshot),
            _ => return Err(exit(&sender_description, 2)),
        };
        let Some((source, to)) = snapshot.split_once('@') else {
            return Err(exit(&sender_description, 2));
        };
        let destination = match receiver.args.as_slice() {
            [recv, force, destination] if recv == "recv" && force == "-F" => destination.clone(),
            _ => return Err(exit(&receiver_description, 2)),
        };
        let source_ids: Vec<String> = self
            .hosts
            .get(sender.host.name())
            .map(|state| ids_of(&state.snapshots, source).map(str::to_string).collect())
            .unwrap_or_default();
        let Some(to_index) = source_ids.iter().position(|id| id == to) else {
            return Err(exit(&sender_description, 1));
        };
        let target = self.hosts.entry(receiver.host.to_string()).or_default();
        let prefix = format!("{destination}@");
        let sent = match from {
            None => {
                target.snapshots.retain(|name| !name.starts_with(&prefix));
                if !target.datasets.contains(&destination) {
                    target.datasets.push(destination.clone());
                }
                &source_ids[to_index..=to_index]
            }
            Some(from) => {
                let from_index = source_ids
                    .iter()
                    .position(|id| *id == from)
                    .ok_or_else(|| exit(&sender_description, 1))?;
                let base = format!("{destination}@{from}");
                let base_position = target
                    .snapshots
                    .iter()
                    .position(|name| *name == base)
                    .ok_or_else(|| exit(&receiver_description, 1))?;
                // recv -F rolls back to the incremental source
                let newer: Vec<String> = target.snapshots[base_position + 1..]
                    .iter()
                    .filter(|name| name.starts_with(&prefix))
                    .cloned()
                    .collect();
                target.snapshots.retain(|name| !newer.contains(name));
                &source_ids[from_index + 1..=to_index]
            }
        };
        target
            .snapshots
            .extend(sent.iter().map(|id| format!("{destination}@{id}")));
        Ok(())
    }
}

impl CommandRunner for FakeZfs {
    async fn run(&self, command: &HostCommand, effect: Effect) -> Result<Vec<String>, CommandError> {
        let description = describe(command);
        let mut state = self.state();
        if !state.admit(&description, effect) {
            return Ok(vec![]);
        }
        state.check_failure(&description)?;
        state.run(command)
    }

    async fn run_piped(
        &self,
        sender: &HostCommand,
        receiver: &HostCommand,
        effect: Effect,
    ) -> Result<(), CommandError> {
        let sender_description = describe(sender);
        let receiver_description = describe(receiver);
        let mut state = self.state();
        if !state.admit(&format!("{sender_description} | {receiver_description}"), effect) {
            return Ok(());
        }
        state.check_failure(&sender_description)?;
        state.check_failure(&receiver_description)?;
        state.transfer(sender, receiver)
    }
}
