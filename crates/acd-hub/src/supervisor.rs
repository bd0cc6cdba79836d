use std::{
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use thiserror::Error;
use tokio::{
    process::{Child, Command},
    sync::oneshot,
};
use tracing::{debug, info, warn};

const COMPANION_DIR: &str = "agent_companion_cli";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl AgentCommand {
    /// The companion CLI run from its own virtualenv:
    /// `<base>/agent_companion_cli/.venv/bin/python -m agent_companion_cli start`.
    pub fn companion_cli(base: &Path) -> Self {
        let cli_dir = base.join(COMPANION_DIR);
        Self {
            program: cli_dir.join(".venv").join("bin").join("python"),
            args: vec![
                "-m".to_string(),
                COMPANION_DIR.to_string(),
                "start".to_string(),
            ],
            cwd: Some(cli_dir),
        }
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        // Own process group: a Ctrl-C aimed at the hub must not take the agent down.
        #[cfg(unix)]
        command.process_group(0);
        command
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("agent already running (pid {pid})")]
    AlreadyRunning { pid: u32 },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Signalled { pid: u32 },
    NotManaged,
}

struct ManagedAgent {
    generation: u64,
    pid: u32,
    kill_tx: oneshot::Sender<()>,
}

type Slot = Arc<Mutex<Option<ManagedAgent>>>;

/// Owns the single agent process this hub may have launched.
///
/// The slot holds at most one child. It is filled by `start`, emptied by
/// `stop`, and emptied by the child's reaper task when the child exits on
/// its own. The lock is never held across an await point.
pub struct Supervisor {
    command: AgentCommand,
    slot: Slot,
    generations: AtomicU64,
}

impl Supervisor {
    pub fn new(command: AgentCommand) -> Self {
        Self {
            command,
            slot: Arc::new(Mutex::new(None)),
            generations: AtomicU64::new(0),
        }
    }

    pub fn command(&self) -> &AgentCommand {
        &self.command
    }

    /// Launches the agent and returns its pid without waiting for it to
    /// become ready. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<u32, SupervisorError> {
        let mut slot = lock(&self.slot);
        if let Some(agent) = slot.as_ref() {
            return Err(SupervisorError::AlreadyRunning { pid: agent.pid });
        }

        let child = self
            .command
            .build()
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: self.command.program.display().to_string(),
                source,
            })?;
        let pid = child.id().unwrap_or_default();
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (kill_tx, kill_rx) = oneshot::channel();
        *slot = Some(ManagedAgent {
            generation,
            pid,
            kill_tx,
        });
        drop(slot);

        tokio::spawn(reap(child, pid, generation, kill_rx, Arc::clone(&self.slot)));
        info!(
            event = "agent_start",
            pid,
            program = %self.command.program.display()
        );
        Ok(pid)
    }

    /// Sends the managed agent a termination signal (SIGTERM on unix) and
    /// forgets it. Does not wait for the process to exit.
    pub fn stop(&self) -> StopOutcome {
        let Some(agent) = lock(&self.slot).take() else {
            debug!(event = "agent_stop_unmanaged");
            return StopOutcome::NotManaged;
        };
        if agent.kill_tx.send(()).is_err() {
            debug!(event = "agent_stop_after_exit", pid = agent.pid);
        }
        info!(event = "agent_stop", pid = agent.pid);
        StopOutcome::Signalled { pid: agent.pid }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.slot).is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.slot).as_ref().map(|agent| agent.pid)
    }
}

async fn reap(
    mut child: Child,
    pid: u32,
    generation: u64,
    kill_rx: oneshot::Receiver<()>,
    slot: Slot,
) {
    let kill_requested = tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => info!(event = "agent_exit", pid, code = ?status.code()),
                Err(err) => warn!(event = "agent_wait_error", pid, error = %err),
            }
            let mut slot = lock(&slot);
            if slot.as_ref().is_some_and(|agent| agent.generation == generation) {
                *slot = None;
            }
            return;
        }
        signal = kill_rx => signal.is_ok(),
    };

    if kill_requested {
        terminate(&mut child, pid);
    }
    match child.wait().await {
        Ok(status) => debug!(event = "agent_reaped", pid, code = ?status.code()),
        Err(err) => warn!(event = "agent_wait_error", pid, error = %err),
    }
}

/// SIGTERM on unix so the agent can flush its state; a hard kill elsewhere,
/// or when the signal cannot be delivered.
fn terminate(child: &mut Child, pid: u32) {
    #[cfg(unix)]
    {
        use nix::{
            sys::signal::{kill, Signal},
            unistd::Pid,
        };
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => match kill(Pid::from_raw(raw), Signal::SIGTERM) {
                Ok(()) => return,
                Err(err) => warn!(event = "agent_term_error", pid, error = %err),
            },
            _ => {}
        }
    }
    if let Err(err) = child.start_kill() {
        warn!(event = "agent_kill_error", pid, error = %err);
    }
}

fn lock(slot: &Mutex<Option<ManagedAgent>>) -> MutexGuard<'_, Option<ManagedAgent>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> AgentCommand {
        AgentCommand {
            program: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
            cwd: None,
        }
    }

    async fn wait_until_stopped(supervisor: &Supervisor) {
        for _ in 0..250 {
            if !supervisor.is_running() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("agent slot was never cleared");
    }

    #[test]
    fn companion_cli_runs_module_from_its_venv() {
        let command = AgentCommand::companion_cli(Path::new("/srv/app"));
        assert_eq!(
            command.program,
            PathBuf::from("/srv/app/agent_companion_cli/.venv/bin/python")
        );
        assert_eq!(command.args, vec!["-m", "agent_companion_cli", "start"]);
        assert_eq!(
            command.cwd,
            Some(PathBuf::from("/srv/app/agent_companion_cli"))
        );
    }

    #[tokio::test]
    async fn repeated_start_keeps_first_handle() {
        let supervisor = Supervisor::new(sleeper());
        let pid = supervisor.start().expect("first start");
        assert!(supervisor.is_running());

        for _ in 0..3 {
            match supervisor.start() {
                Err(SupervisorError::AlreadyRunning { pid: running }) => assert_eq!(running, pid),
                other => panic!("expected AlreadyRunning, got {other:?}"),
            }
        }
        assert_eq!(supervisor.pid(), Some(pid));

        assert_eq!(supervisor.stop(), StopOutcome::Signalled { pid });
    }

    #[tokio::test]
    async fn stop_clears_slot_and_allows_restart() {
        let supervisor = Supervisor::new(sleeper());
        let first = supervisor.start().expect("start");
        assert_eq!(supervisor.stop(), StopOutcome::Signalled { pid: first });
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.pid(), None);

        let second = supervisor.start().expect("restart after stop");
        assert_eq!(supervisor.stop(), StopOutcome::Signalled { pid: second });
    }

    #[tokio::test]
    async fn stop_without_agent_is_informational() {
        let supervisor = Supervisor::new(sleeper());
        assert_eq!(supervisor.stop(), StopOutcome::NotManaged);
        assert_eq!(supervisor.stop(), StopOutcome::NotManaged);
    }

    #[tokio::test]
    async fn self_exit_clears_slot() {
        let supervisor = Supervisor::new(AgentCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "exit 0".to_string()],
            cwd: None,
        });
        supervisor.start().expect("start");
        wait_until_stopped(&supervisor).await;

        assert_eq!(supervisor.stop(), StopOutcome::NotManaged);
        supervisor.start().expect("start after exit");
        wait_until_stopped(&supervisor).await;
    }

    #[tokio::test]
    async fn spawn_failure_leaves_slot_empty() {
        let supervisor = Supervisor::new(AgentCommand {
            program: PathBuf::from("/nonexistent/acd-agent"),
            args: Vec::new(),
            cwd: None,
        });
        let err = supervisor.start().expect_err("spawn fails");
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn agent_runs_in_configured_directory() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let marker = dir.path().join("pwd.txt");
        let supervisor = Supervisor::new(AgentCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "pwd > pwd.txt".to_string()],
            cwd: Some(dir.path().to_path_buf()),
        });
        supervisor.start().expect("start");
        wait_until_stopped(&supervisor).await;

        let written = std::fs::read_to_string(&marker).expect("marker written");
        let expected = dir.path().canonicalize().expect("canonical");
        assert_eq!(
            PathBuf::from(written.trim()).canonicalize().expect("canonical"),
            expected
        );
    }

    async fn wait_for_file(path: &Path) {
        for _ in 0..250 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never appeared", path.display());
    }

    #[tokio::test]
    async fn stop_sends_sigterm_so_agent_can_clean_up() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let supervisor = Supervisor::new(AgentCommand {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                "trap 'echo term > term.txt; exit 0' TERM; touch ready.txt; \
                 while :; do sleep 0.05; done"
                    .to_string(),
            ],
            cwd: Some(dir.path().to_path_buf()),
        });
        let pid = supervisor.start().expect("start");
        wait_for_file(&dir.path().join("ready.txt")).await;

        assert_eq!(supervisor.stop(), StopOutcome::Signalled { pid });
        wait_for_file(&dir.path().join("term.txt")).await;
    }
}
