pub mod error;
pub mod managed_process;
pub mod recovery;
pub mod state_machine;

pub use error::SupervisorError;
pub use managed_process::{JavaLauncher, ManagedProcess, ProcessLauncher};
pub use state_machine::State;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{EventExtractor, LineClassifier, PositionalClassifier, ServerEvent};
use recovery::RecoveryRecord;
use state_machine::StateMachine;

/// How long the child gets to act on `stop` before its output is torn down.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

struct Extractor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Lifecycle of the one game server process.
///
/// Stopping is split in two so the caller can run work between the child
/// being told to stop and the handle being dropped (the world backup needs
/// the child's stdin to still be open):
///
/// ```text
/// begin_stop: Running → Stopping, "stop" → grace → extractor cancelled
/// finish_stop: process dropped, recovery file removed, Stopping → Stopped
/// ```
pub struct ProcessSupervisor {
    launcher: Arc<dyn ProcessLauncher>,
    classifier: Arc<dyn LineClassifier>,
    recovery_path: PathBuf,
    stop_grace: Duration,
    machine: StateMachine,
    process: Option<ManagedProcess>,
    extractor: Option<Extractor>,
    started: Option<Instant>,
    /// Bumped on every successful start
    run_id: u64,
}

impl ProcessSupervisor {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, recovery_path: &Path) -> Self {
        Self {
            launcher,
            classifier: Arc::new(PositionalClassifier),
            recovery_path: recovery_path.to_path_buf(),
            stop_grace: STOP_GRACE,
            machine: StateMachine::new(),
            process: None,
            extractor: None,
            started: None,
            run_id: 0,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn state(&self) -> State {
        self.machine.state()
    }

    pub fn is_running(&self) -> bool {
        self.machine.state() == State::Running
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.started.map(|since| since.elapsed())
    }

    /// Identifies the current (or last) run, to tell stale exit notices apart.
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Exit watch of the running child.
    pub fn exit_signal(&self) -> Option<watch::Receiver<bool>> {
        self.process.as_ref().map(|p| p.exit_signal())
    }

    /// Launch the child and return its event stream.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<ServerEvent>, SupervisorError> {
        if self.machine.state() != State::Stopped {
            return Err(SupervisorError::AlreadyRunning);
        }
        self.machine.transition(State::Starting)?;

        let mut process = match self.launcher.launch().await {
            Ok(process) => process,
            Err(e) => {
                tracing::error!("Failed to launch minecraft server: {}", e);
                self.machine.transition(State::Stopped)?;
                return Err(SupervisorError::Launch(e.to_string()));
            }
        };

        let token = CancellationToken::new();
        let (events, handle) = match process.take_output() {
            Some(output) => EventExtractor::spawn(output, token.clone(), self.classifier.clone()),
            None => EventExtractor::spawn(tokio::io::empty(), token.clone(), self.classifier.clone()),
        };

        let record = RecoveryRecord { pid: process.pid, started_at: process.started_at };
        if let Err(e) = recovery::write(&self.recovery_path, record) {
            tracing::warn!("Failed to write recovery file {}: {}", self.recovery_path.display(), e);
        }

        self.process = Some(process);
        self.extractor = Some(Extractor { token, handle });
        self.started = Some(Instant::now());
        self.run_id += 1;
        self.machine.transition(State::Running)?;
        Ok(events)
    }

    /// Tell the child to stop, give it the grace period, then stop reading
    /// its output.
    pub async fn begin_stop(&mut self) -> Result<(), SupervisorError> {
        if self.machine.state() != State::Running {
            return Err(SupervisorError::NotRunning);
        }
        self.machine.transition(State::Stopping)?;

        if let Some(process) = &self.process {
            if let Err(e) = process.send_command("stop").await {
                tracing::warn!("Failed to send stop to minecraft server: {}", e);
            }
        }
        tokio::time::sleep(self.stop_grace).await;
        self.stop_extractor().await;
        Ok(())
    }

    /// The child went away on its own: Running → Stopped without the stop
    /// command or grace period.
    pub async fn reap_exited(&mut self) -> Result<(), SupervisorError> {
        if self.machine.state() != State::Running {
            return Err(SupervisorError::NotRunning);
        }
        self.machine.transition(State::Stopping)?;
        self.stop_extractor().await;
        self.finish_stop()
    }

    async fn stop_extractor(&mut self) {
        tracing::info!("Terminating server output");
        if let Some(extractor) = self.extractor.take() {
            extractor.token.cancel();
            if let Err(e) = extractor.handle.await {
                tracing::warn!("Event extractor task failed: {}", e);
            }
        }
    }

    pub fn finish_stop(&mut self) -> Result<(), SupervisorError> {
        if self.machine.state() != State::Stopping {
            return Err(SupervisorError::NotRunning);
        }
        self.process = None;
        self.started = None;
        recovery::clear(&self.recovery_path);
        self.machine.transition(State::Stopped)?;
        Ok(())
    }

    /// Write one line to the child's stdin. Allowed while stopping too.
    pub async fn send_command(&self, text: &str) -> Result<(), SupervisorError> {
        match (&self.process, self.machine.state()) {
            (Some(process), State::Running | State::Stopping) => {
                process.send_command(text).await?;
                Ok(())
            }
            _ => Err(SupervisorError::NotRunning),
        }
    }
}
