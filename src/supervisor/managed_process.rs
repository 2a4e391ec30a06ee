//! Managed Process - the game server child with its stdio wired up
//!
//! - stdin: commands go through an mpsc channel to a writer task
//! - stderr: handed out once as the diagnostic stream the event extractor reads
//! - stdout: drained and logged at debug level
//! - a waiter task flips a watch channel when the child exits

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{mpsc, watch};

use super::recovery;

const STDIN_CHANNEL_CAPACITY: usize = 256;

/// Shared between tasks through the supervisor, hence `Sync`.
pub type OutputReader = Box<dyn AsyncBufRead + Send + Sync + Unpin>;

pub struct ManagedProcess {
    pub pid: u32,
    /// Start time in Unix seconds, as the OS reports it
    pub started_at: u64,
    stdin_tx: mpsc::Sender<String>,
    output: Option<OutputReader>,
    running_rx: watch::Receiver<bool>,
}

impl ManagedProcess {
    pub async fn spawn(program: &str, args: &[String], working_dir: &Path) -> anyhow::Result<Self> {
        let mut cmd = TokioCommand::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);

        // Windows: hide console window
        crate::utils::apply_creation_flags(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn process '{}': {}", program, e))?;

        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get PID of spawned process"))?;

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(STDIN_CHANNEL_CAPACITY);
        let (running_tx, running_rx) = watch::channel(true);

        // ── stdout drain ─────────────────────────────────────
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("[server stdout] {}", line);
                }
            });
        }

        // ── stdin writer ─────────────────────────────────────
        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(stdin_writer(stdin, stdin_rx));
        }

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("Failed to capture stderr of process '{}'", program))?;
        let output: OutputReader = Box::new(BufReader::new(stderr));

        // ── process waiter ───────────────────────────────────
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!("Minecraft server exited with {}", status),
                Err(e) => tracing::warn!("Failed to wait for minecraft server: {}", e),
            }
            let _ = running_tx.send(false);
        });

        let started_at = tokio::task::spawn_blocking(move || recovery::process_start_time(pid))
            .await
            .ok()
            .flatten()
            .unwrap_or_else(unix_now);

        tracing::info!("Minecraft server started with PID {}", pid);
        Ok(Self::from_parts(pid, started_at, stdin_tx, output, running_rx))
    }

    /// Assemble a process from its pipes.
    ///
    /// - `stdin`: every command line is sent here
    /// - `output`: the diagnostic stream the event extractor reads
    /// - `running`: flips to `false` (or its sender is dropped) when the
    ///   process is gone
    pub fn from_parts(
        pid: u32,
        started_at: u64,
        stdin: mpsc::Sender<String>,
        output: OutputReader,
        running: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pid,
            started_at,
            stdin_tx: stdin,
            output: Some(output),
            running_rx: running,
        }
    }

    /// A process with no OS child behind it. Returns the receiving end of its
    /// stdin and the writing end of its diagnostic stream.
    #[cfg(test)]
    pub(crate) fn detached(pid: u32) -> (Self, mpsc::Receiver<String>, tokio::io::DuplexStream) {
        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(STDIN_CHANNEL_CAPACITY);
        let (running_tx, running_rx) = watch::channel(true);
        let (output_writer, output_reader) = tokio::io::duplex(64 * 1024);

        // 수신측이 남아있는 동안 running 유지
        tokio::spawn(async move {
            running_tx.closed().await;
        });

        let output: OutputReader = Box::new(BufReader::new(output_reader));
        let process = Self::from_parts(pid, unix_now(), stdin_tx, output, running_rx);
        (process, stdin_rx, output_writer)
    }

    /// The diagnostic stream, available once.
    pub fn take_output(&mut self) -> Option<OutputReader> {
        self.output.take()
    }

    /// Send a command line to the process's stdin.
    pub async fn send_command(&self, command: &str) -> anyhow::Result<()> {
        self.stdin_tx
            .send(command.to_string())
            .await
            .map_err(|e| anyhow::anyhow!("stdin channel closed: {}", e))
    }

    /// Watch that turns `false` once the process has exited.
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.running_rx.clone()
    }
}

async fn stdin_writer(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::Receiver<String>) {
    while let Some(cmd) = rx.recv().await {
        let data = if cmd.ends_with('\n') { cmd } else { format!("{}\n", cmd) };
        if stdin.write_all(data.as_bytes()).await.is_err() {
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Produces a fresh game server process on each start.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<ManagedProcess>;
}

/// `java <args> -jar <jar> nogui` in the server directory
pub struct JavaLauncher {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

#[async_trait]
impl ProcessLauncher for JavaLauncher {
    async fn launch(&self) -> anyhow::Result<ManagedProcess> {
        tracing::info!("Launching {} {}", self.program, self.args.join(" "));
        ManagedProcess::spawn(&self.program, &self.args, &self.working_dir).await
    }
}
