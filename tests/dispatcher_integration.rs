//! 디스패처 통합 테스트: 가짜 서버 프로세스 + 루프백 원격 콘솔

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use mca::config::{McaConfig, ServerLayout};
use mca::console::Origin;
use mca::dispatcher::{CommandDispatcher, DispatcherParts};
use mca::protocol::{read_frame, write_frame};
use mca::supervisor::{ManagedProcess, ProcessLauncher};
use mca::update::ArtifactSource;

const WAIT: Duration = Duration::from_secs(5);

/// Hands out processes backed by in-memory pipes; the test side of each
/// launch is kept as a [`FakeServer`].
#[derive(Default)]
struct ScriptedLauncher {
    servers: Mutex<Vec<FakeServer>>,
    launched: Mutex<usize>,
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self) -> anyhow::Result<ManagedProcess> {
        let (stdin_tx, stdin) = mpsc::channel(256);
        let (output, output_reader) = tokio::io::duplex(64 * 1024);
        let (running, running_rx) = watch::channel(true);

        let process = ManagedProcess::from_parts(
            31337,
            0,
            stdin_tx,
            Box::new(BufReader::new(output_reader)),
            running_rx,
        );
        self.servers.lock().unwrap().push(FakeServer { stdin, output, running });
        *self.launched.lock().unwrap() += 1;
        Ok(process)
    }
}

struct StaticSource(Vec<u8>);

#[async_trait]
impl ArtifactSource for StaticSource {
    async fn fetch(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

struct Harness {
    _tmp: TempDir,
    root: PathBuf,
    dispatcher: Arc<CommandDispatcher>,
    launcher: Arc<ScriptedLauncher>,
    local: mpsc::UnboundedReceiver<String>,
}

/// Running game server as seen by a test: its stdin and its output.
struct FakeServer {
    stdin: mpsc::Receiver<String>,
    output: DuplexStream,
    running: watch::Sender<bool>,
}

impl FakeServer {
    async fn line(&mut self, line: &str) {
        self.output.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
    }

    async fn next_stdin(&mut self) -> String {
        tokio::time::timeout(WAIT, self.stdin.recv())
            .await
            .expect("timed out waiting for server stdin")
            .expect("stdin closed")
    }
}

fn setup(files: &[(&str, &str)], artifact: &[u8]) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    for (name, content) in files {
        std::fs::write(root.join(name), content).unwrap();
    }

    let mut config = McaConfig::default();
    config.console_ip = "127.0.0.1".to_string();
    config.console_port = 0;

    let launcher = Arc::new(ScriptedLauncher::default());
    let (local_tx, local) = mpsc::unbounded_channel();
    let mut parts = DispatcherParts::new(
        ServerLayout::new(&root, &config.server_jar),
        config,
        root.join("mca.toml"),
        launcher.clone(),
        Arc::new(StaticSource(artifact.to_vec())),
        local_tx,
    );
    parts.stop_grace = Duration::from_millis(10);
    parts.retry_delay = Duration::from_millis(10);
    parts.ops_reload_delay = Duration::from_millis(10);

    Harness {
        _tmp: tmp,
        root,
        dispatcher: CommandDispatcher::new(parts),
        launcher,
        local,
    }
}

impl Harness {
    async fn start(&mut self) -> FakeServer {
        self.dispatcher.dispatch("start", Origin::Local).await;
        self.launcher.servers.lock().unwrap().pop().expect("server not launched")
    }

    /// Skip local output until `text` shows up.
    async fn expect_local(&mut self, text: &str) {
        loop {
            let line = tokio::time::timeout(WAIT, self.local.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for '{}'", text))
                .expect("local output closed");
            if line == text {
                return;
            }
        }
    }

    async fn connect(&self) -> (OwnedReadHalf, OwnedWriteHalf) {
        let addr = self.dispatcher.console().local_addr().await.expect("console not running");
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut reader, writer) = stream.into_split();
        let welcome = next_frame(&mut reader).await;
        assert!(welcome.starts_with("Welcome to MCA!\n"), "{}", welcome);
        (reader, writer)
    }
}

async fn next_frame(reader: &mut OwnedReadHalf) -> String {
    tokio::time::timeout(WAIT, read_frame(reader))
        .await
        .expect("timed out waiting for frame")
        .unwrap()
}

fn read(root: &Path, name: &str) -> String {
    std::fs::read_to_string(root.join(name)).unwrap()
}

const PROPERTIES: &str = "level-name=world\nmax-players=20\nonline-mode=true\n";

#[tokio::test]
async fn test_local_give_is_capped_at_16_stacks() {
    let mut h = setup(&[], b"jar");
    let mut server = h.start().await;

    h.dispatcher.dispatch("give bob 4 64 20", Origin::Local).await;
    for _ in 0..16 {
        assert_eq!(server.next_stdin().await, "give bob 4 64");
    }
    h.dispatcher.dispatch("say marker", Origin::Local).await;
    assert_eq!(server.next_stdin().await, "say marker");

    // 숫자가 아니면 그대로 전달
    h.dispatcher.dispatch("give bob 4 64 lots", Origin::Local).await;
    assert_eq!(server.next_stdin().await, "give bob 4 64 lots");
}

#[tokio::test]
async fn test_forward_only_while_running() {
    let mut h = setup(&[], b"jar");
    h.dispatcher.dispatch("say nobody hears this", Origin::Local).await;
    assert_eq!(*h.launcher.launched.lock().unwrap(), 0);

    let mut server = h.start().await;
    h.dispatcher.dispatch("say hello", Origin::Local).await;
    assert_eq!(server.next_stdin().await, "say hello");
}

#[tokio::test]
async fn test_ingame_op_give_and_replay() {
    let mut h = setup(&[("ops.txt", "alice\n")], b"jar");
    let mut server = h.start().await;

    server.line("2011-01-01 12:00:00 [INFO] Alice issued server command: give Alice 1 64 20").await;
    for _ in 0..16 {
        assert_eq!(server.next_stdin().await, "give Alice 1 64");
    }

    server.line("2011-01-01 12:00:01 [INFO] Alice issued server command: r").await;
    for _ in 0..16 {
        assert_eq!(server.next_stdin().await, "give Alice 1 64");
    }

    server.line("2011-01-01 12:00:02 [INFO] Alice issued server command: get 3 10").await;
    assert_eq!(server.next_stdin().await, "give Alice 3 10");
}

#[tokio::test]
async fn test_join_and_non_op_is_silently_refused() {
    let mut h = setup(&[("ops.txt", "alice\n")], b"jar");
    let mut server = h.start().await;

    server.line("2011-01-01 12:00:00 [INFO] Bob [/127.0.0.1:50000] logged in with entity id 1").await;
    assert_eq!(server.next_stdin().await, "say Bob has joined the server!");
    assert_eq!(server.next_stdin().await, "tell Bob Use /commands for a list of new/enhanced commands");

    server.line("2011-01-01 12:00:01 [INFO] Bob issued server command: give Bob 1 64 2").await;
    server.line("2011-01-01 12:00:02 [INFO] Bob issued server command: players").await;
    // give는 무시되고 바로 players 응답
    assert_eq!(server.next_stdin().await, "tell Bob 1 Player online: Bob");

    server.line("2011-01-01 12:00:03 [INFO] Bob issued server command: commands").await;
    assert_eq!(server.next_stdin().await, "tell Bob players, r, played, bind, unbind, desc, commands");
    assert_eq!(server.next_stdin().await, "tell Bob Use /desc <command> for more information");

    server.line("2011-01-01 12:00:04 [INFO] Bob lost connection: disconnect.quitting").await;
    server.line("2011-01-01 12:00:05 [INFO] Alice issued server command: players").await;
    assert_eq!(server.next_stdin().await, "tell Alice 0 Player online: ");
    assert!(h.dispatcher.players().is_empty());
}

#[tokio::test]
async fn test_replay_without_history_does_nothing() {
    let mut h = setup(&[], b"jar");
    let mut server = h.start().await;

    server.line("d t [INFO] Bob issued server command: r").await;
    server.line("d t [INFO] Bob issued server command: players").await;
    assert_eq!(server.next_stdin().await, "tell Bob 0 Player online: ");

    // r 자체는 마지막 명령으로 기록되지 않음
    server.line("d t [INFO] Bob issued server command: r").await;
    assert_eq!(server.next_stdin().await, "tell Bob 0 Player online: ");
    server.line("d t [INFO] Bob issued server command: r").await;
    assert_eq!(server.next_stdin().await, "tell Bob 0 Player online: ");
}

#[tokio::test]
async fn test_replay_of_bound_command() {
    let mut h = setup(&[], b"jar");
    let mut server = h.start().await;

    server.line("d t [INFO] Bob issued server command: bind who players").await;
    server.line("d t [INFO] Bob issued server command: who").await;
    assert_eq!(server.next_stdin().await, "tell Bob 0 Player online: ");

    server.line("d t [INFO] Bob issued server command: r").await;
    assert_eq!(server.next_stdin().await, "tell Bob 0 Player online: ");
}

#[tokio::test]
async fn test_op_only_commands_are_gated() {
    let mut h = setup(&[("ops.txt", "alice\n"), ("server.properties", PROPERTIES)], b"jar");
    let mut server = h.start().await;

    for command in ["uptime", "ops", "level", "id dirt", "get 1 64", "setlevel other"] {
        server.line(&format!("d t [INFO] Bob issued server command: {}", command)).await;
    }
    server.line("d t [INFO] Bob issued server command: desc uptime").await;
    assert_eq!(server.next_stdin().await, "tell Bob uptime - The amount of time the server has been up");

    server.line("d t [INFO] ALICE issued server command: ops").await;
    assert_eq!(server.next_stdin().await, "tell ALICE Ops: alice");
    server.line("d t [INFO] alice issued server command: level").await;
    assert_eq!(server.next_stdin().await, "tell alice Current level: world");
    assert!(read(&h.root, "server.properties").contains("level-name=world"));
}

#[tokio::test]
async fn test_server_exiting_on_its_own_returns_to_stopped() {
    let mut h = setup(&[], b"jar");
    let server = h.start().await;
    assert!(h.dispatcher.is_running().await);

    server.running.send(false).unwrap();
    h.expect_local("Minecraft server stopped unexpectedly").await;
    assert!(!h.dispatcher.is_running().await);
    assert!(!h.root.join("pid.bin").exists());

    // 다시 시작 가능
    let mut server = h.start().await;
    h.dispatcher.dispatch("say back", Origin::Local).await;
    assert_eq!(server.next_stdin().await, "say back");
    assert_eq!(*h.launcher.launched.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_blank_server_lines_are_not_relayed() {
    let mut h = setup(&[], b"jar");
    let mut server = h.start().await;

    server.line("").await;
    server.line("   ").await;
    server.line("after").await;
    let first = tokio::time::timeout(WAIT, h.local.recv()).await.unwrap().unwrap();
    assert_eq!(first, "after");
}

#[tokio::test]
async fn test_binds_resolve_and_cycles_stop() {
    let mut h = setup(&[], b"jar");
    let mut server = h.start().await;

    server.line("d t [INFO] Bob issued server command: bind who players").await;
    server.line("d t [INFO] Bob issued server command: who").await;
    assert_eq!(server.next_stdin().await, "tell Bob 0 Player online: ");
    assert!(read(&h.root, "binds.json").contains("who"));

    server.line("d t [INFO] Bob issued server command: bind ping pong").await;
    server.line("d t [INFO] Bob issued server command: bind pong ping").await;
    server.line("d t [INFO] Bob issued server command: ping").await;
    server.line("d t [INFO] Bob issued server command: desc r").await;
    assert_eq!(server.next_stdin().await, "tell Bob r - Repeats the previous command");
}

#[tokio::test]
async fn test_start_twice_and_status() {
    let mut h = setup(&[("server.properties", PROPERTIES)], b"jar");
    assert_eq!(
        h.dispatcher.status_summary().await,
        "There is currently no minecraft server running"
    );

    let _server = h.start().await;
    h.dispatcher.dispatch("start", Origin::Local).await;
    h.expect_local("Minecraft server already running").await;
    assert_eq!(*h.launcher.launched.lock().unwrap(), 1);

    let status = h.dispatcher.status_summary().await;
    assert!(status.starts_with("Minecraft server running\n\tPlayers: 0/20\n\tUptime: "), "{}", status);
}

#[tokio::test]
async fn test_setlevel_waits_for_stop() {
    let mut h = setup(&[("server.properties", PROPERTIES)], b"jar");
    let mut server = h.start().await;

    h.dispatcher.dispatch("setlevel creative", Origin::Local).await;
    h.expect_local("Level will be set to \"creative\" on the next restart").await;
    assert!(read(&h.root, "server.properties").contains("level-name=world"));

    h.dispatcher.dispatch("stop", Origin::Local).await;
    assert_eq!(server.next_stdin().await, "stop");
    h.expect_local("Writing config changes").await;
    h.expect_local("Shutdown done!").await;
    assert!(read(&h.root, "server.properties").contains("level-name=creative"));
    assert!(!h.dispatcher.is_running().await);
}

#[tokio::test]
async fn test_revert_without_backup_keeps_artifact() {
    let mut h = setup(&[("minecraft_server.jar", "installed")], b"candidate");
    h.dispatcher.dispatch("revert", Origin::Local).await;
    h.expect_local("No previous version found").await;
    assert_eq!(read(&h.root, "minecraft_server.jar"), "installed");
}

#[tokio::test]
async fn test_update_confirmation_is_bound_to_origin() {
    let mut h = setup(&[("minecraft_server.jar", "v1")], b"v2");
    h.dispatcher.dispatch("mca start", Origin::Local).await;
    h.expect_local_prefix("[MCA] Server started on (127.0.0.1:").await;

    let (mut a_rx, mut a_tx) = h.connect().await;
    let (mut b_rx, mut b_tx) = h.connect().await;

    write_frame(&mut a_tx, "update").await.unwrap();
    assert_eq!(next_frame(&mut a_rx).await, "Checking for new version...");
    assert_eq!(next_frame(&mut a_rx).await, "There is a new version available! Install it? Y/N: ");

    // B는 질문받지 않았음
    write_frame(&mut b_tx, "y").await.unwrap();
    write_frame(&mut b_tx, "mca stop").await.unwrap();
    write_frame(&mut b_tx, "status").await.unwrap();
    assert_eq!(next_frame(&mut b_rx).await, "There is currently no minecraft server running");
    assert_eq!(read(&h.root, "minecraft_server.jar"), "v1");
    assert!(h.dispatcher.console().is_running().await);

    write_frame(&mut a_tx, "y").await.unwrap();
    assert_eq!(next_frame(&mut a_rx).await, "Install done");
    assert_eq!(read(&h.root, "minecraft_server.jar"), "v2");
    assert_eq!(read(&h.root, "minecraft_server_old.jar"), "v1");
}

#[tokio::test]
async fn test_broadcast_survives_disconnect() {
    let mut h = setup(&[], b"jar");
    h.dispatcher.dispatch("mca start", Origin::Local).await;
    let mut server = h.start().await;

    let (_a_rx, mut a_tx) = h.connect().await;
    let (mut b_rx, _b_tx) = h.connect().await;

    write_frame(&mut a_tx, "dc").await.unwrap();
    drop(a_tx);
    tokio::time::timeout(WAIT, async {
        while h.dispatcher.console().clients().await.len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    server.line("2011-01-01 12:00:00 [INFO] Hello from the server").await;
    assert_eq!(next_frame(&mut b_rx).await, "2011-01-01 12:00:00 [INFO] Hello from the server");
    h.expect_local("2011-01-01 12:00:00 [INFO] Hello from the server").await;
}

#[tokio::test]
async fn test_backup_interval_keeps_single_trigger() {
    let mut h = setup(&[], b"jar");
    std::fs::create_dir_all(h.root.join("world")).unwrap();

    h.dispatcher.dispatch("backup dir saves", Origin::Local).await;
    h.expect_local("Backup directory set to saves").await;
    for minutes in ["30", "10", "45"] {
        h.dispatcher.dispatch(&format!("backup interval {}", minutes), Origin::Local).await;
        h.expect_local(&format!("Backup interval set to {} minutes", minutes)).await;
    }
    h.dispatcher.dispatch("backup interval soon", Origin::Local).await;

    let backups = h.dispatcher.backups();
    assert!(backups.has_trigger());
    assert_eq!(backups.triggers_created(), 1);
    assert_eq!(backups.interval(), 45.0);
    assert!(read(&h.root, "mca.toml").contains("backup_interval = 45"));

    h.dispatcher.dispatch("backup interval 0", Origin::Local).await;
    assert!(!h.dispatcher.backups().has_trigger());
}

impl Harness {
    async fn expect_local_prefix(&mut self, prefix: &str) {
        loop {
            let line = tokio::time::timeout(WAIT, self.local.recv()).await.unwrap().unwrap();
            if line.starts_with(prefix) {
                return;
            }
        }
    }
}
