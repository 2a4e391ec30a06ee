//! Command dispatcher: the one entry point for commands from the local
//! console, remote console clients and (through the event pump) players.
//!
//! Shared state is split into independent groups, each behind its own
//! mutex. Lifecycle transitions are serialized by one async lock around the
//! [`ProcessSupervisor`].

mod ingame;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

use crate::backup::BackupScheduler;
use crate::config::{McaConfig, ServerLayout, ServerProperties};
use crate::console::{ConsoleHandler, Origin, RemoteConsoleServer};
use crate::deferred::{DeferredChangeQueue, RETRY_DELAY};
use crate::events::ServerEvent;
use crate::store::{BindTable, ItemTable, OpsList, PlaytimeTracker};
use crate::supervisor::{ProcessLauncher, ProcessSupervisor, SupervisorError, STOP_GRACE};
use crate::update::{ArtifactSource, UpdateManager, UpdateStatus};
use crate::utils::format_duration;

pub use ingame::MAX_BIND_DEPTH;

/// Delay before re-reading ops after `op`/`deop`; the server writes the
/// file asynchronously.
pub const OPS_RELOAD_DELAY: Duration = Duration::from_secs(5);
/// Upper bound for `give <player> <id> <amount> <stacks>` expansion.
pub const MAX_GIVE_STACKS: i64 = 16;

/// What the input loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub name: String,
    pub since: Instant,
}

/// Everything the dispatcher is built from.
pub struct DispatcherParts {
    pub layout: ServerLayout,
    pub config: McaConfig,
    pub config_path: PathBuf,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub source: Arc<dyn ArtifactSource>,
    /// Replies and notices for the local console
    pub local_out: mpsc::UnboundedSender<String>,
    pub stop_grace: Duration,
    pub retry_delay: Duration,
    pub ops_reload_delay: Duration,
}

impl DispatcherParts {
    pub fn new(
        layout: ServerLayout,
        config: McaConfig,
        config_path: PathBuf,
        launcher: Arc<dyn ProcessLauncher>,
        source: Arc<dyn ArtifactSource>,
        local_out: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            layout,
            config,
            config_path,
            launcher,
            source,
            local_out,
            stop_grace: STOP_GRACE,
            retry_delay: RETRY_DELAY,
            ops_reload_delay: OPS_RELOAD_DELAY,
        }
    }
}

pub struct CommandDispatcher {
    layout: ServerLayout,
    config_path: PathBuf,
    local_out: mpsc::UnboundedSender<String>,
    ops_reload_delay: Duration,
    self_ref: Weak<CommandDispatcher>,

    // ── state groups ─────────────────────────────────────
    config: Mutex<McaConfig>,
    properties: Arc<Mutex<Option<ServerProperties>>>,
    sessions: Mutex<Vec<PlayerSession>>,
    ops: Mutex<OpsList>,
    last_commands: Mutex<HashMap<String, String>>,
    binds: Mutex<BindTable>,
    playtime: Mutex<PlaytimeTracker>,
    items: Mutex<ItemTable>,

    // ── components ───────────────────────────────────────
    lifecycle: tokio::sync::Mutex<ProcessSupervisor>,
    /// New event streams go to the pump task, one per server start
    streams: mpsc::UnboundedSender<mpsc::Receiver<ServerEvent>>,
    console: RemoteConsoleServer,
    updates: UpdateManager,
    backups: Arc<BackupScheduler>,
    deferred: DeferredChangeQueue,
}

/// Poison는 무시하고 내부 값 사용
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CommandDispatcher {
    /// Build the dispatcher and start its event pump. Must be called inside
    /// a tokio runtime.
    pub fn new(parts: DispatcherParts) -> Arc<Self> {
        let DispatcherParts {
            layout,
            config,
            config_path,
            launcher,
            source,
            local_out,
            stop_grace,
            retry_delay,
            ops_reload_delay,
        } = parts;

        let properties = load_properties(&layout.properties());
        let ops = OpsList::load(&layout.ops())
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to read ops: {}", e);
                None
            })
            .unwrap_or_default();

        let mut binds = BindTable::new(&layout.binds());
        if let Err(e) = binds.load() {
            tracing::warn!("Failed to load binds: {}", e);
        }
        let mut playtime = PlaytimeTracker::new(&layout.playtime());
        if let Err(e) = playtime.load() {
            tracing::warn!("Failed to load playtime: {}", e);
        }

        let backups = Arc::new(BackupScheduler::new(
            layout.root.clone(),
            config.backup_destination(),
            config.backup_interval,
            local_out.clone(),
        ));
        backups.set_world(properties.as_ref().and_then(|p| p.level_name().map(String::from)));

        let supervisor = ProcessSupervisor::new(launcher, &layout.recovery()).with_stop_grace(stop_grace);
        let updates = UpdateManager::new(source, layout.clone());
        let (streams_tx, streams_rx) = mpsc::unbounded_channel();
        let console_ip = config.console_ip.clone();
        let console_port = config.console_port;

        let dispatcher = Arc::new_cyclic(|weak: &Weak<CommandDispatcher>| {
            let handler: Weak<dyn ConsoleHandler> = weak.clone();
            Self {
                layout,
                config_path,
                local_out,
                ops_reload_delay,
                self_ref: weak.clone(),
                config: Mutex::new(config),
                properties: Arc::new(Mutex::new(properties)),
                sessions: Mutex::new(Vec::new()),
                ops: Mutex::new(ops),
                last_commands: Mutex::new(HashMap::new()),
                binds: Mutex::new(binds),
                playtime: Mutex::new(playtime),
                items: Mutex::new(ItemTable::new()),
                lifecycle: tokio::sync::Mutex::new(supervisor),
                streams: streams_tx,
                console: RemoteConsoleServer::new(&console_ip, console_port, handler),
                updates,
                backups,
                deferred: DeferredChangeQueue::new().with_retry_delay(retry_delay),
            }
        });

        tokio::spawn(run_event_pump(Arc::downgrade(&dispatcher), streams_rx));
        dispatcher
    }

    pub fn console(&self) -> &RemoteConsoleServer {
        &self.console
    }

    pub fn backups(&self) -> &Arc<BackupScheduler> {
        &self.backups
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.is_running()
    }

    pub fn players(&self) -> Vec<String> {
        lock(&self.sessions).iter().map(|s| s.name.clone()).collect()
    }

    // ─── output ──────────────────────────────────────────

    /// Print on the local console.
    fn print(&self, text: &str) {
        let _ = self.local_out.send(text.to_string());
    }

    /// Reply on the channel the command came from.
    async fn reply(&self, origin: Origin, text: &str) {
        match origin {
            Origin::Local => self.print(text),
            Origin::Remote(id) => {
                if !self.console.send_to(id, text).await {
                    tracing::debug!("Reply to {} dropped: connection gone", id);
                }
            }
        }
    }

    // ─── command routing ─────────────────────────────────

    pub async fn dispatch(&self, text: &str, origin: Origin) -> Control {
        let tokens: Vec<&str> = text.split(' ').collect();
        let head = tokens[0];

        match text {
            "start" => {
                self.start_server(origin).await;
            }
            "stop" => {
                self.stop_server().await;
            }
            "restart" => self.restart_server(origin).await,
            "close" => {
                if origin == Origin::Local {
                    self.stop_server().await;
                    return Control::Exit;
                }
            }
            "update" => self.check_update(origin).await,
            "install" => self.install(origin).await,
            "revert" => self.revert(origin).await,
            "status" => {
                let status = self.status_summary().await;
                self.reply(origin, &status).await;
            }
            "levels" => {
                let listing = self.levels_listing();
                self.reply(origin, &listing).await;
            }
            _ if text.eq_ignore_ascii_case("y") => {
                if self.updates.confirm(origin) {
                    self.install(origin).await;
                }
            }
            _ if text.eq_ignore_ascii_case("n") => {
                self.updates.decline(origin);
            }
            _ => match head {
                "backup" => self.backup_command(&tokens, origin).await,
                "online" => self.online_command(&tokens, origin).await,
                "level" => {
                    let reply = match self.level_name() {
                        Some(level) => format!("Current level: {}", level),
                        None => "Minecraft server settings not loaded".to_string(),
                    };
                    self.reply(origin, &reply).await;
                }
                "setlevel" if tokens.len() > 1 => {
                    let reply = self.set_level(tokens[1]).await;
                    self.reply(origin, &reply).await;
                }
                "mca" => {
                    // local only; remote clients cannot drive their own server
                    if origin == Origin::Local {
                        self.mca_command(&tokens).await;
                    }
                }
                _ => self.forward(text).await,
            },
        }
        Control::Continue
    }

    /// Raw text to the server's stdin while running, with the `give` stack
    /// expansion and the ops reload after `op`/`deop`.
    async fn forward(&self, text: &str) {
        let supervisor = self.lifecycle.lock().await;
        if !supervisor.is_running() {
            return;
        }

        let tokens: Vec<&str> = text.split(' ').collect();
        let lines: Vec<String> = match tokens[0] {
            "give" if tokens.len() == 5 => match tokens[4].parse::<i64>() {
                Ok(stacks) => {
                    let single = format!("give {}", tokens[1..4].join(" "));
                    let count = stacks.clamp(0, MAX_GIVE_STACKS) as usize;
                    vec![single; count]
                }
                Err(_) => vec![text.to_string()],
            },
            _ => vec![text.to_string()],
        };

        for line in &lines {
            if let Err(e) = supervisor.send_command(line).await {
                tracing::warn!("Failed to forward '{}': {}", line, e);
                return;
            }
        }

        if matches!(tokens[0], "op" | "deop") {
            self.schedule_ops_reload();
        }
    }

    /// Direct stdin write, used for `say`/`tell`.
    async fn server_command(&self, line: &str) {
        let supervisor = self.lifecycle.lock().await;
        if let Err(e) = supervisor.send_command(line).await {
            tracing::debug!("Dropped server command '{}': {}", line, e);
        }
    }

    fn schedule_ops_reload(&self) {
        let Some(me) = self.self_ref.upgrade() else { return };
        let delay = self.ops_reload_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            me.reload_ops();
        });
    }

    // ─── lifecycle ───────────────────────────────────────

    /// `false` if it was already running or the launch failed.
    pub async fn start_server(&self, origin: Origin) -> bool {
        let mut supervisor = self.lifecycle.lock().await;
        match supervisor.start().await {
            Ok(events) => {
                lock(&self.sessions).clear();
                if self.streams.send(events).is_err() {
                    tracing::error!("Event pump is gone, server output will be ignored");
                }
                if let Some(exited) = supervisor.exit_signal() {
                    tokio::spawn(watch_exit(self.self_ref.clone(), exited, supervisor.run_id()));
                }
                true
            }
            Err(e) => {
                if !matches!(e, SupervisorError::AlreadyRunning) {
                    tracing::warn!("Unable to start minecraft server: {}", e);
                }
                drop(supervisor);
                self.reply(origin, &e.to_string()).await;
                false
            }
        }
    }

    /// Full stop sequence. `false` if nothing was running.
    pub async fn stop_server(&self) -> bool {
        let mut supervisor = self.lifecycle.lock().await;
        if !supervisor.is_running() {
            return false;
        }

        self.logout_everyone();
        if let Err(e) = supervisor.begin_stop().await {
            tracing::warn!("Stop sequence: {}", e);
        }

        // stdin은 아직 열려 있음
        let outcome = self.backups.backup_now().await;
        self.print(outcome.message());
        self.backups.disarm();

        if let Err(e) = supervisor.finish_stop() {
            tracing::warn!("Stop sequence: {}", e);
        }
        // lifecycle lock 유지: drain 중에는 시작 불가
        self.after_stopped().await;

        self.print("Shutdown done!");
        true
    }

    /// The server process went away without being stopped. Stale notices
    /// (an earlier run, or a stop already under way) are ignored.
    async fn reap_exited(&self, run: u64) {
        let mut supervisor = self.lifecycle.lock().await;
        if supervisor.run_id() != run || !supervisor.is_running() {
            return;
        }

        tracing::warn!("Minecraft server exited on its own");
        self.logout_everyone();
        if let Err(e) = supervisor.reap_exited().await {
            tracing::warn!("Failed to clean up exited server: {}", e);
        }
        self.backups.disarm();
        self.after_stopped().await;

        self.print("Minecraft server stopped unexpectedly");
    }

    fn logout_everyone(&self) {
        let mut playtime = lock(&self.playtime);
        playtime.logout_all();
        if let Err(e) = playtime.save() {
            tracing::warn!("Failed to save playtime: {}", e);
        }
    }

    /// Runs with the lifecycle lock held and the supervisor Stopped.
    async fn after_stopped(&self) {
        lock(&self.sessions).clear();
        lock(&self.last_commands).clear();

        if !self.deferred.is_empty() {
            self.print("Writing config changes");
        }
        self.deferred.drain().await;
    }

    pub async fn restart_server(&self, origin: Origin) {
        self.stop_server().await;
        self.start_server(origin).await;
    }

    /// Stop the game server, stop the console and persist what is left.
    pub async fn shutdown(&self) {
        self.stop_server().await;
        self.logout_everyone();
        self.console.stop().await;
        crate::supervisor::recovery::clear(&self.layout.recovery());
    }

    // ─── update ──────────────────────────────────────────

    /// Startup: download the artifact if missing, otherwise check for a new
    /// version in the background.
    pub async fn startup_artifact_check(&self) {
        if self.layout.jar().exists() {
            let Some(me) = self.self_ref.upgrade() else { return };
            tokio::spawn(async move {
                if me.updates.check_for_update(None).await == UpdateStatus::NewVersionAvailable {
                    me.print("New minecraft server version available! Use \"install\" to install it");
                }
            });
            return;
        }

        self.print("No minecraft server found. Downloading...");
        match self.updates.ensure_artifact().await {
            Ok(_) => self.print("Finished downloading"),
            Err(e) => {
                tracing::error!("Failed to download minecraft server: {}", e);
                self.print("Unable to download minecraft server");
            }
        }
    }

    async fn check_update(&self, origin: Origin) {
        self.reply(origin, "Checking for new version...").await;
        let reply = match self.updates.check_for_update(Some(origin)).await {
            UpdateStatus::NewVersionAvailable => "There is a new version available! Install it? Y/N: ",
            UpdateStatus::Unchanged => "No new version available",
            UpdateStatus::CheckFailed(_) => "Unable to check for new version :(",
        };
        self.reply(origin, reply).await;
    }

    async fn install(&self, origin: Origin) {
        if !self.updates.has_pending() {
            self.reply(origin, "No downloaded update to install").await;
            return;
        }

        let was_running = self.stop_server().await;
        match self.updates.install_pending() {
            Ok(true) => self.reply(origin, "Install done").await,
            Ok(false) => self.reply(origin, "No downloaded update to install").await,
            Err(e) => {
                tracing::error!("Install failed: {}", e);
                self.reply(origin, &format!("Install failed: {}", e)).await;
            }
        }
        if was_running {
            self.start_server(origin).await;
        }
    }

    async fn revert(&self, origin: Origin) {
        let reply = match self.updates.revert() {
            Ok(true) => "Reverted last install".to_string(),
            Ok(false) => "No previous version found".to_string(),
            Err(e) => format!("Unable to revert: {}", e),
        };
        self.reply(origin, &reply).await;
    }

    // ─── status ──────────────────────────────────────────

    pub async fn status_summary(&self) -> String {
        let uptime = {
            let supervisor = self.lifecycle.lock().await;
            if !supervisor.is_running() {
                return "There is currently no minecraft server running".to_string();
            }
            supervisor.uptime().unwrap_or_default()
        };

        let players = lock(&self.sessions).len();
        let max = lock(&self.properties).as_ref().and_then(|p| p.max_players());
        let capacity = max.map(|m| format!("/{}", m)).unwrap_or_default();
        format!(
            "Minecraft server running\n\tPlayers: {}{}\n\tUptime: {}",
            players,
            capacity,
            format_duration(uptime)
        )
    }

    pub(crate) async fn uptime(&self) -> Duration {
        self.lifecycle.lock().await.uptime().unwrap_or_default()
    }

    // ─── backup ──────────────────────────────────────────

    async fn backup_command(&self, tokens: &[&str], origin: Origin) {
        match tokens {
            [_] => {
                let outcome = self.backups.backup_now().await;
                self.reply(origin, outcome.message()).await;
            }
            [_, "interval"] => {
                let interval = self.backups.interval();
                self.reply(origin, &interval.to_string()).await;
            }
            [_, "interval", value, ..] => {
                let Ok(minutes) = value.parse::<f64>() else { return };
                self.backups.set_interval(minutes);
                self.update_config(|c| c.backup_interval = minutes);
                self.reply(origin, &format!("Backup interval set to {} minutes", minutes)).await;
            }
            [_, "dir"] => {
                let reply = match self.backups.destination() {
                    Some(dir) => dir.display().to_string(),
                    None => "No backup directory set".to_string(),
                };
                self.reply(origin, &reply).await;
            }
            [_, "dir", rest @ ..] => {
                let dir = rest.join(" ");
                if dir.trim().is_empty() {
                    return;
                }
                self.backups.set_destination(PathBuf::from(&dir));
                self.update_config(|c| c.backup_dir = dir.clone());
                self.reply(origin, &format!("Backup directory set to {}", dir)).await;
            }
            _ => {}
        }
    }

    fn update_config(&self, change: impl FnOnce(&mut McaConfig)) {
        let mut config = lock(&self.config);
        change(&mut config);
        if let Err(e) = config.save(&self.config_path) {
            tracing::warn!("Failed to save {}: {}", self.config_path.display(), e);
        }
    }

    // ─── server properties ───────────────────────────────

    async fn online_command(&self, tokens: &[&str], origin: Origin) {
        if tokens.len() == 1 {
            let reply = match lock(&self.properties).as_ref().and_then(|p| p.online_mode()) {
                Some(on) => format!("Online-mode is {}", if on { "on" } else { "off" }),
                None => "Minecraft server settings not loaded".to_string(),
            };
            self.reply(origin, &reply).await;
            return;
        }

        if self.is_running().await {
            self.reply(origin, "Cannot change online-mode while the minecraft server is running").await;
            return;
        }

        let value = if tokens[1].eq_ignore_ascii_case("on") {
            "true"
        } else if tokens[1].eq_ignore_ascii_case("off") {
            "false"
        } else {
            return;
        };

        let reply = {
            let mut properties = lock(&self.properties);
            match properties.as_mut() {
                None => "Minecraft server settings not loaded".to_string(),
                Some(p) => match p.set("online-mode", value) {
                    Ok(()) => format!("Online-mode is {}", tokens[1].to_lowercase()),
                    Err(e) => format!("Unable to save server settings: {}", e),
                },
            }
        };
        self.reply(origin, &reply).await;
    }

    fn level_name(&self) -> Option<String> {
        lock(&self.properties).as_ref().and_then(|p| p.level_name().map(String::from))
    }

    /// Change `level-name`: at once when stopped, otherwise on the next stop.
    async fn set_level(&self, name: &str) -> String {
        if lock(&self.properties).is_none() {
            return "Minecraft server settings not loaded".to_string();
        }

        let properties = self.properties.clone();
        let level = name.to_string();
        let change = move || -> anyhow::Result<()> {
            match lock(&properties).as_mut() {
                Some(p) => p.set("level-name", &level),
                None => {
                    tracing::warn!("Server settings unloaded, dropping level change");
                    Ok(())
                }
            }
        };

        // lifecycle lock: 상태 확인과 적용 사이에 시작되지 않도록
        let supervisor = self.lifecycle.lock().await;
        if supervisor.is_running() {
            self.deferred.enqueue(format!("level-name = {}", name), change);
            format!("Level will be set to \"{}\" on the next restart", name)
        } else {
            match change() {
                Ok(()) => {
                    self.backups.set_world(Some(name.to_string()));
                    format!("Level set to \"{}\"", name)
                }
                Err(e) => format!("Unable to save server settings: {}", e),
            }
        }
    }

    fn levels_listing(&self) -> String {
        let mut lines = vec!["Levels:".to_string()];
        lines.extend(scan_levels(&self.layout.root));
        lines.join("\n")
    }

    fn reload_properties(&self) {
        let properties = load_properties(&self.layout.properties());
        self.backups.set_world(properties.as_ref().and_then(|p| p.level_name().map(String::from)));
        *lock(&self.properties) = properties;
    }

    fn reload_ops(&self) {
        match OpsList::load(&self.layout.ops()) {
            Ok(Some(ops)) => *lock(&self.ops) = ops,
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to read ops: {}", e),
        }
    }

    fn reload_items(&self) {
        match ItemTable::load(&self.layout.items()) {
            Ok(items) => *lock(&self.items) = items,
            Err(e) => tracing::warn!("Failed to read items: {}", e),
        }
    }

    // ─── remote console management ───────────────────────

    async fn mca_command(&self, tokens: &[&str]) {
        match tokens.get(1).copied() {
            None => {
                let status = self.console.status_line().await;
                self.print(&status);
            }
            Some("start") => match self.console.start().await {
                Ok(true) => {
                    let addr = self.console.local_addr().await;
                    let addr = addr.map(|a| a.to_string()).unwrap_or_default();
                    self.print(&format!("[MCA] Server started on ({})", addr));
                }
                Ok(false) => self.print("[MCA] Server already running"),
                Err(e) => self.print(&format!("[MCA] Unable to start server: {}", e)),
            },
            Some("stop") => {
                if self.console.stop().await {
                    self.print("[MCA] Server stopped");
                } else {
                    self.print("[MCA] No server running");
                }
            }
            Some("clients") => {
                if !self.console.is_running().await {
                    self.print("[MCA] No server running");
                    return;
                }
                let clients = self.console.clients().await;
                let mut lines = vec![format!("[MCA] {} client(s):", clients.len())];
                lines.extend(clients.iter().map(|(_, addr)| format!("\t{}:{}", addr.ip(), addr.port())));
                self.print(&lines.join("\n"));
            }
            Some(_) => {}
        }
    }

    // ─── events ──────────────────────────────────────────

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::RawLine(line) => {
                self.print(&line);
                self.console.broadcast(&line).await;
            }
            ServerEvent::PlayerJoined { name } => {
                lock(&self.sessions).push(PlayerSession { name: name.clone(), since: Instant::now() });
                lock(&self.playtime).login(&name);
                self.server_command(&format!("say {} has joined the server!", name)).await;
                self.tell(&name, "Use /commands for a list of new/enhanced commands").await;
            }
            ServerEvent::PlayerLeft { name } => {
                lock(&self.last_commands).remove(&name);
                lock(&self.sessions).retain(|s| s.name != name);
                let mut playtime = lock(&self.playtime);
                playtime.logout(&name);
                if let Err(e) = playtime.save() {
                    tracing::warn!("Failed to save playtime: {}", e);
                }
            }
            ServerEvent::PlayerSaid { name, message } => {
                tracing::info!("<{}> {}", name, message);
            }
            ServerEvent::PlayerIssuedCommand { name, command } => {
                self.handle_ingame(&name, &command).await;
            }
            ServerEvent::StartupComplete => {
                self.reload_properties();
                self.reload_ops();
                self.reload_items();

                let outcome = self.backups.backup_now().await;
                self.print(outcome.message());
                self.backups.arm_after_startup();
            }
        }
    }

    async fn tell(&self, player: &str, text: &str) {
        self.server_command(&format!("tell {} {}", player, text)).await;
    }
}

#[async_trait]
impl ConsoleHandler for CommandDispatcher {
    async fn welcome(&self) -> String {
        format!("Welcome to MCA!\n{}", self.status_summary().await)
    }

    async fn on_command(&self, text: String, origin: Origin) {
        tracing::info!("Remote command from {:?}: {}", origin, text);
        self.dispatch(&text, origin).await;
    }
}

/// Hands out the events of the current server run. A newer run's stream
/// replaces the old one; whatever the old run left buffered is dropped.
struct EventPump {
    streams: mpsc::UnboundedReceiver<mpsc::Receiver<ServerEvent>>,
    current: Option<mpsc::Receiver<ServerEvent>>,
}

enum Pumped {
    Stream(Option<mpsc::Receiver<ServerEvent>>),
    Event(Option<ServerEvent>),
}

impl EventPump {
    fn new(streams: mpsc::UnboundedReceiver<mpsc::Receiver<ServerEvent>>) -> Self {
        Self { streams, current: None }
    }

    /// `None` once the dispatcher side is gone.
    async fn next(&mut self) -> Option<ServerEvent> {
        loop {
            let pumped = match self.current.as_mut() {
                Some(events) => tokio::select! {
                    biased;
                    next = self.streams.recv() => Pumped::Stream(next),
                    event = events.recv() => Pumped::Event(event),
                },
                None => Pumped::Stream(self.streams.recv().await),
            };

            match pumped {
                Pumped::Stream(Some(events)) => self.current = Some(events),
                Pumped::Stream(None) => return None,
                Pumped::Event(Some(event)) => return Some(event),
                Pumped::Event(None) => self.current = None,
            }
        }
    }
}

/// Feeds server events to the dispatcher, one at a time.
async fn run_event_pump(
    dispatcher: Weak<CommandDispatcher>,
    streams: mpsc::UnboundedReceiver<mpsc::Receiver<ServerEvent>>,
) {
    let mut pump = EventPump::new(streams);
    while let Some(event) = pump.next().await {
        let Some(d) = dispatcher.upgrade() else { return };
        d.handle_event(event).await;
    }
}

/// Waits for the child of run `run` to exit, then lets the dispatcher clean
/// up after it.
async fn watch_exit(dispatcher: Weak<CommandDispatcher>, mut running: watch::Receiver<bool>, run: u64) {
    // 송신측이 사라져도 종료로 간주
    let _ = running.wait_for(|alive| !alive).await;
    if let Some(d) = dispatcher.upgrade() {
        d.reap_exited(run).await;
    }
}

fn load_properties(path: &Path) -> Option<ServerProperties> {
    match ServerProperties::load(path) {
        Ok(Some(properties)) => {
            tracing::info!("Minecraft server settings loaded");
            Some(properties)
        }
        Ok(None) => {
            tracing::info!("No Minecraft server settings file found");
            None
        }
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// Directories under `root` holding a `level.dat`, as `/`-separated
/// relative paths.
pub fn scan_levels(root: &Path) -> Vec<String> {
    let mut levels: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir() && entry.path().join("level.dat").is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .collect();
    levels.sort();
    levels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_levels() {
        let tmp = tempfile::tempdir().unwrap();
        for dir in ["world", "old/creative", "plugins"] {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        std::fs::write(tmp.path().join("world/level.dat"), b"").unwrap();
        std::fs::write(tmp.path().join("old/creative/level.dat"), b"").unwrap();

        assert_eq!(scan_levels(tmp.path()), vec!["old/creative", "world"]);
    }

    #[test]
    fn test_dispatcher_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CommandDispatcher>();
    }

    fn raw(text: &str) -> ServerEvent {
        ServerEvent::RawLine(text.to_string())
    }

    #[tokio::test]
    async fn test_event_pump_drops_previous_run() {
        let (streams_tx, streams_rx) = mpsc::unbounded_channel();
        let mut pump = EventPump::new(streams_rx);

        let (old_tx, old_rx) = mpsc::channel(8);
        streams_tx.send(old_rx).unwrap();
        old_tx.send(raw("old 1")).await.unwrap();
        assert_eq!(pump.next().await, Some(raw("old 1")));

        // 이전 실행의 잔여 이벤트는 새 스트림이 오면 버려짐
        old_tx.send(ServerEvent::StartupComplete).await.unwrap();
        let (new_tx, new_rx) = mpsc::channel(8);
        streams_tx.send(new_rx).unwrap();
        new_tx.send(raw("new 1")).await.unwrap();

        assert_eq!(pump.next().await, Some(raw("new 1")));
        assert!(old_tx.is_closed());

        drop(new_tx);
        drop(streams_tx);
        assert_eq!(pump.next().await, None);
    }
}
