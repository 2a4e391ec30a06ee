//! World backups: on demand and on a resettable periodic trigger.
//!
//! At most one trigger exists. Changing the interval retunes the live
//! trigger instead of creating a second one.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::utils::copy_dir_recursive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Done,
    NoDestination,
    SettingsNotLoaded,
    Failed(String),
}

impl BackupOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Done => "World backup done!",
            Self::NoDestination => "No backup directory set",
            Self::SettingsNotLoaded => "Minecraft server settings not loaded, unable to perform backup",
            Self::Failed(_) => "Unable to perform backup, is the backup directory valid?",
        }
    }
}

#[derive(Debug, Default)]
struct Settings {
    world: Option<String>,
    destination: Option<PathBuf>,
    interval_minutes: f64,
}

struct Trigger {
    period_tx: watch::Sender<Duration>,
    token: CancellationToken,
}

pub struct BackupScheduler {
    /// Server directory; world and relative destinations resolve against it
    root: PathBuf,
    settings: Mutex<Settings>,
    trigger: Mutex<Option<Trigger>>,
    triggers_created: AtomicUsize,
    copy_lock: tokio::sync::Mutex<()>,
    /// Outcomes of trigger-fired backups go to the local console
    report: mpsc::UnboundedSender<String>,
}

/// Minutes → period. `None` for zero, negative or unrepresentable values.
fn period_for(minutes: f64) -> Option<Duration> {
    if minutes > 0.0 {
        Duration::try_from_secs_f64(minutes * 60.0).ok()
    } else {
        None
    }
}

impl BackupScheduler {
    pub fn new(
        root: impl Into<PathBuf>,
        destination: Option<PathBuf>,
        interval_minutes: f64,
        report: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            root: root.into(),
            settings: Mutex::new(Settings { world: None, destination, interval_minutes }),
            trigger: Mutex::new(None),
            triggers_created: AtomicUsize::new(0),
            copy_lock: tokio::sync::Mutex::new(()),
            report,
        }
    }

    fn settings(&self) -> std::sync::MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn trigger(&self) -> std::sync::MutexGuard<'_, Option<Trigger>> {
        self.trigger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// World directory name, known once the server properties are loaded.
    pub fn set_world(&self, world: Option<String>) {
        self.settings().world = world;
    }

    pub fn interval(&self) -> f64 {
        self.settings().interval_minutes
    }

    pub fn destination(&self) -> Option<PathBuf> {
        self.settings().destination.clone()
    }

    pub fn has_trigger(&self) -> bool {
        self.trigger().is_some()
    }

    pub fn triggers_created(&self) -> usize {
        self.triggers_created.load(Ordering::Relaxed)
    }

    /// Copy `<world>` into `<destination>/<world>`. Copies never overlap.
    pub async fn backup_now(&self) -> BackupOutcome {
        let (world, destination) = {
            let s = self.settings();
            (s.world.clone(), s.destination.clone())
        };
        let Some(destination) = destination else {
            return BackupOutcome::NoDestination;
        };
        let Some(world) = world else {
            return BackupOutcome::SettingsNotLoaded;
        };

        let _guard = self.copy_lock.lock().await;
        let src = self.root.join(&world);
        let dst = self.root.join(destination).join(&world);
        tracing::info!("Backing up {} to {}", src.display(), dst.display());

        match tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dst)).await {
            Ok(Ok(())) => BackupOutcome::Done,
            Ok(Err(e)) => {
                tracing::warn!("World backup failed: {}", e);
                BackupOutcome::Failed(e.to_string())
            }
            Err(e) => BackupOutcome::Failed(e.to_string()),
        }
    }

    /// Change the interval. A live trigger is retuned and fires now; without
    /// one, a trigger is created if a destination is set. A non-positive
    /// interval disarms.
    pub fn set_interval(self: &Arc<Self>, minutes: f64) {
        self.settings().interval_minutes = minutes;
        let Some(period) = period_for(minutes) else {
            self.disarm();
            return;
        };

        let mut trigger = self.trigger();
        if let Some(live) = trigger.as_ref() {
            // send_replace: 수신측이 없어도 값은 갱신
            live.period_tx.send_replace(period);
            return;
        }
        if self.settings().destination.is_some() {
            *trigger = Some(self.spawn_trigger(period, true));
        }
    }

    /// Change the destination; arms a trigger now if an interval is set and
    /// none is running.
    pub fn set_destination(self: &Arc<Self>, destination: PathBuf) {
        let interval = {
            let mut s = self.settings();
            s.destination = Some(destination);
            s.interval_minutes
        };
        let Some(period) = period_for(interval) else { return };

        let mut trigger = self.trigger();
        if trigger.is_none() {
            *trigger = Some(self.spawn_trigger(period, true));
        }
    }

    /// After startup: first tick one period from now.
    pub fn arm_after_startup(self: &Arc<Self>) {
        let (interval, has_destination) = {
            let s = self.settings();
            (s.interval_minutes, s.destination.is_some())
        };
        let Some(period) = period_for(interval) else { return };
        if !has_destination {
            return;
        }

        let mut trigger = self.trigger();
        if trigger.is_none() {
            *trigger = Some(self.spawn_trigger(period, false));
        }
    }

    pub fn disarm(&self) {
        if let Some(trigger) = self.trigger().take() {
            trigger.token.cancel();
            tracing::info!("Backup trigger disarmed");
        }
    }

    fn spawn_trigger(self: &Arc<Self>, period: Duration, fire_now: bool) -> Trigger {
        let (period_tx, period_rx) = watch::channel(period);
        let token = CancellationToken::new();
        self.triggers_created.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Backup trigger armed, every {:?}", period);

        tokio::spawn(run_trigger(Arc::downgrade(self), period_rx, token.clone(), fire_now));
        Trigger { period_tx, token }
    }
}

async fn run_trigger(
    scheduler: Weak<BackupScheduler>,
    mut period_rx: watch::Receiver<Duration>,
    token: CancellationToken,
    mut fire_now: bool,
) {
    loop {
        if fire_now {
            let Some(s) = scheduler.upgrade() else { return };
            let outcome = s.backup_now().await;
            let _ = s.report.send(outcome.message().to_string());
        }
        fire_now = true;

        let period = *period_rx.borrow_and_update();
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
            // 주기 변경: 즉시 실행 후 새 주기로
            changed = period_rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}
