// src/watch/supervisor.rs
//! Control task owning the per-platform loop registry.
//!
//! Commands arrive over an mpsc channel and are handled one at a time, so
//! config mutations never interleave with each other. Loops read the shared
//! config under a read lock once per cycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{LoopExit, Phase, WatchContext, WatchLoop, WatchPolicy};
use super::types::{Platform, PostSource, WatchedAccount};
use crate::analyze::Classifier;
use crate::config::{Config, SettingsUpdate, SharedConfig};
use crate::error::ControlError;
use crate::notify::NotifierMux;

const COMMAND_BUFFER: usize = 32;
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
const ABORT_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Stopped,
    Running,
    Cancelling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopStatus {
    pub platform: Platform,
    pub available: bool,
    pub state: LoopState,
    /// Last phase published by the loop, if it ever ran.
    pub phase: Option<Phase>,
    pub check_interval_min: u64,
    pub accounts: usize,
}

/// Outcome of a settings change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingsApplied {
    /// Active notification sinks after the change.
    pub sinks: Vec<String>,
    /// Running loops that keep their old interval until restarted.
    pub restart_required: Vec<Platform>,
}

type Reply<T> = oneshot::Sender<Result<T, ControlError>>;

#[derive(Debug)]
pub enum Command {
    StartWatch {
        platform: Platform,
        reply: Reply<LoopState>,
    },
    StopWatch {
        platform: Platform,
        reply: Reply<LoopState>,
    },
    AddAccount {
        account: WatchedAccount,
        reply: Reply<()>,
    },
    AddRecipient {
        address: String,
        reply: Reply<()>,
    },
    UpdateSettings {
        update: SettingsUpdate,
        reply: Reply<SettingsApplied>,
    },
    Status {
        reply: oneshot::Sender<Vec<LoopStatus>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable client of the supervisor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ControlError::SupervisorGone)?;
        rx.await.map_err(|_| ControlError::SupervisorGone)?
    }

    pub async fn start_watch(&self, platform: Platform) -> Result<LoopState, ControlError> {
        self.request(|reply| Command::StartWatch { platform, reply })
            .await
    }

    pub async fn stop_watch(&self, platform: Platform) -> Result<LoopState, ControlError> {
        self.request(|reply| Command::StopWatch { platform, reply })
            .await
    }

    pub async fn add_account(&self, account: WatchedAccount) -> Result<(), ControlError> {
        self.request(|reply| Command::AddAccount { account, reply })
            .await
    }

    pub async fn add_recipient(&self, address: impl Into<String>) -> Result<(), ControlError> {
        let address = address.into();
        self.request(|reply| Command::AddRecipient { address, reply })
            .await
    }

    pub async fn update_settings(&self, update: SettingsUpdate) -> Result<SettingsApplied, ControlError> {
        self.request(|reply| Command::UpdateSettings { update, reply })
            .await
    }

    pub async fn status(&self) -> Result<Vec<LoopStatus>, ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Status { reply })
            .await
            .map_err(|_| ControlError::SupervisorGone)?;
        rx.await.map_err(|_| ControlError::SupervisorGone)
    }

    /// Cancel every loop and stop the supervisor.
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| ControlError::SupervisorGone)?;
        rx.await.map_err(|_| ControlError::SupervisorGone)
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<LoopExit>,
    phase: watch::Receiver<Phase>,
}

pub struct Supervisor {
    sources: HashMap<Platform, Arc<dyn PostSource>>,
    classifier: Arc<Classifier>,
    notifier: Arc<NotifierMux>,
    config: SharedConfig,
    config_path: Option<PathBuf>,
    stop_grace: Duration,
    running: HashMap<Platform, RunningLoop>,
    stopping: HashMap<Platform, JoinHandle<Phase>>,
    last_phase: HashMap<Platform, Phase>,
}

impl Supervisor {
    pub fn new(config: SharedConfig, classifier: Arc<Classifier>, notifier: Arc<NotifierMux>) -> Self {
        Self {
            sources: HashMap::new(),
            classifier,
            notifier,
            config,
            config_path: None,
            stop_grace: DEFAULT_STOP_GRACE,
            running: HashMap::new(),
            stopping: HashMap::new(),
            last_phase: HashMap::new(),
        }
    }

    /// Register an authenticated source; its platform becomes startable.
    pub fn with_source(mut self, source: Arc<dyn PostSource>) -> Self {
        self.sources.insert(source.platform(), source);
        self
    }

    /// Persist config mutations to `path`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn spawn(self) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(self.run(rx));
        (SupervisorHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(target: "control", available = ?self.available(), "supervisor started");
        while let Some(cmd) = rx.recv().await {
            debug!(target: "control", command = ?cmd, "command received");
            match cmd {
                Command::StartWatch { platform, reply } => {
                    let _ = reply.send(self.start(platform).await);
                }
                Command::StopWatch { platform, reply } => {
                    let _ = reply.send(Ok(self.stop(platform)));
                }
                Command::AddAccount { account, reply } => {
                    let _ = reply.send(self.add_account(account).await);
                }
                Command::AddRecipient { address, reply } => {
                    let _ = reply.send(self.add_recipient(&address).await);
                }
                Command::UpdateSettings { update, reply } => {
                    let _ = reply.send(self.update_settings(update).await);
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.status().await);
                }
                Command::Shutdown { reply } => {
                    self.shutdown_all().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        if !self.running.is_empty() {
            self.shutdown_all().await;
        }
        info!(target: "control", "supervisor stopped");
    }

    fn available(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.sources.contains_key(p))
            .collect()
    }

    async fn start(&mut self, platform: Platform) -> Result<LoopState, ControlError> {
        let source = self
            .sources
            .get(&platform)
            .cloned()
            .ok_or(ControlError::PlatformUnavailable(platform))?;

        self.reap();
        if self.running.contains_key(&platform) {
            return Ok(LoopState::Running);
        }
        if let Some(stopping) = self.stopping.remove(&platform) {
            debug!(target: "control", platform = platform.as_str(), "waiting for previous loop to finish");
            let phase = stopping.await.unwrap_or(Phase::Failed);
            self.last_phase.insert(platform, phase);
        }

        let interval = self.config.read().await.check_interval(platform);
        let ctx = WatchContext {
            platform,
            source,
            classifier: Arc::clone(&self.classifier),
            notifier: Arc::clone(&self.notifier),
            config: Arc::clone(&self.config),
            policy: WatchPolicy::from_minutes(interval),
        };
        let watch_loop = WatchLoop::new(ctx);
        let phase = watch_loop.subscribe();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watch_loop.run(cancel.clone()));

        self.running.insert(
            platform,
            RunningLoop {
                cancel,
                handle,
                phase,
            },
        );
        info!(target: "control", platform = platform.as_str(), interval_min = interval, "watch started");
        Ok(LoopState::Running)
    }

    fn stop(&mut self, platform: Platform) -> LoopState {
        self.reap();
        let Some(entry) = self.running.remove(&platform) else {
            return if self.stopping.contains_key(&platform) {
                LoopState::Cancelling
            } else {
                LoopState::Stopped
            };
        };

        self.last_phase.insert(platform, *entry.phase.borrow());
        entry.cancel.cancel();
        let grace = self.stop_grace;
        let task = tokio::spawn(finish_loop(platform, entry.handle, grace));
        self.stopping.insert(platform, task);
        info!(target: "control", platform = platform.as_str(), "watch cancellation requested");
        LoopState::Cancelling
    }

    /// Drop registry entries whose task has already finished.
    fn reap(&mut self) {
        let finished: Vec<Platform> = self
            .running
            .iter()
            .filter(|(_, l)| l.handle.is_finished())
            .map(|(p, _)| *p)
            .collect();
        for platform in finished {
            let Some(mut entry) = self.running.remove(&platform) else {
                continue;
            };
            let phase = match (&mut entry.handle).now_or_never() {
                Some(Err(e)) if e.is_panic() => {
                    error!(target: "control", platform = platform.as_str(), error = %e, "watch loop failed");
                    Phase::Failed
                }
                _ => *entry.phase.borrow(),
            };
            self.last_phase.insert(platform, phase);
        }

        let stopped: Vec<Platform> = self
            .stopping
            .iter()
            .filter(|(_, t)| t.is_finished())
            .map(|(p, _)| *p)
            .collect();
        for platform in stopped {
            let Some(task) = self.stopping.remove(&platform) else {
                continue;
            };
            let phase = task
                .now_or_never()
                .and_then(Result::ok)
                .unwrap_or(Phase::Failed);
            self.last_phase.insert(platform, phase);
        }
    }

    fn state_of(&self, platform: Platform) -> LoopState {
        if self.running.contains_key(&platform) {
            LoopState::Running
        } else if self.stopping.contains_key(&platform) {
            LoopState::Cancelling
        } else {
            LoopState::Stopped
        }
    }

    async fn status(&mut self) -> Vec<LoopStatus> {
        self.reap();
        let cfg = self.config.read().await;
        Platform::ALL
            .into_iter()
            .map(|platform| LoopStatus {
                platform,
                available: self.sources.contains_key(&platform),
                state: self.state_of(platform),
                phase: self
                    .running
                    .get(&platform)
                    .map(|l| *l.phase.borrow())
                    .or_else(|| self.last_phase.get(&platform).copied()),
                check_interval_min: cfg.check_interval(platform),
                accounts: cfg.accounts_for(platform).len(),
            })
            .collect()
    }

    async fn add_account(&mut self, account: WatchedAccount) -> Result<(), ControlError> {
        let snapshot = {
            let mut cfg = self.config.write().await;
            cfg.add_account(account.clone())?;
            cfg.clone()
        };
        info!(target: "control", platform = account.platform.as_str(), account = %account.username, "account added");
        self.persist(snapshot).await
    }

    async fn add_recipient(&mut self, address: &str) -> Result<(), ControlError> {
        let snapshot = {
            let mut cfg = self.config.write().await;
            cfg.add_recipient(address)?;
            cfg.clone()
        };
        info!(target: "control", recipient = %address.trim(), "recipient added");
        self.persist(snapshot).await
    }

    /// New intervals apply from the next loop start; sink changes apply at once.
    async fn update_settings(&mut self, update: SettingsUpdate) -> Result<SettingsApplied, ControlError> {
        let snapshot = {
            let mut cfg = self.config.write().await;
            cfg.apply_settings(&update)?;
            cfg.clone()
        };
        if update.touches_sinks() {
            self.notifier
                .replace_with(NotifierMux::from_config(&snapshot.email));
        }

        self.reap();
        let restart_required: Vec<Platform> = update
            .interval_changes()
            .into_iter()
            .filter(|p| self.running.contains_key(p))
            .collect();
        info!(target: "control", update = ?update, restart_required = ?restart_required, "settings updated");

        self.persist(snapshot).await?;
        Ok(SettingsApplied {
            sinks: self.notifier.sink_names(),
            restart_required,
        })
    }

    async fn persist(&self, snapshot: Config) -> Result<(), ControlError> {
        let Some(path) = self.config_path.clone() else {
            return Ok(());
        };
        tokio::task::spawn_blocking(move || snapshot.save_to(&path))
            .await
            .map_err(|e| ControlError::Persist(format!("save task failed: {e}")))?
            .map_err(|e| ControlError::Persist(format!("{e:#}")))
    }

    async fn shutdown_all(&mut self) {
        let platforms: Vec<Platform> = self.running.keys().copied().collect();
        for platform in platforms {
            self.stop(platform);
        }
        let stopping: Vec<(Platform, JoinHandle<Phase>)> = self.stopping.drain().collect();
        for (platform, task) in stopping {
            match task.await {
                Ok(phase) => {
                    self.last_phase.insert(platform, phase);
                }
                Err(e) => {
                    warn!(target: "control", platform = platform.as_str(), error = %e, "loop shutdown task failed");
                }
            }
        }
    }
}

/// Wait for a cancelled loop; abort it if it overstays `grace`. Returns the
/// phase the loop ended in.
async fn finish_loop(platform: Platform, mut handle: JoinHandle<LoopExit>, grace: Duration) -> Phase {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(exit)) => {
            info!(target: "control", platform = platform.as_str(), cycles = exit.cycles, "watch stopped");
            Phase::Cancelled
        }
        Ok(Err(e)) => {
            error!(target: "control", platform = platform.as_str(), error = %e, "watch loop ended abnormally");
            Phase::Failed
        }
        Err(_) => {
            warn!(target: "control", platform = platform.as_str(), grace_secs = grace.as_secs(), "watch loop ignored cancellation, aborting");
            handle.abort();
            let _ = tokio::time::timeout(ABORT_WAIT, handle).await;
            Phase::Cancelled
        }
    }
}
