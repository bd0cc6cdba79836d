//! Background polling that keeps a dashboard view model fresh.
//!
//! Status is polled on a short interval, the repo list and the selected
//! repo's memory on a longer one. Every failure is recorded on the snapshot
//! and the loop carries on; the next tick is the retry.

use crate::client::{ClientError, HubClient};
use acd_core::{AgentStatus, DisplayMetrics, MemoryRecord, RepoMap};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, watch, Notify},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, warn};

const NOTIFICATION_CAPACITY: usize = 32;
/// Floor for every polling interval; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusEndpoint {
    /// `/api/status`: status plus repo count and data root.
    #[default]
    Hub,
    /// `/api/agent/status`: status file fields only.
    Agent,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub status_interval: Duration,
    pub repos_interval: Duration,
    pub memory_interval: Duration,
    pub status_endpoint: StatusEndpoint,
}

impl PollerConfig {
    fn clamped(self) -> Self {
        Self {
            status_interval: self.status_interval.max(MIN_POLL_INTERVAL),
            repos_interval: self.repos_interval.max(MIN_POLL_INTERVAL),
            memory_interval: self.memory_interval.max(MIN_POLL_INTERVAL),
            ..self
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(2),
            repos_interval: Duration::from_secs(5),
            memory_interval: Duration::from_secs(5),
            status_endpoint: StatusEndpoint::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub status: Option<AgentStatus>,
    pub repos: RepoMap,
    pub selected_repo: Option<String>,
    pub memory: Option<MemoryRecord>,
    pub status_error: Option<String>,
    pub repos_error: Option<String>,
    pub memory_error: Option<String>,
    /// Completed status polls, successful or not.
    pub status_polls: u64,
}

impl DashboardSnapshot {
    pub fn is_running(&self) -> bool {
        self.status.as_ref().is_some_and(|status| status.running)
    }

    pub fn metrics(&self) -> DisplayMetrics {
        let mut metrics = DisplayMetrics::from_status(self.status.as_ref());
        if metrics.repos_count == 0 {
            metrics.repos_count = self.repos.len() as u64;
        }
        metrics
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Destructive,
}

/// A user-facing toast.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub kind: NotificationKind,
    pub at: DateTime<Utc>,
}

impl Notification {
    fn new(kind: NotificationKind, title: &str, description: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            description: description.into(),
            kind,
            at: Utc::now(),
        }
    }
}

struct Shared {
    snapshot: watch::Sender<DashboardSnapshot>,
    notifications: broadcast::Sender<Notification>,
    refetch_status: Notify,
    refetch_memory: Notify,
}

impl Shared {
    fn notify(&self, notification: Notification) {
        // No subscriber is fine; toasts are not replayed.
        let _ = self.notifications.send(notification);
    }
}

pub struct Poller;

impl Poller {
    /// Starts polling immediately. Polling runs until the handle is shut
    /// down or dropped. Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn spawn(client: HubClient, config: PollerConfig) -> PollerHandle {
        let config = config.clamped();
        let (snapshot, _) = watch::channel(DashboardSnapshot::default());
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let shared = Arc::new(Shared {
            snapshot,
            notifications,
            refetch_status: Notify::new(),
            refetch_memory: Notify::new(),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(status_loop(
                client.clone(),
                shared.clone(),
                config.status_interval,
                config.status_endpoint,
                shutdown_rx.clone(),
            )),
            tokio::spawn(repos_loop(
                client.clone(),
                shared.clone(),
                config.repos_interval,
                shutdown_rx.clone(),
            )),
            tokio::spawn(memory_loop(
                client.clone(),
                shared.clone(),
                config.memory_interval,
                shutdown_rx,
            )),
        ];

        PollerHandle {
            client,
            shared,
            shutdown_tx,
            tasks,
        }
    }
}

pub struct PollerHandle {
    client: HubClient,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifications.subscribe()
    }

    pub fn is_active(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|task| !task.is_finished())
    }

    pub fn select_repo(&self, repo_id: impl Into<String>) {
        let repo_id = repo_id.into();
        self.shared.snapshot.send_modify(|snapshot| {
            if snapshot.selected_repo.as_deref() != Some(repo_id.as_str()) {
                snapshot.memory = None;
                snapshot.memory_error = None;
            }
            snapshot.selected_repo = Some(repo_id);
        });
        self.shared.refetch_memory.notify_one();
    }

    pub fn refresh(&self) {
        self.shared.refetch_status.notify_one();
    }

    pub async fn start_agent(&self) -> Result<(), ClientError> {
        match self.client.start().await {
            Ok(_) => {
                self.shared.notify(Notification::new(
                    NotificationKind::Info,
                    "Agent Started",
                    "The agent companion is now observing file changes.",
                ));
                self.refresh();
                Ok(())
            }
            Err(err) => {
                warn!(event = "agent_start_failed", error = %err);
                self.shared.notify(Notification::new(
                    NotificationKind::Destructive,
                    "Failed to start",
                    err.to_string(),
                ));
                Err(err)
            }
        }
    }

    pub async fn stop_agent(&self) -> Result<(), ClientError> {
        match self.client.stop().await {
            Ok(response) => {
                let description = response
                    .message
                    .unwrap_or_else(|| "Observation halted.".to_string());
                self.shared.notify(Notification::new(
                    NotificationKind::Info,
                    "Agent Stopped",
                    description,
                ));
                self.refresh();
                Ok(())
            }
            Err(err) => {
                warn!(event = "agent_stop_failed", error = %err);
                self.shared.notify(Notification::new(
                    NotificationKind::Destructive,
                    "Failed to stop",
                    err.to_string(),
                ));
                Err(err)
            }
        }
    }

    /// Stops every polling task and waits for them to finish. No request is
    /// issued after this returns.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn status_loop(
    client: HubClient,
    shared: Arc<Shared>,
    period: Duration,
    endpoint: StatusEndpoint,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = shared.refetch_status.notified() => ticker.reset(),
        }
        let result = match endpoint {
            StatusEndpoint::Hub => client.hub_status().await,
            StatusEndpoint::Agent => client.status().await,
        };
        shared.snapshot.send_modify(|snapshot| {
            snapshot.status_polls += 1;
            match result {
                Ok(status) => {
                    snapshot.status = Some(status);
                    snapshot.status_error = None;
                }
                Err(err) => {
                    debug!(event = "status_poll_failed", error = %err);
                    snapshot.status_error = Some(err.to_string());
                }
            }
        });
    }
}

async fn repos_loop(
    client: HubClient,
    shared: Arc<Shared>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        let result = client.repos().await;
        let mut selected_now = false;
        shared.snapshot.send_modify(|snapshot| match result {
            Ok(repos) => {
                if snapshot.selected_repo.is_none() {
                    snapshot.selected_repo = repos.keys().next().cloned();
                    selected_now = snapshot.selected_repo.is_some();
                }
                snapshot.repos = repos;
                snapshot.repos_error = None;
            }
            Err(err) => {
                debug!(event = "repos_poll_failed", error = %err);
                snapshot.repos_error = Some(err.to_string());
            }
        });
        if selected_now {
            shared.refetch_memory.notify_one();
        }
    }
}

async fn memory_loop(
    client: HubClient,
    shared: Arc<Shared>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = shared.refetch_memory.notified() => ticker.reset(),
        }
        let Some(repo_id) = shared.snapshot.borrow().selected_repo.clone() else {
            continue;
        };
        let result = client.memory(&repo_id).await;
        shared.snapshot.send_modify(|snapshot| {
            // Selection may have moved while the request was in flight.
            if snapshot.selected_repo.as_deref() != Some(repo_id.as_str()) {
                return;
            }
            match result {
                Ok(memory) => {
                    snapshot.memory = Some(memory);
                    snapshot.memory_error = None;
                }
                Err(err) => {
                    debug!(event = "memory_poll_failed", repo_id = %repo_id, error = %err);
                    snapshot.memory_error = Some(err.to_string());
                }
            }
        });
    }
}
