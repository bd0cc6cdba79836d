//! HTTP client and background poller for the agent companion hub.

pub mod client;
pub mod poller;

pub use client::{ClientError, HubClient, DEFAULT_HUB_URL};
pub use poller::{
    DashboardSnapshot, Notification, NotificationKind, Poller, PollerConfig, PollerHandle,
    StatusEndpoint, MIN_POLL_INTERVAL,
};
