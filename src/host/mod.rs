//! Host platform capabilities consumed by the coordinator.
//!
//! The browser provides a recurring-alarm facility, tab lookup, page
//! messaging and script injection. Each is a trait here so the coordinator can
//! run against the in-memory implementations in [`memory`] and [`loopback`]
//! as easily as against a real host binding.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::protocol::{PageReply, PageRequest};
use crate::state::storage::StorageArea;
use crate::state::{Millis, TargetId};
use crate::time_source::TimeSource;

pub mod loopback;
pub mod memory;

/// A native alarm as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub name: String,
    /// Next fire time, epoch milliseconds.
    pub scheduled_time: Millis,
    /// Repeat period; `None` for one-shot alarms.
    pub period_ms: Option<u64>,
}

/// The host's named alarm registry.
pub trait AlarmFacility: Send + Sync {
    /// Create (or replace) the alarm `name`.
    fn create(&self, name: &str, delay_ms: u64, period_ms: Option<u64>) -> Result<Alarm>;

    /// Remove the alarm `name`. Returns whether one existed.
    fn clear(&self, name: &str) -> Result<bool>;

    fn get_all(&self) -> Result<Vec<Alarm>>;

    fn get(&self, name: &str) -> Result<Option<Alarm>> {
        Ok(self.get_all()?.into_iter().find(|alarm| alarm.name == name))
    }
}

/// Load state of a target page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Loading,
    Complete,
    Unloaded,
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadStatus::Loading => "loading",
            LoadStatus::Complete => "complete",
            LoadStatus::Unloaded => "unloaded",
        };
        f.write_str(name)
    }
}

/// What the host knows about a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    pub id: TargetId,
    /// Absent while a page is loading or when the host hides it.
    pub url: Option<String>,
    pub status: LoadStatus,
    pub title: Option<String>,
}

/// Tab lookup.
#[cfg_attr(test, mockall::automock)]
pub trait TargetHost: Send + Sync {
    /// The foreground page of the focused window, if any.
    fn active_target(&self) -> Result<Option<TargetInfo>>;

    fn get(&self, id: TargetId) -> Result<Option<TargetInfo>>;
}

/// Failure to deliver a message to a page executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Nothing is listening in the page, usually because the executor was
    /// never injected or the page navigated.
    #[error("Could not establish connection. Receiving end does not exist.")]
    NoReceiver,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

impl DeliveryError {
    pub fn is_no_receiver(&self) -> bool {
        matches!(self, DeliveryError::NoReceiver)
    }
}

/// Request/response messaging with page executors.
#[cfg_attr(test, mockall::automock)]
pub trait PageTransport: Send + Sync {
    fn send(&self, target: TargetId, request: &PageRequest) -> Result<PageReply, DeliveryError>;
}

/// Loads the page executor into a page.
#[cfg_attr(test, mockall::automock)]
pub trait ScriptInjector: Send + Sync {
    fn inject(&self, target: TargetId) -> Result<()>;
}

/// Every host capability the coordinator depends on.
#[derive(Clone)]
pub struct HostServices {
    pub clock: Arc<dyn TimeSource>,
    pub alarms: Arc<dyn AlarmFacility>,
    pub targets: Arc<dyn TargetHost>,
    pub transport: Arc<dyn PageTransport>,
    pub injector: Arc<dyn ScriptInjector>,
    /// Settings and language preference.
    pub sync_storage: Arc<dyn StorageArea>,
    /// Legacy runtime state only.
    pub local_storage: Arc<dyn StorageArea>,
}
