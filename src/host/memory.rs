//! In-memory alarm registry and tab table.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Alarm, AlarmFacility, LoadStatus, TargetHost, TargetInfo};
use crate::state::{Millis, TargetId};
use crate::time_source::TimeSource;

/// Alarm registry driven by a [`TimeSource`].
///
/// Nothing fires on its own: the owner calls [`MemoryAlarms::fire_due`] after
/// advancing the clock and forwards the result to the coordinator.
pub struct MemoryAlarms {
    clock: Arc<dyn TimeSource>,
    alarms: Mutex<BTreeMap<String, Alarm>>,
    fail: AtomicBool,
}

impl MemoryAlarms {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self {
            clock,
            alarms: Mutex::new(BTreeMap::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail, as a revoked permission would.
    pub fn fail_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Register an alarm directly, bypassing delay computation.
    pub fn insert(&self, alarm: Alarm) {
        self.lock().insert(alarm.name.clone(), alarm);
    }

    /// Earliest pending fire time.
    pub fn next_due(&self) -> Option<Millis> {
        self.lock().values().map(|alarm| alarm.scheduled_time).min()
    }

    /// Fire every alarm whose time has come.
    ///
    /// Returned alarms carry the time they were due. Periodic alarms are moved
    /// to their next slot after now, one-shot alarms are removed.
    pub fn fire_due(&self) -> Vec<Alarm> {
        let now = self.clock.now_millis();
        let mut alarms = self.lock();
        let mut fired = Vec::new();

        let due: Vec<String> = alarms
            .values()
            .filter(|alarm| alarm.scheduled_time <= now)
            .map(|alarm| alarm.name.clone())
            .collect();

        for name in due {
            let Some(alarm) = alarms.get_mut(&name) else {
                continue;
            };
            fired.push(alarm.clone());
            match alarm.period_ms {
                Some(period) if period > 0 => {
                    let period = period as Millis;
                    let missed = (now - alarm.scheduled_time) / period + 1;
                    alarm.scheduled_time += missed * period;
                }
                _ => {
                    alarms.remove(&name);
                }
            }
        }

        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Alarm>> {
        self.alarms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("alarm facility unavailable");
        }
        Ok(())
    }
}

impl AlarmFacility for MemoryAlarms {
    fn create(&self, name: &str, delay_ms: u64, period_ms: Option<u64>) -> Result<Alarm> {
        self.check()?;
        let alarm = Alarm {
            name: name.to_string(),
            scheduled_time: self.clock.now_millis() + delay_ms as Millis,
            period_ms,
        };
        self.insert(alarm.clone());
        Ok(alarm)
    }

    fn clear(&self, name: &str) -> Result<bool> {
        self.check()?;
        Ok(self.lock().remove(name).is_some())
    }

    fn get_all(&self) -> Result<Vec<Alarm>> {
        self.check()?;
        Ok(self.lock().values().cloned().collect())
    }
}

/// Tab table with a single focused tab.
#[derive(Default)]
pub struct MemoryTargets {
    targets: Mutex<HashMap<TargetId, TargetInfo>>,
    active: Mutex<Option<TargetId>>,
}

impl MemoryTargets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fully loaded page and focus it.
    pub fn open(&self, id: TargetId, url: &str) {
        self.upsert(TargetInfo {
            id,
            url: Some(url.to_string()),
            status: LoadStatus::Complete,
            title: None,
        });
        self.activate(id);
    }

    pub fn upsert(&self, info: TargetInfo) {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.id, info);
    }

    pub fn close(&self, id: TargetId) {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if *active == Some(id) {
            *active = None;
        }
    }

    pub fn activate(&self, id: TargetId) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    pub fn set_status(&self, id: TargetId, status: LoadStatus) {
        if let Some(info) = self
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&id)
        {
            info.status = status;
        }
    }
}

impl TargetHost for MemoryTargets {
    fn active_target(&self) -> Result<Option<TargetInfo>> {
        let active = *self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    fn get(&self, id: TargetId) -> Result<Option<TargetInfo>> {
        Ok(self
            .targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned())
    }
}
