//! Background coordinator.
//!
//! This module owns the coordinator's lifecycle. It wires the shared settings
//! record, scheduler, reconciler, router and alarm handler together and runs
//! them as an explicit event loop:
//!
//! - startup runs the storage migration, then reconciliation
//! - UI messages are answered on the loop thread
//! - alarm fires are handled on a worker thread so requests stay responsive
//!   while a sequence runs; overlapping fires are dropped
//! - the in-memory record is saved periodically and on suspend
//!
//! Everything host-specific arrives through [`HostServices`].

pub mod context;
pub mod cycle;
pub mod reconciler;
pub mod router;
pub mod scheduler;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::host::{Alarm, HostServices};
use crate::link::{Courier, DeliveryPolicy, Prober};
use crate::protocol::{BackgroundRequest, BackgroundResponse};
use crate::state::TargetId;
use crate::state::migration::migrate;
use crate::state::store::SettingsStore;

pub use context::{SharedState, Timings};
pub use cycle::{CycleOutcome, CycleRunner, SkipReason};
pub use reconciler::{ReconcileAction, Reconciler};
pub use router::Router;
pub use scheduler::{ScheduleChange, Scheduler};

/// Everything that can wake the coordinator.
pub enum CoordinatorEvent {
    /// A UI message and where to send the answer.
    Request { message: Value, reply: Sender<Value> },
    /// The host fired an alarm. `done` receives the outcome when given.
    AlarmFired {
        alarm: Alarm,
        done: Option<Sender<CycleOutcome>>,
    },
    /// The user switched to another page.
    TargetActivated(TargetId),
    /// The host is about to suspend the coordinator.
    Suspend,
    Shutdown,
}

pub struct Coordinator {
    services: HostServices,
    timings: Timings,
    state: SharedState,
    reconciler: Reconciler,
    router: Router,
    cycles: CycleRunner,
    cycle_running: Arc<AtomicBool>,
}

impl Coordinator {
    pub fn new(services: HostServices, timings: Timings) -> Self {
        let clock = services.clock.clone();
        let store = Arc::new(SettingsStore::new(
            services.sync_storage.clone(),
            clock.clone(),
            timings.save_retry,
        ));
        let state = SharedState::load(store);

        let scheduler = Scheduler::new(state.clone(), services.alarms.clone(), clock.clone());
        let reconciler = Reconciler::new(
            state.clone(),
            services.alarms.clone(),
            clock.clone(),
            timings,
        );
        let router = Router::new(state.clone(), scheduler);

        let prober = Arc::new(Prober::new(
            services.targets.clone(),
            services.transport.clone(),
            services.injector.clone(),
            clock.clone(),
            timings.loading_retry_interval,
            timings.injection_settle,
        ));
        let courier = Arc::new(Courier::new(
            services.transport.clone(),
            services.injector.clone(),
            clock.clone(),
            DeliveryPolicy {
                attempts: timings.delivery_attempts,
                reinject_settle: timings.reinject_settle,
                retry_delay: timings.delivery_retry_delay,
            },
        ));
        let cycles = CycleRunner::new(
            state.clone(),
            services.targets.clone(),
            prober,
            courier,
            clock,
        );

        Self {
            services,
            timings,
            state,
            reconciler,
            router,
            cycles,
            cycle_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Bring storage up to date and reconcile it with the native alarms.
    pub fn start(&self) -> ReconcileAction {
        match migrate(self.state.store(), self.services.local_storage.as_ref()) {
            Ok(report) if report.changed_anything() => {
                log_decorated!("Storage migration complete");
            }
            Ok(_) => {}
            Err(e) => log_warning!("Storage migration skipped: {e:#}"),
        }
        self.reconciler.reconcile()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Answer a raw UI message.
    pub fn handle_message(&self, message: &Value) -> Value {
        self.router.dispatch(message)
    }

    pub fn handle_request(&self, request: BackgroundRequest) -> BackgroundResponse {
        self.router.handle(request)
    }

    /// Run the alarm handler on the calling thread.
    pub fn on_alarm(&self, alarm: &Alarm) -> CycleOutcome {
        run_exclusive(&self.cycles, &self.cycle_running, alarm)
    }

    /// Track the foreground page without writing to storage.
    pub fn on_target_activated(&self, target: TargetId) {
        let mut tracked = false;
        self.state.update_quietly(|s| {
            if s.timer_active {
                s.active_target_id = Some(target);
                tracked = true;
            }
        });
        if tracked {
            log_debug!("Switched to target {target}, rotation timer continues");
        }
    }

    /// Save the in-memory record.
    pub fn persist(&self) -> bool {
        let saved = self.state.persist();
        if !saved {
            log_warning!("Periodic settings save failed");
        }
        saved
    }

    /// Move the coordinator onto its own thread.
    pub fn spawn(self) -> Result<(CoordinatorHandle, JoinHandle<()>)> {
        let (tx, rx) = channel();
        let handle = CoordinatorHandle {
            tx,
            timeout: self.timings.message_timeout,
        };
        let thread = std::thread::Builder::new()
            .name("coordinator".to_string())
            .spawn(move || self.run(rx))
            .context("Failed to spawn coordinator thread")?;
        Ok((handle, thread))
    }

    /// Process events until `Shutdown` or until every sender is gone.
    pub fn run(self, events: Receiver<CoordinatorEvent>) {
        let interval = self.timings.persist_interval;
        let mut last_persist = Instant::now();
        let mut worker: Option<JoinHandle<()>> = None;

        loop {
            let wait = interval.saturating_sub(last_persist.elapsed());
            match events.recv_timeout(wait) {
                Ok(CoordinatorEvent::Request { message, reply }) => {
                    let _ = reply.send(self.handle_message(&message));
                }
                Ok(CoordinatorEvent::AlarmFired { alarm, done }) => {
                    if let Some(finished) = worker.take_if(|w| w.is_finished()) {
                        let _ = finished.join();
                    }
                    match self.dispatch_alarm(alarm, done) {
                        Ok(Some(spawned)) => worker = Some(spawned),
                        Ok(None) => {}
                        Err(e) => log_error!("{e:#}"),
                    }
                }
                Ok(CoordinatorEvent::TargetActivated(target)) => self.on_target_activated(target),
                Ok(CoordinatorEvent::Suspend) => {
                    log_decorated!("Suspending, saving settings");
                    self.persist();
                    last_persist = Instant::now();
                }
                Ok(CoordinatorEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if last_persist.elapsed() >= interval {
                self.persist();
                last_persist = Instant::now();
            }
        }

        if let Some(worker) = worker {
            let _ = worker.join();
        }
        self.persist();
        log_decorated!("Coordinator stopped");
    }

    fn dispatch_alarm(
        &self,
        alarm: Alarm,
        done: Option<Sender<CycleOutcome>>,
    ) -> Result<Option<JoinHandle<()>>> {
        if self.cycle_running.load(Ordering::SeqCst) {
            log_info!("Previous cycle still running, dropping alarm");
            if let Some(done) = done {
                let _ = done.send(CycleOutcome::Skipped(SkipReason::CycleInProgress));
            }
            return Ok(None);
        }

        let cycles = self.cycles.clone();
        let running = self.cycle_running.clone();
        let spawned = std::thread::Builder::new()
            .name("rotation-cycle".to_string())
            .spawn(move || {
                let outcome = run_exclusive(&cycles, &running, &alarm);
                if let Some(done) = done {
                    let _ = done.send(outcome);
                }
            })
            .context("Failed to spawn rotation cycle")?;
        Ok(Some(spawned))
    }
}

/// Run one alarm fire unless another is in flight.
fn run_exclusive(cycles: &CycleRunner, running: &AtomicBool, alarm: &Alarm) -> CycleOutcome {
    if running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return CycleOutcome::Skipped(SkipReason::CycleInProgress);
    }
    let _guard = RunGuard(running);
    cycles.on_alarm(alarm)
}

/// Clears the in-flight flag when a fire ends, even by unwinding.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sending side of a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: Sender<CoordinatorEvent>,
    timeout: Duration,
}

impl CoordinatorHandle {
    /// Send a raw message and wait for the answer, up to the message timeout.
    pub fn send_message(&self, message: Value) -> Result<Value> {
        let (reply, response) = channel();
        self.send(CoordinatorEvent::Request { message, reply })?;
        response
            .recv_timeout(self.timeout)
            .map_err(|e| anyhow!("No response from coordinator within {:?}: {e}", self.timeout))
    }

    pub fn request(&self, request: &BackgroundRequest) -> Result<BackgroundResponse> {
        let value = self.send_message(request.to_value())?;
        serde_json::from_value(value).context("Malformed coordinator response")
    }

    /// Deliver an alarm fire and wait for the cycle to finish.
    pub fn fire_alarm(&self, alarm: Alarm) -> Result<CycleOutcome> {
        let (done, outcome) = channel();
        self.send(CoordinatorEvent::AlarmFired {
            alarm,
            done: Some(done),
        })?;
        outcome
            .recv()
            .map_err(|_| anyhow!("Coordinator dropped the alarm"))
    }

    /// Deliver an alarm fire without waiting.
    pub fn notify_alarm(&self, alarm: Alarm) -> Result<()> {
        self.send(CoordinatorEvent::AlarmFired { alarm, done: None })
    }

    pub fn target_activated(&self, target: TargetId) -> Result<()> {
        self.send(CoordinatorEvent::TargetActivated(target))
    }

    pub fn suspend(&self) -> Result<()> {
        self.send(CoordinatorEvent::Suspend)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(CoordinatorEvent::Shutdown)
    }

    fn send(&self, event: CoordinatorEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow!("Coordinator is not running"))
    }
}
