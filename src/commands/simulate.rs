//! Implementation of the `simulate` command.
//!
//! Runs the full coordinator against an in-process page on a simulated clock:
//! the rotation schedule is started, alarms are fired as simulated time
//! reaches them, and every sequence is executed by a real [`PageExecutor`]
//! behind the loopback bridge. With the default multiplier of `0` a ten-minute
//! cycle completes in well under a second.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;

use crate::args::SimulateOptions;
use crate::config::Config;
use crate::core::{CycleOutcome, Coordinator};
use crate::host::loopback::{LoopbackBridge, PageEndpoint};
use crate::host::memory::{MemoryAlarms, MemoryTargets};
use crate::host::{HostServices, PageTransport, ScriptInjector};
use crate::logger::Log;
use crate::page::overlay::StatusOverlay;
use crate::page::surface::RecordingSurface;
use crate::page::{ExecutorParams, PageExecutor, StaticEnvironment};
use crate::protocol::BackgroundRequest;
use crate::signals::{SignalMessage, setup_signal_handler};
use crate::state::storage::{FileStorage, MemoryStorage, StorageArea};
use crate::state::{SettingsPatch, TargetId};
use crate::time_source::{SimulatedTimeSource, TimeSource, format_millis};

/// Longest simulated wait between checks for signals.
const SIGNAL_CHECK_INTERVAL: Duration = Duration::from_secs(10);

const INSTANCE_LOCK_FILE: &str = "dogtor.lock";

const SIMULATED_TARGET: TargetId = TargetId(1);
const SIMULATED_URL: &str = "https://example.com/long-read";

/// Overlay that writes page messages to the debug log.
struct LogOverlay;

impl StatusOverlay for LogOverlay {
    fn show(&self, text: &str) {
        log_debug!("Overlay: {text}");
    }

    fn hide(&self) {
        log_debug!("Overlay hidden");
    }
}

type StorageTiers = (Arc<dyn StorageArea>, Arc<dyn StorageArea>, Option<File>);

/// Pick the storage tiers. Persistent tiers are guarded by an instance lock,
/// held until the returned file is dropped.
fn storage_tiers(persist: bool) -> Result<StorageTiers> {
    if !persist {
        return Ok((
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryStorage::new()),
            None,
        ));
    }

    let sync = FileStorage::in_state_dir("sync")?;
    let local = FileStorage::in_state_dir("local")?;
    let lock_dir = sync
        .root()
        .parent()
        .context("State directory has no parent")?
        .to_path_buf();
    fs::create_dir_all(&lock_dir)
        .with_context(|| format!("Failed to create {}", lock_dir.display()))?;

    let lock_path = lock_dir.join(INSTANCE_LOCK_FILE);
    // Open without truncating so a running instance keeps its PID on conflict
    let mut lock_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
    if lock_file.try_lock_exclusive().is_err() {
        anyhow::bail!(
            "Another dogtor instance is using {} (lock: {})",
            lock_dir.display(),
            lock_path.display()
        );
    }
    lock_file.set_len(0)?;
    lock_file.seek(SeekFrom::Start(0))?;
    writeln!(&lock_file, "{}", std::process::id())?;

    log_indented!("Settings stored in {}", sync.root().display());
    Ok((Arc::new(sync), Arc::new(local), Some(lock_file)))
}

/// Handle the `simulate` command.
pub fn handle_simulate_command(options: SimulateOptions, debug_enabled: bool) -> Result<()> {
    let config = Config::load()?;

    let patch = SettingsPatch {
        enabled: Some(true),
        cycle_duration_ms: options.cycle_minutes.map(|m| m * 60_000),
        rotation_duration_ms: options.rotation_seconds.map(|s| s * 1000),
        rotation_angle_deg: options.angle,
        show_indicator: None,
    };
    patch.validate()?;

    // Enough simulated time for every cycle plus the startup delay
    let cycle_ms = patch
        .cycle_duration_ms
        .unwrap_or(crate::constants::MAXIMUM_CYCLE_DURATION_MS);
    let span_ms = cycle_ms.saturating_mul(u64::from(options.cycles) + 2);
    let start = options.start.unwrap_or_else(Utc::now);
    let end = start + ChronoDuration::milliseconds(span_ms.min(i64::MAX as u64) as i64);
    let sim_clock = Arc::new(SimulatedTimeSource::new(start, end, options.multiplier));
    let clock: Arc<dyn TimeSource> = sim_clock.clone();
    Log::set_clock(clock.clone());

    let _log_guard = match options.log_file.clone() {
        Some(path) => Some(Log::start_file_logging(path)?),
        None => None,
    };

    log_version!();
    log_block_start!("Simulation Mode");
    if sim_clock.is_fast_forward() {
        log_indented!("Time acceleration: fast-forward (instant execution)");
    } else {
        log_indented!("Time acceleration: {}x", options.multiplier);
    }
    log_indented!("Cycles to run: {}", options.cycles);
    config.log_config();

    let (sync_storage, local_storage, _instance_lock) = storage_tiers(options.persist)?;
    let alarms = Arc::new(MemoryAlarms::new(clock.clone()));
    let targets = Arc::new(MemoryTargets::new());
    targets.open(SIMULATED_TARGET, SIMULATED_URL);

    let surface = Arc::new(RecordingSurface::new(clock.clone()));
    let bridge = {
        let surface = surface.clone();
        let clock = clock.clone();
        let sync_storage = sync_storage.clone();
        let timings = config.page_timings();
        Arc::new(LoopbackBridge::new(Box::new(move |target| {
            log_debug!("Injecting page executor into target {target}");
            let executor = PageExecutor::new(ExecutorParams {
                surface: surface.clone(),
                overlay: Arc::new(LogOverlay),
                environment: Arc::new(StaticEnvironment::new(SIMULATED_URL)),
                clock: clock.clone(),
                sync_storage: sync_storage.clone(),
                timings,
            });
            Arc::new(executor) as Arc<dyn PageEndpoint>
        })))
    };
    let transport: Arc<dyn PageTransport> = bridge.clone();
    let injector: Arc<dyn ScriptInjector> = bridge.clone();

    let coordinator = Coordinator::new(
        HostServices {
            clock: clock.clone(),
            alarms: alarms.clone(),
            targets,
            transport,
            injector,
            sync_storage,
            local_storage,
        },
        config.timings(),
    );
    coordinator.start();
    let (handle, coordinator_thread) = coordinator.spawn()?;

    let response = handle.request(&BackgroundRequest::StartRotation {
        settings: Some(patch),
    })?;
    if !response.success {
        anyhow::bail!(
            "Could not start rotation: {}",
            response.error.unwrap_or_default()
        );
    }
    if let Some(warning) = &response.warning {
        log_warning!("{warning}");
    }

    let signal_state = setup_signal_handler()?;
    let mut completed = 0;

    'cycles: while completed < options.cycles && signal_state.is_running() {
        while let Ok(message) = signal_state.signal_receiver.try_recv() {
            match message {
                SignalMessage::Persist => handle.suspend()?,
                SignalMessage::Shutdown => break 'cycles,
            }
        }

        let Some(due) = alarms.next_due() else {
            log_warning!("No rotation alarm is scheduled, ending simulation");
            break;
        };
        let now = clock.now_millis();
        if due > now {
            let wait = Duration::from_millis((due - now) as u64);
            clock.sleep(wait.min(SIGNAL_CHECK_INTERVAL));
            if clock.is_ended() {
                log_warning!("Simulated time ran out");
                break;
            }
            continue;
        }

        for alarm in alarms.fire_due() {
            let before = surface.applied().len();
            match handle.fire_alarm(alarm)? {
                CycleOutcome::Completed {
                    total_rotations,
                    next_fire_at,
                    ..
                } => {
                    completed += 1;
                    let angles: Vec<String> = surface.applied()[before..]
                        .iter()
                        .map(|r| format!("{}°", r.angle))
                        .collect();
                    log_decorated!(
                        "Cycle {completed}/{}: rotated {} (total {total_rotations})",
                        options.cycles,
                        angles.join(" → ")
                    );
                    if let Some(next) = next_fire_at {
                        log_indented!("Next rotation at {}", format_millis(next));
                    }
                }
                CycleOutcome::Skipped(reason) => log_info!("Cycle skipped: {reason}"),
                CycleOutcome::Abandoned { target, reason } => {
                    log_warning!("Cycle abandoned for target {target}: {reason}")
                }
            }
        }
    }

    let stopped = handle.request(&BackgroundRequest::StopRotation)?;
    if !stopped.success {
        log_warning!("Stopping rotation failed: {}", stopped.error.unwrap_or_default());
    }
    let summary = handle.request(&BackgroundRequest::GetState)?;

    log_block_start!("Simulation complete");
    if let Some(state) = summary.state {
        log_indented!("Total rotations: {}", state.total_rotations);
    }
    log_indented!("Rotations applied: {}", surface.applied().len());
    if debug_enabled {
        log_debug!("Messages sent to the page: {}", bridge.send_count());
    }

    handle.shutdown()?;
    coordinator_thread
        .join()
        .map_err(|_| anyhow::anyhow!("Coordinator thread panicked"))
        .context("Failed to stop coordinator")?;
    log_end!();
    Ok(())
}
