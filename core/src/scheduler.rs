//! Pause/resume and flush decisions taken between documents by the
//! indexing loop.

use crate::cache::{IndexCache, Indexes};
use crate::config::SchedulerConfig;
use crate::Result;
use parking_lot::{Condvar, Mutex};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// External resource checks that can force indexing to pause.
pub trait ResourceMonitor {
    fn disk_space_low(&self) -> bool;
}

/// Free-space check on the volume holding the indexes.
pub struct DiskSpaceMonitor {
    path: PathBuf,
    min_free_percent: f64,
}

impl DiskSpaceMonitor {
    pub fn new<P: Into<PathBuf>>(path: P, min_free_percent: f64) -> Self {
        Self { path: path.into(), min_free_percent }
    }
}

impl ResourceMonitor for DiskSpaceMonitor {
    fn disk_space_low(&self) -> bool {
        match (fs2::available_space(&self.path), fs2::total_space(&self.path)) {
            (Ok(available), Ok(total)) if total > 0 => {
                (available as f64 / total as f64) * 100.0 < self.min_free_percent
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "disk space check failed"
                );
                false
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct PauseState {
    manual: bool,
    battery: bool,
    disabled: bool,
    resources: bool,
}

impl PauseState {
    fn held(&self) -> bool {
        self.manual || self.battery || self.disabled
    }

    fn is_paused(&self) -> bool {
        self.held() || self.resources
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Exit,
}

/// Shared switches for the indexing loop.
///
/// Indexing runs only while none of the pause conditions (manual pause,
/// battery policy, indexing disabled, low disk or oversized indexes) hold.
pub struct IndexControl {
    config: SchedulerConfig,
    state: Mutex<PauseState>,
    changed: Condvar,
    shutdown: AtomicBool,
}

impl IndexControl {
    pub fn new(config: SchedulerConfig) -> Self {
        let state = PauseState { manual: config.start_paused, ..PauseState::default() };
        Self {
            config,
            state: Mutex::new(state),
            changed: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    fn update(&self, f: impl FnOnce(&mut PauseState)) {
        let mut state = self.state.lock();
        f(&mut state);
        self.changed.notify_all();
    }

    pub fn pause(&self) {
        self.update(|s| s.manual = true);
    }

    pub fn resume(&self) {
        self.update(|s| s.manual = false);
    }

    pub fn set_battery_pause(&self, paused: bool) {
        self.update(|s| s.battery = paused);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.update(|s| s.disabled = !enabled);
    }

    pub fn request_shutdown(&self) {
        let _state = self.state.lock();
        self.shutdown.store(true, Ordering::SeqCst);
        self.changed.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().is_paused()
    }

    fn over_limits(&self, indexes: &Indexes, monitor: &dyn ResourceMonitor) -> Result<bool> {
        if monitor.disk_space_low() {
            return Ok(true);
        }
        Ok(indexes.total_size()? > self.config.max_index_bytes)
    }

    /// Run between documents. Flushes and returns [`LoopAction::Exit`] on
    /// shutdown; while paused, flushes and blocks; otherwise flushes when
    /// the cache is over budget and throttles.
    pub fn check(
        &self,
        cache: &mut IndexCache,
        indexes: &Indexes,
        monitor: &dyn ResourceMonitor,
    ) -> Result<LoopAction> {
        loop {
            if self.is_shutdown() {
                cache.flush_all(indexes)?;
                return Ok(LoopAction::Exit);
            }

            let forced = self.over_limits(indexes, monitor)?;
            let paused = {
                let mut state = self.state.lock();
                if state.resources != forced {
                    tracing::info!(over_limits = forced, "resource pause changed");
                }
                state.resources = forced;
                state.is_paused()
            };
            if !paused {
                break;
            }

            if !cache.is_empty() {
                cache.flush_all(indexes)?;
            }
            self.wait_while_paused(forced);
        }

        if cache.needs_flush() {
            cache.flush_all(indexes)?;
        }
        if self.config.throttle_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.throttle_ms));
        }
        Ok(LoopAction::Continue)
    }

    fn wait_while_paused(&self, forced: bool) {
        let mut state = self.state.lock();
        tracing::info!(
            manual = state.manual,
            battery = state.battery,
            disabled = state.disabled,
            resources = state.resources,
            "indexing paused"
        );
        if forced {
            // Resource limits are measured, not signalled; look again after a while.
            self.changed.wait_for(&mut state, Duration::from_millis(self.config.pause_poll_ms));
            return;
        }
        while state.held() && !self.is_shutdown() {
            self.changed.wait(&mut state);
        }
        tracing::info!("indexing resumed");
    }
}
