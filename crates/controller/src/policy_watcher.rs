// SPDX-License-Identifier: Apache-2.0

//! Policy file watcher.
//!
//! Watches the policy file's parent directory using OS-native notifications
//! and reloads through the extension on change. The parent directory is
//! watched, not the file: atomic replacement (`mv tmp policy.yaml`) creates
//! a new inode, and editors and orchestrators overwhelmingly save that way.
//! Events are filtered back down to the policy file itself.
//!
//! The callback runs on the notify crate's own thread; the brief settle
//! sleep and the reload I/O block only that thread. Reloads are debounced
//! 100 ms after the event and floored at one per second regardless of event
//! volume.

use crate::error::ControllerError;
use crate::extension::PicControl;
use notify::{Event, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Settle delay after an event before reading the file.
const DEBOUNCE: Duration = Duration::from_millis(100);
/// Minimum spacing between reloads.
const RELOAD_FLOOR: Duration = Duration::from_secs(1);

struct WatcherState {
    control: Arc<PicControl>,
    watched_path: PathBuf,
    last_reload: Mutex<Option<Instant>>,
    is_reloading: AtomicBool,
}

impl WatcherState {
    fn handle_event(&self, result: Result<Event, notify::Error>) {
        let event = match result {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%error, "policy watcher error");
                return;
            }
        };

        if matches!(event.kind, notify::EventKind::Access(_)) {
            return;
        }
        if !self.is_event_for_watched_file(&event) {
            return;
        }

        // One reload at a time; concurrent events collapse into it.
        if self
            .is_reloading
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        std::thread::sleep(DEBOUNCE);

        let due = {
            let mut last = self.last_reload.lock();
            let now = Instant::now();
            if last.is_some_and(|at| now.duration_since(at) < RELOAD_FLOOR) {
                false
            } else {
                *last = Some(now);
                true
            }
        };
        if due {
            match self.control.reload_policy_from_file() {
                Ok(()) => tracing::info!("policy reloaded from file"),
                Err(error) => tracing::warn!(%error, "policy reload failed"),
            }
        }
        self.is_reloading.store(false, Ordering::Release);
    }

    fn is_event_for_watched_file(&self, event: &Event) -> bool {
        event.paths.iter().any(|p| {
            p == &self.watched_path
                || std::fs::canonicalize(p)
                    .map(|canonical| canonical == self.watched_path)
                    .unwrap_or(false)
        })
    }
}

/// Guard owning the OS watcher; dropping it stops the watch.
pub struct PolicyWatcher {
    _watcher: Box<dyn Watcher + Send>,
}

impl PolicyWatcher {
    /// Installs a watcher for `policy_path` that reloads through `control`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::WatcherSetup`] when the path has no parent
    /// directory or the OS watcher cannot be created.
    pub fn spawn(control: Arc<PicControl>, policy_path: &Path) -> Result<Self, ControllerError> {
        let watched_path = std::fs::canonicalize(policy_path)
            .unwrap_or_else(|_| policy_path.to_path_buf());
        let parent = policy_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| ControllerError::WatcherSetup {
                details: format!(
                    "policy path {} has no parent directory",
                    policy_path.display()
                ),
            })?;
        let parent = std::fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());

        let state = WatcherState {
            control,
            watched_path,
            last_reload: Mutex::new(None),
            is_reloading: AtomicBool::new(false),
        };
        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                state.handle_event(result);
            })
            .map_err(|e| ControllerError::WatcherSetup {
                details: e.to_string(),
            })?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| ControllerError::WatcherSetup {
                details: e.to_string(),
            })?;

        tracing::info!(
            policy = %policy_path.display(),
            watching = %parent.display(),
            "policy watcher installed"
        );
        Ok(Self {
            _watcher: Box::new(watcher),
        })
    }
}
