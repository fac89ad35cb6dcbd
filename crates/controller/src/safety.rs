// SPDX-License-Identifier: Apache-2.0

//! Safety monitor.
//!
//! Independent watchdog sampling the host process's CPU (millicores) and
//! resident set (MiB) at 1 Hz. Three consecutive samples over a limit force
//! safe mode; thirty consecutive samples below 90% of the limits clear the
//! trigger (the extension still applies its sticky cooldown before an
//! automatic exit).
//!
//! `temporarily_override_thresholds` multiplies both limits by 1.5 for a
//! duration; repeated calls extend the single timer. The urgent-override
//! admission path uses this so an operator fighting a resource fire is not
//! immediately re-triggered.

use crate::extension::PicControl;
use crate::metrics::SafetyMetrics;
use parking_lot::Mutex;
use phoenix_telemetry::TelemetryRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use sysinfo::{ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;

/// Consecutive over-limit samples that trigger safe mode.
const TRIGGER_STREAK: u32 = 3;
/// Consecutive sub-90% samples that clear the trigger.
const CLEAR_STREAK: u32 = 30;
/// Fraction of the limit a sample must stay under to count toward clearing.
const CLEAR_FRACTION: f64 = 0.9;
/// Limit multiplier while an override is active.
const OVERRIDE_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, Copy)]
struct Limits {
    cpu_mcores: u64,
    rss_mib: u64,
}

#[derive(Debug, Default)]
struct Streaks {
    over: u32,
    under: u32,
}

/// State transition produced by one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The trigger streak completed; safe mode must be entered.
    EnterSafeMode,
    /// The clear streak completed; the trigger has lifted.
    ClearTrigger,
}

/// Resource-threshold watchdog. See the module docs.
pub struct SafetyMonitor {
    limits: Mutex<Limits>,
    override_until: Mutex<Option<Instant>>,
    streaks: Mutex<Streaks>,
    triggered: AtomicBool,
    metrics: Arc<SafetyMetrics>,
}

impl SafetyMonitor {
    /// Creates the monitor with the given limits and registers its metric
    /// set.
    #[must_use]
    pub fn new(cpu_mcores: u64, rss_mib: u64, telemetry: &TelemetryRegistry) -> Arc<Self> {
        let metrics = Arc::new(SafetyMetrics::default());
        telemetry.register(metrics.clone());
        Arc::new(Self {
            limits: Mutex::new(Limits {
                cpu_mcores,
                rss_mib,
            }),
            override_until: Mutex::new(None),
            streaks: Mutex::new(Streaks::default()),
            triggered: AtomicBool::new(false),
            metrics,
        })
    }

    /// Replaces the configured limits (policy swap).
    pub fn set_limits(&self, cpu_mcores: u64, rss_mib: u64) {
        *self.limits.lock() = Limits {
            cpu_mcores,
            rss_mib,
        };
    }

    /// Whether the monitor's trigger is currently raised.
    #[must_use]
    pub fn is_in_safe_mode(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Raises both limits by 50% for `seconds`; subsequent calls extend the
    /// single timer.
    pub fn temporarily_override_thresholds(&self, seconds: u64) {
        let until = Instant::now() + Duration::from_secs(seconds);
        let mut guard = self.override_until.lock();
        *guard = Some(match *guard {
            Some(existing) => existing.max(until),
            None => until,
        });
        self.metrics.thresholds_overridden.set(1.0);
    }

    fn effective_limits(&self) -> (f64, f64) {
        let limits = *self.limits.lock();
        let mut cpu = limits.cpu_mcores as f64;
        let mut rss = limits.rss_mib as f64;

        let mut guard = self.override_until.lock();
        match *guard {
            Some(until) if Instant::now() < until => {
                cpu *= OVERRIDE_MULTIPLIER;
                rss *= OVERRIDE_MULTIPLIER;
            }
            Some(_) => {
                *guard = None;
                self.metrics.thresholds_overridden.set(0.0);
            }
            None => {}
        }
        (cpu, rss)
    }

    /// Feeds one sample through the trigger/clear state machine.
    pub fn observe_sample(&self, cpu_mcores: f64, rss_mib: f64) -> Option<Transition> {
        self.metrics.samples_total.inc();
        self.metrics.cpu_mcores.set(cpu_mcores);
        self.metrics.rss_mib.set(rss_mib);

        let (cpu_limit, rss_limit) = self.effective_limits();
        let over = cpu_mcores > cpu_limit || rss_mib > rss_limit;
        let clear = cpu_mcores < cpu_limit * CLEAR_FRACTION
            && rss_mib < rss_limit * CLEAR_FRACTION;

        let mut streaks = self.streaks.lock();
        if over {
            self.metrics.over_limit_total.inc();
            streaks.over += 1;
            streaks.under = 0;
            if streaks.over >= TRIGGER_STREAK && !self.triggered.swap(true, Ordering::AcqRel) {
                self.metrics.triggers_total.inc();
                return Some(Transition::EnterSafeMode);
            }
        } else {
            streaks.over = 0;
            if clear {
                streaks.under += 1;
                if streaks.under >= CLEAR_STREAK
                    && self.triggered.swap(false, Ordering::AcqRel)
                {
                    streaks.under = 0;
                    return Some(Transition::ClearTrigger);
                }
            } else {
                streaks.under = 0;
            }
        }
        None
    }

    /// Background sampling task: 1 Hz sysinfo probe feeding
    /// [`Self::observe_sample`], driving the extension's safe-mode state.
    /// Exits promptly on cancellation.
    pub async fn run(
        self: Arc<Self>,
        control: Arc<PicControl>,
        cancel: CancellationToken,
    ) {
        let mut system = System::new();
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(error) => {
                tracing::error!(%error, "safety monitor cannot resolve its own pid");
                return;
            }
        };
        let mut ticker = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("safety monitor stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            let Some(process) = system.process(pid) else {
                continue;
            };
            // cpu_usage is percent of one core since the previous refresh;
            // 100% = 1000 millicores.
            let cpu_mcores = f64::from(process.cpu_usage()) * 10.0;
            let rss_mib = process.memory() as f64 / (1024.0 * 1024.0);

            match self.observe_sample(cpu_mcores, rss_mib) {
                Some(Transition::EnterSafeMode) => {
                    control.enter_safe_mode("resource limits exceeded");
                }
                Some(Transition::ClearTrigger) => {
                    let _ = control.maybe_auto_exit_safe_mode();
                }
                None => {}
            }
        }
    }
}
