// SPDX-License-Identifier: Apache-2.0

//! `phoenixd`: the self-regulating telemetry pipeline daemon.
//!
//! Bring-up order:
//!
//! 1. load and validate the policy file,
//! 2. construct the data-plane processors and the governance extension,
//! 3. register every updateable processor, then apply the policy,
//! 4. start the background tasks (host sampler, control loop, safety
//!    monitor, policy watcher, optional remote client),
//! 5. on ctrl-c: stop accepting patches, cancel background tasks, flush
//!    processor windows, and write the patch history to the log.
//!
//! The built-in host sampler stands in for the external receiver
//! collaborator: it feeds per-process CPU/RSS points through the data
//! pipeline so the control loop has something to steer.

use clap::Parser;
use phoenix_config::Policy;
use phoenix_controller::connector::DirectConnector;
use phoenix_controller::decider::{PidDecider, ProposalRoute};
use phoenix_controller::extension::PicControl;
use phoenix_controller::policy_watcher::PolicyWatcher;
use phoenix_controller::remote::RemoteClient;
use phoenix_controller::safety::SafetyMonitor;
use phoenix_engine::pipeline::Pipeline;
use phoenix_engine::processor::UpdateableProcessor;
use phoenix_pdata::{AttributeSet, InstrumentationScope, MetricBatch, MetricPoint};
use phoenix_processors::{
    AdaptiveTopK, Batcher, CardinalityGuardian, MemoryLimiter, OthersRollup, PriorityTagger,
    ReservoirSampler,
};
use phoenix_telemetry::{SampleValue, TelemetryRegistry};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Self-regulating telemetry pipeline daemon.
#[derive(Debug, Parser)]
#[command(name = "phoenixd", version, about)]
struct Args {
    /// Absolute path to the policy YAML file.
    #[arg(long)]
    policy: PathBuf,

    /// Log filter (overridden by `RUST_LOG` when set).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Seconds between host metric sampling rounds.
    #[arg(long, default_value_t = 10)]
    sample_interval_seconds: u64,

    /// Seconds between control-loop evaluations.
    #[arg(long, default_value_t = 5)]
    control_interval_seconds: u64,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "phoenixd failed");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let policy = Policy::from_file(&args.policy)?;
    let telemetry = TelemetryRegistry::new();

    // Data-plane processors in flow order.
    let limiter = Arc::new(MemoryLimiter::new(Default::default(), &telemetry));
    let tagger = Arc::new(PriorityTagger::new(Default::default(), &telemetry)?);
    let topk = Arc::new(AdaptiveTopK::new(Default::default(), &telemetry));
    let guardian = Arc::new(CardinalityGuardian::new(Default::default(), &telemetry));
    let sampler = Arc::new(ReservoirSampler::new(Default::default(), &telemetry));
    let rollup = Arc::new(OthersRollup::new(Default::default(), &telemetry));
    let batcher = Arc::new(Batcher::new(Default::default(), &telemetry));

    let stages: Vec<Arc<dyn UpdateableProcessor>> = vec![
        limiter, tagger, topk, guardian, sampler, rollup, batcher,
    ];
    let pipeline = Arc::new(Pipeline::new(stages.clone()));

    // Governance extension; processors register before the policy applies.
    let control = PicControl::new(policy.clone(), &telemetry);
    for stage in &stages {
        control.register_updateable(stage);
    }

    let connector = DirectConnector::new(control.clone(), &telemetry);
    let decider: Arc<PidDecider> = Arc::new(PidDecider::from_policy(
        &policy,
        ProposalRoute::Direct(connector),
        &telemetry,
    ));
    let decider_updateable: Arc<dyn UpdateableProcessor> = decider.clone();
    control.register_updateable(&decider_updateable);

    control.apply_processors_config();
    pipeline.start()?;

    let monitor = SafetyMonitor::new(
        policy.global_settings.cpu_safety_limit_mcores,
        policy.global_settings.rss_safety_limit_mib,
        &telemetry,
    );
    control.register_safety_monitor(monitor.clone());

    // Background tasks.
    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    let _ = tasks.spawn(monitor.run(control.clone(), cancel.child_token()));
    let _ = tasks.spawn(host_sampler(
        pipeline.clone(),
        Duration::from_secs(args.sample_interval_seconds.max(1)),
        cancel.child_token(),
    ));
    let _ = tasks.spawn(control_loop(
        telemetry.clone(),
        decider.clone(),
        Duration::from_secs(args.control_interval_seconds.max(1)),
        cancel.child_token(),
    ));

    let watched_path = policy
        .pic_control_config
        .policy_file_path
        .clone()
        .map_or_else(|| args.policy.clone(), PathBuf::from);
    let _watcher = PolicyWatcher::spawn(control.clone(), &watched_path)?;

    if let Some(remote_config) = policy.pic_control_config.opamp_client_config.clone() {
        let client = RemoteClient::new(remote_config, control.clone(), &telemetry)?;
        let _ = tasks.spawn(client.run(cancel.child_token()));
    }

    tracing::info!(policy = %args.policy.display(), "phoenixd running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    // Shutdown sequence: close the patch intake, cancel background tasks,
    // flush processor windows, persist the history to the log.
    control.stop_accepting();
    cancel.cancel();
    let deadline = tokio::time::sleep(Duration::from_secs(1));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                if joined.is_none() {
                    break;
                }
            }
            _ = &mut deadline => {
                tasks.abort_all();
                break;
            }
        }
    }
    pipeline.shutdown()?;
    control.flush_history_to_log();
    Ok(())
}

/// Feeds per-process CPU/RSS points through the data pipeline.
async fn host_sampler(pipeline: Arc<Pipeline>, interval: Duration, cancel: CancellationToken) {
    use sysinfo::System;

    let mut system = System::new();
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        system.refresh_all();
        let now = unix_nanos();
        let scope = InstrumentationScope::named("phoenix.hostmetrics");
        let mut batch = MetricBatch::new();
        for (pid, process) in system.processes() {
            let mut resource = AttributeSet::new();
            resource.upsert("process.pid", i64::from(pid.as_u32()));
            resource.upsert(
                "process.executable.name",
                process.name().to_string_lossy().to_string(),
            );
            batch.push_point(
                resource.clone(),
                scope.clone(),
                MetricPoint::gauge("process.cpu.utilization", f64::from(process.cpu_usage()), now),
            );
            batch.push_point(
                resource,
                scope.clone(),
                MetricPoint::gauge(
                    "process.memory.rss",
                    process.memory() as f64 / (1024.0 * 1024.0),
                    now,
                ),
            );
        }

        match pipeline.process_batch(batch) {
            Ok(out) => {
                // The exporter collaborator would receive `out` here.
                tracing::debug!(points = out.point_count(), "batch processed");
            }
            Err(error) => tracing::warn!(%error, "data pipeline error"),
        }
    }
}

/// Converts internal telemetry into a self-metrics batch and runs the
/// decider over it.
async fn control_loop(
    telemetry: TelemetryRegistry,
    decider: Arc<PidDecider>,
    interval: Duration,
    cancel: CancellationToken,
) {
    use phoenix_engine::processor::MetricsProcessor;

    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = unix_nanos();
        let scope = InstrumentationScope::named("phoenix.self_metrics");
        let mut batch = MetricBatch::new();
        for sample in telemetry.collect() {
            let point = match sample.value {
                SampleValue::Counter(v) => MetricPoint::sum(sample.name, v as f64, now),
                SampleValue::Gauge(v) => MetricPoint::gauge(sample.name, v, now),
                SampleValue::Histogram { sum, count, .. } => {
                    let mut point = MetricPoint::gauge(sample.name, sum, now);
                    point.attributes.upsert("count", count as i64);
                    point
                }
            };
            batch.push_point(AttributeSet::new(), scope.clone(), point);
        }

        if let Err(error) = decider.consume_batch(batch) {
            tracing::warn!(%error, "control pipeline error");
        }
    }
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
