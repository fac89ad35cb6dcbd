// SPDX-License-Identifier: Apache-2.0

//! Phoenix control plane.
//!
//! The control pipeline observes the data plane's KPIs and rewrites the data
//! plane's tuning parameters:
//!
//! ```text
//! self-metrics -> pid_decider -> connector -> pic_control -> [processors]
//! ```
//!
//! - [`decider::PidDecider`] evaluates one PID controller per declared KPI
//!   and proposes configuration patches.
//! - [`connector`] transports proposals to the governance extension, either
//!   directly or encoded as synthetic metrics.
//! - [`extension::PicControl`] is the governance core: policy load and watch,
//!   the patch admission pipeline (safe mode, TTL, rate limit, cooldown,
//!   target resolution, autonomy), safe-mode orchestration, and the bounded
//!   patch history.
//! - [`safety::SafetyMonitor`] watches process CPU/RSS and can force the
//!   extension into safe mode.
//! - [`remote::RemoteClient`] optionally syncs policy and patches with a
//!   remote control plane over HTTPS.
//!
//! Patch flow is strictly one-directional; the extension resolves processors
//! through weak references and nothing holds a reference back up the chain.

pub mod bayesian;
pub mod connector;
pub mod decider;
pub mod error;
pub mod extension;
pub mod history;
pub mod metrics;
pub mod pid;
pub mod policy_watcher;
pub mod rate_limit;
pub mod remote;
pub mod safety;

#[cfg(test)]
pub(crate) mod test_support;

pub use connector::{DirectConnector, MetricsConnector, PatchSink};
pub use decider::PidDecider;
pub use error::{ControllerError, PatchRejection};
pub use extension::{PatchAck, PicControl};
pub use safety::SafetyMonitor;
