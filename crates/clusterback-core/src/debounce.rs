//! Debounce gate: serialize and rate-limit capture requests.
//!
//! Every capture request, whatever its source, goes through one shared gate.
//! The gate holds a single lock across the interval check, the capture and
//! the timestamp update, so at most one capture runs at a time. Requests
//! arriving within the minimum interval of the last *created* version are
//! dropped, not queued. So are requests that waited on the lock while
//! another capture completed: that capture already saw their change.

use crate::error::CoreResult;
use crate::snapshot::{CaptureOutcome, CaptureReport, SnapshotEngine};
use clusterback_util::Identifier;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default minimum interval between created versions.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(60);

/// Result of a gated capture request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// The request ran a capture.
    Captured(CaptureReport),
    /// The request arrived too soon after the last created version.
    RateLimited {
        elapsed: Duration,
        min_interval: Duration,
    },
}

impl GateOutcome {
    /// Whether a new version was created.
    pub fn created(&self) -> bool {
        matches!(self, GateOutcome::Captured(report) if report.outcome.is_created())
    }

    /// Human-readable reason when no version was created.
    pub fn reason(&self) -> Option<String> {
        match self {
            GateOutcome::RateLimited {
                elapsed,
                min_interval,
            } => Some(format!(
                "no new version was created: last capture {}s ago, minimum interval {}s",
                elapsed.as_secs(),
                min_interval.as_secs()
            )),
            GateOutcome::Captured(CaptureReport {
                outcome: CaptureOutcome::NoChange { latest },
                ..
            }) => Some(format!(
                "no new version was created: live state matches {latest}"
            )),
            GateOutcome::Captured(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    last_created: Option<Instant>,
    last_completed: Option<Instant>,
    captures: u64,
}

/// Shared admission point for captures.
pub struct DebounceGate {
    engine: Arc<SnapshotEngine>,
    min_interval: Duration,
    state: Mutex<GateState>,
    /// Bumped after every successful capture. Read before locking.
    completed: AtomicU64,
}

impl DebounceGate {
    pub fn new(engine: Arc<SnapshotEngine>, min_interval: Duration) -> Self {
        Self {
            engine,
            min_interval,
            state: Mutex::new(GateState::default()),
            completed: AtomicU64::new(0),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Request a capture on behalf of `source` (a watched kind, the CLI...).
    pub async fn request_capture(&self, source: &str) -> CoreResult<GateOutcome> {
        let request = Identifier::request();
        let seen = self.completed.load(Ordering::Acquire);
        let mut state = self.state.lock().await;

        if self.completed.load(Ordering::Acquire) != seen {
            if let Some(last) = state.last_completed {
                let elapsed = last.elapsed();
                if elapsed < self.min_interval {
                    debug!(
                        request = %request,
                        source = source,
                        "Capture request dropped, a capture finished while it waited"
                    );
                    return Ok(GateOutcome::RateLimited {
                        elapsed,
                        min_interval: self.min_interval,
                    });
                }
            }
        }

        if let Some(last) = state.last_created {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                debug!(
                    request = %request,
                    source = source,
                    elapsed_secs = elapsed.as_secs(),
                    min_interval_secs = self.min_interval.as_secs(),
                    "Capture request dropped, too soon after last version"
                );
                return Ok(GateOutcome::RateLimited {
                    elapsed,
                    min_interval: self.min_interval,
                });
            }
        }

        info!(request = %request, source = source, "Capturing cluster state");
        let report = self.run(&mut state).await?;
        Ok(GateOutcome::Captured(report))
    }

    /// Capture regardless of the interval, still serialized with every
    /// other capture.
    pub async fn force_capture(&self, source: &str) -> CoreResult<CaptureReport> {
        let mut state = self.state.lock().await;
        info!(source = source, "Capturing cluster state on demand");
        self.run(&mut state).await
    }

    /// Number of captures the gate has let through.
    pub async fn captures(&self) -> u64 {
        self.state.lock().await.captures
    }

    async fn run(&self, state: &mut GateState) -> CoreResult<CaptureReport> {
        state.captures += 1;
        let report = self.engine.capture().await?;
        let now = Instant::now();
        if report.outcome.is_created() {
            state.last_created = Some(now);
        }
        state.last_completed = Some(now);
        self.completed.fetch_add(1, Ordering::Release);
        Ok(report)
    }
}
