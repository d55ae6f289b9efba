use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use oms_pipeline::OmsPipeline;

use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub version: &'static str,
}

pub struct AppState {
    pub pipeline: Arc<OmsPipeline>,
    pub build: BuildInfo,
    /// Flipped by the background reconcile loop: `true` once it has
    /// completed at least one cycle without a broker-sync failure.
    reconcile_healthy: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(pipeline: Arc<OmsPipeline>, reconcile_healthy: Arc<AtomicBool>) -> Self {
        AppState {
            pipeline,
            build: BuildInfo {
                version: env!("CARGO_PKG_VERSION"),
            },
            reconcile_healthy,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        static STARTED: OnceLock<Instant> = OnceLock::new();
        let started = STARTED.get_or_init(Instant::now);
        started.elapsed().as_secs()
    }

    pub fn reconciliation_status(&self) -> &'static str {
        if self.reconcile_healthy.load(Ordering::Relaxed) {
            "ok"
        } else {
            "degraded"
        }
    }
}
