//! Periodic sweep runner
//!
//! Drives [`ExpiryRollupScheduler::sweep_once`] on a fixed interval until a
//! shutdown signal arrives. Each pass runs on the blocking pool so a slow
//! store does not stall the runtime.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::rollup::{ExpiryRollupScheduler, SweepReport};

/// Runner configuration
#[derive(Clone, Debug)]
pub struct SweepRunnerConfig {
    /// Interval between passes
    pub interval: Duration,
    /// Run a pass immediately on start
    pub sweep_on_start: bool,
    pub enabled: bool,
}

impl Default for SweepRunnerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            sweep_on_start: true,
            enabled: true,
        }
    }
}

/// Running totals across passes
#[derive(Clone, Debug, Default)]
pub struct SweepStats {
    pub passes: u64,
    pub rolled_up: u64,
    pub forfeited: u64,
    pub skipped: u64,
    pub errors: u64,
    pub reminders: u64,
    pub last_report: Option<SweepReport>,
}

impl SweepStats {
    fn record(&mut self, report: &SweepReport) {
        self.passes += 1;
        self.rolled_up += report.rolled_up;
        self.forfeited += report.forfeited;
        self.skipped += report.skipped;
        self.errors += report.errors;
        self.reminders += report.reminders;
        self.last_report = Some(report.clone());
    }
}

/// Periodic driver for the expiry sweep
pub struct SweepRunner {
    scheduler: Arc<ExpiryRollupScheduler>,
    config: SweepRunnerConfig,
    stats: Arc<RwLock<SweepStats>>,
    report_tx: broadcast::Sender<SweepReport>,
}

impl SweepRunner {
    pub fn new(scheduler: Arc<ExpiryRollupScheduler>, config: SweepRunnerConfig) -> Self {
        let (report_tx, _) = broadcast::channel(64);
        Self {
            scheduler,
            config,
            stats: Arc::new(RwLock::new(SweepStats::default())),
            report_tx,
        }
    }

    /// Receive every pass's report
    pub fn subscribe(&self) -> broadcast::Receiver<SweepReport> {
        self.report_tx.subscribe()
    }

    pub fn stats(&self) -> SweepStats {
        self.stats.read().clone()
    }

    /// Run passes until `shutdown_rx` fires or its sender is dropped
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Expiry sweep disabled");
            return;
        }

        info!(
            "Starting expiry sweep (interval: {}s)",
            self.config.interval.as_secs()
        );

        let mut last_pass = if self.config.sweep_on_start {
            None
        } else {
            Some(Instant::now())
        };

        loop {
            let wait = last_pass
                .map(|at| self.config.interval.saturating_sub(at.elapsed()))
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Expiry sweep shutting down");
                    break;
                }
                _ = tokio::time::sleep(wait) => {
                    self.pass().await;
                    last_pass = Some(Instant::now());
                }
            }
        }
    }

    async fn pass(&self) {
        let scheduler = self.scheduler.clone();
        match tokio::task::spawn_blocking(move || scheduler.sweep_once()).await {
            Ok(report) => {
                debug!("Sweep pass finished in {}ms", report.duration_ms);
                self.stats.write().record(&report);
                let _ = self.report_tx.send(report);
            }
            Err(err) => warn!("Sweep pass panicked: {}", err),
        }
    }
}
