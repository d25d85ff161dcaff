//! Beehive node runtime
//!
//! Owns the ledger store, the membership engine, the periodic expiry sweep
//! and the metrics endpoint. The ledger is restored from its JSON snapshot on
//! start and written back on shutdown.

use crate::config::HiveConfig;
use crate::engine::MembershipEngine;
use crate::metrics::{spawn_event_listener, HiveMetrics, MetricsServer};

use hive_core::{Clock, SystemClock};
use hive_rewards::SweepRunner;
use hive_storage::MemoryStore;
use parking_lot::RwLock;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Node state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Node is starting up
    Starting,
    /// Sweeper and metrics are running
    Running,
    /// Node is shutting down
    Stopping,
    /// Node has stopped
    Stopped,
}

/// Beehive node
pub struct HiveNode {
    config: HiveConfig,
    store: Arc<MemoryStore>,
    engine: Arc<MembershipEngine>,
    metrics: Arc<HiveMetrics>,
    state: Arc<RwLock<NodeState>>,
    snapshot_path: PathBuf,
}

impl HiveNode {
    /// Open the ledger snapshot named by `config` on the system clock
    pub fn new(config: HiveConfig) -> anyhow::Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: HiveConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        config.validate()?;
        let snapshot_path = config.storage.snapshot_path();
        let store = Arc::new(MemoryStore::open(&snapshot_path)?);
        let engine = Arc::new(MembershipEngine::new(store.clone(), clock, &config)?);

        Ok(Self {
            config,
            store,
            engine,
            metrics: Arc::new(HiveMetrics::new()?),
            state: Arc::new(RwLock::new(NodeState::Starting)),
            snapshot_path,
        })
    }

    pub fn engine(&self) -> &Arc<MembershipEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<HiveMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    /// Get current state
    pub fn state(&self) -> NodeState {
        self.state.read().clone()
    }

    /// Write the ledger to its snapshot file
    pub fn save_snapshot(&self) -> anyhow::Result<()> {
        self.store.save(&self.snapshot_path)?;
        Ok(())
    }

    /// Run until Ctrl+C or SIGTERM
    pub async fn run(&self) -> anyhow::Result<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Run until `shutdown` completes
    pub async fn run_until<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Starting Beehive node...");
        *self.state.write() = NodeState::Starting;

        let listener_handle = spawn_event_listener(self.metrics.clone(), self.engine.subscribe());

        let runner = Arc::new(SweepRunner::new(
            self.engine.sweeper(),
            self.config.runner_config(),
        ));
        let report_handle = {
            let mut reports = runner.subscribe();
            let engine = self.engine.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                loop {
                    match reports.recv().await {
                        Ok(report) => {
                            if !report.is_idle() {
                                info!(
                                    "Sweep: {} scanned, {} rolled up, {} forfeited, {} skipped, {} reminders",
                                    report.scanned,
                                    report.rolled_up,
                                    report.forfeited,
                                    report.skipped,
                                    report.reminders
                                );
                            }
                            match engine.store_stats() {
                                Ok(stats) => metrics.observe_sweep(&report, stats.open_claims),
                                Err(e) => warn!("Failed to read store stats: {}", e),
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!("Missed {} sweep reports", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let (sweep_shutdown_tx, sweep_shutdown_rx) = mpsc::channel(1);
        let runner_handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(sweep_shutdown_rx).await })
        };

        let metrics_handle = if self.config.metrics.enabled {
            let server = MetricsServer::new(&self.config.metrics.listen_addr, self.metrics.clone())?;
            Some(tokio::spawn(async move {
                if let Err(e) = server.run().await {
                    error!("Metrics server error: {}", e);
                }
            }))
        } else {
            None
        };

        *self.state.write() = NodeState::Running;
        self.print_startup_banner();

        shutdown.await;

        *self.state.write() = NodeState::Stopping;
        info!("Shutting down...");

        let _ = sweep_shutdown_tx.send(()).await;
        if let Err(e) = runner_handle.await {
            warn!("Sweep runner ended abnormally: {}", e);
        }

        if let Some(handle) = metrics_handle {
            handle.abort();
        }
        report_handle.abort();
        listener_handle.abort();

        if self.config.storage.snapshot_on_shutdown {
            self.save_snapshot()?;
        }

        let stats = runner.stats();
        info!(
            "Sweep totals: {} passes, {} rolled up, {} forfeited",
            stats.passes, stats.rolled_up, stats.forfeited
        );

        *self.state.write() = NodeState::Stopped;
        info!("Node stopped");
        Ok(())
    }

    fn print_startup_banner(&self) {
        info!("Beehive node is running");
        info!("Ledger: {}", self.snapshot_path.display());
        match self.engine.tier_state() {
            Ok(tier) => info!(
                "Activations: {}, next activation in {}",
                tier.activation_count, tier.current_tier
            ),
            Err(e) => warn!("Failed to read tier state: {}", e),
        }
        if self.config.scheduler.enabled {
            info!(
                "Expiry sweep every {}s",
                self.config.scheduler.sweep_interval_secs
            );
        }
        if self.config.metrics.enabled {
            info!("Metrics: http://{}/metrics", self.config.metrics.listen_addr);
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
