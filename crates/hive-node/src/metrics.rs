//! Prometheus metrics server

use hive_rewards::{HiveEvent, SweepReport};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Engine counters
pub struct HiveMetrics {
    registry: Registry,
    pub activations: IntCounter,
    pub placements: IntCounter,
    pub upgrades: IntCounter,
    pub rewards_created: IntCounter,
    pub rewards_promoted: IntCounter,
    pub rewards_claimed: IntCounter,
    pub rewards_rolled_up: IntCounter,
    pub rewards_forfeited: IntCounter,
    pub reminders: IntCounter,
    pub sweep_passes: IntCounter,
    pub sweep_errors: IntCounter,
    pub open_claims: IntGauge,
}

impl HiveMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> anyhow::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let metrics = Self {
            activations: counter("hive_activations_total", "Members activated")?,
            placements: counter("hive_placements_total", "Matrix slots written")?,
            upgrades: counter("hive_upgrades_total", "Level upgrades applied")?,
            rewards_created: counter("hive_rewards_created_total", "Reward claims created")?,
            rewards_promoted: counter(
                "hive_rewards_promoted_total",
                "Pending claims promoted to claimable",
            )?,
            rewards_claimed: counter("hive_rewards_claimed_total", "Claims paid out")?,
            rewards_rolled_up: counter(
                "hive_rewards_rolled_up_total",
                "Expired claims forwarded to an upline",
            )?,
            rewards_forfeited: counter(
                "hive_rewards_forfeited_total",
                "Expired claims with no qualified upline",
            )?,
            reminders: counter("hive_reminders_total", "Expiring-soon reminders sent")?,
            sweep_passes: counter("hive_sweep_passes_total", "Expiry sweep passes")?,
            sweep_errors: counter("hive_sweep_errors_total", "Claims a sweep failed to process")?,
            open_claims: IntGauge::new("hive_open_claims", "Pending or claimable claims")?,
            registry,
        };
        metrics
            .registry
            .register(Box::new(metrics.open_claims.clone()))?;

        Ok(metrics)
    }

    /// Count one domain event
    pub fn observe(&self, event: &HiveEvent) {
        match event {
            HiveEvent::MemberActivated { .. } => self.activations.inc(),
            HiveEvent::MemberPlaced { .. } => self.placements.inc(),
            HiveEvent::MemberUpgraded { .. } => self.upgrades.inc(),
            HiveEvent::RewardCreated { .. } => self.rewards_created.inc(),
            HiveEvent::RewardPromoted { .. } => self.rewards_promoted.inc(),
            HiveEvent::RewardClaimed { .. } => self.rewards_claimed.inc(),
            HiveEvent::RewardExpiringSoon { .. } => self.reminders.inc(),
            HiveEvent::RewardRolledUp { .. } => self.rewards_rolled_up.inc(),
            HiveEvent::RewardForfeited { .. } => self.rewards_forfeited.inc(),
            HiveEvent::TierAdvanced { .. } => {}
        }
    }

    /// Record a sweep pass and the open-claim count after it
    pub fn observe_sweep(&self, report: &SweepReport, open_claims: u64) {
        self.sweep_passes.inc();
        self.sweep_errors.inc_by(report.errors);
        self.open_claims.set(open_claims as i64);
    }

    /// Text exposition format
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Feed every published event into `metrics` until the bus closes
pub fn spawn_event_listener(
    metrics: Arc<HiveMetrics>,
    mut events: broadcast::Receiver<HiveEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => metrics.observe(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Metrics listener lagged, {} events not counted", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Metrics server
pub struct MetricsServer {
    addr: SocketAddr,
    metrics: Arc<HiveMetrics>,
}

impl MetricsServer {
    pub fn new(listen_addr: &str, metrics: Arc<HiveMetrics>) -> anyhow::Result<Self> {
        Ok(Self {
            addr: listen_addr.parse()?,
            metrics,
        })
    }

    /// Bind the configured address and serve
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Starting metrics server on {}", self.addr);
        self.serve(listener).await
    }

    /// Serve `/metrics` and `/health` on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (mut stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            };
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let n = match stream.read(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        debug!("Read from {} failed: {}", peer, e);
                        return;
                    }
                };
                let request = String::from_utf8_lossy(&buf[..n]);

                let response = if request.starts_with("GET /metrics") {
                    match metrics.render() {
                        Ok(body) => format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        ),
                        Err(e) => {
                            error!("Failed to encode metrics: {}", e);
                            "HTTP/1.1 500 Internal Server Error\r\nConnection: close\r\n\r\n"
                                .to_string()
                        }
                    }
                } else if request.starts_with("GET /health") {
                    let body = "{\"status\":\"healthy\"}";
                    format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    )
                } else {
                    "HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n".to_string()
                };

                if let Err(e) = stream.write_all(response.as_bytes()).await {
                    debug!("Write to {} failed: {}", peer, e);
                }
                let _ = stream.shutdown().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::{Address, ClaimId};
    use tokio::net::TcpStream;

    #[test]
    fn test_observe_counts_events() {
        let metrics = HiveMetrics::new().unwrap();
        metrics.observe(&HiveEvent::RewardForfeited {
            claim_id: ClaimId::new(),
            root_address: Address::new("a"),
            amount: 100,
        });
        metrics.observe_sweep(
            &SweepReport {
                forfeited: 1,
                ..Default::default()
            },
            4,
        );

        assert_eq!(metrics.rewards_forfeited.get(), 1);
        assert_eq!(metrics.sweep_passes.get(), 1);
        assert_eq!(metrics.open_claims.get(), 4);

        let text = metrics.render().unwrap();
        assert!(text.contains("hive_rewards_forfeited_total 1"));
        assert!(text.contains("hive_open_claims 4"));
    }

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_metrics_and_health() {
        let metrics = Arc::new(HiveMetrics::new().unwrap());
        metrics.placements.inc();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = MetricsServer::new(&addr.to_string(), metrics).unwrap();
        let handle = tokio::spawn(server.serve(listener));

        let response = get(addr, "/metrics").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("hive_placements_total 1"));

        let response = get(addr, "/health").await;
        assert!(response.contains("healthy"));

        let response = get(addr, "/nope").await;
        assert!(response.starts_with("HTTP/1.1 404"));

        handle.abort();
    }
}
