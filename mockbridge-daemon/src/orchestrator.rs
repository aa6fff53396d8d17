//! Module orchestration -- assembly, wiring, and lifecycle management.
//!
//! The [`Orchestrator`] is the central coordinator of `mockbridge-daemon`.
//! It validates configuration, connects the queue adapter, builds the
//! enabled modules, manages startup/shutdown ordering, and runs the main
//! event loop.
//!
//! # Startup Order (consumers before producers)
//!
//! 1. Queue adapter (reachability is checked; unreachable is fatal)
//! 2. Rule Loader (drains descriptors that may already be queued)
//! 3. Collector (starts accepting tap streams)
//!
//! # Shutdown Stages
//!
//! 1. Collector stops accepting new tap records
//! 2. Staging flushes within a bounded deadline
//! 3. Pending queue pushes are cancelled
//! 4. Rule Loader workers finish the current install and exit

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mockbridge_collector::{CollectorConfig, CollectorPipeline, CollectorPipelineBuilder};
use mockbridge_core::config::MockBridgeConfig;
use mockbridge_core::pipeline::{HealthStatus, Pipeline};
use mockbridge_queue::{QueueConfig, RuleQueue};
use mockbridge_rule_loader::{LoaderConfig, RuleLoader, RuleLoaderBuilder, WireMockClient};

use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};
use crate::http::{self, AppState};

/// Seconds between health poll cycles.
const HEALTH_POLL_SECS: u64 = 10;

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: MockBridgeConfig,
    collector: Option<CollectorPipeline<RuleQueue>>,
    rule_loader: Option<RuleLoader<WireMockClient>>,
    queue: RuleQueue,
    app_state: Arc<AppState>,
    cancel: CancellationToken,
    start_time: Instant,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Load configuration from a file and build the orchestrator.
    pub async fn build(config_path: &std::path::Path) -> Result<Self> {
        let config = MockBridgeConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    ///
    /// This performs the fatal startup checks: configuration validation,
    /// pattern catalog compilation (inside the collector builder), and
    /// queue reachability.
    pub async fn build_from_config(config: MockBridgeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install the metrics recorder before any module records.
        let prometheus = if config.metrics.enabled {
            Some(install_metrics_recorder()?)
        } else {
            None
        };

        // An unreachable queue at startup refuses to start.
        let queue = RuleQueue::connect(QueueConfig::from_core(&config.queue))
            .await
            .map_err(|e| anyhow::anyhow!("queue adapter startup failed: {}", e))?;

        let collector = if config.collector.enabled {
            info!("initializing collector");
            let pipeline = CollectorPipelineBuilder::new()
                .config(CollectorConfig::from_core(&config.collector))
                .sink(queue.clone())
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build collector: {}", e))?;
            Some(pipeline)
        } else {
            None
        };

        let rule_loader = if config.rule_loader.enabled {
            info!("initializing rule loader");
            let loader_config = LoaderConfig::from_core(&config.rule_loader);
            let client = WireMockClient::new(
                &loader_config.mock_server_url,
                loader_config.mock_server_timeout,
            )
            .map_err(|e| anyhow::anyhow!("failed to build mock server client: {}", e))?;
            let loader = RuleLoaderBuilder::new()
                .config(loader_config)
                .queue(queue.clone())
                .store(client)
                .build()
                .await
                .map_err(|e| anyhow::anyhow!("failed to build rule loader: {}", e))?;
            Some(loader)
        } else {
            None
        };

        info!("orchestrator initialized");

        Ok(Self {
            config,
            collector,
            rule_loader,
            queue,
            app_state: Arc::new(AppState::new(prometheus)),
            cancel: CancellationToken::new(),
            start_time: Instant::now(),
        })
    }

    /// Start all enabled modules and block until a shutdown signal.
    pub async fn run(&mut self) -> Result<()> {
        // Consumers first: the loader drains whatever is already queued.
        if let Some(loader) = &mut self.rule_loader {
            loader.start().await?;
        }
        if let Some(collector) = &mut self.collector {
            if let Err(e) = collector.start().await {
                // Rollback: stop the loader that already started.
                if let Some(loader) = &mut self.rule_loader {
                    if let Err(stop_err) = loader.stop().await {
                        error!(error = %stop_err, "rollback stop failed during startup failure");
                    }
                }
                return Err(e.into());
            }
        }
        self.app_state.set_ready(true);

        // Health/metrics endpoint
        let http_task = if self.config.metrics.enabled {
            let addr: SocketAddr = format!(
                "{}:{}",
                self.config.metrics.listen_addr, self.config.metrics.port
            )
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))?;
            let state = Arc::clone(&self.app_state);
            let cancel = self.cancel.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = http::serve(addr, state, cancel).await {
                    error!(error = %e, "health/metrics endpoint exited with error");
                }
            }))
        } else {
            None
        };

        self.refresh_health().await;
        info!("entering main event loop");

        let mut poll = tokio::time::interval(Duration::from_secs(HEALTH_POLL_SECS));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let signal = loop {
            tokio::select! {
                _ = poll.tick() => {
                    self.refresh_health().await;
                }
                signal = wait_for_shutdown_signal() => {
                    break signal?;
                }
            }
        };
        info!(signal, "shutdown signal received");

        self.app_state.set_ready(false);
        self.shutdown().await;

        self.cancel.cancel();
        if let Some(task) = http_task {
            let _ = task.await;
        }

        info!("mockbridge-daemon shut down");
        Ok(())
    }

    /// Stop modules in stage order (collector first, loader last).
    async fn shutdown(&mut self) {
        if let Some(collector) = &mut self.collector {
            if let Err(e) = collector.stop().await {
                warn!(error = %e, "failed to stop collector");
            }
        }
        if let Some(loader) = &mut self.rule_loader {
            if let Err(e) = loader.stop().await {
                warn!(error = %e, "failed to stop rule loader");
            }
        }
    }

    /// Poll module health and publish the aggregated snapshot.
    async fn refresh_health(&self) {
        let mut modules = Vec::new();

        // The queue adapter counts as a module of its own: an unreachable
        // store must surface on /health even while both pipelines idle.
        let queue_status = match self.queue.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Degraded(format!("queue unreachable: {e}")),
        };
        modules.push(ModuleHealth {
            name: "queue".to_owned(),
            enabled: true,
            status: queue_status,
        });
        if let Ok(depth) = self.queue.depth().await {
            tracing::debug!(queue_depth = depth, "queue depth sampled");
        }

        match &self.collector {
            Some(collector) => modules.push(ModuleHealth {
                name: "collector".to_owned(),
                enabled: true,
                status: collector.health_check().await,
            }),
            None => modules.push(ModuleHealth {
                name: "collector".to_owned(),
                enabled: false,
                status: HealthStatus::Unhealthy("disabled".to_owned()),
            }),
        }
        match &self.rule_loader {
            Some(loader) => modules.push(ModuleHealth {
                name: "rule-loader".to_owned(),
                enabled: true,
                status: loader.health_check().await,
            }),
            None => modules.push(ModuleHealth {
                name: "rule-loader".to_owned(),
                enabled: false,
                status: HealthStatus::Unhealthy("disabled".to_owned()),
            }),
        }

        let status = aggregate_status(&modules);
        if !status.is_healthy() {
            warn!(status = %status, "daemon health degraded");
        }
        self.app_state.set_health(DaemonHealth {
            status,
            uptime_secs: self.start_time.elapsed().as_secs(),
            modules,
        });
    }
}

/// Install the global Prometheus recorder and register descriptions.
fn install_metrics_recorder() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

    use mockbridge_core::metrics::{
        COLLECTOR_REQUEST_DURATION_SECONDS, INSTALL_DURATION_BUCKETS, PROCESSING_DURATION_BUCKETS,
        RULE_LOADER_INSTALL_DURATION_SECONDS,
    };

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(COLLECTOR_REQUEST_DURATION_SECONDS.to_owned()),
            &PROCESSING_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .set_buckets_for_metric(
            Matcher::Full(RULE_LOADER_INSTALL_DURATION_SECONDS.to_owned()),
            &INSTALL_DURATION_BUCKETS,
        )
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    mockbridge_core::metrics::describe_all();
    Ok(handle)
}

/// Wait for SIGTERM (systemd, Docker) or SIGINT (Ctrl+C).
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_connection() {
        let mut config = MockBridgeConfig::default();
        config.collector.dedup_cache_size = 0;
        config.metrics.enabled = false;

        let err = Orchestrator::build_from_config(config).await.unwrap_err();
        assert!(err.to_string().contains("config validation failed"));
    }
}
