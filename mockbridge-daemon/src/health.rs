//! Aggregated health check reporting.
//!
//! The orchestrator periodically polls each module's `health_check()`
//! and produces a unified [`DaemonHealth`] report, served on `/health`.
//! The overall daemon status is the worst status among all enabled
//! modules.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use mockbridge_core::pipeline::HealthStatus;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all modules).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Per-module health reports.
    pub modules: Vec<ModuleHealth>,
}

impl DaemonHealth {
    /// Report used before the first poll completes.
    pub fn starting() -> Self {
        Self {
            status: HealthStatus::Unhealthy("starting".to_owned()),
            uptime_secs: 0,
            modules: Vec::new(),
        }
    }
}

/// Health status for a single module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleHealth {
    /// Module name (e.g., "collector", "rule-loader").
    pub name: String,
    /// Whether the module is enabled in configuration.
    pub enabled: bool,
    /// Current health status of the module.
    pub status: HealthStatus,
}

/// Aggregate multiple module health statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
/// Only considers enabled modules.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let enabled_modules = modules.iter().filter(|m| m.enabled);

    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for module in enabled_modules {
        match &module.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    reasons.push(format!("{}: {}", module.name, reason));
                    worst = HealthStatus::Degraded(String::new());
                }
            }
            HealthStatus::Unhealthy(reason) => {
                reasons.push(format!("{}: {}", module.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, enabled: bool, status: HealthStatus) -> ModuleHealth {
        ModuleHealth {
            name: name.to_owned(),
            enabled,
            status,
        }
    }

    #[test]
    fn all_healthy_is_healthy() {
        let modules = [
            module("collector", true, HealthStatus::Healthy),
            module("rule-loader", true, HealthStatus::Healthy),
        ];
        assert_eq!(aggregate_status(&modules), HealthStatus::Healthy);
    }

    #[test]
    fn degraded_module_degrades_daemon() {
        let modules = [
            module("collector", true, HealthStatus::Healthy),
            module(
                "rule-loader",
                true,
                HealthStatus::Degraded("queue pop failures".to_owned()),
            ),
        ];
        let status = aggregate_status(&modules);
        assert!(matches!(status, HealthStatus::Degraded(_)));
        assert!(status.to_string().contains("rule-loader"));
    }

    #[test]
    fn unhealthy_wins_over_degraded() {
        let modules = [
            module("collector", true, HealthStatus::Unhealthy("stopped".to_owned())),
            module(
                "rule-loader",
                true,
                HealthStatus::Degraded("slow".to_owned()),
            ),
        ];
        assert!(aggregate_status(&modules).is_unhealthy());
    }

    #[test]
    fn disabled_modules_are_ignored() {
        let modules = [
            module("collector", true, HealthStatus::Healthy),
            module(
                "rule-loader",
                false,
                HealthStatus::Unhealthy("not started".to_owned()),
            ),
        ];
        assert_eq!(aggregate_status(&modules), HealthStatus::Healthy);
    }

    #[test]
    fn starting_report_is_unhealthy() {
        assert!(DaemonHealth::starting().status.is_unhealthy());
    }
}
