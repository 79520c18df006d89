//! Periodic reaping of expired sandbox sessions.
//!
//! The sweeper has two duties: reclaim running topologies whose TTL has
//! elapsed, and age out `starting` rows stranded by a crash
//! mid-provisioning. It works from the durable registry plus container
//! labels, so a process restart loses nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::sandbox::TopologyManager;
use crate::storage::{DatabaseError, SessionRegistry, SessionState};

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired sessions whose topology was destroyed and row marked.
    pub expired: usize,
    /// Stranded `starting` rows terminated as error.
    pub recovered: usize,
    /// Sessions skipped because teardown or the registry failed.
    pub failures: usize,
}

/// Periodic reaper of expired sessions and their topologies.
pub struct Sweeper {
    registry: SessionRegistry,
    topology: Arc<TopologyManager>,
    interval: Duration,
    recovery_window: Duration,
}

impl Sweeper {
    /// Creates a new sweeper.
    pub fn new(
        registry: SessionRegistry,
        topology: Arc<TopologyManager>,
        interval: Duration,
        recovery_window: Duration,
    ) -> Self {
        Self {
            registry,
            topology,
            interval,
            recovery_window,
        }
    }

    /// Runs sweep passes on the configured interval until shutdown.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;

        info!(interval_secs = self.interval.as_secs(), "Sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => {
                            if report != SweepReport::default() {
                                info!(
                                    expired = report.expired,
                                    recovered = report.recovered,
                                    failures = report.failures,
                                    "Sweep pass finished"
                                );
                            }
                        }
                        Err(e) => error!(error = %e, "Sweep pass failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Sweeper received shutdown signal");
                    break;
                }
            }
        }
    }

    /// Performs a single sweep pass.
    ///
    /// Failures on individual sessions are logged and counted; the sweep
    /// always continues to the next row.
    pub async fn sweep_once(&self) -> Result<SweepReport, DatabaseError> {
        let mut report = SweepReport::default();

        for session in self.registry.expired_running().await? {
            if !self.topology.destroy(&session.topology_name).await {
                warn!(
                    session_id = %session.id,
                    topology = %session.topology_name,
                    "Failed to destroy expired topology, will retry next sweep"
                );
                report.failures += 1;
                continue;
            }

            match self
                .registry
                .terminate(session.id, SessionState::Expired)
                .await
            {
                Ok(_) => {
                    info!(
                        session_id = %session.id,
                        topology = %session.topology_name,
                        "Expired sandbox session"
                    );
                    report.expired += 1;
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Failed to mark session expired");
                    report.failures += 1;
                }
            }
        }

        for session in self.registry.stale_starting(self.recovery_window).await? {
            // Best effort: provisioning may have died at any step.
            self.topology.destroy(&session.topology_name).await;

            match self
                .registry
                .terminate(session.id, SessionState::Error)
                .await
            {
                Ok(_) => {
                    info!(
                        session_id = %session.id,
                        topology = %session.topology_name,
                        "Recovered stranded starting session"
                    );
                    report.recovered += 1;
                }
                Err(e) => {
                    warn!(session_id = %session.id, error = %e, "Failed to mark stranded session");
                    report.failures += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_report_default_is_empty() {
        let report = SweepReport::default();
        assert_eq!(report.expired, 0);
        assert_eq!(report.recovered, 0);
        assert_eq!(report.failures, 0);
        assert_eq!(report, SweepReport::default());
    }

    #[test]
    fn test_sweep_report_inequality() {
        let report = SweepReport {
            expired: 1,
            ..Default::default()
        };
        assert_ne!(report, SweepReport::default());
    }
}
