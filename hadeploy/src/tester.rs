use crate::error::Error;
use crate::exec;
use crate::models::{ConnectionReport, ConnectionStatus, HostTarget};
use crate::netdiag;
use crate::session::SessionManager;

use futures::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_MARKER: &str = "connection_probe";

/// Layered per-host diagnostics: network reachability, SSH port, session
/// establishment, then a functional echo probe. The first failing layer
/// short-circuits into its specific failure status. A successful probe
/// leaves the session cached for later orchestration.
pub struct ConnectionTester {
    sessions: Arc<SessionManager>,
}

impl ConnectionTester {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        ConnectionTester { sessions }
    }

    pub async fn test_host(&self, target: &HostTarget) -> ConnectionReport {
        info!("testing connection: VM{} - {}", target.index, target.ip);
        let started = Instant::now();

        debug!("checking network reachability: {}", target.ip);
        if !netdiag::is_reachable(&target.ip, PROBE_TIMEOUT).await {
            warn!("host {} is unreachable", target.ip);
            return ConnectionReport::failure(
                target.index,
                &target.ip,
                ConnectionStatus::NetworkUnreachable,
                "host unreachable, check the IP address and network configuration",
                None,
            );
        }

        debug!("checking SSH port: {}:{}", target.ip, target.ssh_port);
        if !netdiag::is_port_open(&target.ip, target.ssh_port, PROBE_TIMEOUT).await {
            warn!("SSH port {} on {} is not open", target.ssh_port, target.ip);
            return ConnectionReport::failure(
                target.index,
                &target.ip,
                ConnectionStatus::SshServiceDown,
                "SSH service not started, start sshd on the target",
                None,
            );
        }

        debug!("establishing SSH session: {}", target.ip);
        let session = match self.sessions.get_or_create(target).await {
            Ok(session) => session,
            Err(Error::Connection {
                status, message, ..
            }) => {
                warn!("connection to {} failed: {}", target.ip, message);
                return ConnectionReport::failure(
                    target.index,
                    &target.ip,
                    status,
                    failure_advice(status),
                    Some(message),
                );
            }
            Err(e) => {
                warn!("connection to {} failed: {}", target.ip, e);
                return ConnectionReport::failure(
                    target.index,
                    &target.ip,
                    ConnectionStatus::UnknownError,
                    format!("connection failed: {}", e),
                    Some(e.to_string()),
                );
            }
        };

        debug!("running functional probe: {}", target.ip);
        let probe = exec::execute_buffered(&session, &format!("echo '{}'", PROBE_MARKER)).await;

        match probe {
            Ok(output) if output.contains(PROBE_MARKER) => {
                let latency = started.elapsed();
                info!(
                    "connection test for {} succeeded in {}ms",
                    target.ip,
                    latency.as_millis()
                );
                ConnectionReport::success(target.index, &target.ip, latency)
            }
            _ => {
                warn!("functional probe on {} failed", target.ip);
                // The transport is suspect; do not leave it cached.
                self.sessions.close(&target.addr()).await;
                ConnectionReport::failure(
                    target.index,
                    &target.ip,
                    ConnectionStatus::UnknownError,
                    "connection check failed",
                    Some("test command execution failed".into()),
                )
            }
        }
    }

    /// Test every target, one report per target in input order. Hosts are
    /// probed concurrently and fully independently; one host's failure
    /// never aborts the others.
    pub async fn test_all(&self, targets: &[HostTarget]) -> Vec<ConnectionReport> {
        info!("batch connection test against {} hosts", targets.len());

        let reports = join_all(targets.iter().map(|target| self.test_host(target))).await;

        let succeeded = reports
            .iter()
            .filter(|report| report.status.is_success())
            .count();
        info!(
            "batch connection test finished, succeeded: {}/{}",
            succeeded,
            targets.len()
        );

        reports
    }
}

fn failure_advice(status: ConnectionStatus) -> String {
    match status {
        ConnectionStatus::AuthFailed => {
            "bad username or password, check the login credentials".to_string()
        }
        ConnectionStatus::Timeout => {
            "connection timed out, check network status and firewall settings".to_string()
        }
        other => format!("connection failed: {}", other.describe()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_target(port: u16) -> HostTarget {
        HostTarget {
            index: 1,
            ip: "127.0.0.1".into(),
            hostname: "h1".into(),
            username: "nobody".into(),
            password: "nope".into(),
            ssh_port: port,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn closed_port_reports_ssh_service_down() {
        // Reachability of loopback holds even without ICMP privileges only
        // when the ping socket can be opened, so this asserts on the two
        // statuses the environment can legitimately produce.
        let tester = ConnectionTester::new(Arc::new(SessionManager::new()));
        let report = tester.test_host(&loopback_target(1)).await;

        assert!(matches!(
            report.status,
            ConnectionStatus::SshServiceDown | ConnectionStatus::NetworkUnreachable
        ));
        assert!(report.status.is_failure());
    }

    #[tokio::test]
    async fn batch_returns_one_report_per_target_in_order() {
        let tester = ConnectionTester::new(Arc::new(SessionManager::new()));
        let targets = vec![loopback_target(1), {
            let mut t = loopback_target(1);
            t.index = 2;
            t
        }];

        let reports = tester.test_all(&targets).await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].index, 1);
        assert_eq!(reports[1].index, 2);
        assert!(reports.iter().all(|r| r.status.is_failure()));
    }
}
