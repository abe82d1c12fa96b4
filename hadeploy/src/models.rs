use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::time::Duration;

/// Where a software archive comes from: either a preset already staged in
/// the remote software directory, or a local file to upload first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftwareSource {
    Preset { archive: String },
    LocalFile { path: PathBuf },
}

/// One cluster node: address, credential and connection parameters.
/// Immutable once handed to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub index: u8,
    pub ip: String,
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub ssh_port: u16,
    pub timeout_ms: u64,
}

impl HostTarget {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.ssh_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Diagnostic state of one host's SSH connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    NotTested,
    Testing,
    Success,
    NetworkUnreachable,
    SshServiceDown,
    AuthFailed,
    Timeout,
    UnknownError,
}

impl ConnectionStatus {
    pub fn describe(&self) -> &'static str {
        match self {
            ConnectionStatus::NotTested => "not tested",
            ConnectionStatus::Testing => "testing",
            ConnectionStatus::Success => "connected",
            ConnectionStatus::NetworkUnreachable => "network unreachable",
            ConnectionStatus::SshServiceDown => "SSH service not started",
            ConnectionStatus::AuthFailed => "authentication failed",
            ConnectionStatus::Timeout => "connection timed out",
            ConnectionStatus::UnknownError => "unknown error",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == ConnectionStatus::Success
    }

    /// Terminal failure states only; the transient states are neither
    /// success nor failure.
    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            ConnectionStatus::Success | ConnectionStatus::NotTested | ConnectionStatus::Testing
        )
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Result of one connection test against one host. Constructed once,
/// never mutated.
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub index: u8,
    pub ip: String,
    pub status: ConnectionStatus,
    pub message: String,
    pub detail: Option<String>,
    pub latency: Duration,
    pub tested_at: DateTime<Local>,
}

impl ConnectionReport {
    pub fn success(index: u8, ip: impl Into<String>, latency: Duration) -> Self {
        ConnectionReport {
            index,
            ip: ip.into(),
            status: ConnectionStatus::Success,
            message: "connection established".to_string(),
            detail: None,
            latency,
            tested_at: Local::now(),
        }
    }

    pub fn failure(
        index: u8,
        ip: impl Into<String>,
        status: ConnectionStatus,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        ConnectionReport {
            index,
            ip: ip.into(),
            status,
            message: message.into(),
            detail,
            latency: Duration::ZERO,
            tested_at: Local::now(),
        }
    }
}

/// Captured result of one remote command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub success: bool,
}

impl CommandOutcome {
    pub fn new(
        command: impl Into<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        CommandOutcome {
            command: command.into(),
            exit_code,
            stdout,
            stderr,
            duration,
            success: exit_code == 0,
        }
    }

    /// A command that never produced an exit status, typically because the
    /// transport failed underneath it.
    pub fn failure(command: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        CommandOutcome {
            command: command.into(),
            exit_code: -1,
            stdout: String::new(),
            stderr: error.into(),
            duration,
            success: false,
        }
    }
}

/// Result of uploading one file to one host.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub index: u8,
    pub ip: String,
    pub success: bool,
    pub local_path: String,
    pub remote_path: String,
    pub bytes: u64,
    pub duration: Duration,
    pub error: Option<String>,
}

impl TransferOutcome {
    pub fn success(
        index: u8,
        ip: impl Into<String>,
        local_path: impl Into<String>,
        remote_path: impl Into<String>,
        bytes: u64,
        duration: Duration,
    ) -> Self {
        TransferOutcome {
            index,
            ip: ip.into(),
            success: true,
            local_path: local_path.into(),
            remote_path: remote_path.into(),
            bytes,
            duration,
            error: None,
        }
    }

    pub fn failure(
        index: u8,
        ip: impl Into<String>,
        local_path: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        TransferOutcome {
            index,
            ip: ip.into(),
            success: false,
            local_path: local_path.into(),
            remote_path: String::new(),
            bytes: 0,
            duration,
            error: Some(error.into()),
        }
    }
}

/// Event stream from the deployment pipeline to its consumer. Pushed over
/// an unbounded channel; the producer never blocks on a slow consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEvent {
    Stage { name: String },
    Progress { current: u8, total: u8 },
    Log(String),
    ErrorLine(String),
    Complete,
    Fatal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(ConnectionStatus::Success.is_success());
        assert!(!ConnectionStatus::Success.is_failure());

        for status in [
            ConnectionStatus::NetworkUnreachable,
            ConnectionStatus::SshServiceDown,
            ConnectionStatus::AuthFailed,
            ConnectionStatus::Timeout,
            ConnectionStatus::UnknownError,
        ] {
            assert!(status.is_failure(), "{status} should be terminal failure");
            assert!(!status.is_success());
        }

        for status in [ConnectionStatus::NotTested, ConnectionStatus::Testing] {
            assert!(!status.is_failure(), "{status} is transient");
            assert!(!status.is_success());
        }
    }

    #[test]
    fn command_outcome_success_tracks_exit_code() {
        let ok = CommandOutcome::new("echo hi", 0, "hi".into(), String::new(), Duration::ZERO);
        assert!(ok.success);

        let bad = CommandOutcome::new("false", 1, String::new(), String::new(), Duration::ZERO);
        assert!(!bad.success);

        let faulted = CommandOutcome::failure("ls", "channel closed", Duration::ZERO);
        assert!(!faulted.success);
        assert_eq!(faulted.exit_code, -1);
    }

    #[test]
    fn host_target_addr_includes_port() {
        let target = HostTarget {
            index: 1,
            ip: "192.168.10.101".into(),
            hostname: "hadoop101".into(),
            username: "hadoop".into(),
            password: "secret".into(),
            ssh_port: 22,
            timeout_ms: 30_000,
        };
        assert_eq!(target.addr(), "192.168.10.101:22");
        assert_eq!(target.timeout(), Duration::from_secs(30));
    }
}
