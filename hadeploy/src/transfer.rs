use crate::error::Error;
use crate::logging::{log_failure, log_success};
use crate::models::{HostTarget, TransferOutcome};
use crate::session::SessionManager;
use crate::Result;

use futures::future::join_all;
use hadrc::ssh::{SshSession, TransferEvent};
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;

/// Progress notifications for one upload, pushed over a channel so the
/// consumer can render them without being coupled to the transfer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferProgress {
    Started {
        source: String,
        dest: String,
        total: u64,
    },
    Progress {
        transferred: u64,
        total: u64,
        percent: u8,
    },
    Completed,
    Failed {
        message: String,
    },
}

/// Upload one local file into a remote directory over an existing session.
/// The local file is validated first; a missing or unreadable file is a
/// reported failure so batch callers can carry on with other hosts.
/// Returns the remote path and byte count on success.
pub async fn upload(
    session: &SshSession,
    local_path: &Path,
    remote_dir: &str,
    progress: Option<&UnboundedSender<TransferProgress>>,
) -> Result<(String, u64)> {
    info!(
        "uploading {} -> {}",
        local_path.display(),
        remote_dir
    );

    if !local_path.is_file() {
        let message = format!("local file not found: {}", local_path.display());
        if let Some(sink) = progress {
            let _ = sink.send(TransferProgress::Failed {
                message: message.clone(),
            });
        }
        return Err(Error::Transfer(message));
    }

    let mut forward = |event: TransferEvent| {
        let Some(sink) = progress else { return };
        let mapped = match event {
            TransferEvent::Started {
                source,
                dest,
                total,
            } => TransferProgress::Started {
                source,
                dest,
                total,
            },
            TransferEvent::Progress {
                transferred,
                total,
                percent,
            } => TransferProgress::Progress {
                transferred,
                total,
                percent,
            },
            TransferEvent::Completed => TransferProgress::Completed,
        };
        let _ = sink.send(mapped);
    };

    match session
        .upload_file(local_path, remote_dir, Some(&mut forward))
        .await
    {
        Ok((remote_path, bytes)) => {
            debug!("upload finished: {} ({} bytes)", remote_path, bytes);
            Ok((remote_path, bytes))
        }
        Err(e) => {
            let message = e.to_string();
            if let Some(sink) = progress {
                let _ = sink.send(TransferProgress::Failed {
                    message: message.clone(),
                });
            }
            Err(Error::Transfer(message))
        }
    }
}

/// Stat a remote path over the session. Any fault at all counts as
/// absent; the contract is deliberately binary.
pub async fn verify_remote_file(session: &SshSession, remote_path: &str) -> bool {
    session.remote_file_exists(remote_path).await
}

/// Fans uploads out to many hosts, one independent worker per host, each
/// acquiring its own session from the shared manager.
pub struct TransferManager {
    sessions: Arc<SessionManager>,
}

impl TransferManager {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        TransferManager { sessions }
    }

    /// Upload the same local file to every target concurrently. Exactly
    /// one outcome per input target, in input order; a failing host never
    /// cancels or blocks the rest, and the call returns only after every
    /// worker has finished.
    pub async fn upload_to_all(
        &self,
        targets: &[HostTarget],
        local_path: &Path,
        remote_dir: &str,
    ) -> Vec<TransferOutcome> {
        info!("batch upload to {} hosts", targets.len());

        let outcomes = join_all(targets.iter().map(|target| {
            let sessions = Arc::clone(&self.sessions);
            async move {
                let started = Instant::now();

                let session = match sessions.get_or_create(target).await {
                    Ok(session) => session,
                    Err(e) => {
                        log_failure("acquire session for upload", &target.ip, &e);
                        return TransferOutcome::failure(
                            target.index,
                            &target.ip,
                            local_path.display().to_string(),
                            e.to_string(),
                            started.elapsed(),
                        );
                    }
                };

                match upload(&session, local_path, remote_dir, None).await {
                    Ok((remote_path, bytes)) => {
                        log_success("uploaded file to", &target.ip);
                        TransferOutcome::success(
                            target.index,
                            &target.ip,
                            local_path.display().to_string(),
                            remote_path,
                            bytes,
                            started.elapsed(),
                        )
                    }
                    Err(e) => {
                        log_failure("upload file to", &target.ip, &e);
                        TransferOutcome::failure(
                            target.index,
                            &target.ip,
                            local_path.display().to_string(),
                            e.to_string(),
                            started.elapsed(),
                        )
                    }
                }
            }
        }))
        .await;

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(
            "batch upload finished, succeeded: {}/{}",
            succeeded,
            targets.len()
        );

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_target(index: u8) -> HostTarget {
        HostTarget {
            index,
            ip: "127.0.0.1".into(),
            hostname: format!("h{index}"),
            username: "nobody".into(),
            password: "nope".into(),
            // Nothing listens here; session acquisition fails fast.
            ssh_port: 1,
            timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn batch_upload_yields_one_outcome_per_target() {
        let manager = TransferManager::new(Arc::new(SessionManager::new()));
        let targets = vec![
            unreachable_target(1),
            unreachable_target(2),
            unreachable_target(3),
        ];

        let outcomes = manager
            .upload_to_all(&targets, Path::new("/nonexistent/archive.tar.gz"), "/opt/software")
            .await;

        assert_eq!(outcomes.len(), 3);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.index, (i + 1) as u8);
            assert!(!outcome.success);
            assert!(outcome.error.is_some());
        }
    }
}
