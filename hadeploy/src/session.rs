use crate::error::Error;
use crate::models::{ConnectionStatus, HostTarget};
use crate::Result;

use hadrc::ssh::{SshConfig, SshSession};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Classify a connection failure from its error text, the way an operator
/// reading the raw SSH error would.
pub fn classify_error_text(text: &str) -> ConnectionStatus {
    let text = text.to_lowercase();
    if text.contains("auth") || text.contains("password") {
        ConnectionStatus::AuthFailed
    } else if text.contains("timeout") || text.contains("timed out") {
        ConnectionStatus::Timeout
    } else {
        ConnectionStatus::UnknownError
    }
}

/// Owns at most one live SSH session per host address. The cache is the
/// only state shared between concurrent per-host workers; every entry is
/// keyed by `ip:port` and evicted on close or when found stale.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<SshSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached session for the target's address if it is still
    /// live, otherwise connect, cache and return a fresh one.
    pub async fn get_or_create(&self, target: &HostTarget) -> Result<Arc<SshSession>> {
        let addr = target.addr();

        {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(&addr) {
                if session.is_connected() {
                    debug!("reusing cached SSH session: {}", addr);
                    return Ok(Arc::clone(session));
                }
                debug!("cached session for {} is stale", addr);
            }
        }

        info!("creating new SSH session: {}", addr);
        let session = Arc::new(Self::connect(target).await?);

        let mut sessions = self.sessions.lock().await;
        sessions.insert(addr, Arc::clone(&session));
        Ok(session)
    }

    async fn connect(target: &HostTarget) -> Result<SshSession> {
        let config = SshConfig::password(
            &target.username,
            &target.password,
            target.addr(),
            target.timeout(),
        )
        .await
        .map_err(|e| Self::connection_error(target, e))?;

        config
            .connect()
            .await
            .map_err(|e| Self::connection_error(target, e))
    }

    fn connection_error(target: &HostTarget, err: hadrc::Error) -> Error {
        let message = err.to_string();
        Error::Connection {
            ip: target.ip.clone(),
            status: classify_error_text(&message),
            message,
        }
    }

    /// Disconnect and evict one address. A miss is not an error.
    pub async fn close(&self, addr: &str) {
        let session = self.sessions.lock().await.remove(addr);

        match session {
            Some(session) => {
                if let Err(e) = session.disconnect().await {
                    warn!("error while closing session {}: {}", addr, e);
                }
                info!("SSH session closed: {}", addr);
            }
            None => debug!("no active SSH session for {}", addr),
        }
    }

    /// Disconnect and evict every cached session; used at engine teardown.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<SshSession>)> =
            self.sessions.lock().await.drain().collect();
        info!("closing all SSH sessions, {} cached", drained.len());

        for (addr, session) in drained {
            if let Err(e) = session.disconnect().await {
                warn!("error while closing session {}: {}", addr, e);
            }
        }
    }

    pub async fn is_active(&self, addr: &str) -> bool {
        self.sessions
            .lock()
            .await
            .get(addr)
            .map(|session| session.is_connected())
            .unwrap_or(false)
    }

    pub async fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|session| session.is_connected())
            .count()
    }

    /// Explicit recovery: retry session creation up to `max_attempts`
    /// with a fixed delay in between. The normal command and transfer
    /// paths never call this on their own.
    pub async fn reconnect(
        &self,
        target: &HostTarget,
        max_attempts: u32,
    ) -> Result<Arc<SshSession>> {
        let addr = target.addr();
        info!("reconnecting {} with up to {} attempts", addr, max_attempts);

        self.close(&addr).await;

        let mut last_error = None;
        for attempt in 1..=max_attempts {
            debug!("reconnect attempt {}/{}: {}", attempt, max_attempts, addr);

            match Self::connect(target).await {
                Ok(session) => {
                    let session = Arc::new(session);
                    self.sessions
                        .lock()
                        .await
                        .insert(addr.clone(), Arc::clone(&session));
                    info!("reconnected {} after {} attempt(s)", addr, attempt);
                    return Ok(session);
                }
                Err(e) => {
                    warn!("reconnect attempt {}/{} failed: {}", attempt, max_attempts, e);
                    last_error = Some(e);
                    if attempt < max_attempts {
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Connection {
            ip: target.ip.clone(),
            status: ConnectionStatus::UnknownError,
            message: "reconnect attempts exhausted".into(),
        }))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_text_classification() {
        assert_eq!(
            classify_error_text("Failed to authenticate with password"),
            ConnectionStatus::AuthFailed
        );
        assert_eq!(
            classify_error_text("Auth rejected by server"),
            ConnectionStatus::AuthFailed
        );
        assert_eq!(
            classify_error_text("connection to 10.0.0.1:22 timeout after 15s"),
            ConnectionStatus::Timeout
        );
        assert_eq!(
            classify_error_text("Connection timed out"),
            ConnectionStatus::Timeout
        );
        assert_eq!(
            classify_error_text("no route to host"),
            ConnectionStatus::UnknownError
        );
    }

    #[tokio::test]
    async fn close_is_idempotent_for_unknown_addresses() {
        let manager = SessionManager::new();
        manager.close("10.0.0.1:22").await;
        manager.close("10.0.0.1:22").await;
        assert_eq!(manager.active_count().await, 0);
        assert!(!manager.is_active("10.0.0.1:22").await);
    }

    #[tokio::test]
    async fn connect_failure_carries_a_classified_status() {
        // Nothing listens on this port; the failure must surface as a
        // typed connection error naming the host.
        let target = HostTarget {
            index: 1,
            ip: "127.0.0.1".into(),
            hostname: "h1".into(),
            username: "nobody".into(),
            password: "nope".into(),
            ssh_port: 1,
            timeout_ms: 1_000,
        };

        let manager = SessionManager::new();
        match manager.get_or_create(&target).await {
            Err(Error::Connection { ip, status, .. }) => {
                assert_eq!(ip, "127.0.0.1");
                assert!(status.is_failure());
            }
            other => panic!("expected connection error, got {:?}", other.map(|_| ())),
        }
    }
}
