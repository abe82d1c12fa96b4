use crate::client::{Command, CommandOutput};
use crate::error::Error;

use async_trait::async_trait;
use log::debug;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::ssh_key::public::PublicKey;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, ToSocketAddrs};
use tokio::time::{timeout, Duration};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration for an SSH session.
///
/// Password authentication only; the server host key is accepted without
/// verification, matching an OpenSSH client run with
/// `StrictHostKeyChecking no`.
#[derive(Debug, Clone)]
pub struct SshConfig {
    username: String,
    socket: SocketAddr,
    password: String,
    timeout: Duration,
}

impl SshConfig {
    pub async fn password<U: Into<String>, P: Into<String>, S: ToSocketAddrs>(
        username: U,
        password: P,
        socket: S,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let socket = lookup_host(&socket)
            .await?
            .next()
            .ok_or_else(|| Error::ConnectionError("Error Parsing Socket".to_string()))?;

        Ok(SshConfig {
            username: username.into(),
            socket,
            password: password.into(),
            timeout,
        })
    }

    /// Open the transport and authenticate. The whole handshake is bounded
    /// by the configured timeout.
    pub async fn connect(&self) -> crate::Result<SshSession> {
        let handle = timeout(self.timeout, self.open_and_authenticate())
            .await
            .map_err(|_| {
                Error::ConnectionError(format!(
                    "connection to {} timeout after {}s",
                    self.socket,
                    self.timeout.as_secs()
                ))
            })??;

        debug!("SSH session established: {}@{}", self.username, self.socket);
        Ok(SshSession { handle })
    }

    async fn open_and_authenticate(&self) -> crate::Result<client::Handle<Handler>> {
        let mut handle = get_handle(self.socket, self.timeout).await?;

        let auth_res = handle
            .authenticate_password(&self.username, &self.password)
            .await?;

        if !auth_res {
            return Err(Error::AuthenticationError(
                "Failed to authenticate with password".to_string(),
            ));
        }

        Ok(handle)
    }
}

/// One line of incremental output from a streamed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    Out(String),
    Err(String),
}

/// Progress notifications emitted while uploading a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
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
}

pub struct SshSession {
    handle: client::Handle<Handler>,
}

impl SshSession {
    /// Cheap local check; no round trip to the server.
    pub fn is_connected(&self) -> bool {
        !self.handle.is_closed()
    }

    pub async fn disconnect(&self) -> crate::Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await?;
        Ok(())
    }

    /// Execute a command on the remote host, buffering all output until the
    /// channel closes.
    pub async fn exec(&self, cmd: &Command) -> crate::Result<CommandOutput> {
        let mut channel = self.handle.channel_open_session().await?;

        let command: Vec<u8> = cmd.into();
        channel.exec(true, command).await?;

        let mut stdout = vec![];
        let mut stderr = vec![];
        let mut code = None;

        loop {
            let Some(msg) = channel.wait().await else {
                break;
            };
            match msg {
                ChannelMsg::Data { ref data } => {
                    stdout.extend_from_slice(data);
                }
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    code = Some(exit_status);
                }
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            status_code: code,
        })
    }

    /// Execute a command and deliver complete output lines through
    /// `on_line` as data arrives, instead of buffering until completion.
    /// Remaining buffered data is still drained after the remote side
    /// signals close; an unterminated trailing fragment is flushed last.
    /// The full output is captured in the returned [`CommandOutput`] as
    /// well.
    pub async fn exec_streamed(
        &self,
        cmd: &Command,
        mut on_line: impl FnMut(StreamLine),
    ) -> crate::Result<CommandOutput> {
        let mut channel = self.handle.channel_open_session().await?;

        let command: Vec<u8> = cmd.into();
        channel.exec(true, command).await?;

        let mut stdout = vec![];
        let mut stderr = vec![];
        let mut code = None;
        let mut out_lines = LineBuffer::new();
        let mut err_lines = LineBuffer::new();

        loop {
            let Some(msg) = channel.wait().await else {
                break;
            };
            match msg {
                ChannelMsg::Data { ref data } => {
                    stdout.extend_from_slice(data);
                    out_lines.push(data, |line| on_line(StreamLine::Out(line.to_string())));
                }
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data);
                    err_lines.push(data, |line| on_line(StreamLine::Err(line.to_string())));
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    code = Some(exit_status);
                }
                _ => {}
            }
        }

        out_lines.flush(|line| on_line(StreamLine::Out(line.to_string())));
        err_lines.flush(|line| on_line(StreamLine::Err(line.to_string())));

        Ok(CommandOutput {
            stdout,
            stderr,
            status_code: code,
        })
    }

    /// Write in-memory content to a remote path over SFTP, creating any
    /// missing directories along the way.
    pub async fn transfer_file(&self, contents: &[u8], remote_dest: &str) -> crate::Result<()> {
        let sftp = self.sftp().await?;

        if let Some(parent) = parent_dir(remote_dest) {
            ensure_remote_dir(&sftp, parent).await?;
        }

        let mut remote_file = sftp
            .open_with_flags(
                remote_dest,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| {
                Error::FileTransferError(format!("Failed to create remote file: {}", e))
            })?;

        remote_file.write_all(contents).await.map_err(|e| {
            Error::FileTransferError(format!("Failed to write to remote file: {}", e))
        })?;

        remote_file.shutdown().await.map_err(|e| {
            Error::FileTransferError(format!("Failed to close remote file: {}", e))
        })?;

        Ok(())
    }

    /// Upload a local file into a remote directory under its original base
    /// name, streaming it in chunks and reporting progress through
    /// `on_event`. Returns the remote path and the byte count.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        remote_dir: &str,
        mut on_event: Option<&mut (dyn FnMut(TransferEvent) + Send)>,
    ) -> crate::Result<(String, u64)> {
        let mut local = tokio::fs::File::open(local_path).await.map_err(|e| {
            Error::FileTransferError(format!(
                "Cannot open local file {}: {}",
                local_path.display(),
                e
            ))
        })?;

        let total = local
            .metadata()
            .await
            .map_err(|e| Error::FileTransferError(format!("Cannot stat local file: {}", e)))?
            .len();

        let name = local_path
            .file_name()
            .ok_or_else(|| Error::FileTransferError("Invalid local path".to_string()))?
            .to_string_lossy()
            .into_owned();
        let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), name);

        let sftp = self.sftp().await?;
        ensure_remote_dir(&sftp, remote_dir).await?;

        let mut remote_file = sftp
            .open_with_flags(
                remote_path.as_str(),
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| {
                Error::FileTransferError(format!("Failed to create remote file: {}", e))
            })?;

        if let Some(cb) = on_event.as_mut() {
            cb(TransferEvent::Started {
                source: local_path.display().to_string(),
                dest: remote_path.clone(),
                total,
            });
        }

        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut transferred: u64 = 0;

        loop {
            let n = local
                .read(&mut buf)
                .await
                .map_err(|e| Error::FileTransferError(format!("Local read failed: {}", e)))?;
            if n == 0 {
                break;
            }

            remote_file.write_all(&buf[..n]).await.map_err(|e| {
                Error::FileTransferError(format!("Failed to write to remote file: {}", e))
            })?;

            transferred += n as u64;
            if let Some(cb) = on_event.as_mut() {
                let percent = if total == 0 {
                    100
                } else {
                    (transferred * 100 / total) as u8
                };
                cb(TransferEvent::Progress {
                    transferred,
                    total,
                    percent,
                });
            }
        }

        remote_file.shutdown().await.map_err(|e| {
            Error::FileTransferError(format!("Failed to close remote file: {}", e))
        })?;

        if let Some(cb) = on_event.as_mut() {
            cb(TransferEvent::Completed);
        }

        debug!(
            "uploaded {} -> {} ({} bytes)",
            local_path.display(),
            remote_path,
            transferred
        );
        Ok((remote_path, transferred))
    }

    /// Stat a remote path. Any failure, including transport faults, is a
    /// negative answer.
    pub async fn remote_file_exists(&self, remote_path: &str) -> bool {
        let sftp = match self.sftp().await {
            Ok(sftp) => sftp,
            Err(e) => {
                debug!("SFTP session for stat failed: {}", e);
                return false;
            }
        };

        match sftp.metadata(remote_path).await {
            Ok(_) => true,
            Err(e) => {
                debug!("stat {} failed: {}", remote_path, e);
                false
            }
        }
    }

    async fn sftp(&self) -> crate::Result<SftpSession> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|_| Error::FileTransferError("Failed to create SFTP session".into()))
    }
}

/// Create every missing component of `remote_dir`, walking from the root.
async fn ensure_remote_dir(sftp: &SftpSession, remote_dir: &str) -> crate::Result<()> {
    let mut current = String::new();

    for part in remote_dir.split('/') {
        if part.is_empty() {
            continue;
        }
        current.push('/');
        current.push_str(part);

        if sftp.metadata(current.as_str()).await.is_ok() {
            continue;
        }

        if let Err(e) = sftp.create_dir(current.as_str()).await {
            // A concurrent worker may have created it between the stat and
            // the mkdir.
            if !e.to_string().contains("already exists")
                && sftp.metadata(current.as_str()).await.is_err()
            {
                return Err(Error::FileTransferError(format!(
                    "Failed to create directory {}: {}",
                    current, e
                )));
            }
        }
    }

    Ok(())
}

fn parent_dir(remote_path: &str) -> Option<&str> {
    let trimmed = remote_path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    if idx == 0 {
        None
    } else {
        Some(&trimmed[..idx])
    }
}

/// Get a handle to the SSH session
async fn get_handle<S: ToSocketAddrs>(
    socket: S,
    timeout: Duration,
) -> crate::Result<client::Handle<Handler>> {
    let config = client::Config {
        inactivity_timeout: Some(timeout),
        ..Default::default()
    };

    let config = std::sync::Arc::new(config);

    let sh = Handler {};

    let handle = client::connect(config, socket, sh).await?;

    Ok(handle)
}

struct Handler {}

#[async_trait]
impl client::Handler for Handler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Assembles raw output chunks into complete lines. A line is emitted as
/// soon as its terminator arrives; `flush` hands over whatever is left.
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        LineBuffer { pending: Vec::new() }
    }

    fn push(&mut self, chunk: &[u8], mut emit: impl FnMut(&str)) {
        self.pending.extend_from_slice(chunk);

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            emit(text.trim_end_matches('\r'));
        }
    }

    fn flush(&mut self, mut emit: impl FnMut(&str)) {
        if self.pending.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        emit(text.trim_end_matches('\r'));
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_emits_each_line_in_order() {
        let mut lines = Vec::new();
        let mut buffer = LineBuffer::new();

        buffer.push(b"one\ntwo\nthree\n", |line| lines.push(line.to_string()));
        buffer.flush(|line| lines.push(line.to_string()));

        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn line_buffer_joins_split_chunks() {
        let mut lines = Vec::new();
        let mut buffer = LineBuffer::new();

        buffer.push(b"hel", |line| lines.push(line.to_string()));
        assert!(lines.is_empty());

        buffer.push(b"lo\nwor", |line| lines.push(line.to_string()));
        assert_eq!(lines, vec!["hello"]);

        buffer.push(b"ld", |line| lines.push(line.to_string()));
        buffer.flush(|line| lines.push(line.to_string()));
        assert_eq!(lines, vec!["hello", "world"]);
    }

    #[test]
    fn line_buffer_strips_carriage_returns() {
        let mut lines = Vec::new();
        let mut buffer = LineBuffer::new();

        buffer.push(b"formatting\r\ndone\r\n", |line| {
            lines.push(line.to_string())
        });

        assert_eq!(lines, vec!["formatting", "done"]);
    }

    #[test]
    fn parent_dir_walks_up_one_level() {
        assert_eq!(parent_dir("/opt/software/pkg.tar.gz"), Some("/opt/software"));
        assert_eq!(parent_dir("/opt"), None);
        assert_eq!(parent_dir("relative"), None);
    }
}
