// SFTP connection management

use super::SftpConfiguration;
use crate::errors::SftpError;
use ssh2::{Session, Sftp};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Authenticated SSH session with an open SFTP channel
pub struct SftpConnection {
    session: Session,
    sftp: Sftp,
    _tcp: TcpStream,
}

impl SftpConnection {
    /// Establish an authenticated SFTP connection
    #[instrument(skip_all, fields(host = %config.host, port = config.port))]
    pub fn connect(config: &SftpConfiguration, timeout: Duration) -> Result<Self, SftpError> {
        if !config.is_configured() {
            return Err(SftpError::NotConfigured(config.host.clone()));
        }
        info!("Establishing SFTP connection");

        let addr = config
            .endpoint()
            .to_socket_addrs()
            .map_err(|e| {
                SftpError::ConnectionFailed(format!("Failed to resolve {}: {}", config.endpoint(), e))
            })?
            .next()
            .ok_or_else(|| {
                SftpError::ConnectionFailed(format!("No address for {}", config.endpoint()))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            error!(error = %e, "Failed to connect");
            SftpError::ConnectionFailed(format!("Failed to connect to {}: {}", config.endpoint(), e))
        })?;

        tcp.set_read_timeout(Some(timeout)).map_err(|e| {
            SftpError::ConnectionFailed(format!("Failed to set read timeout: {}", e))
        })?;
        tcp.set_write_timeout(Some(timeout)).map_err(|e| {
            SftpError::ConnectionFailed(format!("Failed to set write timeout: {}", e))
        })?;

        let mut session = Session::new().map_err(|e| {
            SftpError::ConnectionFailed(format!("Failed to create SSH session: {}", e))
        })?;
        session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        session.set_tcp_stream(tcp.try_clone().map_err(|e| {
            SftpError::ConnectionFailed(format!("Failed to clone TCP stream: {}", e))
        })?);

        session.handshake().map_err(|e| {
            error!(error = %e, "SSH handshake failed");
            SftpError::ConnectionFailed(format!("SSH handshake failed: {}", e))
        })?;

        log_host_key(&session);
        authenticate(&session, config)?;

        if !session.authenticated() {
            return Err(SftpError::AuthenticationFailed(
                "Authentication failed".to_string(),
            ));
        }

        let sftp = session.sftp().map_err(|e| {
            SftpError::ConnectionFailed(format!("Failed to open SFTP channel: {}", e))
        })?;

        info!("SFTP connection established");
        Ok(Self {
            session,
            sftp,
            _tcp: tcp,
        })
    }

    pub fn sftp(&self) -> &Sftp {
        &self.sftp
    }

    pub fn disconnect(self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!(error = %e, "SFTP disconnect failed");
        }
    }
}

fn log_host_key(session: &Session) {
    if let Some((_, host_key_type)) = session.host_key() {
        if let Some(hash_bytes) = session.host_key_hash(ssh2::HashType::Sha256) {
            let hash_hex = hash_bytes
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":");
            debug!(host_key_type = ?host_key_type, hash = %hash_hex, "Server host key");
        }
    }
}

fn authenticate(session: &Session, config: &SftpConfiguration) -> Result<(), SftpError> {
    let username = config.username.as_str();
    if config.use_private_key {
        let key_path = config
            .private_key_path
            .as_deref()
            .ok_or_else(|| SftpError::NotConfigured(config.host.clone()))?;
        let passphrase = config
            .private_key_passphrase
            .as_deref()
            .filter(|p| !p.is_empty());
        debug!(username = %username, key_path = %key_path.display(), "Authenticating with SSH key");
        session
            .userauth_pubkey_file(username, None, key_path, passphrase)
            .map_err(|e| {
                error!(error = %e, username = %username, "SSH key authentication failed");
                SftpError::AuthenticationFailed(format!(
                    "SSH key authentication failed for user {}: {}",
                    username, e
                ))
            })
    } else {
        let password = config.password.as_deref().unwrap_or_default();
        debug!(username = %username, "Authenticating with password");
        session.userauth_password(username, password).map_err(|e| {
            error!(error = %e, username = %username, "Password authentication failed");
            SftpError::AuthenticationFailed(format!(
                "Password authentication failed for user {}: {}",
                username, e
            ))
        })
    }
}
