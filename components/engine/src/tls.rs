//! The TLS layer: builds listener-wide `rustls` server config from
//! [`TlsConfig`], and performs both implicit-TLS wrapping on accept and
//! in-band `STLS` upgrade on an already-open socket.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::{server::TlsStream, TlsAcceptor};

use crate::error::Error;
use crate::settings::TlsConfig;

/// A loaded, ready-to-use TLS server configuration for one listener.
///
/// Built once at listener startup: the listener must fail to start if the
/// certificate is unreadable, rather than fail lazily on first connection.
#[derive(Clone)]
pub struct TlsLayer {
    acceptor: TlsAcceptor,
}

impl TlsLayer {
    pub fn from_config(cfg: &TlsConfig) -> Result<Self, Error> {
        let cert_file = File::open(&cfg.certificate_path).map_err(|e| {
            Error::TlsFailure(format!(
                "cannot open certificate {}: {}",
                cfg.certificate_path.display(),
                e
            ))
        })?;
        let cert_chain = certs(&mut BufReader::new(cert_file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::TlsFailure(format!("malformed certificate: {}", e)))?;
        if cert_chain.is_empty() {
            return Err(Error::TlsFailure("certificate file has no entries".to_string()));
        }

        let key_file = File::open(&cfg.key_path).map_err(|e| {
            Error::TlsFailure(format!(
                "cannot open private key {}: {}",
                cfg.key_path.display(),
                e
            ))
        })?;
        let key = private_key(&mut BufReader::new(key_file))
            .map_err(|e| Error::TlsFailure(format!("malformed private key: {}", e)))?
            .ok_or_else(|| Error::TlsFailure("private key file has no entries".to_string()))?;

        let config = match cfg.min_version.as_deref() {
            Some("1.3") => ServerConfig::builder_with_protocol_versions(&[&rustls::version::TLS13]),
            _ => ServerConfig::builder(),
        }
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| Error::TlsFailure(format!("invalid certificate/key pair: {}", e)))?;

        Ok(TlsLayer {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Perform the TLS handshake over `io`, whether that's a freshly
    /// accepted socket (implicit TLS) or one already carrying a POP3
    /// AUTHORIZATION exchange up to the `STLS` command (in-band upgrade).
    pub async fn accept<IO>(&self, io: IO) -> Result<TlsStream<IO>, Error>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        self.acceptor
            .accept(io)
            .await
            .map_err(|e| Error::TlsFailure(e.to_string()))
    }
}
