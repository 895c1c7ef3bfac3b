use std::net::TcpStream;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::error::{Result, TransportError};

/// Secure channel material: PEM certificate chain, private key and the
/// trust anchor used to verify the other side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_file: PathBuf,
}

impl Auth {
    pub fn new(
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
        ca_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            ca_file: ca_file.into(),
        }
    }
}

/// Upgrades raw TCP streams into [`Channel`]s.
///
/// Built once from optional [`Auth`] material and shared by every
/// connection. Without material, streams pass through unchanged as plain
/// channels. With material, the server side requires and verifies a client
/// certificate (mutual TLS) and the client side verifies the server against
/// the same trust anchor.
#[derive(Clone)]
pub struct ChannelSecurity {
    mode: SecurityMode,
}

#[derive(Clone)]
enum SecurityMode {
    Plain,
    #[cfg(feature = "tls")]
    Server(std::sync::Arc<rustls::ServerConfig>),
    #[cfg(feature = "tls")]
    Client(std::sync::Arc<rustls::ClientConfig>),
}

impl ChannelSecurity {
    /// No transport security.
    pub fn plain() -> Self {
        Self {
            mode: SecurityMode::Plain,
        }
    }

    /// Accept-side security. `None` means plaintext.
    pub fn server(auth: Option<&Auth>) -> Result<Self> {
        match auth {
            None => Ok(Self::plain()),
            Some(auth) => Self::server_tls(auth),
        }
    }

    /// Dial-side security. `None` means plaintext.
    pub fn client(auth: Option<&Auth>) -> Result<Self> {
        match auth {
            None => Ok(Self::plain()),
            Some(auth) => Self::client_tls(auth),
        }
    }

    #[cfg(feature = "tls")]
    fn server_tls(auth: &Auth) -> Result<Self> {
        let config = crate::tls::server_config(auth)?;
        tracing::debug!(cert = ?auth.cert_file, "mutual tls enabled for listener");
        Ok(Self {
            mode: SecurityMode::Server(config),
        })
    }

    #[cfg(feature = "tls")]
    fn client_tls(auth: &Auth) -> Result<Self> {
        let config = crate::tls::client_config(auth)?;
        Ok(Self {
            mode: SecurityMode::Client(config),
        })
    }

    #[cfg(not(feature = "tls"))]
    fn server_tls(_auth: &Auth) -> Result<Self> {
        Err(TransportError::TlsUnavailable)
    }

    #[cfg(not(feature = "tls"))]
    fn client_tls(_auth: &Auth) -> Result<Self> {
        Err(TransportError::TlsUnavailable)
    }

    /// True when streams pass through without TLS.
    pub fn is_plain(&self) -> bool {
        matches!(self.mode, SecurityMode::Plain)
    }

    /// Upgrade an accepted stream, completing the TLS handshake eagerly.
    ///
    /// The handshake honours whatever read timeout is set on `stream`.
    pub fn upgrade_server(&self, stream: TcpStream) -> Result<Channel> {
        match &self.mode {
            SecurityMode::Plain => Ok(Channel::plain(stream)),
            #[cfg(feature = "tls")]
            SecurityMode::Server(config) => {
                let conn =
                    rustls::ServerConnection::new(config.clone()).map_err(crate::tls::tls_err)?;
                let mut tls = rustls::StreamOwned::new(conn, stream);
                while tls.conn.is_handshaking() {
                    tls.conn.complete_io(&mut tls.sock)?;
                }
                Ok(Channel::tls_server(tls))
            }
            #[cfg(feature = "tls")]
            SecurityMode::Client(_) => Err(wrong_side("client", "accepted")),
        }
    }

    /// Upgrade a dialed stream. `host` is the expected server name.
    pub fn upgrade_client(&self, stream: TcpStream, host: &str) -> Result<Channel> {
        match &self.mode {
            SecurityMode::Plain => {
                let _ = host;
                Ok(Channel::plain(stream))
            }
            #[cfg(feature = "tls")]
            SecurityMode::Client(config) => {
                let name = crate::tls::server_name(host)?;
                let conn = rustls::ClientConnection::new(config.clone(), name)
                    .map_err(crate::tls::tls_err)?;
                let mut tls = rustls::StreamOwned::new(conn, stream);
                while tls.conn.is_handshaking() {
                    tls.conn.complete_io(&mut tls.sock)?;
                }
                Ok(Channel::tls_client(tls))
            }
            #[cfg(feature = "tls")]
            SecurityMode::Server(_) => Err(wrong_side("server", "dialed")),
        }
    }

    /// Async [`upgrade_server`](Self::upgrade_server).
    #[cfg(feature = "async")]
    pub async fn upgrade_server_async(
        &self,
        stream: tokio::net::TcpStream,
    ) -> Result<crate::AsyncChannel> {
        match &self.mode {
            SecurityMode::Plain => Ok(crate::AsyncChannel::plain(stream)),
            #[cfg(feature = "tls")]
            SecurityMode::Server(config) => {
                let acceptor = tokio_rustls::TlsAcceptor::from(config.clone());
                let tls = acceptor.accept(stream).await?;
                Ok(crate::AsyncChannel::tls_server(tls))
            }
            #[cfg(feature = "tls")]
            SecurityMode::Client(_) => Err(wrong_side("client", "accepted")),
        }
    }

    /// Async [`upgrade_client`](Self::upgrade_client).
    #[cfg(feature = "async")]
    pub async fn upgrade_client_async(
        &self,
        stream: tokio::net::TcpStream,
        host: &str,
    ) -> Result<crate::AsyncChannel> {
        match &self.mode {
            SecurityMode::Plain => {
                let _ = host;
                Ok(crate::AsyncChannel::plain(stream))
            }
            #[cfg(feature = "tls")]
            SecurityMode::Client(config) => {
                let name = crate::tls::server_name(host)?;
                let connector = tokio_rustls::TlsConnector::from(config.clone());
                let tls = connector.connect(name, stream).await?;
                Ok(crate::AsyncChannel::tls_client(tls))
            }
            #[cfg(feature = "tls")]
            SecurityMode::Server(_) => Err(wrong_side("server", "dialed")),
        }
    }
}

#[cfg(feature = "tls")]
fn wrong_side(configured: &str, stream: &str) -> TransportError {
    TransportError::Tls(format!(
        "{configured}-side security cannot upgrade a {stream} stream"
    ))
}

impl Default for ChannelSecurity {
    fn default() -> Self {
        Self::plain()
    }
}

impl std::fmt::Debug for ChannelSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.mode {
            SecurityMode::Plain => "plain",
            #[cfg(feature = "tls")]
            SecurityMode::Server(_) => "tls-server",
            #[cfg(feature = "tls")]
            SecurityMode::Client(_) => "tls-client",
        };
        f.debug_struct("ChannelSecurity")
            .field("mode", &mode)
            .finish()
    }
}


#[cfg(all(test, feature = "tls"))]
mod tls_tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::path::{Path, PathBuf};

    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};

    use super::*;

    struct Material {
        dir: PathBuf,
        server: Auth,
        client: Auth,
    }

    impl Drop for Material {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }

    fn write(dir: &Path, name: &str, pem: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, pem).unwrap();
        path
    }

    fn material(tag: &str) -> Material {
        let dir = std::env::temp_dir().join(format!(
            "muxlink-transport-tls-{tag}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();
        let ca_file = write(&dir, "ca.pem", &ca.pem());

        let leaf = |name: &str| {
            let key = KeyPair::generate().unwrap();
            let cert = CertificateParams::new(vec!["localhost".to_string()])
                .unwrap()
                .signed_by(&key, &ca, &ca_key)
                .unwrap();
            Auth::new(
                write(&dir, &format!("{name}.pem"), &cert.pem()),
                write(&dir, &format!("{name}.key"), &key.serialize_pem()),
                ca_file.clone(),
            )
        };
        let server = leaf("server");
        let client = leaf("client");

        Material {
            dir,
            server,
            client,
        }
    }

    #[test]
    fn mutual_tls_roundtrip() {
        let material = material("roundtrip");
        let server_security = ChannelSecurity::server(Some(&material.server)).unwrap();
        let client_security = ChannelSecurity::client(Some(&material.client)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut channel = server_security.upgrade_server(stream).unwrap();
            assert!(channel.is_secure());
            let mut buf = [0u8; 5];
            channel.read_exact(&mut buf).unwrap();
            channel.write_all(&buf).unwrap();
            channel.flush().unwrap();
        });

        let raw = TcpStream::connect(addr).unwrap();
        let mut channel = client_security.upgrade_client(raw, "localhost").unwrap();
        channel.write_all(b"hello").unwrap();
        channel.flush().unwrap();
        let mut buf = [0u8; 5];
        channel.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn server_rejects_client_without_certificate() {
        let material = material("nocert");
        let server_security = ChannelSecurity::server(Some(&material.server)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            server_security.upgrade_server(stream).is_err()
        });

        // A TLS client that trusts the CA but presents no certificate.
        let roots = crate::tls::load_roots(&material.client.ca_file).unwrap();
        let config = rustls::ClientConfig::builder_with_provider(std::sync::Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
        let conn = rustls::ClientConnection::new(
            std::sync::Arc::new(config),
            crate::tls::server_name("localhost").unwrap(),
        )
        .unwrap();
        let mut stream = rustls::StreamOwned::new(conn, TcpStream::connect(addr).unwrap());
        let _ = stream.write_all(b"x");
        let _ = stream.flush();
        let mut buf = [0u8; 1];
        let _ = stream.read(&mut buf);

        assert!(handle.join().unwrap(), "handshake without client cert must fail");
    }

    #[test]
    fn missing_material_file_is_reported() {
        let auth = Auth::new("/nonexistent/c.pem", "/nonexistent/k.pem", "/nonexistent/ca.pem");
        let err = ChannelSecurity::server(Some(&auth)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidMaterial { .. }));
    }

    #[test]
    fn wrong_side_upgrade_is_rejected() {
        let material = material("side");
        let client_security = ChannelSecurity::client(Some(&material.client)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _raw = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        assert!(matches!(
            client_security.upgrade_server(accepted),
            Err(TransportError::Tls(_))
        ));
    }
}
