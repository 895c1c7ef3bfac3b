use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};

use crate::error::{Result, TransportError};
use crate::security::Auth;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn invalid(path: &Path, reason: impl ToString) -> TransportError {
    TransportError::InvalidMaterial {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

pub(crate) fn tls_err(err: impl std::fmt::Display) -> TransportError {
    TransportError::Tls(err.to_string())
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|err| invalid(path, err))
}

pub(crate) fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|err| invalid(path, err))?;
    if certs.is_empty() {
        return Err(invalid(path, "no PEM certificates found"));
    }
    Ok(certs)
}

pub(crate) fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|err| invalid(path, err))?
        .ok_or_else(|| invalid(path, "no PEM private key found"))
}

pub(crate) fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert).map_err(|err| invalid(path, err))?;
    }
    Ok(roots)
}

/// Server side: present `cert_file`, require a client certificate chained to
/// `ca_file`.
pub(crate) fn server_config(auth: &Auth) -> Result<Arc<ServerConfig>> {
    let roots = Arc::new(load_roots(&auth.ca_file)?);
    let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider())
        .build()
        .map_err(tls_err)?;

    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_err)?
        .with_client_cert_verifier(verifier)
        .with_single_cert(load_certs(&auth.cert_file)?, load_key(&auth.key_file)?)
        .map_err(tls_err)?;
    Ok(Arc::new(config))
}

/// Client side: trust only `ca_file`, present `cert_file` for mutual auth.
pub(crate) fn client_config(auth: &Auth) -> Result<Arc<ClientConfig>> {
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_err)?
        .with_root_certificates(load_roots(&auth.ca_file)?)
        .with_client_auth_cert(load_certs(&auth.cert_file)?, load_key(&auth.key_file)?)
        .map_err(tls_err)?;
    Ok(Arc::new(config))
}

pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|err| TransportError::Tls(format!("invalid server name {host:?}: {err}")))
}
