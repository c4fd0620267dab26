//! TLS configuration loading for the `-CT/--cert` / `-K/--key` server flags and the
//! client's optional trusted-root `--cert`.

use std::path::Path;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig};

use crate::error::{Result, TemStreamError};

fn read_certs(path: &Path) -> Result<Vec<Certificate>> {
    let bytes = std::fs::read(path)
        .map_err(|e| TemStreamError::Resource(format!("reading cert {path:?}: {e}")))?;
    let mut reader = std::io::BufReader::new(bytes.as_slice());
    rustls_pemfile::certs(&mut reader)
        .map_err(|e| TemStreamError::Resource(format!("parsing cert {path:?}: {e}")))
        .map(|certs| certs.into_iter().map(Certificate).collect())
}

fn read_private_key(path: &Path) -> Result<PrivateKey> {
    let bytes = std::fs::read(path)
        .map_err(|e| TemStreamError::Resource(format!("reading key {path:?}: {e}")))?;
    let mut reader = std::io::BufReader::new(bytes.as_slice());
    let keys = rustls_pemfile::pkcs8_private_keys(&mut reader)
        .map_err(|e| TemStreamError::Resource(format!("parsing key {path:?}: {e}")))?;
    keys.into_iter()
        .next()
        .map(PrivateKey)
        .ok_or_else(|| TemStreamError::Resource(format!("no private key found in {path:?}")))
}

pub fn server_config(cert: &Path, key: &Path) -> Result<Arc<ServerConfig>> {
    let certs = read_certs(cert)?;
    let key = read_private_key(key)?;
    let config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TemStreamError::Transport(format!("bad TLS cert/key: {e}")))?;
    Ok(Arc::new(config))
}

/// Build a client config trusting only the given root certificate, suitable for
/// connecting to a server using a self-signed cert from the same deployment.
pub fn client_config(trusted_root: &Path) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(trusted_root)? {
        roots
            .add(&cert)
            .map_err(|e| TemStreamError::Transport(format!("bad trusted root: {e}")))?;
    }
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}
