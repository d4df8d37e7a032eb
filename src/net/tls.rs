//! TLS configuration and certificate loading.
//!
//! Builds the server-side rustls configuration for the listener: one
//! certificate chain with its private key, and optionally a client CA bundle
//! that turns on opportunistic client authentication (certificates are
//! verified when presented, never required).

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig};
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

/// Errors that abort TLS configuration. No partial config is ever produced.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate or key missing, unreadable, empty or not matching.
    #[error("failed to load certificate/key pair from {path:?}: {reason}")]
    CertLoad { path: PathBuf, reason: String },

    /// The client CA bundle could not be read.
    #[error("failed to read CA file {path:?}: {source}")]
    CaFileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The client CA bundle holds no usable certificate.
    #[error("no valid CA certificates found in {path:?}")]
    CaParse { path: PathBuf },

    #[error("client certificate verifier rejected: {0}")]
    Verifier(#[from] VerifierBuilderError),

    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Client authentication policy of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// Client certificates are not requested.
    None,
    /// Client certificates are verified if presented but not required.
    VerifyIfGiven,
}

/// Immutable server TLS configuration, built once per listener.
#[derive(Debug, Clone)]
pub struct ServerTlsConfig {
    config: Arc<ServerConfig>,
    client_auth: ClientAuth,
}

impl ServerTlsConfig {
    /// Build from listener settings. An empty `ca_path` disables client auth.
    pub fn from_settings(settings: &TlsConfig) -> Result<Self, TlsError> {
        let ca_path = (!settings.ca_path.is_empty()).then(|| Path::new(&settings.ca_path));
        build_server_tls_config(
            Path::new(&settings.cert_path),
            Path::new(&settings.key_path),
            ca_path,
        )
    }

    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }

    pub fn client_auth(&self) -> ClientAuth {
        self.client_auth
    }

    /// Acceptor for the listener's handshakes.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config())
    }
}

/// Load the certificate/key pair and, when `ca_path` is given, the client
/// trust store.
pub fn build_server_tls_config(
    cert_path: &Path,
    key_path: &Path,
    ca_path: Option<&Path>,
) -> Result<ServerTlsConfig, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let provider = crypto_provider();
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let (builder, client_auth) = match ca_path {
        None => (builder.with_no_client_auth(), ClientAuth::None),
        Some(ca_path) => {
            let roots = load_client_roots(ca_path)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                .allow_unauthenticated()
                .build()?;
            (
                builder.with_client_cert_verifier(verifier),
                ClientAuth::VerifyIfGiven,
            )
        }
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::CertLoad {
            path: cert_path.to_path_buf(),
            reason: e.to_string(),
        })?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    tracing::debug!(
        cert_path = %cert_path.display(),
        client_auth = ?client_auth,
        "TLS server configuration built"
    );

    Ok(ServerTlsConfig {
        config: Arc::new(config),
        client_auth,
    })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let cert_load = |reason: String| TlsError::CertLoad {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| cert_load(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| cert_load(e.to_string()))?;
    if certs.is_empty() {
        return Err(cert_load("no certificates found".to_string()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let cert_load = |reason: String| TlsError::CertLoad {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| cert_load(e.to_string()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| cert_load(e.to_string()))?
        .ok_or_else(|| cert_load("no private key found".to_string()))
}

fn load_client_roots(path: &Path) -> Result<RootCertStore, TlsError> {
    let pem = std::fs::read(path).map_err(|source| TlsError::CaFileRead {
        path: path.to_path_buf(),
        source,
    })?;

    // Undecodable PEM sections are skipped; only an empty result is fatal.
    let mut reader = pem.as_slice();
    let certs = rustls_pemfile::certs(&mut reader).filter_map(Result::ok);
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TlsError::CaParse {
            path: path.to_path_buf(),
        });
    }

    tracing::debug!(ca_path = %path.display(), added, ignored, "Client CA bundle loaded");
    Ok(roots)
}

/// Provider used for every TLS configuration built here.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}
