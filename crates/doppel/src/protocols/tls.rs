//! TLS support for https imposters.
//!
//! Certificates and keys arrive as PEM strings in the imposter config. When
//! neither is given, a process-wide self-signed default pair is generated
//! once and reused. `mutualAuth` requests a client certificate, trusted
//! against the configured certificate chain.

use crate::errors::EngineError;
use crate::imposter::types::ImposterConfig;
use once_cell::sync::Lazy;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Default self-signed identity, generated once per process.
static DEFAULT_IDENTITY: Lazy<(String, String)> = Lazy::new(|| {
    let certified = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .expect("self-signed certificate generation cannot fail");
    (certified.cert.pem(), certified.key_pair.serialize_pem())
});

/// Build the TLS acceptor for an https imposter.
pub fn acceptor(config: &ImposterConfig) -> Result<TlsAcceptor, EngineError> {
    let (cert_pem, key_pem) = match (&config.cert, &config.key) {
        (Some(cert), Some(key)) => (cert.clone(), key.clone()),
        _ => DEFAULT_IDENTITY.clone(),
    };
    let (certs, key) = parse_identity(&cert_pem, &key_pem)?;

    let builder = rustls::ServerConfig::builder();
    let server_config = if config.mutual_auth {
        let mut roots = RootCertStore::empty();
        for cert in &certs {
            roots.add(cert.clone()).map_err(|e| {
                EngineError::CannotStartServer(format!("invalid trust certificate: {e}"))
            })?;
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| {
                EngineError::CannotStartServer(format!("cannot build client verifier: {e}"))
            })?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)
    }
    .map_err(|e| EngineError::CannotStartServer(format!("invalid TLS identity: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn parse_identity(
    cert_pem: &str,
    key_pem: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), EngineError> {
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<_, _>>()
        .map_err(|e| EngineError::CannotStartServer(format!("cannot parse certificate: {e}")))?;
    if certs.is_empty() {
        return Err(EngineError::CannotStartServer(
            "no certificates found in cert".to_string(),
        ));
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| EngineError::CannotStartServer(format!("cannot parse private key: {e}")))?
        .ok_or_else(|| EngineError::CannotStartServer("no private key found in key".to_string()))?;
    Ok((certs, key))
}
