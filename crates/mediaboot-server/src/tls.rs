//! TLS material loading

use std::path::Path;
use std::sync::Arc;

use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::error::{Result, ServerError};

/// Build a TLS acceptor from a PEM certificate chain and a PEM private key
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let material_error = |path: &Path, reason: String| ServerError::TlsMaterial {
        path: path.to_path_buf(),
        reason,
    };

    let certs = CertificateDer::pem_file_iter(cert_path)
        .map_err(|e| material_error(cert_path, e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| material_error(cert_path, e.to_string()))?;
    if certs.is_empty() {
        return Err(material_error(
            cert_path,
            "no certificates found".to_string(),
        ));
    }

    let key = PrivateKeyDer::from_pem_file(key_path)
        .map_err(|e| material_error(key_path, e.to_string()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_self_signed() {
        let dir = tempfile::tempdir().unwrap();
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("tls.crt");
        let key_path = dir.path().join("tls.key");
        fs::write(&cert_path, cert.pem()).unwrap();
        fs::write(&key_path, key_pair.serialize_pem()).unwrap();

        assert!(load_acceptor(&cert_path, &key_path).is_ok());
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_acceptor(&dir.path().join("nope.crt"), &dir.path().join("nope.key"))
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::TlsMaterial { .. }));
    }

    #[test]
    fn test_key_file_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let rcgen::CertifiedKey { cert, .. } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_path = dir.path().join("tls.crt");
        fs::write(&cert_path, cert.pem()).unwrap();

        // a certificate where the key should be
        let err = load_acceptor(&cert_path, &cert_path).err().unwrap();
        match err {
            ServerError::TlsMaterial { path, .. } => assert_eq!(path, cert_path),
            other => panic!("unexpected error: {}", other),
        }
    }
}
