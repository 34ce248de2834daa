//! TLS utilities for the Connect Handler (C4, spec.md §4.4).
//!
//! Unlike a conventional reverse proxy, Marasi does not terminate TLS from a
//! single static cert/key pair — every CONNECT target gets its own leaf minted by
//! the Certificate Authority (C1). This module just turns a minted leaf into a
//! ready-to-use `TlsAcceptor` for that one connection.

use std::sync::Arc;

use tokio_rustls::TlsAcceptor;

use crate::ca::server_config_for_leaf;
use crate::error::Result;
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};

/// Builds a single-connection `TlsAcceptor` from a freshly minted leaf
/// certificate and key (spec.md §4.4 "perform TLS handshake on the client
/// socket using that leaf").
pub fn acceptor_for_leaf(
    cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
) -> Result<TlsAcceptor> {
    let config = server_config_for_leaf(cert_der, key_der)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CertificateAuthority;
    use tempfile::tempdir;

    #[tokio::test]
    async fn builds_an_acceptor_from_a_minted_leaf() {
        let dir = tempdir().unwrap();
        let ca = CertificateAuthority::load_or_create(dir.path()).unwrap();
        let (cert, key) = ca.mint("example.invalid").await.unwrap();
        assert!(acceptor_for_leaf(cert, key).is_ok());
    }
}
