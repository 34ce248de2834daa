//! Certificate Authority (C1): owns the root CA keypair, mints and caches leaf
//! certificates per hostname, and exposes the root's public-key fingerprint.
//!
//! Root CA generation/persistence and per-host leaf issuance are grounded on the
//! `rcgen`-based MITM certificate minting pattern found in the example pack's
//! `codex-rs` network proxy (`other_examples/..._network-proxy-src-mitm.rs.rs`),
//! translated from that file's `rama`/`boring` TLS stack onto this repository's
//! `rustls`/`tokio-rustls` stack.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::{MarasiError, Result};

const DEFAULT_LEAF_TTL_DAYS: i64 = 30;

struct CacheEntry {
    cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
    expiry: DateTime<Utc>,
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        CacheEntry {
            cert_der: self.cert_der.clone(),
            key_der: PrivatePkcs8KeyDer::from(self.key_der.secret_pkcs8_der().to_vec()),
            expiry: self.expiry,
        }
    }
}

/// Owns the root CA and the per-hostname leaf certificate cache.
pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    root_cert_der: CertificateDer<'static>,
    leaf_ttl: Duration,
    cache: SyncMutex<HashMap<String, CacheEntry>>,
    singleflight: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl CertificateAuthority {
    /// Load the root CA from `config_dir`, generating and persisting one on first
    /// run (spec.md §4.1: "generated once at first startup, persisted in the
    /// configuration directory, and reused across runs").
    pub fn load_or_create(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir)?;
        let cert_path = config_dir.join("marasi-ca-cert.pem");
        let key_path = config_dir.join("marasi-ca-key.pem");

        let (cert_pem, key_pem) = if cert_path.exists() && key_path.exists() {
            info!("loading existing root CA from {:?}", config_dir);
            (
                std::fs::read_to_string(&cert_path)?,
                std::fs::read_to_string(&key_path)?,
            )
        } else {
            info!("generating new root CA in {:?}", config_dir);
            let (cert_pem, key_pem) = generate_root_ca()?;
            write_atomic(&cert_path, cert_pem.as_bytes(), 0o644)?;
            write_atomic(&key_path, key_pem.as_bytes(), 0o600)?;
            (cert_pem, key_pem)
        };

        Self::from_pem(&cert_pem, &key_pem)
    }

    fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| MarasiError::Config(format!("invalid root CA key: {e}")))?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem)
            .map_err(|e| MarasiError::Config(format!("invalid root CA certificate: {e}")))?;
        let root_cert_der = CertificateDer::from(
            pem_to_der(cert_pem)
                .map_err(|e| MarasiError::Config(format!("invalid root CA PEM: {e}")))?,
        )
        .into_owned();
        let issuer = Issuer::new(params, key_pair);

        Ok(CertificateAuthority {
            issuer,
            root_cert_der,
            leaf_ttl: Duration::from_secs(DEFAULT_LEAF_TTL_DAYS as u64 * 86_400),
            cache: SyncMutex::new(HashMap::new()),
            singleflight: AsyncMutex::new(HashMap::new()),
        })
    }

    /// `mint(hostname) → (leaf_cert, private_key)` (spec.md §4.1).
    ///
    /// Cached by hostname until the cache entry's expiry; minting for a given
    /// hostname is serialized via a per-hostname singleflight lock so concurrent
    /// CONNECT handshakes for the same SNI don't race each other into generating
    /// two leaves (spec.md §5 "Shared resources").
    pub async fn mint(&self, hostname: &str) -> Result<(CertificateDer<'static>, PrivatePkcs8KeyDer<'static>)> {
        if let Some(entry) = self.cached_entry(hostname) {
            return Ok((entry.cert_der, entry.key_der));
        }

        let lock = {
            let mut locks = self.singleflight.lock().await;
            locks
                .entry(hostname.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        // Another task may have minted while we waited for the lock.
        if let Some(entry) = self.cached_entry(hostname) {
            return Ok((entry.cert_der, entry.key_der));
        }

        let entry = self.generate_leaf(hostname)?;
        self.cache
            .lock()
            .insert(hostname.to_string(), entry.clone());
        Ok((entry.cert_der, entry.key_der))
    }

    fn cached_entry(&self, hostname: &str) -> Option<CacheEntry> {
        let cache = self.cache.lock();
        cache.get(hostname).and_then(|entry| {
            if entry.expiry > Utc::now() {
                Some(entry.clone())
            } else {
                None
            }
        })
    }

    fn generate_leaf(&self, hostname: &str) -> Result<CacheEntry> {
        let san = if hostname.parse::<std::net::IpAddr>().is_ok() {
            SanType::IpAddress(hostname.parse().unwrap())
        } else {
            SanType::DnsName(
                hostname
                    .try_into()
                    .map_err(|e| MarasiError::Internal(format!("invalid SAN '{hostname}': {e}")))?,
            )
        };

        let mut params = CertificateParams::new(vec![])
            .map_err(|e| MarasiError::Internal(format!("leaf params error: {e}")))?;
        params.subject_alt_names = vec![san];
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params
            .distinguished_name
            .push(DnType::CommonName, hostname);

        let leaf_key = KeyPair::generate()
            .map_err(|e| MarasiError::Internal(format!("leaf keygen failed: {e}")))?;
        let cert = params
            .signed_by(&leaf_key, &self.issuer)
            .map_err(|e| MarasiError::Internal(format!("leaf signing failed: {e}")))?;

        let cert_der = CertificateDer::from(cert.der().to_vec()).into_owned();
        let key_der = PrivatePkcs8KeyDer::from(leaf_key.serialize_der());

        let expiry = Utc::now()
            + chrono::Duration::from_std(self.leaf_ttl)
                .unwrap_or_else(|_| chrono::Duration::days(DEFAULT_LEAF_TTL_DAYS));

        Ok(CacheEntry {
            cert_der,
            key_der,
            expiry,
        })
    }

    /// `root_fingerprint() → hex_digest`: SHA-256 of the root's SubjectPublicKeyInfo,
    /// published as pin material by the persistence layer (spec.md §4.1, §6).
    pub fn root_fingerprint(&self) -> Result<String> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.root_cert_der)
            .map_err(|e| MarasiError::Internal(format!("failed to parse root certificate: {e}")))?;
        let spki_der = cert.tbs_certificate.subject_pki.raw;
        let digest = Sha256::digest(spki_der);
        Ok(hex::encode(digest))
    }

    pub fn root_cert_der(&self) -> &CertificateDer<'static> {
        &self.root_cert_der
    }
}

fn generate_root_ca() -> Result<(String, String)> {
    let mut params = CertificateParams::new(vec![])
        .map_err(|e| MarasiError::Internal(format!("ca params error: {e}")))?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Marasi Local Root CA");
    params.distinguished_name = dn;

    let key_pair = KeyPair::generate()
        .map_err(|e| MarasiError::Internal(format!("ca keygen failed: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| MarasiError::Internal(format!("ca self-sign failed: {e}")))?;

    Ok((cert.pem(), key_pair.serialize_pem()))
}

fn pem_to_der(pem: &str) -> std::result::Result<Vec<u8>, String> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| e.to_string())?;
    certs
        .into_iter()
        .next()
        .map(|c| c.to_vec())
        .ok_or_else(|| "no certificate found in PEM".to_string())
}

/// Atomic, permission-set PEM file write (temp file + rename), matching the
/// grounding source's "write-then-hardlink" durability pattern, simplified to a
/// rename since this is a single-writer local file, not a multi-process handoff.
fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Build a per-connection TLS server config for a freshly minted leaf, ready to
/// hand to `tokio_rustls::TlsAcceptor` (used by the Connect Handler, C4).
pub fn server_config_for_leaf(
    cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
) -> Result<rustls::ServerConfig> {
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der.into())
        .map_err(|e| MarasiError::TlsHandshake {
            host: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })
}

pub fn warn_on_tls_failure(host: &str, err: &MarasiError) {
    warn!(host = %host, error = %err, "TLS handshake failed, closing connection");
}
