//! TLS client configuration for the secrets-engine API.
//!
//! Builds a `rustls::ClientConfig` handed to reqwest when the configuration
//! asks for anything beyond the built-in web PKI roots:
//!   - a private CA (`ca_file`) that signed the server certificate
//!   - a client identity for mutual TLS (`cert_file` + `key_file`)
//!   - verification against `tls_server_name` instead of the host in `addr`
//!   - relaxed hostname matching (`tls_skip_hostname`); chain, expiry and EKU
//!     are still enforced

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme};
use rustls_pemfile::{certs, private_key};

use crate::config;
use crate::error::{PkiError, Result};

// ── Server certificate verifier ───────────────────────────────────────────────

/// Verifies the server chain against the configured trust roots, optionally
/// checking the certificate against a fixed name or not at all.
#[derive(Debug)]
struct ApiServerVerifier {
    /// Chain + revocation verification is delegated to the WebPki verifier.
    inner:         Arc<dyn ServerCertVerifier>,
    provider:      Arc<CryptoProvider>,
    /// Replaces the name derived from the request URL.
    override_name: Option<ServerName<'static>>,
    skip_hostname: bool,
}

impl ApiServerVerifier {
    fn new(
        root_store:    RootCertStore,
        provider:      Arc<CryptoProvider>,
        override_name: Option<ServerName<'static>>,
        skip_hostname: bool,
    ) -> Result<Arc<Self>> {
        let inner = rustls::client::WebPkiServerVerifier::builder_with_provider(
            Arc::new(root_store),
            Arc::clone(&provider),
        )
        .build()?;

        Ok(Arc::new(Self { inner, provider, override_name, skip_hostname }))
    }
}

impl ServerCertVerifier for ApiServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity:    &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name:   &ServerName<'_>,
        ocsp_response: &[u8],
        now:           UnixTime,
    ) -> std::result::Result<ServerCertVerified, TlsError> {
        let name = self.override_name.as_ref().unwrap_or(server_name);
        match self.inner.verify_server_cert(end_entity, intermediates, name, ocsp_response, now) {
            Ok(v) => Ok(v),
            Err(TlsError::InvalidCertificate(rustls::CertificateError::NotValidForName))
                if self.skip_hostname =>
            {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert:    &CertificateDer<'_>,
        dss:     &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert:    &CertificateDer<'_>,
        dss:     &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

// ── Config factory ────────────────────────────────────────────────────────────

/// `true` when reqwest's default TLS setup is not enough for `cfg`.
pub fn needs_custom_tls(cfg: &config::ClientConfig) -> bool {
    cfg.ca_file.is_some()
        || cfg.cert_file.is_some()
        || cfg.tls_server_name.is_some()
        || cfg.tls_skip_hostname
}

/// Read every certificate in the PEM file at `path`.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path)?;
    let chain = certs(&mut Cursor::new(pem)).collect::<std::io::Result<Vec<_>>>()?;
    if chain.is_empty() {
        return Err(PkiError::Config(format!("no certificate found in {}", path.display())));
    }
    Ok(chain)
}

/// Build the rustls configuration for `cfg`.
///
/// `ca_file` is required: the custom verifier has no other source of roots.
pub fn build_tls_config(cfg: &config::ClientConfig) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    // ── CA trust store ────────────────────────────────────────────────────────
    let ca_file = cfg.ca_file.as_deref().ok_or_else(|| {
        PkiError::Config("ca_file is required for custom TLS settings".into())
    })?;
    let mut root_store = RootCertStore::empty();
    for cert in load_certs(ca_file)? {
        root_store.add(cert)?;
    }
    debug!("loaded {} trust root(s) from {}", root_store.len(), ca_file.display());

    let override_name = match &cfg.tls_server_name {
        Some(name) => Some(ServerName::try_from(name.clone()).map_err(|e| {
            PkiError::Config(format!("tls_server_name {name:?}: {e}"))
        })?),
        None => None,
    };

    let verifier = ApiServerVerifier::new(
        root_store,
        Arc::clone(&provider),
        override_name,
        cfg.tls_skip_hostname,
    )?;

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier);

    // ── Client identity (mutual TLS) ──────────────────────────────────────────
    let tls_config = match (&cfg.cert_file, &cfg.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let cert_chain = load_certs(cert_file)?;
            let key_pem = fs::read(key_file)?;
            let private_key = private_key(&mut Cursor::new(key_pem))?.ok_or_else(|| {
                PkiError::Config(format!("no private key found in {}", key_file.display()))
            })?;
            builder.with_client_auth_cert(cert_chain, private_key)?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(tls_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::client::ResolvesClientCert;
    use std::path::PathBuf;

    fn testdata(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    #[test]
    fn defaults_need_no_custom_tls() {
        assert!(!needs_custom_tls(&config::ClientConfig::default()));
    }

    #[test]
    fn builds_with_private_ca() {
        let cfg = config::ClientConfig {
            ca_file: Some(testdata("root.pem")),
            tls_skip_hostname: true,
            ..config::ClientConfig::default()
        };
        assert!(needs_custom_tls(&cfg));
        let tls = build_tls_config(&cfg).unwrap();
        assert!(!tls.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn builds_with_client_identity() {
        let cfg = config::ClientConfig {
            ca_file: Some(testdata("root.pem")),
            cert_file: Some(testdata("int.pem")),
            key_file: Some(testdata("client.key")),
            ..config::ClientConfig::default()
        };
        let tls = build_tls_config(&cfg).unwrap();
        assert!(tls.client_auth_cert_resolver.has_certs());
    }

    #[test]
    fn key_file_without_key_is_rejected() {
        let cfg = config::ClientConfig {
            ca_file: Some(testdata("root.pem")),
            cert_file: Some(testdata("int.pem")),
            key_file: Some(testdata("int.pem")),
            ..config::ClientConfig::default()
        };
        assert!(matches!(build_tls_config(&cfg), Err(PkiError::Config(_))));
    }

    #[test]
    fn custom_tls_requires_ca_file() {
        let cfg = config::ClientConfig {
            tls_skip_hostname: true,
            ..config::ClientConfig::default()
        };
        assert!(matches!(build_tls_config(&cfg), Err(PkiError::Config(_))));
    }
}
