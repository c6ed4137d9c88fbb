//! pkictl configuration file parser.
//!
//! Plain `key = value` lines; `#` starts a comment line.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PkiError, Result};

// Defaults
const ADDR:    &str = "https://127.0.0.1:8200";
const MOUNT:   &str = "pki";
const TIMEOUT: u64  = 30;

/// Location used when `-c` is not given.
pub const DEFAULT_PATH: &str = "/etc/pkictl/pkictl.conf";

/// Full client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // ── Server ────────────────────────────────────────────────────────────────
    /// Base address of the secrets-engine API (scheme, host, port).
    pub addr: String,
    /// Access token sent as `X-Vault-Token`.
    pub token: Option<String>,
    /// File holding the access token; read when `token` is unset.
    pub token_file: Option<PathBuf>,
    /// Namespace sent as `X-Vault-Namespace`.
    pub namespace: Option<String>,
    /// Mount path of the PKI engine (e.g. `pki`, `pki-int`).
    pub mount: String,
    pub timeout: u64,
    // ── TLS ───────────────────────────────────────────────────────────────────
    /// PEM file with the CA certificate(s) that signed the server cert.
    pub ca_file: Option<PathBuf>,
    /// PEM client certificate chain (mutual TLS).
    pub cert_file: Option<PathBuf>,
    /// PEM client private key (mutual TLS).
    pub key_file: Option<PathBuf>,
    /// Name sent as SNI and used for verification instead of the host in `addr`.
    pub tls_server_name: Option<String>,
    /// Accept a server cert whose names do not match; the chain is still verified.
    pub tls_skip_hostname: bool,
    // ── Process ───────────────────────────────────────────────────────────────
    pub log_syslog: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr:              ADDR.to_string(),
            token:             None,
            token_file:        None,
            namespace:         None,
            mount:             MOUNT.to_string(),
            timeout:           TIMEOUT,
            ca_file:           None,
            cert_file:         None,
            key_file:          None,
            tls_server_name:   None,
            tls_skip_hostname: false,
            log_syslog:        false,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// The access token, reading `token_file` if needed.
    pub fn resolve_token(&self) -> Result<Option<String>> {
        if let Some(t) = &self.token {
            return Ok(Some(t.clone()));
        }
        match &self.token_file {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    PkiError::Config(format!("cannot read token file {}: {e}", path.display()))
                })?;
                let token = raw.trim();
                if token.is_empty() { Ok(None) } else { Ok(Some(token.to_string())) }
            }
            None => Ok(None),
        }
    }
}

/// Load `path`; when `path` is the default location and does not exist, the
/// compiled-in defaults are returned.
pub fn load_config(path: &Path) -> Result<ClientConfig> {
    if path == Path::new(DEFAULT_PATH) && !path.exists() {
        return Ok(ClientConfig::default());
    }
    let content = fs::read_to_string(path)
        .map_err(|e| PkiError::Config(format!("cannot read {}: {e}", path.display())))?;
    Ok(parse_config(&content))
}

/// Parse configuration text.  Unknown keys are ignored and unparsable numbers
/// keep their default.
pub fn parse_config(content: &str) -> ClientConfig {
    let mut cfg = ClientConfig::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = match parts.next() {
            Some(k) => k.trim().to_ascii_lowercase(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim().trim_matches('"').to_string(),
            None => continue,
        };
        if val.is_empty() {
            continue;
        }

        match key.as_str() {
            "addr"              => cfg.addr              = val,
            "token"             => cfg.token             = Some(val),
            "token_file"        => cfg.token_file        = Some(PathBuf::from(&val)),
            "namespace"         => cfg.namespace         = Some(val),
            "mount"             => cfg.mount             = val.trim_matches('/').to_string(),
            "timeout"           => cfg.timeout           = val.parse().unwrap_or(TIMEOUT),
            "ca_file"           => cfg.ca_file           = Some(PathBuf::from(&val)),
            "cert_file"         => cfg.cert_file         = Some(PathBuf::from(&val)),
            "key_file"          => cfg.key_file          = Some(PathBuf::from(&val)),
            "tls_server_name"   => cfg.tls_server_name   = Some(val),
            "tls_skip_hostname" => cfg.tls_skip_hostname = parse_bool(&val),
            "log_syslog"        => cfg.log_syslog        = parse_bool(&val),
            _ => {} // ignore unknown keys
        }
    }

    cfg
}

fn parse_bool(val: &str) -> bool {
    val == "true" || val == "1" || val == "yes"
}

/// Validate that required fields are populated and consistent.
pub fn validate_config(cfg: &ClientConfig) -> Result<()> {
    let addr = url::Url::parse(&cfg.addr)
        .map_err(|e| PkiError::Config(format!("addr {:?}: {e}", cfg.addr)))?;
    if addr.scheme() != "http" && addr.scheme() != "https" {
        return Err(PkiError::Config(format!(
            "addr must be http or https, got {}",
            addr.scheme()
        )));
    }
    if cfg.mount.is_empty() {
        return Err(PkiError::Config("mount is required".into()));
    }
    if cfg.cert_file.is_some() != cfg.key_file.is_some() {
        return Err(PkiError::Config(
            "cert_file and key_file must be set together".into(),
        ));
    }
    if cfg.timeout == 0 {
        return Err(PkiError::Config("timeout must be greater than zero".into()));
    }
    Ok(())
}
