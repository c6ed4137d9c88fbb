//! Error types for the PKI client.

use thiserror::Error;

/// Failure to decode certificate material.
///
/// Never fatal on its own: callers skip the derived metadata and keep the raw
/// certificate text around for download/copy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no certificate found in input")]
    Empty,

    #[error("PEM: {0}")]
    Pem(String),

    #[error("base64: {0}")]
    Base64(String),

    #[error("DER: {0}")]
    Der(String),
}

#[derive(Debug, Error)]
pub enum PkiError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS: {0}")]
    Tls(#[from] rustls::Error),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {}", .errors.join("; "))]
    Status { status: u16, errors: Vec<String> },

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol: {0}")]
    Protocol(String),

    #[error("Config: {0}")]
    Config(String),

    #[error("TLS verifier: {0}")]
    Verifier(String),
}

impl From<rustls::client::VerifierBuilderError> for PkiError {
    fn from(e: rustls::client::VerifierBuilderError) -> Self {
        Self::Verifier(e.to_string())
    }
}

impl PkiError {
    /// HTTP status of a server-side rejection, if that is what this is.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PkiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_joins_server_messages() {
        let err = PkiError::Status {
            status: 400,
            errors: vec!["unknown field".into(), "missing common_name".into()],
        };
        assert_eq!(err.to_string(), "HTTP 400: unknown field; missing common_name");
        assert_eq!(err.status(), Some(400));
    }
}
