//! HTTP client for the secrets-engine API.
//!
//! Every call is a single request: no retries, no backoff.  Server rejections
//! come back as [`PkiError::Status`] carrying the server's `errors` array.

use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{PkiError, Result};
use crate::tls;

const TOKEN_HEADER:     &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const API_PREFIX:       &str = "v1/";

/// Authenticated handle on one secrets-engine server.
#[derive(Debug, Clone)]
pub struct SecretsClient {
    http:      Client,
    base:      Url,
    token:     Option<String>,
    namespace: Option<String>,
}

impl SecretsClient {
    /// Build a client from the loaded configuration.
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let mut builder = Client::builder().timeout(cfg.timeout());
        if tls::needs_custom_tls(cfg) {
            builder = builder.use_preconfigured_tls(tls::build_tls_config(cfg)?);
        }
        let http = builder.build()?;
        Self::with_http(http, &cfg.addr, cfg.resolve_token()?, cfg.namespace.clone())
    }

    /// Wrap an existing reqwest client.
    pub fn with_http(
        http:      Client,
        addr:      &str,
        token:     Option<String>,
        namespace: Option<String>,
    ) -> Result<Self> {
        let mut base = Url::parse(addr)
            .map_err(|e| PkiError::Config(format!("addr {addr:?}: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { http, base, token, namespace })
    }

    /// Client with a short timeout and default TLS.
    #[cfg(test)]
    pub fn plain(addr: &str, token: Option<String>) -> Result<Self> {
        let http = Client::builder().timeout(std::time::Duration::from_secs(5)).build()?;
        Self::with_http(http, addr, token, None)
    }

    /// Full URL of an API path such as `pki/config/ca`.
    pub fn url(&self, path: &str) -> Result<Url> {
        let rel = format!("{API_PREFIX}{}", path.trim_start_matches('/'));
        self.base
            .join(&rel)
            .map_err(|e| PkiError::Protocol(format!("bad API path {path:?}: {e}")))
    }

    fn request(&self, method: Method, path: &str, authenticated: bool) -> Result<RequestBuilder> {
        let url = self.url(path)?;
        debug!("{method} {url}");
        let mut req = self.http.request(method, url);
        if authenticated {
            if let Some(token) = &self.token {
                req = req.header(TOKEN_HEADER, token);
            }
        }
        if let Some(ns) = &self.namespace {
            req = req.header(NAMESPACE_HEADER, ns);
        }
        Ok(req)
    }

    /// `POST` a JSON body.  `Ok(None)` for an empty (e.g. 204) response.
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Option<Value>> {
        let resp = self.request(Method::POST, path, true)?.json(body).send().await?;
        read_json(resp).await
    }

    /// `GET` a JSON document.
    pub async fn get_json(&self, path: &str) -> Result<Option<Value>> {
        let resp = self.request(Method::GET, path, true)?.send().await?;
        read_json(resp).await
    }

    /// List the keys under `path` (`GET ?list=true`).  An empty listing is a
    /// 404 on the server side and comes back as `Ok(None)`.
    pub async fn list(&self, path: &str) -> Result<Option<Value>> {
        let resp = self
            .request(Method::GET, path, true)?
            .query(&[("list", "true")])
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("empty listing at {path}");
            return Ok(None);
        }
        read_json(resp).await
    }

    /// `DELETE` a record.  Any success status counts.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let resp = self.request(Method::DELETE, path, true)?.send().await?;
        check_status(resp).await?;
        Ok(())
    }

    /// Raw `GET` returning the body bytes (certificate downloads).
    pub async fn get_raw(&self, path: &str, authenticated: bool) -> Result<Vec<u8>> {
        let resp = self.request(Method::GET, path, authenticated)?.send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

async fn read_json(resp: Response) -> Result<Option<Value>> {
    let resp = check_status(resp).await?;
    if resp.status() == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    let body = resp.bytes().await?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&body)?))
}

/// Turn a non-success response into [`PkiError::Status`].
async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PkiError::Status { status: status.as_u16(), errors: server_errors(status, &body) })
}

fn server_errors(status: StatusCode, body: &str) -> Vec<String> {
    let reason = || vec![status.canonical_reason().unwrap_or("request failed").to_string()];
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(errors) = v.get("errors").and_then(Value::as_array) {
            let msgs: Vec<String> = errors
                .iter()
                .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                .collect();
            return if msgs.is_empty() { reason() } else { msgs };
        }
    }
    let body = body.trim();
    if body.is_empty() { reason() } else { vec![body.to_string()] }
}
