//! CA certificate writes: import, root/intermediate generation, signing an
//! intermediate CSR and installing the signed intermediate.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{Fields, RecordGateway, RecordStore};
use crate::client::SecretsClient;
use crate::error::{PkiError, Result};

pub const MODEL_NAME: &str = "pki/ca-certificate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaType {
    Root,
    Intermediate,
}

impl CaType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Intermediate => "intermediate",
        }
    }
}

impl fmt::Display for CaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "root" => Ok(Self::Root),
            "intermediate" => Ok(Self::Intermediate),
            other => Err(format!("unknown CA type {other:?} (expected root or intermediate)")),
        }
    }
}

/// Where the new CA key comes from; the last segment of the generate URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationType {
    Internal,
    Exported,
    Existing,
    Kms,
}

impl GenerationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Exported => "exported",
            Self::Existing => "existing",
            Self::Kms => "kms",
        }
    }
}

impl fmt::Display for GenerationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Self::Internal),
            "exported" => Ok(Self::Exported),
            "existing" => Ok(Self::Existing),
            "kms" => Ok(Self::Kms),
            other => Err(format!(
                "unknown generation type {other:?} (expected internal, exported, existing or kms)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaAction {
    /// Import a PEM bundle.  `use_issuer` targets the multi-issuer import
    /// endpoint instead of the legacy `config/ca`.
    Upload { use_issuer: bool },
    SignIntermediate,
    SetSignedIntermediate,
    Generate,
}

/// Client-side form state of a CA certificate write.
#[derive(Debug, Clone, PartialEq)]
pub struct CaCertificateRecord {
    pub id:          String,
    /// Mount path of the secrets engine.
    pub backend:     String,
    pub ca_type:     CaType,
    pub gen_type:    GenerationType,
    pub pem_bundle:  Option<String>,
    pub certificate: Option<String>,
    /// Remaining form fields (`common_name`, `ttl`, `csr`, ...), sent as-is.
    pub params:      Fields,
}

impl CaCertificateRecord {
    /// Fresh draft with a random id: an internally generated root.
    pub fn draft(backend: &str) -> Self {
        Self {
            id:          Uuid::new_v4().to_string(),
            backend:     backend.trim_matches('/').to_string(),
            ca_type:     CaType::Root,
            gen_type:    GenerationType::Internal,
            pem_bundle:  None,
            certificate: None,
            params:      Fields::new(),
        }
    }

    /// Full serialized form: the form fields plus `type`.
    pub fn serialize(&self) -> Fields {
        let mut form = self.params.clone();
        form.insert("type".into(), Value::String(self.gen_type.to_string()));
        form
    }
}

/// Endpoint and body of one write.
#[derive(Debug, Clone, PartialEq)]
pub struct CaRequest {
    pub endpoint: String,
    pub payload:  Value,
}

/// Select the endpoint and shape the body for `action`.
///
/// The generation type lives in the URL, never in the body.
pub fn plan_request(record: &CaCertificateRecord, action: CaAction) -> Result<CaRequest> {
    let backend = &record.backend;
    let (endpoint, payload) = match action {
        CaAction::Upload { use_issuer } => {
            let pem_bundle = record
                .pem_bundle
                .as_deref()
                .ok_or_else(|| PkiError::Protocol("upload needs a PEM bundle".into()))?;
            let endpoint = if use_issuer {
                format!("{backend}/issuers/import/bundle")
            } else {
                format!("{backend}/config/ca")
            };
            (endpoint, json!({ "pem_bundle": pem_bundle }))
        }
        CaAction::SetSignedIntermediate => {
            let certificate = record
                .certificate
                .as_deref()
                .ok_or_else(|| PkiError::Protocol("set-signed needs a certificate".into()))?;
            (format!("{backend}/intermediate/set-signed"), json!({ "certificate": certificate }))
        }
        CaAction::SignIntermediate => {
            (format!("{backend}/root/sign-intermediate"), Value::Object(form_without_type(record)))
        }
        CaAction::Generate => (
            format!("{backend}/{}/generate/{}", record.ca_type, record.gen_type),
            Value::Object(form_without_type(record)),
        ),
    };
    Ok(CaRequest { endpoint, payload })
}

fn form_without_type(record: &CaCertificateRecord) -> Fields {
    let mut form = record.serialize();
    form.remove("type");
    form
}

/// Shape a write response for the store; see
/// [`normalize_certificate_response`](super::normalize_certificate_response).
pub fn normalize_response(record: &CaCertificateRecord, response: Option<Value>) -> Fields {
    super::normalize_certificate_response(&record.id, MODEL_NAME, response)
}

/// A CA write paired with the action that routes it.
#[derive(Debug, Clone)]
pub struct CaSubmission {
    pub record: CaCertificateRecord,
    pub action: CaAction,
}

pub struct CaCertificateGateway {
    client: SecretsClient,
    mount:  String,
    store:  Arc<RecordStore>,
}

impl CaCertificateGateway {
    pub fn new(client: SecretsClient, mount: &str, store: Arc<RecordStore>) -> Self {
        Self { client, mount: mount.trim_matches('/').to_string(), store }
    }

    /// Draft bound to this gateway's mount.
    pub fn draft(&self) -> CaCertificateRecord {
        CaCertificateRecord::draft(&self.mount)
    }
}

impl RecordGateway for CaCertificateGateway {
    type Draft = CaSubmission;

    const MODEL_NAME: &'static str = MODEL_NAME;
    const PRIMARY_KEY: &'static str = "id";

    async fn submit(&self, draft: &CaSubmission) -> Result<Fields> {
        let request = plan_request(&draft.record, draft.action)?;
        info!("{:?} via {}", draft.action, request.endpoint);
        let response = self.client.post_json(&request.endpoint, &request.payload).await?;
        if response.is_none() {
            debug!("{}: empty response", request.endpoint);
        }
        let normalized = normalize_response(&draft.record, response);
        Ok(self.store.push_payload(MODEL_NAME, &draft.record.id, normalized))
    }
}
