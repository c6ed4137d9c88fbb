//! Issuers: listing, detail reads, updates and raw certificate downloads.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use super::{Fields, RecordGateway, RecordStore};
use crate::cert;
use crate::client::SecretsClient;
use crate::error::{PkiError, Result};
use crate::util;

pub const MODEL_NAME: &str = "pki/issuer";

/// Issuer attributes an update may carry.  Everything else on a record is
/// computed by the server and never sent back.
pub const WRITABLE_FIELDS: &[&str] = &[
    "crl_distribution_points",
    "enable_aia_url_templating",
    "issuer_name",
    "issuing_certificates",
    "leaf_not_after_behavior",
    "manual_chain",
    "ocsp_servers",
    "revocation_signature_algorithm",
    "usage",
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IssuerRecord {
    pub issuer_id: String,
    pub fields:    Fields,
}

impl IssuerRecord {
    /// Split a normalized record into id and attributes.  `None` without a
    /// string `issuer_id`.
    pub fn from_fields(mut fields: Fields) -> Option<Self> {
        match fields.remove("issuer_id") {
            Some(Value::String(issuer_id)) => Some(Self { issuer_id, fields }),
            _ => None,
        }
    }

    /// The record as one JSON object, `issuer_id` included.
    pub fn to_fields(&self) -> Fields {
        let mut out = Fields::new();
        out.insert("issuer_id".into(), Value::String(self.issuer_id.clone()));
        util::merge_objects(out, self.fields.clone())
    }

    /// Outbound form: the writable attributes only.
    pub fn serialize(&self) -> Fields {
        self.fields
            .iter()
            .filter(|(k, _)| WRITABLE_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertFormat {
    Pem,
    Der,
}

impl CertFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pem => "pem",
            Self::Der => "der",
        }
    }
}

impl fmt::Display for CertFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CertFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pem" => Ok(Self::Pem),
            "der" => Ok(Self::Der),
            other => Err(format!("unknown certificate format {other:?} (expected pem or der)")),
        }
    }
}

pub struct IssuerGateway {
    client: SecretsClient,
    mount:  String,
    store:  Arc<RecordStore>,
}

impl IssuerGateway {
    pub fn new(client: SecretsClient, mount: &str, store: Arc<RecordStore>) -> Self {
        Self { client, mount: mount.trim_matches('/').to_string(), store }
    }

    fn issuer_path(&self, id: &str) -> String {
        format!("{}/issuer/{id}", self.mount)
    }

    /// Every issuer on the mount, in server order.
    pub async fn list(&self) -> Result<Vec<IssuerRecord>> {
        let payload = self.client.list(&format!("{}/issuers", self.mount)).await?;
        let Some(payload) = payload else {
            return Ok(Vec::new());
        };
        let records = self
            .normalize_list(payload)
            .into_iter()
            .filter_map(|fields| {
                let Some(record) = IssuerRecord::from_fields(fields) else {
                    warn!("{}: skipping issuer listing entry without issuer_id", self.mount);
                    return None;
                };
                self.store.push_payload(MODEL_NAME, &record.issuer_id, record.to_fields());
                Some(record)
            })
            .collect::<Vec<_>>();
        debug!("{} issuers under {}", records.len(), self.mount);
        Ok(records)
    }

    /// One issuer by id or name (`default` resolves to the default issuer).
    pub async fn find(&self, id: &str) -> Result<IssuerRecord> {
        let payload = self
            .client
            .get_json(&self.issuer_path(id))
            .await?
            .ok_or_else(|| PkiError::Protocol(format!("empty response reading issuer {id}")))?;
        self.store_detail(payload, id)
    }

    /// Write the writable attributes of `record` back.
    pub async fn update(&self, record: &IssuerRecord) -> Result<IssuerRecord> {
        self.submit(record).await.and_then(|fields| {
            IssuerRecord::from_fields(fields)
                .ok_or_else(|| PkiError::Protocol("issuer response carried no issuer_id".into()))
        })
    }

    /// The issuer certificate in `format`, unauthenticated.  Any failure
    /// yields `None`: the download is just not offered.
    pub async fn fetch_cert_by_format(&self, id: &str, format: CertFormat) -> Option<Vec<u8>> {
        let path = format!("{}/{format}", self.issuer_path(id));
        match self.client.get_raw(&path, false).await {
            Ok(body) if !body.is_empty() => Some(body),
            Ok(_) => {
                warn!("issuer {id}: empty {format} certificate");
                None
            }
            Err(e) => {
                warn!("issuer {id}: {format} certificate unavailable: {e}");
                None
            }
        }
    }

    fn store_detail(&self, payload: Value, id: &str) -> Result<IssuerRecord> {
        let fields = self.normalize_detail(payload, id);
        let record = IssuerRecord::from_fields(fields)
            .ok_or_else(|| PkiError::Protocol(format!("issuer {id} response carried no issuer_id")))?;
        let stored = self.store.push_payload(MODEL_NAME, &record.issuer_id, record.to_fields());
        IssuerRecord::from_fields(stored)
            .ok_or_else(|| PkiError::Protocol(format!("issuer {id} lost its id in the store")))
    }
}

impl RecordGateway for IssuerGateway {
    type Draft = IssuerRecord;

    const MODEL_NAME: &'static str = MODEL_NAME;
    const PRIMARY_KEY: &'static str = "issuer_id";

    async fn submit(&self, draft: &IssuerRecord) -> Result<Fields> {
        let body = Value::Object(draft.serialize());
        let path = self.issuer_path(&draft.issuer_id);
        let record = match self.client.post_json(&path, &body).await? {
            Some(payload) => self.store_detail(payload, &draft.issuer_id)?,
            None => {
                let stored = self.store.push_payload(MODEL_NAME, &draft.issuer_id, draft.to_fields());
                IssuerRecord::from_fields(stored).unwrap_or_else(|| draft.clone())
            }
        };
        Ok(record.to_fields())
    }

    /// Lift `data` and, when it carries a certificate, add `issuer_ref` and
    /// the certificate metadata (metadata wins over server fields).
    fn normalize_detail(&self, payload: Value, id: &str) -> Fields {
        let empty = Value::Null;
        let data = payload.get("data").unwrap_or(&empty);
        let enrichment = match cert::parse_pki_cert(data) {
            Ok(Some(meta)) => {
                let issuer_ref = payload
                    .get("issuer_id")
                    .or_else(|| data.get("issuer_id"))
                    .cloned()
                    .unwrap_or_else(|| Value::String(id.to_string()));
                Some((issuer_ref, meta.to_json_map()))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("issuer {id}: certificate did not parse: {e}");
                None
            }
        };

        let mut record = super::lift_data(payload);
        if let Some((issuer_ref, meta)) = enrichment {
            let mut with_ref = Fields::new();
            with_ref.insert("issuer_ref".into(), issuer_ref);
            record = util::merge_objects(util::merge_objects(with_ref, record), meta);
        }
        record
            .entry(Self::PRIMARY_KEY.to_string())
            .or_insert_with(|| Value::String(id.to_string()));
        record
    }
}
