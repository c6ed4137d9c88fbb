//! Roles: the templates leaf certificates are issued and signed against.

use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;
use uuid::Uuid;

use super::{Fields, RecordGateway, RecordStore};
use crate::client::SecretsClient;
use crate::error::{PkiError, Result};
use crate::util;

pub const MODEL_NAME: &str = "pki/role";
pub const ISSUED_MODEL_NAME: &str = "pki/certificate/generate";
pub const SIGNED_MODEL_NAME: &str = "pki/certificate/sign";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoleRecord {
    pub name:   String,
    pub fields: Fields,
}

impl RoleRecord {
    pub fn from_fields(mut fields: Fields) -> Option<Self> {
        match fields.remove("name") {
            Some(Value::String(name)) => Some(Self { name, fields }),
            _ => None,
        }
    }

    pub fn to_fields(&self) -> Fields {
        let mut out = Fields::new();
        out.insert("name".into(), Value::String(self.name.clone()));
        util::merge_objects(out, self.fields.clone())
    }

    /// Outbound form.  The name travels in the path, not the body.
    pub fn serialize(&self) -> Fields {
        self.fields
            .iter()
            .filter(|(k, _)| !super::RESPONSE_ENVELOPE.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

pub struct RoleGateway {
    client: SecretsClient,
    mount:  String,
    store:  Arc<RecordStore>,
}

impl RoleGateway {
    pub fn new(client: SecretsClient, mount: &str, store: Arc<RecordStore>) -> Self {
        Self { client, mount: mount.trim_matches('/').to_string(), store }
    }

    fn role_path(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(PkiError::Protocol("role name is empty".into()));
        }
        Ok(format!("{}/roles/{name}", self.mount))
    }

    /// Role names on the mount.  Listings carry no attributes beyond the name.
    pub async fn list(&self) -> Result<Vec<RoleRecord>> {
        let Some(payload) = self.client.list(&format!("{}/roles", self.mount)).await? else {
            return Ok(Vec::new());
        };
        let roles = self
            .normalize_list(payload)
            .into_iter()
            .filter_map(|fields| {
                let Some(role) = RoleRecord::from_fields(fields) else {
                    warn!("{}: skipping role listing entry without name", self.mount);
                    return None;
                };
                self.store.push_payload(MODEL_NAME, &role.name, role.to_fields());
                Some(role)
            })
            .collect::<Vec<_>>();
        debug!("{} roles under {}", roles.len(), self.mount);
        Ok(roles)
    }

    pub async fn find(&self, name: &str) -> Result<RoleRecord> {
        let payload = self
            .client
            .get_json(&self.role_path(name)?)
            .await?
            .ok_or_else(|| PkiError::Protocol(format!("empty response reading role {name}")))?;
        let fields = self.normalize_detail(payload, name);
        let stored = self.store.push_payload(MODEL_NAME, name, fields);
        RoleRecord::from_fields(stored)
            .ok_or_else(|| PkiError::Protocol(format!("role {name} response carried no name")))
    }

    /// Delete a role on the server and drop it from the store.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.client.delete(&self.role_path(name)?).await?;
        if !self.store.unload(MODEL_NAME, name) {
            debug!("role {name} was not loaded");
        }
        info!("deleted role {name} on {}", self.mount);
        Ok(())
    }

    /// Issue a certificate and private key from `role`.
    pub async fn issue(&self, role: &str, params: Fields) -> Result<Fields> {
        self.role_path(role)?;
        let path = format!("{}/issue/{role}", self.mount);
        self.write_certificate(&path, ISSUED_MODEL_NAME, params).await
    }

    /// Sign `csr` under the constraints of `role`.
    pub async fn sign(&self, role: &str, csr: &str, mut params: Fields) -> Result<Fields> {
        self.role_path(role)?;
        if csr.trim().is_empty() {
            return Err(PkiError::Protocol(format!("signing with role {role} needs a CSR")));
        }
        params.insert("csr".into(), Value::String(csr.to_string()));
        let path = format!("{}/sign/{role}", self.mount);
        self.write_certificate(&path, SIGNED_MODEL_NAME, params).await
    }

    async fn write_certificate(&self, path: &str, model_name: &str, params: Fields) -> Result<Fields> {
        let id = Uuid::new_v4().to_string();
        let response = self.client.post_json(path, &Value::Object(params)).await?;
        let record = super::normalize_certificate_response(&id, model_name, response);
        info!("{model_name} {id} written via {path}");
        Ok(self.store.push_payload(model_name, &id, record))
    }
}

impl RecordGateway for RoleGateway {
    type Draft = RoleRecord;

    const MODEL_NAME: &'static str = MODEL_NAME;
    const PRIMARY_KEY: &'static str = "name";

    /// Create or replace the role.
    async fn submit(&self, draft: &RoleRecord) -> Result<Fields> {
        let path = self.role_path(&draft.name)?;
        let fields = match self.client.post_json(&path, &Value::Object(draft.serialize())).await? {
            Some(payload) => self.normalize_detail(payload, &draft.name),
            None => draft.to_fields(),
        };
        Ok(self.store.push_payload(MODEL_NAME, &draft.name, fields))
    }
}
